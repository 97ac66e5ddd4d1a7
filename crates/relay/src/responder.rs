//! Response notifier
//!
//! Tells a requester that a donor accepted or declined. Mirrors the fan-out
//! dispatcher for a single recipient: keyed suppression, token validation,
//! remote push, and a local notice.
//!
//! The local copy is shown regardless of the remote outcome, and a missing
//! token downgrades to a local-only notice without marking the key, so a
//! token registered later can still produce a real push.

use lifeline_core::{ChannelConfig, CollectionConfig, DeliveryConfig};
use lifeline_domain::{BloodRequest, DonorResponse, NotificationKey, RecipientProfile};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::composer::{channel_id, ComposedNotification, NotificationComposer, RequestSummary};
use crate::gateway::{push_to, DeliveryOutcome, PushGateway};
use crate::ledger::DeduplicationLedger;
use crate::notice::{LocalNotice, LocalNoticeSink, NoticeId};
use crate::store::{Document, RecordStore};

/// The request a response belongs to
#[derive(Debug, Clone)]
pub enum RequestRef {
    /// Full request; its attributes are used directly
    Full(BloodRequest),
    /// Only an id; attributes are looked up
    Id(String),
}

impl RequestRef {
    /// Request identifier
    pub fn id(&self) -> &str {
        match self {
            RequestRef::Full(request) => &request.id,
            RequestRef::Id(id) => id,
        }
    }
}

/// What happened on the remote channel
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "remote", rename_all = "snake_case")]
pub enum RemoteOutcome {
    /// A push was attempted
    Attempted {
        /// Attempt result
        result: DeliveryOutcome,
    },
    /// No token could be resolved; local notice only
    NoToken,
    /// Same response was already handled within the window
    Suppressed,
    /// Input could not be keyed; nothing was attempted
    Skipped {
        /// Reason
        reason: String,
    },
}

/// Per-channel result of one response notification
#[derive(Debug, Clone, Serialize)]
pub struct ResponseReport {
    /// Request identifier
    pub request_id: String,
    /// Requester being notified
    pub recipient_id: String,
    /// Responding donor
    pub responder_id: String,
    /// Remote channel outcome
    pub remote: RemoteOutcome,
    /// Local notice id when one was shown
    pub local_notice: Option<NoticeId>,
}

impl ResponseReport {
    /// Optimistic "handled" flag: true once any best-effort attempt was made,
    /// even if only the local notice went out.
    pub fn handled(&self) -> bool {
        !matches!(self.remote, RemoteOutcome::Skipped { .. })
    }

    /// Whether the gateway confirmed the push
    pub fn remote_delivered(&self) -> bool {
        matches!(&self.remote, RemoteOutcome::Attempted { result } if result.is_delivered())
    }
}

/// Collection searched for a recipient's token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSource {
    /// Collection name
    pub collection: String,
}

impl TokenSource {
    /// Ordered sources from configuration
    pub fn from_config(collections: &CollectionConfig) -> Vec<TokenSource> {
        collections
            .token_sources
            .iter()
            .map(|collection| TokenSource {
                collection: collection.clone(),
            })
            .collect()
    }

    /// Token carried by a profile document, if any
    pub fn extract(doc: &Document) -> Option<String> {
        RecipientProfile::from_document(&doc.id, &doc.data)
            .ok()
            .and_then(|profile| profile.token().map(str::to_string))
    }
}

/// Notifies requesters about donor responses
pub struct ResponseNotifier {
    store: Arc<dyn RecordStore>,
    ledger: Arc<DeduplicationLedger>,
    gateway: Arc<dyn PushGateway>,
    notices: Arc<dyn LocalNoticeSink>,
    token_sources: Vec<TokenSource>,
    requests_collection: String,
    delivery: DeliveryConfig,
    channels: ChannelConfig,
}

impl ResponseNotifier {
    /// Create a notifier
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn RecordStore>,
        ledger: Arc<DeduplicationLedger>,
        gateway: Arc<dyn PushGateway>,
        notices: Arc<dyn LocalNoticeSink>,
        token_sources: Vec<TokenSource>,
        requests_collection: impl Into<String>,
        delivery: DeliveryConfig,
        channels: ChannelConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            gateway,
            notices,
            token_sources,
            requests_collection: requests_collection.into(),
            delivery,
            channels,
        }
    }

    /// Notify `recipient_id` that `response` was recorded on `request`
    pub async fn notify(
        &self,
        recipient_id: &str,
        response: &DonorResponse,
        request: RequestRef,
    ) -> ResponseReport {
        let mut report = ResponseReport {
            request_id: request.id().to_string(),
            recipient_id: recipient_id.to_string(),
            responder_id: response.donor_id.clone(),
            remote: RemoteOutcome::NoToken,
            local_notice: None,
        };

        let key = match NotificationKey::response(
            request.id(),
            recipient_id,
            &response.donor_id,
            response.status,
        ) {
            Ok(key) => key,
            Err(e) => {
                error!(error = %e, "Cannot key response notification");
                report.remote = RemoteOutcome::Skipped { reason: e.to_string() };
                return report;
            }
        };

        let gate = self.ledger.lock_key(&key).await;
        if gate.already_sent() {
            info!(key = %key, "Duplicate response notification suppressed");
            report.remote = RemoteOutcome::Suppressed;
            return report;
        }

        let summary = self.summarize(request).await;
        let content = NotificationComposer::response(response, &summary);

        let token = match self.resolve_token(recipient_id).await {
            Some(token) => token,
            None => {
                drop(gate);
                info!(
                    request_id = %summary.request_id,
                    recipient_id,
                    "No delivery token for requester; showing local notice only"
                );
                report.local_notice = self.show(&content).await;
                return report;
            }
        };

        gate.mark_sent();
        drop(gate);

        let result = push_to(
            self.gateway.as_ref(),
            &token,
            &self.delivery.accepted_token_prefixes,
            &content,
            channel_id(&self.channels, content.channel()),
        )
        .await;
        info!(
            request_id = %summary.request_id,
            recipient_id,
            responder_id = %response.donor_id,
            status = %response.status,
            delivered = result.is_delivered(),
            "Response notification attempted"
        );

        report.remote = RemoteOutcome::Attempted { result };
        report.local_notice = self.show(&content).await;
        report
    }

    async fn summarize(&self, request: RequestRef) -> RequestSummary {
        let id = match request {
            RequestRef::Full(request) => return RequestSummary::of(&request),
            RequestRef::Id(id) => id,
        };

        match self.store.get(&self.requests_collection, &id).await {
            Ok(Some(doc)) => match doc.decode::<BloodRequest>() {
                Ok(request) => RequestSummary::of(&request),
                Err(e) => {
                    warn!(
                        request_id = %id,
                        error = %e,
                        "Request document unreadable; using blank details"
                    );
                    RequestSummary::bare(id)
                }
            },
            Ok(None) => {
                warn!(request_id = %id, "Request not found; using blank details");
                RequestSummary::bare(id)
            }
            Err(e) => {
                warn!(request_id = %id, error = %e, "Request lookup failed; using blank details");
                RequestSummary::bare(id)
            }
        }
    }

    async fn resolve_token(&self, recipient_id: &str) -> Option<String> {
        for source in &self.token_sources {
            match self.store.get(&source.collection, recipient_id).await {
                Ok(Some(doc)) => {
                    if let Some(token) = TokenSource::extract(&doc) {
                        debug!(
                            collection = %source.collection,
                            recipient_id,
                            "Resolved delivery token"
                        );
                        return Some(token);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        collection = %source.collection,
                        recipient_id,
                        error = %e,
                        "Token lookup failed"
                    );
                }
            }
        }
        None
    }

    async fn show(&self, content: &ComposedNotification) -> Option<NoticeId> {
        let notice = LocalNotice::immediate(content, channel_id(&self.channels, content.channel()));
        match self.notices.present(notice).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(error = %e, "Local notice failed");
                None
            }
        }
    }
}
