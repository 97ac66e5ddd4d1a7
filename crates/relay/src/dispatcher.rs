//! Fan-out dispatcher for new requests
//!
//! This module matches a new request to donors and pushes one message to each
//! of them in parallel, aggregating the per-recipient results. Individual
//! failures never cancel sibling sends; the dispatcher waits for every attempt
//! to settle before summarising.

use futures_util::stream::{self, StreamExt};
use lifeline_core::{ChannelConfig, DeliveryConfig};
use lifeline_domain::{BloodRequest, EventKind, NotificationKey, RecipientProfile};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::composer::{channel_id, ComposedNotification, NotificationComposer};
use crate::gateway::{push_to, DeliveryOutcome, PushGateway};
use crate::ledger::DeduplicationLedger;
use crate::matcher::MatchFinder;
use crate::notice::{LocalNotice, LocalNoticeSink, NoticeId};

/// Delivery result for a single recipient
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecipientDelivery {
    /// Recipient identifier
    pub recipient_id: String,
    /// Attempt outcome
    pub outcome: DeliveryOutcome,
}

impl RecipientDelivery {
    /// Check if delivery was confirmed
    pub fn is_success(&self) -> bool {
        self.outcome.is_delivered()
    }
}

/// How a dispatch ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// Same request was dispatched within the suppression window
    Suppressed,
    /// Nobody eligible; an informational notice was shown instead
    NoMatch,
    /// Recipients were attempted
    Completed,
    /// Request could not be keyed
    InvalidRequest(String),
}

/// Aggregated dispatch status
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    /// Request identifier
    pub request_id: String,
    /// How the dispatch ended
    pub outcome: DispatchOutcome,
    /// Per-recipient results
    pub results: Vec<RecipientDelivery>,
    /// Number of confirmed deliveries
    pub success_count: usize,
    /// Number of failed attempts
    pub failure_count: usize,
    /// Local notice shown to the requester, if any
    pub notice_id: Option<NoticeId>,
}

impl DispatchReport {
    fn new(request_id: &str, outcome: DispatchOutcome, results: Vec<RecipientDelivery>) -> Self {
        let success_count = results.iter().filter(|r| r.is_success()).count();
        let failure_count = results.len() - success_count;

        Self {
            request_id: request_id.to_string(),
            outcome,
            results,
            success_count,
            failure_count,
            notice_id: None,
        }
    }

    /// True when already handled or when at least one recipient was reached
    pub fn delivered(&self) -> bool {
        match self.outcome {
            DispatchOutcome::Suppressed => true,
            DispatchOutcome::Completed => self.success_count > 0,
            DispatchOutcome::NoMatch | DispatchOutcome::InvalidRequest(_) => false,
        }
    }

    /// Recipients attempted
    pub fn total_recipients(&self) -> usize {
        self.results.len()
    }
}

/// Dispatcher for new-request fan-out
pub struct DeliveryDispatcher {
    matcher: Arc<MatchFinder>,
    ledger: Arc<DeduplicationLedger>,
    gateway: Arc<dyn PushGateway>,
    notices: Arc<dyn LocalNoticeSink>,
    delivery: DeliveryConfig,
    channels: ChannelConfig,
}

impl DeliveryDispatcher {
    /// Create a dispatcher
    pub fn new(
        matcher: Arc<MatchFinder>,
        ledger: Arc<DeduplicationLedger>,
        gateway: Arc<dyn PushGateway>,
        notices: Arc<dyn LocalNoticeSink>,
        delivery: DeliveryConfig,
        channels: ChannelConfig,
    ) -> Self {
        Self {
            matcher,
            ledger,
            gateway,
            notices,
            delivery,
            channels,
        }
    }

    /// Match `request` and notify every eligible donor.
    ///
    /// The broadcast key is marked only after at least one recipient is
    /// confirmed to exist, so an empty match never blocks a later retry.
    pub async fn dispatch(&self, request: &BloodRequest) -> DispatchReport {
        let key = match NotificationKey::broadcast(EventKind::NewBloodRequest, &request.id) {
            Ok(key) => key,
            Err(e) => {
                error!(error = %e, "Cannot dispatch request without a usable id");
                return DispatchReport::new(
                    &request.id,
                    DispatchOutcome::InvalidRequest(e.to_string()),
                    Vec::new(),
                );
            }
        };

        let recipients = {
            let gate = self.ledger.lock_key(&key).await;
            if gate.already_sent() {
                info!(request_id = %request.id, key = %key, "Duplicate trigger suppressed");
                return DispatchReport::new(&request.id, DispatchOutcome::Suppressed, Vec::new());
            }

            let recipients = self
                .matcher
                .find(&request.blood_group, &request.location, Some(&request.requester_id))
                .await;
            if !recipients.is_empty() {
                gate.mark_sent();
            }
            recipients
        };

        if recipients.is_empty() {
            let mut report = DispatchReport::new(&request.id, DispatchOutcome::NoMatch, Vec::new());
            report.notice_id = self.show(&NotificationComposer::no_match(request)).await;
            return report;
        }

        let message = NotificationComposer::new_request(request);
        let sends: Vec<_> = recipients
            .iter()
            .map(|recipient| self.deliver_to(recipient, &message))
            .collect();
        let results: Vec<RecipientDelivery> = stream::iter(sends)
            .buffer_unordered(self.delivery.max_concurrent_sends.max(1))
            .collect()
            .await;

        let mut report = DispatchReport::new(&request.id, DispatchOutcome::Completed, results);
        info!(
            request_id = %request.id,
            total = report.total_recipients(),
            delivered = report.success_count,
            failed = report.failure_count,
            "Dispatch complete"
        );

        let confirmation = NotificationComposer::confirmation(request, report.success_count);
        report.notice_id = self.show(&confirmation).await;
        report
    }

    async fn deliver_to(
        &self,
        recipient: &RecipientProfile,
        message: &ComposedNotification,
    ) -> RecipientDelivery {
        let outcome = push_to(
            self.gateway.as_ref(),
            recipient.token().unwrap_or_default(),
            &self.delivery.accepted_token_prefixes,
            message,
            channel_id(&self.channels, message.channel()),
        )
        .await;

        if !outcome.is_delivered() {
            warn!(recipient_id = %recipient.id, "Recipient not reached");
        }

        RecipientDelivery {
            recipient_id: recipient.id.clone(),
            outcome,
        }
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
