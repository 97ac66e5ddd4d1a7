//! Relay engine
//!
//! Owns the shared ledger and wires the store, gateway and notice sink into
//! the dispatcher and the response notifier. Trigger handlers live here.

use futures_util::future::join_all;
use lifeline_core::{Clock, RelayConfig};
use lifeline_domain::{BloodRequest, DonorResponse, ResponseStatus};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::dispatcher::{DeliveryDispatcher, DispatchReport};
use crate::gateway::PushGateway;
use crate::ledger::{spawn_sweeper, DeduplicationLedger, KeyedLocks};
use crate::matcher::{MatchFinder, MatchTier};
use crate::notice::LocalNoticeSink;
use crate::responder::{RequestRef, ResponseNotifier, ResponseReport, TokenSource};
use crate::store::{RecordStore, StoreError};

/// Result of handling a request update
#[derive(Debug, Clone, Serialize)]
pub struct UpdateReport {
    /// Request identifier
    pub request_id: String,
    /// One report per newly appended response
    pub responses: Vec<ResponseReport>,
    /// Responses flagged as notified in the store
    pub flagged: usize,
}

/// Matching, dedup and delivery engine
pub struct RelayEngine {
    config: RelayConfig,
    store: Arc<dyn RecordStore>,
    ledger: Arc<DeduplicationLedger>,
    /// Serialises read-modify-write of one request document
    request_locks: KeyedLocks<String>,
    dispatcher: DeliveryDispatcher,
    responder: ResponseNotifier,
}

impl RelayEngine {
    /// Build an engine from configuration and collaborators
    pub fn new(
        config: RelayConfig,
        store: Arc<dyn RecordStore>,
        gateway: Arc<dyn PushGateway>,
        notices: Arc<dyn LocalNoticeSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let ledger = Arc::new(DeduplicationLedger::new(config.dedup.suppression_window(), clock));
        let matcher = Arc::new(MatchFinder::new(
            store.clone(),
            MatchTier::standard(&config.collections),
            config.matching.admin_role.clone(),
        ));
        let dispatcher = DeliveryDispatcher::new(
            matcher,
            ledger.clone(),
            gateway.clone(),
            notices.clone(),
            config.delivery.clone(),
            config.channels.clone(),
        );
        let responder = ResponseNotifier::new(
            store.clone(),
            ledger.clone(),
            gateway,
            notices,
            TokenSource::from_config(&config.collections),
            config.collections.requests.clone(),
            config.delivery.clone(),
            config.channels.clone(),
        );

        Self {
            config,
            store,
            ledger,
            request_locks: KeyedLocks::new(),
            dispatcher,
            responder,
        }
    }

    /// Active configuration
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Shared suppression ledger
    pub fn ledger(&self) -> &Arc<DeduplicationLedger> {
        &self.ledger
    }

    /// Start the periodic ledger sweep
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        spawn_sweeper(self.ledger.clone(), self.config.dedup.sweep_interval())
    }

    /// A request was created
    pub async fn on_request_created(&self, request: &BloodRequest) -> DispatchReport {
        info!(request_id = %request.id, blood_group = %request.blood_group, "Request created");
        self.dispatcher.dispatch(request).await
    }

    /// Notify one requester about one response
    pub async fn notify_response(
        &self,
        recipient_id: &str,
        response: &DonorResponse,
        request: RequestRef,
    ) -> ResponseReport {
        self.responder.notify(recipient_id, response, request).await
    }

    /// A request document changed.
    ///
    /// Each newly appended response notifies the requester independently.
    /// Handled responses are then flagged as notified on a fresh read of the
    /// request; a failed write is logged and does not fail the update.
    pub async fn on_request_updated(
        &self,
        before: &BloodRequest,
        after: &BloodRequest,
    ) -> UpdateReport {
        let fresh = after.newly_appended_responses(before);
        if fresh.is_empty() {
            debug!(request_id = %after.id, "Update carries no new responses");
            return UpdateReport {
                request_id: after.id.clone(),
                responses: Vec::new(),
                flagged: 0,
            };
        }

        info!(
            request_id = %after.id,
            new_responses = fresh.len(),
            "Notifying requester of responses"
        );
        let reports = join_all(fresh.iter().map(|response| {
            self.responder
                .notify(&after.requester_id, response, RequestRef::Full(after.clone()))
        }))
        .await;

        let handled: Vec<(String, ResponseStatus)> = fresh
            .iter()
            .zip(reports.iter())
            .filter(|(_, report)| report.handled())
            .map(|(response, _)| (response.donor_id.clone(), response.status))
            .collect();

        let flagged = if handled.is_empty() {
            0
        } else {
            match self.flag_notified(&after.id, &handled).await {
                Ok(flagged) => flagged,
                Err(e) => {
                    warn!(
                        request_id = %after.id,
                        error = %e,
                        "Failed to flag responses as notified"
                    );
                    0
                }
            }
        };

        UpdateReport {
            request_id: after.id.clone(),
            responses: reports,
            flagged,
        }
    }

    async fn flag_notified(
        &self,
        request_id: &str,
        identities: &[(String, ResponseStatus)],
    ) -> Result<usize, StoreError> {
        let _hold = self.request_locks.lock(&request_id.to_string()).await;
        let mut request = self.load_request(request_id).await?;
        let flagged = request.mark_notified(identities);
        if flagged == 0 {
            return Ok(0);
        }

        let responses = serde_json::to_value(&request.responses)
            .map_err(|e| StoreError::InvalidDocument(e.to_string()))?;
        self.store
            .update(&self.config.collections.requests, request_id, patch("responses", responses))
            .await?;
        Ok(flagged)
    }

    /// Record that `viewer_id` opened a request.
    ///
    /// Returns `false` when the viewer was already recorded.
    pub async fn record_seen(&self, request_id: &str, viewer_id: &str) -> Result<bool, StoreError> {
        let _hold = self.request_locks.lock(&request_id.to_string()).await;
        let mut request = self.load_request(request_id).await?;
        if request.seen_by.iter().any(|seen| seen == viewer_id) {
            return Ok(false);
        }

        request.seen_by.push(viewer_id.to_string());
        self.store
            .update(
                &self.config.collections.requests,
                request_id,
                patch("seenBy", json!(request.seen_by)),
            )
            .await?;
        debug!(request_id, viewer_id, "Recorded viewer");
        Ok(true)
    }

    async fn load_request(&self, request_id: &str) -> Result<BloodRequest, StoreError> {
        let collection = &self.config.collections.requests;
        self.store
            .get(collection, request_id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                collection: collection.clone(),
                id: request_id.to_string(),
            })?
            .decode()
    }
}

fn patch(field: &str, value: Value) -> Map<String, Value> {
    let mut patch = Map::new();
    patch.insert(field.to_string(), value);
    patch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{GatewayError, PushMessage, PushTicket};
    use crate::notice::NoticeFeed;
    use async_trait::async_trait;
    use crate::store::{Document, Filter, InMemoryRecordStore};
    use lifeline_core::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingGateway {
        sends: AtomicUsize,
    }

    #[async_trait]
    impl PushGateway for CountingGateway {
        async fn send(&self, _message: &PushMessage) -> Result<PushTicket, GatewayError> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            Ok(PushTicket::ok("t"))
        }
    }

    fn engine() -> (RelayEngine, Arc<InMemoryRecordStore>, Arc<CountingGateway>) {
        let store = Arc::new(InMemoryRecordStore::new());
        let gateway = Arc::new(CountingGateway::default());
        let engine = RelayEngine::new(
            RelayConfig::default(),
            store.clone(),
            gateway.clone(),
            Arc::new(NoticeFeed::new()),
            Arc::new(ManualClock::new(0)),
        );
        (engine, store, gateway)
    }

    /// Store that yields before every call, as a network hop would
    #[derive(Default)]
    struct YieldingStore {
        inner: InMemoryRecordStore,
    }

    #[async_trait]
    impl RecordStore for YieldingStore {
        async fn query(
            &self,
            collection: &str,
            filters: &[Filter],
        ) -> Result<Vec<Document>, StoreError> {
            tokio::task::yield_now().await;
            self.inner.query(collection, filters).await
        }

        async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
            tokio::task::yield_now().await;
            self.inner.get(collection, id).await
        }

        async fn update(
            &self,
            collection: &str,
            id: &str,
            patch: Map<String, Value>,
        ) -> Result<(), StoreError> {
            tokio::task::yield_now().await;
            self.inner.update(collection, id, patch).await
        }
    }

    fn yielding_engine() -> (RelayEngine, Arc<YieldingStore>) {
        let store = Arc::new(YieldingStore::default());
        let engine = RelayEngine::new(
            RelayConfig::default(),
            store.clone(),
            Arc::new(CountingGateway::default()),
            Arc::new(NoticeFeed::new()),
            Arc::new(ManualClock::new(0)),
        );
        (engine, store)
    }

    fn stored(store: &InMemoryRecordStore, request: &BloodRequest) {
        let value = serde_json::to_value(request).unwrap();
        store.insert("bloodRequests", &request.id, value);
    }

    #[tokio::test]
    async fn test_update_notifies_and_flags_new_responses() {
        let (engine, store, gateway) = engine();
        store.insert("users", "owner", json!({ "pushToken": "ExponentPushToken[owner]" }));

        let before = BloodRequest::new("req-1", "B+", "Kumbakonam", "owner");
        let mut after = before.clone();
        after
            .responses
            .push(DonorResponse::new("a", "Arun", ResponseStatus::Accepted));
        after
            .responses
            .push(DonorResponse::new("b", "Bala", ResponseStatus::Declined));
        stored(&store, &after);

        let report = engine.on_request_updated(&before, &after).await;
        assert_eq!(report.responses.len(), 2);
        assert_eq!(report.flagged, 2);
        assert_eq!(gateway.sends.load(Ordering::SeqCst), 2);

        let doc = store.get("bloodRequests", "req-1").await.unwrap().unwrap();
        let saved: BloodRequest = doc.decode().unwrap();
        assert!(saved.responses.iter().all(|r| r.notification_sent));
    }

    #[tokio::test]
    async fn test_update_without_growth_is_noop() {
        let (engine, _store, gateway) = engine();
        let request = BloodRequest::new("req-1", "B+", "Kumbakonam", "owner");

        let report = engine.on_request_updated(&request, &request).await;
        assert!(report.responses.is_empty());
        assert_eq!(gateway.sends.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_flag_failure_is_not_fatal() {
        let (engine, store, _gateway) = engine();
        store.insert("users", "owner", json!({ "pushToken": "ExponentPushToken[owner]" }));

        let before = BloodRequest::new("req-9", "B+", "Kumbakonam", "owner");
        let mut after = before.clone();
        after
            .responses
            .push(DonorResponse::new("a", "Arun", ResponseStatus::Accepted));

        // Request document never stored; flagging cannot find it.
        let report = engine.on_request_updated(&before, &after).await;
        assert_eq!(report.responses.len(), 1);
        assert!(report.responses[0].remote_delivered());
        assert_eq!(report.flagged, 0);
    }

    #[tokio::test]
    async fn test_record_seen_is_idempotent() {
        let (engine, store, _gateway) = engine();
        stored(&store, &BloodRequest::new("req-1", "B+", "Kumbakonam", "owner"));

        assert!(engine.record_seen("req-1", "viewer").await.unwrap());
        assert!(!engine.record_seen("req-1", "viewer").await.unwrap());

        let doc = store.get("bloodRequests", "req-1").await.unwrap().unwrap();
        assert_eq!(doc.field("seenBy"), Some(&json!(["viewer"])));
    }

    #[tokio::test]
    async fn test_record_seen_unknown_request() {
        let (engine, _store, _gateway) = engine();
        let err = engine.record_seen("missing", "viewer").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_overlapping_updates_keep_every_flag() {
        let (engine, store) = yielding_engine();
        store
            .inner
            .insert("users", "owner", json!({ "pushToken": "ExponentPushToken[owner]" }));

        let v0 = BloodRequest::new("req-1", "B+", "Kumbakonam", "owner");
        let mut v1 = v0.clone();
        v1.responses
            .push(DonorResponse::new("a", "Arun", ResponseStatus::Accepted));
        let mut v2 = v1.clone();
        v2.responses
            .push(DonorResponse::new("b", "Bala", ResponseStatus::Declined));
        stored(&store.inner, &v2);

        let (first, second) = tokio::join!(
            engine.on_request_updated(&v0, &v1),
            engine.on_request_updated(&v1, &v2)
        );
        assert_eq!(first.flagged, 1);
        assert_eq!(second.flagged, 1);

        let doc = store.inner.get("bloodRequests", "req-1").await.unwrap().unwrap();
        let saved: BloodRequest = doc.decode().unwrap();
        let flags: Vec<(&str, bool)> = saved
            .responses
            .iter()
            .map(|r| (r.donor_id.as_str(), r.notification_sent))
            .collect();
        assert_eq!(flags, vec![("a", true), ("b", true)]);
    }

    #[tokio::test]
    async fn test_overlapping_seen_markers_keep_every_viewer() {
        let (engine, store) = yielding_engine();
        stored(&store.inner, &BloodRequest::new("req-1", "B+", "Kumbakonam", "owner"));

        let (a, b) = tokio::join!(
            engine.record_seen("req-1", "viewer-a"),
            engine.record_seen("req-1", "viewer-b")
        );
        assert!(a.unwrap());
        assert!(b.unwrap());

        let doc = store.inner.get("bloodRequests", "req-1").await.unwrap().unwrap();
        assert_eq!(doc.field("seenBy"), Some(&json!(["viewer-a", "viewer-b"])));
        assert!(engine.request_locks.is_empty());
    }
}
