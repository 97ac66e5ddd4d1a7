//! Lifeline Relay - donor matching and notification delivery
//!
//! This crate turns blood-request events into notifications. It handles:
//! - Matching a new request to eligible donors by blood group and locality
//! - Suppressing duplicate triggers within a short window
//! - Parallel fan-out to every matched donor with per-recipient outcomes
//! - Telling a requester when a donor accepts or declines
//! - A local notice for the acting user on every path
//!
//! # Architecture
//!
//! Events flow through the following pipeline:
//! 1. Trigger received by `RelayEngine`
//! 2. Duplicate check in the `DeduplicationLedger`
//! 3. Recipients resolved by `MatchFinder` (or the requester's token by `ResponseNotifier`)
//! 4. Content built by `NotificationComposer`
//! 5. Messages pushed through a `PushGateway`, notices shown on a `LocalNoticeSink`
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use lifeline_core::{RelayConfig, SystemClock};
//! use lifeline_domain::BloodRequest;
//! use lifeline_relay::{ExpoPushGateway, InMemoryRecordStore, NoticeFeed, RelayEngine};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RelayConfig::default();
//! let gateway = ExpoPushGateway::new(&config.gateway)?;
//! let engine = RelayEngine::new(
//!     config,
//!     Arc::new(InMemoryRecordStore::new()),
//!     Arc::new(gateway),
//!     Arc::new(NoticeFeed::new()),
//!     Arc::new(SystemClock),
//! );
//!
//! let request = BloodRequest::new("req-1", "B+", "Kumbakonam", "user-1");
//! let report = engine.on_request_created(&request).await;
//! println!("delivered: {}", report.delivered());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod composer;
pub mod dispatcher;
pub mod engine;
pub mod gateway;
pub mod ledger;
pub mod matcher;
pub mod notice;
pub mod responder;
pub mod store;

pub use composer::{ComposedNotification, NotificationComposer, RequestSummary};
pub use dispatcher::{DeliveryDispatcher, DispatchOutcome, DispatchReport, RecipientDelivery};
pub use engine::{RelayEngine, UpdateReport};
pub use gateway::{
    DeliveryFailure, DeliveryOutcome, ExpoPushGateway, GatewayError, PushGateway, PushMessage,
    PushTicket,
};
pub use ledger::{spawn_sweeper, DeduplicationLedger, KeyGate};
pub use matcher::{MatchFinder, MatchTier};
pub use notice::{
    LocalNotice, LocalNoticeSink, NoticeError, NoticeFeed, NoticeId, NoticeTrigger, StoredNotice,
    TracingNoticeSink,
};
pub use responder::{RemoteOutcome, RequestRef, ResponseNotifier, ResponseReport, TokenSource};
pub use store::{Document, Filter, InMemoryRecordStore, RecordStore, StoreError};
