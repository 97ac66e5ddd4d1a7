//! Core functionality for the Lifeline relay.
//!
//! This crate provides the configuration model, the clock abstraction, and
//! logging initialization shared by every Lifeline crate.

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    ChannelConfig, CollectionConfig, ConfigError, DedupConfig, DeliveryConfig, GatewayConfig,
    MatchingConfig, RelayConfig,
};
pub use error::{CoreError, Result};
