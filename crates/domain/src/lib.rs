//! Domain module for the Lifeline relay
//!
//! This crate contains pure domain logic with no I/O dependencies:
//! - Blood requests and the responses donors append to them
//! - Recipient profiles and delivery tokens
//! - Notification identity (event kinds, channels, dedup keys)

pub mod error;
pub mod notification;
pub mod profile;
pub mod request;
pub mod token;

pub use error::{DomainError, Result};
pub use notification::{Channel, EventKind, NotificationKey, Recipient, BROADCAST_SENTINEL};
pub use profile::{same_locality, RecipientProfile};
pub use request::{BloodRequest, DonorResponse, ResponseStatus, ASAP_SENTINEL};
pub use token::DeliveryToken;
