//! Notification identity
//!
//! Event kinds, delivery channels, and the composite key that identifies one
//! logical notification for duplicate suppression.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, Result};
use crate::request::ResponseStatus;

/// Recipient placeholder for fan-out notifications
pub const BROADCAST_SENTINEL: &str = "all";

const KEY_SEPARATOR: char = ':';

/// Logical notification type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A new request was matched to donors
    NewBloodRequest,
    /// A donor accepted or declined a request
    DonorResponse,
    /// Confirmation or diagnostic notice for the acting device
    Confirmation,
}

impl EventKind {
    pub fn tag(&self) -> &'static str {
        match self {
            EventKind::NewBloodRequest => "new_blood_request",
            EventKind::DonorResponse => "donor_response",
            EventKind::Confirmation => "confirmation",
        }
    }

    /// Channel a notification of this kind is delivered on
    pub fn channel(&self) -> Channel {
        match self {
            EventKind::NewBloodRequest => Channel::NewMatch,
            EventKind::DonorResponse => Channel::Response,
            EventKind::Confirmation => Channel::General,
        }
    }
}

/// Delivery channel hint; concrete names come from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    NewMatch,
    Response,
    General,
}

/// Who a notification targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    Broadcast,
    One(String),
}

impl Recipient {
    fn key_part(&self) -> &str {
        match self {
            Recipient::Broadcast => BROADCAST_SENTINEL,
            Recipient::One(id) => id,
        }
    }
}

/// Composite identity of a logical notification
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationKey(String);

impl NotificationKey {
    pub fn new(kind: EventKind, request_id: &str, recipient: &Recipient) -> Result<Self> {
        if request_id.trim().is_empty() {
            return Err(DomainError::InvalidKey("empty request id".to_string()));
        }
        if recipient.key_part().trim().is_empty() {
            return Err(DomainError::InvalidKey("empty recipient id".to_string()));
        }
        Ok(Self(format!(
            "{}{sep}{}{sep}{}",
            kind.tag(),
            request_id,
            recipient.key_part(),
            sep = KEY_SEPARATOR
        )))
    }

    /// Key for the fan-out of a new request
    pub fn broadcast(kind: EventKind, request_id: &str) -> Result<Self> {
        Self::new(kind, request_id, &Recipient::Broadcast)
    }

    /// Key for one donor's response reaching one requester.
    ///
    /// Responder and status are part of the recipient slot so distinct
    /// responders on the same request never suppress each other.
    pub fn response(
        request_id: &str,
        recipient_id: &str,
        responder_id: &str,
        status: ResponseStatus,
    ) -> Result<Self> {
        if recipient_id.trim().is_empty() || responder_id.trim().is_empty() {
            return Err(DomainError::InvalidKey("empty recipient or responder id".to_string()));
        }
        let recipient = Recipient::One(format!("{}_{}_{}", recipient_id, responder_id, status));
        Self::new(EventKind::DonorResponse, request_id, &recipient)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NotificationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_key_shape() {
        let key = NotificationKey::broadcast(EventKind::NewBloodRequest, "req-1").unwrap();
        assert_eq!(key.as_str(), "new_blood_request:req-1:all");
    }

    #[test]
    fn test_response_keys_distinct_per_responder_and_status() {
        let a = NotificationKey::response("req-1", "owner", "A", ResponseStatus::Accepted).unwrap();
        let b = NotificationKey::response("req-1", "owner", "B", ResponseStatus::Declined).unwrap();
        let a_declined =
            NotificationKey::response("req-1", "owner", "A", ResponseStatus::Declined).unwrap();

        assert_ne!(a, b);
        assert_ne!(a, a_declined);
        assert_eq!(a.as_str(), "donor_response:req-1:owner_A_accepted");
    }

    #[test]
    fn test_empty_request_id_rejected() {
        assert!(matches!(
            NotificationKey::broadcast(EventKind::NewBloodRequest, " "),
            Err(DomainError::InvalidKey(_))
        ));
        assert!(NotificationKey::new(
            EventKind::DonorResponse,
            "r",
            &Recipient::One(String::new())
        )
        .is_err());
        assert!(NotificationKey::response("r", "", "A", ResponseStatus::Accepted).is_err());
        assert!(NotificationKey::response("r", "owner", " ", ResponseStatus::Accepted).is_err());
    }

    #[test]
    fn test_kind_channels() {
        assert_eq!(EventKind::NewBloodRequest.channel(), Channel::NewMatch);
        assert_eq!(EventKind::DonorResponse.channel(), Channel::Response);
        assert_eq!(EventKind::Confirmation.channel(), Channel::General);
    }
}
