//! Push gateway boundary
//!
//! One message per destination token. Only a ticket with an explicit `ok`
//! status counts as a delivery; everything else is a failed attempt for that
//! recipient and is never retried within the same call.

use async_trait::async_trait;
use lifeline_core::GatewayConfig;
use lifeline_domain::DeliveryToken;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::composer::ComposedNotification;

/// Gateway transport errors
#[derive(Debug, Error)]
pub enum GatewayError {
    /// HTTP client could not be built
    #[error("Gateway client error: {0}")]
    Client(String),

    /// Request failed before a ticket was returned
    #[error("Gateway transport error: {0}")]
    Transport(String),

    /// Gateway answered with a body that is not a ticket
    #[error("Gateway response could not be decoded: {0}")]
    Decode(String),
}

/// Delivery priority hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Deliver immediately, waking the device
    High,
    /// Gateway default
    Default,
}

/// Message accepted by the gateway
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    /// Destination token
    pub to: String,
    /// Title line
    pub title: String,
    /// Body text
    pub body: String,
    /// Routing metadata for the receiving app
    pub data: BTreeMap<String, Value>,
    /// Notification sound
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sound: Option<String>,
    /// Delivery priority
    pub priority: Priority,
    /// Android channel id
    pub channel_id: String,
}

impl PushMessage {
    /// High-priority message for `token` on `channel_id`
    pub fn new(token: &DeliveryToken, content: &ComposedNotification, channel_id: &str) -> Self {
        Self {
            to: token.as_str().to_string(),
            title: content.title.clone(),
            body: content.body.clone(),
            data: content.data.clone(),
            sound: Some("default".to_string()),
            priority: Priority::High,
            channel_id: channel_id.to_string(),
        }
    }
}

/// Per-message status reported by the gateway
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    /// Accepted for delivery
    Ok,
    /// Rejected
    Error,
    /// Anything else the gateway may answer
    #[serde(other)]
    Unknown,
}

/// Gateway ticket for one message
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PushTicket {
    /// Ticket status
    pub status: TicketStatus,
    /// Ticket id when accepted
    #[serde(default)]
    pub id: Option<String>,
    /// Human-readable rejection message
    #[serde(default)]
    pub message: Option<String>,
    /// Structured rejection details
    #[serde(default)]
    pub details: Option<Value>,
}

impl PushTicket {
    /// Accepted ticket
    pub fn ok(id: impl Into<String>) -> Self {
        Self {
            status: TicketStatus::Ok,
            id: Some(id.into()),
            message: None,
            details: None,
        }
    }

    /// Rejected ticket
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: TicketStatus::Error,
            id: None,
            message: Some(message.into()),
            details: None,
        }
    }

    /// Whether the gateway confirmed the message
    pub fn is_ok(&self) -> bool {
        self.status == TicketStatus::Ok
    }

    /// Machine-readable error code, e.g. `DeviceNotRegistered`
    pub fn error_code(&self) -> Option<&str> {
        self.details.as_ref()?.get("error")?.as_str()
    }
}

/// Remote push gateway
#[async_trait]
pub trait PushGateway: Send + Sync {
    /// Send one message and return its ticket
    async fn send(&self, message: &PushMessage) -> Result<PushTicket, GatewayError>;
}

/// Why a single recipient was not reached
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeliveryFailure {
    /// Token failed shape validation; nothing was sent
    MalformedToken {
        /// Validation error, carrying a redacted token
        reason: String,
    },
    /// Gateway returned a non-ok ticket
    Rejected {
        /// Gateway message
        message: String,
        /// Gateway error code
        code: Option<String>,
    },
    /// Call failed before a ticket was returned
    Transport {
        /// Error description
        message: String,
    },
}

/// Outcome of one remote push attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    /// Gateway confirmed the message
    Delivered {
        /// Gateway ticket id
        ticket_id: Option<String>,
    },
    /// Attempt failed
    Failed {
        /// Failure reason
        failure: DeliveryFailure,
    },
}

impl DeliveryOutcome {
    /// Whether the attempt was confirmed
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }
}

/// Validate `raw_token`, send, and classify the result.
///
/// Shared by the fan-out dispatcher and the response notifier.
pub async fn push_to(
    gateway: &dyn PushGateway,
    raw_token: &str,
    prefixes: &[String],
    content: &ComposedNotification,
    channel_id: &str,
) -> DeliveryOutcome {
    let token = match DeliveryToken::parse(raw_token, prefixes) {
        Ok(token) => token,
        Err(e) => {
            warn!(error = %e, "Rejected delivery token before send");
            return DeliveryOutcome::Failed {
                failure: DeliveryFailure::MalformedToken {
                    reason: e.to_string(),
                },
            };
        }
    };

    let message = PushMessage::new(&token, content, channel_id);
    match gateway.send(&message).await {
        Ok(ticket) if ticket.is_ok() => {
            debug!(channel = channel_id, ticket_id = ?ticket.id, "Push accepted");
            DeliveryOutcome::Delivered { ticket_id: ticket.id }
        }
        Ok(ticket) => {
            let code = ticket.error_code().map(str::to_string);
            let message = ticket
                .message
                .unwrap_or_else(|| format!("gateway status {:?}", ticket.status));
            warn!(channel = channel_id, code = ?code, %message, "Push rejected by gateway");
            DeliveryOutcome::Failed {
                failure: DeliveryFailure::Rejected { message, code },
            }
        }
        Err(e) => {
            warn!(channel = channel_id, error = %e, "Push transport failure");
            DeliveryOutcome::Failed {
                failure: DeliveryFailure::Transport {
                    message: e.to_string(),
                },
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct TicketEnvelope {
    #[serde(default)]
    data: Option<TicketData>,
    #[serde(default)]
    errors: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TicketData {
    One(PushTicket),
    Many(Vec<PushTicket>),
}

/// Expo push service client
pub struct ExpoPushGateway {
    client: reqwest::Client,
    endpoint: String,
    access_token: Option<String>,
}

impl ExpoPushGateway {
    /// Build a client from gateway configuration
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GatewayError::Client(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            access_token: config.access_token.clone(),
        })
    }

    fn decode(body: &str) -> Result<PushTicket, GatewayError> {
        let envelope: TicketEnvelope =
            serde_json::from_str(body).map_err(|e| GatewayError::Decode(e.to_string()))?;

        match envelope.data {
            Some(TicketData::One(ticket)) => Ok(ticket),
            Some(TicketData::Many(tickets)) => tickets
                .into_iter()
                .next()
                .ok_or_else(|| GatewayError::Decode("empty ticket list".to_string())),
            None => {
                let detail = envelope
                    .errors
                    .and_then(|errors| errors.into_iter().next())
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "response carried no ticket".to_string());
                Ok(PushTicket::error(detail))
            }
        }
    }
}

#[async_trait]
impl PushGateway for ExpoPushGateway {
    async fn send(&self, message: &PushMessage) -> Result<PushTicket, GatewayError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(message);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        if !status.is_success() {
            debug!(%status, "Gateway returned non-success HTTP status");
        }
        Self::decode(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lifeline_domain::EventKind;
    use std::sync::Mutex;

    struct FixedGateway {
        answer: Result<PushTicket, String>,
        sent: Mutex<Vec<PushMessage>>,
    }

    #[async_trait]
    impl PushGateway for FixedGateway {
        async fn send(&self, message: &PushMessage) -> Result<PushTicket, GatewayError> {
            self.sent.lock().unwrap().push(message.clone());
            self.answer.clone().map_err(GatewayError::Transport)
        }
    }

    fn gateway(answer: Result<PushTicket, String>) -> FixedGateway {
        FixedGateway {
            answer,
            sent: Mutex::new(Vec::new()),
        }
    }

    fn content() -> ComposedNotification {
        ComposedNotification {
            kind: EventKind::NewBloodRequest,
            title: "t".to_string(),
            body: "b".to_string(),
            data: BTreeMap::new(),
        }
    }

    fn prefixes() -> Vec<String> {
        vec!["ExponentPushToken[".to_string()]
    }

    #[tokio::test]
    async fn test_malformed_token_never_reaches_gateway() {
        let gw = gateway(Ok(PushTicket::ok("t-1")));
        let outcome = push_to(&gw, "garbage", &prefixes(), &content(), "blood-requests").await;

        assert!(matches!(
            outcome,
            DeliveryOutcome::Failed { failure: DeliveryFailure::MalformedToken { .. } }
        ));
        assert!(gw.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ok_ticket_is_delivered() {
        let gw = gateway(Ok(PushTicket::ok("t-1")));
        let outcome = push_to(
            &gw,
            "ExponentPushToken[abc]",
            &prefixes(),
            &content(),
            "blood-requests",
        )
        .await;

        assert_eq!(outcome, DeliveryOutcome::Delivered { ticket_id: Some("t-1".to_string()) });
        let sent = gw.sent.lock().unwrap();
        assert_eq!(sent[0].channel_id, "blood-requests");
        assert_eq!(sent[0].priority, Priority::High);
    }

    #[tokio::test]
    async fn test_error_ticket_and_transport_failures() {
        let rejected = gateway(Ok(PushTicket::error("DeviceNotRegistered")));
        let outcome =
            push_to(&rejected, "ExponentPushToken[abc]", &prefixes(), &content(), "c").await;
        assert!(!outcome.is_delivered());

        let broken = gateway(Err("connection reset".to_string()));
        let outcome =
            push_to(&broken, "ExponentPushToken[abc]", &prefixes(), &content(), "c").await;
        assert!(matches!(
            outcome,
            DeliveryOutcome::Failed { failure: DeliveryFailure::Transport { .. } }
        ));
    }

    #[test]
    fn test_decode_single_and_list_tickets() {
        let ok = ExpoPushGateway::decode(r#"{"data":{"status":"ok","id":"abc"}}"#).unwrap();
        assert!(ok.is_ok());
        assert_eq!(ok.id.as_deref(), Some("abc"));

        let err = ExpoPushGateway::decode(
            r#"{"data":[{"status":"error","message":"not registered","details":{"error":"DeviceNotRegistered"}}]}"#,
        )
        .unwrap();
        assert!(!err.is_ok());
        assert_eq!(err.error_code(), Some("DeviceNotRegistered"));
    }

    #[test]
    fn test_decode_unknown_status_and_error_envelope() {
        let odd = ExpoPushGateway::decode(r#"{"data":{"status":"queued"}}"#).unwrap();
        assert_eq!(odd.status, TicketStatus::Unknown);
        assert!(!odd.is_ok());

        let envelope =
            ExpoPushGateway::decode(r#"{"errors":[{"code":"VALIDATION_ERROR"}]}"#).unwrap();
        assert!(!envelope.is_ok());

        assert!(matches!(ExpoPushGateway::decode("<html>"), Err(GatewayError::Decode(_))));
    }

    #[test]
    fn test_message_serializes_camel_case() {
        let token = DeliveryToken::parse("ExponentPushToken[abc]", &prefixes()).unwrap();
        let message = PushMessage::new(&token, &content(), "donor-responses");
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["channelId"], "donor-responses");
        assert_eq!(json["priority"], "high");
        assert_eq!(json["sound"], "default");
    }
}
