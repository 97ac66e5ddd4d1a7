//! Notification composition
//!
//! Pure functions from request/response data to channel-agnostic content.
//! The same [`ComposedNotification`] feeds both the remote push and the local
//! notice surfaces.

use lifeline_core::ChannelConfig;
use lifeline_domain::{BloodRequest, Channel, DonorResponse, EventKind};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Phrase used when the request must be served immediately
pub const URGENCY_IMMEDIATE: &str = "URGENT – NEEDED IMMEDIATELY";

/// Phrase used when no time was given
pub const URGENCY_UNSPECIFIED: &str = "URGENT REQUEST";

/// Screen the app opens for new-request notifications
pub const SCREEN_DONOR_REQUESTS: &str = "DonorRequests";

/// Screen the app opens for response notifications
pub const SCREEN_MY_REQUESTS: &str = "MyRequests";

/// Title, body, and routing metadata for one notification
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComposedNotification {
    /// Event kind
    pub kind: EventKind,
    /// Title line
    pub title: String,
    /// Body text
    pub body: String,
    /// Routing metadata
    pub data: BTreeMap<String, Value>,
}

impl ComposedNotification {
    /// Channel this notification is delivered on
    pub fn channel(&self) -> Channel {
        self.kind.channel()
    }
}

/// Request attributes a response notification needs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestSummary {
    /// Request id
    pub request_id: String,
    /// Blood group, blank when unknown
    pub blood_group: String,
    /// Location, blank when unknown
    pub location: String,
}

impl RequestSummary {
    /// Summary of a full request
    pub fn of(request: &BloodRequest) -> Self {
        Self {
            request_id: request.id.clone(),
            blood_group: request.blood_group.clone(),
            location: request.location.clone(),
        }
    }

    /// Summary carrying only an id
    pub fn bare(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            ..Self::default()
        }
    }
}

/// Urgency phrase for a request's required time
pub fn urgency_phrase(required_time: Option<&str>) -> String {
    match required_time.map(str::trim).filter(|t| !t.is_empty()) {
        Some(time) if time.to_ascii_uppercase().contains(lifeline_domain::ASAP_SENTINEL) => {
            URGENCY_IMMEDIATE.to_string()
        }
        Some(time) => format!("NEEDED BY: {}", time),
        None => URGENCY_UNSPECIFIED.to_string(),
    }
}

/// Resolve a channel hint to its configured id
pub fn channel_id(channels: &ChannelConfig, channel: Channel) -> &str {
    match channel {
        Channel::NewMatch => &channels.new_match,
        Channel::Response => &channels.response,
        Channel::General => &channels.general,
    }
}

fn metadata(
    kind: EventKind,
    summary: &RequestSummary,
    screen: &str,
    urgent: bool,
) -> BTreeMap<String, Value> {
    let mut data = BTreeMap::new();
    data.insert("type".to_string(), json!(kind.tag()));
    data.insert("requestId".to_string(), json!(summary.request_id));
    data.insert("bloodGroup".to_string(), json!(summary.blood_group));
    data.insert("location".to_string(), json!(summary.location));
    data.insert("screen".to_string(), json!(screen));
    data.insert("urgent".to_string(), json!(urgent));
    data
}

/// Builds notification content
#[derive(Debug, Clone, Copy, Default)]
pub struct NotificationComposer;

impl NotificationComposer {
    /// Fan-out message sent to every matched donor
    pub fn new_request(request: &BloodRequest) -> ComposedNotification {
        let purpose = request
            .purpose()
            .map(|p| format!(" for {}", p))
            .unwrap_or_default();

        let body = format!(
            "{} needs {} blood{}. {}. Tap to respond and help save a life!",
            request.requester_display_name(),
            request.blood_group,
            purpose,
            urgency_phrase(request.required_time()),
        );

        let urgent = request.is_asap() || request.required_time().is_none();
        let mut data = metadata(
            EventKind::NewBloodRequest,
            &RequestSummary::of(request),
            SCREEN_DONOR_REQUESTS,
            urgent,
        );
        data.insert("action".to_string(), json!("respond"));

        ComposedNotification {
            kind: EventKind::NewBloodRequest,
            title: format!("🩸 {} Blood Needed in {}", request.blood_group, request.location),
            body,
            data,
        }
    }

    /// Message telling a requester that a donor reacted
    pub fn response(response: &DonorResponse, summary: &RequestSummary) -> ComposedNotification {
        let name = response.display_name();
        let group = if summary.blood_group.is_empty() {
            "blood".to_string()
        } else {
            format!("{} blood", summary.blood_group)
        };
        let place = if summary.location.is_empty() {
            String::new()
        } else {
            format!(" in {}", summary.location)
        };

        let (title, body) = if response.status.is_accepted() {
            let contact = match response.contact() {
                Some(contact) => format!("Contact them at {}.", contact),
                None => "Check the app for their contact details.".to_string(),
            };
            (
                format!("✅ {} ACCEPTED your request", name),
                format!(
                    "Great news! {} has agreed to donate for your {} request{}. {}",
                    name, group, place, contact
                ),
            )
        } else {
            (
                format!("❌ {} DECLINED your request", name),
                format!(
                    "{} can't donate right now. Don't worry, other donors may still respond to your {} request{}.",
                    name, group, place
                ),
            )
        };

        let mut data = metadata(
            EventKind::DonorResponse,
            summary,
            SCREEN_MY_REQUESTS,
            response.status.is_accepted(),
        );
        data.insert("donorId".to_string(), json!(response.donor_id));
        data.insert("status".to_string(), json!(response.status.as_str()));
        data.insert("action".to_string(), json!("view"));

        ComposedNotification {
            kind: EventKind::DonorResponse,
            title,
            body,
            data,
        }
    }

    /// Informational notice for the requester when nobody matched
    pub fn no_match(request: &BloodRequest) -> ComposedNotification {
        ComposedNotification {
            kind: EventKind::Confirmation,
            title: "No Donors Available Yet".to_string(),
            body: format!(
                "No available {} donors were found in {} right now. Your request stays open and donors can still find it.",
                request.blood_group, request.location
            ),
            data: metadata(
                EventKind::Confirmation,
                &RequestSummary::of(request),
                SCREEN_MY_REQUESTS,
                false,
            ),
        }
    }

    /// Confirmation summarising a fan-out
    pub fn confirmation(request: &BloodRequest, reached: usize) -> ComposedNotification {
        let noun = if reached == 1 { "donor" } else { "donors" };
        let mut data = metadata(
            EventKind::Confirmation,
            &RequestSummary::of(request),
            SCREEN_MY_REQUESTS,
            false,
        );
        data.insert("reached".to_string(), json!(reached));

        ComposedNotification {
            kind: EventKind::Confirmation,
            title: "Request Sent".to_string(),
            body: format!(
                "{} {} reached for your {} request in {}.",
                reached, noun, request.blood_group, request.location
            ),
            data,
        }
    }
}
