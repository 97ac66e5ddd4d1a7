//! Blood request domain model
//!
//! A request is created by a requester and grows a list of donor responses.
//! The relay never deletes requests; it only reads them and flags responses
//! it has already notified about.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Marker in `required_time` meaning "needed immediately"
pub const ASAP_SENTINEL: &str = "ASAP";

/// Donor reaction to a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Accepted,
    Declined,
}

impl ResponseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStatus::Accepted => "accepted",
            ResponseStatus::Declined => "declined",
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, ResponseStatus::Accepted)
    }
}

impl std::fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A donor's response appended to a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonorResponse {
    /// Responding donor's user id
    pub donor_id: String,

    /// Display name shown to the requester
    #[serde(default)]
    pub donor_name: Option<String>,

    pub status: ResponseStatus,

    /// Contact value shared on acceptance
    #[serde(default, alias = "contact")]
    pub contact_number: Option<String>,

    /// Set once the requester has been notified about this entry
    #[serde(default)]
    pub notification_sent: bool,

    /// Unix epoch milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responded_at: Option<u64>,
}

impl DonorResponse {
    pub fn new(
        donor_id: impl Into<String>,
        donor_name: impl Into<String>,
        status: ResponseStatus,
    ) -> Self {
        Self {
            donor_id: donor_id.into(),
            donor_name: Some(donor_name.into()),
            status,
            contact_number: None,
            notification_sent: false,
            responded_at: None,
        }
    }

    /// Builder-style contact value
    pub fn with_contact(mut self, contact: impl Into<String>) -> Self {
        self.contact_number = Some(contact.into());
        self
    }

    /// Identity used when diffing response lists
    pub fn identity(&self) -> (&str, ResponseStatus) {
        (self.donor_id.as_str(), self.status)
    }

    /// Display name with a neutral fallback
    pub fn display_name(&self) -> &str {
        non_blank(self.donor_name.as_deref()).unwrap_or("A donor")
    }

    /// Contact value if one was actually provided
    pub fn contact(&self) -> Option<&str> {
        non_blank(self.contact_number.as_deref())
    }
}

/// Urgent help request for a blood group at a location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BloodRequest {
    pub id: String,

    /// Required blood group, e.g. `B+`
    #[serde(alias = "category")]
    pub blood_group: String,

    /// City or area the request is for
    #[serde(alias = "locality")]
    pub location: String,

    /// User who created the request
    pub requester_id: String,

    #[serde(default)]
    pub requester_name: Option<String>,

    /// Free text or a value containing [`ASAP_SENTINEL`]
    #[serde(default)]
    pub required_time: Option<String>,

    #[serde(default)]
    pub purpose: Option<String>,

    /// Hospital or venue
    #[serde(default, alias = "venue")]
    pub hospital: Option<String>,

    #[serde(default, alias = "contact")]
    pub contact_number: Option<String>,

    #[serde(default)]
    pub responses: Vec<DonorResponse>,

    /// Users who have opened this request
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub seen_by: Vec<String>,
}

impl BloodRequest {
    pub fn new(
        id: impl Into<String>,
        blood_group: impl Into<String>,
        location: impl Into<String>,
        requester_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            blood_group: blood_group.into(),
            location: location.into(),
            requester_id: requester_id.into(),
            requester_name: None,
            required_time: None,
            purpose: None,
            hospital: None,
            contact_number: None,
            responses: Vec::new(),
            seen_by: Vec::new(),
        }
    }

    pub fn with_required_time(mut self, required_time: impl Into<String>) -> Self {
        self.required_time = Some(required_time.into());
        self
    }

    pub fn with_requester_name(mut self, name: impl Into<String>) -> Self {
        self.requester_name = Some(name.into());
        self
    }

    pub fn with_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = Some(purpose.into());
        self
    }

    /// Requester name with the "Someone" fallback
    pub fn requester_display_name(&self) -> &str {
        non_blank(self.requester_name.as_deref()).unwrap_or("Someone")
    }

    /// Non-blank required time
    pub fn required_time(&self) -> Option<&str> {
        non_blank(self.required_time.as_deref())
    }

    /// Whether the required time carries the ASAP marker
    pub fn is_asap(&self) -> bool {
        self.required_time()
            .map(|value| value.to_ascii_uppercase().contains(ASAP_SENTINEL))
            .unwrap_or(false)
    }

    pub fn purpose(&self) -> Option<&str> {
        non_blank(self.purpose.as_deref())
    }

    /// Responses present in `self` but not in `before`.
    ///
    /// Only evaluated when the response list grew. A response is new when its
    /// donor-id/status pair is absent from `before`; entries already flagged
    /// as notified are skipped so repeated diff evaluation never re-processes
    /// them.
    pub fn newly_appended_responses<'a>(&'a self, before: &BloodRequest) -> Vec<&'a DonorResponse> {
        if self.responses.len() <= before.responses.len() {
            return Vec::new();
        }

        let known: HashSet<(&str, ResponseStatus)> =
            before.responses.iter().map(DonorResponse::identity).collect();

        self.responses
            .iter()
            .filter(|response| !response.notification_sent)
            .filter(|response| !known.contains(&response.identity()))
            .collect()
    }

    /// Flag every response matching one of `identities` as notified.
    ///
    /// Returns the number of entries changed.
    pub fn mark_notified(&mut self, identities: &[(String, ResponseStatus)]) -> usize {
        let mut changed = 0;
        for response in self.responses.iter_mut() {
            let hit = identities
                .iter()
                .any(|(donor, status)| donor == &response.donor_id && *status == response.status);
            if hit && !response.notification_sent {
                response.notification_sent = true;
                changed += 1;
            }
        }
        changed
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with(responses: Vec<DonorResponse>) -> BloodRequest {
        let mut request = BloodRequest::new("req-1", "B+", "Kumbakonam", "requester-1");
        request.responses = responses;
        request
    }

    #[test]
    fn test_deserialize_app_document() {
        let json = serde_json::json!({
            "id": "req-1",
            "bloodGroup": "O-",
            "location": "Chennai",
            "requesterId": "u-1",
            "requesterName": "Priya",
            "requiredTime": "ASAP",
            "responses": [
                {
                    "donorId": "d-1",
                    "donorName": "Arun",
                    "status": "accepted",
                    "contactNumber": "98400"
                }
            ]
        });

        let request: BloodRequest = serde_json::from_value(json).unwrap();
        assert_eq!(request.blood_group, "O-");
        assert!(request.is_asap());
        assert_eq!(request.responses.len(), 1);
        assert_eq!(request.responses[0].status, ResponseStatus::Accepted);
        assert!(!request.responses[0].notification_sent);
    }

    #[test]
    fn test_asap_detection() {
        let base = BloodRequest::new("r", "A+", "Salem", "u");
        assert!(base.clone().with_required_time("ASAP-today").is_asap());
        assert!(base.clone().with_required_time("asap please").is_asap());
        assert!(!base.clone().with_required_time("2025-01-01 10:00").is_asap());
        assert!(!base.with_required_time("   ").is_asap());
    }

    #[test]
    fn test_display_fallbacks() {
        let request = BloodRequest::new("r", "A+", "Salem", "u").with_requester_name("  ");
        assert_eq!(request.requester_display_name(), "Someone");

        let mut response = DonorResponse::new("d", "", ResponseStatus::Declined);
        response.donor_name = None;
        assert_eq!(response.display_name(), "A donor");
        assert!(response.contact().is_none());
    }

    #[test]
    fn test_newly_appended_responses() {
        let before = request_with(vec![DonorResponse::new("a", "A", ResponseStatus::Accepted)]);
        let after = request_with(vec![
            DonorResponse::new("a", "A", ResponseStatus::Accepted),
            DonorResponse::new("b", "B", ResponseStatus::Declined),
        ]);

        let new = after.newly_appended_responses(&before);
        assert_eq!(new.len(), 1);
        assert_eq!(new[0].donor_id, "b");
    }

    #[test]
    fn test_status_change_counts_as_new_pair() {
        let before = request_with(vec![DonorResponse::new("a", "A", ResponseStatus::Declined)]);
        let after = request_with(vec![
            DonorResponse::new("a", "A", ResponseStatus::Declined),
            DonorResponse::new("a", "A", ResponseStatus::Accepted),
        ]);

        let new = after.newly_appended_responses(&before);
        assert_eq!(new.len(), 1);
        assert_eq!(new[0].status, ResponseStatus::Accepted);
    }

    #[test]
    fn test_no_growth_yields_nothing() {
        let before = request_with(vec![DonorResponse::new("a", "A", ResponseStatus::Accepted)]);
        let after = request_with(vec![DonorResponse::new("b", "B", ResponseStatus::Accepted)]);
        assert!(after.newly_appended_responses(&before).is_empty());
    }

    #[test]
    fn test_already_notified_entries_skipped() {
        let before = request_with(vec![]);
        let mut notified = DonorResponse::new("a", "A", ResponseStatus::Accepted);
        notified.notification_sent = true;
        let after = request_with(vec![notified]);
        assert!(after.newly_appended_responses(&before).is_empty());
    }

    #[test]
    fn test_mark_notified() {
        let mut request = request_with(vec![
            DonorResponse::new("a", "A", ResponseStatus::Accepted),
            DonorResponse::new("b", "B", ResponseStatus::Declined),
        ]);

        let changed = request.mark_notified(&[("b".to_string(), ResponseStatus::Declined)]);
        assert_eq!(changed, 1);
        assert!(!request.responses[0].notification_sent);
        assert!(request.responses[1].notification_sent);

        // Second pass is a no-op
        assert_eq!(request.mark_notified(&[("b".to_string(), ResponseStatus::Declined)]), 0);
    }
}
