//! Recipient profiles
//!
//! Profiles are looked up, never created, by the relay. The same shape covers
//! the dedicated donor collection and the general user collection; fields a
//! collection does not carry are simply absent.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipientProfile {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub blood_group: Option<String>,

    #[serde(default, alias = "city")]
    pub location: Option<String>,

    /// Raw device token; validated only at send time
    #[serde(default, alias = "expoPushToken")]
    pub push_token: Option<String>,

    /// Donor availability flag
    #[serde(default)]
    pub is_available: Option<bool>,

    #[serde(default)]
    pub role: Option<String>,
}

impl RecipientProfile {
    /// Decode a stored document, taking the id from the store rather than the body.
    pub fn from_document(id: &str, data: &serde_json::Value) -> Result<Self> {
        let mut profile: RecipientProfile = serde_json::from_value(data.clone())
            .map_err(|e| DomainError::DecodeError(format!("profile {}: {}", id, e)))?;
        profile.id = id.to_string();
        Ok(profile)
    }

    /// Token if present and non-blank
    pub fn token(&self) -> Option<&str> {
        self.push_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }

    pub fn has_token(&self) -> bool {
        self.token().is_some()
    }

    pub fn is_in(&self, locality: &str) -> bool {
        self.location
            .as_deref()
            .map(|location| same_locality(location, locality))
            .unwrap_or(false)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.role
            .as_deref()
            .map(|r| r.trim().eq_ignore_ascii_case(role))
            .unwrap_or(false)
    }
}

/// Locality comparison used for in-process filtering
pub fn same_locality(a: &str, b: &str) -> bool {
    let (a, b) = (a.trim(), b.trim());
    !a.is_empty() && a.eq_ignore_ascii_case(b)
}
