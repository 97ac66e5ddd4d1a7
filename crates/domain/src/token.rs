//! Delivery token validation
//!
//! Tokens are checked for the gateway's expected shape before any send so
//! malformed values never reach the remote service.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, Result};

/// Validated device token for remote push delivery
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeliveryToken(String);

impl DeliveryToken {
    /// Accept `raw` when it is `<prefix><body>]` for one of `prefixes`,
    /// where each prefix ends with `[` and the body is non-empty.
    pub fn parse(raw: &str, prefixes: &[String]) -> Result<Self> {
        let token = raw.trim();

        let body = prefixes
            .iter()
            .find_map(|prefix| token.strip_prefix(prefix.as_str()))
            .and_then(|rest| rest.strip_suffix(']'))
            .ok_or_else(|| DomainError::MalformedToken(redact(token)))?;

        if body.is_empty() || body.contains(|c: char| c.is_whitespace() || c == '[' || c == ']') {
            return Err(DomainError::MalformedToken(redact(token)));
        }

        Ok(Self(token.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeliveryToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Keep log lines from carrying whole tokens
fn redact(token: &str) -> String {
    let prefix: String = token.chars().take(24).collect();
    if prefix.len() < token.len() {
        format!("{}...", prefix)
    } else {
        prefix
    }
}
