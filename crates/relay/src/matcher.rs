//! Donor matching
//!
//! Eligible recipients are resolved by an ordered list of lookup tiers. Each
//! tier asks the store for a coarse attribute match and then narrows the
//! result in-process, which keeps the store free of composite indexes. The
//! first tier that yields anyone wins.
//!
//! An empty result is a normal outcome, not an error. Store failures are
//! logged and treated as "this tier found nobody".

use lifeline_core::CollectionConfig;
use lifeline_domain::RecipientProfile;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::store::{Document, Filter, RecordStore};

/// What a lookup is matching against
#[derive(Debug, Clone, Copy)]
pub struct MatchContext<'a> {
    /// Required blood group
    pub blood_group: &'a str,
    /// Request location
    pub location: &'a str,
    /// User who triggered the lookup; never matched
    pub acting_user: Option<&'a str>,
    /// Role excluded from general-profile matches
    pub admin_role: &'a str,
}

/// One lookup strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchTier {
    /// Dedicated donor collection, available donors only
    Responders {
        /// Collection name
        collection: String,
    },
    /// General user profiles, administrators excluded
    GeneralProfiles {
        /// Collection name
        collection: String,
    },
}

impl MatchTier {
    /// Standard two-tier order for the given collection layout
    pub fn standard(collections: &CollectionConfig) -> Vec<MatchTier> {
        vec![
            MatchTier::Responders {
                collection: collections.responders.clone(),
            },
            MatchTier::GeneralProfiles {
                collection: collections.profiles.clone(),
            },
        ]
    }

    /// Collection this tier reads
    pub fn collection(&self) -> &str {
        match self {
            MatchTier::Responders { collection } | MatchTier::GeneralProfiles { collection } => {
                collection
            }
        }
    }

    /// Store-side filters
    pub fn filters(&self, ctx: &MatchContext<'_>) -> Vec<Filter> {
        let by_group = Filter::eq("bloodGroup", ctx.blood_group);
        match self {
            MatchTier::Responders { .. } => vec![by_group, Filter::eq("isAvailable", true)],
            MatchTier::GeneralProfiles { .. } => vec![by_group],
        }
    }

    /// In-process eligibility check
    pub fn is_eligible(&self, profile: &RecipientProfile, ctx: &MatchContext<'_>) -> bool {
        let common = profile.is_in(ctx.location)
            && profile.has_token()
            && ctx.acting_user != Some(profile.id.as_str());

        match self {
            MatchTier::Responders { .. } => common,
            MatchTier::GeneralProfiles { .. } => common && !profile.has_role(ctx.admin_role),
        }
    }

    fn select(&self, docs: &[Document], ctx: &MatchContext<'_>) -> Vec<RecipientProfile> {
        let mut seen_tokens = HashSet::new();
        docs.iter()
            .filter_map(|doc| match RecipientProfile::from_document(&doc.id, &doc.data) {
                Ok(profile) => Some(profile),
                Err(e) => {
                    debug!(
                        collection = self.collection(),
                        error = %e,
                        "Skipping undecodable profile"
                    );
                    None
                }
            })
            .filter(|profile| self.is_eligible(profile, ctx))
            // Two documents for the same device would double-notify it.
            .filter(|profile| seen_tokens.insert(profile.token().unwrap_or_default().to_string()))
            .collect()
    }
}

/// Resolves eligible recipients for a request
pub struct MatchFinder {
    store: Arc<dyn RecordStore>,
    tiers: Vec<MatchTier>,
    admin_role: String,
}

impl MatchFinder {
    /// Create a finder over `tiers`, tried in order
    pub fn new(
        store: Arc<dyn RecordStore>,
        tiers: Vec<MatchTier>,
        admin_role: impl Into<String>,
    ) -> Self {
        Self {
            store,
            tiers,
            admin_role: admin_role.into(),
        }
    }

    /// Eligible recipients for `blood_group` in `location`, excluding `acting_user`
    pub async fn find(
        &self,
        blood_group: &str,
        location: &str,
        acting_user: Option<&str>,
    ) -> Vec<RecipientProfile> {
        let ctx = MatchContext {
            blood_group,
            location,
            acting_user,
            admin_role: &self.admin_role,
        };

        for tier in &self.tiers {
            let docs = match self.store.query(tier.collection(), &tier.filters(&ctx)).await {
                Ok(docs) => docs,
                Err(e) => {
                    warn!(
                        collection = tier.collection(),
                        error = %e,
                        "Recipient lookup failed; trying next tier"
                    );
                    continue;
                }
            };

            let matches = tier.select(&docs, &ctx);
            debug!(
                collection = tier.collection(),
                candidates = docs.len(),
                eligible = matches.len(),
                "Evaluated match tier"
            );
            if !matches.is_empty() {
                info!(
                    blood_group,
                    location,
                    collection = tier.collection(),
                    count = matches.len(),
                    "Found eligible recipients"
                );
                return matches;
            }
        }

        info!(blood_group, location, "No eligible recipients");
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryRecordStore;
    use serde_json::json;

    const TOKEN: &str = "ExponentPushToken[t]";

    fn finder(store: Arc<InMemoryRecordStore>) -> MatchFinder {
        MatchFinder::new(store, MatchTier::standard(&CollectionConfig::default()), "admin")
    }

    fn donor(
        store: &InMemoryRecordStore,
        id: &str,
        group: &str,
        city: &str,
        available: bool,
        token: Option<&str>,
    ) {
        store.insert(
            "donors",
            id,
            json!({
                "bloodGroup": group,
                "location": city,
                "isAvailable": available,
                "pushToken": token,
            }),
        );
    }

    #[tokio::test]
    async fn test_primary_tier_filters_in_process() {
        let store = Arc::new(InMemoryRecordStore::new());
        donor(&store, "d1", "B+", "Kumbakonam", true, Some("ExponentPushToken[1]"));
        donor(&store, "d2", "B+", "Chennai", true, Some("ExponentPushToken[2]"));
        donor(&store, "d3", "B+", "Kumbakonam", false, Some("ExponentPushToken[3]"));
        donor(&store, "d4", "B+", "Kumbakonam", true, None);
        donor(&store, "d5", "O+", "Kumbakonam", true, Some("ExponentPushToken[5]"));
        donor(&store, "me", "B+", "Kumbakonam", true, Some("ExponentPushToken[6]"));

        let found = finder(store).find("B+", "Kumbakonam", Some("me")).await;
        let ids: Vec<&str> = found.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["d1"]);
    }

    #[tokio::test]
    async fn test_falls_back_to_general_profiles() {
        let store = Arc::new(InMemoryRecordStore::new());
        donor(&store, "d1", "B+", "Chennai", true, Some(TOKEN));
        let user = |token: &str| {
            json!({ "bloodGroup": "B+", "city": "Kumbakonam", "pushToken": token })
        };
        store.insert("users", "u1", user("ExponentPushToken[u1]"));
        let mut admin = user("ExponentPushToken[a]");
        admin["role"] = json!("admin");
        store.insert("users", "admin", admin);
        store.insert("users", "me", user("ExponentPushToken[me]"));

        let found = finder(store).find("B+", "Kumbakonam", Some("me")).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "u1");
    }

    #[tokio::test]
    async fn test_no_match_is_empty_not_error() {
        let store = Arc::new(InMemoryRecordStore::new());
        assert!(finder(store).find("AB-", "Nowhere", None).await.is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_yields_empty() {
        let store = Arc::new(InMemoryRecordStore::new());
        donor(&store, "d1", "B+", "Kumbakonam", true, Some(TOKEN));
        store.set_offline(true);
        assert!(finder(store).find("B+", "Kumbakonam", None).await.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_tokens_collapsed() {
        let store = Arc::new(InMemoryRecordStore::new());
        donor(&store, "d1", "B+", "Kumbakonam", true, Some(TOKEN));
        donor(&store, "d2", "B+", "Kumbakonam", true, Some(TOKEN));

        assert_eq!(finder(store).find("B+", "Kumbakonam", None).await.len(), 1);
    }

    #[test]
    fn test_tier_filters() {
        let tiers = MatchTier::standard(&CollectionConfig::default());
        let ctx = MatchContext {
            blood_group: "A+",
            location: "Kumbakonam",
            acting_user: None,
            admin_role: "admin",
        };
        assert_eq!(
            tiers[0].filters(&ctx),
            vec![Filter::eq("bloodGroup", "A+"), Filter::eq("isAvailable", true)]
        );
        assert_eq!(tiers[1].filters(&ctx), vec![Filter::eq("bloodGroup", "A+")]);
        assert_eq!(tiers[1].collection(), "users");
    }
}
