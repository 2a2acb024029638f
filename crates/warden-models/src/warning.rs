//! Moderator warnings issued against a member.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use warden_store::{DatabaseStore, Metadata, Model, StoreResult, Timestamped};

use crate::time;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Warning {
    pub guild_id: String,
    /// The moderator who issued it.
    pub author_id: String,
    pub target_id: String,
    pub created_at: i64,
    pub reason: String,
    /// Unix milliseconds after which the warning no longer counts. `None`
    /// never expires.
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(skip)]
    pub metadata: Metadata,
}

impl Warning {
    pub fn new(
        guild_id: impl Into<String>,
        author_id: impl Into<String>,
        target_id: impl Into<String>,
        reason: impl Into<String>,
        created_at: i64,
    ) -> Self {
        Self {
            guild_id: guild_id.into(),
            author_id: author_id.into(),
            target_id: target_id.into(),
            created_at,
            reason: reason.into(),
            expires_at: None,
            metadata: Metadata::default(),
        }
    }

    /// Expire `lifetime` after creation.
    pub fn expiring_after(mut self, lifetime: Duration) -> Self {
        let millis = i64::try_from(lifetime.as_millis()).unwrap_or(i64::MAX);
        self.expires_at = Some(self.created_at.saturating_add(millis));
        self
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .is_none_or(|expires_at| now.timestamp_millis() < expires_at)
    }

    /// Warnings still in force at `now`, newest first.
    pub fn active_at(warnings: &[Warning], now: DateTime<Utc>) -> Vec<&Warning> {
        let mut active: Vec<&Warning> = warnings.iter().filter(|w| w.is_active_at(now)).collect();
        active.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        active
    }

    /// Every warning `target_id` received in `guild_id`, expired or not.
    pub async fn for_target(
        db: &DatabaseStore,
        guild_id: &str,
        target_id: &str,
    ) -> StoreResult<Vec<Warning>> {
        let query = Self::query()
            .where_equals("guildId", guild_id)
            .where_equals("targetId", target_id);
        Self::all(db, query).await
    }
}

impl Timestamped for Warning {
    fn created_at(&self) -> DateTime<Utc> {
        time::from_millis(self.created_at)
    }
}

impl Model for Warning {
    const COLLECTION: &'static str = "Warnings";
    const ID_FIELDS: &'static [&'static str] = &["guildId", "authorId", "targetId", "createdAt"];
    const PREFETCH: bool = true;

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    #[test]
    fn id_includes_creation_time() {
        let warning = Warning::new("1", "2", "3", "spam", 1_700_000_000_000);
        assert_eq!(warning.id().unwrap(), "warnings/1/2/3/1700000000000");
    }

    #[test]
    fn expiry_bounds_activity() {
        let warning = Warning::new("1", "2", "3", "spam", 0).expiring_after(DAY);
        assert!(warning.is_active_at(time::from_millis(0)));
        assert!(warning.is_active_at(time::from_millis(86_399_999)));
        assert!(!warning.is_active_at(time::from_millis(86_400_000)));

        let permanent = Warning::new("1", "2", "3", "spam", 0);
        assert!(permanent.is_active_at(time::from_millis(i64::MAX / 2)));
    }

    #[test]
    fn active_filters_and_orders() {
        let now = time::from_millis(10 * 86_400_000);
        let warnings = vec![
            Warning::new("1", "2", "3", "old", 0).expiring_after(DAY),
            Warning::new("1", "2", "3", "recent", 9 * 86_400_000).expiring_after(DAY * 7),
            Warning::new("1", "2", "3", "forever", 86_400_000),
        ];

        let active: Vec<&str> = Warning::active_at(&warnings, now)
            .into_iter()
            .map(|w| w.reason.as_str())
            .collect();
        assert_eq!(active, ["recent", "forever"]);
    }
}
