use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use warden_store::{Metadata, Model, RateLimit, Timestamped};

use crate::limits::Limited;
use crate::time;

/// A member's report about another member, for moderators to review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub guild_id: String,
    pub author_id: String,
    pub created_at: i64,
    pub target_id: String,
    pub reason: String,
    #[serde(default)]
    pub message_link: Option<String>,
    #[serde(default)]
    pub handled_by: Option<String>,
    #[serde(skip)]
    pub metadata: Metadata,
}

impl Report {
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
            created_at,
            target_id: target_id.into(),
            reason: reason.into(),
            message_link: None,
            handled_by: None,
            metadata: Metadata::default(),
        }
    }

    pub fn is_handled(&self) -> bool {
        self.handled_by.is_some()
    }

    pub fn mark_handled(&mut self, moderator_id: impl Into<String>) {
        self.handled_by = Some(moderator_id.into());
    }
}

impl Timestamped for Report {
    fn created_at(&self) -> DateTime<Utc> {
        time::from_millis(self.created_at)
    }
}

impl Limited for Report {
    const KIND: &'static str = "reports";
    const RATE_LIMIT: RateLimit = RateLimit::new(3, Duration::from_secs(60 * 60));

    fn guild_id(&self) -> &str {
        &self.guild_id
    }

    fn author_id(&self) -> &str {
        &self.author_id
    }
}

impl Model for Report {
    const COLLECTION: &'static str = "Reports";
    const ID_FIELDS: &'static [&'static str] = &["guildId", "authorId", "createdAt"];
    const PREFETCH: bool = true;

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
