use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use warden_store::{DatabaseStore, Metadata, Model, RateLimit, Timestamped, WriteOutcome};

use crate::error::{ModelError, Result};
use crate::limits::Limited;
use crate::time;

/// Public thanks from one member to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Praise {
    pub guild_id: String,
    pub author_id: String,
    pub target_id: String,
    pub created_at: i64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(skip)]
    pub metadata: Metadata,
}

impl Praise {
    pub fn new(
        guild_id: impl Into<String>,
        author_id: impl Into<String>,
        target_id: impl Into<String>,
        created_at: i64,
    ) -> Self {
        Self {
            guild_id: guild_id.into(),
            author_id: author_id.into(),
            target_id: target_id.into(),
            created_at,
            message: None,
            metadata: Metadata::default(),
        }
    }

    /// Submit, refusing self-praise before the rate limit is consulted.
    pub async fn give(&mut self, db: &DatabaseStore) -> Result<WriteOutcome> {
        if self.author_id == self.target_id {
            return Err(ModelError::SelfTarget { kind: Self::KIND });
        }
        self.submit(db).await
    }
}

impl Timestamped for Praise {
    fn created_at(&self) -> DateTime<Utc> {
        time::from_millis(self.created_at)
    }
}

impl Limited for Praise {
    const KIND: &'static str = "praises";
    const RATE_LIMIT: RateLimit = RateLimit::new(5, Duration::from_secs(24 * 60 * 60));

    fn guild_id(&self) -> &str {
        &self.guild_id
    }

    fn author_id(&self) -> &str {
        &self.author_id
    }
}

impl Model for Praise {
    const COLLECTION: &'static str = "Praises";
    const ID_FIELDS: &'static [&'static str] = &["guildId", "authorId", "targetId", "createdAt"];

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
