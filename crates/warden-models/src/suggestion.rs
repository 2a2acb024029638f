use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use warden_store::{Metadata, Model, RateLimit, Timestamped};

use crate::limits::Limited;
use crate::time;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SuggestionStatus {
    #[default]
    Open,
    Approved,
    Denied,
}

/// A member's suggestion, posted for the guild to vote on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub guild_id: String,
    pub author_id: String,
    pub created_at: i64,
    pub text: String,
    #[serde(default)]
    pub status: SuggestionStatus,
    /// The posted message carrying the vote reactions.
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(skip)]
    pub metadata: Metadata,
}

impl Suggestion {
    pub fn new(
        guild_id: impl Into<String>,
        author_id: impl Into<String>,
        text: impl Into<String>,
        created_at: i64,
    ) -> Self {
        Self {
            guild_id: guild_id.into(),
            author_id: author_id.into(),
            created_at,
            text: text.into(),
            status: SuggestionStatus::Open,
            message_id: None,
            metadata: Metadata::default(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == SuggestionStatus::Open
    }

    /// Close with `approved`. Returns `false` if already closed.
    pub fn decide(&mut self, approved: bool) -> bool {
        if !self.is_open() {
            return false;
        }
        self.status = if approved {
            SuggestionStatus::Approved
        } else {
            SuggestionStatus::Denied
        };
        true
    }
}

impl Timestamped for Suggestion {
    fn created_at(&self) -> DateTime<Utc> {
        time::from_millis(self.created_at)
    }
}

impl Limited for Suggestion {
    const KIND: &'static str = "suggestions";
    const RATE_LIMIT: RateLimit = RateLimit::new(2, Duration::from_secs(60 * 60));

    fn guild_id(&self) -> &str {
        &self.guild_id
    }

    fn author_id(&self) -> &str {
        &self.author_id
    }
}

impl Model for Suggestion {
    const COLLECTION: &'static str = "Suggestions";
    const ID_FIELDS: &'static [&'static str] = &["guildId", "authorId", "createdAt"];
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

    #[test]
    fn decided_only_once() {
        let mut suggestion = Suggestion::new("1", "2", "more emoji", 0);
        assert!(suggestion.decide(true));
        assert_eq!(suggestion.status, SuggestionStatus::Approved);
        assert!(!suggestion.decide(false));
        assert_eq!(suggestion.status, SuggestionStatus::Approved);
    }
}
