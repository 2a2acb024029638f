//! Entry requests: a newcomer's application to join a guild, decided by
//! moderator votes or by a moderator directly.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::info;
use warden_store::{Metadata, Model};

use crate::error::{ModelError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntryStatus {
    #[default]
    Pending,
    Accepted,
    Rejected,
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Verdict {
    Accept,
    Reject,
}

/// Vote counts on one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tally {
    pub accept: usize,
    pub reject: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryRequest {
    pub guild_id: String,
    pub author_id: String,
    #[serde(default)]
    pub answers: Vec<String>,
    /// Voter id to verdict; one vote per voter.
    #[serde(default)]
    pub votes: BTreeMap<String, Verdict>,
    #[serde(default)]
    pub status: EntryStatus,
    pub created_at: i64,
    #[serde(default)]
    pub resolved_by: Option<String>,
    #[serde(default)]
    pub resolved_at: Option<i64>,
    #[serde(skip)]
    pub metadata: Metadata,
}

impl EntryRequest {
    pub fn new(
        guild_id: impl Into<String>,
        author_id: impl Into<String>,
        answers: Vec<String>,
        created_at: i64,
    ) -> Self {
        Self {
            guild_id: guild_id.into(),
            author_id: author_id.into(),
            answers,
            votes: BTreeMap::new(),
            status: EntryStatus::Pending,
            created_at,
            resolved_by: None,
            resolved_at: None,
            metadata: Metadata::default(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == EntryStatus::Pending
    }

    fn ensure_pending(&self) -> Result<()> {
        if self.is_pending() {
            Ok(())
        } else {
            Err(ModelError::EntryResolved {
                author_id: self.author_id.clone(),
                status: self.status,
            })
        }
    }

    /// Cast or replace `voter_id`'s vote.
    pub fn vote(&mut self, voter_id: impl Into<String>, verdict: Verdict) -> Result<()> {
        self.ensure_pending()?;
        self.votes.insert(voter_id.into(), verdict);
        Ok(())
    }

    /// Returns `true` if the voter had voted.
    pub fn retract_vote(&mut self, voter_id: &str) -> Result<bool> {
        self.ensure_pending()?;
        Ok(self.votes.remove(voter_id).is_some())
    }

    pub fn tally(&self) -> Tally {
        self.votes.values().fold(Tally::default(), |mut tally, verdict| {
            match verdict {
                Verdict::Accept => tally.accept += 1,
                Verdict::Reject => tally.reject += 1,
            }
            tally
        })
    }

    /// The outcome the votes call for once one side reaches `required`.
    /// Both sides reaching it at once is left to a moderator.
    pub fn decision(&self, required: usize) -> Option<EntryStatus> {
        let required = required.max(1);
        let tally = self.tally();
        match (tally.accept >= required, tally.reject >= required) {
            (true, false) => Some(EntryStatus::Accepted),
            (false, true) => Some(EntryStatus::Rejected),
            _ => None,
        }
    }

    /// Resolve the request by moderator decision.
    pub fn resolve(&mut self, status: EntryStatus, moderator_id: Option<&str>, at: i64) -> Result<()> {
        self.ensure_pending()?;
        if status == EntryStatus::Pending {
            return Err(ModelError::InvalidResolution { status });
        }

        self.status = status;
        self.resolved_by = moderator_id.map(str::to_string);
        self.resolved_at = Some(at);
        info!(guild_id = %self.guild_id, author_id = %self.author_id, %status, "entry request resolved");
        Ok(())
    }

    /// Resolve from the votes if they are decisive. Returns the new status.
    pub fn apply_votes(&mut self, required: usize, at: i64) -> Result<Option<EntryStatus>> {
        self.ensure_pending()?;
        let Some(status) = self.decision(required) else {
            return Ok(None);
        };
        self.resolve(status, None, at)?;
        Ok(Some(status))
    }
}

impl Model for EntryRequest {
    const COLLECTION: &'static str = "EntryRequests";
    const ID_FIELDS: &'static [&'static str] = &["guildId", "authorId"];
    const PREFETCH: bool = true;

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
