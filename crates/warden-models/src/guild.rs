//! Per-guild configuration: which features are switched on and where they
//! post.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use warden_store::{Metadata, Model};

/// A bot feature a guild can toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Feature {
    Entry,
    Warnings,
    Reports,
    Suggestions,
    Praise,
    Tickets,
}

impl Feature {
    pub const ALL: [Feature; 6] = [
        Self::Entry,
        Self::Warnings,
        Self::Reports,
        Self::Suggestions,
        Self::Praise,
        Self::Tickets,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Entry => "entry",
            Self::Warnings => "warnings",
            Self::Reports => "reports",
            Self::Suggestions => "suggestions",
            Self::Praise => "praise",
            Self::Tickets => "tickets",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Guild {
    pub guild_id: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub features: BTreeSet<Feature>,
    /// Channel each feature posts into, when it has one.
    #[serde(default)]
    pub channels: BTreeMap<Feature, String>,
    #[serde(default)]
    pub moderator_role_ids: Vec<String>,
    /// Votes needed to accept or reject an entry request.
    #[serde(default = "default_entry_votes")]
    pub entry_votes_required: usize,
    #[serde(skip)]
    pub metadata: Metadata,
}

fn default_entry_votes() -> usize {
    3
}

impl Guild {
    /// A guild with every feature off.
    pub fn new(guild_id: impl Into<String>) -> Self {
        Self {
            guild_id: guild_id.into(),
            language: None,
            features: BTreeSet::new(),
            channels: BTreeMap::new(),
            moderator_role_ids: Vec::new(),
            entry_votes_required: default_entry_votes(),
            metadata: Metadata::default(),
        }
    }

    pub fn is_enabled(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }

    /// Returns `true` if the feature was off.
    pub fn enable(&mut self, feature: Feature) -> bool {
        self.features.insert(feature)
    }

    /// Returns `true` if the feature was on. The feature's channel is kept
    /// so re-enabling restores it.
    pub fn disable(&mut self, feature: Feature) -> bool {
        self.features.remove(&feature)
    }

    pub fn set_channel(&mut self, feature: Feature, channel_id: impl Into<String>) {
        self.channels.insert(feature, channel_id.into());
    }

    /// The channel of an enabled feature.
    pub fn channel(&self, feature: Feature) -> Option<&str> {
        if !self.is_enabled(feature) {
            return None;
        }
        self.channels.get(&feature).map(String::as_str)
    }

    pub fn is_moderator_role(&self, role_id: &str) -> bool {
        self.moderator_role_ids.iter().any(|id| id == role_id)
    }
}

impl Model for Guild {
    const COLLECTION: &'static str = "Guilds";
    const ID_FIELDS: &'static [&'static str] = &["guildId"];
    const PREFETCH: bool = true;

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
