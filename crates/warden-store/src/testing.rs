//! Small models shared by the unit tests.

use serde::{Deserialize, Serialize};

use crate::document::Metadata;
use crate::model::Model;
use crate::registry::CollectionRegistry;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub guild_id: String,
    pub author_id: String,
    pub text: String,
    #[serde(skip)]
    pub metadata: Metadata,
}

impl Note {
    pub fn new(guild_id: &str, author_id: &str, text: &str) -> Self {
        Self {
            guild_id: guild_id.into(),
            author_id: author_id.into(),
            text: text.into(),
            metadata: Metadata::default(),
        }
    }
}

impl Model for Note {
    const COLLECTION: &'static str = "Notes";
    const ID_FIELDS: &'static [&'static str] = &["guildId", "authorId"];
    const PREFETCH: bool = true;

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub guild_id: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(skip)]
    pub metadata: Metadata,
}

impl Settings {
    pub fn new(guild_id: &str) -> Self {
        Self {
            guild_id: guild_id.into(),
            language: None,
            metadata: Metadata::default(),
        }
    }
}

impl Model for Settings {
    const COLLECTION: &'static str = "Settings";
    const ID_FIELDS: &'static [&'static str] = &["guildId"];

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

pub fn registry() -> CollectionRegistry {
    CollectionRegistry::builder()
        .register::<Note>()
        .and_then(|builder| builder.register::<Settings>())
        .map(|builder| builder.build())
        .unwrap_or_else(|e| panic!("test registry: {e}"))
}
