use serde::{Deserialize, Serialize};
use warden_store::{Metadata, Model};

use crate::time;

/// Per-user preferences, shared across guilds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub user_id: String,
    #[serde(default)]
    pub language: Option<String>,
    /// Whether the user accepts direct messages from the bot.
    #[serde(default = "default_direct_messages")]
    pub direct_messages: bool,
    pub created_at: i64,
    #[serde(skip)]
    pub metadata: Metadata,
}

fn default_direct_messages() -> bool {
    true
}

impl User {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            language: None,
            direct_messages: default_direct_messages(),
            created_at: time::now_millis(),
            metadata: Metadata::default(),
        }
    }

    /// The user's language, else the guild's, else English.
    pub fn language_or<'a>(&'a self, guild_language: Option<&'a str>) -> &'a str {
        self.language.as_deref().or(guild_language).unwrap_or("en")
    }
}

impl Model for User {
    const COLLECTION: &'static str = "Users";
    const ID_FIELDS: &'static [&'static str] = &["userId"];

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
    fn language_falls_back_in_order() {
        let mut user = User::new("1");
        assert_eq!(user.language_or(None), "en");
        assert_eq!(user.language_or(Some("de")), "de");

        user.language = Some("fr".into());
        assert_eq!(user.language_or(Some("de")), "fr");
    }

    #[test]
    fn id_uses_user_key() {
        assert_eq!(User::new("77").id().unwrap(), "users/77");
    }
}
