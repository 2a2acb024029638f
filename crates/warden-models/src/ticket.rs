use serde::{Deserialize, Serialize};
use warden_store::{DatabaseStore, Metadata, Model, StoreResult};

/// A private support channel opened by a member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub guild_id: String,
    pub author_id: String,
    pub channel_id: String,
    pub topic: String,
    pub created_at: i64,
    #[serde(default)]
    pub closed_at: Option<i64>,
    #[serde(default)]
    pub closed_by: Option<String>,
    #[serde(skip)]
    pub metadata: Metadata,
}

impl Ticket {
    pub fn new(
        guild_id: impl Into<String>,
        author_id: impl Into<String>,
        channel_id: impl Into<String>,
        topic: impl Into<String>,
        created_at: i64,
    ) -> Self {
        Self {
            guild_id: guild_id.into(),
            author_id: author_id.into(),
            channel_id: channel_id.into(),
            topic: topic.into(),
            created_at,
            closed_at: None,
            closed_by: None,
            metadata: Metadata::default(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.closed_at.is_none()
    }

    /// Returns `false` if the ticket was already closed.
    pub fn close(&mut self, closed_by: impl Into<String>, at: i64) -> bool {
        if !self.is_open() {
            return false;
        }
        self.closed_at = Some(at);
        self.closed_by = Some(closed_by.into());
        true
    }

    /// The author's tickets in `guild_id` that are still open.
    pub async fn open_for_author(
        db: &DatabaseStore,
        guild_id: &str,
        author_id: &str,
    ) -> StoreResult<Vec<Ticket>> {
        let query = Self::query()
            .where_equals("guildId", guild_id)
            .where_equals("authorId", author_id);
        let tickets = Self::all(db, query).await?;
        Ok(tickets.into_iter().filter(Ticket::is_open).collect())
    }
}

impl Model for Ticket {
    const COLLECTION: &'static str = "Tickets";
    const ID_FIELDS: &'static [&'static str] = &["guildId", "authorId", "channelId"];
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
    fn close_is_one_way() {
        let mut ticket = Ticket::new("1", "2", "3", "appeal", 0);
        assert!(ticket.is_open());
        assert!(ticket.close("9", 50));
        assert!(!ticket.close("8", 60));
        assert_eq!(ticket.closed_by.as_deref(), Some("9"));
        assert_eq!(ticket.closed_at, Some(50));
    }

    #[test]
    fn id_orders_channel_last() {
        let ticket = Ticket::new("1", "2", "3", "appeal", 0);
        assert_eq!(ticket.partial_id().unwrap(), "1/2/3");
    }
}
