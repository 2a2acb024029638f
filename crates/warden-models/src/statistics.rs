//! Running per-guild activity counters.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;
use warden_store::{DatabaseStore, Metadata, Model, StoreResult, WriteOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Counter {
    WarningsIssued,
    ReportsSubmitted,
    SuggestionsMade,
    PraisesGiven,
    EntriesAccepted,
    EntriesRejected,
    TicketsOpened,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuildStatistics {
    pub guild_id: String,
    #[serde(default)]
    pub counters: BTreeMap<Counter, u64>,
    #[serde(skip)]
    pub metadata: Metadata,
}

impl GuildStatistics {
    pub fn new(guild_id: impl Into<String>) -> Self {
        Self {
            guild_id: guild_id.into(),
            counters: BTreeMap::new(),
            metadata: Metadata::default(),
        }
    }

    pub fn count(&self, counter: Counter) -> u64 {
        self.counters.get(&counter).copied().unwrap_or(0)
    }

    pub fn add(&mut self, counter: Counter, amount: u64) {
        let value = self.counters.entry(counter).or_insert(0);
        *value = value.saturating_add(amount);
    }

    pub fn increment(&mut self, counter: Counter) {
        self.add(counter, 1);
    }

    pub fn total(&self) -> u64 {
        self.counters.values().fold(0, |sum, &n| sum.saturating_add(n))
    }

    /// Bump `counter` for `guild_id`, creating the statistics document on
    /// first use.
    pub async fn record(
        db: &DatabaseStore,
        guild_id: &str,
        counter: Counter,
    ) -> StoreResult<WriteOutcome> {
        let mut stats = Self::get_or_create(db, &[("guildId", guild_id)], || Self::new(guild_id)).await?;
        let outcome = stats.update(db, |s| s.increment(counter)).await?;
        debug!(guild_id, ?counter, value = stats.count(counter), ?outcome, "statistic recorded");
        Ok(outcome)
    }
}

impl Model for GuildStatistics {
    const COLLECTION: &'static str = "GuildStatistics";
    const ID_FIELDS: &'static [&'static str] = &["guildId"];

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
