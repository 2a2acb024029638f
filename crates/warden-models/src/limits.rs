//! Author-submitted entities with a per-author allowance.

use std::future::Future;

use tracing::info;
use warden_store::{
    DatabaseStore, Model, QuerySpec, RateLimit, Timestamped, WriteOutcome, crosses_rate_limit,
};

use crate::error::{ModelError, Result};

/// An entity an author creates at a limited rate within one guild.
pub trait Limited: Model + Timestamped {
    /// Plural noun for messages (`"reports"`).
    const KIND: &'static str;

    const RATE_LIMIT: RateLimit;

    fn guild_id(&self) -> &str;

    fn author_id(&self) -> &str;

    /// Everything this author submitted in this guild.
    fn by_author(
        db: &DatabaseStore,
        guild_id: &str,
        author_id: &str,
    ) -> impl Future<Output = Result<Vec<Self>>> + Send {
        let query = author_scope::<Self>(guild_id, author_id);
        async move { Ok(Self::all(db, query).await?) }
    }

    /// Create `self` unless the author already exhausted the allowance.
    fn submit(&mut self, db: &DatabaseStore) -> impl Future<Output = Result<WriteOutcome>> + Send {
        async move {
            let prior = Self::by_author(db, self.guild_id(), self.author_id()).await?;
            if crosses_rate_limit(&prior, Self::RATE_LIMIT) {
                info!(
                    kind = Self::KIND,
                    guild_id = self.guild_id(),
                    author_id = self.author_id(),
                    "rate limit reached"
                );
                return Err(ModelError::RateLimited {
                    kind: Self::KIND,
                    uses: Self::RATE_LIMIT.uses,
                    within: Self::RATE_LIMIT.within,
                });
            }
            Ok(self.create(db).await?)
        }
    }
}

fn author_scope<M: Model>(guild_id: &str, author_id: &str) -> QuerySpec {
    M::query()
        .where_equals("guildId", guild_id)
        .where_equals("authorId", author_id)
}
