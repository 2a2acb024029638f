//! Persisted entities for warden.
//!
//! This crate provides:
//!
//! - **Guild state**: feature toggles and channels ([`Guild`]), activity
//!   counters ([`GuildStatistics`]) and per-user preferences ([`User`]).
//! - **Moderation records**: [`Warning`] with expiry, member [`Report`]s and
//!   [`EntryRequest`]s decided by vote.
//! - **Community records**: [`Suggestion`], [`Praise`] and support
//!   [`Ticket`]s.
//!
//! Author-submitted records implement [`Limited`], which enforces a
//! per-author rate limit on submission. [`registry`] registers every entity
//! with the store.

pub mod entry;
pub mod error;
pub mod guild;
pub mod limits;
pub mod praise;
pub mod report;
pub mod statistics;
pub mod suggestion;
pub mod ticket;
pub mod time;
pub mod user;
pub mod warning;

use std::sync::Arc;

use warden_store::{CollectionRegistry, StoreResult};

pub use entry::{EntryRequest, EntryStatus, Tally, Verdict};
pub use error::{ModelError, Result};
pub use guild::{Feature, Guild};
pub use limits::Limited;
pub use praise::Praise;
pub use report::Report;
pub use statistics::{Counter, GuildStatistics};
pub use suggestion::{Suggestion, SuggestionStatus};
pub use ticket::Ticket;
pub use user::User;
pub use warning::Warning;

/// The registry of every warden collection.
pub fn registry() -> StoreResult<Arc<CollectionRegistry>> {
    let registry = CollectionRegistry::builder()
        .register::<Guild>()?
        .register::<GuildStatistics>()?
        .register::<User>()?
        .register::<EntryRequest>()?
        .register::<Warning>()?
        .register::<Report>()?
        .register::<Praise>()?
        .register::<Suggestion>()?
        .register::<Ticket>()?
        .build();
    Ok(Arc::new(registry))
}
