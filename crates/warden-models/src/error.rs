//! Entity-level error types.
//!
//! Storage failures pass through unchanged as [`ModelError::Store`]; the
//! remaining variants are domain rules enforced before anything is written.

use std::time::Duration;

use warden_store::StoreError;

use crate::entry::EntryStatus;

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    // -- Domain rules --------------------------------------------------------
    /// The entry request was already accepted or rejected.
    #[error("entry request by {author_id} is already {status}")]
    EntryResolved {
        author_id: String,
        status: EntryStatus,
    },

    /// A resolution must move a request out of `Pending`.
    #[error("cannot resolve an entry request to {status}")]
    InvalidResolution { status: EntryStatus },

    /// The author already used up the allowance for this kind of entity.
    #[error("rate limit reached: at most {uses} {kind} per {within:?}")]
    RateLimited {
        kind: &'static str,
        uses: usize,
        within: Duration,
    },

    /// The author tried to target themselves.
    #[error("{kind} cannot target its own author")]
    SelfTarget { kind: &'static str },

    // -- Upstream ------------------------------------------------------------
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Convenience alias used throughout the models crate.
pub type Result<T> = std::result::Result<T, ModelError>;
