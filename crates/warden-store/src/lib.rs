//! # warden-store
//!
//! Document store abstraction for warden.
//!
//! Entities are addressed by composite ids (`warnings/<guild>/<author>/...`)
//! and persisted through one of several document backends behind a single
//! session/query contract. Reads go through an in-process cache first.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  Model (typed entities, id helpers)           │
//! ├──────────────────────────────────────────────┤
//! │  DatabaseStore (facade, with_session, setup)  │
//! │  DocumentCache (moka, per collection)         │
//! ├──────────────────────────────────────────────┤
//! │  DocumentSession / DocumentQuery / Conventions│
//! ├──────────────────────────────────────────────┤
//! │  MongoDB │ CouchDB │ SQLite (WAL) │ memory    │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use warden_store::{DatabaseConfig, DatabaseStore, SetupOptions};
//!
//! let mut config = DatabaseConfig::load("config/default.toml")?;
//! config.apply_env();
//!
//! let db = DatabaseStore::create(&config, registry);
//! db.setup(SetupOptions { prefetch_documents: true }).await?;
//! let guild = Guild::get(&db, &[("guildId", "1")]).await?;
//! db.teardown().await?;
//! ```

pub mod adapter;
pub mod adapters;
pub mod cache;
pub mod config;
pub mod conventions;
pub mod database;
pub mod db;
pub mod document;
pub mod error;
pub mod ids;
pub mod migration;
pub mod model;
pub mod query;
pub mod registry;
pub mod session;

#[cfg(test)]
mod testing;

// ── re-exports ───────────────────────────────────────────────────────

pub use adapter::{Backend, DatabaseAdapter};
pub use adapters::{
    CouchAdapter, CouchConventions, MemoryAdapter, MemoryConventions, MongoAdapter,
    MongoConventions, SqliteAdapter, SqliteConventions,
};
pub use cache::{CacheStats, DocumentCache, DocumentCacheBuilder};
pub use config::{CacheConfig, CouchConfig, DatabaseConfig, MongoConfig, SqliteConfig};
pub use conventions::{Conventions, IS_DELETED_FIELD, Payload};
pub use database::{DatabaseStore, SetupOptions};
pub use db::Database;
pub use document::{Document, Metadata};
pub use error::{StoreError, StoreResult};
pub use model::{
    AnyModel, Model, RateLimit, Timestamped, WriteOutcome, crosses_rate_limit,
    crosses_rate_limit_at,
};
pub use query::{CompiledQuery, DocumentQuery, Predicate, QuerySpec};
pub use registry::{CollectionEntry, CollectionRegistry, RegistryBuilder};
pub use session::{DocumentSession, LOAD_MANY_BATCH_SIZE, load_tabulated};
