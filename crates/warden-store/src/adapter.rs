//! Backend factories.
//!
//! Every supported document database implements [`DatabaseAdapter`]: it
//! validates its own configuration, owns the connection lifecycle, and opens
//! sessions that speak its native client library.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::DatabaseConfig;
use crate::conventions::Conventions;
use crate::error::StoreResult;
use crate::registry::CollectionRegistry;
use crate::session::DocumentSession;

/// The supported backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    Memory,
    MongoDb,
    CouchDb,
    Sqlite,
}

impl Backend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::MongoDb => "mongodb",
            Self::CouchDb => "couchdb",
            Self::Sqlite => "sqlite",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "none" => Ok(Self::Memory),
            "mongo" | "mongodb" => Ok(Self::MongoDb),
            "couch" | "couchdb" => Ok(Self::CouchDb),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(format!("unknown database backend: {other}")),
        }
    }
}

/// A document database backend.
#[async_trait]
pub trait DatabaseAdapter: Send + Sync {
    fn backend(&self) -> Backend;

    /// Build the adapter when every required connection parameter is
    /// present; `None` otherwise. Never connects and never fails loudly.
    fn try_create(config: &DatabaseConfig) -> Option<Self>
    where
        Self: Sized;

    /// Connect. Safe to call again once started.
    async fn start(&self) -> StoreResult<()>;

    /// Release every pooled connection.
    async fn stop(&self) -> StoreResult<()>;

    fn conventions(&self) -> &dyn Conventions;

    /// Open a fresh, unshared session.
    async fn open_session(
        &self,
        registry: Arc<CollectionRegistry>,
    ) -> StoreResult<Box<dyn DocumentSession>>;
}
