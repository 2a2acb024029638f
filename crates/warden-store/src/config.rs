//! Database configuration.
//!
//! Read from the `[database]` table of a TOML file, then overridden by
//! environment variables. Connection parameters stay optional here: whether
//! a backend is usable is decided by its adapter's `try_create`.
//!
//! ```toml
//! [database]
//! backend = "couchdb"
//! prefetch_documents = true
//!
//! [database.couchdb]
//! host = "127.0.0.1"
//! port = 5984
//! username = "warden"
//! password = "secret"
//! database = "warden"
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::adapter::Backend;
use crate::error::{StoreError, StoreResult};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Selected backend name; unset or unknown means in-memory.
    pub backend: Option<String>,
    pub mongodb: MongoConfig,
    pub couchdb: CouchConfig,
    pub sqlite: SqliteConfig,
    pub cache: CacheConfig,
    /// Load hot collections into the cache during setup.
    pub prefetch_documents: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MongoConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CouchConfig {
    /// `http` unless set.
    pub protocol: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_capacity: u64,
    /// Entries never expire when unset.
    pub ttl_seconds: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: 100_000,
            ttl_seconds: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    database: DatabaseConfig,
}

impl DatabaseConfig {
    /// Parse the `[database]` table of a TOML document.
    pub fn from_toml_str(content: &str) -> StoreResult<Self> {
        let file: ConfigFile =
            toml::from_str(content).map_err(|e| StoreError::Config(e.to_string()))?;
        Ok(file.database)
    }

    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(err) => Err(StoreError::Config(format!(
                "failed to read {}: {err}",
                path.display()
            ))),
        }
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_vars(std::env::vars());
    }

    /// Apply overrides from `(name, value)` pairs; unrelated names are ignored.
    pub fn apply_vars<I, K, V>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (name, value) in vars {
            let name = name.as_ref();
            let value: String = value.into();
            match name {
                "DATABASE_SOLUTION" => self.backend = Some(value),
                "MONGODB_HOST" => self.mongodb.host = Some(value),
                "MONGODB_PORT" => self.mongodb.port = parse_port(name, &value),
                "MONGODB_USERNAME" => self.mongodb.username = Some(value),
                "MONGODB_PASSWORD" => self.mongodb.password = Some(value),
                "MONGODB_DATABASE" => self.mongodb.database = Some(value),
                "COUCHDB_PROTOCOL" => self.couchdb.protocol = Some(value),
                "COUCHDB_HOST" => self.couchdb.host = Some(value),
                "COUCHDB_PORT" => self.couchdb.port = parse_port(name, &value),
                "COUCHDB_USERNAME" => self.couchdb.username = Some(value),
                "COUCHDB_PASSWORD" => self.couchdb.password = Some(value),
                "COUCHDB_DATABASE" => self.couchdb.database = Some(value),
                "SQLITE_PATH" => self.sqlite.path = Some(PathBuf::from(value)),
                _ => {}
            }
        }
    }

    /// The selected backend, if it names a known one.
    pub fn selected_backend(&self) -> Option<Backend> {
        let name = self.backend.as_deref()?;
        match Backend::from_str(name) {
            Ok(backend) => Some(backend),
            Err(err) => {
                warn!(%err, "ignoring configured database backend");
                None
            }
        }
    }
}

fn parse_port(name: &str, value: &str) -> Option<u16> {
    match value.parse() {
        Ok(port) => Some(port),
        Err(err) => {
            warn!(variable = name, value, %err, "ignoring invalid port");
            None
        }
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_database_table() {
        let config = DatabaseConfig::from_toml_str(
            r#"
            [bot]
            token = "ignored"

            [database]
            backend = "mongodb"
            prefetch_documents = true

            [database.mongodb]
            host = "localhost"
            port = 27017
            database = "warden"

            [database.cache]
            ttl_seconds = 600
            "#,
        )
        .unwrap();

        assert_eq!(config.selected_backend(), Some(Backend::MongoDb));
        assert!(config.prefetch_documents);
        assert_eq!(config.mongodb.port, Some(27017));
        assert_eq!(config.mongodb.username, None);
        assert_eq!(config.cache.max_capacity, 100_000);
        assert_eq!(config.cache.ttl_seconds, Some(600));
    }

    #[test]
    fn missing_table_yields_defaults() {
        let config = DatabaseConfig::from_toml_str("[bot]\nname = \"warden\"\n").unwrap();
        assert_eq!(config.selected_backend(), None);
        assert!(!config.prefetch_documents);
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        let err = DatabaseConfig::from_toml_str("[database\nbackend = 1").unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig::load(dir.path().join("absent.toml")).unwrap();
        assert!(config.backend.is_none());
    }

    #[test]
    fn environment_overrides_file_values() {
        let mut config = DatabaseConfig::default();
        config.apply_vars([
            ("DATABASE_SOLUTION", "couchdb"),
            ("COUCHDB_HOST", "db.internal"),
            ("COUCHDB_PORT", "5984"),
            ("MONGODB_PORT", "not-a-port"),
            ("PATH", "/usr/bin"),
        ]);

        assert_eq!(config.selected_backend(), Some(Backend::CouchDb));
        assert_eq!(config.couchdb.host.as_deref(), Some("db.internal"));
        assert_eq!(config.couchdb.port, Some(5984));
        assert_eq!(config.mongodb.port, None);
    }

    #[test]
    fn unknown_backend_is_treated_as_unset() {
        let config = DatabaseConfig {
            backend: Some("rethinkdb".into()),
            ..DatabaseConfig::default()
        };
        assert_eq!(config.selected_backend(), None);
    }
}
