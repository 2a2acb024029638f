//! Embedded SQLite backend.
//!
//! Every collection shares one `documents` table: the composite id is the
//! primary key, the entity fields are a JSON `data` column, and an integer
//! `revision` column gives optimistic concurrency. Writes carry the revision
//! they were based on and only land if it is still current.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::adapter::{Backend, DatabaseAdapter};
use crate::config::DatabaseConfig;
use crate::conventions::{Conventions, Payload};
use crate::db::Database;
use crate::document::Document;
use crate::error::{StoreError, StoreResult};
use crate::model::WriteOutcome;
use crate::query::QuerySpec;
use crate::registry::CollectionRegistry;
use crate::session::DocumentSession;

/// `id` identity plus the integer `revision` column.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteConventions;

impl Conventions for SqliteConventions {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    fn id_field(&self) -> &'static str {
        "id"
    }

    fn revision_field(&self) -> Option<&'static str> {
        Some("revision")
    }
}

pub struct SqliteAdapter {
    /// `None` opens a private in-memory database.
    path: Option<PathBuf>,
    db: RwLock<Option<Database>>,
}

impl SqliteAdapter {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            db: RwLock::new(None),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            db: RwLock::new(None),
        }
    }
}

#[async_trait]
impl DatabaseAdapter for SqliteAdapter {
    fn backend(&self) -> Backend {
        Backend::Sqlite
    }

    fn try_create(config: &DatabaseConfig) -> Option<Self> {
        match &config.sqlite.path {
            Some(path) => Some(Self::open(path.clone())),
            None => {
                warn!("sqlite backend selected but no path configured");
                None
            }
        }
    }

    async fn start(&self) -> StoreResult<()> {
        let mut db = self.db.write().await;
        if db.is_some() {
            return Ok(());
        }

        let opened = match &self.path {
            Some(path) => Database::open_and_migrate(path.clone()).await?,
            None => {
                let db = tokio::task::spawn_blocking(Database::open_in_memory).await??;
                db.run_migrations().await?;
                db
            }
        };
        *db = Some(opened);

        info!(path = ?self.path, "sqlite adapter started");
        Ok(())
    }

    async fn stop(&self) -> StoreResult<()> {
        // The connection closes once the last open session drops its handle.
        if self.db.write().await.take().is_some() {
            info!("sqlite adapter stopped");
        }
        Ok(())
    }

    fn conventions(&self) -> &dyn Conventions {
        &SqliteConventions
    }

    async fn open_session(
        &self,
        registry: Arc<CollectionRegistry>,
    ) -> StoreResult<Box<dyn DocumentSession>> {
        let db = self
            .db
            .read()
            .await
            .clone()
            .ok_or(StoreError::NotStarted { backend: "sqlite" })?;
        Ok(Box::new(SqliteSession { db, registry }))
    }
}

struct SqliteSession {
    db: Database,
    registry: Arc<CollectionRegistry>,
}

/// Rebuild the backend record from a table row.
fn row_payload(id: String, revision: i64, data: &str) -> StoreResult<Payload> {
    let mut payload: Payload = serde_json::from_str(data)?;
    payload.insert("id".into(), Value::from(id));
    payload.insert("revision".into(), Value::from(revision));
    Ok(payload)
}

/// The `data` column for `document`: its fields plus the soft-delete flag.
fn encode(document: &Document) -> StoreResult<String> {
    let mut payload = SqliteConventions.to_payload(document);
    payload.remove("id");
    payload.remove("revision");
    Ok(serde_json::to_string(&payload)?)
}

fn parse_revision(document: &Document) -> StoreResult<Option<i64>> {
    document
        .revision()
        .map(|revision| {
            revision.parse::<i64>().map_err(|_| {
                StoreError::InvalidArgument(format!(
                    "{} carries non-numeric sqlite revision {revision:?}",
                    document.id()
                ))
            })
        })
        .transpose()
}

#[async_trait]
impl DocumentSession for SqliteSession {
    fn registry(&self) -> &CollectionRegistry {
        &self.registry
    }

    fn conventions(&self) -> &dyn Conventions {
        &SqliteConventions
    }

    #[instrument(skip(self))]
    async fn load(&self, id: &str) -> StoreResult<Option<Document>> {
        let key = id.to_string();
        let row = self
            .db
            .execute(move |conn| {
                let result = conn.query_row(
                    "SELECT id, revision, data FROM documents WHERE id = ?1",
                    rusqlite::params![key],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?, row.get::<_, String>(2)?)),
                );
                match result {
                    Ok(row) => Ok(Some(row)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await?;

        row.map(|(id, revision, data)| {
            SqliteConventions.instantiate(&self.registry, row_payload(id, revision, &data)?)
        })
        .transpose()
    }

    #[instrument(skip(self, document), fields(id = %document.id()))]
    async fn store(&self, document: &mut Document) -> StoreResult<WriteOutcome> {
        let expected = parse_revision(document)?;
        let id = document.id().to_string();
        let collection = document.collection();
        let data = encode(document)?;
        let now = chrono::Utc::now().timestamp_millis();

        let stored = self
            .db
            .execute(move |conn| {
                let (changed, revision) = match expected {
                    Some(expected) => {
                        let changed = conn.execute(
                            "UPDATE documents SET data = ?1, revision = revision + 1, updated_at = ?2 \
                             WHERE id = ?3 AND revision = ?4",
                            rusqlite::params![data, now, id, expected],
                        )?;
                        (changed, expected + 1)
                    }
                    None => {
                        let changed = conn.execute(
                            "INSERT INTO documents (id, collection, revision, data, updated_at) \
                             VALUES (?1, ?2, 1, ?3, ?4) ON CONFLICT(id) DO NOTHING",
                            rusqlite::params![id, collection, data, now],
                        )?;
                        (changed, 1)
                    }
                };
                Ok((changed > 0).then_some(revision))
            })
            .await?;

        match stored {
            Some(revision) => {
                document.set_revision(Some(revision.to_string()));
                debug!(revision, "document stored");
                Ok(WriteOutcome::Stored)
            }
            None => {
                warn!(
                    id = document.id(),
                    expected_revision = ?expected,
                    "write conflict: document changed since it was read"
                );
                Ok(WriteOutcome::Conflict)
            }
        }
    }

    /// A known revision is a precondition: the row only goes if it is
    /// still at that revision.
    #[instrument(skip(self, document), fields(id = %document.id()))]
    async fn remove(&self, document: &Document) -> StoreResult<WriteOutcome> {
        let expected = parse_revision(document)?;
        let id = document.id().to_string();
        let conflicted = self
            .db
            .execute(move |conn| {
                let Some(expected) = expected else {
                    conn.execute("DELETE FROM documents WHERE id = ?1", rusqlite::params![id])?;
                    return Ok(false);
                };
                let removed = conn.execute(
                    "DELETE FROM documents WHERE id = ?1 AND revision = ?2",
                    rusqlite::params![id, expected],
                )?;
                if removed > 0 {
                    return Ok(false);
                }
                let still_there: bool = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM documents WHERE id = ?1)",
                    rusqlite::params![id],
                    |row| row.get(0),
                )?;
                Ok(still_there)
            })
            .await?;

        if conflicted {
            warn!(
                id = document.id(),
                revision = ?document.revision(),
                "remove conflict: document changed since it was read"
            );
            return Ok(WriteOutcome::Conflict);
        }
        debug!("document removed");
        Ok(WriteOutcome::Stored)
    }

    #[instrument(skip(self, query), fields(collection = query.collection()))]
    async fn find(&self, query: &QuerySpec) -> StoreResult<Vec<Document>> {
        let collection = self.registry.resolve(query.collection())?.name();
        let compiled = query.compile(&SqliteConventions)?;

        let rows = self
            .db
            .execute(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, revision, data FROM documents WHERE collection = ?1 ORDER BY id",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![collection], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?, row.get::<_, String>(2)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        // No native regex: evaluate every predicate on the decoded record.
        let mut documents = Vec::new();
        for (id, revision, data) in rows {
            let payload = row_payload(id, revision, &data)?;
            if compiled.matches(&payload) {
                documents.push(SqliteConventions.instantiate(&self.registry, payload)?);
            }
        }
        debug!(matched = documents.len(), "query executed");
        Ok(documents)
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model;
    use crate::testing::{self, Note};

    async fn started() -> SqliteAdapter {
        let adapter = SqliteAdapter::in_memory();
        adapter.start().await.unwrap();
        adapter
    }

    async fn session(adapter: &SqliteAdapter) -> Box<dyn DocumentSession> {
        adapter
            .open_session(Arc::new(testing::registry()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn session_before_start_fails() {
        let adapter = SqliteAdapter::in_memory();
        let err = adapter
            .open_session(Arc::new(testing::registry()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, StoreError::NotStarted { backend: "sqlite" }));
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let adapter = started().await;
        let mut document = Note::new("1", "2", "x").to_document().unwrap();
        let _ = session(&adapter).await.store(&mut document).await.unwrap();

        adapter.start().await.unwrap();
        assert!(session(&adapter).await.load("notes/1/2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn revisions_advance_on_every_write() {
        let adapter = started().await;
        let session = session(&adapter).await;

        let mut document = Note::new("1", "2", "first").to_document().unwrap();
        assert!(session.store(&mut document).await.unwrap().is_stored());
        assert_eq!(document.revision(), Some("1"));

        assert!(session.store(&mut document).await.unwrap().is_stored());
        assert_eq!(document.revision(), Some("2"));

        let loaded = session.load("notes/1/2").await.unwrap().unwrap();
        assert_eq!(loaded.revision(), Some("2"));
        assert!(!loaded.fields().contains_key("revision"));
        assert!(!loaded.fields().contains_key("id"));
    }

    #[tokio::test]
    async fn stale_revision_is_a_conflict() {
        let adapter = started().await;
        let session = session(&adapter).await;

        let mut original = Note::new("1", "2", "first").to_document().unwrap();
        let _ = session.store(&mut original).await.unwrap();

        let mut stale = original.clone();
        let _ = session.store(&mut original).await.unwrap();

        assert_eq!(session.store(&mut stale).await.unwrap(), WriteOutcome::Conflict);
        assert_eq!(stale.revision(), Some("1"));
    }

    #[tokio::test]
    async fn stale_remove_is_a_conflict() {
        let adapter = started().await;
        let session = session(&adapter).await;

        let mut current = Note::new("1", "2", "first").to_document().unwrap();
        let _ = session.store(&mut current).await.unwrap();
        let stale = current.clone();
        let _ = session.store(&mut current).await.unwrap();

        assert!(session.remove(&stale).await.unwrap().is_conflict());
        assert!(session.load("notes/1/2").await.unwrap().is_some());

        assert!(session.remove(&current).await.unwrap().is_stored());
        assert!(session.load("notes/1/2").await.unwrap().is_none());
        // Already gone: nothing left to conflict with.
        assert!(session.remove(&current).await.unwrap().is_stored());
    }

    #[tokio::test]
    async fn second_insert_without_revision_conflicts() {
        let adapter = started().await;
        let session = session(&adapter).await;

        let mut first = Note::new("1", "2", "first").to_document().unwrap();
        let mut second = Note::new("1", "2", "second").to_document().unwrap();
        assert!(session.store(&mut first).await.unwrap().is_stored());
        assert!(session.store(&mut second).await.unwrap().is_conflict());

        let loaded = session.load("notes/1/2").await.unwrap().unwrap();
        assert_eq!(loaded.field("text").unwrap(), "first");
    }

    #[tokio::test]
    async fn soft_delete_flag_is_persisted() {
        let adapter = started().await;
        let session = session(&adapter).await;

        let mut document = Note::new("1", "2", "x").to_document().unwrap();
        document.set_deleted(true);
        let _ = session.store(&mut document).await.unwrap();

        assert!(session.load("notes/1/2").await.unwrap().unwrap().is_deleted());
    }

    #[tokio::test]
    async fn find_evaluates_regex_client_side() {
        let adapter = started().await;
        let session = session(&adapter).await;
        for (author, text) in [("a", "spam link"), ("b", "hello"), ("c", "SPAM")] {
            let mut document = Note::new("1", author, text).to_document().unwrap();
            let _ = session.store(&mut document).await.unwrap();
        }

        let found = session
            .query("Notes")
            .where_regex("text", "(?i)^spam")
            .execute()
            .await
            .unwrap();
        let ids: Vec<&str> = found.iter().map(Document::id).collect();
        assert_eq!(ids, ["notes/1/a", "notes/1/c"]);

        let by_id = session
            .query("Notes")
            .where_equals("id", "notes/1/b")
            .execute()
            .await
            .unwrap();
        assert_eq!(by_id.len(), 1);
    }

    #[tokio::test]
    async fn on_disk_database_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warden.db");

        let adapter = SqliteAdapter::open(&path);
        adapter.start().await.unwrap();
        let mut document = Note::new("1", "2", "kept").to_document().unwrap();
        let _ = session(&adapter).await.store(&mut document).await.unwrap();
        adapter.stop().await.unwrap();

        let reopened = SqliteAdapter::open(&path);
        reopened.start().await.unwrap();
        let loaded = session(&reopened).await.load("notes/1/2").await.unwrap().unwrap();
        assert_eq!(loaded.field("text").unwrap(), "kept");
    }

    #[test]
    fn try_create_requires_a_path() {
        assert!(SqliteAdapter::try_create(&DatabaseConfig::default()).is_none());

        let mut config = DatabaseConfig::default();
        config.sqlite.path = Some(PathBuf::from("warden.db"));
        assert!(SqliteAdapter::try_create(&config).is_some());
    }
}
