//! In-process backend, used when no database is configured.
//!
//! Payloads live in a [`DashMap`] shared by every session of the adapter, so
//! data survives sessions but not the process.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::adapter::{Backend, DatabaseAdapter};
use crate::config::DatabaseConfig;
use crate::conventions::{Conventions, Payload};
use crate::document::Document;
use crate::error::StoreResult;
use crate::model::WriteOutcome;
use crate::query::QuerySpec;
use crate::registry::CollectionRegistry;
use crate::session::DocumentSession;

/// Plain `id` identity, no revisions.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryConventions;

impl Conventions for MemoryConventions {
    fn backend(&self) -> &'static str {
        "memory"
    }

    fn id_field(&self) -> &'static str {
        "id"
    }
}

#[derive(Debug, Default)]
pub struct MemoryAdapter {
    documents: Arc<DashMap<String, Payload>>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records across all collections.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[async_trait]
impl DatabaseAdapter for MemoryAdapter {
    fn backend(&self) -> Backend {
        Backend::Memory
    }

    fn try_create(_config: &DatabaseConfig) -> Option<Self> {
        Some(Self::new())
    }

    async fn start(&self) -> StoreResult<()> {
        debug!("memory adapter started");
        Ok(())
    }

    async fn stop(&self) -> StoreResult<()> {
        debug!(documents = self.documents.len(), "memory adapter stopped");
        Ok(())
    }

    fn conventions(&self) -> &dyn Conventions {
        &MemoryConventions
    }

    async fn open_session(
        &self,
        registry: Arc<CollectionRegistry>,
    ) -> StoreResult<Box<dyn DocumentSession>> {
        Ok(Box::new(MemorySession {
            documents: Arc::clone(&self.documents),
            registry,
        }))
    }
}

struct MemorySession {
    documents: Arc<DashMap<String, Payload>>,
    registry: Arc<CollectionRegistry>,
}

#[async_trait]
impl DocumentSession for MemorySession {
    fn registry(&self) -> &CollectionRegistry {
        &self.registry
    }

    fn conventions(&self) -> &dyn Conventions {
        &MemoryConventions
    }

    async fn load(&self, id: &str) -> StoreResult<Option<Document>> {
        // Clone out before decoding so no shard lock is held.
        let payload = self.documents.get(id).map(|entry| entry.value().clone());
        payload
            .map(|payload| MemoryConventions.instantiate(&self.registry, payload))
            .transpose()
    }

    async fn store(&self, document: &mut Document) -> StoreResult<WriteOutcome> {
        let payload = MemoryConventions.to_payload(document);
        self.documents.insert(document.id().to_string(), payload);
        Ok(WriteOutcome::Stored)
    }

    async fn remove(&self, document: &Document) -> StoreResult<WriteOutcome> {
        self.documents.remove(document.id());
        Ok(WriteOutcome::Stored)
    }

    async fn find(&self, query: &QuerySpec) -> StoreResult<Vec<Document>> {
        let collection = self.registry.resolve(query.collection())?;
        let compiled = query.compile(&MemoryConventions)?;

        let mut matches: Vec<(String, Payload)> = self
            .documents
            .iter()
            .filter(|entry| collection.owns_id(entry.key()) && compiled.matches(entry.value()))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        matches.sort_by(|a, b| a.0.cmp(&b.0));

        matches
            .into_iter()
            .map(|(_, payload)| MemoryConventions.instantiate(&self.registry, payload))
            .collect()
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model;
    use crate::testing::{self, Note, Settings};

    async fn session(adapter: &MemoryAdapter) -> Box<dyn DocumentSession> {
        adapter
            .open_session(Arc::new(testing::registry()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn store_then_load() {
        let adapter = MemoryAdapter::new();
        let session = session(&adapter).await;

        let mut document = Note::new("1", "2", "hello").to_document().unwrap();
        assert_eq!(session.store(&mut document).await.unwrap(), WriteOutcome::Stored);
        assert_eq!(document.revision(), None);

        let loaded = session.load("notes/1/2").await.unwrap().unwrap();
        assert_eq!(loaded.field("text").unwrap(), "hello");
        assert!(session.load("notes/1/3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn data_outlives_sessions() {
        let adapter = MemoryAdapter::new();
        let mut document = Settings::new("7").to_document().unwrap();
        let _ = session(&adapter).await.store(&mut document).await.unwrap();

        assert!(session(&adapter).await.load("settings/7").await.unwrap().is_some());
        assert_eq!(adapter.len(), 1);
    }

    #[tokio::test]
    async fn load_many_keeps_positions() {
        let adapter = MemoryAdapter::new();
        let session = session(&adapter).await;
        for author in ["a", "c"] {
            let mut document = Note::new("1", author, "x").to_document().unwrap();
            let _ = session.store(&mut document).await.unwrap();
        }

        let ids = ["notes/1/a", "notes/1/b", "notes/1/c"].map(String::from);
        let loaded = session.load_many(&ids).await.unwrap();
        let found: Vec<Option<&str>> = loaded
            .iter()
            .map(|document| document.as_ref().map(Document::id))
            .collect();
        assert_eq!(found, [Some("notes/1/a"), None, Some("notes/1/c")]);
    }

    #[tokio::test]
    async fn find_filters_by_collection_and_predicates() {
        let adapter = MemoryAdapter::new();
        let session = session(&adapter).await;
        for (guild, author, text) in [("1", "a", "spam"), ("1", "b", "ham"), ("2", "a", "spam")] {
            let mut document = Note::new(guild, author, text).to_document().unwrap();
            let _ = session.store(&mut document).await.unwrap();
        }
        let mut settings = Settings::new("1").to_document().unwrap();
        let _ = session.store(&mut settings).await.unwrap();

        let notes = session
            .query("Notes")
            .where_equals("guildId", "1")
            .where_regex("text", "^sp")
            .execute_as::<Note>()
            .await
            .unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].author_id, "a");

        let everything = session.query("notes").execute().await.unwrap();
        assert_eq!(everything.len(), 3);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let adapter = MemoryAdapter::new();
        let session = session(&adapter).await;
        let mut document = Note::new("1", "2", "x").to_document().unwrap();
        let _ = session.store(&mut document).await.unwrap();

        assert!(session.remove(&document).await.unwrap().is_stored());
        assert!(session.remove(&document).await.unwrap().is_stored());
        assert!(adapter.is_empty());
    }
}
