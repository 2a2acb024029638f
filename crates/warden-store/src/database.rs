//! The database store facade.
//!
//! [`DatabaseStore`] owns exactly one adapter, the collection registry and
//! the document cache. Every backend round trip goes through
//! [`DatabaseStore::with_session`], which scopes a fresh session to one
//! logical operation and always disposes it.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, try_join_all};
use tracing::{Instrument, debug, debug_span, info, instrument, warn};
use uuid::Uuid;

use crate::adapter::{Backend, DatabaseAdapter};
use crate::adapters::{CouchAdapter, MemoryAdapter, MongoAdapter, SqliteAdapter};
use crate::cache::DocumentCache;
use crate::config::DatabaseConfig;
use crate::document::{Document, Metadata};
use crate::error::{StoreError, StoreResult};
use crate::ids::{self, SEPARATOR};
use crate::model::{AnyModel, Model, WriteOutcome};
use crate::query::QuerySpec;
use crate::registry::CollectionRegistry;
use crate::session::DocumentSession;

/// Options for [`DatabaseStore::setup`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SetupOptions {
    /// Load every hot collection into the cache before returning.
    pub prefetch_documents: bool,
}

pub struct DatabaseStore {
    adapter: Arc<dyn DatabaseAdapter>,
    registry: Arc<CollectionRegistry>,
    cache: DocumentCache,
}

impl DatabaseStore {
    /// Select the configured backend.
    ///
    /// Never fails: an unset or unknown backend name, or one whose
    /// parameters are incomplete, falls back to the in-memory adapter.
    pub fn create(config: &DatabaseConfig, registry: Arc<CollectionRegistry>) -> Self {
        let selected: Option<Arc<dyn DatabaseAdapter>> = match config.selected_backend() {
            Some(Backend::MongoDb) => {
                MongoAdapter::try_create(config).map(|a| Arc::new(a) as Arc<dyn DatabaseAdapter>)
            }
            Some(Backend::CouchDb) => {
                CouchAdapter::try_create(config).map(|a| Arc::new(a) as Arc<dyn DatabaseAdapter>)
            }
            Some(Backend::Sqlite) => {
                SqliteAdapter::try_create(config).map(|a| Arc::new(a) as Arc<dyn DatabaseAdapter>)
            }
            Some(Backend::Memory) => {
                warn!("in-memory database selected; data will not persist across restarts");
                Some(Arc::new(MemoryAdapter::new()))
            }
            None => None,
        };

        let adapter = selected.unwrap_or_else(|| {
            warn!(
                requested = config.backend.as_deref().unwrap_or("<unset>"),
                "no usable database configured, falling back to in-memory storage; \
                 data will not persist across restarts"
            );
            Arc::new(MemoryAdapter::new())
        });

        info!(backend = %adapter.backend(), "database adapter selected");
        Self::with_adapter(adapter, registry, DocumentCache::from_config(&config.cache))
    }

    /// Build around an explicit adapter.
    pub fn with_adapter(
        adapter: Arc<dyn DatabaseAdapter>,
        registry: Arc<CollectionRegistry>,
        cache: DocumentCache,
    ) -> Self {
        Self {
            adapter,
            registry,
            cache,
        }
    }

    pub fn backend(&self) -> Backend {
        self.adapter.backend()
    }

    pub fn registry(&self) -> &Arc<CollectionRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &DocumentCache {
        &self.cache
    }

    // ── lifecycle ────────────────────────────────────────────────────

    /// Start the adapter, then optionally warm the cache with every hot
    /// collection, one parallel query per collection.
    pub async fn setup(&self, options: SetupOptions) -> StoreResult<()> {
        self.adapter.start().await?;
        if !options.prefetch_documents {
            return Ok(());
        }

        let hot: Vec<&'static str> = self.registry.hot_collections().map(|e| e.name()).collect();
        let loaded = try_join_all(hot.iter().map(|&collection| {
            self.with_session(move |session| {
                async move { session.find(&QuerySpec::new(collection)).await }.boxed()
            })
        }))
        .await?;

        for (collection, documents) in hot.iter().zip(loaded) {
            debug!(collection, count = documents.len(), "collection prefetched");
            for document in documents {
                self.cache.insert(document).await;
            }
        }

        info!(collections = hot.len(), "hot collections prefetched");
        Ok(())
    }

    /// Stop the adapter, releasing its connections.
    pub async fn teardown(&self) -> StoreResult<()> {
        self.adapter.stop().await
    }

    /// Run `f` against a fresh session and dispose it afterwards, whether
    /// `f` succeeds, fails or panics.
    ///
    /// The callback borrows the session, so it must capture owned data:
    ///
    /// ```ignore
    /// let id = id.to_string();
    /// let document = db
    ///     .with_session(move |session| async move { session.load(&id).await }.boxed())
    ///     .await?;
    /// ```
    pub async fn with_session<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: for<'s> FnOnce(&'s dyn DocumentSession) -> BoxFuture<'s, StoreResult<T>> + Send,
        T: Send + 'static,
    {
        let span = debug_span!(
            "session",
            backend = %self.adapter.backend(),
            session = %Uuid::now_v7(),
        );

        async move {
            let mut session = self.adapter.open_session(Arc::clone(&self.registry)).await?;
            let outcome = AssertUnwindSafe(f(session.as_ref())).catch_unwind().await;

            if let Err(err) = session.dispose().await {
                warn!(%err, "session dispose failed");
            }

            match outcome {
                Ok(result) => result,
                Err(panic) => std::panic::resume_unwind(panic),
            }
        }
        .instrument(span)
        .await
    }

    // ── typed reads ──────────────────────────────────────────────────

    /// Fetch one entity by id data. The cache is consulted first; a miss
    /// loads through a session and caches the result.
    #[instrument(skip(self, data), fields(collection = M::COLLECTION))]
    pub async fn get<M: Model>(&self, data: &[(&str, &str)]) -> StoreResult<Option<M>> {
        let partial_id = partial_id_for::<M>(data)?;
        if let Some(document) = self.cache.get(M::COLLECTION, &partial_id).await {
            return M::from_document(document).map(Some);
        }

        let id = full_id(M::COLLECTION, &partial_id);
        let loaded = self
            .with_session(move |session| async move { session.load(&id).await }.boxed())
            .await?;

        match loaded {
            Some(document) => {
                self.cache.insert(document.clone()).await;
                M::from_document(document).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Fetch several entities, position for position with `keys`. Cache
    /// misses are loaded in one batch.
    #[instrument(skip(self, keys), fields(collection = M::COLLECTION, count = keys.len()))]
    pub async fn get_many<M: Model>(&self, keys: &[&[(&str, &str)]]) -> StoreResult<Vec<Option<M>>> {
        let mut documents: Vec<Option<Document>> = Vec::with_capacity(keys.len());
        let mut missing: Vec<(usize, String)> = Vec::new();
        for (index, data) in keys.iter().enumerate() {
            let partial_id = partial_id_for::<M>(data)?;
            let cached = self.cache.get(M::COLLECTION, &partial_id).await;
            if cached.is_none() {
                missing.push((index, full_id(M::COLLECTION, &partial_id)));
            }
            documents.push(cached);
        }

        if !missing.is_empty() {
            let ids: Vec<String> = missing.iter().map(|(_, id)| id.clone()).collect();
            let loaded = self
                .with_session(move |session| async move { session.load_many(&ids).await }.boxed())
                .await?;
            for ((index, _), document) in missing.into_iter().zip(loaded) {
                if let Some(document) = document {
                    self.cache.insert(document.clone()).await;
                    documents[index] = Some(document);
                }
            }
        }

        documents
            .into_iter()
            .map(|document| document.map(M::from_document).transpose())
            .collect()
    }

    /// Fetch by id data, creating the entity with `make` when absent.
    ///
    /// If another writer creates it first, the stored entity wins.
    pub async fn get_or_create<M, F>(&self, data: &[(&str, &str)], make: F) -> StoreResult<M>
    where
        M: Model,
        F: FnOnce() -> M + Send,
    {
        if let Some(existing) = self.get::<M>(data).await? {
            return Ok(existing);
        }

        let mut model = make();
        if self.insert(&mut model).await?.is_conflict()
            && let Some(existing) = self.get::<M>(data).await?
        {
            return Ok(existing);
        }
        Ok(model)
    }

    /// Run `query` and decode every result as `M`, caching each one.
    #[instrument(skip(self, query), fields(collection = M::COLLECTION))]
    pub async fn all<M: Model>(&self, query: QuerySpec) -> StoreResult<Vec<M>> {
        let collection = self.registry.resolve(query.collection())?.name();
        if collection != M::COLLECTION {
            return Err(StoreError::CollectionMismatch {
                expected: M::COLLECTION,
                found: collection,
            });
        }

        self.find(query)
            .await?
            .into_iter()
            .map(M::from_document)
            .collect()
    }

    // ── typed writes ─────────────────────────────────────────────────

    /// Persist a new entity and record the revision the backend assigned.
    #[instrument(skip(self, model), fields(collection = M::COLLECTION))]
    pub async fn insert<M: Model>(&self, model: &mut M) -> StoreResult<WriteOutcome> {
        let (outcome, stored) = self.persist(model.to_document()?).await?;
        if outcome.is_stored() {
            model.metadata_mut().revision = stored.revision().map(str::to_string);
        }
        Ok(outcome)
    }

    /// Apply `mutate` to a copy of `model` and persist it. `model` takes
    /// the new state only when the write lands.
    #[instrument(skip(self, model, mutate), fields(collection = M::COLLECTION))]
    pub async fn update<M, F>(&self, model: &mut M, mutate: F) -> StoreResult<WriteOutcome>
    where
        M: Model,
        F: FnOnce(&mut M) + Send,
    {
        let mut draft = model.clone();
        mutate(&mut draft);
        if draft.partial_id()? != model.partial_id()? {
            return Err(StoreError::InvalidArgument(format!(
                "update may not change the id of a {} document",
                M::COLLECTION
            )));
        }

        let (outcome, stored) = self.persist(draft.to_document()?).await?;
        if outcome.is_stored() {
            draft.metadata_mut().revision = stored.revision().map(str::to_string);
            *model = draft;
        }
        Ok(outcome)
    }

    /// Flag `model` as deleted, then remove it from the backend and cache.
    ///
    /// A conflict on either step leaves the document in place. Once removed,
    /// `model` is back to fresh metadata and can be created again.
    #[instrument(skip(self, model), fields(collection = M::COLLECTION))]
    pub async fn delete<M: Model>(&self, model: &mut M) -> StoreResult<WriteOutcome> {
        let outcome = self
            .update(model, |draft| draft.metadata_mut().is_deleted = Some(true))
            .await?;
        if outcome.is_conflict() {
            return Ok(outcome);
        }

        let outcome = self.remove_document(model.to_document()?).await?;
        if outcome.is_stored() {
            *model.metadata_mut() = Metadata::default();
        }
        Ok(outcome)
    }

    // ── generic access ───────────────────────────────────────────────

    /// Load any registered document by full id, as its concrete model.
    #[instrument(skip(self))]
    pub async fn load_any(&self, id: &str) -> StoreResult<Option<Box<dyn AnyModel>>> {
        self.load_document(id)
            .await?
            .map(|document| self.registry.rehydrate(document))
            .transpose()
    }

    /// Load any registered document by full id, cache first.
    #[instrument(skip(self))]
    pub async fn load_document(&self, id: &str) -> StoreResult<Option<Document>> {
        let (entry, partial_id) = ids::decompose_id(&self.registry, id)?;
        if let Some(document) = self.cache.get(entry.name(), &partial_id).await {
            return Ok(Some(document));
        }

        let id = id.to_string();
        let loaded = self
            .with_session(move |session| async move { session.load(&id).await }.boxed())
            .await?;
        if let Some(document) = &loaded {
            self.cache.insert(document.clone()).await;
        }
        Ok(loaded)
    }

    /// Run `query` and return generic documents, caching each one.
    #[instrument(skip(self, query), fields(collection = query.collection()))]
    pub async fn find(&self, query: QuerySpec) -> StoreResult<Vec<Document>> {
        let documents = self
            .with_session(move |session| async move { session.find(&query).await }.boxed())
            .await?;
        for document in &documents {
            self.cache.insert(document.clone()).await;
        }
        Ok(documents)
    }

    /// Flag a generic document as deleted, then remove it.
    #[instrument(skip(self, document), fields(id = %document.id()))]
    pub async fn delete_document(&self, mut document: Document) -> StoreResult<WriteOutcome> {
        document.set_deleted(true);
        let (outcome, stored) = self.persist(document).await?;
        if outcome.is_conflict() {
            return Ok(outcome);
        }
        self.remove_document(stored).await
    }

    // ── internals ────────────────────────────────────────────────────

    /// Store `document` and keep the cache in step with the outcome: the
    /// stored version on success, nothing on conflict.
    async fn persist(&self, document: Document) -> StoreResult<(WriteOutcome, Document)> {
        let (outcome, stored) = self
            .with_session(move |session| {
                async move {
                    let mut document = document;
                    let outcome = session.store(&mut document).await?;
                    Ok((outcome, document))
                }
                .boxed()
            })
            .await?;

        match outcome {
            WriteOutcome::Stored => self.cache.insert(stored.clone()).await,
            WriteOutcome::Conflict => {
                self.cache.remove(stored.collection(), stored.partial_id()).await;
            }
        }
        Ok((outcome, stored))
    }

    /// Remove `document` and evict it. A conflict evicts too, since the
    /// cached copy is the one that went stale.
    async fn remove_document(&self, document: Document) -> StoreResult<WriteOutcome> {
        let collection = document.collection();
        let partial_id = document.partial_id().to_string();
        let outcome = self
            .with_session(move |session| async move { session.remove(&document).await }.boxed())
            .await?;
        self.cache.remove(collection, &partial_id).await;
        Ok(outcome)
    }
}

/// The partial id of `M` built from exactly its declared id fields.
fn partial_id_for<M: Model>(data: &[(&str, &str)]) -> StoreResult<String> {
    let parts = M::ID_FIELDS
        .iter()
        .map(|&name| {
            data.iter()
                .find(|(key, _)| *key == name)
                .map(|&(_, value)| (name, value))
                .ok_or(StoreError::MissingKeyPart {
                    collection: M::COLLECTION,
                    name,
                })
        })
        .collect::<StoreResult<Vec<_>>>()?;
    ids::build_partial_id(&parts)
}

fn full_id(collection: &str, partial_id: &str) -> String {
    format!("{}{SEPARATOR}{partial_id}", ids::lower_camel(collection))
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, Note, Settings};

    fn store() -> DatabaseStore {
        DatabaseStore::create(&DatabaseConfig::default(), Arc::new(testing::registry()))
    }

    #[test]
    fn unset_backend_falls_back_to_memory() {
        assert_eq!(store().backend(), Backend::Memory);
    }

    #[test]
    fn incomplete_backend_falls_back_to_memory() {
        let mut config = DatabaseConfig::default();
        config.apply_vars([("DATABASE_SOLUTION", "couchdb"), ("COUCHDB_HOST", "localhost")]);
        let db = DatabaseStore::create(&config, Arc::new(testing::registry()));
        assert_eq!(db.backend(), Backend::Memory);
    }

    #[test]
    fn complete_sqlite_config_selects_sqlite() {
        let mut config = DatabaseConfig::default();
        config.apply_vars([("DATABASE_SOLUTION", "sqlite"), ("SQLITE_PATH", "/tmp/unused.db")]);
        let db = DatabaseStore::create(&config, Arc::new(testing::registry()));
        assert_eq!(db.backend(), Backend::Sqlite);
    }

    #[test]
    fn partial_id_uses_only_declared_fields() {
        let partial = partial_id_for::<Note>(&[("authorId", "2"), ("guildId", "1"), ("userId", "9")]).unwrap();
        assert_eq!(partial, "1/2");

        let err = partial_id_for::<Note>(&[("guildId", "1")]).unwrap_err();
        assert!(matches!(err, StoreError::MissingKeyPart { collection: "Notes", name: "authorId" }));
    }

    #[tokio::test]
    async fn with_session_returns_callback_result() {
        let db = store();
        db.setup(SetupOptions::default()).await.unwrap();

        let count = db
            .with_session(|session| async move { Ok(session.registry().len()) }.boxed())
            .await
            .unwrap();
        assert_eq!(count, 2);

        let err = db
            .with_session(|_| async move { Err::<(), _>(StoreError::InvalidArgument("boom".into())) }.boxed())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn update_commits_only_on_success() {
        let db = store();
        let mut note = Note::new("1", "2", "draft");
        assert!(db.insert(&mut note).await.unwrap().is_stored());

        let outcome = db.update(&mut note, |n| n.text = "final".into()).await.unwrap();
        assert!(outcome.is_stored());
        assert_eq!(note.text, "final");

        let err = db
            .update(&mut note, |n| n.author_id = "3".into())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
        assert_eq!(note.author_id, "2");
    }

    #[tokio::test]
    async fn get_or_create_creates_once() {
        let db = store();
        let key = [("guildId", "5")];

        let created = db
            .get_or_create::<Settings, _>(&key, || Settings {
                language: Some("en".into()),
                ..Settings::new("5")
            })
            .await
            .unwrap();
        assert_eq!(created.language.as_deref(), Some("en"));

        let again = db
            .get_or_create::<Settings, _>(&key, || Settings::new("5"))
            .await
            .unwrap();
        assert_eq!(again.language.as_deref(), Some("en"));
    }

    #[tokio::test]
    async fn all_rejects_foreign_collection() {
        let db = store();
        let err = db.all::<Note>(Settings::query()).await.unwrap_err();
        assert!(matches!(err, StoreError::CollectionMismatch { expected: "Notes", found: "Settings" }));
    }
}
