//! The per-operation unit of work against one backend.
//!
//! A session is opened by an adapter, used for one logical operation and
//! disposed afterwards; [`crate::DatabaseStore::with_session`] guarantees the
//! disposal. Sessions are never shared between concurrent operations.

use async_trait::async_trait;
use futures::future::try_join_all;

use crate::conventions::Conventions;
use crate::document::Document;
use crate::error::StoreResult;
use crate::model::WriteOutcome;
use crate::query::{DocumentQuery, QuerySpec};
use crate::registry::CollectionRegistry;

/// Ids loaded concurrently per batch by the tabulated `load_many` fallback.
pub const LOAD_MANY_BATCH_SIZE: usize = 20;

#[async_trait]
pub trait DocumentSession: Send + Sync {
    fn registry(&self) -> &CollectionRegistry;

    fn conventions(&self) -> &dyn Conventions;

    /// Fetch one document. `Ok(None)` when the backend reports not-found.
    async fn load(&self, id: &str) -> StoreResult<Option<Document>>;

    /// Fetch several documents, position for position with `ids`.
    ///
    /// The default is the tabulated fallback for backends without a native
    /// multi-get; see [`load_tabulated`].
    async fn load_many(&self, ids: &[String]) -> StoreResult<Vec<Option<Document>>> {
        load_tabulated(self, ids).await
    }

    /// Upsert `document`. Revisioning backends send the current revision as
    /// a precondition and write the new one back into `document`.
    async fn store(&self, document: &mut Document) -> StoreResult<WriteOutcome>;

    /// Physically remove `document`. Removing an absent document succeeds;
    /// revisioning backends answer `Conflict` when the record moved on.
    async fn remove(&self, document: &Document) -> StoreResult<WriteOutcome>;

    /// Execute a filter; results are materialised, in backend order.
    async fn find(&self, query: &QuerySpec) -> StoreResult<Vec<Document>>;

    /// Release backend resources held by this session.
    async fn dispose(&mut self) -> StoreResult<()> {
        Ok(())
    }
}

impl<'a> dyn DocumentSession + 'a {
    /// Begin a filtered read over `collection`.
    pub fn query(&self, collection: &str) -> DocumentQuery<'_> {
        DocumentQuery::new(self, collection)
    }
}

/// Load `ids` in batches of [`LOAD_MANY_BATCH_SIZE`], each batch in
/// parallel, and reassemble the results in request order.
pub async fn load_tabulated<S>(session: &S, ids: &[String]) -> StoreResult<Vec<Option<Document>>>
where
    S: DocumentSession + ?Sized,
{
    let mut documents = Vec::with_capacity(ids.len());
    for batch in ids.chunks(LOAD_MANY_BATCH_SIZE) {
        let loaded = try_join_all(batch.iter().map(|id| session.load(id))).await?;
        documents.extend(loaded);
    }
    Ok(documents)
}
