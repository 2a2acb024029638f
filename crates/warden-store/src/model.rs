//! The entity contract shared by every persisted collection.
//!
//! A [`Model`] is a plain serde struct plus a little static information:
//! its collection name, which of its fields form the document id, and
//! whether the collection is hot enough to prefetch at start-up. Identity,
//! conversion to and from [`Document`], and the create/update/delete
//! lifecycle are provided on top of that.
//!
//! ```ignore
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! #[serde(rename_all = "camelCase")]
//! struct Warning {
//!     guild_id: String,
//!     author_id: String,
//!     target_id: String,
//!     created_at: i64,
//!     reason: String,
//!     #[serde(skip)]
//!     metadata: Metadata,
//! }
//!
//! impl Model for Warning {
//!     const COLLECTION: &'static str = "Warnings";
//!     const ID_FIELDS: &'static [&'static str] = &["guildId", "authorId", "targetId", "createdAt"];
//!     fn metadata(&self) -> &Metadata { &self.metadata }
//!     fn metadata_mut(&mut self) -> &mut Metadata { &mut self.metadata }
//! }
//! ```

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::database::DatabaseStore;
use crate::document::{Document, Metadata};
use crate::error::{StoreError, StoreResult};
use crate::ids::{self, SEPARATOR};
use crate::query::QuerySpec;

// ── write outcome ────────────────────────────────────────────────────

/// Result of a write that reached the backend.
///
/// A conflict means another writer stored a newer revision first. It is
/// logged and reported here instead of failing the call; callers may reload
/// and retry, or ignore it.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Stored,
    Conflict,
}

impl WriteOutcome {
    pub fn is_stored(self) -> bool {
        self == Self::Stored
    }

    pub fn is_conflict(self) -> bool {
        self == Self::Conflict
    }
}

// ── model ────────────────────────────────────────────────────────────

/// A persisted entity type.
pub trait Model: Serialize + DeserializeOwned + Clone + fmt::Debug + Send + Sync + 'static {
    /// Collection name, PascalCase plural (`EntryRequests`).
    const COLLECTION: &'static str;

    /// Serialized field names forming the id, in canonical order.
    const ID_FIELDS: &'static [&'static str];

    /// Whether the collection is loaded into the cache during setup.
    const PREFETCH: bool = false;

    fn metadata(&self) -> &Metadata;

    fn metadata_mut(&mut self) -> &mut Metadata;

    /// `(name, value)` pairs for each id field, read from the serialized form.
    fn id_data(&self) -> StoreResult<Vec<(&'static str, String)>> {
        let value = serde_json::to_value(self)?;
        Self::ID_FIELDS
            .iter()
            .map(|&name| {
                let part = match value.get(name) {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Number(n)) => n.to_string(),
                    _ => {
                        return Err(StoreError::MissingKeyPart {
                            collection: Self::COLLECTION,
                            name,
                        });
                    }
                };
                Ok((name, part))
            })
            .collect()
    }

    fn partial_id(&self) -> StoreResult<String> {
        ids::build_partial_id(&self.id_data()?)
    }

    fn id(&self) -> StoreResult<String> {
        ids::build_id(&self.id_data()?, Self::COLLECTION)
    }

    fn revision(&self) -> Option<&str> {
        self.metadata().revision.as_deref()
    }

    fn is_deleted(&self) -> bool {
        self.metadata().is_deleted.unwrap_or(false)
    }

    /// Rebuild a typed model from a generic document of this collection.
    fn from_document(document: Document) -> StoreResult<Self> {
        if document.collection() != Self::COLLECTION {
            return Err(StoreError::CollectionMismatch {
                expected: Self::COLLECTION,
                found: document.collection(),
            });
        }

        let (metadata, fields) = document.into_parts();
        let mut model: Self = serde_json::from_value(Value::Object(fields))?;
        *model.metadata_mut() = metadata;
        Ok(model)
    }

    fn to_document(&self) -> StoreResult<Document> {
        let partial_id = self.partial_id()?;
        let id = format!("{}{SEPARATOR}{partial_id}", ids::lower_camel(Self::COLLECTION));
        let fields = match serde_json::to_value(self)? {
            Value::Object(fields) => fields,
            other => {
                return Err(StoreError::InvalidArgument(format!(
                    "{} serialized to a non-object: {other}",
                    Self::COLLECTION
                )));
            }
        };

        Ok(Document::new(
            Self::COLLECTION,
            id,
            partial_id,
            self.metadata().clone(),
            fields,
        ))
    }

    /// An empty query over this collection.
    fn query() -> QuerySpec {
        QuerySpec::new(Self::COLLECTION)
    }

    // ── lifecycle, delegated to the store ───────────────────────────

    /// Fetch by id data, consulting the cache before any backend call.
    fn get(
        db: &DatabaseStore,
        data: &[(&str, &str)],
    ) -> impl Future<Output = StoreResult<Option<Self>>> + Send {
        db.get::<Self>(data)
    }

    /// Fetch by id data, creating the document with `make` when absent.
    fn get_or_create<F>(
        db: &DatabaseStore,
        data: &[(&str, &str)],
        make: F,
    ) -> impl Future<Output = StoreResult<Self>> + Send
    where
        F: FnOnce() -> Self + Send,
    {
        db.get_or_create::<Self, F>(data, make)
    }

    /// Run `query` and return every matching entity.
    fn all(db: &DatabaseStore, query: QuerySpec) -> impl Future<Output = StoreResult<Vec<Self>>> + Send {
        db.all::<Self>(query)
    }

    /// Persist a new entity.
    fn create(&mut self, db: &DatabaseStore) -> impl Future<Output = StoreResult<WriteOutcome>> + Send {
        db.insert(self)
    }

    /// Apply `mutate` and persist. `self` only changes if the write lands.
    fn update<F>(
        &mut self,
        db: &DatabaseStore,
        mutate: F,
    ) -> impl Future<Output = StoreResult<WriteOutcome>> + Send
    where
        F: FnOnce(&mut Self) + Send,
    {
        db.update(self, mutate)
    }

    /// Flag as deleted, then remove.
    fn delete(&mut self, db: &DatabaseStore) -> impl Future<Output = StoreResult<WriteOutcome>> + Send {
        db.delete(self)
    }
}

// ── type erasure ─────────────────────────────────────────────────────

/// Object-safe view of any [`Model`], produced by registry rehydration.
pub trait AnyModel: Any + Send + Sync + fmt::Debug {
    fn collection_name(&self) -> &'static str;

    fn as_document(&self) -> StoreResult<Document>;

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync>;
}

impl<M: Model> AnyModel for M {
    fn collection_name(&self) -> &'static str {
        M::COLLECTION
    }

    fn as_document(&self) -> StoreResult<Document> {
        self.to_document()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync> {
        self
    }
}

impl dyn AnyModel {
    pub fn downcast_ref<M: Model>(&self) -> Option<&M> {
        self.as_any().downcast_ref::<M>()
    }

    pub fn downcast<M: Model>(self: Box<Self>) -> Option<M> {
        self.into_any().downcast::<M>().ok().map(|model| *model)
    }
}

/// Registry constructor for `M`.
pub(crate) fn rehydrate<M: Model>(document: Document) -> StoreResult<Box<dyn AnyModel>> {
    Ok(Box::new(M::from_document(document)?))
}

// ── rate limits ──────────────────────────────────────────────────────

/// At most `uses` events within the trailing `within` window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub uses: usize,
    pub within: Duration,
}

impl RateLimit {
    pub const fn new(uses: usize, within: Duration) -> Self {
        Self { uses, within }
    }
}

/// An entity with a creation time.
pub trait Timestamped {
    fn created_at(&self) -> DateTime<Utc>;
}

/// Whether `entities` already exhaust `limit` as of now.
pub fn crosses_rate_limit<T: Timestamped>(entities: &[T], limit: RateLimit) -> bool {
    crosses_rate_limit_at(entities, limit, Utc::now())
}

/// Whether `entities` exhaust `limit` as of `now`.
///
/// Only the `uses` most recent events are considered, and the limit is
/// crossed when the oldest of them still falls inside the window. Events
/// older than the window never count, however many there are.
pub fn crosses_rate_limit_at<T: Timestamped>(
    entities: &[T],
    limit: RateLimit,
    now: DateTime<Utc>,
) -> bool {
    if limit.uses == 0 {
        return false;
    }

    let mut timestamps: Vec<DateTime<Utc>> = entities.iter().map(Timestamped::created_at).collect();
    timestamps.sort_unstable_by(|a, b| b.cmp(a));

    let Some(&oldest_counted) = timestamps.get(limit.uses - 1) else {
        return false;
    };

    let window = TimeDelta::from_std(limit.within).unwrap_or(TimeDelta::MAX);
    now - oldest_counted <= window
}

// ── tests ────────────────────────────────────────────────────────────
