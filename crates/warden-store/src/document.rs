//! The generic, backend-independent form of a stored entity.

use serde_json::{Map, Value};

use crate::error::StoreResult;
use crate::model::Model;

/// Storage metadata every entity carries alongside its own fields.
///
/// Typed models embed this as a `#[serde(skip)]` field; the backend
/// conventions decide how (and whether) each part is persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    /// Opaque version token on revisioning backends, `None` elsewhere.
    pub revision: Option<String>,
    /// Soft-delete marker, set just before physical removal.
    pub is_deleted: Option<bool>,
}

/// A materialised entity: identity, metadata and field map.
///
/// Produced by a backend's [`crate::Conventions`] from a raw payload, or by
/// [`Model::to_document`] from a typed model. The field map never contains
/// backend identity or revision fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    collection: &'static str,
    id: String,
    partial_id: String,
    metadata: Metadata,
    fields: Map<String, Value>,
}

impl Document {
    pub fn new(
        collection: &'static str,
        id: String,
        partial_id: String,
        metadata: Metadata,
        fields: Map<String, Value>,
    ) -> Self {
        Self {
            collection,
            id,
            partial_id,
            metadata,
            fields,
        }
    }

    /// Registered collection name, e.g. `Warnings`.
    pub fn collection(&self) -> &'static str {
        self.collection
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn partial_id(&self) -> &str {
        &self.partial_id
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn revision(&self) -> Option<&str> {
        self.metadata.revision.as_deref()
    }

    pub fn set_revision(&mut self, revision: Option<String>) {
        self.metadata.revision = revision;
    }

    pub fn is_deleted(&self) -> bool {
        self.metadata.is_deleted.unwrap_or(false)
    }

    pub fn set_deleted(&mut self, deleted: bool) {
        self.metadata.is_deleted = Some(deleted);
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn into_parts(self) -> (Metadata, Map<String, Value>) {
        (self.metadata, self.fields)
    }

    /// Decode into a typed model of the same collection.
    pub fn into_model<M: Model>(self) -> StoreResult<M> {
        M::from_document(self)
    }
}
