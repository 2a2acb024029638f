//! Per-backend mapping between raw payloads and document metadata.
//!
//! Backends disagree on where identity lives (`_id` or `id`), whether a
//! revision exists at all, and what else they stamp onto a record. A
//! [`Conventions`] implementation hides those differences behind a handful of
//! accessors. A backend without revisions keeps the default no-op accessors
//! instead of faking one.

use std::fmt;

use serde_json::{Map, Value};

use crate::document::{Document, Metadata};
use crate::error::{StoreError, StoreResult};
use crate::ids;
use crate::model::AnyModel;
use crate::registry::CollectionRegistry;

/// Raw backend record.
pub type Payload = Map<String, Value>;

/// Payload field carrying the soft-delete marker on every backend.
pub const IS_DELETED_FIELD: &str = "isDeleted";

pub trait Conventions: Send + Sync + fmt::Debug {
    /// Backend name, for logs.
    fn backend(&self) -> &'static str;

    /// Native identity field.
    fn id_field(&self) -> &'static str;

    /// Native revision field, if the backend has optimistic concurrency.
    fn revision_field(&self) -> Option<&'static str> {
        None
    }

    /// Extra fields this backend stamps onto records besides identity.
    fn extra_metadata_fields(&self) -> &'static [&'static str] {
        &[]
    }

    /// Whether `payload` already carries this backend's identity, i.e. it
    /// came from the backend rather than from a fresh entity.
    fn has_metadata(&self, payload: &Payload) -> bool {
        payload.get(self.id_field()).is_some_and(Value::is_string)
    }

    /// Identity fields to attach to a record before its first write.
    fn build_metadata(&self, id: &str, _collection: &str) -> Payload {
        let mut metadata = Payload::new();
        metadata.insert(self.id_field().to_string(), Value::from(id));
        metadata
    }

    fn id<'p>(&self, payload: &'p Payload) -> Option<&'p str> {
        payload.get(self.id_field()).and_then(Value::as_str)
    }

    fn revision(&self, payload: &Payload) -> Option<String> {
        let field = self.revision_field()?;
        match payload.get(field)? {
            Value::String(revision) => Some(revision.clone()),
            Value::Number(revision) => Some(revision.to_string()),
            _ => None,
        }
    }

    fn set_revision(&self, payload: &mut Payload, revision: Option<&str>) {
        let Some(field) = self.revision_field() else {
            return;
        };
        match revision {
            Some(revision) => payload.insert(field.to_string(), Value::from(revision)),
            None => payload.remove(field),
        };
    }

    fn is_deleted(&self, payload: &Payload) -> Option<bool> {
        payload.get(IS_DELETED_FIELD).and_then(Value::as_bool)
    }

    fn set_is_deleted(&self, payload: &mut Payload, deleted: bool) {
        payload.insert(IS_DELETED_FIELD.to_string(), Value::Bool(deleted));
    }

    /// Full backend record for `document`.
    fn to_payload(&self, document: &Document) -> Payload {
        let mut payload = document.fields().clone();
        payload.extend(self.build_metadata(document.id(), document.collection()));
        self.set_revision(&mut payload, document.revision());
        if let Some(deleted) = document.metadata().is_deleted {
            self.set_is_deleted(&mut payload, deleted);
        }
        payload
    }

    /// Decode a backend record into a generic document.
    ///
    /// The collection comes from the record's id and must be registered.
    fn instantiate(&self, registry: &CollectionRegistry, mut payload: Payload) -> StoreResult<Document> {
        let id = self
            .id(&payload)
            .ok_or_else(|| StoreError::MalformedId {
                id: String::new(),
                reason: "record carries no identity field",
            })?
            .to_string();
        let decoded = ids::get_data_from_id(registry, &id)?;
        let collection = decoded.collection.name();
        let partial_id = decoded.partial_id();

        let metadata = Metadata {
            revision: self.revision(&payload),
            is_deleted: self.is_deleted(&payload),
        };

        payload.remove(self.id_field());
        payload.remove(IS_DELETED_FIELD);
        if let Some(field) = self.revision_field() {
            payload.remove(field);
        }
        for field in self.extra_metadata_fields() {
            payload.remove(*field);
        }

        Ok(Document::new(collection, id, partial_id, metadata, payload))
    }

    /// Decode a backend record straight into its concrete model.
    fn instantiate_model(
        &self,
        registry: &CollectionRegistry,
        payload: Payload,
    ) -> StoreResult<Box<dyn AnyModel>> {
        let document = self.instantiate(registry, payload)?;
        registry.rehydrate(document)
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::model::Model;
    use crate::testing::{self, Note};

    #[derive(Debug)]
    struct Plain;

    impl Conventions for Plain {
        fn backend(&self) -> &'static str {
            "plain"
        }

        fn id_field(&self) -> &'static str {
            "id"
        }
    }

    #[derive(Debug)]
    struct Revisioned;

    impl Conventions for Revisioned {
        fn backend(&self) -> &'static str {
            "revisioned"
        }

        fn id_field(&self) -> &'static str {
            "_id"
        }

        fn revision_field(&self) -> Option<&'static str> {
            Some("_rev")
        }
    }

    fn payload(value: Value) -> Payload {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn has_metadata_checks_identity_field() {
        assert!(Plain.has_metadata(&payload(json!({"id": "notes/1/2"}))));
        assert!(!Plain.has_metadata(&payload(json!({"guildId": "1"}))));
        assert!(!Revisioned.has_metadata(&payload(json!({"id": "notes/1/2"}))));
    }

    #[test]
    fn revision_accessors_are_noops_without_revisions() {
        let mut record = payload(json!({"id": "notes/1/2"}));
        Plain.set_revision(&mut record, Some("7"));
        assert_eq!(Plain.revision(&record), None);
        assert!(!record.contains_key("_rev"));

        Revisioned.set_revision(&mut record, Some("7-abc"));
        assert_eq!(Revisioned.revision(&record), Some("7-abc".to_string()));
    }

    #[test]
    fn payload_round_trip_strips_metadata() {
        let registry = testing::registry();
        let mut note = Note::new("1", "2", "hi");
        note.metadata_mut().revision = Some("1-a".into());
        note.metadata_mut().is_deleted = Some(true);

        let record = Revisioned.to_payload(&note.to_document().unwrap());
        assert_eq!(record["_id"], "notes/1/2");
        assert_eq!(record["_rev"], "1-a");
        assert_eq!(record[IS_DELETED_FIELD], true);

        let document = Revisioned.instantiate(&registry, record).unwrap();
        assert_eq!(document.collection(), "Notes");
        assert_eq!(document.partial_id(), "1/2");
        assert_eq!(document.revision(), Some("1-a"));
        assert!(document.is_deleted());
        assert!(!document.fields().contains_key("_id"));
        assert!(!document.fields().contains_key("_rev"));
    }

    #[test]
    fn instantiate_rejects_unknown_collections() {
        let registry = testing::registry();
        let record = payload(json!({"id": "tickets/1/2/3"}));
        assert!(matches!(
            Plain.instantiate(&registry, record),
            Err(StoreError::UnknownCollection { .. })
        ));
    }

    #[test]
    fn instantiate_model_uses_registry_constructor() {
        let registry = testing::registry();
        let record = payload(json!({"id": "notes/4/5", "guildId": "4", "authorId": "5", "text": "x"}));
        let model = Plain.instantiate_model(&registry, record).unwrap();
        assert_eq!(model.downcast_ref::<Note>().unwrap().text, "x");
    }
}
