//! The collection registry.
//!
//! Built once at start-up from every entity type the process knows about,
//! then shared read-only (`Arc<CollectionRegistry>`). Generic code uses it to
//! turn a document id back into its collection and to rehydrate a generic
//! [`Document`] into the right concrete [`Model`].
//!
//! ```ignore
//! let registry = CollectionRegistry::builder()
//!     .register::<Guild>()?
//!     .register::<Warning>()?
//!     .build();
//! ```

use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use crate::document::Document;
use crate::error::{StoreError, StoreResult};
use crate::ids::{self, KEY_PARTS, SEPARATOR};
use crate::model::{self, AnyModel, Model};

/// Constructor turning a generic document into its concrete model.
pub type Rehydrate = fn(Document) -> StoreResult<Box<dyn AnyModel>>;

/// One registered collection.
pub struct CollectionEntry {
    name: &'static str,
    key: String,
    id_fields: &'static [&'static str],
    prefetch: bool,
    rehydrate: Rehydrate,
}

impl CollectionEntry {
    /// PascalCase collection name (`EntryRequests`).
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// lowerCamel id prefix (`entryRequests`).
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn id_fields(&self) -> &'static [&'static str] {
        self.id_fields
    }

    pub fn is_prefetched(&self) -> bool {
        self.prefetch
    }

    /// Whether `id` belongs to this collection.
    pub fn owns_id(&self, id: &str) -> bool {
        id.strip_prefix(self.key.as_str())
            .is_some_and(|rest| rest.starts_with(SEPARATOR))
    }

    pub fn rehydrate(&self, document: Document) -> StoreResult<Box<dyn AnyModel>> {
        (self.rehydrate)(document)
    }
}

impl fmt::Debug for CollectionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionEntry")
            .field("name", &self.name)
            .field("id_fields", &self.id_fields)
            .field("prefetch", &self.prefetch)
            .finish_non_exhaustive()
    }
}

/// Immutable table of registered collections, keyed by lowerCamel name.
#[derive(Debug, Default)]
pub struct CollectionRegistry {
    entries: Vec<CollectionEntry>,
    by_key: HashMap<String, usize>,
}

impl CollectionRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Look up a collection by name or id token, case-normalised.
    pub fn resolve(&self, collection: &str) -> StoreResult<&CollectionEntry> {
        let key = ids::lower_camel(collection);
        self.by_key
            .get(&key)
            .map(|&index| &self.entries[index])
            .ok_or(StoreError::UnknownCollection { collection: key })
    }

    pub fn contains(&self, collection: &str) -> bool {
        self.resolve(collection).is_ok()
    }

    pub fn entries(&self) -> impl Iterator<Item = &CollectionEntry> {
        self.entries.iter()
    }

    /// Collections loaded into the cache during setup.
    pub fn hot_collections(&self) -> impl Iterator<Item = &CollectionEntry> {
        self.entries.iter().filter(|entry| entry.prefetch)
    }

    /// Rehydrate a generic document into its registered model type.
    pub fn rehydrate(&self, document: Document) -> StoreResult<Box<dyn AnyModel>> {
        self.resolve(document.collection())?.rehydrate(document)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Collects registrations; every check runs at registration time.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    registry: CollectionRegistry,
}

impl RegistryBuilder {
    /// Register `M`'s collection.
    ///
    /// Fails on a repeated collection name, or when `M::ID_FIELDS` is empty,
    /// names an unrecognised key part, or is out of canonical order.
    pub fn register<M: Model>(mut self) -> StoreResult<Self> {
        let name = M::COLLECTION;
        if name.is_empty() || name.contains(SEPARATOR) {
            return Err(StoreError::InvalidArgument(format!(
                "invalid collection name {name:?}"
            )));
        }
        validate_id_fields(name, M::ID_FIELDS)?;

        let key = ids::lower_camel(name);
        if self.registry.by_key.contains_key(&key) {
            return Err(StoreError::DuplicateCollection {
                collection: name.to_string(),
            });
        }

        debug!(collection = name, id_fields = ?M::ID_FIELDS, prefetch = M::PREFETCH, "collection registered");

        let index = self.registry.entries.len();
        self.registry.by_key.insert(key.clone(), index);
        self.registry.entries.push(CollectionEntry {
            name,
            key,
            id_fields: M::ID_FIELDS,
            prefetch: M::PREFETCH,
            rehydrate: model::rehydrate::<M>,
        });
        Ok(self)
    }

    pub fn build(self) -> CollectionRegistry {
        self.registry
    }
}

fn validate_id_fields(collection: &str, fields: &[&str]) -> StoreResult<()> {
    if fields.is_empty() {
        return Err(StoreError::InvalidArgument(format!(
            "{collection} declares no id fields"
        )));
    }

    let mut last = None;
    for field in fields {
        let Some(position) = KEY_PARTS.iter().position(|part| part == field) else {
            return Err(StoreError::InvalidArgument(format!(
                "{collection} id field `{field}` is not a recognised key part"
            )));
        };
        if last.is_some_and(|previous| previous >= position) {
            return Err(StoreError::InvalidArgument(format!(
                "{collection} id fields are not in canonical order"
            )));
        }
        last = Some(position);
    }
    Ok(())
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::document::Metadata;
    use crate::testing::{self, Note, Settings};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Misordered {
        #[serde(skip)]
        metadata: Metadata,
    }

    impl Model for Misordered {
        const COLLECTION: &'static str = "Misordered";
        const ID_FIELDS: &'static [&'static str] = &["authorId", "guildId"];

        fn metadata(&self) -> &Metadata {
            &self.metadata
        }

        fn metadata_mut(&mut self) -> &mut Metadata {
            &mut self.metadata
        }
    }

    #[test]
    fn resolve_is_case_normalised() {
        let registry = testing::registry();
        assert_eq!(registry.resolve("Notes").unwrap().key(), "notes");
        assert_eq!(registry.resolve("notes").unwrap().name(), "Notes");
        assert!(registry.contains("settings"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let err = CollectionRegistry::builder()
            .register::<Note>()
            .unwrap()
            .register::<Note>()
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateCollection { .. }));
    }

    #[test]
    fn misordered_id_fields_are_rejected() {
        let err = CollectionRegistry::builder().register::<Misordered>().unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
    }

    #[test]
    fn hot_collections_follow_model_flag() {
        let registry = testing::registry();
        let hot: Vec<&str> = registry.hot_collections().map(CollectionEntry::name).collect();
        assert_eq!(hot, vec!["Notes"]);
    }

    #[test]
    fn entry_owns_only_its_ids() {
        let registry = testing::registry();
        let notes = registry.resolve("Notes").unwrap();
        assert!(notes.owns_id("notes/1/2"));
        assert!(!notes.owns_id("notesArchive/1/2"));
        assert!(!notes.owns_id("settings/1"));
    }

    #[test]
    fn rehydrate_produces_concrete_model() {
        let registry = testing::registry();
        let document = Settings::new("9").to_document().unwrap();
        let model = registry.rehydrate(document).unwrap();
        assert_eq!(model.downcast_ref::<Settings>().unwrap().guild_id, "9");
    }
}
