//! Composite document identifiers.
//!
//! Every document id has the shape `<collection><SEP><part1><SEP>...<partN>`
//! where the collection is written in lowerCamel case and the key parts
//! follow a single canonical order shared by all collections. This format is
//! the on-disk identity in every backend, so it must stay bit-exact.
//!
//! ```text
//! warnings/123456789/42/77/1717171717000
//! └──┬───┘ └───────────────┬───────────┘
//! collection          partial id
//! ```

use crate::error::{StoreError, StoreResult};
use crate::registry::{CollectionEntry, CollectionRegistry};

/// Separator between the collection token and each key part.
pub const SEPARATOR: char = '/';

/// Every recognised key-part name, in canonical order.
///
/// Partial ids are always built in this order, whatever order the caller
/// supplies the parts in. Names outside this list are ignored.
pub const KEY_PARTS: &[&str] = &[
    "guildId",
    "userId",
    "authorId",
    "targetId",
    "channelId",
    "createdAt",
];

/// Lower-case the first character of a collection name (`EntryRequests` →
/// `entryRequests`).
pub fn lower_camel(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Join the recognised key parts of `data` in canonical order.
pub fn build_partial_id<K, V>(data: &[(K, V)]) -> StoreResult<String>
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut parts = Vec::with_capacity(data.len());
    for &name in KEY_PARTS {
        let Some((_, value)) = data.iter().find(|(key, _)| key.as_ref() == name) else {
            continue;
        };
        let value = value.as_ref();
        if value.is_empty() || value.contains(SEPARATOR) {
            return Err(StoreError::InvalidKeyPart {
                name: name.to_string(),
                value: value.to_string(),
            });
        }
        parts.push(value);
    }

    if parts.is_empty() {
        return Err(StoreError::InvalidArgument(
            "a document id needs at least one recognised key part".into(),
        ));
    }

    Ok(parts.join(&SEPARATOR.to_string()))
}

/// Build the full document id for `data` within `collection`.
pub fn build_id<K, V>(data: &[(K, V)], collection: &str) -> StoreResult<String>
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let partial_id = build_partial_id(data)?;
    Ok(format!("{}{SEPARATOR}{partial_id}", lower_camel(collection)))
}

/// Split an id into its raw collection token and key parts without
/// consulting a registry.
pub fn split_id(id: &str) -> StoreResult<(&str, Vec<&str>)> {
    let malformed = |reason| StoreError::MalformedId {
        id: id.to_string(),
        reason,
    };

    let mut tokens = id.split(SEPARATOR);
    let collection = tokens
        .next()
        .filter(|token| !token.is_empty())
        .ok_or_else(|| malformed("missing collection token"))?;
    let parts: Vec<&str> = tokens.collect();

    if parts.is_empty() {
        return Err(malformed("no key parts"));
    }
    if parts.iter().any(|part| part.is_empty()) {
        return Err(malformed("empty key part"));
    }

    Ok((collection, parts))
}

/// A document id decoded against a registry.
#[derive(Debug, Clone)]
pub struct DecodedId<'r> {
    pub collection: &'r CollectionEntry,
    pub parts: Vec<String>,
}

impl DecodedId<'_> {
    /// The key parts rejoined with the separator.
    pub fn partial_id(&self) -> String {
        self.parts.join(&SEPARATOR.to_string())
    }

    /// The key parts zipped with the collection's id field names.
    pub fn data(&self) -> Vec<(&'static str, &str)> {
        self.collection
            .id_fields()
            .iter()
            .copied()
            .zip(self.parts.iter().map(String::as_str))
            .collect()
    }
}

/// Decode `id` into its registered collection and ordered key parts.
///
/// Fails with [`StoreError::UnknownCollection`] when the collection token is
/// not registered, and with [`StoreError::MalformedId`] when the number of
/// key parts does not match the collection's id fields.
pub fn get_data_from_id<'r>(registry: &'r CollectionRegistry, id: &str) -> StoreResult<DecodedId<'r>> {
    let (token, parts) = split_id(id)?;
    let collection = registry.resolve(token)?;

    if parts.len() != collection.id_fields().len() {
        return Err(StoreError::MalformedId {
            id: id.to_string(),
            reason: "key part count does not match the collection",
        });
    }

    Ok(DecodedId {
        collection,
        parts: parts.into_iter().map(str::to_string).collect(),
    })
}

/// Decode `id` into its registered collection and partial id.
pub fn decompose_id<'r>(
    registry: &'r CollectionRegistry,
    id: &str,
) -> StoreResult<(&'r CollectionEntry, String)> {
    let decoded = get_data_from_id(registry, id)?;
    let partial_id = decoded.partial_id();
    Ok((decoded.collection, partial_id))
}

// ── tests ────────────────────────────────────────────────────────────
