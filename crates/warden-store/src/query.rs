//! Backend-neutral document filters.
//!
//! A [`QuerySpec`] names a collection and a conjunction of predicates.
//! Sessions translate it into their native query language (a MongoDB filter,
//! a CouchDB Mango selector) or, when the backend has no native operator,
//! evaluate it client-side through [`CompiledQuery`].

use regex::Regex;
use serde_json::Value;

use crate::conventions::{Conventions, Payload};
use crate::document::Document;
use crate::error::StoreResult;
use crate::model::Model;
use crate::session::DocumentSession;

/// A single filter predicate. The property `"id"` always means the
/// backend's identity field.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Equals { property: String, value: Value },
    Regex { property: String, pattern: String },
}

impl Predicate {
    pub fn property(&self) -> &str {
        match self {
            Self::Equals { property, .. } | Self::Regex { property, .. } => property,
        }
    }
}

/// A collection plus predicates combined with AND.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySpec {
    collection: String,
    predicates: Vec<Predicate>,
}

impl QuerySpec {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            predicates: Vec::new(),
        }
    }

    pub fn where_equals(mut self, property: impl Into<String>, value: impl Into<Value>) -> Self {
        self.predicates.push(Predicate::Equals {
            property: property.into(),
            value: value.into(),
        });
        self
    }

    pub fn where_regex(mut self, property: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.predicates.push(Predicate::Regex {
            property: property.into(),
            pattern: pattern.into(),
        });
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    /// Compile for client-side evaluation against raw payloads.
    pub fn compile(&self, conventions: &dyn Conventions) -> StoreResult<CompiledQuery> {
        let matchers = self
            .predicates
            .iter()
            .map(|predicate| -> StoreResult<(String, Matcher)> {
                let property = native_property(predicate.property(), conventions).to_string();
                let matcher = match predicate {
                    Predicate::Equals { value, .. } => Matcher::Equals(value.clone()),
                    Predicate::Regex { pattern, .. } => Matcher::Regex(Regex::new(pattern)?),
                };
                Ok((property, matcher))
            })
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(CompiledQuery { matchers })
    }
}

/// Map the generic `"id"` property onto the backend's identity field.
pub fn native_property<'a>(property: &'a str, conventions: &dyn Conventions) -> &'a str {
    if property == "id" {
        conventions.id_field()
    } else {
        property
    }
}

#[derive(Debug)]
enum Matcher {
    Equals(Value),
    Regex(Regex),
}

/// A [`QuerySpec`] ready to test payloads.
#[derive(Debug)]
pub struct CompiledQuery {
    matchers: Vec<(String, Matcher)>,
}

impl CompiledQuery {
    pub fn matches(&self, payload: &Payload) -> bool {
        self.matchers.iter().all(|(property, matcher)| {
            let Some(value) = payload.get(property) else {
                return false;
            };
            match matcher {
                Matcher::Equals(expected) => value == expected,
                Matcher::Regex(regex) => match value {
                    Value::String(text) => regex.is_match(text),
                    Value::Number(number) => regex.is_match(&number.to_string()),
                    _ => false,
                },
            }
        })
    }
}

/// A filtered read bound to an open session.
///
/// ```ignore
/// let warnings = session
///     .query("Warnings")
///     .where_equals("guildId", guild_id)
///     .where_regex("reason", "(?i)spam")
///     .execute()
///     .await?;
/// ```
pub struct DocumentQuery<'q> {
    session: &'q dyn DocumentSession,
    spec: QuerySpec,
}

impl<'q> DocumentQuery<'q> {
    pub(crate) fn new(session: &'q dyn DocumentSession, collection: &str) -> Self {
        Self {
            session,
            spec: QuerySpec::new(collection),
        }
    }

    pub fn where_equals(mut self, property: impl Into<String>, value: impl Into<Value>) -> Self {
        self.spec = self.spec.where_equals(property, value);
        self
    }

    pub fn where_regex(mut self, property: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.spec = self.spec.where_regex(property, pattern);
        self
    }

    pub fn spec(&self) -> &QuerySpec {
        &self.spec
    }

    /// Run the filter and return materialised documents, in backend order.
    pub async fn execute(self) -> StoreResult<Vec<Document>> {
        self.session.find(&self.spec).await
    }

    /// Run the filter and decode every result as `M`.
    pub async fn execute_as<M: Model>(self) -> StoreResult<Vec<M>> {
        self.execute()
            .await?
            .into_iter()
            .map(M::from_document)
            .collect()
    }
}

// ── tests ────────────────────────────────────────────────────────────
