//! MongoDB backend over the official driver.
//!
//! One MongoDB collection per registered collection, named after it
//! (`Warnings`, `EntryRequests`). The composite id is stored as `_id`.
//! MongoDB has no revision token here: writes are plain upserts.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{self, Bson, Document as BsonDocument, doc};
use mongodb::options::{ClientOptions, Credential, ServerAddress};
use mongodb::{Client, Collection};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::adapter::{Backend, DatabaseAdapter};
use crate::config::DatabaseConfig;
use crate::conventions::{Conventions, Payload};
use crate::document::Document;
use crate::error::{StoreError, StoreResult};
use crate::ids;
use crate::model::WriteOutcome;
use crate::query::{Predicate, QuerySpec, native_property};
use crate::registry::CollectionRegistry;
use crate::session::DocumentSession;

/// `_id` identity, no revisions.
#[derive(Debug, Clone, Copy, Default)]
pub struct MongoConventions;

impl Conventions for MongoConventions {
    fn backend(&self) -> &'static str {
        "mongodb"
    }

    fn id_field(&self) -> &'static str {
        "_id"
    }
}

pub struct MongoAdapter {
    host: String,
    port: u16,
    credentials: Option<(String, String)>,
    database: String,
    client: RwLock<Option<Client>>,
}

impl MongoAdapter {
    fn client_options(&self) -> StoreResult<ClientOptions> {
        let address = format!("{}:{}", self.host, self.port);
        let mut options = ClientOptions::default();
        options.hosts = vec![
            ServerAddress::parse(&address)
                .map_err(|e| StoreError::Config(format!("invalid mongodb address {address}: {e}")))?,
        ];
        options.app_name = Some("warden".into());

        if let Some((username, password)) = &self.credentials {
            let mut credential = Credential::default();
            credential.username = Some(username.clone());
            credential.password = Some(password.clone());
            options.credential = Some(credential);
        }

        Ok(options)
    }
}

#[async_trait]
impl DatabaseAdapter for MongoAdapter {
    fn backend(&self) -> Backend {
        Backend::MongoDb
    }

    fn try_create(config: &DatabaseConfig) -> Option<Self> {
        let mongo = &config.mongodb;
        let (Some(host), Some(port), Some(database)) = (&mongo.host, mongo.port, &mongo.database)
        else {
            warn!("mongodb backend selected but host, port or database is missing");
            return None;
        };

        let credentials = match (&mongo.username, &mongo.password) {
            (Some(username), Some(password)) => Some((username.clone(), password.clone())),
            (None, None) => None,
            _ => {
                warn!("mongodb username and password must be set together");
                return None;
            }
        };

        Some(Self {
            host: host.clone(),
            port,
            credentials,
            database: database.clone(),
            client: RwLock::new(None),
        })
    }

    async fn start(&self) -> StoreResult<()> {
        let mut client = self.client.write().await;
        if client.is_some() {
            return Ok(());
        }

        let target = format!("{}:{}/{}", self.host, self.port, self.database);
        let connected = Client::with_options(self.client_options()?)
            .map_err(|e| StoreError::backend("connect", target.clone(), e))?;
        connected
            .database(&self.database)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| StoreError::backend("ping", target.clone(), e))?;

        *client = Some(connected);
        info!(target = %target, "mongodb adapter started");
        Ok(())
    }

    async fn stop(&self) -> StoreResult<()> {
        if let Some(client) = self.client.write().await.take() {
            client.shutdown().await;
            info!("mongodb adapter stopped");
        }
        Ok(())
    }

    fn conventions(&self) -> &dyn Conventions {
        &MongoConventions
    }

    async fn open_session(
        &self,
        registry: Arc<CollectionRegistry>,
    ) -> StoreResult<Box<dyn DocumentSession>> {
        let client = self
            .client
            .read()
            .await
            .clone()
            .ok_or(StoreError::NotStarted { backend: "mongodb" })?;
        Ok(Box::new(MongoSession {
            database: client.database(&self.database),
            registry,
        }))
    }
}

struct MongoSession {
    database: mongodb::Database,
    registry: Arc<CollectionRegistry>,
}

impl MongoSession {
    fn collection(&self, name: &str) -> Collection<BsonDocument> {
        self.database.collection(name)
    }

    fn decode(&self, raw: BsonDocument) -> StoreResult<Document> {
        MongoConventions.instantiate(&self.registry, to_payload(raw)?)
    }
}

// ── bson translation ─────────────────────────────────────────────────

fn encoding(err: impl std::fmt::Display) -> StoreError {
    StoreError::Encoding {
        backend: "mongodb",
        message: err.to_string(),
    }
}

fn to_bson_document(payload: &Payload) -> StoreResult<BsonDocument> {
    bson::to_document(payload).map_err(encoding)
}

fn to_payload(raw: BsonDocument) -> StoreResult<Payload> {
    match Bson::Document(raw).into_relaxed_extjson() {
        Value::Object(payload) => Ok(payload),
        other => Err(encoding(format!("expected an object, got {other}"))),
    }
}

/// Translate a query into a MongoDB filter document.
fn filter_for(query: &QuerySpec) -> StoreResult<BsonDocument> {
    let mut clauses = Vec::with_capacity(query.predicates().len());
    for predicate in query.predicates() {
        let property = native_property(predicate.property(), &MongoConventions);
        let mut clause = BsonDocument::new();
        match predicate {
            Predicate::Equals { value, .. } => {
                clause.insert(property, bson::to_bson(value).map_err(encoding)?);
            }
            Predicate::Regex { pattern, .. } => {
                clause.insert(property, doc! { "$regex": pattern.as_str() });
            }
        }
        clauses.push(clause);
    }

    Ok(match clauses.len() {
        0 => BsonDocument::new(),
        1 => clauses.remove(0),
        _ => doc! { "$and": clauses },
    })
}

#[async_trait]
impl DocumentSession for MongoSession {
    fn registry(&self) -> &CollectionRegistry {
        &self.registry
    }

    fn conventions(&self) -> &dyn Conventions {
        &MongoConventions
    }

    #[instrument(skip(self))]
    async fn load(&self, id: &str) -> StoreResult<Option<Document>> {
        let (entry, _) = ids::decompose_id(&self.registry, id)?;
        let raw = self
            .collection(entry.name())
            .find_one(doc! { "_id": id })
            .await
            .map_err(|e| StoreError::backend("find_one", id, e))?;
        raw.map(|raw| self.decode(raw)).transpose()
    }

    /// One `$in` query per collection touched, reassembled in request order.
    #[instrument(skip(self, requested), fields(count = requested.len()))]
    async fn load_many(&self, requested: &[String]) -> StoreResult<Vec<Option<Document>>> {
        let mut by_collection: HashMap<&'static str, Vec<&str>> = HashMap::new();
        for id in requested {
            let (entry, _) = ids::decompose_id(&self.registry, id)?;
            by_collection.entry(entry.name()).or_default().push(id);
        }

        let mut found: HashMap<String, Document> = HashMap::with_capacity(requested.len());
        for (collection, wanted) in by_collection {
            let raws: Vec<BsonDocument> = self
                .collection(collection)
                .find(doc! { "_id": { "$in": wanted } })
                .await
                .map_err(|e| StoreError::backend("find", collection, e))?
                .try_collect()
                .await
                .map_err(|e| StoreError::backend("find", collection, e))?;
            for raw in raws {
                let document = self.decode(raw)?;
                found.insert(document.id().to_string(), document);
            }
        }

        Ok(requested.iter().map(|id| found.get(id).cloned()).collect())
    }

    #[instrument(skip(self, document), fields(id = %document.id()))]
    async fn store(&self, document: &mut Document) -> StoreResult<WriteOutcome> {
        let replacement = to_bson_document(&MongoConventions.to_payload(document))?;
        let result = self
            .collection(document.collection())
            .replace_one(doc! { "_id": document.id() }, replacement)
            .upsert(true)
            .await
            .map_err(|e| StoreError::backend("replace_one", document.id(), e))?;
        debug!(
            matched = result.matched_count,
            upserted = result.upserted_id.is_some(),
            "document stored"
        );
        Ok(WriteOutcome::Stored)
    }

    #[instrument(skip(self, document), fields(id = %document.id()))]
    async fn remove(&self, document: &Document) -> StoreResult<WriteOutcome> {
        let result = self
            .collection(document.collection())
            .delete_one(doc! { "_id": document.id() })
            .await
            .map_err(|e| StoreError::backend("delete_one", document.id(), e))?;
        debug!(deleted = result.deleted_count, "document removed");
        Ok(WriteOutcome::Stored)
    }

    #[instrument(skip(self, query), fields(collection = query.collection()))]
    async fn find(&self, query: &QuerySpec) -> StoreResult<Vec<Document>> {
        let collection = self.registry.resolve(query.collection())?.name();
        let filter = filter_for(query)?;
        let raws: Vec<BsonDocument> = self
            .collection(collection)
            .find(filter)
            .await
            .map_err(|e| StoreError::backend("find", collection, e))?
            .try_collect()
            .await
            .map_err(|e| StoreError::backend("find", collection, e))?;

        debug!(matched = raws.len(), "query executed");
        raws.into_iter().map(|raw| self.decode(raw)).collect()
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::model::Model;
    use crate::testing::{self, Note};

    fn config() -> DatabaseConfig {
        let mut config = DatabaseConfig::default();
        config.apply_vars([
            ("MONGODB_HOST", "localhost"),
            ("MONGODB_PORT", "27017"),
            ("MONGODB_DATABASE", "warden"),
        ]);
        config
    }

    #[test]
    fn try_create_requires_host_port_and_database() {
        assert!(MongoAdapter::try_create(&DatabaseConfig::default()).is_none());
        assert!(MongoAdapter::try_create(&config()).is_some());

        let mut half_credentials = config();
        half_credentials.mongodb.username = Some("warden".into());
        assert!(MongoAdapter::try_create(&half_credentials).is_none());
    }

    #[test]
    fn client_options_carry_credentials() {
        let mut config = config();
        config.mongodb.username = Some("warden".into());
        config.mongodb.password = Some("secret".into());

        let options = MongoAdapter::try_create(&config).unwrap().client_options().unwrap();
        assert_eq!(options.hosts.len(), 1);
        let credential = options.credential.unwrap();
        assert_eq!(credential.username.as_deref(), Some("warden"));
    }

    #[tokio::test]
    async fn session_before_start_fails() {
        let adapter = MongoAdapter::try_create(&config()).unwrap();
        let err = adapter
            .open_session(Arc::new(testing::registry()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, StoreError::NotStarted { backend: "mongodb" }));
    }

    #[test]
    fn empty_query_is_an_empty_filter() {
        assert_eq!(filter_for(&QuerySpec::new("Notes")).unwrap(), BsonDocument::new());
    }

    #[test]
    fn single_predicate_is_not_wrapped() {
        let filter = filter_for(&QuerySpec::new("Notes").where_equals("guildId", "1")).unwrap();
        assert_eq!(filter, doc! { "guildId": "1" });
    }

    #[test]
    fn predicates_translate_to_and_with_native_id() {
        let query = QuerySpec::new("Notes")
            .where_equals("guildId", "1")
            .where_regex("id", "^notes/1/");
        let filter = filter_for(&query).unwrap();
        assert_eq!(
            filter,
            doc! { "$and": [ { "guildId": "1" }, { "_id": { "$regex": "^notes/1/" } } ] }
        );
    }

    #[test]
    fn payload_round_trips_through_bson() {
        let registry = testing::registry();
        let document = Note::new("1", "2", "hi").to_document().unwrap();

        let raw = to_bson_document(&MongoConventions.to_payload(&document)).unwrap();
        assert_eq!(raw.get_str("_id").unwrap(), "notes/1/2");

        let payload = to_payload(raw).unwrap();
        assert_eq!(payload["text"], json!("hi"));
        let decoded = MongoConventions.instantiate(&registry, payload).unwrap();
        assert_eq!(decoded, document);
    }
}
