//! CouchDB backend over its HTTP API.
//!
//! All collections share one CouchDB database; each record carries a
//! `collection` field so Mango queries can scope to one collection. CouchDB
//! revisions (`_rev`) give optimistic concurrency: a write based on a stale
//! revision is answered with `409 Conflict`.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::adapter::{Backend, DatabaseAdapter};
use crate::config::DatabaseConfig;
use crate::conventions::{Conventions, Payload};
use crate::document::Document;
use crate::error::{StoreError, StoreResult};
use crate::model::WriteOutcome;
use crate::query::{Predicate, QuerySpec, native_property};
use crate::registry::CollectionRegistry;
use crate::session::DocumentSession;

/// Documents requested per `_find` page.
const FIND_PAGE_SIZE: usize = 500;

/// Record field naming the collection a CouchDB document belongs to.
const COLLECTION_FIELD: &str = "collection";

/// `_id` identity, server-issued `_rev`, plus the `collection` marker.
#[derive(Debug, Clone, Copy, Default)]
pub struct CouchConventions;

impl Conventions for CouchConventions {
    fn backend(&self) -> &'static str {
        "couchdb"
    }

    fn id_field(&self) -> &'static str {
        "_id"
    }

    fn revision_field(&self) -> Option<&'static str> {
        Some("_rev")
    }

    fn extra_metadata_fields(&self) -> &'static [&'static str] {
        &[COLLECTION_FIELD]
    }

    fn build_metadata(&self, id: &str, collection: &str) -> Payload {
        let mut metadata = Payload::new();
        metadata.insert("_id".into(), Value::from(id));
        metadata.insert(COLLECTION_FIELD.into(), Value::from(collection));
        metadata
    }
}

// ── adapter ──────────────────────────────────────────────────────────

pub struct CouchAdapter {
    database_url: Url,
    username: String,
    password: String,
    client: RwLock<Option<Arc<CouchClient>>>,
}

impl CouchAdapter {
    /// The database endpoint, e.g. `http://127.0.0.1:5984/warden`.
    pub fn database_url(&self) -> &Url {
        &self.database_url
    }
}

#[async_trait]
impl DatabaseAdapter for CouchAdapter {
    fn backend(&self) -> Backend {
        Backend::CouchDb
    }

    fn try_create(config: &DatabaseConfig) -> Option<Self> {
        let couch = &config.couchdb;
        let (Some(host), Some(port), Some(username), Some(password), Some(database)) = (
            &couch.host,
            couch.port,
            &couch.username,
            &couch.password,
            &couch.database,
        ) else {
            warn!("couchdb backend selected but host, port, credentials or database is missing");
            return None;
        };

        let protocol = couch.protocol.as_deref().unwrap_or("http");
        if protocol != "http" && protocol != "https" {
            warn!(protocol, "unsupported couchdb protocol");
            return None;
        }

        let mut database_url = match Url::parse(&format!("{protocol}://{host}:{port}/")) {
            Ok(url) => url,
            Err(err) => {
                warn!(%err, host, "invalid couchdb address");
                return None;
            }
        };
        database_url.path_segments_mut().ok()?.pop_if_empty().push(database);

        Some(Self {
            database_url,
            username: username.clone(),
            password: password.clone(),
            client: RwLock::new(None),
        })
    }

    async fn start(&self) -> StoreResult<()> {
        let mut client = self.client.write().await;
        if client.is_some() {
            return Ok(());
        }

        let http = reqwest::Client::builder()
            .user_agent(concat!("warden/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StoreError::backend("connect", self.database_url.as_str(), e))?;
        let connected = CouchClient {
            http,
            database_url: self.database_url.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
        };

        // Creating an existing database answers 412, which is fine.
        let target = self.database_url.to_string();
        let (status, body) = connected
            .send(connected.request(Method::PUT, self.database_url.clone()), "create database", &target)
            .await?;
        match status {
            StatusCode::CREATED | StatusCode::ACCEPTED => info!(database = %target, "couchdb database created"),
            StatusCode::PRECONDITION_FAILED => debug!(database = %target, "couchdb database exists"),
            _ => return Err(failure("create database", &target, status, &body)),
        }

        *client = Some(Arc::new(connected));
        info!(database = %target, "couchdb adapter started");
        Ok(())
    }

    async fn stop(&self) -> StoreResult<()> {
        // Idle connections are released once the last session drops the client.
        if self.client.write().await.take().is_some() {
            info!("couchdb adapter stopped");
        }
        Ok(())
    }

    fn conventions(&self) -> &dyn Conventions {
        &CouchConventions
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
            .ok_or(StoreError::NotStarted { backend: "couchdb" })?;
        Ok(Box::new(CouchSession { client, registry }))
    }
}

// ── http client ──────────────────────────────────────────────────────

struct CouchClient {
    http: reqwest::Client,
    database_url: Url,
    username: String,
    password: String,
}

impl CouchClient {
    /// The database URL extended by `segments`, each percent-encoded whole.
    fn url(&self, segments: &[&str]) -> StoreResult<Url> {
        endpoint(&self.database_url, segments)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http
            .request(method, url)
            .basic_auth(&self.username, Some(&self.password))
            .header("Accept", "application/json")
    }

    /// Send and decode the JSON body. Status handling is left to the caller.
    async fn send(
        &self,
        request: RequestBuilder,
        operation: &'static str,
        target: &str,
    ) -> StoreResult<(StatusCode, Value)> {
        let response = request
            .send()
            .await
            .map_err(|e| StoreError::backend(operation, target, e))?;
        let status = response.status();
        let body_text = response
            .text()
            .await
            .map_err(|e| StoreError::backend(operation, target, e))?;

        let body = if body_text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&body_text).unwrap_or(Value::String(body_text))
        };
        Ok((status, body))
    }
}

fn endpoint(base: &Url, segments: &[&str]) -> StoreResult<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| StoreError::Config(format!("{base} cannot carry a path")))?
        .extend(segments);
    Ok(url)
}

/// Turn an unexpected CouchDB answer into a backend error.
fn failure(operation: &'static str, target: &str, status: StatusCode, body: &Value) -> StoreError {
    let reason = body
        .get("reason")
        .and_then(Value::as_str)
        .or_else(|| body.get("error").and_then(Value::as_str))
        .unwrap_or("no reason given");
    StoreError::backend(operation, target, format!("couchdb returned {}: {reason}", status.as_u16()))
}

fn into_payload(value: Value, operation: &'static str, target: &str) -> StoreResult<Payload> {
    match value {
        Value::Object(payload) => Ok(payload),
        other => Err(StoreError::Encoding {
            backend: "couchdb",
            message: format!("{operation} on {target} returned a non-object: {other}"),
        }),
    }
}

/// What a `DELETE` answer means. A 404 counts as removed; a 409 means the
/// revision we sent is no longer current.
fn removal_outcome(status: StatusCode) -> Option<WriteOutcome> {
    match status {
        StatusCode::OK | StatusCode::ACCEPTED | StatusCode::NOT_FOUND => Some(WriteOutcome::Stored),
        StatusCode::CONFLICT => Some(WriteOutcome::Conflict),
        _ => None,
    }
}

/// Translate a query into a Mango selector scoped to `collection`.
fn selector_for(query: &QuerySpec, collection: &str) -> Value {
    let mut clauses = vec![json!({ COLLECTION_FIELD: collection })];
    for predicate in query.predicates() {
        let property = native_property(predicate.property(), &CouchConventions);
        let condition = match predicate {
            Predicate::Equals { value, .. } => json!({ "$eq": value }),
            Predicate::Regex { pattern, .. } => json!({ "$regex": pattern }),
        };
        let mut clause = serde_json::Map::new();
        clause.insert(property.to_string(), condition);
        clauses.push(Value::Object(clause));
    }
    json!({ "$and": clauses })
}

// ── session ──────────────────────────────────────────────────────────

struct CouchSession {
    client: Arc<CouchClient>,
    registry: Arc<CollectionRegistry>,
}

#[derive(Deserialize)]
struct AllDocsResponse {
    rows: Vec<AllDocsRow>,
}

/// A missing key comes back as `{"key", "error"}`; a deleted one with a
/// `null` doc.
#[derive(Deserialize)]
struct AllDocsRow {
    #[serde(default)]
    doc: Option<Payload>,
}

#[derive(Deserialize)]
struct FindResponse {
    docs: Vec<Payload>,
    #[serde(default)]
    bookmark: Option<String>,
}

#[derive(Deserialize)]
struct WriteResponse {
    rev: String,
}

#[async_trait]
impl DocumentSession for CouchSession {
    fn registry(&self) -> &CollectionRegistry {
        &self.registry
    }

    fn conventions(&self) -> &dyn Conventions {
        &CouchConventions
    }

    #[instrument(skip(self))]
    async fn load(&self, id: &str) -> StoreResult<Option<Document>> {
        let url = self.client.url(&[id])?;
        let (status, body) = self
            .client
            .send(self.client.request(Method::GET, url), "get", id)
            .await?;
        match status {
            StatusCode::OK => {
                let payload = into_payload(body, "get", id)?;
                CouchConventions.instantiate(&self.registry, payload).map(Some)
            }
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(failure("get", id, status, &body)),
        }
    }

    /// Native multi-get through `_all_docs`; rows come back in key order.
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    async fn load_many(&self, ids: &[String]) -> StoreResult<Vec<Option<Document>>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut url = self.client.url(&["_all_docs"])?;
        url.query_pairs_mut().append_pair("include_docs", "true");
        let request = self
            .client
            .request(Method::POST, url)
            .json(&json!({ "keys": ids }));
        let (status, body) = self.client.send(request, "all_docs", "_all_docs").await?;
        if status != StatusCode::OK {
            return Err(failure("all_docs", "_all_docs", status, &body));
        }

        let response: AllDocsResponse = serde_json::from_value(body)?;
        if response.rows.len() != ids.len() {
            return Err(StoreError::backend(
                "all_docs",
                "_all_docs",
                format!("asked for {} keys, got {} rows", ids.len(), response.rows.len()),
            ));
        }

        response
            .rows
            .into_iter()
            .map(|row| {
                row.doc
                    .map(|payload| CouchConventions.instantiate(&self.registry, payload))
                    .transpose()
            })
            .collect()
    }

    #[instrument(skip(self, document), fields(id = %document.id()))]
    async fn store(&self, document: &mut Document) -> StoreResult<WriteOutcome> {
        let url = self.client.url(&[document.id()])?;
        let payload = CouchConventions.to_payload(document);
        let request = self.client.request(Method::PUT, url).json(&payload);
        let (status, body) = self.client.send(request, "put", document.id()).await?;

        match status {
            StatusCode::CREATED | StatusCode::ACCEPTED => {
                let written: WriteResponse = serde_json::from_value(body)?;
                debug!(revision = %written.rev, "document stored");
                document.set_revision(Some(written.rev));
                Ok(WriteOutcome::Stored)
            }
            StatusCode::CONFLICT => {
                warn!(
                    id = document.id(),
                    revision = ?document.revision(),
                    "write conflict: document changed since it was read"
                );
                Ok(WriteOutcome::Conflict)
            }
            _ => Err(failure("put", document.id(), status, &body)),
        }
    }

    #[instrument(skip(self, document), fields(id = %document.id()))]
    async fn remove(&self, document: &Document) -> StoreResult<WriteOutcome> {
        // DELETE needs the current revision; look it up when we never had one.
        let revision = match document.revision() {
            Some(revision) => revision.to_string(),
            None => match self.load(document.id()).await? {
                Some(current) => current.revision().unwrap_or_default().to_string(),
                None => return Ok(WriteOutcome::Stored),
            },
        };

        let mut url = self.client.url(&[document.id()])?;
        url.query_pairs_mut().append_pair("rev", &revision);
        let (status, body) = self
            .client
            .send(self.client.request(Method::DELETE, url), "delete", document.id())
            .await?;

        match removal_outcome(status) {
            Some(WriteOutcome::Stored) => {
                debug!("document removed");
                Ok(WriteOutcome::Stored)
            }
            Some(WriteOutcome::Conflict) => {
                warn!(id = document.id(), %revision, "remove conflict: document changed since it was read");
                Ok(WriteOutcome::Conflict)
            }
            None => Err(failure("delete", document.id(), status, &body)),
        }
    }

    #[instrument(skip(self, query), fields(collection = query.collection()))]
    async fn find(&self, query: &QuerySpec) -> StoreResult<Vec<Document>> {
        let collection = self.registry.resolve(query.collection())?.name();
        let selector = selector_for(query, collection);
        let url = self.client.url(&["_find"])?;

        let mut documents = Vec::new();
        let mut bookmark: Option<String> = None;
        loop {
            let mut body = json!({ "selector": selector, "limit": FIND_PAGE_SIZE });
            if let Some(bookmark) = &bookmark {
                body["bookmark"] = Value::from(bookmark.as_str());
            }

            let request = self.client.request(Method::POST, url.clone()).json(&body);
            let (status, response) = self.client.send(request, "find", collection).await?;
            if status != StatusCode::OK {
                return Err(failure("find", collection, status, &response));
            }

            let page: FindResponse = serde_json::from_value(response)?;
            let full_page = page.docs.len() == FIND_PAGE_SIZE;
            for payload in page.docs {
                documents.push(CouchConventions.instantiate(&self.registry, payload)?);
            }

            match page.bookmark {
                Some(next) if full_page => bookmark = Some(next),
                _ => break,
            }
        }

        debug!(matched = documents.len(), "query executed");
        Ok(documents)
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model;
    use crate::testing::{self, Note};

    fn config() -> DatabaseConfig {
        let mut config = DatabaseConfig::default();
        config.apply_vars([
            ("COUCHDB_HOST", "127.0.0.1"),
            ("COUCHDB_PORT", "5984"),
            ("COUCHDB_USERNAME", "warden"),
            ("COUCHDB_PASSWORD", "secret"),
            ("COUCHDB_DATABASE", "warden"),
        ]);
        config
    }

    #[test]
    fn try_create_requires_every_parameter() {
        assert!(CouchAdapter::try_create(&DatabaseConfig::default()).is_none());

        let adapter = CouchAdapter::try_create(&config()).unwrap();
        assert_eq!(adapter.database_url().as_str(), "http://127.0.0.1:5984/warden");

        let mut no_password = config();
        no_password.couchdb.password = None;
        assert!(CouchAdapter::try_create(&no_password).is_none());
    }

    #[test]
    fn try_create_honours_protocol() {
        let mut config = config();
        config.couchdb.protocol = Some("https".into());
        let adapter = CouchAdapter::try_create(&config).unwrap();
        assert_eq!(adapter.database_url().scheme(), "https");

        config.couchdb.protocol = Some("ftp".into());
        assert!(CouchAdapter::try_create(&config).is_none());
    }

    #[test]
    fn document_ids_are_encoded_as_one_segment() {
        let base = Url::parse("http://127.0.0.1:5984/warden").unwrap();
        let url = endpoint(&base, &["warnings/1/2/3/1717171717000"]).unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:5984/warden/warnings%2F1%2F2%2F3%2F1717171717000"
        );
    }

    #[test]
    fn selector_scopes_to_collection() {
        let query = QuerySpec::new("notes")
            .where_equals("guildId", "1")
            .where_regex("id", "^notes/1/");
        assert_eq!(
            selector_for(&query, "Notes"),
            json!({ "$and": [
                { "collection": "Notes" },
                { "guildId": { "$eq": "1" } },
                { "_id": { "$regex": "^notes/1/" } },
            ]})
        );
    }

    #[test]
    fn delete_answers_map_to_outcomes() {
        assert_eq!(removal_outcome(StatusCode::OK), Some(WriteOutcome::Stored));
        assert_eq!(removal_outcome(StatusCode::NOT_FOUND), Some(WriteOutcome::Stored));
        assert_eq!(removal_outcome(StatusCode::CONFLICT), Some(WriteOutcome::Conflict));
        assert_eq!(removal_outcome(StatusCode::UNAUTHORIZED), None);
    }

    #[test]
    fn payload_carries_revision_and_collection() {
        let registry = testing::registry();
        let mut document = Note::new("1", "2", "hi").to_document().unwrap();
        document.set_revision(Some("3-abc".into()));

        let payload = CouchConventions.to_payload(&document);
        assert_eq!(payload["_id"], "notes/1/2");
        assert_eq!(payload["_rev"], "3-abc");
        assert_eq!(payload["collection"], "Notes");

        let decoded = CouchConventions.instantiate(&registry, payload).unwrap();
        assert_eq!(decoded, document);
        assert!(!decoded.fields().contains_key("collection"));
    }

    #[test]
    fn fresh_payload_has_no_revision() {
        let document = Note::new("1", "2", "hi").to_document().unwrap();
        let payload = CouchConventions.to_payload(&document);
        assert!(!payload.contains_key("_rev"));
        assert!(CouchConventions.has_metadata(&payload));
    }

    #[test]
    fn all_docs_rows_decode_missing_and_deleted_as_absent() {
        let response: AllDocsResponse = serde_json::from_value(json!({
            "total_rows": 2,
            "rows": [
                { "id": "notes/1/a", "key": "notes/1/a", "value": { "rev": "1-x" },
                  "doc": { "_id": "notes/1/a", "_rev": "1-x" } },
                { "key": "notes/1/b", "error": "not_found" },
                { "id": "notes/1/c", "key": "notes/1/c", "value": { "rev": "2-y", "deleted": true },
                  "doc": null },
            ]
        }))
        .unwrap();

        let present: Vec<bool> = response.rows.iter().map(|row| row.doc.is_some()).collect();
        assert_eq!(present, [true, false, false]);
    }

    #[tokio::test]
    async fn session_before_start_fails() {
        let adapter = CouchAdapter::try_create(&config()).unwrap();
        let err = adapter
            .open_session(Arc::new(testing::registry()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, StoreError::NotStarted { backend: "couchdb" }));
    }
}
