//! CLI entry point for warden.
//!
//! The `warden` binary connects to the configured document store and lets an
//! operator check connectivity, inspect documents and remove them by id.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use warden_store::{DatabaseConfig, DatabaseStore, Document, QuerySpec, SetupOptions};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// Inspect and maintain the warden document store.
#[derive(Parser)]
#[command(name = "warden", version, about = "Inspect and maintain the warden document store")]
struct Cli {
    /// Configuration file. Environment variables (and `.env`) override it.
    #[arg(long, global = true, default_value = "config/default.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect, prefetch hot collections and report what was loaded.
    Check,

    /// Print one document by full id, e.g. `guilds/123`.
    Get { id: String },

    /// List documents of a collection matching every filter.
    Find {
        collection: String,

        /// Exact match on a string field, as `field=value`.
        #[arg(long = "eq", value_name = "FIELD=VALUE", value_parser = parse_pair)]
        equals: Vec<(String, String)>,

        /// Regex match, as `field=pattern`. MongoDB and CouchDB match string
        /// fields only; memory and SQLite also match numbers in decimal form.
        #[arg(long = "regex", value_name = "FIELD=PATTERN", value_parser = parse_pair)]
        regex: Vec<(String, String)>,
    },

    /// Flag a document as deleted, then remove it.
    Remove { id: String },
}

fn parse_pair(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((field, value)) if !field.is_empty() => Ok((field.to_string(), value.to_string())),
        _ => Err(format!("expected FIELD=VALUE, got `{raw}`")),
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let env_file = dotenvy::dotenv().ok();
    init_tracing("info");
    if let Some(path) = env_file {
        info!(path = %path.display(), "environment file loaded");
    }

    let (db, config) = open_store(&cli.config)?;
    let prefetch_documents = matches!(cli.command, Commands::Check) || config.prefetch_documents;
    db.setup(SetupOptions { prefetch_documents })
        .await
        .context("failed to start the database adapter")?;

    let result = match cli.command {
        Commands::Check => cmd_check(&db),
        Commands::Get { id } => cmd_get(&db, &id).await,
        Commands::Find {
            collection,
            equals,
            regex,
        } => cmd_find(&db, &collection, equals, regex).await,
        Commands::Remove { id } => cmd_remove(&db, &id).await,
    };

    if let Err(err) = db.teardown().await {
        warn!(%err, "database teardown failed");
    }
    result
}

fn open_store(path: &Path) -> Result<(DatabaseStore, DatabaseConfig)> {
    let mut config = DatabaseConfig::load(path)
        .with_context(|| format!("failed to load config from {}", path.display()))?;
    config.apply_env();

    let registry = warden_models::registry().context("failed to build the collection registry")?;
    Ok((DatabaseStore::create(&config, registry), config))
}

// ---------------------------------------------------------------------------
// Subcommand: check
// ---------------------------------------------------------------------------

fn cmd_check(db: &DatabaseStore) -> Result<()> {
    println!();
    println!("  Warden Store");
    println!("  ============");
    println!();
    println!("  Backend:          {}", db.backend());
    println!("  Collections:      {}", db.registry().len());
    println!();

    for entry in db.registry().hot_collections() {
        let count = db.cache().documents(entry.name()).len();
        println!("  {:<18}{count} cached", entry.name());
    }

    println!();
    println!("  Cache:            {}", db.cache().stats());
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommands: get, find, remove
// ---------------------------------------------------------------------------

async fn cmd_get(db: &DatabaseStore, id: &str) -> Result<()> {
    let Some(document) = db.load_document(id).await.context("failed to load document")? else {
        bail!("no document with id `{id}`");
    };
    println!("{}", render(&document)?);
    Ok(())
}

async fn cmd_find(
    db: &DatabaseStore,
    collection: &str,
    equals: Vec<(String, String)>,
    regex: Vec<(String, String)>,
) -> Result<()> {
    let mut query = QuerySpec::new(collection);
    for (field, value) in equals {
        query = query.where_equals(field, value);
    }
    for (field, pattern) in regex {
        query = query.where_regex(field, pattern);
    }

    let documents = db
        .find(query)
        .await
        .with_context(|| format!("query on {collection} failed"))?;
    for document in &documents {
        println!("{}", render(document)?);
    }
    info!(collection, count = documents.len(), "query finished");
    Ok(())
}

async fn cmd_remove(db: &DatabaseStore, id: &str) -> Result<()> {
    let Some(document) = db.load_document(id).await.context("failed to load document")? else {
        bail!("no document with id `{id}`");
    };

    let outcome = db
        .delete_document(document)
        .await
        .with_context(|| format!("failed to remove {id}"))?;
    if outcome.is_conflict() {
        bail!("{id} was changed concurrently; nothing removed, retry");
    }

    println!("removed {id}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// A document as pretty JSON, identity and revision first.
fn render(document: &Document) -> Result<String> {
    let mut object = serde_json::Map::new();
    object.insert("id".into(), document.id().into());
    if let Some(revision) = document.revision() {
        object.insert("revision".into(), revision.into());
    }
    object.extend(document.fields().clone());
    Ok(serde_json::to_string_pretty(&Value::Object(object))?)
}

/// Initialize the tracing subscriber with the given default log level.
///
/// Logs go to stderr so command output stays machine-readable.
fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn pairs_split_on_first_equals() {
        assert_eq!(
            parse_pair("reason=a=b").unwrap(),
            ("reason".to_string(), "a=b".to_string())
        );
        assert_eq!(parse_pair("guildId=").unwrap(), ("guildId".to_string(), String::new()));
        assert!(parse_pair("=x").is_err());
        assert!(parse_pair("nothing").is_err());
    }

    #[test]
    fn cli_parses_find_filters() {
        let cli = Cli::try_parse_from([
            "warden", "find", "Warnings", "--eq", "guildId=1", "--regex", "reason=^spam",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("config/default.toml"));
        let Commands::Find {
            collection,
            equals,
            regex,
        } = cli.command
        else {
            panic!("expected find");
        };
        assert_eq!(collection, "Warnings");
        assert_eq!(equals, [("guildId".to_string(), "1".to_string())]);
        assert_eq!(regex, [("reason".to_string(), "^spam".to_string())]);
    }

    #[test]
    fn regex_help_names_string_only_backends() {
        let cli = Cli::command();
        let find = cli.find_subcommand("find").unwrap();
        let regex = find.get_arguments().find(|arg| arg.get_id() == "regex").unwrap();
        let help = regex.get_help().unwrap().to_string();
        assert!(help.contains("MongoDB and CouchDB match string fields only"));
    }
}
