//! Storage adapters ("I/O managers") for asset outputs.
//!
//! The [`IoManager`] trait persists an asset's output and loads it back as
//! an input for downstream assets. Two adapters implement it, each over a
//! narrow backend trait so the persistence rules can be exercised against
//! in-memory backends:
//!
//! | Adapter | Backend trait | Write contract |
//! |---------|---------------|----------------|
//! | [`RelationalIoManager`] | [`RelationalBackend`] | full replace of `schema.table` |
//! | [`DocumentIoManager`] | [`DocumentBackend`] | upsert by `id`, else append |
//!
//! [`Resources`] binds adapters to the storage keys assets refer to.

pub mod memory;
pub mod mongo;
pub mod postgres;

use anyhow::{Context, Result as AnyResult};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::{Config, StorageMode};
use crate::error::Result;
use crate::models::{AssetKey, AssetOutput, Record, Table};

use self::memory::{MemoryDocumentBackend, MemoryRelationalBackend};
use self::mongo::MongoBackend;
use self::postgres::PostgresBackend;

/// Storage key for the relational adapter.
pub const POSTGRES_IO_MANAGER: &str = "postgres_io_manager";
/// Storage key for the document adapter.
pub const MONGO_IO_MANAGER: &str = "mongo_io_manager";

/// Identifies the asset whose output is being stored or loaded.
#[derive(Debug, Clone)]
pub struct StorageContext {
    pub key: AssetKey,
    pub run_id: String,
}

impl StorageContext {
    pub fn new(key: AssetKey, run_id: impl Into<String>) -> Self {
        Self {
            key,
            run_id: run_id.into(),
        }
    }
}

/// Persists asset outputs and loads them back as inputs.
#[async_trait]
pub trait IoManager: Send + Sync {
    /// Short label for listings (`"postgres"`, `"mongo"`, ...).
    fn kind(&self) -> &str;

    async fn handle_output(&self, ctx: &StorageContext, output: &AssetOutput) -> Result<()>;

    async fn load_input(&self, ctx: &StorageContext) -> Result<Table>;

    /// Release connections. Called once at the end of a run.
    async fn close(&self) {}
}

// ═══════════════════════════════════════════════════════════════════════
// Relational
// ═══════════════════════════════════════════════════════════════════════

/// Where a relational write lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableTarget {
    pub schema: String,
    pub table: String,
}

impl std::fmt::Display for TableTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// Resolve `(schema, table)` from an asset key: with two or more segments
/// the first is the schema and the last the table; a single segment lands
/// in `default_schema`.
pub fn resolve_table(key: &AssetKey, default_schema: &str) -> TableTarget {
    let path = key.path();
    let schema = if path.len() >= 2 {
        path[0].clone()
    } else {
        default_schema.to_string()
    };
    TableTarget {
        schema,
        table: key.name().to_string(),
    }
}

/// The narrow contract the relational adapter needs from a database.
#[async_trait]
pub trait RelationalBackend: Send + Sync {
    fn kind(&self) -> &str;

    async fn create_schema(&self, schema: &str) -> Result<()>;

    /// Replace the table's definition and contents with `data`.
    async fn replace_table(&self, target: &TableTarget, data: &Table) -> Result<()>;

    async fn select_all(&self, target: &TableTarget) -> Result<Table>;

    async fn close(&self) {}
}

/// Relational adapter: every write replaces the target table wholesale.
///
/// Not safe under concurrent writers to the same table.
pub struct RelationalIoManager {
    backend: Arc<dyn RelationalBackend>,
    default_schema: String,
}

impl RelationalIoManager {
    pub fn new(backend: Arc<dyn RelationalBackend>, default_schema: impl Into<String>) -> Self {
        Self {
            backend,
            default_schema: default_schema.into(),
        }
    }

    /// Empty tables replace the target too; nothing from an earlier run
    /// survives.
    async fn write(&self, target: &TableTarget, table: &Table) -> Result<()> {
        self.backend.create_schema(&target.schema).await?;
        self.backend.replace_table(target, table).await?;
        tracing::info!(target = %target, rows = table.len(), "replaced table");
        Ok(())
    }
}

#[async_trait]
impl IoManager for RelationalIoManager {
    fn kind(&self) -> &str {
        self.backend.kind()
    }

    async fn handle_output(&self, ctx: &StorageContext, output: &AssetOutput) -> Result<()> {
        let target = resolve_table(&ctx.key, &self.default_schema);
        match output {
            AssetOutput::None => {
                tracing::info!(asset = %ctx.key, "no output to store");
                Ok(())
            }
            AssetOutput::Table(table) => self.write(&target, table).await,
            AssetOutput::Sheets(sheets) => {
                for (label, table) in sheets {
                    let sheet_target = TableTarget {
                        schema: target.schema.clone(),
                        table: format!("{}_{}", target.table, label),
                    };
                    self.write(&sheet_target, table).await?;
                }
                Ok(())
            }
        }
    }

    async fn load_input(&self, ctx: &StorageContext) -> Result<Table> {
        let target = resolve_table(&ctx.key, &self.default_schema);
        self.backend.select_all(&target).await
    }

    async fn close(&self) {
        self.backend.close().await;
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Document
// ═══════════════════════════════════════════════════════════════════════

/// Field used as the natural key for upserts.
pub const NATURAL_KEY: &str = "id";
/// Identity field the document store adds; stripped on read.
pub const INTERNAL_ID: &str = "_id";

/// The narrow contract the document adapter needs from a document store.
#[async_trait]
pub trait DocumentBackend: Send + Sync {
    fn kind(&self) -> &str;

    /// Insert every document unconditionally.
    async fn insert_many(&self, collection: &str, docs: Vec<Record>) -> Result<()>;

    /// For each document, replace the fields of the stored document whose
    /// `key` matches, inserting when none does.
    async fn upsert_by(&self, collection: &str, key: &str, docs: Vec<Record>) -> Result<()>;

    /// Every stored document, including the store's identity field.
    async fn find_all(&self, collection: &str) -> Result<Vec<Record>>;

    async fn close(&self) {}
}

/// Document adapter: upsert by `id` when the rows carry one, append
/// otherwise. Rerunning an asset without `id` duplicates its documents.
pub struct DocumentIoManager {
    backend: Arc<dyn DocumentBackend>,
    collection: Option<String>,
}

impl DocumentIoManager {
    /// `collection` pins every asset to one collection; `None` uses the
    /// asset name.
    pub fn new(backend: Arc<dyn DocumentBackend>, collection: Option<String>) -> Self {
        Self {
            backend,
            collection,
        }
    }

    pub fn collection_for(&self, key: &AssetKey) -> String {
        self.collection
            .clone()
            .unwrap_or_else(|| key.name().to_string())
    }
}

/// Turn rows into storable documents. Nested arrays are kept as plain
/// sequences; object cells are stored as sub-documents.
pub fn to_documents(rows: &[Record]) -> Vec<Record> {
    rows.iter()
        .map(|row| {
            row.iter()
                .map(|(k, v)| (k.clone(), to_serializable(v)))
                .collect()
        })
        .collect()
}

fn to_serializable(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().map(to_serializable).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), to_serializable(v)))
                .collect(),
        ),
        Value::Number(n) if n.as_f64().is_some_and(|f| !f.is_finite()) => Value::Null,
        other => other.clone(),
    }
}

#[async_trait]
impl IoManager for DocumentIoManager {
    fn kind(&self) -> &str {
        self.backend.kind()
    }

    async fn handle_output(&self, ctx: &StorageContext, output: &AssetOutput) -> Result<()> {
        let docs = match output {
            AssetOutput::None => Vec::new(),
            AssetOutput::Table(table) => to_documents(table.rows()),
            AssetOutput::Sheets(sheets) => sheets
                .iter()
                .flat_map(|(label, table)| {
                    to_documents(table.rows()).into_iter().map(move |mut doc| {
                        doc.insert("sheet".to_string(), Value::String(label.clone()));
                        doc
                    })
                })
                .collect(),
        };

        if docs.is_empty() {
            tracing::info!(asset = %ctx.key, "no data to write to the document store");
            return Ok(());
        }

        let collection = self.collection_for(&ctx.key);
        let count = docs.len();
        if docs[0].contains_key(NATURAL_KEY) {
            self.backend.upsert_by(&collection, NATURAL_KEY, docs).await?;
            tracing::info!(collection = %collection, docs = count, "upserted documents by id");
        } else {
            self.backend.insert_many(&collection, docs).await?;
            tracing::info!(collection = %collection, docs = count, "inserted documents");
        }
        Ok(())
    }

    async fn load_input(&self, ctx: &StorageContext) -> Result<Table> {
        let collection = self.collection_for(&ctx.key);
        let mut docs = self.backend.find_all(&collection).await?;
        for doc in &mut docs {
            doc.remove(INTERNAL_ID);
        }
        Ok(Table::from_records(docs))
    }

    async fn close(&self) {
        self.backend.close().await;
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Resources
// ═══════════════════════════════════════════════════════════════════════

/// Storage adapters bound to storage keys. Built once per process and
/// shared by every asset.
#[derive(Clone, Default)]
pub struct Resources {
    managers: BTreeMap<String, Arc<dyn IoManager>>,
}

impl Resources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, manager: Arc<dyn IoManager>) {
        self.managers.insert(key.into(), manager);
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn IoManager>> {
        self.managers.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.managers.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.managers.keys().map(String::as_str)
    }

    /// Bind `io_manager`, `postgres_io_manager`, and `mongo_io_manager`
    /// from config. The default key shares the relational adapter.
    pub async fn from_config(config: &Config) -> AnyResult<Self> {
        let (relational, document): (Arc<dyn RelationalBackend>, Arc<dyn DocumentBackend>) =
            match config.storage.mode {
                StorageMode::Memory => (
                    Arc::new(MemoryRelationalBackend::new()),
                    Arc::new(MemoryDocumentBackend::new()),
                ),
                StorageMode::External => {
                    let conn_str = config.postgres.conn_str()?;
                    let pg = PostgresBackend::connect(&conn_str, config.postgres.max_connections)
                        .await
                        .context("Failed to connect to PostgreSQL")?;
                    let mongo = MongoBackend::connect(
                        &config.mongo.connection_str(),
                        config.mongo.db_name(),
                    )
                    .await
                    .context("Failed to create MongoDB client")?;
                    (Arc::new(pg), Arc::new(mongo))
                }
            };

        Ok(Self::from_backends(config, relational, document))
    }

    /// Bind the standard keys over explicit backends.
    pub fn from_backends(
        config: &Config,
        relational: Arc<dyn RelationalBackend>,
        document: Arc<dyn DocumentBackend>,
    ) -> Self {
        let relational: Arc<dyn IoManager> = Arc::new(RelationalIoManager::new(
            relational,
            config.storage.default_schema.clone(),
        ));
        let document: Arc<dyn IoManager> = Arc::new(DocumentIoManager::new(
            document,
            config.mongo.collection.clone(),
        ));

        let mut resources = Self::new();
        resources.insert(crate::asset::DEFAULT_IO_MANAGER, relational.clone());
        resources.insert(POSTGRES_IO_MANAGER, relational);
        resources.insert(MONGO_IO_MANAGER, document);
        resources
    }

    /// Close every distinct adapter once.
    pub async fn close(&self) {
        let mut closed: Vec<&Arc<dyn IoManager>> = Vec::new();
        for manager in self.managers.values() {
            if closed.iter().any(|c| Arc::ptr_eq(c, manager)) {
                continue;
            }
            manager.close().await;
            closed.push(manager);
        }
    }
}
