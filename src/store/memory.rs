//! In-process backends for tests and `storage.mode = "memory"` runs.
//!
//! Both use `HashMap` behind `std::sync::RwLock`. Nothing survives the
//! process.

use std::collections::{BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{PipelineError, Result};
use crate::models::{Record, Table};

use super::{DocumentBackend, RelationalBackend, TableTarget, INTERNAL_ID};

/// Relational backend keyed by `(schema, table)`.
pub struct MemoryRelationalBackend {
    schemas: RwLock<BTreeSet<String>>,
    tables: RwLock<HashMap<(String, String), Table>>,
}

impl MemoryRelationalBackend {
    pub fn new() -> Self {
        Self {
            schemas: RwLock::new(BTreeSet::new()),
            tables: RwLock::new(HashMap::new()),
        }
    }

    pub fn schemas(&self) -> Vec<String> {
        let schemas = self.schemas.read().unwrap_or_else(PoisonError::into_inner);
        schemas.iter().cloned().collect()
    }

    /// Stored table names as `schema.table`, sorted.
    pub fn table_names(&self) -> Vec<String> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = tables
            .keys()
            .map(|(schema, table)| format!("{}.{}", schema, table))
            .collect();
        names.sort();
        names
    }

    pub fn table(&self, schema: &str, table: &str) -> Option<Table> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables
            .get(&(schema.to_string(), table.to_string()))
            .cloned()
    }
}

impl Default for MemoryRelationalBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RelationalBackend for MemoryRelationalBackend {
    fn kind(&self) -> &str {
        "memory-relational"
    }

    async fn create_schema(&self, schema: &str) -> Result<()> {
        let mut schemas = self.schemas.write().unwrap_or_else(PoisonError::into_inner);
        schemas.insert(schema.to_string());
        Ok(())
    }

    async fn replace_table(&self, target: &TableTarget, data: &Table) -> Result<()> {
        {
            let schemas = self.schemas.read().unwrap_or_else(PoisonError::into_inner);
            if !schemas.contains(&target.schema) {
                return Err(PipelineError::config(format!(
                    "schema '{}' does not exist",
                    target.schema
                )));
            }
        }
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        tables.insert(
            (target.schema.clone(), target.table.clone()),
            data.clone(),
        );
        Ok(())
    }

    async fn select_all(&self, target: &TableTarget) -> Result<Table> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables
            .get(&(target.schema.clone(), target.table.clone()))
            .cloned()
            .ok_or_else(|| PipelineError::NotFound(target.to_string()))
    }
}

/// Document backend keyed by collection name. Every stored document gets
/// a generated `_id`, like a real document store would assign.
pub struct MemoryDocumentBackend {
    collections: RwLock<HashMap<String, Vec<Record>>>,
}

impl MemoryDocumentBackend {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }

    pub fn count(&self, collection: &str) -> usize {
        let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        collections.get(collection).map_or(0, Vec::len)
    }

    pub fn collection_names(&self) -> Vec<String> {
        let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = collections.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for MemoryDocumentBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn with_internal_id(mut doc: Record) -> Record {
    if !doc.contains_key(INTERNAL_ID) {
        doc.insert(
            INTERNAL_ID.to_string(),
            Value::String(uuid::Uuid::new_v4().to_string()),
        );
    }
    doc
}

#[async_trait]
impl DocumentBackend for MemoryDocumentBackend {
    fn kind(&self) -> &str {
        "memory-document"
    }

    async fn insert_many(&self, collection: &str, docs: Vec<Record>) -> Result<()> {
        let mut collections = self.collections.write().unwrap_or_else(PoisonError::into_inner);
        let stored = collections.entry(collection.to_string()).or_default();
        stored.extend(docs.into_iter().map(with_internal_id));
        Ok(())
    }

    async fn upsert_by(&self, collection: &str, key: &str, docs: Vec<Record>) -> Result<()> {
        let mut collections = self.collections.write().unwrap_or_else(PoisonError::into_inner);
        let stored = collections.entry(collection.to_string()).or_default();
        for doc in docs {
            let existing = doc
                .get(key)
                .and_then(|k| stored.iter_mut().find(|s| s.get(key) == Some(k)));
            match existing {
                // $set semantics: overwrite provided fields, keep the rest.
                Some(target) => {
                    for (field, value) in doc {
                        target.insert(field, value);
                    }
                }
                None => stored.push(with_internal_id(doc)),
            }
        }
        Ok(())
    }

    async fn find_all(&self, collection: &str) -> Result<Vec<Record>> {
        let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        Ok(collections.get(collection).cloned().unwrap_or_default())
    }
}
