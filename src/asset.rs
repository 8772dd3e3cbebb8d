//! Declarative asset definitions.
//!
//! An [`AssetDefinition`] is built once during assembly and never mutated.
//! It carries the asset key, its declared inputs, the storage key of the
//! I/O manager that persists its output, an optional op-config schema, and
//! the [`AssetCompute`] that produces the output.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::PipelineError;
use crate::models::{AssetKey, AssetOutput, Params, Table};

/// Storage key bound when an asset does not ask for a specific one.
pub const DEFAULT_IO_MANAGER: &str = "io_manager";

/// Computes an asset's output for one run.
#[async_trait]
pub trait AssetCompute: Send + Sync {
    async fn compute(&self, ctx: &AssetContext, inputs: AssetInputs) -> Result<AssetOutput>;
}

/// A declared dependency: the argument name the compute sees and the
/// upstream asset it is loaded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetIn {
    pub name: String,
    pub key: AssetKey,
}

#[derive(Clone)]
pub struct AssetDefinition {
    pub key: AssetKey,
    pub group: Option<String>,
    pub compute_kind: Option<String>,
    pub description: Option<String>,
    pub ins: Vec<AssetIn>,
    pub io_manager_key: String,
    /// Accepted op-config fields; `None` accepts anything.
    pub config_schema: Option<Vec<String>>,
    pub compute: Arc<dyn AssetCompute>,
}

impl AssetDefinition {
    pub fn new(name: &str, compute: Arc<dyn AssetCompute>) -> Self {
        Self {
            key: AssetKey::new([name]),
            group: None,
            compute_kind: None,
            description: None,
            ins: Vec::new(),
            io_manager_key: DEFAULT_IO_MANAGER.to_string(),
            config_schema: None,
            compute,
        }
    }

    pub fn key_prefix<S: AsRef<str>>(mut self, prefix: &[S]) -> Self {
        let prefix: Vec<String> = prefix.iter().map(|s| s.as_ref().to_string()).collect();
        self.key = self.key.with_prefix(&prefix);
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn compute_kind(mut self, kind: impl Into<String>) -> Self {
        self.compute_kind = Some(kind.into());
        self
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    pub fn input(mut self, name: impl Into<String>, key: impl Into<AssetKey>) -> Self {
        self.ins.push(AssetIn {
            name: name.into(),
            key: key.into(),
        });
        self
    }

    pub fn io_manager(mut self, key: impl Into<String>) -> Self {
        self.io_manager_key = key.into();
        self
    }

    pub fn config_schema<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config_schema = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn name(&self) -> &str {
        self.key.name()
    }

    /// Reject op-config fields outside the declared schema.
    pub fn check_config(&self, op_config: &Params) -> std::result::Result<(), PipelineError> {
        let Some(schema) = &self.config_schema else {
            return Ok(());
        };
        match op_config.keys().find(|k| !schema.contains(k)) {
            Some(unknown) => Err(PipelineError::config(format!(
                "asset '{}' does not accept config field '{}' (accepted: {})",
                self.key,
                unknown,
                schema.join(", ")
            ))),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for AssetDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetDefinition")
            .field("key", &self.key)
            .field("group", &self.group)
            .field("ins", &self.ins)
            .field("io_manager_key", &self.io_manager_key)
            .finish_non_exhaustive()
    }
}

/// Run-scoped context handed to [`AssetCompute::compute`].
#[derive(Debug, Clone)]
pub struct AssetContext {
    pub key: AssetKey,
    pub run_id: String,
    pub op_config: Params,
}

impl AssetContext {
    pub fn new(key: AssetKey, run_id: impl Into<String>, op_config: Params) -> Self {
        Self {
            key,
            run_id: run_id.into(),
            op_config,
        }
    }

    /// String op-config field; numbers are rendered as text.
    pub fn config_str(&self, field: &str) -> Option<String> {
        match self.op_config.get(field)? {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Integer op-config field; numeric strings are accepted.
    pub fn config_i64(&self, field: &str) -> Result<Option<i64>> {
        match self.op_config.get(field) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(serde_json::Value::Number(n)) => n
                .as_i64()
                .map(Some)
                .with_context(|| format!("config field '{}' must be an integer", field)),
            Some(serde_json::Value::String(s)) => s
                .parse::<i64>()
                .map(Some)
                .with_context(|| format!("config field '{}' must be an integer", field)),
            Some(_) => anyhow::bail!("config field '{}' must be an integer", field),
        }
    }
}

/// Upstream tables, keyed by input argument name.
#[derive(Debug, Default)]
pub struct AssetInputs {
    tables: HashMap<String, Table>,
}

impl AssetInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, table: Table) {
        self.tables.insert(name.into(), table);
    }

    pub fn with(mut self, name: impl Into<String>, table: Table) -> Self {
        self.insert(name, table);
        self
    }

    /// Take ownership of one input. Missing inputs are an error because the
    /// asset declared them.
    pub fn take(&mut self, name: &str) -> Result<Table> {
        self.tables
            .remove(name)
            .with_context(|| format!("input '{}' was not provided", name))
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
