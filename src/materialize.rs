//! Local materializer.
//!
//! Runs a selection of assets once, in dependency order, on the current
//! task. Inputs are loaded through the storage adapter of the upstream
//! asset, so an upstream outside the selection must have been
//! materialized by an earlier run. There are no retries: the first
//! failing asset stops the run and its error is returned.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::time::Instant;

use crate::asset::{AssetContext, AssetDefinition, AssetInputs};
use crate::config::Config;
use crate::definitions::Definitions;
use crate::error::PipelineError;
use crate::models::{AssetKey, Params};
use crate::store::StorageContext;

/// What to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    /// Asset names or full keys.
    Assets(Vec<String>),
    Job(String),
}

/// Per-run settings.
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    /// Op config by asset name or full key.
    pub ops: BTreeMap<String, Params>,
    /// Generated when unset.
    pub run_id: Option<String>,
}

impl RunConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ops: config.ops.clone(),
            run_id: None,
        }
    }

    fn op_config(&self, asset: &AssetDefinition) -> Params {
        self.ops
            .get(&asset.key.to_string())
            .or_else(|| self.ops.get(asset.name()))
            .cloned()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AssetRun {
    pub key: AssetKey,
    pub storage: String,
    pub rows: usize,
    pub elapsed_ms: u128,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub assets: Vec<AssetRun>,
}

impl RunSummary {
    pub fn total_rows(&self) -> usize {
        self.assets.iter().map(|a| a.rows).sum()
    }
}

/// Expand a selection into asset keys, in definition order.
pub fn resolve_selection(
    defs: &Definitions,
    selection: &Selection,
) -> std::result::Result<Vec<AssetKey>, PipelineError> {
    let wanted: HashSet<AssetKey> = match selection {
        Selection::All => return Ok(defs.assets.iter().map(|a| a.key.clone()).collect()),
        Selection::Job(name) => defs
            .job(name)
            .ok_or_else(|| PipelineError::config(format!("unknown job '{}'", name)))?
            .iter()
            .cloned()
            .collect(),
        Selection::Assets(selectors) => {
            if selectors.is_empty() {
                return Err(PipelineError::config("no assets selected"));
            }
            selectors
                .iter()
                .map(|s| defs.resolve(s).map(|a| a.key.clone()))
                .collect::<std::result::Result<_, _>>()?
        }
    };
    Ok(defs
        .assets
        .iter()
        .filter(|a| wanted.contains(&a.key))
        .map(|a| a.key.clone())
        .collect())
}

/// Order `selected` so each asset follows its selected upstreams. Ties
/// keep the given order. A dependency cycle is a configuration error.
pub fn execution_order(
    defs: &Definitions,
    selected: &[AssetKey],
) -> std::result::Result<Vec<AssetKey>, PipelineError> {
    let in_selection: HashSet<&AssetKey> = selected.iter().collect();
    let mut done: HashSet<&AssetKey> = HashSet::new();
    let mut order = Vec::with_capacity(selected.len());

    while order.len() < selected.len() {
        let next = selected.iter().find(|key| {
            !done.contains(key)
                && defs.get(key).is_some_and(|asset| {
                    asset
                        .ins
                        .iter()
                        .all(|i| !in_selection.contains(&i.key) || done.contains(&i.key))
                })
        });
        match next {
            Some(key) => {
                done.insert(key);
                order.push(key.clone());
            }
            None => {
                let stuck: Vec<String> = selected
                    .iter()
                    .filter(|k| !done.contains(k))
                    .map(|k| k.to_string())
                    .collect();
                return Err(PipelineError::config(format!(
                    "dependency cycle or unknown asset among: {}",
                    stuck.join(", ")
                )));
            }
        }
    }
    Ok(order)
}

/// Materialize `selection` and report what was stored.
pub async fn materialize(
    defs: &Definitions,
    selection: &Selection,
    run: &RunConfig,
) -> Result<RunSummary> {
    let run_id = run
        .run_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let started_at = Utc::now();

    let selected = resolve_selection(defs, selection)?;
    let order = execution_order(defs, &selected)?;
    tracing::info!(run_id = %run_id, assets = order.len(), "starting run");

    let mut runs = Vec::with_capacity(order.len());
    for key in &order {
        let asset = defs
            .get(key)
            .ok_or_else(|| PipelineError::NotFound(key.to_string()))?;
        let started = Instant::now();

        let op_config = run.op_config(asset);
        asset.check_config(&op_config)?;

        let mut inputs = AssetInputs::new();
        for input in &asset.ins {
            let upstream = defs
                .get(&input.key)
                .ok_or_else(|| PipelineError::NotFound(input.key.to_string()))?;
            let io = storage_for(defs, upstream)?;
            let table = io
                .load_input(&StorageContext::new(input.key.clone(), run_id.as_str()))
                .await
                .inspect_err(|e| tracing::error!(asset = %key, input = %input.key, error = %e, "loading input failed"))?;
            inputs.insert(input.name.clone(), table);
        }

        let ctx = AssetContext::new(key.clone(), run_id.as_str(), op_config);
        let output = asset
            .compute
            .compute(&ctx, inputs)
            .await
            .inspect_err(|e| tracing::error!(asset = %key, error = %e, "asset failed"))?;

        let io = storage_for(defs, asset)?;
        io.handle_output(&StorageContext::new(key.clone(), run_id.as_str()), &output)
            .await
            .inspect_err(|e| tracing::error!(asset = %key, error = %e, "storing output failed"))?;

        let elapsed_ms = started.elapsed().as_millis();
        tracing::info!(asset = %key, rows = output.row_count(), elapsed_ms, "materialized");
        runs.push(AssetRun {
            key: key.clone(),
            storage: asset.io_manager_key.clone(),
            rows: output.row_count(),
            elapsed_ms,
        });
    }

    Ok(RunSummary {
        run_id,
        started_at,
        finished_at: Utc::now(),
        assets: runs,
    })
}

fn storage_for(
    defs: &Definitions,
    asset: &AssetDefinition,
) -> std::result::Result<std::sync::Arc<dyn crate::store::IoManager>, PipelineError> {
    defs.resources.get(&asset.io_manager_key).ok_or_else(|| {
        PipelineError::config(format!(
            "no resource bound to storage key '{}'",
            asset.io_manager_key
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::AssetCompute;
    use crate::models::{AssetOutput, Table};
    use crate::store::memory::MemoryRelationalBackend;
    use crate::store::{RelationalIoManager, Resources};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    struct Emit {
        value: i64,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl AssetCompute for Emit {
        async fn compute(&self, ctx: &AssetContext, mut inputs: AssetInputs) -> Result<AssetOutput> {
            self.log.lock().unwrap().push(ctx.key.to_string());
            let mut rows = vec![json!({"v": self.value})];
            if let Ok(up) = inputs.take("up") {
                rows.extend(up.rows().iter().cloned().map(serde_json::Value::Object));
            }
            Ok(Table::from_values(rows)?.into())
        }
    }

    fn defs(log: Arc<Mutex<Vec<String>>>) -> Definitions {
        let backend = Arc::new(MemoryRelationalBackend::new());
        let mut resources = Resources::new();
        resources.insert(
            crate::asset::DEFAULT_IO_MANAGER,
            Arc::new(RelationalIoManager::new(backend, "public")),
        );
        let asset = |name: &str, value: i64| {
            AssetDefinition::new(
                name,
                Arc::new(Emit {
                    value,
                    log: log.clone(),
                }),
            )
        };
        Definitions::new(
            vec![
                asset("c", 3).input("up", "b"),
                asset("b", 2).input("up", "a"),
                asset("a", 1),
            ],
            resources,
        )
        .with_job("ab", vec![AssetKey::from("a"), AssetKey::from("b")])
    }

    #[tokio::test]
    async fn runs_upstreams_first_and_passes_tables() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let defs = defs(log.clone());
        let summary = materialize(&defs, &Selection::All, &RunConfig::default())
            .await
            .unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
        let rows: Vec<usize> = summary.assets.iter().map(|a| a.rows).collect();
        assert_eq!(rows, vec![1, 2, 3]);
        assert_eq!(summary.total_rows(), 6);
    }

    #[tokio::test]
    async fn job_selection() {
        let defs = defs(Arc::new(Mutex::new(Vec::new())));
        let keys = resolve_selection(&defs, &Selection::Job("ab".into())).unwrap();
        assert_eq!(keys, vec![AssetKey::from("b"), AssetKey::from("a")]);
        assert_eq!(
            execution_order(&defs, &keys).unwrap(),
            vec![AssetKey::from("a"), AssetKey::from("b")]
        );
        assert!(resolve_selection(&defs, &Selection::Job("nope".into())).is_err());
    }

    #[tokio::test]
    async fn unmaterialized_upstream_fails_the_run() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let defs = defs(log.clone());
        let err = materialize(&defs, &Selection::Assets(vec!["c".into()]), &RunConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::NotFound(_))
        ));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn cycles_are_configuration_errors() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut defs = defs(log);
        defs.assets[2] = defs.assets[2].clone().input("up", "c");
        let keys: Vec<AssetKey> = defs.assets.iter().map(|a| a.key.clone()).collect();
        let err = execution_order(&defs, &keys).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[tokio::test]
    async fn op_config_outside_schema_is_rejected() {
        let mut defs = defs(Arc::new(Mutex::new(Vec::new())));
        defs.assets[2] = defs.assets[2].clone().config_schema(["season"]);
        let mut run = RunConfig::default();
        run.ops.insert(
            "a".into(),
            json!({"max_players": 1}).as_object().cloned().unwrap(),
        );
        let err = materialize(&defs, &Selection::Assets(vec!["a".into()]), &run)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("max_players"));
    }
}
