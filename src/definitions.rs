//! Pipeline assembly.
//!
//! [`build_definitions`] composes every asset factory into one
//! [`Definitions`] value together with the `moneyball_nba` job and the
//! storage [`Resources`]. Nothing is fetched or stored while assembling.

use anyhow::{Context, Result};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::asset::AssetDefinition;
use crate::assets::dynamic::get_dynamic_assets;
use crate::assets::embeddings::player_embeddings_asset;
use crate::assets::moneyball::{moneyball_assets, LEAGUE_PLAYER_STATS, MONEYBALL_JOB, PLAYER_PROFILES};
use crate::assets::source_assets::build_assets_for_source;
use crate::assets::static_assets::static_assets;
use crate::config::Config;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::error::PipelineError;
use crate::models::AssetKey;
use crate::source_balldontlie::BallDontLieSource;
use crate::static_data::{players_loader, teams_loader, Loader};
use crate::stats_api::default_registry;
use crate::store::Resources;
use crate::traits::{EndpointRegistry, SourceRegistry};

/// Everything the asset factories draw from.
pub struct Registries {
    pub sources: SourceRegistry,
    /// Endpoints to expose as assets, keyed by source name.
    pub source_endpoints: BTreeMap<String, Vec<String>>,
    pub endpoints: EndpointRegistry,
    pub players: Loader,
    pub teams: Loader,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub embedding_batch_size: usize,
}

impl Registries {
    /// The stock registries: balldontlie, every stats endpoint in
    /// [`crate::stats_api::ENDPOINTS`], and the configured embedder.
    pub fn from_config(config: &Config) -> Result<Self> {
        let bdl = &config.sources.balldontlie;
        let mut sources = SourceRegistry::new();
        sources.register(Arc::new(BallDontLieSource::from_config(bdl)?))?;

        let mut source_endpoints = BTreeMap::new();
        source_endpoints.insert("balldontlie".to_string(), bdl.endpoints.clone());

        Ok(Self {
            sources,
            source_endpoints,
            endpoints: default_registry(&config.stats_api)?,
            players: players_loader(&config.static_data),
            teams: teams_loader(&config.static_data),
            embedder: create_provider(&config.embedding)
                .context("Failed to create embedding provider")?,
            embedding_batch_size: config.embedding.batch_size,
        })
    }
}

/// The assembled asset graph.
pub struct Definitions {
    pub assets: Vec<AssetDefinition>,
    pub jobs: BTreeMap<String, Vec<AssetKey>>,
    pub resources: Resources,
}

impl Definitions {
    pub fn new(assets: Vec<AssetDefinition>, resources: Resources) -> Self {
        Self {
            assets,
            jobs: BTreeMap::new(),
            resources,
        }
    }

    pub fn with_job(mut self, name: impl Into<String>, keys: Vec<AssetKey>) -> Self {
        self.jobs.insert(name.into(), keys);
        self
    }

    pub fn get(&self, key: &AssetKey) -> Option<&AssetDefinition> {
        self.assets.iter().find(|a| &a.key == key)
    }

    pub fn job(&self, name: &str) -> Option<&[AssetKey]> {
        self.jobs.get(name).map(Vec::as_slice)
    }

    /// Resolve a selector: a full key (`nba_api/all_players`) or an asset
    /// name, which must be unique.
    pub fn resolve(&self, selector: &str) -> std::result::Result<&AssetDefinition, PipelineError> {
        let key = AssetKey::parse(selector);
        if let Some(asset) = self.get(&key) {
            return Ok(asset);
        }
        let matches: Vec<&AssetDefinition> =
            self.assets.iter().filter(|a| a.name() == selector).collect();
        match matches.as_slice() {
            [one] => Ok(*one),
            [] => Err(PipelineError::config(format!("unknown asset '{}'", selector))),
            many => Err(PipelineError::config(format!(
                "asset name '{}' is ambiguous: {}",
                selector,
                many.iter()
                    .map(|a| a.key.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }

    /// Reject duplicate keys, inputs on unknown assets, storage keys without
    /// a bound resource, and jobs naming unknown assets.
    pub fn validate(&self) -> std::result::Result<(), PipelineError> {
        let mut seen = HashSet::new();
        for asset in &self.assets {
            if !seen.insert(&asset.key) {
                return Err(PipelineError::config(format!(
                    "duplicate asset key '{}'",
                    asset.key
                )));
            }
        }

        for asset in &self.assets {
            if let Some(input) = asset.ins.iter().find(|i| !seen.contains(&i.key)) {
                return Err(PipelineError::config(format!(
                    "asset '{}' depends on unknown asset '{}'",
                    asset.key, input.key
                )));
            }
            if !self.resources.contains(&asset.io_manager_key) {
                return Err(PipelineError::config(format!(
                    "asset '{}' uses storage key '{}' which has no resource",
                    asset.key, asset.io_manager_key
                )));
            }
        }

        for (job, keys) in &self.jobs {
            if let Some(key) = keys.iter().find(|k| !seen.contains(k)) {
                return Err(PipelineError::config(format!(
                    "job '{}' selects unknown asset '{}'",
                    job, key
                )));
            }
        }
        Ok(())
    }
}

/// Compose static, moneyball, embeddings, dynamic-endpoint, and source
/// assets, declare the `moneyball_nba` job, and validate the result.
pub fn build_definitions(registries: Registries, resources: Resources) -> Result<Definitions> {
    let mut assets = static_assets(registries.players.clone(), registries.teams.clone());
    assets.extend(moneyball_assets(registries.players.clone(), &registries.endpoints));
    assets.push(player_embeddings_asset(
        registries.embedder.clone(),
        registries.embedding_batch_size,
    ));
    assets.extend(get_dynamic_assets(&registries.endpoints));

    for source in registries.sources.sources() {
        let endpoints = registries
            .source_endpoints
            .get(source.source_name())
            .cloned()
            .unwrap_or_default();
        assets.extend(build_assets_for_source(source.clone(), &endpoints));
    }

    let defs = Definitions::new(assets, resources).with_job(
        MONEYBALL_JOB,
        vec![
            AssetKey::from(LEAGUE_PLAYER_STATS),
            AssetKey::from(PLAYER_PROFILES),
        ],
    );
    defs.validate().context("Invalid asset definitions")?;
    tracing::debug!(assets = defs.assets.len(), jobs = defs.jobs.len(), "definitions built");
    Ok(defs)
}

/// Print every asset with its group, compute kind, storage key, and
/// inputs, followed by its description when it has one.
pub fn list_assets(defs: &Definitions) {
    println!(
        "{:<36} {:<12} {:<8} {:<20} INPUTS",
        "ASSET", "GROUP", "KIND", "STORAGE"
    );
    for asset in &defs.assets {
        let inputs: Vec<String> = asset.ins.iter().map(|i| i.key.to_string()).collect();
        println!(
            "{:<36} {:<12} {:<8} {:<20} {}",
            asset.key.to_string(),
            asset.group.as_deref().unwrap_or("-"),
            asset.compute_kind.as_deref().unwrap_or("-"),
            asset.io_manager_key,
            inputs.join(", ")
        );
        if let Some(description) = &asset.description {
            println!("    {}", description);
        }
    }
    for (job, keys) in &defs.jobs {
        let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        println!("job {}: {}", job, keys.join(", "));
    }
}
