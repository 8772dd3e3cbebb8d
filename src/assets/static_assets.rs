//! Assets backed by the bundled player and team snapshots.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::asset::{AssetCompute, AssetContext, AssetDefinition, AssetInputs};
use crate::models::AssetOutput;
use crate::static_data::Loader;

/// Key prefix (and relational schema) for the bundled snapshots.
pub const NBA_API_PREFIX: &str = "nba_api";

struct StaticCompute {
    loader: Loader,
}

#[async_trait]
impl AssetCompute for StaticCompute {
    async fn compute(&self, ctx: &AssetContext, _inputs: AssetInputs) -> Result<AssetOutput> {
        let table = (self.loader)().with_context(|| format!("loading {}", ctx.key))?;
        tracing::info!(asset = %ctx.key, rows = table.len(), "loaded static snapshot");
        Ok(table.into())
    }
}

/// Wrap a zero-argument loader as an asset. The first prefix segment, if
/// any, doubles as the asset group.
pub fn make_static_asset<S: AsRef<str>>(
    name: &str,
    loader: Loader,
    key_prefix: &[S],
) -> AssetDefinition {
    let asset = AssetDefinition::new(name, Arc::new(StaticCompute { loader }))
        .key_prefix(key_prefix)
        .compute_kind("static");
    match key_prefix.first() {
        Some(group) => asset.group(group.as_ref()),
        None => asset,
    }
}

/// `nba_api/all_players` and `nba_api/all_teams`.
pub fn static_assets(players: Loader, teams: Loader) -> Vec<AssetDefinition> {
    vec![
        make_static_asset("all_players", players, &[NBA_API_PREFIX])
            .description("Every player known to the static snapshot"),
        make_static_asset("all_teams", teams, &[NBA_API_PREFIX])
            .description("All thirty franchises"),
    ]
}
