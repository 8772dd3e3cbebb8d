//! One asset per stats endpoint in an [`EndpointRegistry`].
//!
//! The asset name is the lowercased endpoint identifier
//! (`PlayerGameLog` → `playergamelog`). The run's op config is passed to
//! the endpoint unchanged and doubles as the asset's accepted config
//! fields.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::asset::{AssetCompute, AssetContext, AssetDefinition, AssetInputs};
use crate::models::AssetOutput;
use crate::store::POSTGRES_IO_MANAGER;
use crate::traits::{EndpointRegistry, StatsEndpoint};

struct EndpointCompute {
    endpoint: Arc<dyn StatsEndpoint>,
}

#[async_trait]
impl AssetCompute for EndpointCompute {
    async fn compute(&self, ctx: &AssetContext, _inputs: AssetInputs) -> Result<AssetOutput> {
        let tables = self
            .endpoint
            .get_data_frames(&ctx.op_config)
            .await
            .with_context(|| format!("calling {}", self.endpoint.name()))?;

        if tables.is_empty() {
            tracing::warn!(asset = %ctx.key, "No data for {}", ctx.key.name());
            return Ok(AssetOutput::None);
        }
        Ok(AssetOutput::from_tables(tables))
    }
}

pub fn get_dynamic_assets(registry: &EndpointRegistry) -> Vec<AssetDefinition> {
    registry
        .endpoints()
        .iter()
        .map(|endpoint| {
            let name = endpoint.name().to_lowercase();
            AssetDefinition::new(
                &name,
                Arc::new(EndpointCompute {
                    endpoint: endpoint.clone(),
                }),
            )
            .io_manager(POSTGRES_IO_MANAGER)
            .group("stats_api")
            .compute_kind("api")
            .config_schema(endpoint.parameters())
        })
        .collect()
}
