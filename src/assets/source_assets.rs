//! One asset per endpoint of an [`ApiSource`].
//!
//! Keys are `[source_name, endpoint]` and the group is the source name, so
//! relational storage lands each endpoint in `source_name.endpoint`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::asset::{AssetCompute, AssetContext, AssetDefinition, AssetInputs};
use crate::models::AssetOutput;
use crate::traits::ApiSource;

struct SourceEndpointCompute {
    source: Arc<dyn ApiSource>,
    endpoint: String,
}

#[async_trait]
impl AssetCompute for SourceEndpointCompute {
    async fn compute(&self, ctx: &AssetContext, _inputs: AssetInputs) -> Result<AssetOutput> {
        let source = self.source.source_name();
        tracing::info!(source, endpoint = %self.endpoint, "fetching");

        let raw = self
            .source
            .fetch_data(&self.endpoint, None)
            .await
            .with_context(|| format!("fetching {}/{}", source, self.endpoint))?;
        let table = self
            .source
            .normalize_data(raw, &self.endpoint)
            .with_context(|| format!("normalizing {}/{}", source, self.endpoint))?;

        tracing::info!(asset = %ctx.key, rows = table.len(), "normalized");
        Ok(table.into())
    }
}

pub fn build_assets_for_source<S: AsRef<str>>(
    source: Arc<dyn ApiSource>,
    endpoints: &[S],
) -> Vec<AssetDefinition> {
    let name = source.source_name().to_string();
    endpoints
        .iter()
        .map(|endpoint| {
            let endpoint = endpoint.as_ref();
            let compute = SourceEndpointCompute {
                source: source.clone(),
                endpoint: endpoint.to_string(),
            };
            AssetDefinition::new(endpoint, Arc::new(compute))
                .key_prefix(&[name.as_str()])
                .group(name.as_str())
                .compute_kind("api")
                .description(format!("{} /{}", name, endpoint))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::models::{AssetKey, Params, Table};
    use crate::traits::normalize_envelope;
    use serde_json::{json, Value};

    struct Canned;

    #[async_trait]
    impl ApiSource for Canned {
        fn source_name(&self) -> &str {
            "canned"
        }

        async fn fetch_data(
            &self,
            endpoint: &str,
            _params: Option<&Params>,
        ) -> crate::error::Result<Value> {
            match endpoint {
                "players" => Ok(json!({"data": [{"id": 1}, {"id": 2}, {"id": 3}]})),
                _ => Err(PipelineError::transport(endpoint, "HTTP 404")),
            }
        }

        fn normalize_data(&self, raw: Value, _endpoint: &str) -> crate::error::Result<Table> {
            normalize_envelope(raw, "data")
        }
    }

    fn ctx(asset: &AssetDefinition) -> AssetContext {
        AssetContext::new(asset.key.clone(), "run", Params::new())
    }

    #[test]
    fn one_asset_per_endpoint() {
        let assets = build_assets_for_source(Arc::new(Canned), &["players", "teams"]);
        assert_eq!(assets.len(), 2);
        assert_eq!(assets[0].key, AssetKey::new(["canned", "players"]));
        assert_eq!(assets[1].key, AssetKey::new(["canned", "teams"]));
        assert!(assets.iter().all(|a| a.group.as_deref() == Some("canned")));
        assert!(assets.iter().all(|a| a.compute_kind.as_deref() == Some("api")));
    }

    #[tokio::test]
    async fn steps_fail_independently() {
        let assets = build_assets_for_source(Arc::new(Canned), &["players", "teams"]);

        let ok = assets[0]
            .compute
            .compute(&ctx(&assets[0]), AssetInputs::new())
            .await
            .unwrap();
        assert_eq!(ok.row_count(), 3);

        let err = assets[1]
            .compute
            .compute(&ctx(&assets[1]), AssetInputs::new())
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("canned/teams"));
    }
}
