//! Player-name embeddings.
//!
//! `player_embeddings_openai` reads `all_players`, embeds each `full_name`
//! in batches through the configured [`EmbeddingProvider`](crate::embedding::EmbeddingProvider),
//! and stores `id, full_name, embedding` in the document store, where
//! reruns upsert by `id`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Number, Value};
use std::sync::Arc;

use crate::asset::{AssetCompute, AssetContext, AssetDefinition, AssetInputs};
use crate::embedding::EmbeddingProvider;
use crate::models::{AssetKey, AssetOutput};
use crate::store::MONGO_IO_MANAGER;

pub const PLAYER_EMBEDDINGS: &str = "player_embeddings_openai";

struct PlayerEmbeddings {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
}

fn vector_value(vector: Vec<f32>) -> Value {
    Value::Array(
        vector
            .into_iter()
            .map(|x| {
                Number::from_f64(f64::from(x))
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            })
            .collect(),
    )
}

#[async_trait]
impl AssetCompute for PlayerEmbeddings {
    async fn compute(&self, ctx: &AssetContext, mut inputs: AssetInputs) -> Result<AssetOutput> {
        let mut players = inputs.take("all_players")?;
        let texts: Vec<String> = players
            .column("full_name")
            .map(|v| match v {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            })
            .collect();
        if texts.len() != players.len() {
            anyhow::bail!("all_players has no full_name column");
        }

        let mut embeddings = Vec::with_capacity(texts.len());
        for (i, batch) in texts.chunks(self.batch_size.max(1)).enumerate() {
            tracing::debug!(batch = i, size = batch.len(), model = self.provider.model_name(), "embedding");
            let vectors = self
                .provider
                .embed(batch)
                .await
                .with_context(|| format!("embedding batch {}", i))?;
            embeddings.extend(vectors.into_iter().map(vector_value));
        }

        players.set_column("embedding", embeddings)?;
        let out = players.select(&["id", "full_name", "embedding"]);
        tracing::info!(asset = %ctx.key, rows = out.len(), "embedded player names");
        Ok(out.into())
    }
}

/// Embeds every player's `full_name` and stores `id, full_name, embedding`
/// as documents.
pub fn player_embeddings_asset(
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
) -> AssetDefinition {
    AssetDefinition::new(
        PLAYER_EMBEDDINGS,
        Arc::new(PlayerEmbeddings {
            provider,
            batch_size,
        }),
    )
    .group("embeddings")
    .compute_kind("openai")
    .io_manager(MONGO_IO_MANAGER)
    .input("all_players", AssetKey::new(["nba_api", "all_players"]))
    .description("Player-name embeddings")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Table;
    use serde_json::json;
    use std::sync::Mutex;

    struct Lengths {
        batches: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl EmbeddingProvider for Lengths {
        fn model_name(&self) -> &str {
            "lengths"
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.batches.lock().unwrap().push(texts.len());
            Ok(texts.iter().map(|t| vec![t.len() as f32]).collect())
        }
    }

    #[tokio::test]
    async fn embeds_in_batches_and_projects() {
        let provider = Arc::new(Lengths {
            batches: Mutex::new(Vec::new()),
        });
        let asset = player_embeddings_asset(provider.clone(), 2);
        let players = Table::from_values(vec![
            json!({"id": 1, "full_name": "Al", "is_active": true}),
            json!({"id": 2, "full_name": "Bob", "is_active": false}),
            json!({"id": 3, "full_name": "Cade", "is_active": true}),
        ])
        .unwrap();

        let ctx = AssetContext::new(asset.key.clone(), "run", Default::default());
        let out = asset
            .compute
            .compute(&ctx, AssetInputs::new().with("all_players", players))
            .await
            .unwrap();
        let table = out.as_table().unwrap();

        assert_eq!(table.columns(), &["id", "full_name", "embedding"]);
        assert_eq!(table.rows()[2]["embedding"], json!([4.0]));
        assert_eq!(*provider.batches.lock().unwrap(), vec![2, 1]);
        assert_eq!(asset.io_manager_key, MONGO_IO_MANAGER);
    }

    #[tokio::test]
    async fn missing_names_column_is_an_error() {
        let provider = Arc::new(Lengths {
            batches: Mutex::new(Vec::new()),
        });
        let asset = player_embeddings_asset(provider, 500);
        let players = Table::from_values(vec![json!({"id": 1})]).unwrap();
        let ctx = AssetContext::new(asset.key.clone(), "run", Default::default());
        let result = asset
            .compute
            .compute(&ctx, AssetInputs::new().with("all_players", players))
            .await;
        assert!(result.is_err());
    }
}
