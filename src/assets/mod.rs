//! Asset factories.
//!
//! Each submodule turns one kind of data producer into
//! [`AssetDefinition`](crate::asset::AssetDefinition)s:
//!
//! - [`static_assets`]: bundled snapshots (`nba_api/all_players`, `nba_api/all_teams`)
//! - [`source_assets`]: one asset per endpoint of an [`ApiSource`](crate::traits::ApiSource)
//! - [`dynamic`]: one asset per registered stats endpoint
//! - [`moneyball`]: per-player aggregates and profiles
//! - [`embeddings`]: player-name embeddings stored as documents

pub mod dynamic;
pub mod embeddings;
pub mod moneyball;
pub mod source_assets;
pub mod static_assets;
