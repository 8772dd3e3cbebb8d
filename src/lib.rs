//! # nba-etl
//!
//! Asset definitions, source adapters, and storage adapters for an NBA
//! statistics pipeline.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Sources      │──▶│ Assets       │──▶│ I/O managers │
//! │ REST / stats │   │ fetch, join, │   │ Postgres     │
//! │ static data  │   │ embed        │   │ MongoDB      │
//! └──────────────┘   └──────────────┘   └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration with environment fallbacks |
//! | [`error`] | Error type shared by sources, endpoints, and storage |
//! | [`logging`] | Tracing subscriber setup |
//! | [`models`] | Tables, asset keys, asset outputs |
//! | [`traits`] | Source and endpoint traits plus their registries |
//! | [`source_balldontlie`] | balldontlie REST source |
//! | [`stats_api`] | Stats API endpoints |
//! | [`static_data`] | Bundled player and team snapshots |
//! | [`asset`] | Asset definition model |
//! | [`assets`] | Asset factories |
//! | [`embedding`] | Embedding providers |
//! | [`store`] | Relational and document storage adapters |
//! | [`definitions`] | Pipeline assembly |
//! | [`materialize`] | Local materializer |
//! | [`sources`] | Source listing and one-off fetches |

pub mod asset;
pub mod assets;
pub mod config;
pub mod definitions;
pub mod embedding;
pub mod error;
pub mod logging;
pub mod materialize;
pub mod models;
pub mod source_balldontlie;
pub mod sources;
pub mod static_data;
pub mod stats_api;
pub mod store;
pub mod traits;
