//! # nba-etl CLI
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `nba-etl assets` | List every asset with its group, storage key, and inputs |
//! | `nba-etl sources` | List registered sources and stats endpoints |
//! | `nba-etl check` | Build and validate the asset definitions |
//! | `nba-etl materialize <ASSET>...` | Run assets (or `--job`, `--all`) locally |
//! | `nba-etl fetch <source> <endpoint>` | Fetch one source endpoint and print JSON lines |
//!
//! ## Examples
//!
//! ```bash
//! # Offline run of the static snapshots
//! nba-etl materialize all_players all_teams --config ./config/nba-etl.toml
//!
//! # Moneyball job against PostgreSQL
//! nba-etl materialize --job moneyball_nba
//!
//! # One balldontlie page
//! nba-etl fetch balldontlie players --param per_page=25
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use nba_etl::config::{self, Config, StorageMode};
use nba_etl::definitions::{build_definitions, list_assets, Definitions, Registries};
use nba_etl::logging;
use nba_etl::materialize::{materialize, RunConfig, Selection};
use nba_etl::models::Params;
use nba_etl::sources;
use nba_etl::store::memory::{MemoryDocumentBackend, MemoryRelationalBackend};
use nba_etl::store::Resources;

#[derive(Parser)]
#[command(
    name = "nba-etl",
    about = "NBA statistics pipeline: sources, assets, and storage adapters",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). A missing file means defaults.
    #[arg(long, global = true, default_value = "./config/nba-etl.toml")]
    config: PathBuf,

    /// Log level when `RUST_LOG` is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every asset.
    Assets,

    /// List registered sources and stats endpoints.
    Sources,

    /// Build and validate the asset definitions without running anything.
    Check,

    /// Materialize assets with the local materializer.
    ///
    /// Assets are named by asset name (`all_players`) or full key
    /// (`nba_api/all_players`).
    Materialize {
        /// Asset names or keys.
        assets: Vec<String>,

        /// Run a named job instead.
        #[arg(long, conflicts_with_all = ["assets", "all"])]
        job: Option<String>,

        /// Run every asset.
        #[arg(long, conflicts_with = "assets")]
        all: bool,
    },

    /// Fetch and normalize one endpoint of a source.
    Fetch {
        source: String,
        endpoint: String,

        /// Query parameter as KEY=VALUE (repeatable).
        #[arg(long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,
    },
}

/// Parse a `key=value` pair for `--param` arguments.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

/// Definitions bound to in-memory storage. The storage keys are the same
/// in every mode, so listing and validation need no database.
fn offline_definitions(cfg: &Config) -> Result<Definitions> {
    let resources = Resources::from_backends(
        cfg,
        Arc::new(MemoryRelationalBackend::new()),
        Arc::new(MemoryDocumentBackend::new()),
    );
    build_definitions(Registries::from_config(cfg)?, resources)
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Assets => {
            let defs = offline_definitions(&cfg)?;
            list_assets(&defs);
        }
        Commands::Sources => {
            let registries = Registries::from_config(&cfg)?;
            sources::list_sources(&registries)?;
        }
        Commands::Check => {
            let defs = offline_definitions(&cfg)?;
            let mode = match cfg.storage.mode {
                StorageMode::External => "external",
                StorageMode::Memory => "memory",
            };
            println!(
                "OK: {} assets, {} jobs, storage mode {}",
                defs.assets.len(),
                defs.jobs.len(),
                mode
            );
        }
        Commands::Materialize { assets, job, all } => {
            let selection = match (job, all) {
                (Some(job), _) => Selection::Job(job),
                (None, true) => Selection::All,
                (None, false) => Selection::Assets(assets),
            };
            let resources = Resources::from_config(&cfg).await?;
            let defs = build_definitions(Registries::from_config(&cfg)?, resources)?;

            let result = materialize(&defs, &selection, &RunConfig::from_config(&cfg)).await;
            defs.resources.close().await;
            let summary = result?;

            println!("{:<36} {:<20} {:>8} {:>10}", "ASSET", "STORAGE", "ROWS", "MS");
            for run in &summary.assets {
                println!(
                    "{:<36} {:<20} {:>8} {:>10}",
                    run.key.to_string(),
                    run.storage,
                    run.rows,
                    run.elapsed_ms
                );
            }
            println!(
                "Run {} materialized {} assets ({} rows).",
                summary.run_id,
                summary.assets.len(),
                summary.total_rows()
            );
        }
        Commands::Fetch {
            source,
            endpoint,
            params,
        } => {
            let registries = Registries::from_config(&cfg)?;
            let params: Params = params
                .into_iter()
                .map(|(k, v)| (k, serde_json::Value::String(v)))
                .collect();
            let table = sources::fetch_endpoint(&registries, &source, &endpoint, &params).await?;
            sources::print_json_lines(&table)?;
            tracing::info!(rows = table.len(), "fetched");
        }
    }

    Ok(())
}
