//! Bundled static datasets (players and teams).
//!
//! The snapshots are compiled into the binary. A config override can point
//! either dataset at a JSON file holding an array of objects instead.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::StaticDataConfig;
use crate::error::{PipelineError, Result};
use crate::models::Table;

const PLAYERS_JSON: &str = include_str!("../data/players.json");
const TEAMS_JSON: &str = include_str!("../data/teams.json");

/// A zero-argument loader producing a full snapshot.
pub type Loader = Arc<dyn Fn() -> Result<Table> + Send + Sync>;

pub fn load_players() -> Result<Table> {
    parse_snapshot(PLAYERS_JSON)
}

pub fn load_teams() -> Result<Table> {
    parse_snapshot(TEAMS_JSON)
}

fn parse_snapshot(text: &str) -> Result<Table> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    match value {
        serde_json::Value::Array(items) => Table::from_values(items),
        _ => Err(PipelineError::shape("static snapshot must be a JSON array")),
    }
}

fn load_file(path: &Path) -> Result<Table> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        PipelineError::config(format!("cannot read {}: {}", path.display(), e))
    })?;
    parse_snapshot(&text)
}

fn loader_for(path: Option<PathBuf>, bundled: fn() -> Result<Table>) -> Loader {
    if let Some(path) = path {
        return Arc::new(move || load_file(&path));
    }
    Arc::new(bundled)
}

/// Loaders resolved against the config overrides.
pub fn players_loader(config: &StaticDataConfig) -> Loader {
    loader_for(config.players_path.clone(), load_players)
}

pub fn teams_loader(config: &StaticDataConfig) -> Loader {
    loader_for(config.teams_path.clone(), load_teams)
}
