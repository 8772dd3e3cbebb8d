//! Per-player aggregates ("moneyball") built from game logs.
//!
//! `league_player_stats` averages each active player's game log for one
//! season and derives shooting efficiency; `player_profiles` joins those
//! aggregates with the static player snapshot.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Number, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::asset::{AssetCompute, AssetContext, AssetDefinition, AssetInputs};
use crate::models::{AssetKey, AssetOutput, Params, Record, Table};
use crate::static_data::Loader;
use crate::store::POSTGRES_IO_MANAGER;
use crate::traits::{EndpointRegistry, StatsEndpoint};

pub const LEAGUE_PLAYER_STATS: &str = "league_player_stats";
pub const PLAYER_PROFILES: &str = "player_profiles";
/// Job selecting both moneyball assets.
pub const MONEYBALL_JOB: &str = "moneyball_nba";

pub const DEFAULT_SEASON: &str = "2024-25";
pub const DEFAULT_MAX_PLAYERS: i64 = 200;
const GAME_LOG_ENDPOINT: &str = "PlayerGameLog";

/// Box-score columns averaged per player.
pub const STAT_COLUMNS: [&str; 13] = [
    "PTS", "REB", "AST", "STL", "BLK", "TOV", "FG3M", "FG3A", "FGM", "FGA", "FTM", "FTA",
    "PLUS_MINUS",
];

/// Output column order of `player_profiles`.
pub const PROFILE_COLUMNS: [&str; 19] = [
    "player_id",
    "player_name",
    "full_name",
    "team_id",
    "PTS",
    "REB",
    "AST",
    "STL",
    "BLK",
    "TOV",
    "PLUS_MINUS",
    "FGM",
    "FGA",
    "FTM",
    "FTA",
    "FG3M",
    "FG3A",
    "3P%",
    "TS%",
];

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn float(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

/// Mean of every stat column, skipping missing cells. A column with no
/// numeric cells averages to null. An empty log yields `None`.
pub fn average_game_log(log: &Table) -> Option<Record> {
    if log.is_empty() {
        return None;
    }
    let mut averages = Record::new();
    for col in STAT_COLUMNS {
        let values: Vec<f64> = log.column(col).filter_map(number).collect();
        let mean = if values.is_empty() {
            Value::Null
        } else {
            float(values.iter().sum::<f64>() / values.len() as f64)
        };
        averages.insert(col.to_string(), mean);
    }
    Some(averages)
}

/// True shooting: `PTS / (2 * (FGA + 0.44 * FTA))`, 0.5 with no attempts.
pub fn true_shooting(pts: f64, fga: f64, fta: f64) -> f64 {
    let attempts = fga + 0.44 * fta;
    if attempts == 0.0 {
        0.5
    } else {
        pts / (2.0 * attempts)
    }
}

/// `FG3M / FG3A`, 0.0 with no attempts.
pub fn three_point_pct(fg3m: f64, fg3a: f64) -> f64 {
    if fg3a == 0.0 {
        0.0
    } else {
        fg3m / fg3a
    }
}

/// Append `TS%` and `3P%`. Missing inputs count as zero.
pub fn add_derived_columns(table: &mut Table) -> crate::error::Result<()> {
    let get = |row: &Record, col: &str| row.get(col).and_then(number).unwrap_or(0.0);
    let (ts, three): (Vec<Value>, Vec<Value>) = table
        .rows()
        .iter()
        .map(|row| {
            (
                float(true_shooting(get(row, "PTS"), get(row, "FGA"), get(row, "FTA"))),
                float(three_point_pct(get(row, "FG3M"), get(row, "FG3A"))),
            )
        })
        .unzip();
    table.set_column("TS%", ts)?;
    table.set_column("3P%", three)
}

/// Left-join stats with player metadata on `player_id = id`, then project
/// [`PROFILE_COLUMNS`], dropping any that are absent.
pub fn join_profiles(stats: &Table, players: &Table) -> Table {
    if stats.is_empty() {
        return Table::empty();
    }

    let carried: Vec<&str> = ["full_name", "team_id"]
        .into_iter()
        .filter(|c| players.has_column(c))
        .collect();
    let by_id: HashMap<String, &Record> = players
        .rows()
        .iter()
        .filter_map(|row| row.get("id").map(|id| (id.to_string(), row)))
        .collect();

    let mut joined = Table::with_columns(stats.columns().iter().cloned());
    for row in stats.rows() {
        let mut record = row.clone();
        let meta = row
            .get("player_id")
            .and_then(|id| by_id.get(&id.to_string()));
        for col in &carried {
            let value = meta
                .and_then(|m| m.get(*col))
                .cloned()
                .unwrap_or(Value::Null);
            record.insert(col.to_string(), value);
        }
        joined.push_row(record);
    }
    joined.select(&PROFILE_COLUMNS)
}

/// Cap on players aggregated per run. Unset or `0` falls back to
/// [`DEFAULT_MAX_PLAYERS`]; a negative value removes the cap.
pub fn player_limit(max_players: Option<i64>) -> Option<usize> {
    match max_players {
        None | Some(0) => Some(DEFAULT_MAX_PLAYERS as usize),
        Some(n) if n < 0 => None,
        Some(n) => Some(n as usize),
    }
}

struct LeaguePlayerStats {
    players: Loader,
    game_log: Option<Arc<dyn StatsEndpoint>>,
}

#[async_trait]
impl AssetCompute for LeaguePlayerStats {
    async fn compute(&self, ctx: &AssetContext, _inputs: AssetInputs) -> Result<AssetOutput> {
        let game_log = self
            .game_log
            .as_ref()
            .with_context(|| format!("no {} endpoint is registered", GAME_LOG_ENDPOINT))?;

        let season = ctx
            .config_str("season")
            .unwrap_or_else(|| DEFAULT_SEASON.to_string());
        let limit = player_limit(ctx.config_i64("max_players")?);

        let players = (self.players)().context("loading player snapshot")?;
        let mut active: Vec<&Record> = players
            .rows()
            .iter()
            .filter(|p| p.get("is_active").and_then(Value::as_bool) == Some(true))
            .collect();
        if let Some(limit) = limit {
            active.truncate(limit);
        }
        tracing::info!(season = %season, players = active.len(), "aggregating game logs");

        let mut stats = Table::empty();
        for player in active {
            let Some(id) = player.get("id").cloned() else {
                continue;
            };
            let mut params = Params::new();
            params.insert("player_id".into(), id.clone());
            params.insert("season".into(), Value::String(season.clone()));

            let log = match game_log.get_data_frames(&params).await {
                Ok(tables) => tables.into_iter().next().unwrap_or_default(),
                Err(e) => {
                    tracing::warn!(player_id = %id, error = %e, "skipping player");
                    continue;
                }
            };
            let Some(mut row) = average_game_log(&log) else {
                continue;
            };
            row.insert("player_id".into(), id);
            row.insert(
                "player_name".into(),
                player.get("full_name").cloned().unwrap_or(Value::Null),
            );
            stats.push_row(row);
        }

        if stats.is_empty() {
            tracing::warn!(asset = %ctx.key, "no game logs aggregated");
            return Ok(Table::empty().into());
        }
        add_derived_columns(&mut stats)?;
        tracing::info!(asset = %ctx.key, rows = stats.len(), "aggregated");
        Ok(stats.into())
    }
}

struct PlayerProfiles;

#[async_trait]
impl AssetCompute for PlayerProfiles {
    async fn compute(&self, ctx: &AssetContext, mut inputs: AssetInputs) -> Result<AssetOutput> {
        let stats = inputs.take(LEAGUE_PLAYER_STATS)?;
        let players = inputs.take("all_players")?;
        let profiles = join_profiles(&stats, &players);
        tracing::info!(asset = %ctx.key, rows = profiles.len(), "joined profiles");
        Ok(profiles.into())
    }
}

/// `league_player_stats` and `player_profiles`. Player metadata comes from
/// `players`; game logs from the registry's `PlayerGameLog` endpoint.
pub fn moneyball_assets(players: Loader, endpoints: &EndpointRegistry) -> Vec<AssetDefinition> {
    let stats = LeaguePlayerStats {
        players,
        game_log: endpoints.find(GAME_LOG_ENDPOINT),
    };
    vec![
        AssetDefinition::new(LEAGUE_PLAYER_STATS, Arc::new(stats))
            .group("moneyball")
            .io_manager(POSTGRES_IO_MANAGER)
            .config_schema(["season", "max_players"])
            .description("Per-game averages and shooting efficiency for active players"),
        AssetDefinition::new(PLAYER_PROFILES, Arc::new(PlayerProfiles))
            .group("moneyball")
            .io_manager(POSTGRES_IO_MANAGER)
            .input(LEAGUE_PLAYER_STATS, LEAGUE_PLAYER_STATS)
            .input("all_players", AssetKey::new(["nba_api", "all_players"]))
            .description("Player metadata joined with aggregated stats"),
    ]
}
