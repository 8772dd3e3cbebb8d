//! Stats API endpoints registered for the dynamic asset factory.
//!
//! Each [`EndpointDef`] names an endpoint, the path it lives at, and the
//! op-config parameters it accepts together with the query-string name and
//! default each one maps to. [`default_registry`] registers every entry in
//! [`ENDPOINTS`]; adding an endpoint means adding an entry there.
//!
//! Responses use the `resultSets[] { name, headers, rowSet }` layout and
//! produce one table per result set.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, ORIGIN, REFERER, USER_AGENT};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::config::StatsApiConfig;
use crate::error::{PipelineError, Result};
use crate::models::{Params, Table};
use crate::source_balldontlie::param_string;
use crate::traits::{EndpointRegistry, StatsEndpoint};

/// One op-config parameter of an endpoint.
#[derive(Debug, Clone, Copy)]
pub struct EndpointParam {
    /// snake_case name used in op config.
    pub name: &'static str,
    /// Query-string name sent to the API.
    pub query: &'static str,
    /// `None` marks the parameter as required.
    pub default: Option<&'static str>,
}

const fn param(name: &'static str, query: &'static str, default: Option<&'static str>) -> EndpointParam {
    EndpointParam {
        name,
        query,
        default,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EndpointDef {
    pub name: &'static str,
    pub path: &'static str,
    pub params: &'static [EndpointParam],
}

const SEASON: Option<&str> = Some("2024-25");
const REGULAR_SEASON: Option<&str> = Some("Regular Season");
const BLANK: Option<&str> = Some("");

pub const PLAYER_GAME_LOG: EndpointDef = EndpointDef {
    name: "PlayerGameLog",
    path: "playergamelog",
    params: &[
        param("player_id", "PlayerID", None),
        param("season", "Season", SEASON),
        param("season_type_all_star", "SeasonType", REGULAR_SEASON),
        param("date_from_nullable", "DateFrom", BLANK),
        param("date_to_nullable", "DateTo", BLANK),
        param("league_id_nullable", "LeagueID", BLANK),
    ],
};

pub const ENDPOINTS: &[EndpointDef] = &[
    EndpointDef {
        name: "CommonAllPlayers",
        path: "commonallplayers",
        params: &[
            param("is_only_current_season", "IsOnlyCurrentSeason", Some("0")),
            param("league_id", "LeagueID", Some("00")),
            param("season", "Season", SEASON),
        ],
    },
    EndpointDef {
        name: "CommonPlayerInfo",
        path: "commonplayerinfo",
        params: &[
            param("player_id", "PlayerID", None),
            param("league_id_nullable", "LeagueID", BLANK),
        ],
    },
    EndpointDef {
        name: "CommonTeamRoster",
        path: "commonteamroster",
        params: &[
            param("team_id", "TeamID", None),
            param("season", "Season", SEASON),
            param("league_id_nullable", "LeagueID", BLANK),
        ],
    },
    EndpointDef {
        name: "LeagueGameLog",
        path: "leaguegamelog",
        params: &[
            param("counter", "Counter", Some("0")),
            param("direction", "Direction", Some("ASC")),
            param("league_id", "LeagueID", Some("00")),
            param("player_or_team_abbreviation", "PlayerOrTeam", Some("T")),
            param("season", "Season", SEASON),
            param("season_type_all_star", "SeasonType", REGULAR_SEASON),
            param("sorter", "Sorter", Some("DATE")),
            param("date_from_nullable", "DateFrom", BLANK),
            param("date_to_nullable", "DateTo", BLANK),
        ],
    },
    PLAYER_GAME_LOG,
    EndpointDef {
        name: "ScoreboardV2",
        path: "scoreboardv2",
        params: &[
            param("game_date", "GameDate", None),
            param("league_id", "LeagueID", Some("00")),
            param("day_offset", "DayOffset", Some("0")),
        ],
    },
    EndpointDef {
        name: "TeamGameLog",
        path: "teamgamelog",
        params: &[
            param("team_id", "TeamID", None),
            param("season", "Season", SEASON),
            param("season_type_all_star", "SeasonType", REGULAR_SEASON),
            param("date_from_nullable", "DateFrom", BLANK),
            param("date_to_nullable", "DateTo", BLANK),
            param("league_id_nullable", "LeagueID", BLANK),
        ],
    },
];

/// HTTP client for the stats API with the browser-style headers it
/// requires.
pub struct StatsClient {
    base_url: String,
    client: reqwest::Client,
}

impl StatsClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36",
            ),
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        headers.insert(REFERER, HeaderValue::from_static("https://www.nba.com/"));
        headers.insert(ORIGIN, HeaderValue::from_static("https://www.nba.com"));
        headers.insert("x-nba-stats-origin", HeaderValue::from_static("stats"));
        headers.insert("x-nba-stats-token", HeaderValue::from_static("true"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::config(format!("http client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn from_config(config: &StatsApiConfig) -> Result<Self> {
        Self::new(
            config.base_url.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub async fn get(&self, path: &str, query: &[(String, String)]) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| PipelineError::transport(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::transport(&url, format!("HTTP {}", status)));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| PipelineError::transport(&url, format!("invalid JSON body: {}", e)))
    }
}

/// Split a stats API response into one table per result set.
///
/// Accepts both the `resultSets: [...]` layout and the single
/// `resultSet: {...}` layout some endpoints use.
pub fn parse_result_sets(raw: &Value) -> Result<Vec<Table>> {
    let sets: Vec<&Value> = match (raw.get("resultSets"), raw.get("resultSet")) {
        (Some(Value::Array(sets)), _) => sets.iter().collect(),
        (_, Some(set @ Value::Object(_))) => vec![set],
        _ => {
            return Err(PipelineError::shape(
                "response has no resultSets array or resultSet object",
            ))
        }
    };

    sets.into_iter()
        .enumerate()
        .map(|(i, set)| {
            let headers = set
                .get("headers")
                .and_then(Value::as_array)
                .ok_or_else(|| PipelineError::shape(format!("result set {} has no headers", i)))?
                .iter()
                .map(|h| {
                    h.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| PipelineError::shape(format!("result set {} has a non-string header", i)))
                })
                .collect::<Result<Vec<String>>>()?;
            let rowset = set
                .get("rowSet")
                .and_then(Value::as_array)
                .ok_or_else(|| PipelineError::shape(format!("result set {} has no rowSet", i)))?
                .iter()
                .map(|row| {
                    row.as_array()
                        .cloned()
                        .ok_or_else(|| PipelineError::shape(format!("result set {} has a non-list row", i)))
                })
                .collect::<Result<Vec<Vec<Value>>>>()?;
            Table::from_rowset(headers, rowset)
        })
        .collect()
}

/// A [`StatsEndpoint`] backed by an [`EndpointDef`].
pub struct StatsApiEndpoint {
    def: EndpointDef,
    client: Arc<StatsClient>,
}

impl StatsApiEndpoint {
    pub fn new(def: EndpointDef, client: Arc<StatsClient>) -> Self {
        Self { def, client }
    }

    /// Resolve op config into query pairs, applying defaults.
    pub fn query_for(&self, params: &Params) -> Result<Vec<(String, String)>> {
        if let Some(unknown) = params
            .keys()
            .find(|k| !self.def.params.iter().any(|p| p.name == k.as_str()))
        {
            return Err(PipelineError::config(format!(
                "{} does not accept parameter '{}'",
                self.def.name, unknown
            )));
        }

        self.def
            .params
            .iter()
            .map(|p| {
                let value = params
                    .get(p.name)
                    .and_then(param_string)
                    .or_else(|| p.default.map(str::to_string))
                    .ok_or_else(|| {
                        PipelineError::config(format!(
                            "{} requires parameter '{}'",
                            self.def.name, p.name
                        ))
                    })?;
                Ok::<_, PipelineError>((p.query.to_string(), value))
            })
            .collect()
    }
}

#[async_trait]
impl StatsEndpoint for StatsApiEndpoint {
    fn name(&self) -> &str {
        self.def.name
    }

    fn parameters(&self) -> Vec<String> {
        self.def.params.iter().map(|p| p.name.to_string()).collect()
    }

    async fn get_data_frames(&self, params: &Params) -> Result<Vec<Table>> {
        let query = self.query_for(params)?;
        let raw = self.client.get(self.def.path, &query).await?;
        parse_result_sets(&raw)
    }
}

/// Register every endpoint in [`ENDPOINTS`] against one shared client.
pub fn default_registry(config: &StatsApiConfig) -> Result<EndpointRegistry> {
    let client = Arc::new(StatsClient::from_config(config)?);
    let mut registry = EndpointRegistry::new();
    for def in ENDPOINTS {
        registry.register(Arc::new(StatsApiEndpoint::new(*def, client.clone())))?;
    }
    Ok(registry)
}
