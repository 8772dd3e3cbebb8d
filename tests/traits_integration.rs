//! Integration tests for the extension traits.
//!
//! Custom sources, stats endpoints, and embedding providers are plugged
//! into the real factories, assembly, and materializer, with the in-memory
//! storage backends standing in for PostgreSQL and MongoDB.

use async_trait::async_trait;
use nba_etl::asset::AssetDefinition;
use nba_etl::assets::dynamic::get_dynamic_assets;
use nba_etl::assets::source_assets::build_assets_for_source;
use nba_etl::config::Config;
use nba_etl::definitions::{build_definitions, Definitions, Registries};
use nba_etl::embedding::EmbeddingProvider;
use nba_etl::error::{PipelineError, Result};
use nba_etl::materialize::{materialize, RunConfig, Selection};
use nba_etl::models::{AssetKey, AssetOutput, Params, Table};
use nba_etl::static_data::{load_players, Loader};
use nba_etl::store::memory::{MemoryDocumentBackend, MemoryRelationalBackend};
use nba_etl::store::{
    DocumentIoManager, IoManager, RelationalIoManager, Resources, StorageContext,
};
use nba_etl::traits::{normalize_envelope, ApiSource, EndpointRegistry, SourceRegistry, StatsEndpoint};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

// ─── Test Source ────────────────────────────────────────────────────

/// Serves whatever payload is currently loaded.
struct ScriptedSource {
    payload: Mutex<Value>,
}

impl ScriptedSource {
    fn new(payload: Value) -> Self {
        Self {
            payload: Mutex::new(payload),
        }
    }

    fn set(&self, payload: Value) {
        *self.payload.lock().unwrap() = payload;
    }
}

#[async_trait]
impl ApiSource for ScriptedSource {
    fn source_name(&self) -> &str {
        "scripted"
    }

    async fn fetch_data(&self, _endpoint: &str, _params: Option<&Params>) -> Result<Value> {
        Ok(self.payload.lock().unwrap().clone())
    }

    fn normalize_data(&self, raw: Value, _endpoint: &str) -> Result<Table> {
        normalize_envelope(raw, "data")
    }
}

// ─── Test Endpoint ──────────────────────────────────────────────────

struct FixedEndpoint {
    name: &'static str,
    tables: Vec<Table>,
}

#[async_trait]
impl StatsEndpoint for FixedEndpoint {
    fn name(&self) -> &str {
        self.name
    }

    fn parameters(&self) -> Vec<String> {
        vec!["game_id".into()]
    }

    async fn get_data_frames(&self, _params: &Params) -> Result<Vec<Table>> {
        Ok(self.tables.clone())
    }
}

/// Two games for every player except id 201939, whose fetch fails.
struct GameLogs;

#[async_trait]
impl StatsEndpoint for GameLogs {
    fn name(&self) -> &str {
        "PlayerGameLog"
    }

    fn parameters(&self) -> Vec<String> {
        vec!["player_id".into(), "season".into()]
    }

    async fn get_data_frames(&self, params: &Params) -> Result<Vec<Table>> {
        if params.get("player_id") == Some(&json!(201939)) {
            return Err(PipelineError::transport("playergamelog", "HTTP 500"));
        }
        Ok(vec![table(json!([
            {"PTS": 20, "REB": 5, "AST": 5, "FGA": 16, "FTA": 4, "FG3M": 2, "FG3A": 5},
            {"PTS": 30, "REB": 7, "AST": 9, "FGA": 20, "FTA": 6, "FG3M": 3, "FG3A": 5}
        ]))])
    }
}

struct ConstantEmbedder;

#[async_trait]
impl EmbeddingProvider for ConstantEmbedder {
    fn model_name(&self) -> &str {
        "constant"
    }

    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![0.25, 0.75]).collect())
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

fn table(values: Value) -> Table {
    match values {
        Value::Array(items) => Table::from_values(items).unwrap(),
        other => panic!("expected array, got {other}"),
    }
}

struct Stores {
    relational: Arc<MemoryRelationalBackend>,
    documents: Arc<MemoryDocumentBackend>,
    resources: Resources,
}

fn memory_stores() -> Stores {
    let relational = Arc::new(MemoryRelationalBackend::new());
    let documents = Arc::new(MemoryDocumentBackend::new());
    let resources =
        Resources::from_backends(&Config::default(), relational.clone(), documents.clone());
    Stores {
        relational,
        documents,
        resources,
    }
}

fn ctx(key: &str) -> StorageContext {
    StorageContext::new(AssetKey::parse(key), "test-run")
}

fn only(selectors: &[&str]) -> Selection {
    Selection::Assets(selectors.iter().map(|s| s.to_string()).collect())
}

fn registries(endpoints: EndpointRegistry) -> Registries {
    let players: Loader = Arc::new(load_players);
    let teams: Loader = Arc::new(nba_etl::static_data::load_teams);
    Registries {
        sources: SourceRegistry::new(),
        source_endpoints: BTreeMap::new(),
        endpoints,
        players,
        teams,
        embedder: Arc::new(ConstantEmbedder),
        embedding_batch_size: 7,
    }
}

// ─── Source assets ──────────────────────────────────────────────────

#[tokio::test]
async fn test_custom_source_materializes_and_replaces() {
    let stores = memory_stores();
    let source = Arc::new(ScriptedSource::new(json!({
        "data": [{"id": 1, "name": "a"}, {"id": 2, "name": "b"}, {"id": 3, "name": "c"}]
    })));
    let mut sources = SourceRegistry::new();
    sources.register(source.clone()).unwrap();

    let assets: Vec<AssetDefinition> = sources
        .sources()
        .iter()
        .flat_map(|s| build_assets_for_source(s.clone(), &["players"]))
        .collect();
    let defs = Definitions::new(assets, stores.resources.clone());
    defs.validate().unwrap();

    materialize(&defs, &Selection::All, &RunConfig::default())
        .await
        .unwrap();
    let stored = stores.relational.table("scripted", "players").unwrap();
    assert_eq!(stored.len(), 3);
    assert_eq!(stored.columns(), &["id", "name"]);

    source.set(json!({"id": 9, "name": "solo"}));
    materialize(&defs, &Selection::All, &RunConfig::default())
        .await
        .unwrap();
    let stored = stores.relational.table("scripted", "players").unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored.rows()[0]["id"], json!(9));
}

#[tokio::test]
async fn test_shape_error_aborts_run() {
    let stores = memory_stores();
    let source = Arc::new(ScriptedSource::new(json!([1, 2, 3])));
    let defs = Definitions::new(
        build_assets_for_source(source, &["players"]),
        stores.resources.clone(),
    );
    let err = materialize(&defs, &Selection::All, &RunConfig::default())
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("unexpected payload shape"));
    assert!(stores.relational.table_names().is_empty());
}

// ─── Relational adapter ─────────────────────────────────────────────

#[tokio::test]
async fn test_relational_full_replace() {
    let backend = Arc::new(MemoryRelationalBackend::new());
    let io = RelationalIoManager::new(backend.clone(), "public");

    let first = table(json!([{"id": 1}, {"id": 2}]));
    io.handle_output(&ctx("nba_api/all_players"), &first.into())
        .await
        .unwrap();
    assert_eq!(backend.schemas(), vec!["nba_api"]);

    let second = table(json!([{"id": 3}]));
    io.handle_output(&ctx("nba_api/all_players"), &second.clone().into())
        .await
        .unwrap();
    assert_eq!(io.load_input(&ctx("nba_api/all_players")).await.unwrap(), second);
}

#[tokio::test]
async fn test_relational_empty_table_clears_previous_rows() {
    let backend = Arc::new(MemoryRelationalBackend::new());
    let io = RelationalIoManager::new(backend.clone(), "public");

    let first = table(json!([{"player_id": 1, "PTS": 30.0}]));
    io.handle_output(&ctx("league_player_stats"), &first.into())
        .await
        .unwrap();
    io.handle_output(&ctx("league_player_stats"), &AssetOutput::Table(Table::empty()))
        .await
        .unwrap();

    let loaded = io.load_input(&ctx("league_player_stats")).await.unwrap();
    assert!(loaded.is_empty());
    assert!(loaded.columns().is_empty());
}

#[tokio::test]
async fn test_empty_source_page_replaces_stored_rows() {
    let stores = memory_stores();
    let source = Arc::new(ScriptedSource::new(json!({"data": [{"id": 1}, {"id": 2}]})));
    let defs = Definitions::new(
        build_assets_for_source(source.clone(), &["players"]),
        stores.resources.clone(),
    );

    materialize(&defs, &Selection::All, &RunConfig::default())
        .await
        .unwrap();
    source.set(json!({"data": []}));
    let summary = materialize(&defs, &Selection::All, &RunConfig::default())
        .await
        .unwrap();

    assert_eq!(summary.total_rows(), 0);
    let stored = stores.relational.table("scripted", "players").unwrap();
    assert!(stored.is_empty());
}

#[tokio::test]
async fn test_relational_sheets_and_none() {
    let backend = Arc::new(MemoryRelationalBackend::new());
    let io = RelationalIoManager::new(backend.clone(), "public");

    let output = AssetOutput::from_tables(vec![table(json!([{"a": 1}])), table(json!([{"b": 2}]))]);
    io.handle_output(&ctx("boxscore"), &output).await.unwrap();
    io.handle_output(&ctx("nothing"), &AssetOutput::None).await.unwrap();

    assert_eq!(
        backend.table_names(),
        vec!["public.boxscore_sheet_0", "public.boxscore_sheet_1"]
    );
}

// ─── Document adapter ───────────────────────────────────────────────

#[tokio::test]
async fn test_document_upsert_by_id() {
    let backend = Arc::new(MemoryDocumentBackend::new());
    let io = DocumentIoManager::new(backend.clone(), None);

    let v1 = table(json!([{"id": 7, "full_name": "Old", "embedding": [0.1]}]));
    let v2 = table(json!([{"id": 7, "full_name": "New", "embedding": [0.2]}]));
    io.handle_output(&ctx("players"), &v1.into()).await.unwrap();
    io.handle_output(&ctx("players"), &v2.into()).await.unwrap();

    let loaded = io.load_input(&ctx("players")).await.unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded.rows()[0]["full_name"], json!("New"));
    assert_eq!(loaded.rows()[0]["embedding"], json!([0.2]));
    assert!(!loaded.has_column("_id"));
}

#[tokio::test]
async fn test_document_records_without_id_duplicate() {
    let backend = Arc::new(MemoryDocumentBackend::new());
    let io = DocumentIoManager::new(backend.clone(), None);

    let rows = table(json!([{"name": "x"}, {"name": "y"}]));
    io.handle_output(&ctx("notes"), &rows.clone().into()).await.unwrap();
    io.handle_output(&ctx("notes"), &rows.into()).await.unwrap();

    let loaded = io.load_input(&ctx("notes")).await.unwrap();
    assert_eq!(loaded.len(), 4);
    assert_eq!(loaded.columns(), &["name"]);
}

#[tokio::test]
async fn test_document_empty_reads_and_writes() {
    let backend = Arc::new(MemoryDocumentBackend::new());
    let io = DocumentIoManager::new(backend.clone(), Some("pinned".into()));

    io.handle_output(&ctx("anything"), &Table::empty().into())
        .await
        .unwrap();
    io.handle_output(&ctx("anything"), &AssetOutput::None).await.unwrap();
    assert!(backend.collection_names().is_empty());

    let loaded = io.load_input(&ctx("anything")).await.unwrap();
    assert!(loaded.is_empty());
    assert!(loaded.columns().is_empty());
}

#[tokio::test]
async fn test_document_sheets_are_tagged() {
    let backend = Arc::new(MemoryDocumentBackend::new());
    let io = DocumentIoManager::new(backend.clone(), None);

    let output = AssetOutput::from_tables(vec![table(json!([{"a": 1}])), table(json!([{"a": 2}]))]);
    io.handle_output(&ctx("scores"), &output).await.unwrap();

    let loaded = io.load_input(&ctx("scores")).await.unwrap();
    let sheets: Vec<&Value> = loaded.column("sheet").collect();
    assert_eq!(sheets, vec![&json!("sheet_0"), &json!("sheet_1")]);
}

// ─── Dynamic endpoints ──────────────────────────────────────────────

#[tokio::test]
async fn test_dynamic_endpoints_through_materializer() {
    let stores = memory_stores();
    let mut endpoints = EndpointRegistry::new();
    endpoints
        .register(Arc::new(FixedEndpoint {
            name: "EmptyFeed",
            tables: vec![],
        }))
        .unwrap();
    endpoints
        .register(Arc::new(FixedEndpoint {
            name: "BoxScore",
            tables: vec![table(json!([{"x": 1}])), table(json!([{"y": 2}, {"y": 3}]))],
        }))
        .unwrap();

    let defs = Definitions::new(get_dynamic_assets(&endpoints), stores.resources.clone());
    defs.validate().unwrap();

    let summary = materialize(&defs, &only(&["emptyfeed", "boxscore"]), &RunConfig::default())
        .await
        .unwrap();
    let rows: Vec<usize> = summary.assets.iter().map(|a| a.rows).collect();
    assert_eq!(rows, vec![0, 3]);
    assert_eq!(
        stores.relational.table_names(),
        vec!["public.boxscore_sheet_0", "public.boxscore_sheet_1"]
    );
}

// ─── Full definitions ───────────────────────────────────────────────

#[tokio::test]
async fn test_embeddings_upsert_by_player_id() {
    let stores = memory_stores();
    let defs = build_definitions(registries(EndpointRegistry::new()), stores.resources.clone())
        .unwrap();

    let selection = only(&["all_players", "player_embeddings_openai"]);
    materialize(&defs, &selection, &RunConfig::default())
        .await
        .unwrap();
    materialize(&defs, &selection, &RunConfig::default())
        .await
        .unwrap();

    let players = load_players().unwrap().len();
    assert_eq!(stores.documents.count("player_embeddings_openai"), players);

    let io = stores.resources.get("mongo_io_manager").unwrap();
    let docs = io.load_input(&ctx("player_embeddings_openai")).await.unwrap();
    assert_eq!(docs.columns(), &["id", "full_name", "embedding"]);
    assert_eq!(docs.rows()[0]["embedding"], json!([0.25, 0.75]));
}

#[tokio::test]
async fn test_moneyball_job() {
    let stores = memory_stores();
    let mut endpoints = EndpointRegistry::new();
    endpoints.register(Arc::new(GameLogs)).unwrap();
    let defs = build_definitions(registries(endpoints), stores.resources.clone()).unwrap();

    let mut run = RunConfig::default();
    run.ops.insert(
        "league_player_stats".into(),
        json!({"season": "2023-24", "max_players": 3}).as_object().cloned().unwrap(),
    );

    materialize(&defs, &only(&["all_players"]), &run).await.unwrap();
    let summary = materialize(&defs, &Selection::Job("moneyball_nba".into()), &run)
        .await
        .unwrap();
    let order: Vec<String> = summary.assets.iter().map(|a| a.key.to_string()).collect();
    assert_eq!(order, vec!["league_player_stats", "player_profiles"]);

    let stats = stores.relational.table("public", "league_player_stats").unwrap();
    assert!(stats.len() <= 3 && !stats.is_empty());
    assert!(stats.column("player_id").all(|id| id != &json!(201939)));
    assert!(stats.column("PTS").all(|p| p == &json!(25.0)));

    let profiles = stores.relational.table("public", "player_profiles").unwrap();
    assert_eq!(profiles.len(), stats.len());
    assert_eq!(&profiles.columns()[..3], &["player_id", "player_name", "full_name"]);
    assert_eq!(profiles.columns().last().map(String::as_str), Some("TS%"));
}
