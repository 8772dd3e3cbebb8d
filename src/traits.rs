//! Extension traits for data sources and stats endpoints.
//!
//! Two capability sets feed the asset factories:
//!
//! ```text
//! ┌──────────────────────────┐      ┌──────────────────────────┐
//! │      SourceRegistry      │      │     EndpointRegistry     │
//! │  ApiSource (REST-style)  │      │  StatsEndpoint (tables)  │
//! └────────────┬─────────────┘      └────────────┬─────────────┘
//!              ▼                                 ▼
//!    build_assets_for_source()          get_dynamic_assets()
//! ```
//!
//! Both registries are filled by explicit `register` calls at startup, so
//! the generated asset graph is fully known before anything runs.
//!
//! # Usage
//!
//! ```rust
//! use nba_etl::traits::{EndpointRegistry, SourceRegistry};
//!
//! let sources = SourceRegistry::new();
//! // sources.register(Arc::new(MySource::new()))?;
//!
//! let endpoints = EndpointRegistry::new();
//! assert!(sources.is_empty() && endpoints.is_empty());
//! ```

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::error::{PipelineError, Result};
use crate::models::{json_kind, Params, Table};

// ═══════════════════════════════════════════════════════════════════════
// Source Trait
// ═══════════════════════════════════════════════════════════════════════

/// An external data provider that serves JSON payloads by endpoint name.
///
/// Implementations own retry, backoff, and pagination. The only promise is
/// that [`fetch_data`](ApiSource::fetch_data) returns a complete raw payload
/// or fails.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use nba_etl::error::Result;
/// use nba_etl::models::{Params, Table};
/// use nba_etl::traits::{normalize_envelope, ApiSource};
/// use serde_json::{json, Value};
///
/// pub struct FixedSource;
///
/// #[async_trait]
/// impl ApiSource for FixedSource {
///     fn source_name(&self) -> &str { "fixed" }
///
///     async fn fetch_data(&self, _endpoint: &str, _params: Option<&Params>) -> Result<Value> {
///         Ok(json!({ "data": [{ "id": 1 }] }))
///     }
///
///     fn normalize_data(&self, raw: Value, _endpoint: &str) -> Result<Table> {
///         normalize_envelope(raw, "data")
///     }
/// }
/// ```
#[async_trait]
pub trait ApiSource: Send + Sync {
    /// Stable identity of the source. Used as the asset key prefix, the
    /// asset group, and the relational schema.
    fn source_name(&self) -> &str;

    /// Fetch the raw payload for one endpoint.
    ///
    /// Non-2xx responses and network failures are
    /// [`PipelineError::Transport`].
    async fn fetch_data(&self, endpoint: &str, params: Option<&Params>) -> Result<Value>;

    /// Turn a raw payload from [`fetch_data`](ApiSource::fetch_data) into a
    /// table. Fails with [`PipelineError::Shape`] on unexpected payloads.
    fn normalize_data(&self, raw: Value, endpoint: &str) -> Result<Table>;
}

/// Normalize a payload that may wrap its rows in an envelope field.
///
/// `{"<field>": [..]}` becomes one row per list element. Any other object
/// becomes a single-row table holding the whole payload. Non-object payloads
/// and non-list envelope fields are shape errors.
pub fn normalize_envelope(raw: Value, field: &str) -> Result<Table> {
    match raw {
        Value::Object(mut map) => match map.remove(field) {
            Some(Value::Array(items)) => Table::from_values(items),
            Some(other) => Err(PipelineError::shape(format!(
                "'{}' is {}, expected a list",
                field,
                json_kind(&other)
            ))),
            None => Ok(Table::from_records(vec![map])),
        },
        other => Err(PipelineError::shape(format!(
            "payload is {}, expected an object",
            json_kind(&other)
        ))),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Stats Endpoint Trait
// ═══════════════════════════════════════════════════════════════════════

/// A stats endpoint that returns one or more tables per call.
///
/// Each registered endpoint becomes one asset in the dynamic factory. The
/// asset's op config is forwarded verbatim to
/// [`get_data_frames`](StatsEndpoint::get_data_frames).
#[async_trait]
pub trait StatsEndpoint: Send + Sync {
    /// Endpoint identifier, e.g. `"PlayerGameLog"`. The generated asset is
    /// named after its lowercase form.
    fn name(&self) -> &str;

    /// Parameter names accepted in op config (e.g. `player_id`, `season`).
    fn parameters(&self) -> Vec<String>;

    /// Call the endpoint and return its result sets in order.
    async fn get_data_frames(&self, params: &Params) -> Result<Vec<Table>>;
}

// ═══════════════════════════════════════════════════════════════════════
// Registries
// ═══════════════════════════════════════════════════════════════════════

/// Registry of [`ApiSource`]s. Source names are unique.
pub struct SourceRegistry {
    sources: Vec<Arc<dyn ApiSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
        }
    }

    /// Register a source. A second source with the same name is rejected.
    pub fn register(&mut self, source: Arc<dyn ApiSource>) -> Result<()> {
        if self.find(source.source_name()).is_some() {
            return Err(PipelineError::config(format!(
                "source '{}' is already registered",
                source.source_name()
            )));
        }
        self.sources.push(source);
        Ok(())
    }

    pub fn sources(&self) -> &[Arc<dyn ApiSource>] {
        &self.sources
    }

    pub fn find(&self, name: &str) -> Option<Arc<dyn ApiSource>> {
        self.sources
            .iter()
            .find(|s| s.source_name() == name)
            .cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry of [`StatsEndpoint`]s, in registration order.
///
/// Names are compared case-insensitively because the generated asset name
/// is the lowercase identifier.
pub struct EndpointRegistry {
    endpoints: Vec<Arc<dyn StatsEndpoint>>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self {
            endpoints: Vec::new(),
        }
    }

    /// Register an endpoint. Duplicate identifiers are rejected.
    pub fn register(&mut self, endpoint: Arc<dyn StatsEndpoint>) -> Result<()> {
        if self.find(endpoint.name()).is_some() {
            return Err(PipelineError::config(format!(
                "endpoint '{}' is already registered",
                endpoint.name()
            )));
        }
        self.endpoints.push(endpoint);
        Ok(())
    }

    pub fn endpoints(&self) -> &[Arc<dyn StatsEndpoint>] {
        &self.endpoints
    }

    pub fn find(&self, name: &str) -> Option<Arc<dyn StatsEndpoint>> {
        self.endpoints
            .iter()
            .find(|e| e.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }
}

impl Default for EndpointRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Named(&'static str);

    #[async_trait]
    impl ApiSource for Named {
        fn source_name(&self) -> &str {
            self.0
        }
        async fn fetch_data(&self, _endpoint: &str, _params: Option<&Params>) -> Result<Value> {
            Ok(Value::Null)
        }
        fn normalize_data(&self, raw: Value, _endpoint: &str) -> Result<Table> {
            normalize_envelope(raw, "data")
        }
    }

    #[async_trait]
    impl StatsEndpoint for Named {
        fn name(&self) -> &str {
            self.0
        }
        fn parameters(&self) -> Vec<String> {
            Vec::new()
        }
        async fn get_data_frames(&self, _params: &Params) -> Result<Vec<Table>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn envelope_list_becomes_rows() {
        let t = normalize_envelope(
            json!({"data": [{"id": 1, "name": "x"}, {"id": 2, "name": "y"}, {"id": 3, "name": "z"}], "meta": {"next_cursor": 3}}),
            "data",
        )
        .unwrap();
        assert_eq!(t.len(), 3);
        assert_eq!(t.columns(), &["id", "name"]);
    }

    #[test]
    fn empty_envelope_list_is_empty_table() {
        let t = normalize_envelope(json!({"data": []}), "data").unwrap();
        assert!(t.is_empty());
        assert!(t.columns().is_empty());
    }

    #[test]
    fn payload_without_envelope_is_one_row() {
        let t = normalize_envelope(json!({"id": 14, "full_name": "Boston Celtics"}), "data")
            .unwrap();
        assert_eq!(t.len(), 1);
        assert_eq!(t.columns(), &["id", "full_name"]);
        assert_eq!(t.rows()[0]["full_name"], "Boston Celtics");
    }

    #[test]
    fn non_object_payloads_are_shape_errors() {
        for raw in [json!([1, 2]), json!("x"), json!({"data": {"id": 1}}), json!({"data": [1]})] {
            let err = normalize_envelope(raw, "data").unwrap_err();
            assert!(matches!(err, PipelineError::Shape(_)), "got {err}");
        }
    }

    #[test]
    fn source_names_are_unique() {
        let mut reg = SourceRegistry::new();
        reg.register(Arc::new(Named("balldontlie"))).unwrap();
        let err = reg.register(Arc::new(Named("balldontlie"))).unwrap_err();
        assert!(err.to_string().contains("already registered"));
        assert_eq!(reg.len(), 1);
        assert!(reg.find("balldontlie").is_some());
        assert!(reg.find("other").is_none());
    }

    #[test]
    fn endpoint_lookup_ignores_case() {
        let mut reg = EndpointRegistry::new();
        reg.register(Arc::new(Named("PlayerGameLog"))).unwrap();
        assert!(reg.find("playergamelog").is_some());
        assert!(reg.register(Arc::new(Named("PLAYERGAMELOG"))).is_err());
    }
}
