//! balldontlie REST source.
//!
//! Issues one authenticated GET per endpoint and normalizes the
//! `{"data": [...], "meta": {...}}` envelope into a table. Only the first
//! page is captured; `meta.next_cursor` is ignored.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::config::BallDontLieConfig;
use crate::error::{PipelineError, Result};
use crate::models::{Params, Table};
use crate::traits::{normalize_envelope, ApiSource};

pub struct BallDontLieSource {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl BallDontLieSource {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(api_key, base_url, Duration::from_secs(30))
    }

    pub fn from_config(config: &BallDontLieConfig) -> Result<Self> {
        Self::with_timeout(
            config.api_key(),
            config.base_url.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn with_timeout(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::config(format!("http client: {}", e)))?;
        Ok(Self {
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn endpoint_url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }
}

#[async_trait]
impl ApiSource for BallDontLieSource {
    fn source_name(&self) -> &str {
        "balldontlie"
    }

    async fn fetch_data(&self, endpoint: &str, params: Option<&Params>) -> Result<Value> {
        let url = self.endpoint_url(endpoint);
        let query = params.map(query_pairs).unwrap_or_default();

        let response = self
            .client
            .get(&url)
            .header("Authorization", &self.api_key)
            .query(&query)
            .send()
            .await
            .map_err(|e| PipelineError::transport(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::transport(
                &url,
                format!("HTTP {}: {}", status, body.trim()),
            ));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| PipelineError::transport(&url, format!("invalid JSON body: {}", e)))
    }

    fn normalize_data(&self, raw: Value, _endpoint: &str) -> Result<Table> {
        normalize_envelope(raw, "data")
    }
}

/// Flatten params into query pairs. Arrays repeat their key; nulls are
/// dropped.
pub fn query_pairs(params: &Params) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for (key, value) in params {
        match value {
            Value::Array(items) => {
                for item in items {
                    if let Some(s) = param_string(item) {
                        pairs.push((key.clone(), s));
                    }
                }
            }
            other => {
                if let Some(s) = param_string(other) {
                    pairs.push((key.clone(), s));
                }
            }
        }
    }
    pairs
}

/// Render a scalar parameter the way it should appear in a query string.
pub fn param_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}
