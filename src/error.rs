//! Error taxonomy shared by sources, endpoints, and storage backends.
//!
//! Library seams return [`Result`]; asset compute functions and the CLI
//! wrap these in `anyhow` with extra context. Nothing here is retried:
//! every error surfaces to whoever is running the asset.

/// Errors produced while fetching, normalizing, or persisting a table.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Network failure or non-2xx response while fetching a payload.
    #[error("transport error for {url}: {reason}")]
    Transport { url: String, reason: String },

    /// Raw payload does not match the envelope a source expects.
    #[error("unexpected payload shape: {0}")]
    Shape(String),

    /// Missing or contradictory configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A read found nothing stored for the target.
    #[error("nothing stored for {0}")]
    NotFound(String),

    /// Relational store failure.
    #[error("relational store error: {0}")]
    Sql(#[from] sqlx::Error),

    /// Document store failure.
    #[error("document store error: {0}")]
    Document(#[from] mongodb::error::Error),

    /// JSON (de)serialization failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn transport(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Transport {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    pub fn shape(msg: impl Into<String>) -> Self {
        Self::Shape(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

/// Convenience alias used by the library seams.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_error_names_url() {
        let err = PipelineError::transport("https://example.test/players", "HTTP 503");
        let msg = err.to_string();
        assert!(msg.contains("https://example.test/players"), "got: {msg}");
        assert!(msg.contains("503"));
    }

    #[test]
    fn shape_and_config_display() {
        assert_eq!(
            PipelineError::shape("not an object").to_string(),
            "unexpected payload shape: not an object"
        );
        assert_eq!(
            PipelineError::config("postgres.db missing").to_string(),
            "configuration error: postgres.db missing"
        );
    }

    #[test]
    fn json_error_wraps() {
        let inner = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = PipelineError::from(inner);
        assert!(err.to_string().starts_with("json error"));
    }
}
