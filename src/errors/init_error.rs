use crate::errors::ToolError;
use thiserror::Error;

/// Startup failures. Any of these keeps the process from serving.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("missing required setting {0}")]
    MissingSetting(&'static str),
    #[error("invalid value for {name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },
    #[error("invalid backend host: {0}")]
    InvalidHost(String),
    #[error("invalid API key: {0}")]
    InvalidApiKey(String),
    #[error("duplicate operation key '{0}' in schema index")]
    DuplicateOperation(String),
    #[error("operation '{key}' is malformed: {reason}")]
    MalformedOperation { key: String, reason: String },
    #[error("tool catalog is inconsistent: {0}")]
    Catalog(String),
    #[error("schema database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to parse embedded definition: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}

impl From<InitError> for ToolError {
    fn from(err: InitError) -> Self {
        ToolError::initialization(err.to_string())
    }
}
