use elasticsearch::http::transport::BuildError;
use elasticsearch::Error as ElasticsearchError;
use serde_json::Error as SerdeJsonError;
use tantivy::TantivyError;
use thiserror::Error;
use tokio::task::JoinError;

/// Every failure surfaced by the repository. Client and engine errors are
/// wrapped as-is; nothing is retried or reclassified.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid Elasticsearch URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Elasticsearch transport error: {0}")]
    Transport(#[from] BuildError),

    #[error("Elasticsearch error: {0}")]
    Elasticsearch(#[from] ElasticsearchError),

    #[error("Tantivy error: {0}")]
    Tantivy(#[from] TantivyError),

    #[error("JSON error: {0}")]
    Json(#[from] SerdeJsonError),

    #[error("Tokio join error: {0}")]
    Join(#[from] JoinError),

    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Invalid use of field '{field}': {reason}")]
    InvalidFieldUsage { field: String, reason: String },

    /// A non-success status the caller cannot treat as an absent document,
    /// such as a 404 for a missing index.
    #[error("Elasticsearch returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Generic error: {0}")]
    Generic(String),
}

impl AppError {
    pub(crate) fn invalid_field(field: &str, reason: impl Into<String>) -> Self {
        AppError::InvalidFieldUsage {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}
