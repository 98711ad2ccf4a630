use thiserror::Error;

/// Errors emitted by the export engine. Any of them leaves no file behind.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("query for {target} failed: {source}")]
    Query {
        target: String,
        source: arbor_core::Error,
    },
    #[error("serialization failed: {0}")]
    Serialization(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
