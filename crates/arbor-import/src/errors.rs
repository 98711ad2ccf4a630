use std::path::PathBuf;

use arbor_core::JobState;
use arbor_plan::ValidationReport;
use thiserror::Error;

/// Errors that stop an import run.
///
/// Per-record rejections are not errors; they are reported in the result.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("invalid plan: {0}")]
    Validation(#[from] ValidationReport),
    #[error("failed to load '{}': {reason}", path.display())]
    SourceLoad { path: PathBuf, reason: String },
    #[error("save of {object_type} failed: {source}")]
    Save {
        object_type: String,
        source: arbor_core::Error,
    },
    #[error("bulk job {job_id} still running after {waited_secs}s")]
    BulkTimeout { job_id: String, waited_secs: u64 },
    #[error("bulk job {job_id} ended in state {state:?}: {message}")]
    BulkFailed {
        job_id: String,
        state: JobState,
        message: String,
    },
    #[error("unknown bulk job '{0}'")]
    UnknownJob(String),
    #[error("import aborted before saving {object_type}")]
    Aborted { object_type: String },
    #[error("task failed: {0}")]
    Task(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
