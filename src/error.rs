//! Error types for trialsift

use thiserror::Error;

/// Errors that abort a pipeline run.
///
/// Per-row problems (malformed trial JSON, an unparseable survey payload, a
/// missing embedding file) are not represented here: they are logged and the
/// offending row or trial is skipped. Only store and export failures escalate.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Export failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Missing required column: {0}")]
    MissingColumn(String),

    #[error("Embedding store error: {0}")]
    Embedding(String),
}
