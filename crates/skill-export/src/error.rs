//! Error types for the export pipeline

use thiserror::Error;

use crate::model::SessionId;

pub type Result<T> = std::result::Result<T, ExportError>;

/// Batch-level failures. Any of these aborts the whole run.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("invalid session id {0}: session ids must be non-negative")]
    InvalidSessionId(SessionId),

    #[error("too many session ids in one batch: {requested} requested, max {max}")]
    BatchTooLarge { requested: usize, max: usize },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0:#}")]
    Storage(anyhow::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl ExportError {
    pub fn storage(err: anyhow::Error) -> Self {
        Self::Storage(err)
    }
}

/// Reasons a single experience-state entry is dropped.
///
/// These never escape the resolver; they are logged and the entry is skipped.
#[derive(Debug, Error)]
pub enum EntryError {
    #[error("missing dive_in_phase")]
    MissingPhase,

    #[error("unknown dive_in_phase '{0}'")]
    UnknownPhase(String),

    #[error("dive_in_phase ordinal {0} is out of range")]
    UnknownPhaseOrdinal(i64),

    #[error("dive_in_phase has unsupported type {0}")]
    InvalidPhaseType(&'static str),

    #[error("entry is not an object")]
    NotAnObject,

    #[error("invalid experience payload: {0}")]
    InvalidPayload(#[source] serde_json::Error),
}
