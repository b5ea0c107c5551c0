//! Error types for the extraction engine.
//!
//! Two distinct error types reflect two distinct failure modes, the same
//! split the teacher crate draws between a fatal, process-level error and a
//! recoverable, per-unit-of-work error:
//!
//! * [`EngineError`] — **Fatal**: the whole extraction job cannot proceed
//!   (document missing, storage key absent, database failure, active-job
//!   conflict). Surfaced as a terminal `error` progress event.
//!
//! * [`ClassifiedError`] — the §3 "last error" shape stored on the job
//!   record and carried on `warning`/`error` progress events. It round-trips
//!   through the job-state cache record, so it must stay `Clone`,
//!   `Serialize`, `Deserialize` — exactly like the teacher's `PageError`
//!   travels inside `PageResult`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The closed error taxonomy from §4.12.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Network,
    LlmService,
    LlmParse,
    LlmContract,
    Timeout,
    PdfUnreadable,
    Db,
    Validation,
    Conflict,
    Cancelled,
    Unknown,
}

impl ErrorKind {
    /// Whether C4's retry executor should retry an error of this kind.
    #[must_use]
    pub const fn is_recoverable(self) -> bool {
        matches!(
            self,
            Self::Network | Self::LlmService | Self::LlmParse | Self::Timeout
        )
    }
}

/// An error carrying a classified kind and a human-readable message.
///
/// This is the unit that travels through progress events and the job
/// record's `last_error` field — never a raw `anyhow`/`thiserror` value,
/// since those don't survive a cache round-trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ClassifiedError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn recoverable(&self) -> bool {
        self.kind.is_recoverable()
    }
}

impl std::fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ClassifiedError {}

/// All fatal errors returned by the extraction engine.
///
/// Chunk-level failures use [`ClassifiedError`] and are absorbed by the
/// retry executor or recorded as a failed chunk; anything reaching this
/// type ends the job.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("document {document_id} not found")]
    DocumentNotFound { document_id: String },

    #[error("document {document_id} has no storage key for its PDF bytes")]
    MissingStorageKey { document_id: String },

    #[error("document {document_id} has unsupported type '{declared_type}' for this extraction")]
    WrongDocumentType {
        document_id: String,
        declared_type: String,
    },

    #[error("PDF is not parseable: {detail}")]
    PdfUnreadable { detail: String },

    #[error("user {user_id} already has an active job: {active_job_id}")]
    ActiveJobConflict {
        user_id: String,
        active_job_id: String,
    },

    #[error("job {job_id} not found or expired")]
    JobNotFound { job_id: String },

    #[error("all chunks failed for document {document_id}")]
    AllChunksFailed { document_id: String },

    #[error("{failed}/{total} chunks failed for document {document_id}, exceeding the 50% threshold")]
    TooManyChunksFailed {
        document_id: String,
        failed: usize,
        total: usize,
    },

    #[error("merge produced an empty canonical hierarchy for document {document_id}")]
    EmptyMergeResult { document_id: String },

    #[error("database error: {0}")]
    Database(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Classify this fatal error into its §4.12 kind, for building a
    /// terminal progress event / job record.
    #[must_use]
    pub fn classify(&self) -> ErrorKind {
        match self {
            Self::PdfUnreadable { .. } => ErrorKind::PdfUnreadable,
            Self::ActiveJobConflict { .. } => ErrorKind::Conflict,
            Self::Database(_) => ErrorKind::Db,
            Self::Validation(_) | Self::EmptyMergeResult { .. } => ErrorKind::Validation,
            Self::DocumentNotFound { .. }
            | Self::MissingStorageKey { .. }
            | Self::WrongDocumentType { .. }
            | Self::JobNotFound { .. } => ErrorKind::Validation,
            Self::AllChunksFailed { .. } | Self::TooManyChunksFailed { .. } => ErrorKind::Unknown,
            Self::Cache(_) | Self::Internal(_) => ErrorKind::Unknown,
        }
    }

    #[must_use]
    pub fn into_classified(self) -> ClassifiedError {
        let kind = self.classify();
        ClassifiedError::new(kind, self.to_string())
    }
}
