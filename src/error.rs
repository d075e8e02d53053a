//! Closed error-kind set shared by every stage of the pipeline.
//!
//! No error is ever allowed to cross a worker boundary as a panic; workers
//! catch every variant here and route the document through
//! `Repository::record_failure` / `FileStore::route` instead.

use thiserror::Error;

/// A pipeline-level error, carrying both a machine-matchable kind and a
/// short human diagnostic.
#[derive(Debug, Error, Clone)]
pub enum PipelineError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("OCR error: {0}")]
    OcrError(String),

    #[error("LLM call timed out")]
    LlmTimeout,

    #[error("LLM rate limited")]
    LlmRateLimited,

    #[error("LLM response could not be parsed: {0}")]
    LlmParse(String),

    #[error("LLM response did not match the expected shape: {0}")]
    LlmInvalidShape(String),

    #[error("validation failed: {0}")]
    ValidationError(String),

    #[error("cancelled")]
    Cancelled,
}

impl PipelineError {
    /// The closed kind, independent of the diagnostic string — this is what
    /// gets persisted alongside the document and what the retry UI branches on.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::IoError(_) => ErrorKind::IoError,
            PipelineError::OcrError(_) => ErrorKind::OcrError,
            PipelineError::LlmTimeout => ErrorKind::LlmTimeout,
            PipelineError::LlmRateLimited => ErrorKind::LlmRateLimited,
            PipelineError::LlmParse(_) => ErrorKind::LlmParse,
            PipelineError::LlmInvalidShape(_) => ErrorKind::LlmInvalidShape,
            PipelineError::ValidationError(_) => ErrorKind::ValidationError,
            PipelineError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether a document failed for this reason is a sensible candidate for
    /// `BatchCoordinator::retry_batch`. `ValidationError` is excluded: retrying
    /// without fixing the document or the extractor would just fail again.
    pub fn retryable(&self) -> bool {
        !matches!(self, PipelineError::ValidationError(_))
    }
}

/// Discriminant-only view of [`PipelineError`], persisted in the database and
/// used for branching (e.g. `Repository::get_failed_by_batch`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    IoError,
    OcrError,
    LlmTimeout,
    LlmRateLimited,
    LlmParse,
    LlmInvalidShape,
    ValidationError,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::IoError => "io_error",
            ErrorKind::OcrError => "ocr_error",
            ErrorKind::LlmTimeout => "llm_timeout",
            ErrorKind::LlmRateLimited => "llm_rate_limited",
            ErrorKind::LlmParse => "llm_parse",
            ErrorKind::LlmInvalidShape => "llm_invalid_shape",
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "io_error" => Some(Self::IoError),
            "ocr_error" => Some(Self::OcrError),
            "llm_timeout" => Some(Self::LlmTimeout),
            "llm_rate_limited" => Some(Self::LlmRateLimited),
            "llm_parse" => Some(Self::LlmParse),
            "llm_invalid_shape" => Some(Self::LlmInvalidShape),
            "validation_error" => Some(Self::ValidationError),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// A programming-error-only failure: an illegal state or status transition.
/// The engine never returns this for ordinary document failures; it is the
/// one class of error `spec.md` §7 allows to propagate to the process.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("a batch is already running")]
    AlreadyRunning,

    #[error("the engine is busy; cannot change configuration mid-run")]
    Busy,

    #[error("illegal document state transition: {from} -> {to}")]
    IllegalDocumentTransition { from: &'static str, to: &'static str },

    #[error("illegal batch status transition: {from} -> {to}")]
    IllegalBatchTransition { from: &'static str, to: &'static str },

    #[error("no pending batch with admitted documents")]
    NothingToRun,

    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Repository(#[from] crate::repository::RepositoryError),

    #[error(transparent)]
    FileStore(#[from] crate::file_store::FileStoreError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
