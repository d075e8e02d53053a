//! Persistence contract used by the pipeline, and its `rusqlite`-backed
//! implementation.
//!
//! The pipeline only ever depends on the [`Repository`] trait (`spec.md`
//! §4.B) — [`SqliteRepository`] is one concrete backend, kept deliberately
//! swappable the way `TextExtractor`/`StructuredExtractor` are.

mod sqlite;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::error::ErrorKind;
use crate::models::{Batch, BatchStatus, StructuredRecord};

pub use sqlite::SqliteRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("illegal batch status transition: {from} -> {to}")]
    IllegalTransition { from: &'static str, to: &'static str },
    #[error("not found: {0}")]
    NotFound(String),
}

impl From<rusqlite::Error> for RepositoryError {
    fn from(e: rusqlite::Error) -> Self {
        RepositoryError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(e: serde_json::Error) -> Self {
        RepositoryError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

/// A fully-populated record ready for `upsert_document`: the document id,
/// its batch, and the cleaned structured extraction.
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    pub document_id: String,
    pub batch_id: String,
    pub record: StructuredRecord,
}

/// The persistence contract the pipeline depends on. Idempotent by design:
/// `upsert_document` called twice with the same `document_id` leaves the
/// same final state as calling it once (`spec.md` §8).
#[async_trait]
pub trait Repository: Send + Sync {
    async fn upsert_batch(&self, batch: &Batch) -> Result<()>;

    async fn update_batch_status(
        &self,
        batch_id: &str,
        status: BatchStatus,
        processing_started_at: Option<DateTime<Utc>>,
        finished_at: Option<DateTime<Utc>>,
    ) -> Result<()>;

    async fn upsert_document(&self, record: DocumentRecord) -> Result<()>;

    /// Stamps the final per-batch counters. Called once, by
    /// `BatchCoordinator::end_run`, after every worker has exited — counts
    /// are monotonic non-decreasing by construction of the caller, not
    /// enforced here.
    async fn update_batch_counts(
        &self,
        batch_id: &str,
        succeeded: u64,
        failed: u64,
        cancelled: u64,
    ) -> Result<()>;

    async fn record_failure(
        &self,
        document_id: &str,
        batch_id: &str,
        kind: ErrorKind,
        diagnostic: &str,
    ) -> Result<()>;

    async fn get_failed_by_batch(&self) -> Result<HashMap<String, Vec<String>>>;

    async fn get_batch(&self, batch_id: &str) -> Result<Option<Batch>>;

    /// The oldest `Pending` batch — `BatchCoordinator::begin_run` still has
    /// to check the inbox is non-empty via `FileStore::claim` before
    /// flipping it to `Running`.
    async fn oldest_pending_batch(&self) -> Result<Option<Batch>>;

    /// Increments and returns `document_id`'s attempt counter, inserting a
    /// fresh row at attempt 2 if none exists yet. Called once per document
    /// by `BatchCoordinator::retry_batch` — the only path that is allowed
    /// to bump it (`spec.md` §3: never on in-run recovery).
    async fn bump_document_attempt(&self, document_id: &str) -> Result<u32>;

    /// The attempt counter currently on record for `document_id`, or 1 if
    /// the document has never been seen before.
    async fn get_document_attempt(&self, document_id: &str) -> Result<u32>;
}
