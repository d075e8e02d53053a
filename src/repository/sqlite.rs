//! `rusqlite`-backed [`Repository`] implementation.
//!
//! Connections are opened WAL-mode per call (teacher idiom: short-lived
//! connections rather than a pool, relying on SQLite's WAL readers/single
//! writer concurrency) and blocking calls are pushed onto
//! `tokio::task::spawn_blocking` so the async worker loops never block their
//! executor thread on disk I/O.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::ErrorKind;
use crate::models::{Batch, BatchStatus, Party, PartyRole, Property, StructuredRecord};

use super::{DocumentRecord, Repository, RepositoryError, Result};

/// Open a connection with the concurrency pragmas the teacher's
/// `repository::connect` uses: WAL journaling, a generous busy timeout, and
/// foreign keys enforced.
fn connect(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 30000;
        "#,
    )?;
    Ok(conn)
}

/// Retry a fallible operation on SQLite busy/locked errors with exponential
/// backoff (100ms, 200ms, 400ms, 800ms, 1600ms), matching the teacher's
/// `repository::with_retry`.
fn with_retry<T>(mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let max_retries = 5;
    let mut delay_ms = 100;

    for attempt in 0..max_retries {
        match op() {
            Ok(v) => return Ok(v),
            Err(RepositoryError::Database(ref msg)) if attempt < max_retries - 1 => {
                let is_lock_error = msg.contains("database is locked") || msg.contains("busy");
                if is_lock_error {
                    thread::sleep(Duration::from_millis(delay_ms));
                    delay_ms *= 2;
                    continue;
                }
                return op();
            }
            other => return other,
        }
    }
    op()
}

pub struct SqliteRepository {
    db_path: PathBuf,
}

impl SqliteRepository {
    /// Open (creating if absent) the database at `db_path` and run schema
    /// initialization.
    pub fn new(db_path: &Path) -> Result<Self> {
        let repo = Self {
            db_path: db_path.to_path_buf(),
        };
        repo.init_schema()?;
        Ok(repo)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = connect(&self.db_path)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS batches (
                batch_id TEXT PRIMARY KEY,
                batch_name TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                processing_started_at TEXT,
                finished_at TEXT,
                total INTEGER NOT NULL DEFAULT 0,
                succeeded INTEGER NOT NULL DEFAULT 0,
                failed INTEGER NOT NULL DEFAULT 0,
                cancelled INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS documents (
                document_id TEXT PRIMARY KEY,
                batch_id TEXT NOT NULL,
                state TEXT NOT NULL,
                attempt INTEGER NOT NULL DEFAULT 1,
                error_kind TEXT,
                error_diagnostic TEXT,
                transaction_date TEXT,
                registration_office TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS properties (
                document_id TEXT PRIMARY KEY REFERENCES documents(document_id),
                survey_number TEXT,
                village TEXT,
                taluk TEXT,
                district TEXT,
                site_area_sqft REAL,
                built_up_area_sqft REAL,
                sale_consideration TEXT,
                total_fee TEXT,
                registration_fee TEXT,
                vision_registration_fee TEXT
            );

            CREATE TABLE IF NOT EXISTS buyers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                document_id TEXT NOT NULL REFERENCES documents(document_id),
                name TEXT NOT NULL,
                father_name TEXT,
                date_of_birth TEXT,
                aadhaar TEXT,
                pan TEXT,
                address TEXT
            );

            CREATE TABLE IF NOT EXISTS sellers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                document_id TEXT NOT NULL REFERENCES documents(document_id),
                name TEXT NOT NULL,
                father_name TEXT,
                date_of_birth TEXT,
                aadhaar TEXT,
                pan TEXT,
                address TEXT,
                property_share TEXT
            );

            CREATE TABLE IF NOT EXISTS confirming_parties (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                document_id TEXT NOT NULL REFERENCES documents(document_id),
                name TEXT NOT NULL,
                father_name TEXT,
                date_of_birth TEXT,
                aadhaar TEXT,
                pan TEXT,
                address TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_documents_batch ON documents(batch_id);
            CREATE INDEX IF NOT EXISTS idx_buyers_document ON buyers(document_id);
            CREATE INDEX IF NOT EXISTS idx_sellers_document ON sellers(document_id);
            CREATE INDEX IF NOT EXISTS idx_confirming_document ON confirming_parties(document_id);
            "#,
        )?;
        Ok(())
    }

    fn upsert_batch_sync(&self, batch: &Batch) -> Result<()> {
        let conn = connect(&self.db_path)?;
        conn.execute(
            r#"
            INSERT INTO batches (batch_id, batch_name, status, created_at, processing_started_at, finished_at, total, succeeded, failed, cancelled)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(batch_id) DO UPDATE SET
                batch_name = excluded.batch_name,
                status = excluded.status,
                processing_started_at = excluded.processing_started_at,
                finished_at = excluded.finished_at,
                total = excluded.total,
                succeeded = excluded.succeeded,
                failed = excluded.failed,
                cancelled = excluded.cancelled
            "#,
            params![
                batch.batch_id,
                batch.batch_name,
                batch.status.as_str(),
                batch.created_at.to_rfc3339(),
                batch.processing_started_at.map(|t| t.to_rfc3339()),
                batch.finished_at.map(|t| t.to_rfc3339()),
                batch.total as i64,
                batch.succeeded as i64,
                batch.failed as i64,
                batch.cancelled as i64,
            ],
        )?;
        Ok(())
    }

    fn update_batch_status_sync(
        &self,
        batch_id: &str,
        status: BatchStatus,
        processing_started_at: Option<DateTime<Utc>>,
        finished_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let conn = connect(&self.db_path)?;

        let current: Option<String> = conn
            .query_row(
                "SELECT status FROM batches WHERE batch_id = ?1",
                params![batch_id],
                |row| row.get(0),
            )
            .optional()?;

        let Some(current) = current else {
            return Err(RepositoryError::NotFound(batch_id.to_string()));
        };
        let current_status = BatchStatus::from_str(&current)
            .ok_or_else(|| RepositoryError::Database(format!("corrupt status: {current}")))?;

        if !current_status.can_transition_to(status) {
            return Err(RepositoryError::IllegalTransition {
                from: current_status.as_str(),
                to: status.as_str(),
            });
        }

        // Conditional update: the WHERE clause re-checks status so a
        // concurrent writer can't race this into an illegal transition.
        let updated = conn.execute(
            r#"
            UPDATE batches
            SET status = ?1, processing_started_at = COALESCE(?2, processing_started_at), finished_at = ?3
            WHERE batch_id = ?4 AND status = ?5
            "#,
            params![
                status.as_str(),
                processing_started_at.map(|t| t.to_rfc3339()),
                finished_at.map(|t| t.to_rfc3339()),
                batch_id,
                current_status.as_str(),
            ],
        )?;

        if updated == 0 {
            return Err(RepositoryError::IllegalTransition {
                from: current_status.as_str(),
                to: status.as_str(),
            });
        }
        Ok(())
    }

    fn update_batch_counts_sync(
        &self,
        batch_id: &str,
        succeeded: u64,
        failed: u64,
        cancelled: u64,
    ) -> Result<()> {
        let conn = connect(&self.db_path)?;
        let updated = conn.execute(
            "UPDATE batches SET succeeded = ?1, failed = ?2, cancelled = ?3 WHERE batch_id = ?4",
            params![succeeded as i64, failed as i64, cancelled as i64, batch_id],
        )?;
        if updated == 0 {
            return Err(RepositoryError::NotFound(batch_id.to_string()));
        }
        Ok(())
    }

    fn upsert_document_sync(&self, record: DocumentRecord) -> Result<()> {
        with_retry(|| {
            let mut conn = connect(&self.db_path)?;
            let tx = conn.transaction()?;
            let now = Utc::now().to_rfc3339();

            tx.execute(
                r#"
                INSERT INTO documents (document_id, batch_id, state, attempt, error_kind, error_diagnostic, transaction_date, registration_office, created_at, updated_at)
                VALUES (?1, ?2, 'succeeded', 1, NULL, NULL, ?3, ?4, ?5, ?5)
                ON CONFLICT(document_id) DO UPDATE SET
                    batch_id = excluded.batch_id,
                    state = 'succeeded',
                    error_kind = NULL,
                    error_diagnostic = NULL,
                    transaction_date = excluded.transaction_date,
                    registration_office = excluded.registration_office,
                    updated_at = excluded.updated_at
                "#,
                params![
                    record.document_id,
                    record.batch_id,
                    record.record.transaction_date,
                    record.record.registration_office,
                    now,
                ],
            )?;

            replace_property(&tx, &record.document_id, &record.record.property)?;
            replace_parties(&tx, &record.document_id, PartyRole::Buyer, &record.record.buyers)?;
            replace_parties(&tx, &record.document_id, PartyRole::Seller, &record.record.sellers)?;
            replace_parties(
                &tx,
                &record.document_id,
                PartyRole::ConfirmingParty,
                &record.record.confirming_parties,
            )?;

            tx.commit()?;
            Ok(())
        })
    }

    fn record_failure_sync(
        &self,
        document_id: &str,
        batch_id: &str,
        kind: ErrorKind,
        diagnostic: &str,
    ) -> Result<()> {
        with_retry(|| {
            let conn = connect(&self.db_path)?;
            let now = Utc::now().to_rfc3339();
            let state = if kind == ErrorKind::Cancelled {
                "cancelled"
            } else {
                "failed"
            };
            conn.execute(
                r#"
                INSERT INTO documents (document_id, batch_id, state, attempt, error_kind, error_diagnostic, created_at, updated_at)
                VALUES (?1, ?2, ?3, 1, ?4, ?5, ?6, ?6)
                ON CONFLICT(document_id) DO UPDATE SET
                    batch_id = excluded.batch_id,
                    state = excluded.state,
                    error_kind = excluded.error_kind,
                    error_diagnostic = excluded.error_diagnostic,
                    updated_at = excluded.updated_at
                "#,
                params![document_id, batch_id, state, kind.as_str(), diagnostic, now],
            )?;
            Ok(())
        })
    }

    fn get_failed_by_batch_sync(&self) -> Result<HashMap<String, Vec<String>>> {
        let conn = connect(&self.db_path)?;
        let mut stmt = conn.prepare(
            "SELECT batch_id, document_id FROM documents WHERE state IN ('failed', 'cancelled') ORDER BY batch_id, document_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for row in rows {
            let (batch_id, document_id) = row?;
            map.entry(batch_id).or_default().push(document_id);
        }
        Ok(map)
    }

    fn get_batch_sync(&self, batch_id: &str) -> Result<Option<Batch>> {
        let conn = connect(&self.db_path)?;
        conn.query_row(
            "SELECT batch_id, batch_name, status, created_at, processing_started_at, finished_at, total, succeeded, failed, cancelled FROM batches WHERE batch_id = ?1",
            params![batch_id],
            row_to_batch,
        )
        .optional()
        .map_err(Into::into)
    }

    fn oldest_pending_batch_sync(&self) -> Result<Option<Batch>> {
        let conn = connect(&self.db_path)?;
        conn.query_row(
            "SELECT batch_id, batch_name, status, created_at, processing_started_at, finished_at, total, succeeded, failed, cancelled FROM batches WHERE status = 'pending' ORDER BY created_at ASC LIMIT 1",
            [],
            row_to_batch,
        )
        .optional()
        .map_err(Into::into)
    }

    fn bump_document_attempt_sync(&self, document_id: &str) -> Result<u32> {
        with_retry(|| {
            let conn = connect(&self.db_path)?;
            let now = Utc::now().to_rfc3339();
            conn.execute(
                r#"
                INSERT INTO documents (document_id, batch_id, state, attempt, created_at, updated_at)
                VALUES (?1, '', 'pending', 2, ?2, ?2)
                ON CONFLICT(document_id) DO UPDATE SET
                    attempt = attempt + 1,
                    updated_at = excluded.updated_at
                "#,
                params![document_id, now],
            )?;
            let attempt: i64 = conn.query_row(
                "SELECT attempt FROM documents WHERE document_id = ?1",
                params![document_id],
                |row| row.get(0),
            )?;
            Ok(attempt as u32)
        })
    }

    fn get_document_attempt_sync(&self, document_id: &str) -> Result<u32> {
        let conn = connect(&self.db_path)?;
        let attempt: Option<i64> = conn
            .query_row(
                "SELECT attempt FROM documents WHERE document_id = ?1",
                params![document_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(attempt.unwrap_or(1) as u32)
    }
}

fn row_to_batch(row: &rusqlite::Row) -> rusqlite::Result<Batch> {
    let status: String = row.get(2)?;
    let created_at: String = row.get(3)?;
    let started: Option<String> = row.get(4)?;
    let finished: Option<String> = row.get(5)?;

    Ok(Batch {
        batch_id: row.get(0)?,
        batch_name: row.get(1)?,
        status: BatchStatus::from_str(&status).unwrap_or(BatchStatus::Pending),
        created_at: parse_datetime(&created_at),
        processing_started_at: started.as_deref().map(parse_datetime),
        finished_at: finished.as_deref().map(parse_datetime),
        total: row.get::<_, i64>(6)? as u64,
        succeeded: row.get::<_, i64>(7)? as u64,
        failed: row.get::<_, i64>(8)? as u64,
        cancelled: row.get::<_, i64>(9)? as u64,
    })
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

fn replace_property(tx: &rusqlite::Transaction, document_id: &str, property: &Property) -> Result<()> {
    tx.execute(
        "DELETE FROM properties WHERE document_id = ?1",
        params![document_id],
    )?;
    tx.execute(
        r#"
        INSERT INTO properties (document_id, survey_number, village, taluk, district, site_area_sqft, built_up_area_sqft, sale_consideration, total_fee, registration_fee, vision_registration_fee)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
        params![
            document_id,
            property.survey_number,
            property.village,
            property.taluk,
            property.district,
            property.site_area_sqft,
            property.built_up_area_sqft,
            property.sale_consideration,
            property.total_fee,
            property.registration_fee,
            property.vision_registration_fee,
        ],
    )?;
    Ok(())
}

fn replace_parties(
    tx: &rusqlite::Transaction,
    document_id: &str,
    role: PartyRole,
    parties: &[Party],
) -> Result<()> {
    let table = role.table_name();
    tx.execute(
        &format!("DELETE FROM {table} WHERE document_id = ?1"),
        params![document_id],
    )?;

    for party in parties {
        if role == PartyRole::Seller {
            tx.execute(
                "INSERT INTO sellers (document_id, name, father_name, date_of_birth, aadhaar, pan, address, property_share) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    document_id,
                    party.name,
                    party.father_name,
                    party.date_of_birth,
                    party.aadhaar,
                    party.pan,
                    party.address,
                    party.property_share,
                ],
            )?;
        } else {
            tx.execute(
                &format!("INSERT INTO {table} (document_id, name, father_name, date_of_birth, aadhaar, pan, address) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
                params![
                    document_id,
                    party.name,
                    party.father_name,
                    party.date_of_birth,
                    party.aadhaar,
                    party.pan,
                    party.address,
                ],
            )?;
        }
    }
    Ok(())
}

/// Run a blocking closure on `spawn_blocking` and flatten the join error into
/// a `RepositoryError` — a panic inside `op` is the only way this surfaces as
/// a database error, which matches "only a programming error propagates".
async fn blocking<T, F>(op: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| RepositoryError::Database(format!("worker panicked: {e}")))?
}

#[async_trait]
impl Repository for SqliteRepository {
    async fn upsert_batch(&self, batch: &Batch) -> Result<()> {
        let batch = batch.clone();
        let db_path = self.db_path.clone();
        blocking(move || Self { db_path }.upsert_batch_sync(&batch)).await
    }

    async fn update_batch_status(
        &self,
        batch_id: &str,
        status: BatchStatus,
        processing_started_at: Option<DateTime<Utc>>,
        finished_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let batch_id = batch_id.to_string();
        let db_path = self.db_path.clone();
        blocking(move || {
            Self { db_path }.update_batch_status_sync(&batch_id, status, processing_started_at, finished_at)
        })
        .await
    }

    async fn upsert_document(&self, record: DocumentRecord) -> Result<()> {
        let db_path = self.db_path.clone();
        blocking(move || Self { db_path }.upsert_document_sync(record)).await
    }

    async fn update_batch_counts(
        &self,
        batch_id: &str,
        succeeded: u64,
        failed: u64,
        cancelled: u64,
    ) -> Result<()> {
        let batch_id = batch_id.to_string();
        let db_path = self.db_path.clone();
        blocking(move || Self { db_path }.update_batch_counts_sync(&batch_id, succeeded, failed, cancelled)).await
    }

    async fn record_failure(
        &self,
        document_id: &str,
        batch_id: &str,
        kind: ErrorKind,
        diagnostic: &str,
    ) -> Result<()> {
        let document_id = document_id.to_string();
        let batch_id = batch_id.to_string();
        let diagnostic = diagnostic.to_string();
        let db_path = self.db_path.clone();
        blocking(move || Self { db_path }.record_failure_sync(&document_id, &batch_id, kind, &diagnostic)).await
    }

    async fn get_failed_by_batch(&self) -> Result<HashMap<String, Vec<String>>> {
        let db_path = self.db_path.clone();
        blocking(move || Self { db_path }.get_failed_by_batch_sync()).await
    }

    async fn get_batch(&self, batch_id: &str) -> Result<Option<Batch>> {
        let batch_id = batch_id.to_string();
        let db_path = self.db_path.clone();
        blocking(move || Self { db_path }.get_batch_sync(&batch_id)).await
    }

    async fn oldest_pending_batch(&self) -> Result<Option<Batch>> {
        let db_path = self.db_path.clone();
        blocking(move || Self { db_path }.oldest_pending_batch_sync()).await
    }

    async fn bump_document_attempt(&self, document_id: &str) -> Result<u32> {
        let document_id = document_id.to_string();
        let db_path = self.db_path.clone();
        blocking(move || Self { db_path }.bump_document_attempt_sync(&document_id)).await
    }

    async fn get_document_attempt(&self, document_id: &str) -> Result<u32> {
        let document_id = document_id.to_string();
        let db_path = self.db_path.clone();
        blocking(move || Self { db_path }.get_document_attempt_sync(&document_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StructuredRecord;
    use tempfile::TempDir;

    fn repo() -> (TempDir, SqliteRepository) {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("pipeline.db");
        let repo = SqliteRepository::new(&db_path).unwrap();
        (dir, repo)
    }

    #[tokio::test]
    async fn upsert_batch_then_status_transitions() {
        let (_dir, repo) = repo();
        let batch = Batch::new("BATCH-1".into(), "A.pdf".into(), 1);
        repo.upsert_batch(&batch).await.unwrap();

        repo.update_batch_status(&batch.batch_id, BatchStatus::Running, Some(Utc::now()), None)
            .await
            .unwrap();

        let err = repo
            .update_batch_status(&batch.batch_id, BatchStatus::Pending, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::IllegalTransition { .. }));

        repo.update_batch_status(&batch.batch_id, BatchStatus::Completed, None, Some(Utc::now()))
            .await
            .unwrap();

        let fetched = repo.get_batch(&batch.batch_id).await.unwrap().unwrap();
        assert_eq!(fetched.status, BatchStatus::Completed);
    }

    #[tokio::test]
    async fn upsert_document_is_idempotent() {
        let (_dir, repo) = repo();
        let record = DocumentRecord {
            document_id: "A".into(),
            batch_id: "BATCH-1".into(),
            record: StructuredRecord::default(),
        };
        repo.upsert_document(record.clone()).await.unwrap();
        repo.upsert_document(record).await.unwrap();

        let conn = connect(&repo.db_path).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn record_failure_then_get_failed_by_batch() {
        let (_dir, repo) = repo();
        repo.record_failure("A", "BATCH-1", ErrorKind::LlmParse, "bad json")
            .await
            .unwrap();

        let map = repo.get_failed_by_batch().await.unwrap();
        assert_eq!(map.get("BATCH-1").unwrap(), &vec!["A".to_string()]);
    }
}
