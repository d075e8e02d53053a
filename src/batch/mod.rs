//! Batch identity and lifecycle: `NewBatch`, `BeginRun`, `EndRun`,
//! `RetryBatch` (`spec.md` §4.E). Sits above `FileStore` and `Repository`,
//! below `PipelineEngine`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::error::EngineError;
use crate::file_store::FileStore;
use crate::models::{Batch, BatchStatus, Document};
use crate::repository::Repository;

pub struct BatchCoordinator {
    repository: Arc<dyn Repository>,
    file_store: Arc<FileStore>,
}

impl BatchCoordinator {
    pub fn new(repository: Arc<dyn Repository>, file_store: Arc<FileStore>) -> Self {
        Self {
            repository,
            file_store,
        }
    }

    /// Admits `source_paths` into the inbox under a freshly-minted batch id
    /// and records the batch as `Pending`.
    pub async fn new_batch(&self, source_paths: &[PathBuf]) -> Result<String, EngineError> {
        let batch_id = generate_batch_id();
        let batch_name = source_paths
            .first()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| batch_id.clone());

        let (document_ids, _admitted_paths) = self.file_store.admit(&batch_id, source_paths)?;
        let batch = Batch::new(batch_id.clone(), batch_name, document_ids.len() as u64);
        self.repository.upsert_batch(&batch).await?;
        Ok(batch_id)
    }

    /// Selects the oldest `Pending` batch whose inbox is non-empty, claims
    /// its snapshot, and flips it to `Running`. A `Pending` batch with an
    /// empty inbox is completed immediately and skipped in favour of the
    /// next-oldest candidate (`spec.md` §4.E) rather than giving up after
    /// the first miss. Returns `None` once no `Pending` batch remains.
    pub async fn begin_run(&self) -> Result<Option<(Batch, Vec<Document>)>, EngineError> {
        loop {
            let Some(mut batch) = self.repository.oldest_pending_batch().await? else {
                return Ok(None);
            };

            let claimed = self.file_store.claim(&batch.batch_id)?;
            if claimed.is_empty() {
                self.repository
                    .update_batch_status(&batch.batch_id, BatchStatus::Completed, None, Some(Utc::now()))
                    .await?;
                continue;
            }

            let now = Utc::now();
            self.repository
                .update_batch_status(&batch.batch_id, BatchStatus::Running, Some(now), None)
                .await?;
            batch.status = BatchStatus::Running;
            batch.processing_started_at = Some(now);

            let mut documents = Vec::with_capacity(claimed.len());
            for path in claimed {
                let document_id = document_id_from_path(&batch.batch_id, &path);
                let attempt = self.repository.get_document_attempt(&document_id).await?;
                documents.push(Document::with_attempt(document_id, batch.batch_id.clone(), path, attempt));
            }

            return Ok(Some((batch, documents)));
        }
    }

    /// Marks a run's terminal status (`Completed` or `Cancelled`), stamps
    /// `finished_at`, and persists the final per-outcome counts
    /// (`spec.md` §4.D.6: `endRun(finalStats)`).
    pub async fn end_run(
        &self,
        batch_id: &str,
        status: BatchStatus,
        succeeded: u64,
        failed: u64,
        cancelled: u64,
    ) -> Result<(), EngineError> {
        self.repository
            .update_batch_status(batch_id, status, None, Some(Utc::now()))
            .await?;
        self.repository
            .update_batch_counts(batch_id, succeeded, failed, cancelled)
            .await?;
        Ok(())
    }

    /// Moves every file in `failed/` for `batch_id` back into `inbox/` under
    /// a new batch id (`spec.md` §9: minting a new id so progress stays
    /// observable) and records that new batch as `Pending`.
    pub async fn retry_batch(&self, batch_id: &str) -> Result<String, EngineError> {
        let new_batch_id = generate_batch_id();
        let moved = self.file_store.requeue_failed(batch_id, &new_batch_id)?;
        if moved.is_empty() {
            return Err(EngineError::NothingToRun);
        }

        for (document_id, _dest) in &moved {
            self.repository.bump_document_attempt(document_id).await?;
        }

        let batch = Batch::new(new_batch_id.clone(), format!("retry-of-{batch_id}"), moved.len() as u64);
        self.repository.upsert_batch(&batch).await?;
        Ok(new_batch_id)
    }
}

fn generate_batch_id() -> String {
    let timestamp = Utc::now().format("%Y%m%dT%H%M%SZ");
    let suffix = Uuid::new_v4().simple().to_string();
    format!("BATCH-{timestamp}-{}", &suffix[..8])
}

/// Recover the document id from an admitted inbox path named
/// `<batch_id>__<document_id>.pdf`.
fn document_id_from_path(batch_id: &str, path: &Path) -> String {
    let prefix = format!("{batch_id}__");
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.strip_prefix(&prefix))
        .and_then(|rest| rest.strip_suffix(".pdf"))
        .unwrap_or("unknown")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::SqliteRepository;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<SqliteRepository>, BatchCoordinator) {
        let dir = TempDir::new().unwrap();
        let file_store = Arc::new(FileStore::new(dir.path()).unwrap());
        let repository = Arc::new(SqliteRepository::new(&dir.path().join("pipeline.db")).unwrap());
        let coordinator = BatchCoordinator::new(repository.clone(), file_store);
        (dir, repository, coordinator)
    }

    #[tokio::test]
    async fn new_batch_then_begin_run_claims_documents() {
        let (dir, _repository, coordinator) = setup();
        let src = dir.path().join("A.pdf");
        std::fs::write(&src, b"pdf").unwrap();

        let batch_id = coordinator.new_batch(&[src]).await.unwrap();
        let (batch, documents) = coordinator.begin_run().await.unwrap().unwrap();

        assert_eq!(batch.batch_id, batch_id);
        assert_eq!(batch.status, BatchStatus::Running);
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].document_id, "A");
        assert_eq!(documents[0].attempt, 1);
    }

    #[tokio::test]
    async fn begin_run_with_nothing_pending_returns_none() {
        let (_dir, _repository, coordinator) = setup();
        assert!(coordinator.begin_run().await.unwrap().is_none());
    }

    /// A `Pending` batch whose inbox is empty (its files were admitted, then
    /// all routed away by an earlier run, or — as here — never admitted at
    /// all) must be skipped in favour of the next-oldest `Pending` batch
    /// rather than ending the search (`spec.md` §4.E).
    #[tokio::test]
    async fn begin_run_skips_pending_batch_with_empty_inbox() {
        let (dir, repository, coordinator) = setup();

        let empty_batch = Batch::new("BATCH-EMPTY".to_string(), "empty".to_string(), 0);
        repository.upsert_batch(&empty_batch).await.unwrap();

        let src = dir.path().join("A.pdf");
        std::fs::write(&src, b"pdf").unwrap();
        let batch_id = coordinator.new_batch(&[src]).await.unwrap();

        let (batch, documents) = coordinator.begin_run().await.unwrap().unwrap();
        assert_eq!(batch.batch_id, batch_id);
        assert_eq!(documents.len(), 1);

        let completed_empty = repository.get_batch("BATCH-EMPTY").await.unwrap().unwrap();
        assert_eq!(completed_empty.status, BatchStatus::Completed);
    }

    #[tokio::test]
    async fn retry_batch_increments_attempt_and_mints_new_batch_id() {
        use crate::error::ErrorKind;

        let (dir, repository, coordinator) = setup();
        let src = dir.path().join("A.pdf");
        std::fs::write(&src, b"pdf").unwrap();

        let batch_id = coordinator.new_batch(&[src]).await.unwrap();
        let (_batch, documents) = coordinator.begin_run().await.unwrap().unwrap();
        assert_eq!(documents[0].attempt, 1);

        repository
            .record_failure(&documents[0].document_id, &batch_id, ErrorKind::OcrError, "boom")
            .await
            .unwrap();
        coordinator
            .file_store
            .route(&batch_id, &documents[0].source_path, crate::file_store::RouteOutcome::Failed)
            .unwrap();

        let new_batch_id = coordinator.retry_batch(&batch_id).await.unwrap();
        assert_ne!(new_batch_id, batch_id);

        let (retry_batch, retry_documents) = coordinator.begin_run().await.unwrap().unwrap();
        assert_eq!(retry_batch.batch_id, new_batch_id);
        assert_eq!(retry_documents.len(), 1);
        assert_eq!(retry_documents[0].document_id, "A");
        assert_eq!(retry_documents[0].attempt, 2);
    }
}
