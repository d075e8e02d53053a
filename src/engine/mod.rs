//! `PipelineEngine` — the scheduler (`spec.md` §4.D). One instance per
//! process; a value, not a global (`spec.md` §9).

mod stage1;
mod stage2;
mod stats;

pub use stats::Snapshot;

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{info, warn};

use crate::batch::BatchCoordinator;
use crate::cancel::CancelToken;
use crate::config::ExtractorMode;
use crate::error::{EngineError, ErrorKind};
use crate::extractor::{EmbeddedTextExtractor, OcrTextExtractor, TextExtractor};
use crate::file_store::{FileStore, RouteOutcome};
use crate::llm::StructuredExtractor;
use crate::models::BatchStatus;
use crate::repository::Repository;

use stats::Stats;

/// `config` in `spec.md` §4.D.1, validated on entry.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub ocr_workers: usize,
    pub llm_workers: usize,
    pub queue_size: usize,
    pub enable_page_parallel_ocr: bool,
    pub ocr_page_workers: usize,
    pub llm_timeout: Duration,
    pub extractor_mode: ExtractorMode,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if !(1..=20).contains(&self.ocr_workers) {
            return Err(EngineError::InvalidConfig(format!(
                "ocr_workers must be in 1..=20, got {}",
                self.ocr_workers
            )));
        }
        if !(1..=20).contains(&self.llm_workers) {
            return Err(EngineError::InvalidConfig(format!(
                "llm_workers must be in 1..=20, got {}",
                self.llm_workers
            )));
        }
        if !(1..=10).contains(&self.queue_size) {
            return Err(EngineError::InvalidConfig(format!(
                "queue_size must be in 1..=10, got {}",
                self.queue_size
            )));
        }
        if !(1..=8).contains(&self.ocr_page_workers) {
            return Err(EngineError::InvalidConfig(format!(
                "ocr_page_workers must be in 1..=8, got {}",
                self.ocr_page_workers
            )));
        }
        Ok(())
    }
}

/// The scheduler: two worker pools, the bounded channel, lifecycle, stats,
/// cancellation. `running` is the single authoritative liveness boolean
/// (`spec.md` §9 — never infer liveness from multiple predicates).
pub struct PipelineEngine {
    repository: Arc<dyn Repository>,
    file_store: Arc<FileStore>,
    structured_extractor: Arc<dyn StructuredExtractor>,
    batch_coordinator: Arc<BatchCoordinator>,
    extractor: Mutex<Arc<dyn TextExtractor>>,
    running: Arc<AtomicBool>,
    cancel: Mutex<Option<CancelToken>>,
    current_batch_id: Mutex<Option<String>>,
    stats: Arc<Stats>,
}

impl PipelineEngine {
    pub fn new(
        repository: Arc<dyn Repository>,
        file_store: Arc<FileStore>,
        structured_extractor: Arc<dyn StructuredExtractor>,
        initial_extractor: Arc<dyn TextExtractor>,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(Stats::new(running.clone()));
        let batch_coordinator = Arc::new(BatchCoordinator::new(repository.clone(), file_store.clone()));

        Self {
            repository,
            file_store,
            structured_extractor,
            batch_coordinator,
            extractor: Mutex::new(initial_extractor),
            running,
            cancel: Mutex::new(None),
            current_batch_id: Mutex::new(None),
            stats,
        }
    }

    pub fn batch_coordinator(&self) -> &Arc<BatchCoordinator> {
        &self.batch_coordinator
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// `spec.md` §4.D.2: check-and-set, claim the oldest pending batch,
    /// launch both worker pools, return immediately.
    pub async fn start(&self, config: EngineConfig) -> Result<(), EngineError> {
        config.validate()?;

        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(EngineError::AlreadyRunning);
        }

        let begin_result = self.batch_coordinator.begin_run().await;
        let (batch, documents) = match begin_result {
            Ok(Some(pair)) => pair,
            Ok(None) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(EngineError::NothingToRun);
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        let cancel = CancelToken::new();
        *self.cancel.lock().unwrap() = Some(cancel.clone());
        *self.current_batch_id.lock().unwrap() = Some(batch.batch_id.clone());
        self.stats.reset(documents.len() as u64);

        // The extractor pointer is only ever changed by `toggle_embedded_ocr`
        // (or at construction), which is rejected while a run is active — so
        // reading it here always reflects whatever was selected the last
        // time the engine was idle, matching `config.extractor_mode`
        // ("change only when idle", `spec.md` §6).
        let extractor = self.extractor.lock().unwrap().clone();

        let work = Arc::new(Mutex::new(documents.into_iter().collect::<VecDeque<_>>()));
        let (tx, rx) = mpsc::channel(config.queue_size);
        let rx = Arc::new(AsyncMutex::new(rx));

        let mut stage1_handles = Vec::with_capacity(config.ocr_workers);
        for _ in 0..config.ocr_workers {
            stage1_handles.push(tokio::spawn(stage1::run(
                work.clone(),
                extractor.clone(),
                tx.clone(),
                cancel.clone(),
                self.stats.clone(),
                self.repository.clone(),
                self.file_store.clone(),
            )));
        }
        // The engine must not hold a sender itself — every Stage-1 worker
        // drops its clone on exit, and only then does the channel close.
        drop(tx);

        let mut stage2_handles = Vec::with_capacity(config.llm_workers);
        for _ in 0..config.llm_workers {
            stage2_handles.push(tokio::spawn(stage2::run(
                rx.clone(),
                self.structured_extractor.clone(),
                cancel.clone(),
                self.stats.clone(),
                self.repository.clone(),
                self.file_store.clone(),
                config.llm_timeout,
            )));
        }

        let batch_coordinator = self.batch_coordinator.clone();
        let running = self.running.clone();
        let batch_id = batch.batch_id.clone();
        let cancel_for_supervisor = cancel.clone();
        let stats_for_supervisor = self.stats.clone();

        tokio::spawn(async move {
            for handle in stage1_handles {
                if let Err(e) = handle.await {
                    warn!(error = %e, "stage 1 worker panicked");
                }
            }
            for handle in stage2_handles {
                if let Err(e) = handle.await {
                    warn!(error = %e, "stage 2 worker panicked");
                }
            }

            let final_status = if cancel_for_supervisor.is_cancelled() {
                BatchStatus::Cancelled
            } else {
                BatchStatus::Completed
            };
            let final_snapshot = stats_for_supervisor.snapshot();

            if let Err(e) = batch_coordinator
                .end_run(
                    &batch_id,
                    final_status,
                    final_snapshot.succeeded,
                    final_snapshot.failed,
                    final_snapshot.cancelled,
                )
                .await
            {
                warn!(error = %e, batch_id, "failed to finalize batch");
            }
            info!(batch_id, status = final_status.as_str(), "run finished");
            running.store(false, Ordering::SeqCst);
        });

        Ok(())
    }

    /// Cooperative cancellation: sets the signal, waits for the run to
    /// fully drain, and returns how many documents did not reach
    /// `Succeeded`. Idempotent — a no-op returning 0 when nothing is running.
    pub async fn stop(&self) -> u64 {
        if !self.running.load(Ordering::SeqCst) {
            return 0;
        }

        if let Some(cancel) = self.cancel.lock().unwrap().clone() {
            cancel.cancel();
        }

        while self.running.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let snapshot = self.stats.snapshot();
        snapshot.failed + snapshot.cancelled
    }

    pub fn stats(&self) -> Snapshot {
        self.stats.snapshot()
    }

    /// Flips the `TextExtractor` implementation. Rejected with `Busy` while
    /// a batch is active (`spec.md` §4.D.1).
    pub fn toggle_embedded_ocr(&self, use_embedded: bool) -> Result<(), EngineError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(EngineError::Busy);
        }

        let mut guard = self.extractor.lock().unwrap();
        *guard = if use_embedded {
            Arc::new(EmbeddedTextExtractor::new())
        } else {
            Arc::new(OcrTextExtractor::new(false, 1))
        };
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
async fn fail_document(
    repository: &Arc<dyn Repository>,
    file_store: &Arc<FileStore>,
    stats: &Arc<Stats>,
    document_id: &str,
    batch_id: &str,
    source_path: &Path,
    kind: ErrorKind,
    diagnostic: &str,
) {
    if let Err(e) = repository
        .record_failure(document_id, batch_id, kind, diagnostic)
        .await
    {
        warn!(error = %e, document_id, "failed to record document failure");
    }

    if let Err(e) = file_store.route(batch_id, source_path, RouteOutcome::Failed) {
        warn!(error = %e, document_id, "failed to route failed document");
    }

    if kind == ErrorKind::Cancelled {
        stats.cancelled_inc();
    } else {
        stats.failed_inc();
    }
}
