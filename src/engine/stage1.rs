//! Stage-1 (OCR) worker loop (`spec.md` §4.D.3).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::error::ErrorKind;
use crate::extractor::TextExtractor;
use crate::file_store::FileStore;
use crate::models::{Document, DocumentState, StageResult};
use crate::repository::Repository;

use super::fail_document;
use super::stats::Stats;

#[allow(clippy::too_many_arguments)]
pub async fn run(
    work: Arc<Mutex<VecDeque<Document>>>,
    extractor: Arc<dyn TextExtractor>,
    sender: mpsc::Sender<StageResult>,
    cancel: CancelToken,
    stats: Arc<Stats>,
    repository: Arc<dyn Repository>,
    file_store: Arc<FileStore>,
) {
    loop {
        let doc = {
            let mut guard = work.lock().unwrap();
            guard.pop_front()
        };
        let Some(mut doc) = doc else { break };
        doc.transition(DocumentState::Stage1Running)
            .expect("Pending -> Stage1Running is always legal on claim");

        if cancel.is_cancelled() {
            doc.transition(DocumentState::Cancelled)
                .expect("Stage1Running -> Cancelled is always legal");
            fail_document(
                &repository,
                &file_store,
                &stats,
                &doc.document_id,
                &doc.batch_id,
                &doc.source_path,
                ErrorKind::Cancelled,
                "cancelled before stage 1 start",
            )
            .await;
            continue;
        }

        stats.ocr_active_inc();
        stats.set_current_file(&doc.source_path);
        debug!(document_id = %doc.document_id, "stage 1 extracting");

        let outcome = extractor.extract(&doc.source_path, &cancel).await;
        stats.ocr_active_dec();

        let output = match outcome {
            Ok(output) => output,
            Err(e) => {
                doc.mark_failed(e.kind(), e.to_string());
                doc.transition(DocumentState::Failed)
                    .expect("Stage1Running -> Failed is always legal");
                fail_document(
                    &repository,
                    &file_store,
                    &stats,
                    &doc.document_id,
                    &doc.batch_id,
                    &doc.source_path,
                    e.kind(),
                    &e.to_string(),
                )
                .await;
                continue;
            }
        };

        if cancel.is_cancelled() {
            doc.transition(DocumentState::Cancelled)
                .expect("Stage1Running -> Cancelled is always legal");
            fail_document(
                &repository,
                &file_store,
                &stats,
                &doc.document_id,
                &doc.batch_id,
                &doc.source_path,
                ErrorKind::Cancelled,
                "cancelled after extraction, before handoff",
            )
            .await;
            continue;
        }

        doc.transition(DocumentState::Queued)
            .expect("Stage1Running -> Queued is always legal");

        let stage_result = StageResult {
            document_id: doc.document_id.clone(),
            batch_id: doc.batch_id.clone(),
            source_path: doc.source_path.clone(),
            text: output.text,
            ocr_elapsed_ms: output.elapsed_ms,
            ocr_page_count: output.page_count,
        };

        stats.in_queue_inc();
        if sender.send(stage_result).await.is_err() {
            // Receiver side gone — only happens if every Stage-2 worker has
            // already exited, which this run's supervisor never allows
            // while Stage-1 workers are still alive.
            stats.in_queue_dec();
            warn!(document_id = %doc.document_id, "stage 2 channel closed early");
        }
    }
    // Dropping `sender` here is what lets the channel close once every
    // Stage-1 worker has exited — no separate done-counter needed.
}
