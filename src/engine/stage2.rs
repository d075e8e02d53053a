//! Stage-2 (LLM) worker loop (`spec.md` §4.D.4).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::debug;

use crate::cancel::CancelToken;
use crate::error::ErrorKind;
use crate::file_store::{FileStore, RouteOutcome};
use crate::llm::StructuredExtractor;
use crate::models::StageResult;
use crate::repository::{DocumentRecord, Repository};
use crate::validator;

use super::fail_document;
use super::stats::Stats;

#[allow(clippy::too_many_arguments)]
pub async fn run(
    receiver: Arc<AsyncMutex<mpsc::Receiver<StageResult>>>,
    structured_extractor: Arc<dyn StructuredExtractor>,
    cancel: CancelToken,
    stats: Arc<Stats>,
    repository: Arc<dyn Repository>,
    file_store: Arc<FileStore>,
    llm_timeout: Duration,
) {
    loop {
        let sr = {
            let mut guard = receiver.lock().await;
            guard.recv().await
        };
        let Some(sr) = sr else { break };
        stats.in_queue_dec();

        if cancel.is_cancelled() {
            fail_document(
                &repository,
                &file_store,
                &stats,
                &sr.document_id,
                &sr.batch_id,
                &sr.source_path,
                ErrorKind::Cancelled,
                "cancelled before stage 2 start",
            )
            .await;
            continue;
        }

        stats.llm_active_inc();
        stats.set_current_file(&sr.source_path);
        debug!(document_id = %sr.document_id, "stage 2 parsing");

        let parsed = tokio::time::timeout(llm_timeout, structured_extractor.parse(&sr.text)).await;
        stats.llm_active_dec();

        let record = match parsed {
            Err(_elapsed) => {
                fail_document(
                    &repository,
                    &file_store,
                    &stats,
                    &sr.document_id,
                    &sr.batch_id,
                    &sr.source_path,
                    ErrorKind::LlmTimeout,
                    "llm call exceeded the configured timeout",
                )
                .await;
                continue;
            }
            Ok(Err(e)) => {
                fail_document(
                    &repository,
                    &file_store,
                    &stats,
                    &sr.document_id,
                    &sr.batch_id,
                    &sr.source_path,
                    e.kind(),
                    &e.to_string(),
                )
                .await;
                continue;
            }
            Ok(Ok(record)) => record,
        };

        let cleaned = match validator::clean(record) {
            Ok(cleaned) => cleaned,
            Err(e) => {
                fail_document(
                    &repository,
                    &file_store,
                    &stats,
                    &sr.document_id,
                    &sr.batch_id,
                    &sr.source_path,
                    e.kind(),
                    &e.to_string(),
                )
                .await;
                continue;
            }
        };

        if cancel.is_cancelled() {
            fail_document(
                &repository,
                &file_store,
                &stats,
                &sr.document_id,
                &sr.batch_id,
                &sr.source_path,
                ErrorKind::Cancelled,
                "cancelled after parsing, before persist",
            )
            .await;
            continue;
        }

        let doc_record = DocumentRecord {
            document_id: sr.document_id.clone(),
            batch_id: sr.batch_id.clone(),
            record: cleaned,
        };

        if let Err(e) = repository.upsert_document(doc_record).await {
            fail_document(
                &repository,
                &file_store,
                &stats,
                &sr.document_id,
                &sr.batch_id,
                &sr.source_path,
                ErrorKind::IoError,
                &e.to_string(),
            )
            .await;
            continue;
        }

        if let Err(e) = file_store.route(&sr.batch_id, &sr.source_path, RouteOutcome::Succeeded) {
            tracing::warn!(document_id = %sr.document_id, error = %e, "failed to route succeeded document");
        }
        stats.succeeded_inc();
    }
}
