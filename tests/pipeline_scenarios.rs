//! End-to-end scenarios against a real `SqliteRepository` and `FileStore`,
//! driven by fake Stage-1/Stage-2 extractors (`spec.md` §8).

mod support;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use deed_pipeline::config::ExtractorMode;
use deed_pipeline::engine::{EngineConfig, PipelineEngine};
use deed_pipeline::file_store::FileStore;
use deed_pipeline::models::BatchStatus;
use deed_pipeline::repository::SqliteRepository;

use support::{valid_record, write_pdf, FakeStructuredExtractor, FakeTextExtractor};

fn engine_config(ocr_workers: usize, llm_workers: usize, queue_size: usize) -> EngineConfig {
    EngineConfig {
        ocr_workers,
        llm_workers,
        queue_size,
        enable_page_parallel_ocr: false,
        ocr_page_workers: 1,
        llm_timeout: Duration::from_secs(5),
        extractor_mode: ExtractorMode::Embedded,
    }
}

async fn wait_until_idle(engine: &Arc<PipelineEngine>) {
    while engine.is_running() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn happy_path_single_document() {
    let root = TempDir::new().unwrap();
    let file_store = Arc::new(FileStore::new(root.path()).unwrap());
    let repository = Arc::new(SqliteRepository::new(&root.path().join("pipeline.db")).unwrap());

    let src_dir = TempDir::new().unwrap();
    let a = src_dir.path().join("A.pdf");
    write_pdf(&a);

    let text_extractor = Arc::new(FakeTextExtractor::new(Duration::from_millis(10)));
    let structured_extractor = Arc::new(FakeStructuredExtractor::new(Duration::ZERO));

    let engine = Arc::new(PipelineEngine::new(
        repository,
        file_store.clone(),
        structured_extractor,
        text_extractor,
    ));

    let batch_id = engine.batch_coordinator().new_batch(&[a]).await.unwrap();
    engine.start(engine_config(1, 1, 1)).await.unwrap();
    wait_until_idle(&engine).await;

    let snapshot = engine.stats();
    assert_eq!(snapshot.total, 1);
    assert_eq!(snapshot.succeeded, 1);
    assert_eq!(snapshot.failed, 0);

    let processed = std::fs::read_dir(root.path().join("processed"))
        .unwrap()
        .count();
    assert_eq!(processed, 1);

    let batch = engine
        .batch_coordinator()
        .end_run(&batch_id, BatchStatus::Completed, 1, 0, 0)
        .await;
    // end_run is already idempotent-rejecting via the repository's
    // conditional update; a second Completed->Completed transition is
    // illegal and expected to error here.
    assert!(batch.is_err());
}

#[tokio::test]
async fn backpressure_keeps_queue_at_capacity() {
    let root = TempDir::new().unwrap();
    let file_store = Arc::new(FileStore::new(root.path()).unwrap());
    let repository = Arc::new(SqliteRepository::new(&root.path().join("pipeline.db")).unwrap());

    let src_dir = TempDir::new().unwrap();
    let mut paths = Vec::new();
    for i in 0..10 {
        let p = src_dir.path().join(format!("doc{i}.pdf"));
        write_pdf(&p);
        paths.push(p);
    }

    let text_extractor = Arc::new(FakeTextExtractor::new(Duration::ZERO));
    let structured_extractor = Arc::new(FakeStructuredExtractor::new(Duration::from_millis(50)));

    let engine = Arc::new(PipelineEngine::new(
        repository,
        file_store,
        structured_extractor,
        text_extractor,
    ));

    engine.batch_coordinator().new_batch(&paths).await.unwrap();
    let started = Instant::now();
    engine.start(engine_config(4, 1, 1)).await.unwrap();

    let mut max_in_queue = 0;
    while engine.is_running() {
        max_in_queue = max_in_queue.max(engine.stats().in_queue);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(max_in_queue <= 1, "queue exceeded capacity: {max_in_queue}");
    assert!(started.elapsed() >= Duration::from_millis(500));

    let snapshot = engine.stats();
    assert_eq!(snapshot.succeeded, 10);
}

#[tokio::test]
async fn mid_run_stop_cancels_remaining_documents() {
    let root = TempDir::new().unwrap();
    let file_store = Arc::new(FileStore::new(root.path()).unwrap());
    let repository = Arc::new(SqliteRepository::new(&root.path().join("pipeline.db")).unwrap());

    let src_dir = TempDir::new().unwrap();
    let mut paths = Vec::new();
    for i in 0..10 {
        let p = src_dir.path().join(format!("doc{i}.pdf"));
        write_pdf(&p);
        paths.push(p);
    }

    let text_extractor = Arc::new(FakeTextExtractor::new(Duration::ZERO));
    let structured_extractor = Arc::new(FakeStructuredExtractor::new(Duration::from_millis(50)));

    let engine = Arc::new(PipelineEngine::new(
        repository,
        file_store.clone(),
        structured_extractor,
        text_extractor,
    ));

    let batch_id = engine.batch_coordinator().new_batch(&paths).await.unwrap();
    engine.start(engine_config(4, 1, 1)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(120)).await;
    let stopped = engine.stop().await;

    assert!(!engine.is_running());
    let snapshot = engine.stats();
    assert_eq!(snapshot.succeeded + snapshot.failed + snapshot.cancelled, 10);
    assert_eq!(stopped, snapshot.failed + snapshot.cancelled);

    let failed_count = std::fs::read_dir(root.path().join("failed")).unwrap().count();
    assert_eq!(failed_count as u64, snapshot.failed + snapshot.cancelled);

    let _ = (file_store, batch_id);
}

#[tokio::test]
async fn llm_failure_is_isolated_to_one_document() {
    let root = TempDir::new().unwrap();
    let file_store = Arc::new(FileStore::new(root.path()).unwrap());
    let repository = Arc::new(SqliteRepository::new(&root.path().join("pipeline.db")).unwrap());

    let src_dir = TempDir::new().unwrap();
    let mut paths = Vec::new();
    for i in 0..5 {
        let p = src_dir.path().join(format!("doc{i}.pdf"));
        write_pdf(&p);
        paths.push(p);
    }

    let text_extractor = Arc::new(FakeTextExtractor::new(Duration::ZERO));
    let structured_extractor = Arc::new(FakeStructuredExtractor::with_failures(
        Duration::ZERO,
        &["text-doc2"],
    ));

    let engine = Arc::new(PipelineEngine::new(
        repository.clone(),
        file_store.clone(),
        structured_extractor,
        text_extractor,
    ));

    engine.batch_coordinator().new_batch(&paths).await.unwrap();
    engine.start(engine_config(2, 1, 2)).await.unwrap();
    wait_until_idle(&engine).await;

    let snapshot = engine.stats();
    assert_eq!(snapshot.succeeded, 4);
    assert_eq!(snapshot.failed, 1);

    let failed_by_batch = repository.get_failed_by_batch().await.unwrap();
    let failed_ids: Vec<&String> = failed_by_batch.values().flatten().collect();
    assert_eq!(failed_ids, vec![&"doc2".to_string()]);
}

#[tokio::test]
async fn retry_batch_reprocesses_failed_documents_under_a_new_batch_id() {
    let root = TempDir::new().unwrap();
    let file_store = Arc::new(FileStore::new(root.path()).unwrap());
    let repository = Arc::new(SqliteRepository::new(&root.path().join("pipeline.db")).unwrap());

    let src_dir = TempDir::new().unwrap();
    let mut paths = Vec::new();
    for i in 0..5 {
        let p = src_dir.path().join(format!("doc{i}.pdf"));
        write_pdf(&p);
        paths.push(p);
    }

    let text_extractor = Arc::new(FakeTextExtractor::new(Duration::ZERO));
    let failing_extractor = Arc::new(FakeStructuredExtractor::with_failures(
        Duration::ZERO,
        &["text-doc2"],
    ));

    let engine = Arc::new(PipelineEngine::new(
        repository.clone(),
        file_store.clone(),
        failing_extractor,
        text_extractor.clone(),
    ));

    let original_batch_id = engine.batch_coordinator().new_batch(&paths).await.unwrap();
    engine.start(engine_config(2, 1, 2)).await.unwrap();
    wait_until_idle(&engine).await;
    assert_eq!(engine.stats().failed, 1);

    let new_batch_id = engine
        .batch_coordinator()
        .retry_batch(&original_batch_id)
        .await
        .unwrap();
    assert_ne!(new_batch_id, original_batch_id);

    let inbox_count = std::fs::read_dir(root.path().join("inbox")).unwrap().count();
    assert_eq!(inbox_count, 1);

    let fixed_extractor = Arc::new(FakeStructuredExtractor::new(Duration::ZERO));
    let retry_engine = Arc::new(PipelineEngine::new(
        repository.clone(),
        file_store,
        fixed_extractor,
        text_extractor,
    ));
    retry_engine.start(engine_config(1, 1, 1)).await.unwrap();
    wait_until_idle(&retry_engine).await;

    assert_eq!(retry_engine.stats().succeeded, 1);

    let original_batch = repository.get_batch(&original_batch_id).await.unwrap().unwrap();
    assert_eq!(original_batch.status, BatchStatus::Completed);
    assert_eq!(original_batch.failed, 1);
    assert_eq!(original_batch.succeeded, 4);

    let new_batch = repository.get_batch(&new_batch_id).await.unwrap().unwrap();
    assert_eq!(new_batch.status, BatchStatus::Completed);
    assert_eq!(new_batch.succeeded, 1);
}

#[tokio::test]
async fn colliding_filenames_get_a_deduplicated_document_id() {
    let root = TempDir::new().unwrap();
    let file_store = Arc::new(FileStore::new(root.path()).unwrap());
    let repository = Arc::new(SqliteRepository::new(&root.path().join("pipeline.db")).unwrap());

    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    let a = dir_a.path().join("A.pdf");
    let b = dir_b.path().join("A.pdf");
    write_pdf(&a);
    write_pdf(&b);

    let text_extractor = Arc::new(FakeTextExtractor::new(Duration::ZERO));
    let structured_extractor = Arc::new(FakeStructuredExtractor::new(Duration::ZERO));

    let engine = Arc::new(PipelineEngine::new(
        repository,
        file_store,
        structured_extractor,
        text_extractor,
    ));

    engine.batch_coordinator().new_batch(&[a, b]).await.unwrap();
    engine.start(engine_config(2, 2, 2)).await.unwrap();
    wait_until_idle(&engine).await;

    let snapshot = engine.stats();
    assert_eq!(snapshot.succeeded, 2);
    assert_eq!(snapshot.failed, 0);
}

#[test]
fn valid_record_has_required_parties() {
    let record = valid_record();
    assert!(!record.buyers.is_empty());
    assert!(!record.sellers.is_empty());
}
