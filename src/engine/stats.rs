//! Live counters read by `PipelineEngine::stats`. Each field is an
//! independent atomic — matching the teacher's `Arc<AtomicUsize>` counter
//! style in `OcrService`/`DownloadService` — rather than a single
//! lock-guarded struct; a `Snapshot` reads all of them in one pass so a
//! caller polling at 10Hz never observes a torn write to any single counter.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub total: u64,
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub ocr_active: usize,
    pub llm_active: usize,
    pub in_queue: usize,
    pub current_file: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub is_running: bool,
}

pub struct Stats {
    total: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    ocr_active: AtomicUsize,
    llm_active: AtomicUsize,
    in_queue: AtomicUsize,
    current_file: Mutex<Option<String>>,
    started_at: Mutex<Option<DateTime<Utc>>>,
    running: Arc<AtomicBool>,
}

impl Stats {
    pub fn new(running: Arc<AtomicBool>) -> Self {
        Self {
            total: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            ocr_active: AtomicUsize::new(0),
            llm_active: AtomicUsize::new(0),
            in_queue: AtomicUsize::new(0),
            current_file: Mutex::new(None),
            started_at: Mutex::new(None),
            running,
        }
    }

    /// Called once per run, before any worker starts.
    pub fn reset(&self, total: u64) {
        self.total.store(total, Ordering::SeqCst);
        self.succeeded.store(0, Ordering::SeqCst);
        self.failed.store(0, Ordering::SeqCst);
        self.cancelled.store(0, Ordering::SeqCst);
        self.ocr_active.store(0, Ordering::SeqCst);
        self.llm_active.store(0, Ordering::SeqCst);
        self.in_queue.store(0, Ordering::SeqCst);
        *self.current_file.lock().unwrap() = None;
        *self.started_at.lock().unwrap() = Some(Utc::now());
    }

    pub fn set_current_file(&self, path: &Path) {
        *self.current_file.lock().unwrap() = Some(path.display().to_string());
    }

    pub fn ocr_active_inc(&self) {
        self.ocr_active.fetch_add(1, Ordering::SeqCst);
    }
    pub fn ocr_active_dec(&self) {
        self.ocr_active.fetch_sub(1, Ordering::SeqCst);
    }
    pub fn llm_active_inc(&self) {
        self.llm_active.fetch_add(1, Ordering::SeqCst);
    }
    pub fn llm_active_dec(&self) {
        self.llm_active.fetch_sub(1, Ordering::SeqCst);
    }
    pub fn in_queue_inc(&self) {
        self.in_queue.fetch_add(1, Ordering::SeqCst);
    }
    pub fn in_queue_dec(&self) {
        self.in_queue.fetch_sub(1, Ordering::SeqCst);
    }
    pub fn succeeded_inc(&self) {
        self.succeeded.fetch_add(1, Ordering::SeqCst);
    }
    pub fn failed_inc(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }
    pub fn cancelled_inc(&self) {
        self.cancelled.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> Snapshot {
        let succeeded = self.succeeded.load(Ordering::SeqCst);
        let failed = self.failed.load(Ordering::SeqCst);
        let cancelled = self.cancelled.load(Ordering::SeqCst);

        Snapshot {
            total: self.total.load(Ordering::SeqCst),
            processed: succeeded + failed + cancelled,
            succeeded,
            failed,
            cancelled,
            ocr_active: self.ocr_active.load(Ordering::SeqCst),
            llm_active: self.llm_active.load(Ordering::SeqCst),
            in_queue: self.in_queue.load(Ordering::SeqCst),
            current_file: self.current_file.lock().unwrap().clone(),
            started_at: *self.started_at.lock().unwrap(),
            is_running: self.running.load(Ordering::SeqCst),
        }
    }
}
