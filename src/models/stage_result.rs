//! The handoff value carried on the bounded channel from Stage 1 to Stage 2.

use std::path::PathBuf;

/// Produced by a Stage-1 (OCR) worker, consumed by a Stage-2 (LLM) worker.
/// Passed by value across the channel — no shared mutable state crosses the
/// stage boundary.
#[derive(Debug, Clone)]
pub struct StageResult {
    pub document_id: String,
    pub batch_id: String,
    pub source_path: PathBuf,
    pub text: String,
    pub ocr_elapsed_ms: u64,
    pub ocr_page_count: u32,
}
