//! Stage-1 text extraction, pluggable behind [`TextExtractor`].
//!
//! Two implementations, matching `spec.md` §6: [`EmbeddedTextExtractor`] for
//! digitally-produced PDFs (`pdftotext`), [`OcrTextExtractor`] for scans
//! (`pdftoppm` rasterization + `tesseract`). Swapped only while the engine is
//! idle, via `EngineConfig::extractor_mode`.

mod embedded;
mod ocr;

use std::path::Path;

use async_trait::async_trait;

use crate::cancel::CancelToken;
use crate::error::PipelineError;

pub use embedded::EmbeddedTextExtractor;
pub use ocr::OcrTextExtractor;

/// The result of extracting one document's text, whichever implementation
/// produced it.
#[derive(Debug, Clone)]
pub struct ExtractionOutput {
    pub text: String,
    pub page_count: u32,
    pub elapsed_ms: u64,
}

/// `Extract(path) -> (text, pageCount, elapsedMs) | error` (`spec.md` §6).
/// Pure function of the file; idempotent; honours `cancel` on a best-effort
/// basis between pages.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(
        &self,
        path: &Path,
        cancel: &CancelToken,
    ) -> Result<ExtractionOutput, PipelineError>;
}

/// Run `which <name>` and report whether the binary is on `PATH`, the way
/// the teacher's `model_utils::check_binary` gates OCR backends before use.
pub fn check_binary(name: &str) -> bool {
    which::which(name).is_ok()
}
