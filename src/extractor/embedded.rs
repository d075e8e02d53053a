//! `pdftotext`-based extraction for digitally-produced PDFs — no
//! rasterization, no OCR engine, just the embedded text layer.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

use async_trait::async_trait;
use tracing::debug;

use crate::cancel::CancelToken;
use crate::error::PipelineError;

use super::{ExtractionOutput, TextExtractor};

pub struct EmbeddedTextExtractor;

impl EmbeddedTextExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for EmbeddedTextExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn run_pdftotext(path: &Path) -> Result<String, PipelineError> {
    let output = Command::new("pdftotext")
        .arg("-layout")
        .arg(path)
        .arg("-")
        .output()
        .map_err(|e| PipelineError::OcrError(format!("pdftotext not runnable: {e}")))?;

    if !output.status.success() {
        return Err(PipelineError::OcrError(format!(
            "pdftotext exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    String::from_utf8(output.stdout)
        .map_err(|e| PipelineError::OcrError(format!("pdftotext produced invalid UTF-8: {e}")))
}

fn page_count(path: &Path) -> Result<u32, PipelineError> {
    let output = Command::new("pdfinfo")
        .arg(path)
        .output()
        .map_err(|e| PipelineError::OcrError(format!("pdfinfo not runnable: {e}")))?;

    if !output.status.success() {
        return Err(PipelineError::OcrError(format!(
            "pdfinfo exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .lines()
        .find_map(|line| line.strip_prefix("Pages:"))
        .and_then(|rest| rest.trim().parse().ok())
        .ok_or_else(|| PipelineError::OcrError("pdfinfo output missing Pages:".into()))
}

fn extract_sync(path: PathBuf) -> Result<ExtractionOutput, PipelineError> {
    let started = Instant::now();
    let text = run_pdftotext(&path)?;
    let pages = page_count(&path).unwrap_or(0);

    Ok(ExtractionOutput {
        text,
        page_count: pages,
        elapsed_ms: started.elapsed().as_millis() as u64,
    })
}

#[async_trait]
impl TextExtractor for EmbeddedTextExtractor {
    async fn extract(
        &self,
        path: &Path,
        cancel: &CancelToken,
    ) -> Result<ExtractionOutput, PipelineError> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let path = path.to_path_buf();
        debug!(path = %path.display(), "extracting embedded text");

        let result = tokio::task::spawn_blocking(move || extract_sync(path))
            .await
            .map_err(|e| PipelineError::OcrError(format!("extractor task panicked: {e}")))??;

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        Ok(result)
    }
}
