//! `pdftoppm` + `tesseract`-based extraction for scanned PDFs.
//!
//! Rasterizes each page at 300dpi, then OCRs it with `eng+kan` (the corpus is
//! mixed English/Kannada). When `page_parallel` is set, pages within a single
//! document fan out across `page_workers` threads — internal to the
//! extractor, not counted against the Stage-1 worker pool (`spec.md` §4.D.3).

use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::Instant;

use async_trait::async_trait;
use tempfile::TempDir;
use tracing::debug;

use crate::cancel::CancelToken;
use crate::error::PipelineError;

use super::{ExtractionOutput, TextExtractor};

pub struct OcrTextExtractor {
    tesseract_lang: String,
    page_parallel: bool,
    page_workers: usize,
}

impl OcrTextExtractor {
    pub fn new(page_parallel: bool, page_workers: usize) -> Self {
        Self {
            tesseract_lang: "eng+kan".to_string(),
            page_parallel,
            page_workers: page_workers.max(1),
        }
    }
}

fn rasterize(path: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    let prefix = out_dir.join("page");
    let status = Command::new("pdftoppm")
        .arg("-png")
        .arg("-r")
        .arg("300")
        .arg(path)
        .arg(&prefix)
        .status()
        .map_err(|e| PipelineError::OcrError(format!("pdftoppm not runnable: {e}")))?;

    if !status.success() {
        return Err(PipelineError::OcrError(format!(
            "pdftoppm exited with {status}"
        )));
    }

    let mut pages: Vec<PathBuf> = std::fs::read_dir(out_dir)
        .map_err(|e| PipelineError::IoError(e.to_string()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("png"))
        .collect();
    pages.sort();
    Ok(pages)
}

fn ocr_page(image_path: &Path, lang: &str) -> Result<String, PipelineError> {
    let output = Command::new("tesseract")
        .arg(image_path)
        .arg("stdout")
        .arg("-l")
        .arg(lang)
        .output()
        .map_err(|e| PipelineError::OcrError(format!("tesseract not runnable: {e}")))?;

    if !output.status.success() {
        return Err(PipelineError::OcrError(format!(
            "tesseract exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    String::from_utf8(output.stdout)
        .map_err(|e| PipelineError::OcrError(format!("tesseract produced invalid UTF-8: {e}")))
}

fn ocr_pages_sequential(pages: &[PathBuf], lang: &str) -> Result<Vec<String>, PipelineError> {
    pages.iter().map(|p| ocr_page(p, lang)).collect()
}

fn ocr_pages_parallel(
    pages: &[PathBuf],
    lang: &str,
    workers: usize,
) -> Result<Vec<String>, PipelineError> {
    let mut results: Vec<Option<Result<String, PipelineError>>> =
        (0..pages.len()).map(|_| None).collect();

    thread::scope(|scope| {
        let chunk_size = pages.len().div_ceil(workers).max(1);
        let mut handles = Vec::new();

        for (chunk_idx, chunk) in pages.chunks(chunk_size).enumerate() {
            let base = chunk_idx * chunk_size;
            handles.push((
                base,
                scope.spawn(move || {
                    chunk
                        .iter()
                        .map(|p| ocr_page(p, lang))
                        .collect::<Vec<_>>()
                }),
            ));
        }

        for (base, handle) in handles {
            let chunk_results = handle.join().expect("ocr worker thread panicked");
            for (i, r) in chunk_results.into_iter().enumerate() {
                results[base + i] = Some(r);
            }
        }
    });

    results
        .into_iter()
        .map(|r| r.expect("every page index was assigned a result"))
        .collect()
}

fn extract_sync(
    path: PathBuf,
    lang: String,
    page_parallel: bool,
    page_workers: usize,
) -> Result<ExtractionOutput, PipelineError> {
    let started = Instant::now();
    let work_dir = TempDir::new().map_err(|e| PipelineError::IoError(e.to_string()))?;
    let pages = rasterize(&path, work_dir.path())?;

    let page_texts = if page_parallel && pages.len() > 1 {
        ocr_pages_parallel(&pages, &lang, page_workers)?
    } else {
        ocr_pages_sequential(&pages, &lang)?
    };

    let page_count = page_texts.len() as u32;
    let text = page_texts.join("\n\x0c\n");

    Ok(ExtractionOutput {
        text,
        page_count,
        elapsed_ms: started.elapsed().as_millis() as u64,
    })
}

#[async_trait]
impl TextExtractor for OcrTextExtractor {
    async fn extract(
        &self,
        path: &Path,
        cancel: &CancelToken,
    ) -> Result<ExtractionOutput, PipelineError> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let path = path.to_path_buf();
        let lang = self.tesseract_lang.clone();
        let page_parallel = self.page_parallel;
        let page_workers = self.page_workers;
        debug!(path = %path.display(), page_parallel, page_workers, "ocr extracting");

        let result = tokio::task::spawn_blocking(move || {
            extract_sync(path, lang, page_parallel, page_workers)
        })
        .await
        .map_err(|e| PipelineError::OcrError(format!("extractor task panicked: {e}")))??;

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        Ok(result)
    }
}
