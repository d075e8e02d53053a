//! Runtime configuration as a plain value, loaded from TOML.
//!
//! Deliberately simpler than a multi-source settings cascade: one file, one
//! `Settings` struct, serde defaults for everything optional. See `DESIGN.md`
//! for why the richer config-merging approach wasn't carried over here.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::llm::LlmConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractorMode {
    Embedded,
    Ocr,
}

impl Default for ExtractorMode {
    fn default() -> Self {
        ExtractorMode::Embedded
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Root directory under which `inbox/`, `processed/`, `failed/`,
    /// `retry_fee/` are resolved.
    pub data_dir: PathBuf,
    pub db_path: PathBuf,

    #[serde(default = "default_ocr_workers")]
    pub ocr_workers: usize,
    #[serde(default = "default_llm_workers")]
    pub llm_workers: usize,
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    #[serde(default)]
    pub enable_page_parallel_ocr: bool,
    #[serde(default = "default_ocr_page_workers")]
    pub ocr_page_workers: usize,
    #[serde(default = "default_llm_timeout_secs")]
    pub llm_timeout_secs: u64,
    #[serde(default)]
    pub extractor_mode: ExtractorMode,

    #[serde(default)]
    pub llm: LlmConfig,
}

fn default_ocr_workers() -> usize {
    2
}

fn default_llm_workers() -> usize {
    2
}

/// `spec.md` §9: 2, not 1 — one item per stage-pair in flight beyond the
/// workers themselves, not a de-facto serialization point.
fn default_queue_size() -> usize {
    2
}

fn default_ocr_page_workers() -> usize {
    2
}

fn default_llm_timeout_secs() -> u64 {
    300
}

impl Settings {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading config at {}: {e}", path.display()))?;
        let settings: Settings = toml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("parsing config at {}: {e}", path.display()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            (1..=20).contains(&self.ocr_workers),
            "ocr_workers must be in 1..=20, got {}",
            self.ocr_workers
        );
        anyhow::ensure!(
            (1..=20).contains(&self.llm_workers),
            "llm_workers must be in 1..=20, got {}",
            self.llm_workers
        );
        anyhow::ensure!(
            (1..=10).contains(&self.queue_size),
            "queue_size must be in 1..=10, got {}",
            self.queue_size
        );
        anyhow::ensure!(
            (1..=8).contains(&self.ocr_page_workers),
            "ocr_page_workers must be in 1..=8, got {}",
            self.ocr_page_workers
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_queue_size_out_of_range() {
        let settings = Settings {
            data_dir: PathBuf::from("/tmp/data"),
            db_path: PathBuf::from("/tmp/data/pipeline.db"),
            ocr_workers: 2,
            llm_workers: 2,
            queue_size: 11,
            enable_page_parallel_ocr: false,
            ocr_page_workers: 2,
            llm_timeout_secs: 300,
            extractor_mode: ExtractorMode::Embedded,
            llm: LlmConfig::default(),
        };
        assert!(settings.validate().is_err());
    }
}
