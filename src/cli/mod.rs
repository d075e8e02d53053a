//! Thin CLI over `PipelineEngine`/`BatchCoordinator` — admit a batch, start
//! a run, watch live stats, stop, or retry a failed batch.

mod progress;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::config::Settings;
use crate::engine::{EngineConfig, PipelineEngine};
use crate::extractor::{EmbeddedTextExtractor, OcrTextExtractor, TextExtractor};
use crate::file_store::FileStore;
use crate::llm::HttpStructuredExtractor;
use crate::repository::SqliteRepository;

#[derive(Parser)]
#[command(name = "deed-pipeline", about = "OCR + LLM extraction pipeline for scanned property sale deeds")]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "deed-pipeline.toml", global = true)]
    pub config: PathBuf,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Admit files into a new batch and immediately start a run over it.
    Run {
        /// Source PDF paths to admit.
        paths: Vec<PathBuf>,
    },
    /// Print a single stats snapshot and exit.
    Status,
    /// Poll and render stats until the run completes (or Ctrl-C).
    Watch,
    /// Request cooperative cancellation of the active run.
    Stop,
    /// Re-admit a batch's failed documents under a new batch id.
    Retry {
        batch_id: String,
    },
    /// Switch the Stage-1 extractor implementation (rejected while running).
    ToggleOcr {
        #[arg(value_enum)]
        mode: ToggleMode,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
pub enum ToggleMode {
    Embedded,
    Ocr,
}

pub fn is_verbose() -> bool {
    std::env::args().any(|a| a == "-v" || a == "--verbose")
}

/// Build the engine from `Settings` and run the requested subcommand.
/// A single-process CLI keeps the engine in-process; a longer-lived daemon
/// would instead hold this across invocations (out of scope, `spec.md` §1).
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = Settings::load(&cli.config)?;

    let file_store = Arc::new(FileStore::new(&settings.data_dir)?);
    let repository = Arc::new(SqliteRepository::new(&settings.db_path)?);
    let structured_extractor = Arc::new(HttpStructuredExtractor::new(
        settings.llm.clone(),
        Duration::from_secs(settings.llm_timeout_secs),
    ));
    let initial_extractor: Arc<dyn TextExtractor> = match settings.extractor_mode {
        crate::config::ExtractorMode::Embedded => Arc::new(EmbeddedTextExtractor::new()),
        crate::config::ExtractorMode::Ocr => Arc::new(OcrTextExtractor::new(
            settings.enable_page_parallel_ocr,
            settings.ocr_page_workers,
        )),
    };

    let engine = Arc::new(PipelineEngine::new(
        repository,
        file_store,
        structured_extractor,
        initial_extractor,
    ));

    match cli.command {
        Commands::Run { paths } => {
            engine.batch_coordinator().new_batch(&paths).await?;
            let config = EngineConfig {
                ocr_workers: settings.ocr_workers,
                llm_workers: settings.llm_workers,
                queue_size: settings.queue_size,
                enable_page_parallel_ocr: settings.enable_page_parallel_ocr,
                ocr_page_workers: settings.ocr_page_workers,
                llm_timeout: Duration::from_secs(settings.llm_timeout_secs),
                extractor_mode: settings.extractor_mode,
            };
            engine.start(config).await?;
            println!("run started");
            progress::watch(&engine).await;
        }
        Commands::Status => {
            progress::print_once(&engine.stats());
        }
        Commands::Watch => {
            progress::watch(&engine).await;
        }
        Commands::Stop => {
            let stopped = engine.stop().await;
            println!("stopped {stopped} document(s) not yet succeeded");
        }
        Commands::Retry { batch_id } => {
            let new_batch_id = engine.batch_coordinator().retry_batch(&batch_id).await?;
            println!("retry batch created: {new_batch_id}");
        }
        Commands::ToggleOcr { mode } => {
            engine.toggle_embedded_ocr(matches!(mode, ToggleMode::Embedded))?;
            println!("extractor switched");
        }
    }

    Ok(())
}
