//! Two-stage concurrent pipeline that OCRs scanned property sale deeds and
//! uses a remote LLM to extract structured records.
//!
//! See [`engine::PipelineEngine`] for the scheduler, [`batch::BatchCoordinator`]
//! for batch lifecycle, and [`file_store::FileStore`]/[`repository::Repository`]
//! for the two storage seams the pipeline depends on.

pub mod batch;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod file_store;
pub mod llm;
pub mod models;
pub mod repository;
pub mod validator;
