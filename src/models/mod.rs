//! Data model for the pipeline: documents, batches, and the structured
//! record an LLM extraction produces for a single property sale deed.

mod batch;
mod document;
mod record;
mod stage_result;

pub use batch::{Batch, BatchStatus};
pub use document::{Document, DocumentState};
pub use record::{Party, PartyRole, Property, StructuredRecord};
pub use stage_result::StageResult;
