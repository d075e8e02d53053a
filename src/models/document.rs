//! The document model — a single PDF moving through the two-stage pipeline.

use std::path::PathBuf;

use crate::error::ErrorKind;

use super::record::StructuredRecord;

/// Where a document sits in the pipeline DAG.
///
/// Transitions only ever move forward along:
/// `Pending -> Stage1Running -> Queued -> Stage2Running -> {Succeeded | Failed | Cancelled}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentState {
    Pending,
    Stage1Running,
    Queued,
    Stage2Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl DocumentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentState::Pending => "pending",
            DocumentState::Stage1Running => "stage1_running",
            DocumentState::Queued => "queued",
            DocumentState::Stage2Running => "stage2_running",
            DocumentState::Succeeded => "succeeded",
            DocumentState::Failed => "failed",
            DocumentState::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "stage1_running" => Some(Self::Stage1Running),
            "queued" => Some(Self::Queued),
            "stage2_running" => Some(Self::Stage2Running),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Whether the edge `self -> next` exists in the document state DAG.
    /// A `false` result means the caller has hit a programming error.
    pub fn can_transition_to(&self, next: DocumentState) -> bool {
        use DocumentState::*;
        matches!(
            (self, next),
            (Pending, Stage1Running)
                | (Stage1Running, Queued)
                | (Stage1Running, Failed)
                | (Stage1Running, Cancelled)
                | (Queued, Stage2Running)
                | (Stage2Running, Succeeded)
                | (Stage2Running, Failed)
                | (Stage2Running, Cancelled)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DocumentState::Succeeded | DocumentState::Failed | DocumentState::Cancelled
        )
    }
}

/// A unit of work: one source PDF, tracked from admission through a
/// terminal state.
#[derive(Debug, Clone)]
pub struct Document {
    pub document_id: String,
    pub batch_id: String,
    pub source_path: PathBuf,
    pub state: DocumentState,
    /// Increments only on an explicit retry admission, never on in-run recovery.
    pub attempt: u32,
    pub error: Option<(ErrorKind, String)>,
    pub extracted: Option<StructuredRecord>,
}

impl Document {
    pub fn new(document_id: String, batch_id: String, source_path: PathBuf) -> Self {
        Self::with_attempt(document_id, batch_id, source_path, 1)
    }

    pub fn with_attempt(document_id: String, batch_id: String, source_path: PathBuf, attempt: u32) -> Self {
        Self {
            document_id,
            batch_id,
            source_path,
            state: DocumentState::Pending,
            attempt,
            error: None,
            extracted: None,
        }
    }

    /// Move to `next`, enforcing the DAG. Returns the illegal-transition
    /// error pair (from, to) on violation so callers can build an
    /// `EngineError::IllegalDocumentTransition`.
    pub fn transition(&mut self, next: DocumentState) -> Result<(), (&'static str, &'static str)> {
        if !self.state.can_transition_to(next) {
            return Err((self.state.as_str(), next.as_str()));
        }
        self.state = next;
        Ok(())
    }

    pub fn mark_failed(&mut self, kind: ErrorKind, diagnostic: impl Into<String>) {
        self.error = Some((kind, diagnostic.into()));
    }
}
