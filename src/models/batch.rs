//! The batch model — a run over a set of documents admitted together.

use chrono::{DateTime, Utc};

/// Status DAG: `Pending -> Running -> {Completed | Cancelled}`. No other
/// transitions are legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    Pending,
    Running,
    Completed,
    Cancelled,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Running => "running",
            BatchStatus::Completed => "completed",
            BatchStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, next: BatchStatus) -> bool {
        use BatchStatus::*;
        matches!(
            (self, next),
            (Pending, Running) | (Running, Completed) | (Running, Cancelled)
        )
    }
}

/// A run over a set of documents admitted together.
#[derive(Debug, Clone)]
pub struct Batch {
    pub batch_id: String,
    pub batch_name: String,
    pub created_at: DateTime<Utc>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: BatchStatus,
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cancelled: u64,
}

impl Batch {
    pub fn new(batch_id: String, batch_name: String, total: u64) -> Self {
        Self {
            batch_id,
            batch_name,
            created_at: Utc::now(),
            processing_started_at: None,
            finished_at: None,
            status: BatchStatus::Pending,
            total,
            succeeded: 0,
            failed: 0,
            cancelled: 0,
        }
    }

    pub fn processed(&self) -> u64 {
        self.succeeded + self.failed + self.cancelled
    }

    pub fn is_running(&self) -> bool {
        self.status == BatchStatus::Running
            && self.processing_started_at.is_some()
            && self.finished_at.is_none()
    }
}
