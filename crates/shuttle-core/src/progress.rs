//! Progress values and job results.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{ItemStatus, JobError, OperationKind, WorkItem};

/// A point-in-time view of job progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub bytes_done: u64,
    pub bytes_total: u64,
    pub items_done: usize,
    pub items_total: usize,
    /// Entry being processed, if any.
    pub current_path: Option<PathBuf>,
    /// Smoothed throughput.
    pub bytes_per_second: f64,
    /// Estimated seconds remaining, once a rate is known.
    pub eta_seconds: Option<u64>,
}

impl ProgressSnapshot {
    /// Progress as a percentage (0.0 to 100.0).
    pub fn percentage(&self) -> f64 {
        if self.bytes_total > 0 {
            (self.bytes_done as f64 / self.bytes_total as f64) * 100.0
        } else if self.items_total > 0 {
            (self.items_done as f64 / self.items_total as f64) * 100.0
        } else {
            0.0
        }
    }
}

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobOutcome {
    Completed,
    Cancelled,
    Failed(JobError),
}

impl JobOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl std::fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "Completed"),
            Self::Cancelled => write!(f, "Cancelled"),
            Self::Failed(err) => write!(f, "Failed: {err}"),
        }
    }
}

/// Final result of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub kind: OperationKind,
    pub outcome: JobOutcome,
    /// Every work item with its final status.
    pub items: Vec<WorkItem>,
    /// Bytes written (or removed) over the job.
    pub bytes_processed: u64,
    /// Every failure surfaced during the job, in order.
    pub errors: Vec<JobError>,
}

impl JobReport {
    /// Create a report from the final item list.
    pub fn new(
        kind: OperationKind,
        outcome: JobOutcome,
        items: Vec<WorkItem>,
        bytes_processed: u64,
        errors: Vec<JobError>,
    ) -> Self {
        Self {
            kind,
            outcome,
            items,
            bytes_processed,
            errors,
        }
    }

    fn count(&self, status: ItemStatus) -> usize {
        self.items.iter().filter(|i| i.status == status).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(ItemStatus::Done)
    }

    pub fn skipped(&self) -> usize {
        self.count(ItemStatus::Skipped)
    }

    pub fn failed(&self) -> usize {
        self.count(ItemStatus::Failed)
    }

    /// Find the item for a source path.
    pub fn item(&self, source: &std::path::Path) -> Option<&WorkItem> {
        self.items.iter().find(|i| i.source == source)
    }

    /// Human-readable summary of the job.
    pub fn summary(&self) -> String {
        let action = match self.kind {
            OperationKind::Copy => "Copied",
            OperationKind::Move => "Moved",
            OperationKind::Trash => "Trashed",
            OperationKind::Restore => "Restored",
            OperationKind::Delete => "Deleted",
        };

        let mut text = format!("{} {} items", action, self.succeeded());
        let skipped = self.skipped();
        if skipped > 0 {
            text.push_str(&format!(", {} skipped", skipped));
        }
        let failed = self.failed();
        if failed > 0 {
            text.push_str(&format!(", {} failed", failed));
        }
        match &self.outcome {
            JobOutcome::Completed => {}
            JobOutcome::Cancelled => text.push_str(" (cancelled)"),
            JobOutcome::Failed(err) => text.push_str(&format!(" (failed: {})", err.kind)),
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EntryType, ErrorKind};

    #[test]
    fn test_percentage_prefers_bytes() {
        let snapshot = ProgressSnapshot {
            bytes_done: 25,
            bytes_total: 100,
            items_done: 9,
            items_total: 10,
            current_path: None,
            bytes_per_second: 0.0,
            eta_seconds: None,
        };
        assert!((snapshot.percentage() - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_summary_counts() {
        let mut done = WorkItem::new("/s/a", "/d/a", EntryType::File, 1, 0);
        done.complete().unwrap();
        let mut skipped = WorkItem::new("/s/b", "/d/b", EntryType::File, 1, 0);
        skipped.skip().unwrap();

        let report = JobReport::new(
            OperationKind::Copy,
            JobOutcome::Cancelled,
            vec![done, skipped],
            1,
            vec![JobError::new(ErrorKind::ReadFailed, "/s/c", "eio")],
        );

        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.summary(), "Copied 1 items, 1 skipped (cancelled)");
    }
}
