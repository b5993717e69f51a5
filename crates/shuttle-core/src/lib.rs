//! Core types for shuttle.
//!
//! This crate holds the data model shared by the job engine and its callers:
//! job descriptions, work items, the closed error taxonomy, conflict and
//! recovery decisions, and the progress values streamed back to the caller.

mod config;
mod decision;
mod error;
mod item;
mod job;
mod progress;

pub use config::{JobOptions, JobOptionsBuilder, JobOptionsBuilderError, VerifyMode};
pub use decision::{
    ConflictChoice, ConflictDecision, ConflictInfo, DecisionProvider, ErrorAction, ErrorInfo,
    PresetDecisions,
};
pub use error::{EngineError, ErrorKind, JobError, TransitionError};
pub use item::{EntryType, ItemStatus, WorkItem};
pub use job::{JobSpec, JobState, OperationKind};
pub use progress::{JobOutcome, JobReport, ProgressSnapshot};

/// Size ceiling for a single file on FAT-class and encrypted-container targets.
pub const FAT_FILE_SIZE_LIMIT: u64 = 4 * 1024 * 1024 * 1024;
