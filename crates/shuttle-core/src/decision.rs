//! Conflict and recovery decisions, and the provider that supplies them.

use std::path::PathBuf;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::{EntryType, JobError};

/// How to resolve a destination that already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictChoice {
    /// Leave the destination alone and skip this item.
    Skip,
    /// Remove the existing entry, then write.
    Replace,
    /// Reuse an existing directory; children are checked one by one.
    Merge,
    /// Write under a fresh "copy" name next to the existing entry.
    KeepBoth,
    /// Stop the job after the current item.
    Cancel,
}

impl std::fmt::Display for ConflictChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Skip => write!(f, "Skip"),
            Self::Replace => write!(f, "Replace"),
            Self::Merge => write!(f, "Merge"),
            Self::KeepBoth => write!(f, "Keep both"),
            Self::Cancel => write!(f, "Cancel"),
        }
    }
}

/// A conflict answer, optionally applying to every remaining conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictDecision {
    pub choice: ConflictChoice,
    pub apply_to_all: bool,
}

impl ConflictDecision {
    /// A decision for this conflict only.
    pub fn once(choice: ConflictChoice) -> Self {
        Self {
            choice,
            apply_to_all: false,
        }
    }

    /// A decision replayed for every later conflict.
    pub fn for_all(choice: ConflictChoice) -> Self {
        Self {
            choice,
            apply_to_all: true,
        }
    }
}

/// How to continue after a failed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorAction {
    /// Re-attempt the item from the start.
    Retry,
    /// Give up on the item and continue.
    Skip,
    /// Stop the remaining queue.
    Cancel,
}

impl std::fmt::Display for ErrorAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Retry => write!(f, "Retry"),
            Self::Skip => write!(f, "Skip"),
            Self::Cancel => write!(f, "Cancel"),
        }
    }
}

/// Description of a conflict handed to the decision provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictInfo {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub source_entry: EntryType,
    pub destination_entry: EntryType,
    pub source_size: u64,
    pub destination_size: u64,
    pub source_modified: Option<SystemTime>,
    pub destination_modified: Option<SystemTime>,
}

impl ConflictInfo {
    /// Whether both sides are directories, so Merge is meaningful.
    pub fn can_merge(&self) -> bool {
        self.source_entry.is_dir() && self.destination_entry.is_dir()
    }

    /// Whether the existing entry was modified after the incoming one.
    pub fn destination_is_newer(&self) -> bool {
        match (self.source_modified, self.destination_modified) {
            (Some(src), Some(dst)) => dst > src,
            _ => false,
        }
    }
}

/// Description of a failure handed to the decision provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub error: JobError,
}

impl ErrorInfo {
    pub fn new(error: JobError) -> Self {
        Self { error }
    }

    /// Actions that may be offered for this failure.
    pub fn allowed_actions(&self) -> &'static [ErrorAction] {
        if self.error.is_retryable() {
            &[ErrorAction::Retry, ErrorAction::Skip, ErrorAction::Cancel]
        } else {
            &[ErrorAction::Skip, ErrorAction::Cancel]
        }
    }
}

/// Supplies conflict and recovery decisions to a running job.
///
/// Methods are called from the job's background thread and may block until
/// the caller answers.
pub trait DecisionProvider: Send + Sync {
    /// Decide what to do about an existing destination.
    fn resolve_conflict(&self, conflict: &ConflictInfo) -> ConflictDecision;

    /// Decide how to continue after a failure.
    fn recover(&self, error: &ErrorInfo) -> ErrorAction;
}

/// Answers every request with fixed values.
#[derive(Debug, Clone, Copy)]
pub struct PresetDecisions {
    pub conflict: ConflictChoice,
    pub error: ErrorAction,
}

impl PresetDecisions {
    pub fn new(conflict: ConflictChoice, error: ErrorAction) -> Self {
        Self { conflict, error }
    }
}

impl Default for PresetDecisions {
    fn default() -> Self {
        Self::new(ConflictChoice::Skip, ErrorAction::Skip)
    }
}

impl DecisionProvider for PresetDecisions {
    fn resolve_conflict(&self, _conflict: &ConflictInfo) -> ConflictDecision {
        ConflictDecision::for_all(self.conflict)
    }

    fn recover(&self, _error: &ErrorInfo) -> ErrorAction {
        self.error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    fn info(src: EntryType, dst: EntryType) -> ConflictInfo {
        ConflictInfo {
            source: PathBuf::from("/src/a"),
            destination: PathBuf::from("/dst/a"),
            source_entry: src,
            destination_entry: dst,
            source_size: 0,
            destination_size: 0,
            source_modified: None,
            destination_modified: None,
        }
    }

    #[test]
    fn test_can_merge_only_directories() {
        assert!(info(EntryType::Directory, EntryType::Directory).can_merge());
        assert!(!info(EntryType::File, EntryType::Directory).can_merge());
        assert!(!info(EntryType::File, EntryType::File).can_merge());
    }

    #[test]
    fn test_allowed_actions_follow_policy() {
        let retryable = ErrorInfo::new(JobError::new(ErrorKind::WriteFailed, "/x", "io"));
        assert!(retryable.allowed_actions().contains(&ErrorAction::Retry));

        let too_large = ErrorInfo::new(JobError::new(ErrorKind::FileTooLarge, "/x", "4GB"));
        assert_eq!(
            too_large.allowed_actions(),
            &[ErrorAction::Skip, ErrorAction::Cancel]
        );
    }

    #[test]
    fn test_preset_applies_to_all() {
        let preset = PresetDecisions::new(ConflictChoice::Replace, ErrorAction::Cancel);
        let decision = preset.resolve_conflict(&info(EntryType::File, EntryType::File));
        assert_eq!(decision, ConflictDecision::for_all(ConflictChoice::Replace));
    }
}
