//! Error types for transfer jobs.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumIter};
use thiserror::Error;

use crate::ItemStatus;

/// Closed set of failure kinds a work item can end up with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// Permission denied while opening, reading or writing.
    PermissionError,
    OpenFailed,
    ReadFailed,
    WriteFailed,
    MkdirFailed,
    DeleteFailed,
    MoveFailed,
    /// The source entry vanished.
    SourceNotFound,
    /// The file does not fit under the target's single-file ceiling.
    FileTooLarge,
    InsufficientSpace,
    /// Size or checksum mismatch after writing.
    IntegrityDamaged,
    ReadOnlyTarget,
    /// The target directory is the source or lies inside it.
    TargetInsideSource,
    /// The operation does not apply to this kind of entry.
    Unsupported,
    /// A directory could not be listed.
    NoTraversePermission,
    SeekFailed,
}

impl ErrorKind {
    /// Whether Retry may be offered for this kind.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::TargetInsideSource | Self::FileTooLarge | Self::Unsupported
        )
    }

    /// Whether this kind aborts the whole job immediately.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::TargetInsideSource)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PermissionError => write!(f, "Permission error"),
            Self::OpenFailed => write!(f, "Failed to open the file"),
            Self::ReadFailed => write!(f, "Failed to read the file"),
            Self::WriteFailed => write!(f, "Failed to write the file"),
            Self::MkdirFailed => write!(f, "Failed to create the directory"),
            Self::DeleteFailed => write!(f, "Failed to delete the file"),
            Self::MoveFailed => write!(f, "Failed to move the file"),
            Self::SourceNotFound => write!(f, "Original file does not exist"),
            Self::FileTooLarge => write!(f, "Failed, file size must be less than 4GB"),
            Self::InsufficientSpace => write!(f, "Not enough free space on the target disk"),
            Self::IntegrityDamaged => write!(f, "File integrity was damaged"),
            Self::ReadOnlyTarget => write!(f, "The target device is read only"),
            Self::TargetInsideSource => write!(f, "Target folder is inside the source folder"),
            Self::Unsupported => write!(f, "Operation not supported for this entry"),
            Self::NoTraversePermission => write!(f, "No permission to open the directory"),
            Self::SeekFailed => write!(f, "Failed to position the file pointer"),
        }
    }
}

/// A classified failure attached to one path.
///
/// `cause` keeps the underlying OS error text untouched for display.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}, cause: {cause} ({})", .path.display())]
pub struct JobError {
    /// The failure kind.
    pub kind: ErrorKind,
    /// The path the failure is attached to.
    pub path: PathBuf,
    /// Underlying cause text.
    pub cause: String,
}

impl JobError {
    /// Create a new job error.
    pub fn new(kind: ErrorKind, path: impl Into<PathBuf>, cause: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            cause: cause.into(),
        }
    }

    /// Whether Retry may be offered for this error.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Whether this error aborts the whole job.
    pub fn is_fatal(&self) -> bool {
        self.kind.is_fatal()
    }
}

/// Errors returned when submitting a job.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The job description is malformed.
    #[error("Invalid job: {message}")]
    InvalidJob { message: String },

    /// Another job is still running on this engine.
    #[error("A job is already running on this engine")]
    JobActive,

    /// Jobs are spawned onto the current Tokio runtime, and there is none.
    #[error("No Tokio runtime is running")]
    NoRuntime,
}

/// A work item was asked to make a status change it does not allow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid status change {from:?} -> {to:?} for {}", .path.display())]
pub struct TransitionError {
    pub path: PathBuf,
    pub from: ItemStatus,
    pub to: ItemStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_policy_sets() {
        let non_retryable: Vec<_> = ErrorKind::iter().filter(|k| !k.is_retryable()).collect();
        assert_eq!(
            non_retryable,
            vec![
                ErrorKind::FileTooLarge,
                ErrorKind::TargetInsideSource,
                ErrorKind::Unsupported
            ]
        );

        let fatal: Vec<_> = ErrorKind::iter().filter(|k| k.is_fatal()).collect();
        assert_eq!(fatal, vec![ErrorKind::TargetInsideSource]);
    }

    #[test]
    fn test_job_error_keeps_cause() {
        let err = JobError::new(ErrorKind::WriteFailed, "/dst/x.txt", "No space left on device");
        let text = err.to_string();
        assert!(text.contains("Failed to write the file"));
        assert!(text.contains("No space left on device"));
        assert!(text.contains("/dst/x.txt"));
    }

    #[test]
    fn test_kind_code() {
        assert_eq!(ErrorKind::IntegrityDamaged.as_ref(), "integrity_damaged");
        assert_eq!(ErrorKind::NoTraversePermission.as_ref(), "no_traverse_permission");
    }
}
