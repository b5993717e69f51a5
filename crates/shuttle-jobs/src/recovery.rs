//! Error classification and recovery decisions.

use std::io;
use std::path::Path;

use shuttle_core::{DecisionProvider, ErrorAction, ErrorInfo, ErrorKind, JobError};

/// Preset Retry answers stop after this many attempts on one item.
pub const MAX_PRESET_RETRIES: u32 = 3;

/// The step that was running when an I/O call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStage {
    /// Opening a source for reading.
    Open,
    /// Creating a destination for writing.
    Create,
    Read,
    Write,
    Seek,
    Mkdir,
    Delete,
    Rename,
    /// Listing a directory.
    Traverse,
    /// Reading metadata.
    Stat,
    Symlink,
}

impl IoStage {
    /// Stages that touch the source side, where NotFound means it vanished.
    fn reads_source(self) -> bool {
        matches!(
            self,
            Self::Open | Self::Read | Self::Seek | Self::Traverse | Self::Stat
        )
    }

    fn failure_kind(self) -> ErrorKind {
        match self {
            Self::Open | Self::Create => ErrorKind::OpenFailed,
            Self::Read | Self::Stat => ErrorKind::ReadFailed,
            Self::Write | Self::Symlink => ErrorKind::WriteFailed,
            Self::Seek => ErrorKind::SeekFailed,
            Self::Mkdir => ErrorKind::MkdirFailed,
            Self::Delete => ErrorKind::DeleteFailed,
            Self::Rename => ErrorKind::MoveFailed,
            Self::Traverse => ErrorKind::NoTraversePermission,
        }
    }
}

/// Map a raw I/O failure onto the closed error taxonomy.
///
/// The OS error text is kept verbatim as the cause.
pub fn classify(stage: IoStage, path: &Path, err: &io::Error) -> JobError {
    let kind = match err.kind() {
        io::ErrorKind::PermissionDenied if stage == IoStage::Traverse => {
            ErrorKind::NoTraversePermission
        }
        io::ErrorKind::PermissionDenied => ErrorKind::PermissionError,
        io::ErrorKind::NotFound if stage.reads_source() => ErrorKind::SourceNotFound,
        io::ErrorKind::ReadOnlyFilesystem => ErrorKind::ReadOnlyTarget,
        io::ErrorKind::StorageFull => ErrorKind::InsufficientSpace,
        io::ErrorKind::FileTooLarge => ErrorKind::FileTooLarge,
        io::ErrorKind::Unsupported => ErrorKind::Unsupported,
        _ => stage.failure_kind(),
    };
    JobError::new(kind, path, err.to_string())
}

/// Asks for an [`ErrorAction`], honouring the preset policy and the
/// non-retryable kinds.
pub struct Recovery {
    policy: Option<ErrorAction>,
}

impl Recovery {
    pub fn new(policy: Option<ErrorAction>) -> Self {
        Self { policy }
    }

    /// Decide how to continue after `error` on the given attempt (1-based).
    pub fn ask(&self, provider: &dyn DecisionProvider, error: &JobError, attempt: u32) -> ErrorAction {
        let action = match self.policy {
            Some(ErrorAction::Retry) if attempt > MAX_PRESET_RETRIES => {
                tracing::warn!(path = %error.path.display(), attempt, "retry limit reached, skipping");
                ErrorAction::Skip
            }
            Some(action) => action,
            None => provider.recover(&ErrorInfo::new(error.clone())),
        };

        if action == ErrorAction::Retry && !error.is_retryable() {
            tracing::debug!(kind = ?error.kind, "retry not offered for this kind, skipping");
            return ErrorAction::Skip;
        }
        action
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shuttle_core::{ConflictDecision, ConflictInfo, PresetDecisions};

    fn io_err(kind: io::ErrorKind) -> io::Error {
        io::Error::new(kind, "simulated")
    }

    #[test]
    fn test_permission_mapping() {
        let path = Path::new("/x");
        assert_eq!(
            classify(IoStage::Write, path, &io_err(io::ErrorKind::PermissionDenied)).kind,
            ErrorKind::PermissionError
        );
        assert_eq!(
            classify(IoStage::Traverse, path, &io_err(io::ErrorKind::PermissionDenied)).kind,
            ErrorKind::NoTraversePermission
        );
    }

    #[test]
    fn test_not_found_depends_on_side() {
        let path = Path::new("/x");
        assert_eq!(
            classify(IoStage::Open, path, &io_err(io::ErrorKind::NotFound)).kind,
            ErrorKind::SourceNotFound
        );
        assert_eq!(
            classify(IoStage::Create, path, &io_err(io::ErrorKind::NotFound)).kind,
            ErrorKind::OpenFailed
        );
    }

    #[test]
    fn test_stage_fallbacks() {
        let path = Path::new("/x");
        let other = || io_err(io::ErrorKind::Other);
        assert_eq!(classify(IoStage::Read, path, &other()).kind, ErrorKind::ReadFailed);
        assert_eq!(classify(IoStage::Write, path, &other()).kind, ErrorKind::WriteFailed);
        assert_eq!(classify(IoStage::Seek, path, &other()).kind, ErrorKind::SeekFailed);
        assert_eq!(classify(IoStage::Mkdir, path, &other()).kind, ErrorKind::MkdirFailed);
        assert_eq!(classify(IoStage::Delete, path, &other()).kind, ErrorKind::DeleteFailed);
        assert_eq!(classify(IoStage::Rename, path, &other()).kind, ErrorKind::MoveFailed);
    }

    #[test]
    fn test_filesystem_conditions() {
        let path = Path::new("/x");
        assert_eq!(
            classify(IoStage::Write, path, &io_err(io::ErrorKind::StorageFull)).kind,
            ErrorKind::InsufficientSpace
        );
        assert_eq!(
            classify(IoStage::Create, path, &io_err(io::ErrorKind::ReadOnlyFilesystem)).kind,
            ErrorKind::ReadOnlyTarget
        );
    }

    #[test]
    fn test_cause_text_preserved() {
        let err = classify(
            IoStage::Write,
            Path::new("/dst/a"),
            &io::Error::other("device went away"),
        );
        assert_eq!(err.cause, "device went away");
    }

    struct AlwaysRetry;

    impl DecisionProvider for AlwaysRetry {
        fn resolve_conflict(&self, _conflict: &ConflictInfo) -> ConflictDecision {
            ConflictDecision::once(shuttle_core::ConflictChoice::Skip)
        }

        fn recover(&self, _error: &ErrorInfo) -> ErrorAction {
            ErrorAction::Retry
        }
    }

    #[test]
    fn test_retry_downgraded_for_non_retryable() {
        let recovery = Recovery::new(None);
        let too_large = JobError::new(ErrorKind::FileTooLarge, "/x", "limit");
        assert_eq!(recovery.ask(&AlwaysRetry, &too_large, 1), ErrorAction::Skip);

        let write = JobError::new(ErrorKind::WriteFailed, "/x", "eio");
        assert_eq!(recovery.ask(&AlwaysRetry, &write, 1), ErrorAction::Retry);
    }

    #[test]
    fn test_preset_retry_is_bounded() {
        let recovery = Recovery::new(Some(ErrorAction::Retry));
        let provider = PresetDecisions::default();
        let err = JobError::new(ErrorKind::ReadFailed, "/x", "eio");

        assert_eq!(recovery.ask(&provider, &err, 1), ErrorAction::Retry);
        assert_eq!(
            recovery.ask(&provider, &err, MAX_PRESET_RETRIES + 1),
            ErrorAction::Skip
        );
    }
}
