//! Job descriptions and lifecycle states.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{EngineError, JobOptions};

/// The kind of job being run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Copy,
    Move,
    Trash,
    Restore,
    Delete,
}

impl OperationKind {
    /// Whether the job writes into a target directory.
    pub fn needs_target(&self) -> bool {
        matches!(self, Self::Copy | Self::Move | Self::Restore)
    }

    /// Whether sources are removed once their destination is written.
    pub fn removes_source(&self) -> bool {
        matches!(self, Self::Move | Self::Restore)
    }

    /// Progress verb, e.g. "Copying".
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Copy => "Copying",
            Self::Move => "Moving",
            Self::Trash => "Trashing",
            Self::Restore => "Restoring",
            Self::Delete => "Deleting",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Copy => write!(f, "Copy"),
            Self::Move => write!(f, "Move"),
            Self::Trash => write!(f, "Trash"),
            Self::Restore => write!(f, "Restore"),
            Self::Delete => write!(f, "Delete"),
        }
    }
}

/// One job submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub kind: OperationKind,
    pub sources: Vec<PathBuf>,
    pub target: Option<PathBuf>,
    #[serde(default)]
    pub options: JobOptions,
}

impl JobSpec {
    /// Copy `sources` into `target`.
    pub fn copy(sources: Vec<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self::with_target(OperationKind::Copy, sources, target)
    }

    /// Move `sources` into `target`.
    pub fn move_to(sources: Vec<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self::with_target(OperationKind::Move, sources, target)
    }

    /// Restore trashed `sources` into `target`.
    pub fn restore(sources: Vec<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self::with_target(OperationKind::Restore, sources, target)
    }

    /// Permanently delete `sources`.
    pub fn delete(sources: Vec<PathBuf>) -> Self {
        Self {
            kind: OperationKind::Delete,
            sources,
            target: None,
            options: JobOptions::default(),
        }
    }

    /// Move `sources` to the trash bin.
    pub fn trash(sources: Vec<PathBuf>) -> Self {
        Self {
            kind: OperationKind::Trash,
            sources,
            target: None,
            options: JobOptions::default(),
        }
    }

    fn with_target(kind: OperationKind, sources: Vec<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            sources,
            target: Some(target.into()),
            options: JobOptions::default(),
        }
    }

    /// Replace the options.
    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.options = options;
        self
    }

    /// Check the submission is well-formed.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.sources.is_empty() {
            return Err(EngineError::InvalidJob {
                message: "No source paths given".to_string(),
            });
        }
        if let Some(empty) = self.sources.iter().find(|s| s.as_os_str().is_empty()) {
            return Err(EngineError::InvalidJob {
                message: format!("Empty source path: {:?}", empty),
            });
        }
        self.options
            .validate()
            .map_err(|message| EngineError::InvalidJob { message })?;
        match (self.kind.needs_target(), &self.target) {
            (true, None) => Err(EngineError::InvalidJob {
                message: format!("{} needs a target directory", self.kind),
            }),
            (false, Some(_)) => Err(EngineError::InvalidJob {
                message: format!("{} does not take a target directory", self.kind),
            }),
            _ => Ok(()),
        }
    }
}

/// Top-level job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    #[default]
    Idle,
    Enumerating,
    Transferring,
    Completed,
    Cancelled,
    Failed,
}

impl JobState {
    /// Whether the state is final.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    /// Whether the job may move from `self` to `next`.
    ///
    /// States only move forward; any live state may end in Cancelled or Failed.
    pub fn can_advance_to(&self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (Idle, Enumerating) | (Enumerating, Transferring) | (Transferring, Completed) => true,
            (Idle | Enumerating | Transferring, Cancelled | Failed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Enumerating => write!(f, "Enumerating"),
            Self::Transferring => write!(f, "Transferring"),
            Self::Completed => write!(f, "Completed"),
            Self::Cancelled => write!(f, "Cancelled"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_target_rules() {
        assert!(JobSpec::copy(vec!["/a".into()], "/b").validate().is_ok());
        assert!(JobSpec::delete(vec!["/a".into()]).validate().is_ok());
        assert!(JobSpec::copy(vec![], "/b").validate().is_err());

        let mut bad = JobSpec::delete(vec!["/a".into()]);
        bad.target = Some("/b".into());
        assert!(bad.validate().is_err());

        let mut missing = JobSpec::move_to(vec!["/a".into()], "/b");
        missing.target = None;
        assert!(missing.validate().is_err());
    }

    #[test]
    fn test_state_never_regresses() {
        assert!(JobState::Idle.can_advance_to(JobState::Enumerating));
        assert!(JobState::Transferring.can_advance_to(JobState::Cancelled));
        assert!(!JobState::Completed.can_advance_to(JobState::Transferring));
        assert!(!JobState::Cancelled.can_advance_to(JobState::Failed));
        assert!(!JobState::Transferring.can_advance_to(JobState::Enumerating));
    }
}
