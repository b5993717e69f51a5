//! Work items: one filesystem entry scheduled for processing.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{ConflictChoice, JobError, TransitionError};

/// Type of filesystem entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    File,
    Directory,
    Symlink,
    /// FIFO, socket or device node. Never opened for reading.
    Special,
}

impl EntryType {
    /// Classify a file type as seen by `symlink_metadata` or `metadata`.
    pub fn from_file_type(file_type: std::fs::FileType) -> Self {
        if file_type.is_symlink() {
            Self::Symlink
        } else if file_type.is_dir() {
            Self::Directory
        } else if file_type.is_file() {
            Self::File
        } else {
            Self::Special
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Self::Directory)
    }

    pub fn is_file(&self) -> bool {
        matches!(self, Self::File)
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self, Self::Symlink)
    }
}

/// Processing status of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Skipped,
    Done,
    Failed,
}

impl ItemStatus {
    /// Whether a change from `self` to `next` is allowed.
    ///
    /// Done and Skipped are terminal. Failed may go back to Pending for a
    /// retry, or on to Skipped.
    pub fn can_transition(self, next: ItemStatus) -> bool {
        use ItemStatus::*;
        matches!(
            (self, next),
            (Pending, Done)
                | (Pending, Skipped)
                | (Pending, Failed)
                | (Failed, Pending)
                | (Failed, Skipped)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Skipped)
    }
}

/// One filesystem entry to process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    /// Where the entry lives now.
    pub source: PathBuf,
    /// Where the entry is written. Equal to `source` for Delete and Trash.
    pub destination: PathBuf,
    /// Entry type.
    pub entry: EntryType,
    /// Byte size (files only).
    pub size: u64,
    /// Nesting below the top-level source (0 for the source itself).
    pub depth: usize,
    /// Processing status.
    pub status: ItemStatus,
    /// Failure found during enumeration, or by the last attempt.
    pub error: Option<JobError>,
    /// For directories: whether the children are already listed.
    pub expanded: bool,
    /// Conflict answer already applied to this item.
    #[serde(skip)]
    pub resolution: Option<ConflictChoice>,
    /// The destination has been written and verified.
    #[serde(skip)]
    pub transferred: bool,
}

impl WorkItem {
    /// Create a pending work item.
    pub fn new(
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        entry: EntryType,
        size: u64,
        depth: usize,
    ) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            size: if entry.is_file() { size } else { 0 },
            entry,
            depth,
            status: ItemStatus::Pending,
            error: None,
            expanded: !entry.is_dir(),
            resolution: None,
            transferred: false,
        }
    }

    /// Point the destination somewhere else, keeping the relative part below
    /// `old_base` when the item lives inside a renamed directory.
    pub fn rebase_destination(&mut self, old_base: &Path, new_base: &Path) {
        if let Ok(rest) = self.destination.strip_prefix(old_base) {
            self.destination = if rest.as_os_str().is_empty() {
                new_base.to_path_buf()
            } else {
                new_base.join(rest)
            };
        }
    }

    fn transition(&mut self, next: ItemStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition(next) {
            return Err(TransitionError {
                path: self.source.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Pending → Done.
    pub fn complete(&mut self) -> Result<(), TransitionError> {
        self.transition(ItemStatus::Done)?;
        self.error = None;
        Ok(())
    }

    /// Pending or Failed → Skipped.
    pub fn skip(&mut self) -> Result<(), TransitionError> {
        self.transition(ItemStatus::Skipped)
    }

    /// Pending → Failed, recording the cause.
    pub fn fail(&mut self, error: JobError) -> Result<(), TransitionError> {
        self.transition(ItemStatus::Failed)?;
        self.error = Some(error);
        Ok(())
    }

    /// Failed → Pending, before a fresh attempt.
    pub fn retry(&mut self) -> Result<(), TransitionError> {
        self.transition(ItemStatus::Pending)?;
        self.error = None;
        Ok(())
    }
}
