//! Bulk file job engine for shuttle.
//!
//! This crate runs copy, move, trash, restore and delete jobs over lists of
//! files and directories. A job enumerates its sources, resolves conflicts
//! and failures through a [`shuttle_core::DecisionProvider`], and streams
//! state and progress back over a channel.

mod classify;
mod conflict;
mod decision;
mod engine;
mod enumerate;
mod job;
mod progress;
mod recovery;
mod transfer;
mod trash;

pub use classify::{LocalVolumeProbe, PathClassifier, Placement, VolumeInfo, VolumeProbe};
pub use conflict::{ConflictResolver, keep_both_path};
pub use decision::{ChannelDecisions, DecisionRequest};
pub use engine::{Engine, JobEvent, JobHandle};
pub use enumerate::{Enumerator, Recursion};
pub use progress::ProgressTracker;
pub use recovery::{IoStage, Recovery, classify};
pub use transfer::{CopyOutcome, DestinationOpener, LocalOpener, RenameError, Transferrer};
pub use trash::{SystemTrash, TrashBin};

/// Default channel buffer size for job events.
pub const EVENT_CHANNEL_SIZE: usize = 100;
