//! The job runner: drives one job from enumeration to its final report.
//!
//! A runner lives on a single blocking thread. It walks the work list in
//! order, asking the decision provider whenever a conflict or failure needs
//! an answer, and streams state and progress through the event channel.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use shuttle_core::{
    ConflictChoice, ConflictInfo, DecisionProvider, EntryType, ErrorAction, ErrorKind, ItemStatus,
    JobError, JobOutcome, JobReport, JobSpec, JobState, OperationKind, TransitionError, WorkItem,
};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::classify::{PathClassifier, Placement, VolumeProbe, same_entry};
use crate::conflict::ConflictResolver;
use crate::engine::JobEvent;
use crate::enumerate::{Enumerator, Recursion, destination_for, subtree_end};
use crate::progress::ProgressTracker;
use crate::recovery::{IoStage, Recovery, classify};
use crate::transfer::{CopyOutcome, DestinationOpener, RenameError, Transferrer};
use crate::trash::TrashBin;

/// Why the work loop stopped early.
enum Stop {
    Cancelled,
    Failed(JobError),
}

impl From<TransitionError> for Stop {
    fn from(err: TransitionError) -> Self {
        Stop::Failed(status_error(err))
    }
}

fn status_error(err: TransitionError) -> JobError {
    JobError::new(ErrorKind::Unsupported, err.path.clone(), err.to_string())
}

fn not_copyable(path: &Path) -> JobError {
    JobError::new(ErrorKind::Unsupported, path, "not a regular file, directory or link")
}

/// Result of one attempt at an item.
enum Step {
    Done,
    Skipped,
    /// Left pending until its children are handled.
    Deferred,
    Cancelled,
}

/// What to do after looking at the destination.
enum Resolved {
    Clear,
    Merge,
    Skip,
    Cancel,
    /// Source and destination are one entry; nothing to move.
    SameEntry,
}

/// Everything a runner needs from the engine.
pub(crate) struct JobContext {
    pub id: u64,
    pub spec: JobSpec,
    pub decisions: Arc<dyn DecisionProvider>,
    pub probe: Arc<dyn VolumeProbe>,
    pub trash: Arc<dyn TrashBin>,
    pub opener: Arc<dyn DestinationOpener>,
    pub cancel: CancellationToken,
    pub events: mpsc::Sender<JobEvent>,
    pub state: watch::Sender<JobState>,
}

pub(crate) struct JobRunner {
    id: u64,
    spec: JobSpec,
    decisions: Arc<dyn DecisionProvider>,
    trash: Arc<dyn TrashBin>,
    cancel: CancellationToken,
    events: mpsc::Sender<JobEvent>,
    state: watch::Sender<JobState>,
    items: Vec<WorkItem>,
    errors: Vec<JobError>,
    processed: u64,
    tracker: ProgressTracker,
    classifier: PathClassifier,
    resolver: ConflictResolver,
    recovery: Recovery,
    transferrer: Transferrer,
    enumerator: Enumerator,
    /// Directories this job created, in creation order, as (source, destination).
    created_dirs: Vec<(PathBuf, PathBuf)>,
    /// Move sources to remove once everything below them has left.
    vacated_dirs: Vec<PathBuf>,
    /// Bytes that have to fit on the target.
    bytes_needed: u64,
}

impl JobRunner {
    pub(crate) fn new(ctx: JobContext) -> Self {
        let options = ctx.spec.options.clone();
        // Delete and Trash never descend through links.
        let follow = options.follow_symlinks && ctx.spec.kind.needs_target();

        Self {
            id: ctx.id,
            decisions: ctx.decisions,
            trash: ctx.trash,
            cancel: ctx.cancel,
            events: ctx.events,
            state: ctx.state,
            items: Vec::new(),
            errors: Vec::new(),
            processed: 0,
            tracker: ProgressTracker::new(0, 0, options.progress_interval()),
            classifier: PathClassifier::new(ctx.probe.clone()),
            resolver: ConflictResolver::new(&options),
            recovery: Recovery::new(options.error_policy),
            transferrer: Transferrer::new(ctx.probe, options).with_opener(ctx.opener),
            enumerator: Enumerator::new(follow),
            created_dirs: Vec::new(),
            vacated_dirs: Vec::new(),
            bytes_needed: 0,
            spec: ctx.spec,
        }
    }

    /// Run the job to completion and build its report.
    pub(crate) fn run(mut self) -> JobReport {
        let span = tracing::info_span!("job", id = self.id, kind = %self.spec.kind);
        let _enter = span.enter();
        tracing::info!(sources = self.spec.sources.len(), "job started");

        let outcome = match self.execute() {
            Ok(()) => JobOutcome::Completed,
            Err(Stop::Cancelled) => JobOutcome::Cancelled,
            Err(Stop::Failed(error)) => JobOutcome::Failed(error),
        };
        self.finish_directories();

        self.tracker.set_current(None);
        let snapshot = self.tracker.force();
        self.notify(JobEvent::Progress(snapshot));
        self.set_state(match outcome {
            JobOutcome::Completed => JobState::Completed,
            JobOutcome::Cancelled => JobState::Cancelled,
            JobOutcome::Failed(_) => JobState::Failed,
        });

        let report = JobReport::new(self.spec.kind, outcome, self.items, self.processed, self.errors);
        tracing::info!(
            outcome = %report.outcome,
            done = report.succeeded(),
            skipped = report.skipped(),
            failed = report.failed(),
            bytes = report.bytes_processed,
            "job finished"
        );
        report
    }

    fn execute(&mut self) -> Result<(), Stop> {
        self.set_state(JobState::Enumerating);
        self.check_cancel()?;
        self.prepare()?;

        self.set_state(JobState::Transferring);
        self.emit(true);
        if let Some(target) = self.spec.target.clone() {
            self.check_target(&target)?;
        }

        match self.spec.kind {
            OperationKind::Delete => self.run_delete(),
            OperationKind::Trash => self.run_trash(),
            OperationKind::Copy | OperationKind::Move | OperationKind::Restore => self.run_transfer(),
        }
    }

    /// Validate placement and build the work list.
    fn prepare(&mut self) -> Result<(), Stop> {
        let kind = self.spec.kind;
        let target = self.spec.target.clone();
        let sources = self.spec.sources.clone();

        if let Some(target) = &target {
            self.classifier
                .check_nesting(&sources, target, self.spec.options.follow_symlinks)
                .map_err(Stop::Failed)?;

            if fs::symlink_metadata(target).is_err() {
                fs::create_dir_all(target)
                    .map_err(|e| Stop::Failed(classify(IoStage::Mkdir, target, &e)))?;
                tracing::info!(target = %target.display(), "created target directory");
            }
        }

        let mut items = Vec::new();
        let mut bytes_needed = 0u64;

        for source in &sources {
            self.check_cancel()?;

            let (destination, recursion) = match &target {
                Some(target) => {
                    let Some(destination) = destination_for(source, target) else {
                        let mut item = WorkItem::new(source, target, EntryType::Directory, 0, 0);
                        item.expanded = true;
                        item.error = Some(JobError::new(
                            ErrorKind::Unsupported,
                            source,
                            "source has no file name",
                        ));
                        items.push(item);
                        continue;
                    };
                    let recursion = match kind {
                        OperationKind::Copy => Recursion::Full,
                        _ => match self.classifier.placement(source, target) {
                            Placement::SameVolume => Recursion::Lazy,
                            Placement::CrossVolume => Recursion::Full,
                        },
                    };
                    (destination, recursion)
                }
                None if kind == OperationKind::Trash => (source.clone(), Recursion::Shallow),
                None => (source.clone(), Recursion::Full),
            };

            let listed = self
                .enumerator
                .enumerate(source, destination, recursion)
                .map_err(Stop::Failed)?;
            if kind.needs_target() && recursion == Recursion::Full {
                bytes_needed += listed.iter().map(|i| i.size).sum::<u64>();
            }
            items.extend(listed);
        }

        let total_bytes = items.iter().map(|i| i.size).sum();
        tracing::info!(items = items.len(), bytes = total_bytes, "enumerated sources");

        self.tracker = ProgressTracker::new(items.len(), total_bytes, self.spec.options.progress_interval());
        self.items = items;
        self.bytes_needed = bytes_needed;
        Ok(())
    }

    /// Job-wide target checks, each answered once.
    fn check_target(&mut self, target: &Path) -> Result<(), Stop> {
        self.check_once(|runner| {
            match runner.classifier.probe().volume(target) {
                Ok(volume) if volume.read_only => Err(JobError::new(
                    ErrorKind::ReadOnlyTarget,
                    target,
                    "the target folder is read-only",
                )),
                _ => Ok(()),
            }
        })?;

        if self.bytes_needed > 0 {
            let needed = self.bytes_needed;
            self.check_once(|runner| match runner.classifier.probe().volume(target) {
                Ok(volume) => match volume.available_bytes {
                    Some(available) if available < needed => Err(JobError::new(
                        ErrorKind::InsufficientSpace,
                        target,
                        format!("{needed} bytes needed, {available} available"),
                    )),
                    _ => Ok(()),
                },
                Err(_) => Ok(()),
            })?;
        }
        Ok(())
    }

    /// Run `check` until it passes or the provider says Skip or Cancel.
    fn check_once(&mut self, check: impl Fn(&Self) -> Result<(), JobError>) -> Result<(), Stop> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let Err(error) = check(self) else {
                return Ok(());
            };
            self.report_error(&error);
            match self.recovery.ask(self.decisions.as_ref(), &error, attempt) {
                ErrorAction::Retry => continue,
                ErrorAction::Skip => return Ok(()),
                ErrorAction::Cancel => return Err(Stop::Cancelled),
            }
        }
    }

    fn run_transfer(&mut self) -> Result<(), Stop> {
        let mut index = 0;
        while index < self.items.len() {
            self.check_cancel()?;
            if self.items[index].status == ItemStatus::Pending {
                self.process(index, Self::transfer_item)?;
            }
            index += 1;
        }
        Ok(())
    }

    fn run_delete(&mut self) -> Result<(), Stop> {
        // Children before parents.
        let mut index = self.items.len();
        while index > 0 {
            index -= 1;
            self.check_cancel()?;
            if self.items[index].status != ItemStatus::Pending {
                continue;
            }
            self.process(index, Self::delete_item)?;
            if self.items[index].status == ItemStatus::Pending {
                // Children were listed late; visit them, then come back.
                index = subtree_end(&self.items, index);
            }
        }
        Ok(())
    }

    fn run_trash(&mut self) -> Result<(), Stop> {
        for index in 0..self.items.len() {
            self.check_cancel()?;
            if self.items[index].status == ItemStatus::Pending {
                self.process(index, Self::trash_item)?;
            }
        }
        Ok(())
    }

    /// Attempt one item until it settles, consulting recovery on failure.
    fn process(&mut self, index: usize, op: fn(&mut Self, usize) -> Result<Step, JobError>) -> Result<(), Stop> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mark = self.tracker.bytes_done();
            self.tracker.set_current(Some(self.items[index].source.clone()));
            self.emit(false);
            tracing::debug!(path = %self.items[index].source.display(), attempt, "processing");

            match op(self, index) {
                Ok(Step::Done) => {
                    self.complete(index)?;
                    return Ok(());
                }
                Ok(Step::Skipped) => {
                    self.skip_subtree(index)?;
                    return Ok(());
                }
                Ok(Step::Deferred) => return Ok(()),
                Ok(Step::Cancelled) => {
                    self.tracker.rewind_to(mark);
                    return Err(Stop::Cancelled);
                }
                Err(error) => {
                    self.tracker.rewind_to(mark);
                    self.items[index].fail(error.clone())?;
                    self.report_error(&error);
                    if error.is_fatal() {
                        return Err(Stop::Failed(error));
                    }

                    match self.recovery.ask(self.decisions.as_ref(), &error, attempt) {
                        ErrorAction::Retry => {
                            self.prepare_retry(index, &error);
                            self.items[index].retry()?;
                        }
                        ErrorAction::Skip => {
                            self.skip_subtree(index)?;
                            return Ok(());
                        }
                        ErrorAction::Cancel => return Err(Stop::Cancelled),
                    }
                }
            }
        }
    }

    /// Drop a directory's listing if it failed to enumerate, so the next
    /// attempt lists it again.
    fn prepare_retry(&mut self, index: usize, error: &JobError) {
        let item = &self.items[index];
        if !item.entry.is_dir() || !item.expanded || error.path != item.source {
            return;
        }
        if !matches!(
            error.kind,
            ErrorKind::NoTraversePermission
                | ErrorKind::PermissionError
                | ErrorKind::ReadFailed
                | ErrorKind::SourceNotFound
        ) {
            return;
        }

        let end = subtree_end(&self.items, index);
        if self.items[index + 1..end]
            .iter()
            .any(|c| c.status != ItemStatus::Pending)
        {
            return;
        }

        let dropped: Vec<WorkItem> = self.items.drain(index + 1..end).collect();
        let bytes = dropped.iter().map(|i| i.size).sum();
        self.tracker.shrink(dropped.len(), bytes);
        self.items[index].expanded = false;
    }

    fn transfer_item(&mut self, index: usize) -> Result<Step, JobError> {
        if let Some(error) = self.items[index].error.clone() {
            return Err(error);
        }
        if self.items[index].transferred {
            // Written and verified earlier; only the source is left.
            let source = self.items[index].source.clone();
            self.transferrer.remove_file(&source)?;
            return Ok(Step::Done);
        }

        let merge = match self.resolve_conflict(index)? {
            Resolved::Clear => false,
            Resolved::Merge => true,
            Resolved::Skip => return Ok(Step::Skipped),
            Resolved::Cancel => return Ok(Step::Cancelled),
            Resolved::SameEntry => {
                tracing::debug!(path = %self.items[index].source.display(), "already in place");
                self.settle_subtree(index).map_err(status_error)?;
                return Ok(Step::Done);
            }
        };

        match self.spec.kind {
            OperationKind::Copy => self.copy_entry(index, merge),
            _ => self.move_entry(index, merge),
        }
    }

    fn source_metadata(&self, source: &Path) -> io::Result<fs::Metadata> {
        if self.spec.options.follow_symlinks {
            fs::metadata(source)
        } else {
            fs::symlink_metadata(source)
        }
    }

    fn resolve_conflict(&mut self, index: usize) -> Result<Resolved, JobError> {
        let source = self.items[index].source.clone();
        let destination = self.items[index].destination.clone();

        let dest_meta = match fs::symlink_metadata(&destination) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Resolved::Clear),
            Err(e) => return Err(classify(IoStage::Stat, &destination, &e)),
        };
        let src_meta = self
            .source_metadata(&source)
            .map_err(|e| classify(IoStage::Stat, &source, &e))?;

        if let Some(choice) = self.items[index].resolution {
            return self.apply_choice(index, choice, &dest_meta);
        }

        if source == destination || same_entry(&src_meta, &dest_meta) {
            if self.spec.kind == OperationKind::Copy {
                tracing::debug!(path = %source.display(), "copy onto itself, keeping both");
                self.items[index].resolution = Some(ConflictChoice::KeepBoth);
                return self.apply_choice(index, ConflictChoice::KeepBoth, &dest_meta);
            }
            return Ok(Resolved::SameEntry);
        }

        let source_entry = self.items[index].entry;
        let conflict = ConflictInfo {
            source_size: if source_entry.is_file() { src_meta.len() } else { 0 },
            destination_size: if dest_meta.is_file() { dest_meta.len() } else { 0 },
            source_modified: src_meta.modified().ok(),
            destination_modified: dest_meta.modified().ok(),
            source_entry,
            destination_entry: EntryType::from_file_type(dest_meta.file_type()),
            source,
            destination,
        };
        let choice = self.resolver.resolve(self.decisions.as_ref(), &conflict);
        tracing::info!(path = %conflict.destination.display(), %choice, "destination exists");

        self.items[index].resolution = Some(choice);
        self.apply_choice(index, choice, &dest_meta)
    }

    fn apply_choice(
        &mut self,
        index: usize,
        choice: ConflictChoice,
        dest_meta: &fs::Metadata,
    ) -> Result<Resolved, JobError> {
        let destination = self.items[index].destination.clone();

        match choice {
            ConflictChoice::Skip => Ok(Resolved::Skip),
            ConflictChoice::Cancel => Ok(Resolved::Cancel),
            ConflictChoice::Merge if dest_meta.is_dir() && self.items[index].entry.is_dir() => {
                Ok(Resolved::Merge)
            }
            ConflictChoice::Merge | ConflictChoice::Replace => {
                let source = &self.items[index].source;
                if let (Ok(src), Ok(dst)) = (fs::canonicalize(source), fs::canonicalize(&destination)) {
                    if src.starts_with(&dst) {
                        return Err(JobError::new(
                            ErrorKind::DeleteFailed,
                            &destination,
                            "the existing entry contains the source",
                        ));
                    }
                }
                self.transferrer.remove_existing(&destination)?;
                Ok(Resolved::Clear)
            }
            ConflictChoice::KeepBoth => {
                let is_dir = self.items[index].entry.is_dir();
                let renamed = self
                    .resolver
                    .keep_both_path(&destination, is_dir)
                    .ok_or_else(|| {
                        JobError::new(ErrorKind::OpenFailed, &destination, "no free name left to keep both")
                    })?;
                let end = subtree_end(&self.items, index);
                for item in &mut self.items[index..end] {
                    item.rebase_destination(&destination, &renamed);
                }
                tracing::debug!(from = %destination.display(), to = %renamed.display(), "keeping both");
                Ok(Resolved::Clear)
            }
        }
    }

    fn copy_entry(&mut self, index: usize, merge: bool) -> Result<Step, JobError> {
        let source = self.items[index].source.clone();
        let destination = self.items[index].destination.clone();

        match self.items[index].entry {
            EntryType::Directory => {
                self.ensure_expanded(index)?;
                if !merge {
                    self.transferrer.create_dir(&destination)?;
                    self.created_dirs.push((source, destination));
                }
                Ok(Step::Done)
            }
            EntryType::Symlink => {
                self.transferrer.copy_symlink(&source, &destination)?;
                Ok(Step::Done)
            }
            EntryType::File => self.copy_file(index),
            EntryType::Special => Err(not_copyable(&source)),
        }
    }

    fn copy_file(&mut self, index: usize) -> Result<Step, JobError> {
        let source = self.items[index].source.clone();
        let destination = self.items[index].destination.clone();

        let tracker = &mut self.tracker;
        let events = &self.events;
        let outcome = self.transferrer.copy_file(&source, &destination, &self.cancel, &mut |bytes| {
            tracker.advance(bytes);
            if let Some(snapshot) = tracker.poll() {
                let _ = events.try_send(JobEvent::Progress(snapshot));
            }
        })?;

        match outcome {
            CopyOutcome::Copied(bytes) => {
                let listed = self.items[index].size;
                if bytes < listed {
                    self.tracker.shrink(0, listed - bytes);
                }
                self.items[index].size = bytes;
                Ok(Step::Done)
            }
            CopyOutcome::Cancelled => Ok(Step::Cancelled),
        }
    }

    fn move_entry(&mut self, index: usize, merge: bool) -> Result<Step, JobError> {
        let source = self.items[index].source.clone();
        let destination = self.items[index].destination.clone();

        if !merge {
            let parent = destination.parent().unwrap_or(&destination).to_path_buf();
            if self.classifier.placement(&source, &parent) == Placement::SameVolume {
                match self.transferrer.rename(&source, &destination) {
                    Ok(()) => {
                        self.settle_subtree(index).map_err(status_error)?;
                        return Ok(Step::Done);
                    }
                    Err(RenameError::CrossDevice) => self.classifier.invalidate(&source, &parent),
                    Err(RenameError::Failed(error)) => return Err(error),
                }
            }
        }

        match self.items[index].entry {
            EntryType::Directory => {
                self.ensure_expanded(index)?;
                if !merge {
                    self.transferrer.create_dir(&destination)?;
                    self.created_dirs.push((source.clone(), destination));
                }
                self.vacated_dirs.push(source);
                Ok(Step::Done)
            }
            EntryType::Symlink => {
                self.transferrer.copy_symlink(&source, &destination)?;
                self.items[index].transferred = true;
                self.transferrer.remove_file(&source)?;
                Ok(Step::Done)
            }
            EntryType::File => match self.copy_file(index)? {
                Step::Done => {
                    self.items[index].transferred = true;
                    self.transferrer.remove_file(&source)?;
                    Ok(Step::Done)
                }
                other => Ok(other),
            },
            EntryType::Special => Err(not_copyable(&source)),
        }
    }

    fn delete_item(&mut self, index: usize) -> Result<Step, JobError> {
        if let Some(error) = self.items[index].error.clone() {
            return Err(error);
        }
        let source = self.items[index].source.clone();

        if self.items[index].entry.is_dir() {
            self.ensure_expanded(index)?;
            let end = subtree_end(&self.items, index);
            let children = &self.items[index + 1..end];
            if children.iter().any(|c| c.status == ItemStatus::Pending) {
                return Ok(Step::Deferred);
            }
            if children.iter().any(|c| c.status != ItemStatus::Done) {
                tracing::debug!(path = %source.display(), "keeping directory with entries left inside");
                return Ok(Step::Skipped);
            }
            self.transferrer
                .remove_dir(&source)
                .map_err(|e| classify(IoStage::Delete, &source, &e))?;
        } else {
            self.transferrer.remove_file(&source)?;
            self.tracker.credit(self.items[index].size);
        }
        Ok(Step::Done)
    }

    fn trash_item(&mut self, index: usize) -> Result<Step, JobError> {
        if let Some(error) = self.items[index].error.clone() {
            return Err(error);
        }
        let source = self.items[index].source.clone();

        fs::symlink_metadata(&source).map_err(|e| classify(IoStage::Stat, &source, &e))?;
        self.trash
            .trash(&source)
            .map_err(|e| JobError::new(ErrorKind::DeleteFailed, &source, e.to_string()))?;
        self.tracker.credit(self.items[index].size);
        Ok(Step::Done)
    }

    fn ensure_expanded(&mut self, index: usize) -> Result<(), JobError> {
        if self.items[index].expanded {
            return Ok(());
        }
        let (count, bytes) = self.enumerator.expand(&mut self.items, index)?;
        self.tracker.grow(count, bytes);
        Ok(())
    }

    fn complete(&mut self, index: usize) -> Result<(), TransitionError> {
        self.items[index].complete()?;
        self.processed += self.items[index].size;
        self.tracker.finish_item();
        Ok(())
    }

    /// The item moved as a whole: credit its bytes and mark what is listed
    /// below it done.
    fn settle_subtree(&mut self, index: usize) -> Result<(), TransitionError> {
        self.tracker.credit(self.items[index].size);
        let end = subtree_end(&self.items, index);
        for j in index + 1..end {
            if self.items[j].status == ItemStatus::Pending {
                self.tracker.credit(self.items[j].size);
                self.complete(j)?;
            }
        }
        Ok(())
    }

    /// Skip the item and whatever below it has not settled.
    fn skip_subtree(&mut self, index: usize) -> Result<(), TransitionError> {
        let end = subtree_end(&self.items, index);
        for j in index..end {
            if self.items[j].status.is_terminal() {
                continue;
            }
            self.items[j].skip()?;
            self.tracker.credit(self.items[j].size);
            self.tracker.finish_item();
        }
        Ok(())
    }

    /// Apply directory metadata after the children, then remove emptied move
    /// sources, deepest first.
    fn finish_directories(&mut self) {
        for (source, destination) in std::mem::take(&mut self.created_dirs).into_iter().rev() {
            self.transferrer.finish_dir(&source, &destination);
        }

        for source in std::mem::take(&mut self.vacated_dirs).into_iter().rev() {
            match self.transferrer.remove_dir(&source) {
                Ok(()) => tracing::debug!(path = %source.display(), "removed moved directory"),
                Err(e) if e.kind() == io::ErrorKind::DirectoryNotEmpty => {
                    tracing::debug!(path = %source.display(), "kept source directory with entries left inside");
                }
                Err(e) => {
                    let error = classify(IoStage::Delete, &source, &e);
                    self.report_error(&error);
                }
            }
        }
    }

    fn check_cancel(&self) -> Result<(), Stop> {
        if self.cancel.is_cancelled() {
            tracing::info!("cancellation requested");
            return Err(Stop::Cancelled);
        }
        Ok(())
    }

    fn report_error(&mut self, error: &JobError) {
        tracing::warn!(kind = ?error.kind, path = %error.path.display(), cause = %error.cause, "item failed");
        self.errors.push(error.clone());
        self.notify(JobEvent::ItemFailed(error.clone()));
    }

    fn set_state(&mut self, next: JobState) {
        let current = *self.state.borrow();
        if !current.can_advance_to(next) {
            tracing::warn!(%current, %next, "ignoring state change");
            return;
        }
        self.state.send_replace(next);
        tracing::debug!(state = %next, "state changed");
        self.notify(JobEvent::State(next));
    }

    fn emit(&mut self, force: bool) {
        let snapshot = if force {
            Some(self.tracker.force())
        } else {
            self.tracker.poll()
        };
        if let Some(snapshot) = snapshot {
            self.notify(JobEvent::Progress(snapshot));
        }
    }

    /// Send without waiting; a full or closed channel drops the event.
    fn notify(&self, event: JobEvent) {
        if self.events.try_send(event).is_err() {
            tracing::trace!("event dropped");
        }
    }
}
