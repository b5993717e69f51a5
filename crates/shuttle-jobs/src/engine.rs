//! Job submission and the handle returned to the caller.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use shuttle_core::{
    DecisionProvider, EngineError, ErrorKind, JobError, JobOutcome, JobReport, JobSpec, JobState,
    OperationKind, ProgressSnapshot,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::EVENT_CHANNEL_SIZE;
use crate::classify::{LocalVolumeProbe, VolumeProbe};
use crate::job::{JobContext, JobRunner};
use crate::transfer::{DestinationOpener, LocalOpener};
use crate::trash::{SystemTrash, TrashBin};

/// Notifications streamed from a running job.
#[derive(Debug, Clone)]
pub enum JobEvent {
    /// The job entered a new state.
    State(JobState),
    /// Throttled progress snapshot.
    Progress(ProgressSnapshot),
    /// An item failed; a recovery decision follows unless a policy answers it.
    ItemFailed(JobError),
    /// The job ended. Always the last event.
    Finished(JobReport),
}

/// Runs at most one job at a time.
pub struct Engine {
    probe: Arc<dyn VolumeProbe>,
    trash: Arc<dyn TrashBin>,
    opener: Arc<dyn DestinationOpener>,
    busy: Arc<AtomicBool>,
    next_id: AtomicU64,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// An engine backed by the local filesystem and the system trash bin.
    pub fn new() -> Self {
        Self {
            probe: Arc::new(LocalVolumeProbe),
            trash: Arc::new(SystemTrash),
            opener: Arc::new(LocalOpener),
            busy: Arc::new(AtomicBool::new(false)),
            next_id: AtomicU64::new(1),
        }
    }

    /// Use a different volume probe.
    pub fn with_probe(mut self, probe: Arc<dyn VolumeProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Use a different trash bin.
    pub fn with_trash(mut self, trash: Arc<dyn TrashBin>) -> Self {
        self.trash = trash;
        self
    }

    /// Write copied file contents through a different opener.
    pub fn with_opener(mut self, opener: Arc<dyn DestinationOpener>) -> Self {
        self.opener = opener;
        self
    }

    /// Whether a job is still running.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Start a job on a background thread.
    ///
    /// Must be called from within a Tokio runtime. Fails if the job is
    /// malformed or another job is still running.
    pub fn submit(&self, spec: JobSpec, decisions: Arc<dyn DecisionProvider>) -> Result<JobHandle, EngineError> {
        spec.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| EngineError::NoRuntime)?;

        if self.busy.swap(true, Ordering::AcqRel) {
            return Err(EngineError::JobActive);
        }
        let guard = BusyGuard(self.busy.clone());

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let kind = spec.kind;
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let (state_tx, state_rx) = watch::channel(JobState::Idle);
        let cancel = CancellationToken::new();

        let runner = JobRunner::new(JobContext {
            id,
            spec,
            decisions,
            probe: self.probe.clone(),
            trash: self.trash.clone(),
            opener: self.opener.clone(),
            cancel: cancel.clone(),
            events: tx.clone(),
            state: state_tx,
        });

        let task = runtime.spawn(async move {
            let report = match tokio::task::spawn_blocking(move || runner.run()).await {
                Ok(report) => report,
                Err(e) => {
                    tracing::error!(id, error = %e, "job thread panicked");
                    failed_report(kind, e.to_string())
                }
            };
            drop(guard);
            let _ = tx.send(JobEvent::Finished(report.clone())).await;
            report
        });

        Ok(JobHandle {
            id,
            kind,
            events: rx,
            state: state_rx,
            cancel,
            task,
        })
    }
}

/// Clears the engine's busy flag when the job ends.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn failed_report(kind: OperationKind, cause: String) -> JobReport {
    let error = JobError::new(ErrorKind::Unsupported, "", cause);
    JobReport::new(kind, JobOutcome::Failed(error.clone()), Vec::new(), 0, vec![error])
}

/// Caller's view of a submitted job.
pub struct JobHandle {
    id: u64,
    kind: OperationKind,
    events: mpsc::Receiver<JobEvent>,
    state: watch::Receiver<JobState>,
    cancel: CancellationToken,
    task: JoinHandle<JobReport>,
}

impl JobHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current job state.
    pub fn state(&self) -> JobState {
        *self.state.borrow()
    }

    /// A receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<JobState> {
        self.state.clone()
    }

    /// Ask the job to stop. The current chunk finishes first.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token for cancelling from elsewhere.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Next event, or `None` once the job has finished and all events
    /// were read.
    pub async fn next_event(&mut self) -> Option<JobEvent> {
        self.events.recv().await
    }

    /// Wait for the job to end, discarding unread events.
    pub async fn join(self) -> JobReport {
        let Self { kind, events, task, .. } = self;
        drop(events);
        match task.await {
            Ok(report) => report,
            Err(e) => failed_report(kind, e.to_string()),
        }
    }
}
