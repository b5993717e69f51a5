//! Decision provider that forwards requests over a channel.
//!
//! The job thread blocks on each request until the receiving side answers
//! through the enclosed one-shot sender.

use shuttle_core::{
    ConflictChoice, ConflictDecision, ConflictInfo, DecisionProvider, ErrorAction, ErrorInfo,
};
use tokio::sync::{mpsc, oneshot};

/// Buffered decision requests; a job asks one question at a time.
pub const DECISION_CHANNEL_SIZE: usize = 1;

/// A question from a running job.
#[derive(Debug)]
pub enum DecisionRequest {
    Conflict {
        conflict: ConflictInfo,
        reply: oneshot::Sender<ConflictDecision>,
    },
    Error {
        error: ErrorInfo,
        reply: oneshot::Sender<ErrorAction>,
    },
}

/// Sends each decision to a [`DecisionRequest`] receiver.
///
/// If the receiver is gone or a reply is dropped, the answer is Cancel.
#[derive(Debug, Clone)]
pub struct ChannelDecisions {
    tx: mpsc::Sender<DecisionRequest>,
}

impl ChannelDecisions {
    pub fn new() -> (Self, mpsc::Receiver<DecisionRequest>) {
        let (tx, rx) = mpsc::channel(DECISION_CHANNEL_SIZE);
        (Self { tx }, rx)
    }
}

impl DecisionProvider for ChannelDecisions {
    fn resolve_conflict(&self, conflict: &ConflictInfo) -> ConflictDecision {
        let (reply, answer) = oneshot::channel();
        let request = DecisionRequest::Conflict {
            conflict: conflict.clone(),
            reply,
        };
        if self.tx.blocking_send(request).is_err() {
            tracing::warn!("decision receiver closed, cancelling");
            return ConflictDecision::once(ConflictChoice::Cancel);
        }
        answer
            .blocking_recv()
            .unwrap_or(ConflictDecision::once(ConflictChoice::Cancel))
    }

    fn recover(&self, error: &ErrorInfo) -> ErrorAction {
        let (reply, answer) = oneshot::channel();
        let request = DecisionRequest::Error {
            error: error.clone(),
            reply,
        };
        if self.tx.blocking_send(request).is_err() {
            tracing::warn!("decision receiver closed, cancelling");
            return ErrorAction::Cancel;
        }
        answer.blocking_recv().unwrap_or(ErrorAction::Cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shuttle_core::{ErrorKind, JobError};

    #[test]
    fn test_answer_is_forwarded() {
        let (decisions, mut rx) = ChannelDecisions::new();

        let responder = std::thread::spawn(move || {
            if let Some(DecisionRequest::Error { error, reply }) = rx.blocking_recv() {
                assert_eq!(error.error.kind, ErrorKind::ReadFailed);
                reply.send(ErrorAction::Retry).unwrap();
            }
        });

        let info = ErrorInfo::new(JobError::new(ErrorKind::ReadFailed, "/x", "eio"));
        assert_eq!(decisions.recover(&info), ErrorAction::Retry);
        responder.join().unwrap();
    }

    #[test]
    fn test_closed_receiver_cancels() {
        let (decisions, rx) = ChannelDecisions::new();
        drop(rx);

        let info = ErrorInfo::new(JobError::new(ErrorKind::ReadFailed, "/x", "eio"));
        assert_eq!(decisions.recover(&info), ErrorAction::Cancel);
    }

    #[test]
    fn test_dropped_reply_cancels() {
        let (decisions, mut rx) = ChannelDecisions::new();

        let responder = std::thread::spawn(move || {
            let request = rx.blocking_recv();
            drop(request);
        });

        let info = ConflictInfo {
            source: "/s/a".into(),
            destination: "/d/a".into(),
            source_entry: shuttle_core::EntryType::File,
            destination_entry: shuttle_core::EntryType::File,
            source_size: 1,
            destination_size: 1,
            source_modified: None,
            destination_modified: None,
        };
        assert_eq!(
            decisions.resolve_conflict(&info).choice,
            ConflictChoice::Cancel
        );
        responder.join().unwrap();
    }
}
