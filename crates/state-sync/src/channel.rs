//! Channels between the authority and its workers
//!
//! Each worker gets one outbound link (authority -> worker) and one upstream
//! (worker -> authority). Both are unbounded so a send never blocks the
//! caller or the authority loop.

use crate::error::SyncError;
use crate::types::{StateMessage, WorkerId};
use tokio::sync::mpsc;

/// Events consumed, one at a time, by the authority loop
#[derive(Debug)]
pub enum AuthorityEvent {
    /// A worker channel became available
    Attach { link: WorkerLink },
    /// A worker channel went away
    Detach { worker_id: WorkerId },
    /// A decoded message from a worker
    Message {
        worker_id: WorkerId,
        message: StateMessage,
    },
    /// A raw frame from a worker, decoded by the authority
    Frame { worker_id: WorkerId, frame: Vec<u8> },
}

/// Authority-side handle for pushing messages to one worker
#[derive(Debug, Clone)]
pub struct WorkerLink {
    worker_id: WorkerId,
    tx: mpsc::UnboundedSender<StateMessage>,
}

impl WorkerLink {
    pub fn new(worker_id: WorkerId, tx: mpsc::UnboundedSender<StateMessage>) -> Self {
        Self { worker_id, tx }
    }

    /// Create a link together with the receiving end handed to the worker
    pub fn channel(worker_id: WorkerId) -> (Self, mpsc::UnboundedReceiver<StateMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(worker_id, tx), rx)
    }

    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    /// Push a message to the worker
    pub fn send(&self, message: StateMessage) -> Result<(), SyncError> {
        self.tx
            .send(message)
            .map_err(|_| SyncError::UnreachableTarget(self.worker_id))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Worker-side path to the authority
pub trait Upstream: Send + Sync {
    /// Send a request to the authority without waiting for it to be applied
    fn send(&self, message: StateMessage) -> Result<(), SyncError>;
}

/// Upstream for a worker living in the same process as the authority
#[derive(Debug, Clone)]
pub struct LocalUpstream {
    worker_id: WorkerId,
    events: mpsc::UnboundedSender<AuthorityEvent>,
}

impl LocalUpstream {
    pub fn new(worker_id: WorkerId, events: mpsc::UnboundedSender<AuthorityEvent>) -> Self {
        Self { worker_id, events }
    }
}

impl Upstream for LocalUpstream {
    fn send(&self, message: StateMessage) -> Result<(), SyncError> {
        self.events
            .send(AuthorityEvent::Message {
                worker_id: self.worker_id,
                message,
            })
            .map_err(|_| SyncError::ChannelUnavailable(format!("{} upstream closed", self.worker_id)))
    }
}

/// Everything a freshly attached in-process worker needs
#[derive(Debug)]
pub struct WorkerEndpoint {
    pub worker_id: WorkerId,
    pub upstream: LocalUpstream,
    pub downstream: mpsc::UnboundedReceiver<StateMessage>,
}
