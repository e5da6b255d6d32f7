//! State authority - owns the authoritative list and broadcasts it to workers

use crate::channel::{AuthorityEvent, LocalUpstream, WorkerEndpoint, WorkerLink};
use crate::error::SyncError;
use crate::store::StateStore;
use crate::types::{State, StateKind, StateMessage, WorkerId};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Stats about the authority
#[derive(Debug, Clone, Default, Serialize)]
pub struct AuthorityStats {
    pub attached_workers: usize,
    pub state_count: usize,
    pub mutations_applied: u64,
    pub broadcasts_sent: u64,
    pub delivery_failures: u64,
    pub malformed_messages: u64,
}

/// Authority that applies mutation requests and keeps workers in sync.
///
/// All handlers take `&mut self`; when driven by [`StateAuthority::run`]
/// every attach, detach and message is handled one at a time in the order
/// it was received.
pub struct StateAuthority {
    /// The single authoritative list
    store: StateStore,
    /// Attached workers
    workers: HashMap<WorkerId, WorkerLink>,
    /// Stats, shared with handles
    stats: Arc<RwLock<AuthorityStats>>,
}

impl StateAuthority {
    /// Create an authority with an empty list
    pub fn new() -> Self {
        Self::with_store(StateStore::new())
    }

    /// Create an authority around an existing store
    pub fn with_store(store: StateStore) -> Self {
        Self {
            store,
            workers: HashMap::new(),
            stats: Arc::new(RwLock::new(AuthorityStats::default())),
        }
    }

    /// Current authoritative list
    pub fn states(&self) -> &[State] {
        self.store.states()
    }

    pub fn attached_workers(&self) -> usize {
        self.workers.len()
    }

    pub fn stats(&self) -> AuthorityStats {
        self.stats.read().clone()
    }

    /// Register a worker and send it the current list
    pub fn on_attach(&mut self, link: WorkerLink) {
        let worker_id = link.worker_id();
        let snapshot = StateMessage::list(self.store.snapshot());

        match link.send(snapshot) {
            Ok(()) => {
                self.workers.insert(worker_id, link);
                tracing::info!(
                    "{} attached, sent {} states",
                    worker_id,
                    self.store.len()
                );
            }
            Err(e) => {
                self.stats.write().delivery_failures += 1;
                tracing::warn!("Initial sync to {} failed: {}", worker_id, e);
            }
        }
        self.refresh_stats();
    }

    /// Forget a worker
    pub fn on_detach(&mut self, worker_id: WorkerId) {
        if self.workers.remove(&worker_id).is_some() {
            tracing::info!("{} detached", worker_id);
        }
        self.refresh_stats();
    }

    /// Apply a message from a worker
    pub fn on_message(&mut self, worker_id: WorkerId, message: StateMessage) {
        match message.kind {
            StateKind::AddState => {
                let added = self.store.append(message.data);
                self.stats.write().mutations_applied += 1;
                tracing::debug!("{} added {} states", worker_id, added);
                self.broadcast();
            }
            StateKind::RemoveState => {
                let requested = message.data.len();
                let removed = self.store.remove_first(message.data);
                self.stats.write().mutations_applied += 1;
                tracing::debug!(
                    "{} removed {} of {} requested states",
                    worker_id,
                    removed,
                    requested
                );
                self.broadcast();
            }
            StateKind::StateList => {
                tracing::debug!("Ignoring STATE_LIST from {}", worker_id);
            }
        }
    }

    /// Decode a raw frame from a worker and apply it
    pub fn on_frame(&mut self, worker_id: WorkerId, frame: &[u8]) {
        match StateMessage::from_bytes(frame) {
            Ok(message) => self.on_message(worker_id, message),
            Err(e) => {
                self.stats.write().malformed_messages += 1;
                tracing::warn!("Dropping frame from {}: {}", worker_id, e);
            }
        }
    }

    /// Dispatch one event from the queue
    pub fn handle_event(&mut self, event: AuthorityEvent) {
        match event {
            AuthorityEvent::Attach { link } => self.on_attach(link),
            AuthorityEvent::Detach { worker_id } => self.on_detach(worker_id),
            AuthorityEvent::Message { worker_id, message } => self.on_message(worker_id, message),
            AuthorityEvent::Frame { worker_id, frame } => self.on_frame(worker_id, &frame),
        }
    }

    /// Send the full list to every attached worker.
    ///
    /// A failed send only affects that worker: it is logged and dropped from
    /// the attached set, the remaining workers still receive the list.
    fn broadcast(&mut self) {
        let message = StateMessage::list(self.store.snapshot());
        let mut unreachable = Vec::new();
        let mut delivered = 0usize;

        for (worker_id, link) in &self.workers {
            match link.send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!("Broadcast to {} failed: {}", worker_id, e);
                    unreachable.push(*worker_id);
                }
            }
        }

        for worker_id in &unreachable {
            self.workers.remove(worker_id);
        }

        {
            let mut stats = self.stats.write();
            stats.broadcasts_sent += 1;
            stats.delivery_failures += unreachable.len() as u64;
        }
        self.refresh_stats();

        tracing::debug!(
            "Broadcast {} states to {} workers",
            self.store.len(),
            delivered
        );
    }

    fn refresh_stats(&self) {
        let mut stats = self.stats.write();
        stats.attached_workers = self.workers.len();
        stats.state_count = self.store.len();
    }

    /// Process events until every handle has been dropped
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<AuthorityEvent>) {
        tracing::info!("State authority running");
        while let Some(event) = events.recv().await {
            self.handle_event(event);
        }
        tracing::info!("State authority stopped");
    }

    /// Spawn the event loop, returning a handle for attaching workers
    pub fn spawn(self) -> (AuthorityHandle, JoinHandle<()>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let handle = AuthorityHandle {
            events: events_tx,
            next_worker_id: Arc::new(AtomicU64::new(1)),
            stats: self.stats.clone(),
        };
        let task = tokio::spawn(self.run(events_rx));
        (handle, task)
    }
}

impl Default for StateAuthority {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable handle to a running authority
#[derive(Clone)]
pub struct AuthorityHandle {
    events: mpsc::UnboundedSender<AuthorityEvent>,
    next_worker_id: Arc<AtomicU64>,
    stats: Arc<RwLock<AuthorityStats>>,
}

impl AuthorityHandle {
    /// Allocate an id for a new worker
    pub fn next_worker_id(&self) -> WorkerId {
        WorkerId(self.next_worker_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Attach an in-process worker
    pub fn attach(&self) -> Result<WorkerEndpoint, SyncError> {
        let worker_id = self.next_worker_id();
        let (link, downstream) = WorkerLink::channel(worker_id);
        self.attach_link(link)?;

        Ok(WorkerEndpoint {
            worker_id,
            upstream: LocalUpstream::new(worker_id, self.events.clone()),
            downstream,
        })
    }

    /// Attach a worker whose link was built elsewhere (e.g. a socket)
    pub fn attach_link(&self, link: WorkerLink) -> Result<(), SyncError> {
        self.send_event(AuthorityEvent::Attach { link })
    }

    pub fn detach(&self, worker_id: WorkerId) -> Result<(), SyncError> {
        self.send_event(AuthorityEvent::Detach { worker_id })
    }

    /// Queue an undecoded frame from a worker
    pub fn submit_frame(&self, worker_id: WorkerId, frame: Vec<u8>) -> Result<(), SyncError> {
        self.send_event(AuthorityEvent::Frame { worker_id, frame })
    }

    pub fn stats(&self) -> AuthorityStats {
        self.stats.read().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }

    fn send_event(&self, event: AuthorityEvent) -> Result<(), SyncError> {
        self.events
            .send(event)
            .map_err(|_| SyncError::AuthorityStopped)
    }
}
