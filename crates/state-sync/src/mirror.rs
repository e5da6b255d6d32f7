//! State mirror - a worker's read-only copy of the authoritative list

use crate::channel::{Upstream, WorkerEndpoint};
use crate::types::{State, StateKind, StateMessage, WorkerId};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Where a mirror is in the join protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinPhase {
    /// No channel to the authority yet
    Detached,
    /// Channel established, waiting for the first list
    Attaching,
    /// At least one list received
    Synced,
}

/// Local cache of the authoritative list.
///
/// The cache is only ever replaced wholesale by a `STATE_LIST` from the
/// authority. `add_state` and `remove_state` forward requests and return
/// immediately without touching it.
pub struct StateMirror {
    /// Last list pushed by the authority, `None` until the first one
    cache: RwLock<Option<Vec<State>>>,
    /// Join protocol phase
    phase: RwLock<JoinPhase>,
    /// Path to the authority
    upstream: RwLock<Option<Box<dyn Upstream>>>,
    /// Bumped on every list received
    updates: watch::Sender<u64>,
}

impl StateMirror {
    /// Create a detached mirror with an empty cache
    pub fn new() -> Self {
        let (updates, _) = watch::channel(0);
        Self {
            cache: RwLock::new(None),
            phase: RwLock::new(JoinPhase::Detached),
            upstream: RwLock::new(None),
            updates,
        }
    }

    /// Install the path to the authority
    pub fn attach(&self, upstream: impl Upstream + 'static) {
        *self.upstream.write() = Some(Box::new(upstream));

        let mut phase = self.phase.write();
        if *phase == JoinPhase::Detached {
            *phase = JoinPhase::Attaching;
        }
    }

    /// Attach to an in-process authority and spawn the receive loop
    pub fn spawn_attached(endpoint: WorkerEndpoint) -> (Arc<Self>, JoinHandle<()>) {
        let WorkerEndpoint {
            worker_id,
            upstream,
            downstream,
        } = endpoint;

        let mirror = Arc::new(Self::new());
        mirror.attach(upstream);
        let task = tokio::spawn(mirror.clone().run(worker_id, downstream));
        (mirror, task)
    }

    /// Current local view. Empty until the first list arrives.
    pub fn get_states(&self) -> Vec<State> {
        self.cache.read().clone().unwrap_or_default()
    }

    /// Ask the authority to append a state
    pub fn add_state(&self, value: impl Into<State>) {
        self.request(StateMessage::add(value.into()));
    }

    /// Ask the authority to remove the first matching state
    pub fn remove_state(&self, value: impl Into<State>) {
        self.request(StateMessage::remove(value.into()));
    }

    pub fn phase(&self) -> JoinPhase {
        *self.phase.read()
    }

    pub fn is_synced(&self) -> bool {
        self.phase() == JoinPhase::Synced
    }

    /// Watch the number of lists received so far
    pub fn subscribe_updates(&self) -> watch::Receiver<u64> {
        self.updates.subscribe()
    }

    /// Apply a message pushed by the authority
    pub fn on_message(&self, message: StateMessage) {
        match message.kind {
            StateKind::StateList => {
                let states = message.data.into_vec();
                tracing::debug!("Received state list with {} entries", states.len());
                *self.cache.write() = Some(states);
                *self.phase.write() = JoinPhase::Synced;
                self.updates.send_modify(|count| *count += 1);
            }
            StateKind::AddState | StateKind::RemoveState => {
                tracing::debug!("Ignoring {:?} sent to a mirror", message.kind);
            }
        }
    }

    /// Decode a raw frame and apply it
    pub fn on_frame(&self, frame: &[u8]) {
        match StateMessage::from_bytes(frame) {
            Ok(message) => self.on_message(message),
            Err(e) => tracing::debug!("Ignoring frame: {}", e),
        }
    }

    /// Apply messages from the authority until the channel closes
    pub async fn run(
        self: Arc<Self>,
        worker_id: WorkerId,
        mut downstream: mpsc::UnboundedReceiver<StateMessage>,
    ) {
        while let Some(message) = downstream.recv().await {
            self.on_message(message);
        }
        tracing::debug!("{} downstream closed", worker_id);
    }

    fn request(&self, message: StateMessage) {
        let upstream = self.upstream.read();
        match upstream.as_ref() {
            Some(upstream) => {
                if let Err(e) = upstream.send(message) {
                    tracing::warn!("State request not delivered: {}", e);
                }
            }
            None => {
                tracing::debug!("Mirror not attached, dropping {:?} request", message.kind);
            }
        }
    }
}

impl Default for StateMirror {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use parking_lot::Mutex;

    #[derive(Clone, Default)]
    struct RecordingUpstream {
        sent: Arc<Mutex<Vec<StateMessage>>>,
    }

    impl Upstream for RecordingUpstream {
        fn send(&self, message: StateMessage) -> Result<(), SyncError> {
            self.sent.lock().push(message);
            Ok(())
        }
    }

    struct ClosedUpstream;

    impl Upstream for ClosedUpstream {
        fn send(&self, _message: StateMessage) -> Result<(), SyncError> {
            Err(SyncError::ChannelUnavailable("closed".to_string()))
        }
    }

    #[test]
    fn test_empty_before_first_list() {
        let mirror = StateMirror::new();
        assert!(mirror.get_states().is_empty());
        assert_eq!(mirror.phase(), JoinPhase::Detached);
    }

    #[test]
    fn test_reads_are_idempotent() {
        let mirror = StateMirror::new();
        mirror.on_message(StateMessage::list(vec!["a".into(), "b".into()]));
        assert_eq!(mirror.get_states(), mirror.get_states());
    }

    #[test]
    fn test_requests_do_not_touch_cache() {
        let upstream = RecordingUpstream::default();
        let mirror = StateMirror::new();
        mirror.attach(upstream.clone());
        mirror.on_message(StateMessage::list(vec!["a".into()]));

        mirror.add_state("b");
        mirror.remove_state("a");

        assert_eq!(mirror.get_states(), vec!["a".to_string()]);
        assert_eq!(
            *upstream.sent.lock(),
            vec![StateMessage::add("b"), StateMessage::remove("a")]
        );
    }

    #[test]
    fn test_single_value_list_is_normalized() {
        let mirror = StateMirror::new();
        mirror.on_message(StateMessage {
            kind: StateKind::StateList,
            data: "only".into(),
        });
        assert_eq!(mirror.get_states(), vec!["only".to_string()]);
    }

    #[test]
    fn test_join_phases() {
        let mirror = StateMirror::new();
        assert_eq!(mirror.phase(), JoinPhase::Detached);

        mirror.attach(RecordingUpstream::default());
        assert_eq!(mirror.phase(), JoinPhase::Attaching);

        mirror.on_message(StateMessage::list(vec![]));
        assert_eq!(mirror.phase(), JoinPhase::Synced);

        mirror.attach(RecordingUpstream::default());
        mirror.on_message(StateMessage::list(vec!["x".into()]));
        assert!(mirror.is_synced());
    }

    #[test]
    fn test_failures_are_swallowed() {
        let mirror = StateMirror::new();
        mirror.add_state("not attached");

        mirror.attach(ClosedUpstream);
        mirror.add_state("closed");
        mirror.remove_state("closed");
        assert!(mirror.get_states().is_empty());
    }

    #[test]
    fn test_ignores_requests_and_malformed_frames() {
        let mirror = StateMirror::new();
        mirror.on_message(StateMessage::list(vec!["a".into()]));

        mirror.on_message(StateMessage::add("b"));
        mirror.on_frame(br#"{"data":["z"]}"#);
        mirror.on_frame(b"garbage");
        assert_eq!(mirror.get_states(), vec!["a".to_string()]);

        mirror.on_frame(br#"{"kind":"STATE_LIST","data":["c"]}"#);
        assert_eq!(mirror.get_states(), vec!["c".to_string()]);
    }

    #[test]
    fn test_update_counter() {
        let mirror = StateMirror::new();
        let updates = mirror.subscribe_updates();
        mirror.on_message(StateMessage::list(vec![]));
        mirror.on_message(StateMessage::list(vec![]));
        assert_eq!(*updates.borrow(), 2);
    }
}
