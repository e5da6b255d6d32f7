//! State Sync - replicate transient string states from one coordinator to its workers
//!
//! Architecture:
//! - The coordinator runs a single StateAuthority that owns the authoritative list
//! - Workers hold a StateMirror and send add/remove requests upstream
//! - After every mutation, and whenever a worker attaches, the authority pushes
//!   the full list to its workers
//! - Workers in other processes connect over WebSocket (see `transport`)

pub mod authority;
pub mod channel;
pub mod error;
pub mod mirror;
pub mod store;
pub mod transport;
pub mod types;

pub use authority::{AuthorityHandle, AuthorityStats, StateAuthority};
pub use channel::{AuthorityEvent, LocalUpstream, Upstream, WorkerEndpoint, WorkerLink};
pub use error::{SyncError, SyncResult};
pub use mirror::{JoinPhase, StateMirror};
pub use store::StateStore;
pub use transport::{ConnectionRegistry, CoordinatorServer, MirrorClient};
pub use types::*;
