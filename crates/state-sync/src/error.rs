//! State sync errors

use crate::types::WorkerId;
use thiserror::Error;

/// Errors raised inside the replication protocol.
///
/// None of these reach application code calling `add_state` or
/// `remove_state`; the authority and mirrors log them and keep running.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Channel unavailable: {0}")]
    ChannelUnavailable(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Worker {0} is unreachable")]
    UnreachableTarget(WorkerId),

    #[error("State authority has stopped")]
    AuthorityStopped,

    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(String),
}

pub type SyncResult<T> = Result<T, SyncError>;
