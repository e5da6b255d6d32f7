//! Core types for the state replication protocol

use crate::error::SyncError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An opaque state token. Compared by exact string equality.
pub type State = String;

/// Identifier the authority assigns to each attached worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerId(pub u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Message kinds understood by the authority and the mirrors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateKind {
    /// Worker asking the authority to append states
    AddState,
    /// Worker asking the authority to remove states (first match each)
    RemoveState,
    /// Authority pushing its full list to a worker
    StateList,
}

/// Payload of a message: a single state or a sequence of states
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateData {
    One(State),
    Many(Vec<State>),
}

impl StateData {
    /// Normalize into a sequence, preserving order
    pub fn into_vec(self) -> Vec<State> {
        match self {
            StateData::One(state) => vec![state],
            StateData::Many(states) => states,
        }
    }

    /// Number of states carried
    pub fn len(&self) -> usize {
        match self {
            StateData::One(_) => 1,
            StateData::Many(states) => states.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<State> for StateData {
    fn from(state: State) -> Self {
        StateData::One(state)
    }
}

impl From<&str> for StateData {
    fn from(state: &str) -> Self {
        StateData::One(state.to_string())
    }
}

impl From<Vec<State>> for StateData {
    fn from(states: Vec<State>) -> Self {
        StateData::Many(states)
    }
}

/// A protocol message. On the wire this is `{"kind": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMessage {
    pub kind: StateKind,
    pub data: StateData,
}

impl StateMessage {
    /// ADD request carrying one or more states
    pub fn add(data: impl Into<StateData>) -> Self {
        Self {
            kind: StateKind::AddState,
            data: data.into(),
        }
    }

    /// REMOVE request carrying one or more targets
    pub fn remove(data: impl Into<StateData>) -> Self {
        Self {
            kind: StateKind::RemoveState,
            data: data.into(),
        }
    }

    /// Full snapshot pushed by the authority
    pub fn list(states: Vec<State>) -> Self {
        Self {
            kind: StateKind::StateList,
            data: StateData::Many(states),
        }
    }

    /// Serialize for transmission
    pub fn to_json(&self) -> Result<String, SyncError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a frame received from the wire.
    ///
    /// A frame without a recognizable `kind`, or whose `data` is neither a
    /// string nor an array of strings, is reported as
    /// [`SyncError::MalformedMessage`].
    pub fn from_bytes(frame: &[u8]) -> Result<Self, SyncError> {
        let value: serde_json::Value = serde_json::from_slice(frame)
            .map_err(|e| SyncError::MalformedMessage(format!("invalid json: {}", e)))?;

        let kind_value = value
            .get("kind")
            .ok_or_else(|| SyncError::MalformedMessage("missing kind".to_string()))?;
        let kind = StateKind::deserialize(kind_value).map_err(|_| {
            SyncError::MalformedMessage(format!("unrecognized kind {}", kind_value))
        })?;

        let data_value = value
            .get("data")
            .ok_or_else(|| SyncError::MalformedMessage("missing data".to_string()))?;
        let data = StateData::deserialize(data_value)
            .map_err(|e| SyncError::MalformedMessage(format!("invalid data: {}", e)))?;

        Ok(Self { kind, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format() {
        let json = StateMessage::add("t1").to_json().unwrap();
        assert_eq!(json, r#"{"kind":"ADD_STATE","data":"t1"}"#);

        let json = StateMessage::list(vec!["a".into(), "b".into()]).to_json().unwrap();
        assert_eq!(json, r#"{"kind":"STATE_LIST","data":["a","b"]}"#);
    }

    #[test]
    fn test_decode_single_and_sequence() {
        let msg = StateMessage::from_bytes(br#"{"kind":"REMOVE_STATE","data":"x"}"#).unwrap();
        assert_eq!(msg, StateMessage::remove("x"));

        let msg = StateMessage::from_bytes(br#"{"kind":"ADD_STATE","data":["x","y"]}"#).unwrap();
        assert_eq!(msg.kind, StateKind::AddState);
        assert_eq!(msg.data.into_vec(), vec!["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn test_decode_rejects_missing_or_unknown_kind() {
        let err = StateMessage::from_bytes(br#"{"data":"x"}"#).unwrap_err();
        assert!(matches!(err, SyncError::MalformedMessage(_)));

        let err = StateMessage::from_bytes(br#"{"kind":"PURGE","data":"x"}"#).unwrap_err();
        assert!(matches!(err, SyncError::MalformedMessage(_)));

        let err = StateMessage::from_bytes(b"not json").unwrap_err();
        assert!(matches!(err, SyncError::MalformedMessage(_)));
    }

    #[test]
    fn test_decode_rejects_bad_data() {
        let err = StateMessage::from_bytes(br#"{"kind":"ADD_STATE","data":[1,2]}"#).unwrap_err();
        assert!(matches!(err, SyncError::MalformedMessage(_)));

        let err = StateMessage::from_bytes(br#"{"kind":"ADD_STATE"}"#).unwrap_err();
        assert!(matches!(err, SyncError::MalformedMessage(_)));
    }

    #[test]
    fn test_state_data_normalization() {
        assert_eq!(StateData::from("a").into_vec(), vec!["a".to_string()]);
        assert_eq!(StateData::Many(vec![]).len(), 0);
        assert!(StateData::Many(vec![]).is_empty());
    }
}
