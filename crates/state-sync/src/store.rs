//! Authoritative state storage
//!
//! Owned by the authority's event loop; it is never shared behind a lock.

use crate::types::{State, StateData};

/// Ordered list of states. Duplicates are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateStore {
    states: Vec<State>,
}

impl StateStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self { states: Vec::new() }
    }

    /// Create a store seeded with the given states
    pub fn from_states(states: Vec<State>) -> Self {
        Self { states }
    }

    /// Append every value in order. Returns how many were appended.
    pub fn append(&mut self, data: StateData) -> usize {
        let values = data.into_vec();
        let count = values.len();
        self.states.extend(values);
        count
    }

    /// For each target, remove the first equal entry only.
    /// Returns how many entries were removed.
    pub fn remove_first(&mut self, data: StateData) -> usize {
        let mut removed = 0;
        for target in data.into_vec() {
            if let Some(index) = self.states.iter().position(|s| *s == target) {
                self.states.remove(index);
                removed += 1;
            }
        }
        removed
    }

    /// Copy of the current list, for broadcasting
    pub fn snapshot(&self) -> Vec<State> {
        self.states.clone()
    }

    pub fn states(&self) -> &[State] {
        &self.states
    }

    pub fn contains(&self, state: &str) -> bool {
        self.states.iter().any(|s| s == state)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(values: &[&str]) -> Vec<State> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_append_keeps_duplicates_and_order() {
        let mut store = StateStore::new();
        assert_eq!(store.append("a".into()), 1);
        assert_eq!(store.append(StateData::Many(list(&["b", "a"]))), 2);
        assert_eq!(store.states(), list(&["a", "b", "a"]).as_slice());
    }

    #[test]
    fn test_remove_first_match_only() {
        let mut store = StateStore::from_states(list(&["a", "b", "a"]));
        assert_eq!(store.remove_first("a".into()), 1);
        assert_eq!(store.snapshot(), list(&["b", "a"]));
    }

    #[test]
    fn test_remove_sequence_targets() {
        let mut store = StateStore::from_states(list(&["a", "b", "a", "c"]));
        let removed = store.remove_first(StateData::Many(list(&["a", "a", "z"])));
        assert_eq!(removed, 2);
        assert_eq!(store.snapshot(), list(&["b", "c"]));
    }

    #[test]
    fn test_remove_missing_is_noop() {
        let mut store = StateStore::from_states(list(&["a"]));
        assert_eq!(store.remove_first("b".into()), 0);
        assert!(store.contains("a"));
        assert_eq!(store.len(), 1);
    }
}
