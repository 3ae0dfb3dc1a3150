//! Async state as stored under an action's key.

use serde::{Deserialize, Serialize};

/// Lifecycle of an async action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AsyncStatus {
    #[default]
    Idle,
    Pending,
    Success,
    Error,
}

/// Snapshot of an async action.
///
/// `generation` is the dispatch that produced this state; it only ever
/// increases for a given action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsyncState<T> {
    pub status: AsyncStatus,
    pub data: Option<T>,
    pub error: Option<String>,
    /// Milliseconds since the Unix epoch of the last settlement.
    pub timestamp: Option<u64>,
    pub generation: u64,
}

impl<T> Default for AsyncState<T> {
    fn default() -> Self {
        Self {
            status: AsyncStatus::Idle,
            data: None,
            error: None,
            timestamp: None,
            generation: 0,
        }
    }
}

impl<T> AsyncState<T> {
    pub fn is_idle(&self) -> bool {
        self.status == AsyncStatus::Idle
    }

    pub fn is_pending(&self) -> bool {
        self.status == AsyncStatus::Pending
    }

    /// Pending while still showing data from an earlier success.
    pub fn is_stale(&self) -> bool {
        self.is_pending() && self.data.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn state_serializes_with_lowercase_status() {
        let state = AsyncState {
            status: AsyncStatus::Success,
            data: Some(3),
            error: None,
            timestamp: Some(10),
            generation: 2,
        };
        assert_eq!(
            serde_json::to_value(&state).unwrap(),
            json!({"status": "success", "data": 3, "error": null, "timestamp": 10, "generation": 2})
        );
    }

    #[test]
    fn stale_means_pending_with_data() {
        let mut state = AsyncState {
            status: AsyncStatus::Pending,
            data: Some("old"),
            ..AsyncState::default()
        };
        assert!(state.is_stale());
        state.data = None;
        assert!(!state.is_stale());
        assert!(AsyncState::<u8>::default().is_idle());
    }
}
