//! Recorder event feed entries.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::reactive::StoreId;

/// Unique identifier for a feed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EventId(pub(crate) u64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "event#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Create,
    Change,
    Dispatch,
    Dispose,
    Error,
}

/// One entry of the recorder feed.
///
/// `data` carries the payload of the event (the initial state, the written
/// value, the dispatch data, an error message). `extra` carries context such
/// as the store name or the snapshot a change produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecorderEvent {
    pub id: EventId,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub kind: EventKind,
    /// The store the event is about; `None` when it could not be resolved.
    pub target: Option<StoreId>,
    pub data: Value,
    pub extra: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn events_serialize_with_lowercase_kind() {
        let event = RecorderEvent {
            id: EventId(7),
            timestamp: 100,
            kind: EventKind::Dispatch,
            target: None,
            data: json!({"generation": 1}),
            extra: json!({"action": "load"}),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "id": 7,
                "timestamp": 100,
                "kind": "dispatch",
                "target": null,
                "data": {"generation": 1},
                "extra": {"action": "load"},
            })
        );
    }
}
