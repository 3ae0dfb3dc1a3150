//! Key-level state diff.

use serde::Serialize;
use serde_json::Value;

use crate::reactive::StateMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffKind {
    Added,
    Removed,
    Changed,
    Unchanged,
}

/// How one top-level key differs between two states.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyDiff {
    pub key: String,
    pub kind: DiffKind,
    pub before: Option<Value>,
    pub after: Option<Value>,
}

/// Classify every key of `before` and `after`.
///
/// Keys of `before` come first in their order, followed by keys only present
/// in `after`. Values are compared structurally.
pub fn diff(before: &StateMap, after: &StateMap) -> Vec<KeyDiff> {
    let mut entries: Vec<KeyDiff> = before
        .iter()
        .map(|(key, old)| {
            let (kind, new) = match after.get(key) {
                None => (DiffKind::Removed, None),
                Some(new) if new == old => (DiffKind::Unchanged, Some(new.clone())),
                Some(new) => (DiffKind::Changed, Some(new.clone())),
            };
            KeyDiff {
                key: key.clone(),
                kind,
                before: Some(old.clone()),
                after: new,
            }
        })
        .collect();

    entries.extend(
        after
            .iter()
            .filter(|(key, _)| !before.contains_key(*key))
            .map(|(key, new)| KeyDiff {
                key: key.clone(),
                kind: DiffKind::Added,
                before: None,
                after: Some(new.clone()),
            }),
    );
    entries
}
