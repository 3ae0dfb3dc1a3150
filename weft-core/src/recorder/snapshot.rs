//! Snapshots and the per-store history ring.

use std::collections::VecDeque;
use std::fmt;

use serde::Serialize;

use crate::reactive::StateMap;

/// Unique identifier for a snapshot, scoped to one recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SnapshotId(pub(crate) u64);

impl SnapshotId {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "snapshot#{}", self.0)
    }
}

/// A full copy of a store's state at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub id: SnapshotId,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub state: StateMap,
}

/// Capped, ordered snapshot history. The oldest snapshot is evicted first.
#[derive(Debug, Clone)]
pub(crate) struct History {
    limit: usize,
    snapshots: VecDeque<Snapshot>,
}

impl History {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            limit,
            snapshots: VecDeque::with_capacity(limit.min(64)),
        }
    }

    pub(crate) fn push(&mut self, snapshot: Snapshot) {
        if self.limit == 0 {
            return;
        }
        while self.snapshots.len() >= self.limit {
            self.snapshots.pop_front();
        }
        self.snapshots.push_back(snapshot);
    }

    pub(crate) fn get(&self, id: SnapshotId) -> Option<&Snapshot> {
        self.snapshots.iter().find(|snapshot| snapshot.id == id)
    }

    pub(crate) fn latest(&self) -> Option<&Snapshot> {
        self.snapshots.back()
    }

    pub(crate) fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub(crate) fn to_vec(&self) -> Vec<Snapshot> {
        self.snapshots.iter().cloned().collect()
    }
}
