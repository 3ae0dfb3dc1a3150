//! Snapshot Recorder
//!
//! A [`Recorder`] observes stores it is attached to (through
//! [`StoreBuilder::observer`](crate::reactive::StoreBuilder::observer)) and
//! keeps two things:
//!
//! - a capped snapshot history per store: one snapshot on creation and one
//!   after every accepted write,
//! - a capped feed of [`RecorderEvent`]s for inspectors to consume.
//!
//! [`Recorder::revert_to_snapshot`] writes a snapshot back wholesale. The
//! revert goes through the store like any other write, so it produces a new
//! snapshot whose state equals the reverted one.
//!
//! The recorder is diagnostic only. Lookups that fail are reported as
//! [`EventKind::Error`] events and never panic or return `Err`.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use serde_json::json;
//! use weft_core::reactive::Store;
//! use weft_core::recorder::Recorder;
//!
//! let recorder = Recorder::default();
//! let store = Store::builder()
//!     .value("count", json!(0))
//!     .observer(Arc::new(recorder.clone()))
//!     .build();
//!
//! let initial = recorder.history(store.id())[0].id;
//! store.set("count", json!(5));
//!
//! assert!(recorder.revert_to_snapshot(store.id(), initial));
//! assert_eq!(store.get("count"), json!(0));
//! ```

mod diff;
mod event;
mod snapshot;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};

use crate::clock::now_millis;
use crate::config::RecorderConfig;
use crate::reactive::{Emitter, StateMap, Store, StoreChange, StoreId, StoreObserver, Unsubscribe, WeakStore};

pub use diff::{diff, DiffKind, KeyDiff};
pub use event::{EventId, EventKind, RecorderEvent};
pub use snapshot::{Snapshot, SnapshotId};

use snapshot::History;

struct StoreRecord {
    store: WeakStore,
    name: String,
    history: History,
}

/// Summary of a recorded store, as listed by [`Recorder::get_stores`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreSummary {
    pub id: StoreId,
    pub name: String,
    pub version: u64,
    pub state: StateMap,
    pub snapshots: usize,
    pub latest_snapshot: Option<SnapshotId>,
}

struct RecorderInner {
    config: RecorderConfig,
    stores: DashMap<StoreId, StoreRecord>,
    events: Mutex<VecDeque<RecorderEvent>>,
    next_event: AtomicU64,
    next_snapshot: AtomicU64,
    feed: Emitter,
}

/// Records store history and an event feed.
///
/// Cloning a `Recorder` creates a new handle to the same records.
#[derive(Clone)]
pub struct Recorder {
    inner: Arc<RecorderInner>,
}

impl Default for Recorder {
    fn default() -> Self {
        Self::new(RecorderConfig::default())
    }
}

impl Recorder {
    pub fn new(config: RecorderConfig) -> Self {
        Self {
            inner: Arc::new(RecorderInner {
                config,
                stores: DashMap::new(),
                events: Mutex::new(VecDeque::new()),
                next_event: AtomicU64::new(1),
                next_snapshot: AtomicU64::new(1),
                feed: Emitter::new(),
            }),
        }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.inner.config
    }

    /// Live stores currently tracked, ordered by id.
    pub fn get_stores(&self) -> Vec<StoreSummary> {
        let tracked: Vec<(StoreId, WeakStore, String, usize, Option<SnapshotId>)> = self
            .inner
            .stores
            .iter()
            .map(|record| {
                (
                    *record.key(),
                    record.store.clone(),
                    record.name.clone(),
                    record.history.len(),
                    record.history.latest().map(|snapshot| snapshot.id),
                )
            })
            .collect();

        let mut summaries: Vec<StoreSummary> = tracked
            .into_iter()
            .filter_map(|(id, store, name, snapshots, latest_snapshot)| {
                let store = store.upgrade()?;
                Some(StoreSummary {
                    id,
                    name,
                    version: store.version(),
                    state: store.snapshot(),
                    snapshots,
                    latest_snapshot,
                })
            })
            .collect();
        summaries.sort_by_key(|summary| summary.id);
        summaries
    }

    /// The feed, oldest first.
    pub fn get_events(&self) -> Vec<RecorderEvent> {
        self.inner.events.lock().iter().cloned().collect()
    }

    pub fn clear_events(&self) {
        self.inner.events.lock().clear();
    }

    /// Snapshot history of `store`, oldest first.
    pub fn history(&self, store: StoreId) -> Vec<Snapshot> {
        self.inner
            .stores
            .get(&store)
            .map(|record| record.history.to_vec())
            .unwrap_or_default()
    }

    /// Take a snapshot of `store` outside of a write.
    pub fn capture(&self, store: &Store) -> Option<SnapshotId> {
        let snapshot = self.next_snapshot(store);
        let id = snapshot.id;
        let mut record = self.inner.stores.get_mut(&store.id())?;
        record.history.push(snapshot);
        Some(id)
    }

    /// Key-level diff between two snapshots of the same store.
    pub fn diff_snapshots(&self, store: StoreId, from: SnapshotId, to: SnapshotId) -> Option<Vec<KeyDiff>> {
        let record = self.inner.stores.get(&store)?;
        let from = record.history.get(from)?;
        let to = record.history.get(to)?;
        Some(diff(&from.state, &to.state))
    }

    /// Replace the state of `store` with the state recorded in `snapshot`.
    ///
    /// Every key of the store is notified. Returns `false`, and records an
    /// error event, if the store or snapshot is unknown.
    pub fn revert_to_snapshot(&self, store: StoreId, snapshot: SnapshotId) -> bool {
        let lookup = self.inner.stores.get(&store).map(|record| {
            (
                record.store.clone(),
                record.history.get(snapshot).map(|found| found.state.clone()),
            )
        });

        let (handle, state) = match lookup {
            Some((handle, Some(state))) => (handle, state),
            Some((_, None)) => {
                self.report_error(Some(store), "snapshot not found", json!({ "snapshot": snapshot }));
                return false;
            }
            None => {
                self.report_error(Some(store), "store not found", json!({ "snapshot": snapshot }));
                return false;
            }
        };
        let Some(live) = handle.upgrade() else {
            self.report_error(Some(store), "store was dropped", json!({ "snapshot": snapshot }));
            return false;
        };
        if live.is_disposed() {
            self.report_error(Some(store), "store is disposed", json!({ "snapshot": snapshot }));
            return false;
        }

        tracing::debug!(%store, %snapshot, "reverting store");
        live.replace_all(state);
        true
    }

    /// Listen for new feed events. Read them with [`get_events`](Self::get_events).
    pub fn subscribe<F>(&self, listener: F) -> Unsubscribe
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.feed.subscribe(listener)
    }

    fn next_snapshot(&self, store: &Store) -> Snapshot {
        Snapshot {
            id: SnapshotId(self.inner.next_snapshot.fetch_add(1, Ordering::Relaxed)),
            timestamp: now_millis(),
            state: store.snapshot(),
        }
    }

    fn record(&self, kind: EventKind, target: Option<StoreId>, data: Value, extra: Value) {
        let event = RecorderEvent {
            id: EventId(self.inner.next_event.fetch_add(1, Ordering::Relaxed)),
            timestamp: now_millis(),
            kind,
            target,
            data,
            extra,
        };
        tracing::trace!(id = %event.id, kind = ?event.kind, "recorder event");
        {
            let mut events = self.inner.events.lock();
            events.push_back(event);
            while events.len() > self.inner.config.event_limit {
                events.pop_front();
            }
        }
        self.inner.feed.emit();
    }

    fn report_error(&self, target: Option<StoreId>, message: &str, extra: Value) {
        tracing::warn!(store = ?target, "recorder error: {message}");
        self.record(EventKind::Error, target, json!({ "message": message }), extra);
    }
}

impl StoreObserver for Recorder {
    fn on_create(&self, store: &Store) {
        let snapshot = self.next_snapshot(store);
        let extra = json!({ "name": store.name(), "snapshot": snapshot.id });
        let data = state_value(&snapshot.state);

        let mut history = History::new(self.inner.config.history_limit);
        history.push(snapshot);
        self.inner.stores.insert(
            store.id(),
            StoreRecord {
                store: store.downgrade(),
                name: store.name().to_string(),
                history,
            },
        );
        self.record(EventKind::Create, Some(store.id()), data, extra);
    }

    fn on_change(&self, store: &Store, change: &StoreChange) {
        let snapshot = self.next_snapshot(store);
        let snapshot_id = snapshot.id;
        let data = match change {
            StoreChange::Set { key, value } => json!({ "key": key, "value": value }),
            StoreChange::Replaced => state_value(&snapshot.state),
        };

        match self.inner.stores.get_mut(&store.id()) {
            Some(mut record) => record.history.push(snapshot),
            None => {
                self.report_error(Some(store.id()), "change from untracked store", Value::Null);
                return;
            }
        }
        let extra = json!({
            "snapshot": snapshot_id,
            "replaced": matches!(change, StoreChange::Replaced),
        });
        self.record(EventKind::Change, Some(store.id()), data, extra);
    }

    fn on_dispatch(&self, store: &Store, action: &str, data: &Value) {
        self.record(
            EventKind::Dispatch,
            Some(store.id()),
            data.clone(),
            json!({ "action": action }),
        );
    }

    fn on_dispose(&self, store: &Store) {
        self.inner.stores.remove(&store.id());
        self.record(
            EventKind::Dispose,
            Some(store.id()),
            Value::Null,
            json!({ "name": store.name() }),
        );
    }
}

fn state_value(state: &StateMap) -> Value {
    Value::Object(state.iter().map(|(key, value)| (key.clone(), value.clone())).collect())
}
