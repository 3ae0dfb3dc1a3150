//! State Container
//!
//! A [`Store`] holds a flat map of top-level keys to JSON values. It is the
//! only source of reactive reads in the runtime.
//!
//! # How Stores Work
//!
//! 1. `get` returns a copy of the value bound to a key. If a tracking frame is
//!    active, a [`ReadEvent`] bound to that key's emitter is reported to it.
//!
//! 2. `set` compares the new value with the old one. Only a value that
//!    compares unequal bumps the version, reports the change to the observer
//!    and emits the key's listeners.
//!
//! 3. Values are handed out by copy, so a nested field can only change by
//!    writing the top-level key again. Nested granularity goes through a
//!    [`Focus`](super::Focus), which does exactly that.
//!
//! # Observer
//!
//! A store may carry a [`StoreObserver`] (usually a
//! [`Recorder`](crate::recorder::Recorder)). It sees create, change, dispatch
//! and dispose events after the store's own bookkeeping is done and before
//! listeners run.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Result, RuntimeError};

use super::context::{self, ReadEvent, ReadKey};
use super::emitter::{Emitter, Listener, Unsubscribe};

/// The full state of a store, in insertion order.
pub type StateMap = IndexMap<String, Value>;

/// Unique identifier for a store instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct StoreId(u64);

impl StoreId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store#{}", self.0)
    }
}

/// What a write did, as seen by a [`StoreObserver`].
#[derive(Debug, Clone, PartialEq)]
pub enum StoreChange {
    /// One key now holds `value`.
    Set { key: String, value: Value },
    /// The whole state was replaced.
    Replaced,
}

/// Receives lifecycle and change events from stores.
pub trait StoreObserver: Send + Sync {
    fn on_create(&self, _store: &Store) {}

    fn on_change(&self, _store: &Store, _change: &StoreChange) {}

    fn on_dispatch(&self, _store: &Store, _action: &str, _data: &Value) {}

    fn on_dispose(&self, _store: &Store) {}
}

struct StoreInner {
    id: StoreId,
    name: String,
    state: Mutex<StateMap>,
    emitters: Mutex<HashMap<String, Emitter>>,
    version: AtomicU64,
    disposed: AtomicBool,
    observer: Option<Arc<dyn StoreObserver>>,
}

/// A reactive key-value state container.
///
/// Cloning a `Store` creates a new handle to the **same** state.
///
/// # Example
///
/// ```rust
/// use serde_json::json;
/// use weft_core::reactive::Store;
///
/// let store = Store::new([("count", json!(0))]);
/// let _ = store.subscribe("count", || println!("count changed"));
///
/// assert!(store.set("count", json!(1)));
/// assert_eq!(store.get("count"), json!(1));
/// ```
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

/// Non-owning handle to a [`Store`].
#[derive(Clone)]
pub struct WeakStore {
    inner: Weak<StoreInner>,
}

impl WeakStore {
    pub fn upgrade(&self) -> Option<Store> {
        self.inner.upgrade().map(|inner| Store { inner })
    }
}

impl Store {
    /// Create a store seeded with `initial`.
    pub fn new<K, I>(initial: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Self::builder().values(initial).build()
    }

    /// Create a store from a JSON object.
    pub fn from_value(initial: Value) -> Result<Self> {
        match initial {
            Value::Object(map) => Ok(Self::new(map)),
            other => Err(RuntimeError::InvalidInitialState(json_type(&other))),
        }
    }

    pub fn builder() -> StoreBuilder {
        StoreBuilder::default()
    }

    pub fn id(&self) -> StoreId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Number of accepted writes so far.
    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::SeqCst)
    }

    pub fn downgrade(&self) -> WeakStore {
        WeakStore {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Get the value bound to `key`, or `Null` if the key is absent.
    ///
    /// Inside a tracking frame this also records a dependency on `key`.
    pub fn get(&self, key: &str) -> Value {
        let value = self.get_untracked(key);
        if context::is_tracking() {
            self.report_read(key, &value);
        }
        value
    }

    /// Get the value without recording a dependency.
    pub fn get_untracked(&self, key: &str) -> Value {
        self.inner
            .state
            .lock()
            .get(key)
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Tracked read deserialized into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        Ok(serde_json::from_value(self.get(key))?)
    }

    /// Bind `value` to `key`. Returns whether anything changed.
    pub fn set(&self, key: &str, value: Value) -> bool {
        if self.is_disposed() {
            tracing::warn!(store = %self.id(), key, "write to disposed store ignored");
            return false;
        }

        let changed = {
            let mut state = self.inner.state.lock();
            let unchanged = match state.get(key) {
                Some(old) => *old == value,
                None => value.is_null(),
            };
            if !unchanged {
                state.insert(key.to_string(), value.clone());
            }
            !unchanged
        };
        if !changed {
            tracing::trace!(store = %self.id(), key, "write skipped, value unchanged");
            return false;
        }

        let version = self.inner.version.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::trace!(store = %self.id(), key, version, "value replaced");

        if let Some(observer) = &self.inner.observer {
            observer.on_change(
                self,
                &StoreChange::Set {
                    key: key.to_string(),
                    value,
                },
            );
        }
        if let Some(emitter) = self.emitter(key) {
            emitter.emit();
        }
        true
    }

    /// Serialize `value` and bind it to `key`.
    pub fn set_as<T: Serialize>(&self, key: &str, value: &T) -> Result<bool> {
        Ok(self.set(key, serde_json::to_value(value)?))
    }

    /// Replace the value of `key` with `f(current)`.
    pub fn update<F>(&self, key: &str, f: F) -> bool
    where
        F: FnOnce(&Value) -> Value,
    {
        let next = f(&self.get_untracked(key));
        self.set(key, next)
    }

    /// Listen for changes of `key`.
    pub fn subscribe<F>(&self, key: &str, listener: F) -> Unsubscribe
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.subscribe_listener(key, Arc::new(listener))
    }

    pub fn subscribe_listener(&self, key: &str, listener: Listener) -> Unsubscribe {
        if self.is_disposed() {
            return Unsubscribe::noop();
        }
        let emitter = self
            .inner
            .emitters
            .lock()
            .entry(key.to_string())
            .or_default()
            .clone();
        emitter.subscribe_listener(listener)
    }

    pub fn subscriber_count(&self, key: &str) -> usize {
        self.emitter(key).map_or(0, |emitter| emitter.listener_count())
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.state.lock().keys().cloned().collect()
    }

    /// Copy of the whole state.
    pub fn snapshot(&self) -> StateMap {
        self.inner.state.lock().clone()
    }

    /// Overwrite the entire state and notify every key's listeners.
    ///
    /// No per-key comparison is made: a wholesale replacement counts as a
    /// change of everything.
    pub fn replace_all(&self, state: StateMap) {
        if self.is_disposed() {
            tracing::warn!(store = %self.id(), "replace on disposed store ignored");
            return;
        }

        *self.inner.state.lock() = state;
        let version = self.inner.version.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(store = %self.id(), version, "state replaced");

        if let Some(observer) = &self.inner.observer {
            observer.on_change(self, &StoreChange::Replaced);
        }
        let emitters: Vec<Emitter> = self.inner.emitters.lock().values().cloned().collect();
        for emitter in emitters {
            emitter.emit();
        }
    }

    /// Report an action dispatch to the observer.
    pub fn report_dispatch(&self, action: &str, data: &Value) {
        tracing::debug!(store = %self.id(), action, "action dispatched");
        if let Some(observer) = &self.inner.observer {
            observer.on_dispatch(self, action, data);
        }
    }

    /// Tear the store down. All listeners are dropped without notification.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        let emitters = std::mem::take(&mut *self.inner.emitters.lock());
        for emitter in emitters.values() {
            emitter.clear();
        }
        tracing::debug!(store = %self.id(), name = %self.name(), "store disposed");

        if let Some(observer) = &self.inner.observer {
            observer.on_dispose(self);
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    fn emitter(&self, key: &str) -> Option<Emitter> {
        self.inner.emitters.lock().get(key).cloned()
    }

    fn report_read(&self, key: &str, value: &Value) {
        let store = self.downgrade();
        let subscribed_key = key.to_string();
        let event = ReadEvent::new(
            ReadKey::Field {
                store: self.id(),
                key: key.to_string(),
            },
            value.clone(),
            move |listener| match store.upgrade() {
                Some(store) => store.subscribe_listener(&subscribed_key, listener),
                None => Unsubscribe::noop(),
            },
        );
        context::report_read(event);
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("version", &self.version())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Builder for [`Store`].
#[derive(Default)]
pub struct StoreBuilder {
    name: Option<String>,
    initial: StateMap,
    observer: Option<Arc<dyn StoreObserver>>,
}

impl StoreBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.initial.insert(key.into(), value);
        self
    }

    pub fn values<K, I>(mut self, values: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        self.initial
            .extend(values.into_iter().map(|(key, value)| (key.into(), value)));
        self
    }

    pub fn observer(mut self, observer: Arc<dyn StoreObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn build(self) -> Store {
        let id = StoreId::new();
        let store = Store {
            inner: Arc::new(StoreInner {
                id,
                name: self.name.unwrap_or_else(|| format!("store-{}", id.raw())),
                state: Mutex::new(self.initial),
                emitters: Mutex::new(HashMap::new()),
                version: AtomicU64::new(0),
                disposed: AtomicBool::new(false),
                observer: self.observer,
            }),
        };
        tracing::debug!(store = %id, name = %store.name(), "store created");

        if let Some(observer) = &store.inner.observer {
            observer.on_create(&store);
        }
        store
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
