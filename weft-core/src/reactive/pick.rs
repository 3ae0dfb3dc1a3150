//! Derived Value Tracker
//!
//! [`pick`] runs a computation inside its own tracking frame and hands the
//! enclosing frame a single virtual dependency instead of the raw reads. That
//! dependency only fires when the computed value actually changes.
//!
//! # How Picks Work
//!
//! 1. The computation runs in an isolated frame that keeps its reads private.
//!
//! 2. No reads means no reactivity: the value is returned untracked.
//!
//! 3. Otherwise one [`ReadEvent`] keyed `pick#<id>` is reported to the parent.
//!    Subscribing to it subscribes to every captured dependency.
//!
//! 4. When a dependency fires, the old subscriptions are dropped, the
//!    computation re-runs (it may read different keys this time), the fresh
//!    dependencies are subscribed, and the parent listener is called only if
//!    the equality function says the value differs.
//!
//! 5. If the re-run panics, the subscriptions stay dropped, the parent
//!    listener is still called so it can re-evaluate, and the panic resumes.
//!
//! Each call gets its own id. Two call sites with identical dependencies can
//! still compute different values from captured state, so they are never
//! merged.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::error::{Result, RuntimeError};

use super::context::{self, collect_reads, subscribe_all, ReadEvent, ReadKey};
use super::emitter::{Listener, Unsubscribe};

type Compute<T> = Arc<dyn Fn() -> T + Send + Sync>;
type Equality<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

/// Counter for generating unique pick IDs.
static PICK_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_pick_id() -> u64 {
    PICK_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

fn default_equality<T: PartialEq>() -> Equality<T> {
    Arc::new(|a: &T, b: &T| a == b)
}

/// Track `compute` as a derived value compared with `PartialEq`.
///
/// Must be called inside a tracking frame.
///
/// # Example
///
/// ```rust
/// use serde_json::json;
/// use weft_core::reactive::{collect_reads, pick, Store};
///
/// let store = Store::new([("a", json!(1)), ("b", json!(2))]);
/// let source = store.clone();
/// let (sum, reads) = collect_reads(|| {
///     pick(move || source.get("a").as_i64().unwrap_or(0) + source.get("b").as_i64().unwrap_or(0))
/// });
/// assert_eq!(sum.unwrap(), 3);
/// assert_eq!(reads.len(), 1);
/// ```
pub fn pick<T, F>(compute: F) -> Result<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    pick_shared(Arc::new(compute), default_equality())
}

/// Track `compute` as a derived value compared with `equals`.
pub fn pick_with<T, F, E>(compute: F, equals: E) -> Result<T>
where
    T: Clone + Send + Sync + 'static,
    F: Fn() -> T + Send + Sync + 'static,
    E: Fn(&T, &T) -> bool + Send + Sync + 'static,
{
    pick_shared(Arc::new(compute), Arc::new(equals))
}

/// Turn `compute` into a function that picks on every call.
pub fn wrap<T, F>(compute: F) -> impl Fn() -> Result<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    let compute: Compute<T> = Arc::new(compute);
    move || pick_shared(Arc::clone(&compute), default_equality())
}

/// Like [`wrap`] with a custom equality.
pub fn wrap_with<T, F, E>(compute: F, equals: E) -> impl Fn() -> Result<T>
where
    T: Clone + Send + Sync + 'static,
    F: Fn() -> T + Send + Sync + 'static,
    E: Fn(&T, &T) -> bool + Send + Sync + 'static,
{
    let compute: Compute<T> = Arc::new(compute);
    let equals: Equality<T> = Arc::new(equals);
    move || pick_shared(Arc::clone(&compute), Arc::clone(&equals))
}

/// Turn a one-argument selector into a function that picks on every call.
pub fn wrap_arg<A, T, F>(compute: F) -> impl Fn(A) -> Result<T>
where
    A: Send + Sync + 'static,
    T: Clone + PartialEq + Send + Sync + 'static,
    F: Fn(&A) -> T + Send + Sync + 'static,
{
    let compute = Arc::new(compute);
    move |arg: A| {
        let compute = Arc::clone(&compute);
        pick_shared(Arc::new(move || compute(&arg)), default_equality())
    }
}

fn pick_shared<T>(compute: Compute<T>, equals: Equality<T>) -> Result<T>
where
    T: Clone + Send + Sync + 'static,
{
    context::require_frame("pick")?;

    let (value, reads) = collect_reads(|| compute());
    if reads.is_empty() {
        return Ok(value);
    }

    let entry = Arc::new(DerivedEntry {
        id: next_pick_id(),
        compute,
        equals,
    });
    let id = entry.id;
    let initial = value.clone();
    tracing::trace!(pick = id, dependencies = reads.len(), "derived value tracked");

    context::report_read(ReadEvent::new(
        ReadKey::Derived { id },
        value.clone(),
        move |listener| DerivedSubscription::start(&entry, initial.clone(), &reads, listener),
    ));
    Ok(value)
}

struct DerivedEntry<T> {
    id: u64,
    compute: Compute<T>,
    equals: Equality<T>,
}

struct SubscriptionState<T> {
    current: T,
    dependencies: Vec<Unsubscribe>,
    active: bool,
}

/// One parent listener attached to a derived value.
struct DerivedSubscription<T> {
    entry: Arc<DerivedEntry<T>>,
    listener: Listener,
    state: Mutex<SubscriptionState<T>>,
}

impl<T> DerivedSubscription<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn start(
        entry: &Arc<DerivedEntry<T>>,
        current: T,
        reads: &[ReadEvent],
        listener: Listener,
    ) -> Unsubscribe {
        let subscription = Arc::new(Self {
            entry: Arc::clone(entry),
            listener,
            state: Mutex::new(SubscriptionState {
                current,
                dependencies: Vec::new(),
                active: true,
            }),
        });
        let dependencies = subscription.attach(reads);
        subscription.state.lock().dependencies = dependencies;

        Unsubscribe::new(move || subscription.stop())
    }

    fn attach(self: &Arc<Self>, reads: &[ReadEvent]) -> Vec<Unsubscribe> {
        let this = Arc::clone(self);
        let on_change: Listener = Arc::new(move || this.on_dependency_change());
        subscribe_all(reads, &on_change)
    }

    fn stop(&self) {
        let dependencies = {
            let mut state = self.state.lock();
            state.active = false;
            std::mem::take(&mut state.dependencies)
        };
        for dependency in dependencies {
            dependency.unsubscribe();
        }
    }

    fn on_dependency_change(self: &Arc<Self>) {
        let stale = {
            let mut state = self.state.lock();
            if !state.active {
                return;
            }
            std::mem::take(&mut state.dependencies)
        };
        for dependency in stale {
            dependency.unsubscribe();
        }

        let compute = Arc::clone(&self.entry.compute);
        let (next, reads) = match panic::catch_unwind(AssertUnwindSafe(|| collect_reads(|| compute()))) {
            Ok(outcome) => outcome,
            Err(payload) => {
                tracing::warn!(pick = self.entry.id, "derived computation panicked");
                (self.listener)();
                panic::resume_unwind(payload);
            }
        };

        let fresh = self.attach(&reads);
        let mut state = self.state.lock();
        if !state.active {
            drop(state);
            for dependency in fresh {
                dependency.unsubscribe();
            }
            return;
        }
        state.dependencies = fresh;
        let changed = !(self.entry.equals)(&state.current, &next);
        if changed {
            state.current = next;
        }
        drop(state);

        if changed {
            tracing::trace!(pick = self.entry.id, "derived value changed");
            (self.listener)();
        }
    }
}

/// A set of named selectors sharing one output type.
///
/// Each [`get`](PickMap::get) is a separate pick with its own identity.
pub struct PickMap<T> {
    selectors: IndexMap<String, Compute<T>>,
    equals: Equality<T>,
}

impl<T> PickMap<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::with_equality(|a: &T, b: &T| a == b)
    }
}

impl<T> Default for PickMap<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PickMap<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn with_equality<E>(equals: E) -> Self
    where
        E: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        Self {
            selectors: IndexMap::new(),
            equals: Arc::new(equals),
        }
    }

    /// Add a named selector.
    pub fn with<F>(mut self, name: impl Into<String>, compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.selectors.insert(name.into(), Arc::new(compute));
        self
    }

    /// Pick the selector registered as `name`.
    pub fn get(&self, name: &str) -> Result<T> {
        let compute = self
            .selectors
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownSelector(name.to_string()))?;
        pick_shared(compute, Arc::clone(&self.equals))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.selectors.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.selectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selectors.is_empty()
    }
}

impl<T> Clone for PickMap<T> {
    fn clone(&self) -> Self {
        Self {
            selectors: self.selectors.clone(),
            equals: Arc::clone(&self.equals),
        }
    }
}
