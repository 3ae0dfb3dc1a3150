//! Effect Implementation
//!
//! An Effect is the consumer side of the runtime: a side-effecting
//! computation that re-runs whenever something it read changes.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function inside a tracking frame and
//!    collects every [`ReadEvent`](super::ReadEvent) it produced.
//!
//! 2. It subscribes to each distinct dependency.
//!
//! 3. When any dependency fires, the effect drops all of its subscriptions,
//!    runs again and subscribes to the fresh set of reads. Conditional
//!    branches can therefore change what the effect depends on.
//!
//! Reads made through [`pick`](super::pick) arrive as a single derived
//! dependency, so the effect only re-runs when the picked value changes.
//!
//! # Cleanup
//!
//! Subscriptions are released on [`dispose`](Effect::dispose) and when the
//! last handle to the effect is dropped.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::context::{collect_reads, subscribe_all};
use super::emitter::{Listener, Unsubscribe};

/// Counter for generating unique effect IDs.
static EFFECT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_effect_id() -> u64 {
    EFFECT_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

struct EffectInner {
    id: u64,
    run: Box<dyn Fn() + Send + Sync>,
    subscriptions: Mutex<Vec<Unsubscribe>>,
    disposed: AtomicBool,
    run_count: AtomicUsize,
    dependency_count: AtomicUsize,
}

impl EffectInner {
    fn release(&self) {
        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        for subscription in subscriptions {
            subscription.unsubscribe();
        }
    }
}

impl Drop for EffectInner {
    fn drop(&mut self) {
        self.release();
    }
}

/// A computation that re-runs when its dependencies change.
///
/// # Example
///
/// ```rust
/// use serde_json::json;
/// use weft_core::reactive::{Effect, Store};
///
/// let store = Store::new([("count", json!(0))]);
/// let source = store.clone();
/// let effect = Effect::new(move || {
///     println!("count is {}", source.get("count"));
/// });
///
/// store.set("count", json!(5)); // prints "count is 5"
/// assert_eq!(effect.run_count(), 2);
/// ```
#[derive(Clone)]
pub struct Effect {
    inner: Arc<EffectInner>,
}

impl Effect {
    /// Create an effect and run it immediately to establish dependencies.
    pub fn new<F>(run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let effect = Self::new_lazy(run);
        effect.execute();
        effect
    }

    /// Create an effect without running it.
    pub fn new_lazy<F>(run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(EffectInner {
                id: next_effect_id(),
                run: Box::new(run),
                subscriptions: Mutex::new(Vec::new()),
                disposed: AtomicBool::new(false),
                run_count: AtomicUsize::new(0),
                dependency_count: AtomicUsize::new(0),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Run the effect now and re-subscribe to whatever it read.
    pub fn execute(&self) {
        Self::execute_inner(&self.inner);
    }

    fn execute_inner(inner: &Arc<EffectInner>) {
        if inner.disposed.load(Ordering::SeqCst) {
            return;
        }
        inner.release();

        let ((), reads) = collect_reads(|| (inner.run)());

        let weak: Weak<EffectInner> = Arc::downgrade(inner);
        let listener: Listener = Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                Effect::execute_inner(&inner);
            }
        });
        let fresh = subscribe_all(&reads, &listener);
        inner.dependency_count.store(fresh.len(), Ordering::SeqCst);

        if inner.disposed.load(Ordering::SeqCst) {
            for subscription in fresh {
                subscription.unsubscribe();
            }
        } else {
            // A nested run may have subscribed already; keep only this run's set.
            let stale = std::mem::replace(&mut *inner.subscriptions.lock(), fresh);
            for subscription in stale {
                subscription.unsubscribe();
            }
        }

        let runs = inner.run_count.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::trace!(effect = inner.id, runs, dependencies = reads.len(), "effect ran");
    }

    /// Stop the effect and release its subscriptions.
    pub fn dispose(&self) {
        self.inner.disposed.store(true, Ordering::SeqCst);
        self.inner.release();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.load(Ordering::SeqCst)
    }

    /// Distinct dependencies captured by the last run.
    pub fn dependency_count(&self) -> usize {
        self.inner.dependency_count.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.inner.id)
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{pick, Store};
    use serde_json::json;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn effect_runs_on_creation() {
        let run_count = Arc::new(AtomicI32::new(0));
        let run_count_clone = run_count.clone();

        let _effect = Effect::new(move || {
            run_count_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(run_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn effect_lazy_does_not_run_on_creation() {
        let effect = Effect::new_lazy(|| {});
        assert_eq!(effect.run_count(), 0);

        effect.execute();
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn effect_reruns_when_a_dependency_changes() {
        let store = Store::new([("count", json!(0)), ("other", json!(0))]);
        let seen = Arc::new(AtomicI32::new(-1));
        let (source, seen_clone) = (store.clone(), seen.clone());

        let effect = Effect::new(move || {
            let value = source.get("count").as_i64().unwrap_or(0) as i32;
            seen_clone.store(value, Ordering::SeqCst);
        });
        assert_eq!(effect.dependency_count(), 1);

        store.set("count", json!(42));
        assert_eq!(seen.load(Ordering::SeqCst), 42);
        assert_eq!(effect.run_count(), 2);

        store.set("other", json!(1));
        assert_eq!(effect.run_count(), 2);
    }

    #[test]
    fn duplicate_reads_subscribe_once() {
        let store = Store::new([("a", json!(1))]);
        let source = store.clone();
        let effect = Effect::new(move || {
            source.get("a");
            source.get("a");
        });
        assert_eq!(store.subscriber_count("a"), 1);

        store.set("a", json!(2));
        assert_eq!(effect.run_count(), 2);
    }

    #[test]
    fn effect_through_pick_runs_only_on_value_change() {
        let store = Store::new([("a", json!(1)), ("b", json!(2))]);
        let source = store.clone();
        let effect = Effect::new(move || {
            let inner = source.clone();
            let _sum = pick(move || {
                inner.get("a").as_i64().unwrap_or(0) + inner.get("b").as_i64().unwrap_or(0)
            })
            .unwrap();
        });
        assert_eq!(effect.run_count(), 1);

        store.set("a", json!(1));
        assert_eq!(effect.run_count(), 1);

        store.set("a", json!(2));
        assert_eq!(effect.run_count(), 2);

        store.set("b", json!(3));
        assert_eq!(effect.run_count(), 3);
        assert_eq!(store.subscriber_count("a"), 1);
        assert_eq!(store.subscriber_count("b"), 1);
    }

    #[test]
    fn effect_does_not_run_after_disposal() {
        let store = Store::new([("a", json!(1))]);
        let source = store.clone();
        let effect = Effect::new(move || {
            source.get("a");
        });

        effect.dispose();
        assert!(effect.is_disposed());
        assert_eq!(store.subscriber_count("a"), 0);

        store.set("a", json!(2));
        effect.execute();
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn dropping_the_last_handle_releases_subscriptions() {
        let store = Store::new([("a", json!(1))]);
        let source = store.clone();
        let effect = Effect::new(move || {
            source.get("a");
        });
        let clone = effect.clone();
        drop(effect);
        assert_eq!(store.subscriber_count("a"), 1);

        drop(clone);
        assert_eq!(store.subscriber_count("a"), 0);
    }

    #[test]
    fn effect_clone_shares_state() {
        let effect1 = Effect::new(|| {});
        let effect2 = effect1.clone();

        assert_eq!(effect1.id(), effect2.id());
        effect1.execute();
        assert_eq!(effect2.run_count(), 2);

        effect1.dispose();
        assert!(effect2.is_disposed());
    }
}
