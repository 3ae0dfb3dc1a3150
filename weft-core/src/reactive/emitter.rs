//! Listener registry and notification primitive.
//!
//! Every other piece of the runtime notifies through an [`Emitter`]: the
//! store keeps one per key, derived values subscribe to them, and the
//! recorder exposes one for its event feed.
//!
//! # Re-entrancy
//!
//! `emit` copies the listener list before invoking anything and holds no lock
//! while listeners run. A listener may therefore subscribe or unsubscribe
//! (itself or others) on the same emitter. Listeners added during an emission
//! are not called in that pass; listeners removed during an emission still run
//! if they were part of the copied list.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use smallvec::SmallVec;

/// A notification callback.
pub type Listener = Arc<dyn Fn() + Send + Sync>;

/// Unique identifier for a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Generate a new unique listener ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by every `subscribe` call.
///
/// Calling [`unsubscribe`](Unsubscribe::unsubscribe) removes the listener.
/// Dropping the handle without calling it leaves the listener registered.
pub struct Unsubscribe {
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Unsubscribe {
    pub fn new<F>(release: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// A handle that releases nothing.
    pub fn noop() -> Self {
        Self { release: None }
    }

    /// Remove the listener this handle was created for.
    pub fn unsubscribe(mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("armed", &self.release.is_some())
            .finish()
    }
}

/// Subscribe/emit primitive with snapshot semantics.
///
/// Cloning an `Emitter` creates a new handle to the **same** listener set.
#[derive(Clone, Default)]
pub struct Emitter {
    listeners: Arc<Mutex<IndexMap<ListenerId, Listener>>>,
}

impl Emitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a closure. Listeners run in insertion order.
    pub fn subscribe<F>(&self, listener: F) -> Unsubscribe
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.subscribe_listener(Arc::new(listener))
    }

    /// Register an already shared listener.
    pub fn subscribe_listener(&self, listener: Listener) -> Unsubscribe {
        let id = ListenerId::new();
        self.listeners.lock().insert(id, listener);

        let listeners = Arc::downgrade(&self.listeners);
        Unsubscribe::new(move || {
            if let Some(listeners) = listeners.upgrade() {
                listeners.lock().shift_remove(&id);
            }
        })
    }

    /// Invoke every listener registered when the call starts.
    ///
    /// A panicking listener propagates to the caller; later listeners in the
    /// same pass are skipped.
    pub fn emit(&self) {
        let snapshot: SmallVec<[Listener; 4]> =
            self.listeners.lock().values().cloned().collect();
        for listener in &snapshot {
            listener();
        }
    }

    /// Emit to the current listeners and drop all of them.
    ///
    /// The listener set is taken and cleared in one step before anything is
    /// invoked, so the registry is empty even if a listener panics. Listeners
    /// subscribed during the pass belong to the next one and are kept.
    pub fn emit_and_clear(&self) {
        let snapshot: SmallVec<[Listener; 4]> = {
            let mut listeners = self.listeners.lock();
            let taken = listeners.values().cloned().collect();
            listeners.clear();
            taken
        };
        for listener in &snapshot {
            listener();
        }
    }

    /// Drop every listener without notifying.
    pub fn clear(&self) {
        self.listeners.lock().clear();
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

impl fmt::Debug for Emitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("listener_count", &self.listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    fn counter() -> (Arc<AtomicI32>, impl Fn() + Send + Sync + 'static) {
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();
        (count, move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn listener_ids_are_unique() {
        let id1 = ListenerId::new();
        let id2 = ListenerId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn emit_calls_every_listener() {
        let emitter = Emitter::new();
        let (a, listener_a) = counter();
        let (b, listener_b) = counter();
        let _ = emitter.subscribe(listener_a);
        let _ = emitter.subscribe(listener_b);

        emitter.emit();
        emitter.emit();

        assert_eq!(a.load(Ordering::SeqCst), 2);
        assert_eq!(b.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unsubscribed_before_emit_is_never_called() {
        let emitter = Emitter::new();
        let (count, listener) = counter();
        emitter.subscribe(listener).unsubscribe();

        emitter.emit();
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(emitter.listener_count(), 0);
    }

    #[test]
    fn listeners_run_in_insertion_order() {
        let emitter = Emitter::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            let _ = emitter.subscribe(move || order.lock().push(i));
        }

        emitter.emit();
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn listener_added_during_emit_waits_for_next_pass() {
        let emitter = Emitter::new();
        let (late, late_listener) = counter();
        let late_listener: Listener = Arc::new(late_listener);

        let emitter_clone = emitter.clone();
        let _ = emitter.subscribe(move || {
            let _ = emitter_clone.subscribe_listener(late_listener.clone());
        });

        emitter.emit();
        assert_eq!(late.load(Ordering::SeqCst), 0);

        emitter.emit();
        assert_eq!(late.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listener_removed_during_emit_still_completes_the_pass() {
        let emitter = Emitter::new();
        let (second, second_listener) = counter();

        let handle = Arc::new(Mutex::new(None::<Unsubscribe>));
        let handle_clone = handle.clone();
        let _ = emitter.subscribe(move || {
            if let Some(unsubscribe) = handle_clone.lock().take() {
                unsubscribe.unsubscribe();
            }
        });
        *handle.lock() = Some(emitter.subscribe(second_listener));

        emitter.emit();
        assert_eq!(second.load(Ordering::SeqCst), 1);

        emitter.emit();
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn emit_and_clear_notifies_once() {
        let emitter = Emitter::new();
        let (count, listener) = counter();
        let _ = emitter.subscribe(listener);

        emitter.emit_and_clear();
        emitter.emit();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(emitter.listener_count(), 0);
    }

    #[test]
    fn listener_resubscribed_during_emit_and_clear_survives() {
        let emitter = Emitter::new();
        let (count, listener) = counter();
        let listener: Listener = Arc::new(listener);

        let emitter_clone = emitter.clone();
        let once = listener.clone();
        let _ = emitter.subscribe(move || {
            once();
            let _ = emitter_clone.subscribe_listener(once.clone());
        });

        emitter.emit_and_clear();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(emitter.listener_count(), 1);

        emitter.emit();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn panicking_listener_reaches_the_caller() {
        let emitter = Emitter::new();
        let (first, first_listener) = counter();
        let (last, last_listener) = counter();
        let _ = emitter.subscribe(first_listener);
        let _ = emitter.subscribe(|| panic!("listener failed"));
        let _ = emitter.subscribe(last_listener);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| emitter.emit()));

        assert!(result.is_err());
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(last.load(Ordering::SeqCst), 0);
        assert_eq!(emitter.listener_count(), 3);
    }

    #[test]
    fn unsubscribe_after_emitter_dropped_is_harmless() {
        let emitter = Emitter::new();
        let (_, listener) = counter();
        let unsubscribe = emitter.subscribe(listener);
        drop(emitter);
        unsubscribe.unsubscribe();
    }
}
