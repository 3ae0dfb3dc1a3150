//! Tracking Frames
//!
//! A tracking frame is the "who is listening" context of a computation. While
//! a frame is on top of the stack, every tracked read (a [`Store::get`], a
//! [`pick`] result) is reported to it as a [`ReadEvent`].
//!
//! # Implementation
//!
//! We use a thread-local stack of frames. Entering a frame pushes it and
//! returns a guard; the guard pops the frame when dropped, so the stack stays
//! balanced even if the computation panics. Only the top frame receives reads,
//! which lets a nested computation (a derived value) collect its own
//! dependencies without leaking them to the enclosing consumer.
//!
//! [`Store::get`]: super::Store::get
//! [`pick`]: super::pick

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{Result, RuntimeError};

use super::emitter::{Listener, Unsubscribe};
use super::store::StoreId;

thread_local! {
    static FRAME_STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

type ReadHook = Rc<dyn Fn(ReadEvent)>;
type SubscribeFn = Arc<dyn Fn(Listener) -> Unsubscribe + Send + Sync>;

/// Identity of the thing a read was made against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReadKey {
    /// A top-level key of a store.
    Field { store: StoreId, key: String },
    /// The virtual dependency registered by one `pick` call.
    Derived { id: u64 },
}

impl fmt::Display for ReadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field { store, key } => write!(f, "{store}.{key}"),
            Self::Derived { id } => write!(f, "pick#{id}"),
        }
    }
}

/// One recorded dependency.
///
/// Cloning is cheap; clones share the captured value and subscribe function.
#[derive(Clone)]
pub struct ReadEvent {
    key: ReadKey,
    value: Arc<dyn Any + Send + Sync>,
    subscribe: SubscribeFn,
}

impl ReadEvent {
    pub fn new<V, S>(key: ReadKey, value: V, subscribe: S) -> Self
    where
        V: Any + Send + Sync,
        S: Fn(Listener) -> Unsubscribe + Send + Sync + 'static,
    {
        Self {
            key,
            value: Arc::new(value),
            subscribe: Arc::new(subscribe),
        }
    }

    pub fn key(&self) -> &ReadKey {
        &self.key
    }

    /// The value observed at read time, if it has type `V`.
    pub fn value<V: Any>(&self) -> Option<&V> {
        self.value.downcast_ref::<V>()
    }

    /// Listen for future changes of the dependency.
    pub fn subscribe(&self, listener: Listener) -> Unsubscribe {
        (self.subscribe)(listener)
    }
}

impl fmt::Debug for ReadEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadEvent").field("key", &self.key).finish()
    }
}

/// Callbacks installed by a frame.
#[derive(Default, Clone)]
pub struct FrameHooks {
    on_read: Option<ReadHook>,
}

impl FrameHooks {
    pub fn on_read<F>(hook: F) -> Self
    where
        F: Fn(ReadEvent) + 'static,
    {
        Self {
            on_read: Some(Rc::new(hook)),
        }
    }
}

struct Frame {
    id: u64,
    hooks: FrameHooks,
}

/// Pops its frame when dropped.
struct FrameGuard {
    id: u64,
}

impl FrameGuard {
    fn enter(hooks: FrameHooks) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let id = COUNTER.fetch_add(1, Ordering::Relaxed);
        FRAME_STACK.with(|stack| stack.borrow_mut().push(Frame { id, hooks }));
        Self { id }
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        let popped = FRAME_STACK.with(|stack| stack.borrow_mut().pop());
        if let Some(frame) = popped {
            debug_assert_eq!(
                frame.id, self.id,
                "tracking frame mismatch: expected {}, got {}",
                self.id, frame.id
            );
        }
    }
}

/// Run `f` with a new frame on top of the stack.
pub fn with_tracking_frame<R>(hooks: FrameHooks, f: impl FnOnce() -> R) -> R {
    let _guard = FrameGuard::enter(hooks);
    f()
}

/// Run `f` in an isolated frame and return every read it made.
pub fn collect_reads<R>(f: impl FnOnce() -> R) -> (R, Vec<ReadEvent>) {
    let sink = Rc::new(RefCell::new(Vec::new()));
    let writer = Rc::clone(&sink);
    let result = with_tracking_frame(
        FrameHooks::on_read(move |event| writer.borrow_mut().push(event)),
        f,
    );
    let events = std::mem::take(&mut *sink.borrow_mut());
    (result, events)
}

/// Run `f` so that its reads are reported to nobody.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    with_tracking_frame(FrameHooks::default(), f)
}

/// Whether any frame is active on this thread.
pub fn is_tracking() -> bool {
    FRAME_STACK.with(|stack| !stack.borrow().is_empty())
}

pub fn frame_depth() -> usize {
    FRAME_STACK.with(|stack| stack.borrow().len())
}

/// Fail with a context error naming `primitive` if no frame is active.
pub(crate) fn require_frame(primitive: &'static str) -> Result<()> {
    if is_tracking() {
        Ok(())
    } else {
        Err(RuntimeError::MissingTrackingFrame { primitive })
    }
}

/// Hand a read to the top frame, if it listens for reads.
pub(crate) fn report_read(event: ReadEvent) {
    // Clone the hook out so the stack is not borrowed while it runs.
    let hook = FRAME_STACK.with(|stack| {
        stack
            .borrow()
            .last()
            .and_then(|frame| frame.hooks.on_read.clone())
    });
    if let Some(hook) = hook {
        tracing::trace!(key = %event.key(), "read tracked");
        hook(event);
    }
}

/// Subscribe `listener` once to every distinct dependency in `reads`.
pub(crate) fn subscribe_all(reads: &[ReadEvent], listener: &Listener) -> Vec<Unsubscribe> {
    let mut seen = HashSet::new();
    reads
        .iter()
        .filter(|read| seen.insert(read.key().clone()))
        .map(|read| read.subscribe(Arc::clone(listener)))
        .collect()
}
