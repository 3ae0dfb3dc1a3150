//! Reactive Primitives
//!
//! This module implements the dependency-tracking engine: stores, tracking
//! frames, derived values, effects, lenses and function identity.
//!
//! # Concepts
//!
//! ## Stores
//!
//! A [`Store`] is a container of top-level keys. Reading a key inside a
//! tracking frame records a dependency; writing a different value notifies the
//! key's listeners.
//!
//! ## Tracking Frames
//!
//! A tracking frame collects the [`ReadEvent`]s produced while a computation
//! runs. Frames nest; only the innermost one sees reads.
//!
//! ## Derived values
//!
//! [`pick`] wraps a computation in its own frame and exposes one virtual
//! dependency that fires only when the computed value changes.
//!
//! ## Effects
//!
//! An [`Effect`] runs a closure, subscribes to what it read and re-runs on
//! change.
//!
//! # Implementation Notes
//!
//! There is no property interception: every tracked value is read through an
//! explicit accessor (`Store::get`, `Focus::get`, `pick`), which reports to
//! the thread-local frame stack. Listeners are keyed by store and key name.

mod context;
mod effect;
mod emitter;
mod identity;
mod lens;
pub mod pick;
mod store;

pub use context::{
    collect_reads, frame_depth, is_tracking, untracked, with_tracking_frame, FrameHooks,
    ReadEvent, ReadKey,
};
pub use effect::Effect;
pub use emitter::{Emitter, Listener, ListenerId, Unsubscribe};
pub use identity::{is_wrapped_fn, unwrap_fn, wrap_fn, ActionFn};
pub use lens::{focus, Focus, FocusOptions};
pub use pick::{pick, pick_with, PickMap};
pub use store::{StateMap, Store, StoreBuilder, StoreChange, StoreId, StoreObserver, WeakStore};
