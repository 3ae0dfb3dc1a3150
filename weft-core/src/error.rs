//! Error types shared across the runtime.

use thiserror::Error;

/// Errors surfaced by the reactive runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// A tracking-only primitive was called with no tracking frame on the stack.
    #[error("`{primitive}` must be called inside an active tracking frame (see `with_tracking_frame` or `Effect`)")]
    MissingTrackingFrame { primitive: &'static str },

    /// A lens path was empty or contained an empty segment.
    #[error("invalid lens path `{0}`")]
    InvalidPath(String),

    /// A lens write had to descend through a scalar value.
    #[error("cannot write through `{path}`: segment `{segment}` does not hold an object or array")]
    NotAContainer { path: String, segment: String },

    /// A lens write addressed an array element more than one past the end.
    #[error("cannot write through `{path}`: index `{segment}` is out of range for an array of length {len}")]
    IndexOutOfRange { path: String, segment: String, len: usize },

    /// A `PickMap` was asked for a selector it does not hold.
    #[error("unknown selector `{0}`")]
    UnknownSelector(String),

    /// A store was seeded with something other than a JSON object.
    #[error("initial store state must be a JSON object, got {0}")]
    InvalidInitialState(&'static str),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RuntimeError>;
