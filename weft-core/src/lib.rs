//! Weft Core
//!
//! This crate provides the runtime for the Weft reactive state container.
//! It implements:
//!
//! - Key-value stores with per-key change notification
//! - Automatic dependency tracking through tracking frames
//! - Derived values that notify only when their result changes
//! - Async actions with generation-based cancellation
//! - Path lenses into nested state
//! - A snapshot recorder with diff and revert
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: stores, tracking frames, `pick`, effects, lenses and
//!   function identity
//! - `action`: the async action state machine
//! - `recorder`: snapshot history and the inspector event feed
//! - `config`: serde-backed configuration for the recorder and actions
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicI64, Ordering};
//! use serde_json::json;
//! use weft_core::reactive::{pick, Effect, Store};
//!
//! let store = Store::new([("count", json!(1)), ("label", json!("x"))]);
//!
//! let seen = Arc::new(AtomicI64::new(0));
//! let (reader, sink) = (store.clone(), seen.clone());
//! let _effect = Effect::new(move || {
//!     let source = reader.clone();
//!     let parity = pick(move || source.get("count").as_i64().unwrap_or(0) % 2).unwrap_or(0);
//!     sink.store(parity, Ordering::SeqCst);
//! });
//!
//! // 1 -> 3 keeps the parity, the effect is not re-run.
//! store.set("count", json!(3));
//! store.set("count", json!(4));
//! assert_eq!(seen.load(Ordering::SeqCst), 0);
//! ```

pub mod action;
mod clock;
pub mod config;
pub mod error;
pub mod reactive;
pub mod recorder;

pub use error::{Result, RuntimeError};
