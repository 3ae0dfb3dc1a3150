//! Async Action State Machine
//!
//! An [`AsyncAction`] runs an async handler and keeps an [`AsyncState`] for
//! it under a key of a [`Store`]. Because the state lives in the store, it is
//! tracked like any other key: effects and picks that read
//! [`AsyncAction::state`] re-run when the status changes.
//!
//! # Dispatch protocol
//!
//! 1. `dispatch` is synchronous up to the first await: it takes the next
//!    generation, aborts the in-flight dispatch (if any), reports a dispatch
//!    event to the store's observer and commits `pending`.
//!
//! 2. The returned future runs the handler with a fresh [`AbortSignal`].
//!
//! 3. On settlement the result is committed only if no newer dispatch or
//!    reset happened in between. Otherwise it is dropped and the future
//!    resolves to [`DispatchOutcome::Superseded`]; a late, slow dispatch can
//!    never overwrite the result of a newer, faster one.
//!
//! 4. If the future is dropped before it settles (a timeout, a losing
//!    `select!` arm, an aborted task), the signal is aborted. When no newer
//!    dispatch or reset took over, the state goes back to `idle`. Stale mode
//!    keeps the previous data; otherwise it is cleared.
//!
//! Handler errors are stored as `status: error` and are not returned as
//! `Err`. `Err` is reserved for state that cannot be (de)serialized.

mod abort;
mod state;

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;

use crate::clock::now_millis;
use crate::config::AsyncOptions;
use crate::error::Result;
use crate::reactive::{wrap_fn, ActionFn, Store};

pub use abort::AbortSignal;
pub use state::{AsyncState, AsyncStatus};

/// The shared handler behind an action.
pub type ActionHandler<A, T> =
    ActionFn<(A, AbortSignal), BoxFuture<'static, std::result::Result<T, String>>>;

/// How a dispatch ended.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome<T> {
    /// The settlement was written to the store.
    Committed(AsyncState<T>),
    /// A newer dispatch or a reset took over; nothing was written.
    Superseded { generation: u64 },
}

impl<T> DispatchOutcome<T> {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed(_))
    }
}

struct ActionInner<A, T> {
    store: Store,
    key: String,
    handler: ActionHandler<A, T>,
    options: AsyncOptions,
    generation: AtomicU64,
    in_flight: Mutex<Option<(u64, AbortSignal)>>,
}

/// An async operation with tracked pending/success/error state.
pub struct AsyncAction<A, T> {
    inner: Arc<ActionInner<A, T>>,
}

impl<A, T> Clone for AsyncAction<A, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A, T> AsyncAction<A, T>
where
    A: Clone + Send + Sync + 'static,
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Create an action with default options.
    pub fn new<F, Fut, E>(store: &Store, key: impl Into<String>, handler: F) -> Result<Self>
    where
        F: Fn(A, AbortSignal) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        E: fmt::Display + 'static,
    {
        Self::with_options(store, key, handler, AsyncOptions::default())
    }

    pub fn with_options<F, Fut, E>(
        store: &Store,
        key: impl Into<String>,
        handler: F,
        options: AsyncOptions,
    ) -> Result<Self>
    where
        F: Fn(A, AbortSignal) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        E: fmt::Display + 'static,
    {
        let handler: ActionHandler<A, T> = ActionFn::new(move |(args, signal): (A, AbortSignal)| {
            let pending = handler(args, signal);
            Box::pin(async move { pending.await.map_err(|error| error.to_string()) })
                as BoxFuture<'static, std::result::Result<T, String>>
        });
        Self::with_handler(store, key, handler, options)
    }

    /// Create an action around an existing shared handler.
    ///
    /// With `options.retries > 0` the handler is wrapped in a retry loop; the
    /// wrapper still unwraps to `handler`.
    pub fn with_handler(
        store: &Store,
        key: impl Into<String>,
        handler: ActionHandler<A, T>,
        options: AsyncOptions,
    ) -> Result<Self> {
        let handler = if options.retries > 0 {
            with_retries(&handler, options.retries, options.retry_delay())
        } else {
            handler
        };

        let action = Self {
            inner: Arc::new(ActionInner {
                store: store.clone(),
                key: key.into(),
                handler,
                options,
                generation: AtomicU64::new(0),
                in_flight: Mutex::new(None),
            }),
        };
        if store.get_untracked(action.key()).is_null() {
            action.inner.commit(&AsyncState::<T>::default())?;
        }
        Ok(action)
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn handler(&self) -> &ActionHandler<A, T> {
        &self.inner.handler
    }

    /// Current state. Records a dependency when called inside a frame.
    pub fn state(&self) -> Result<AsyncState<T>> {
        self.inner.store.get_as(&self.inner.key)
    }

    pub fn status(&self) -> Result<AsyncStatus> {
        Ok(self.state()?.status)
    }

    /// Start a dispatch; see the module docs for the protocol.
    pub fn dispatch(&self, args: A) -> impl Future<Output = Result<DispatchOutcome<T>>> + Send + 'static {
        let started = self.inner.begin();
        let guard = started.as_ref().ok().map(|(generation, signal)| {
            let (inner, generation, signal) = (Arc::clone(&self.inner), *generation, signal.clone());
            SettleGuard::new(move || inner.abandon(generation, &signal))
        });
        let inner = Arc::clone(&self.inner);
        async move {
            let (generation, signal) = started?;
            let outcome = inner.handler.call((args, signal.clone())).await;
            let settled = inner.settle(generation, &signal, outcome)?;
            if let Some(guard) = guard {
                guard.disarm();
            }
            Ok(settled)
        }
    }

    /// Abort any in-flight dispatch and return to `idle`.
    pub fn reset(&self) -> Result<()> {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((_, signal)) = self.inner.in_flight.lock().take() {
            signal.abort();
        }
        tracing::debug!(action = %self.inner.key, generation, "action reset");
        self.inner.commit(&AsyncState::<T> {
            generation,
            ..AsyncState::default()
        })
    }
}

impl<A, T> ActionInner<A, T>
where
    T: Serialize + DeserializeOwned,
{
    fn begin(&self) -> Result<(u64, AbortSignal)> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let signal = AbortSignal::new();

        let previous = self.in_flight.lock().replace((generation, signal.clone()));
        if let Some((superseded, previous)) = previous {
            tracing::debug!(action = %self.key, superseded, generation, "aborting in-flight dispatch");
            previous.abort();
        }
        self.store
            .report_dispatch(&self.key, &json!({ "generation": generation }));

        let current = self.read_untracked()?;
        let data = if self.options.stale_while_revalidate {
            current.data
        } else {
            None
        };
        self.commit(&AsyncState {
            status: AsyncStatus::Pending,
            data,
            error: None,
            timestamp: current.timestamp,
            generation,
        })?;
        Ok((generation, signal))
    }

    fn settle(
        &self,
        generation: u64,
        signal: &AbortSignal,
        outcome: std::result::Result<T, String>,
    ) -> Result<DispatchOutcome<T>> {
        if signal.is_aborted() || self.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!(action = %self.key, generation, "discarding superseded settlement");
            return Ok(DispatchOutcome::Superseded { generation });
        }
        {
            let mut in_flight = self.in_flight.lock();
            if matches!(*in_flight, Some((current, _)) if current == generation) {
                *in_flight = None;
            }
        }

        let state = match outcome {
            Ok(data) => AsyncState {
                status: AsyncStatus::Success,
                data: Some(data),
                error: None,
                timestamp: Some(now_millis()),
                generation,
            },
            Err(error) => {
                tracing::debug!(action = %self.key, generation, %error, "action failed");
                let data = if self.options.stale_while_revalidate {
                    self.read_untracked()?.data
                } else {
                    None
                };
                AsyncState {
                    status: AsyncStatus::Error,
                    data,
                    error: Some(error),
                    timestamp: Some(now_millis()),
                    generation,
                }
            }
        };
        self.commit(&state)?;
        Ok(DispatchOutcome::Committed(state))
    }

    /// Wind down a dispatch whose future was dropped before settling.
    fn abandon(&self, generation: u64, signal: &AbortSignal) {
        signal.abort();
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        {
            let mut in_flight = self.in_flight.lock();
            if matches!(*in_flight, Some((current, _)) if current == generation) {
                *in_flight = None;
            }
        }
        tracing::debug!(action = %self.key, generation, "dispatch dropped before settling");

        let restored = self.read_untracked().and_then(|current| {
            self.commit(&AsyncState {
                status: AsyncStatus::Idle,
                data: current.data.filter(|_| self.options.stale_while_revalidate),
                error: None,
                timestamp: current.timestamp,
                generation,
            })
        });
        if let Err(error) = restored {
            tracing::warn!(action = %self.key, generation, %error, "could not restore dropped dispatch");
        }
    }

    fn read_untracked(&self) -> Result<AsyncState<T>> {
        match self.store.get_untracked(&self.key) {
            serde_json::Value::Null => Ok(AsyncState::default()),
            value => Ok(serde_json::from_value(value)?),
        }
    }

    fn commit(&self, state: &AsyncState<T>) -> Result<()> {
        self.store.set(&self.key, serde_json::to_value(state)?);
        Ok(())
    }
}

impl<A, T> fmt::Debug for AsyncAction<A, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncAction")
            .field("store", &self.inner.store.id())
            .field("key", &self.inner.key)
            .field("generation", &self.inner.generation.load(Ordering::SeqCst))
            .finish()
    }
}

/// Runs its callback on drop unless disarmed.
struct SettleGuard {
    abandon: Option<Box<dyn FnOnce() + Send>>,
}

impl SettleGuard {
    fn new<F>(abandon: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            abandon: Some(Box::new(abandon)),
        }
    }

    fn disarm(mut self) {
        self.abandon = None;
    }
}

impl Drop for SettleGuard {
    fn drop(&mut self) {
        if let Some(abandon) = self.abandon.take() {
            abandon();
        }
    }
}

/// Retry failed attempts up to `retries` times, pausing `delay` in between.
fn with_retries<A, T>(handler: &ActionHandler<A, T>, retries: u32, delay: Duration) -> ActionHandler<A, T>
where
    A: Clone + Send + Sync + 'static,
    T: Send + 'static,
{
    wrap_fn(handler, move |inner| {
        move |(args, signal): (A, AbortSignal)| {
            let inner = inner.clone();
            Box::pin(async move {
                let mut attempt = 0;
                loop {
                    match inner.call((args.clone(), signal.clone())).await {
                        Err(error) if attempt < retries && !signal.is_aborted() => {
                            attempt += 1;
                            tracing::debug!(attempt, %error, "retrying action");
                            tokio::select! {
                                _ = tokio::time::sleep(delay) => {}
                                _ = signal.aborted() => return Err(error),
                            }
                        }
                        outcome => return outcome,
                    }
                }
            }) as BoxFuture<'static, std::result::Result<T, String>>
        }
    })
}
