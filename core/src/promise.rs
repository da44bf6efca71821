//! Single-assignment promise with composable continuations.
//!
//! # Design
//! A [`Promise`] is a shared cell that moves from pending to exactly one
//! terminal outcome (`Ok(value)` or `Err(WsError)`). The write side is a
//! [`Completer`]; the read side can be cloned and observed by any number of
//! continuations, each of which receives its own clone of the outcome.
//!
//! - Continuations registered while pending run on the thread that completes
//!   the promise. Continuations registered afterwards run immediately on the
//!   registering thread, so no completion is ever missed.
//! - Completion is first-write-wins: later writes are discarded and reported
//!   through the `bool` returned by [`Completer::complete`].
//! - When the last completer is dropped without writing, the promise fails
//!   with [`WsError::Abandoned`].
//! - A panic inside a combinator's closure fails the derived promise with
//!   [`WsError::Chain`] instead of unwinding into the completing thread.
//!
//! `Promise` also implements [`std::future::Future`], so it can be awaited
//! from async code as well as composed with callbacks.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use tokio::runtime::Handle;

use crate::error::{Result, WsError};

type Callback<T> = Box<dyn FnOnce(Result<T>) + Send>;

enum State<T> {
    Pending {
        callbacks: Vec<Callback<T>>,
        wakers: Vec<Waker>,
    },
    Done(Result<T>),
}

struct Shared<T> {
    state: Mutex<State<T>>,
}

impl<T: Clone + Send + 'static> Shared<T> {
    fn pending() -> Self {
        Self {
            state: Mutex::new(State::Pending {
                callbacks: Vec::new(),
                wakers: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        // Callbacks never run under the lock, so a poisoned state is still
        // structurally valid.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn complete(&self, outcome: Result<T>) -> bool {
        let (callbacks, wakers) = {
            let mut state = self.lock();
            match std::mem::replace(&mut *state, State::Done(outcome.clone())) {
                State::Pending { callbacks, wakers } => (callbacks, wakers),
                done @ State::Done(_) => {
                    *state = done;
                    return false;
                }
            }
        };
        for callback in callbacks {
            callback(outcome.clone());
        }
        for waker in wakers {
            waker.wake();
        }
        true
    }
}

/// Create a pending promise together with the completer that resolves it.
pub fn channel<T: Clone + Send + 'static>() -> (Completer<T>, Promise<T>) {
    let shared = Arc::new(Shared::pending());
    let completer = Completer {
        inner: Arc::new(CompleterInner {
            shared: Arc::clone(&shared),
        }),
    };
    (completer, Promise { shared })
}

/// Write side of a [`Promise`].
///
/// Clones share one slot; the promise is abandoned only when the last clone
/// goes away.
pub struct Completer<T: Clone + Send + 'static> {
    inner: Arc<CompleterInner<T>>,
}

struct CompleterInner<T: Clone + Send + 'static> {
    shared: Arc<Shared<T>>,
}

impl<T: Clone + Send + 'static> Drop for CompleterInner<T> {
    fn drop(&mut self) {
        self.shared.complete(Err(WsError::Abandoned));
    }
}

impl<T: Clone + Send + 'static> Clone for Completer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> Completer<T> {
    /// Complete the promise. Returns `false` if it was already completed, in
    /// which case `outcome` is discarded.
    pub fn complete(&self, outcome: Result<T>) -> bool {
        let written = self.inner.shared.complete(outcome);
        if !written {
            log::debug!("discarding duplicate promise completion");
        }
        written
    }

    pub fn success(&self, value: T) -> bool {
        self.complete(Ok(value))
    }

    pub fn failure(&self, error: WsError) -> bool {
        self.complete(Err(error))
    }
}

/// A value that becomes available asynchronously, exactly once.
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Clone + Send + 'static> Promise<T> {
    /// An already-resolved promise.
    pub fn pure(value: T) -> Self {
        Self::from_result(Ok(value))
    }

    /// An already-failed promise.
    pub fn failed(error: WsError) -> Self {
        Self::from_result(Err(error))
    }

    pub fn from_result(outcome: Result<T>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::Done(outcome)),
            }),
        }
    }

    /// Run `f` on the runtime's blocking pool and complete with its result.
    ///
    /// If the runtime is shutting down and never runs `f`, the promise fails
    /// with [`WsError::Abandoned`].
    pub fn spawn_blocking<F>(handle: &Handle, f: F) -> Self
    where
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let (completer, promise) = channel();
        handle.spawn_blocking(move || {
            completer.complete(guarded(f));
        });
        promise
    }

    /// Register `f` to observe the outcome.
    pub fn on_complete<F>(&self, f: F)
    where
        F: FnOnce(Result<T>) + Send + 'static,
    {
        let outcome = {
            let mut state = self.shared.lock();
            match &mut *state {
                State::Done(outcome) => outcome.clone(),
                State::Pending { callbacks, .. } => {
                    callbacks.push(Box::new(f));
                    return;
                }
            }
        };
        f(outcome);
    }

    /// Observe a successful value. Panics in `f` are swallowed.
    pub fn on_redeem<F>(&self, f: F)
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.on_complete(move |outcome| {
            if let Ok(value) = outcome {
                if guarded(move || Ok(f(value))).is_err() {
                    log::debug!("on_redeem callback panicked");
                }
            }
        });
    }

    /// Observe a failure. Panics in `f` are swallowed.
    pub fn on_failure<F>(&self, f: F)
    where
        F: FnOnce(WsError) + Send + 'static,
    {
        self.on_complete(move |outcome| {
            if let Err(error) = outcome {
                if guarded(move || Ok(f(error))).is_err() {
                    log::debug!("on_failure callback panicked");
                }
            }
        });
    }

    /// Transform the resolved value. A failure propagates unchanged and `f`
    /// is never invoked.
    pub fn map<U, F>(&self, f: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.try_map(move |value| Ok(f(value)))
    }

    /// Like [`map`](Self::map), but `f` may fail the derived promise.
    pub fn try_map<U, F>(&self, f: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<U> + Send + 'static,
    {
        let (completer, promise) = channel();
        self.on_complete(move |outcome| {
            let mapped = match outcome {
                Ok(value) => guarded(move || f(value)),
                Err(error) => Err(error),
            };
            completer.complete(mapped);
        });
        promise
    }

    /// Chain a dependent asynchronous step. The result completes only when
    /// the promise returned by `f` does.
    pub fn flat_map<U, F>(&self, f: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Promise<U> + Send + 'static,
    {
        let (completer, promise) = channel();
        self.on_complete(move |outcome| {
            let next = outcome.and_then(|value| guarded(move || Ok(f(value))));
            match next {
                Ok(inner) => inner.on_complete(move |inner_outcome| {
                    completer.complete(inner_outcome);
                }),
                Err(error) => {
                    completer.complete(Err(error));
                }
            }
        });
        promise
    }

    /// Like [`flat_map`](Self::flat_map) for steps that can fail before
    /// producing a promise, such as building the next request. An `Err`
    /// from `f` fails the result with [`WsError::Chain`].
    pub fn try_flat_map<U, F>(&self, f: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<Promise<U>> + Send + 'static,
    {
        self.flat_map(move |value| match f(value) {
            Ok(next) => next,
            Err(error) => Promise::failed(WsError::Chain(error.to_string())),
        })
    }

    /// Replace a failure with a value computed from the error.
    pub fn recover<F>(&self, f: F) -> Promise<T>
    where
        F: FnOnce(&WsError) -> T + Send + 'static,
    {
        self.recover_with(move |error| Promise::pure(f(&error)))
    }

    /// Replace a failure with another promise. A resolved value passes
    /// through and `f` is never invoked.
    pub fn recover_with<F>(&self, f: F) -> Promise<T>
    where
        F: FnOnce(WsError) -> Promise<T> + Send + 'static,
    {
        let (completer, promise) = channel();
        self.on_complete(move |outcome| match outcome {
            Ok(value) => {
                completer.complete(Ok(value));
            }
            Err(error) => match guarded(move || Ok(f(error))) {
                Ok(replacement) => replacement.on_complete(move |replaced| {
                    completer.complete(replaced);
                }),
                Err(chain) => {
                    completer.complete(Err(chain));
                }
            },
        });
        promise
    }

    /// On failure, adopt the outcome of `other`.
    pub fn fallback_to(&self, other: Promise<T>) -> Promise<T> {
        self.recover_with(move |_| other)
    }

    /// Pair this promise with another; the first failure observed wins.
    pub fn zip<U>(&self, other: &Promise<U>) -> Promise<(T, U)>
    where
        U: Clone + Send + 'static,
    {
        let other = other.clone();
        self.flat_map(move |left| other.map(move |right| (left, right)))
    }

    /// Collect the values of `promises` in order.
    pub fn sequence<I>(promises: I) -> Promise<Vec<T>>
    where
        I: IntoIterator<Item = Promise<T>>,
    {
        promises
            .into_iter()
            .fold(Promise::pure(Vec::new()), |acc, next| {
                acc.flat_map(move |mut values| {
                    next.map(move |value| {
                        values.push(value);
                        values
                    })
                })
            })
    }

    /// Fail with [`WsError::Timeout`] unless this promise completes within
    /// `timeout`. The timer runs on `handle` and is cancelled as soon as the
    /// source completes.
    pub fn within(&self, timeout: Duration, handle: &Handle) -> Promise<T> {
        let (completer, promise) = channel();
        let timer = {
            let completer = completer.clone();
            handle.spawn(async move {
                tokio::time::sleep(timeout).await;
                completer.complete(Err(WsError::Timeout(timeout)));
            })
        };
        self.on_complete(move |outcome| {
            timer.abort();
            completer.complete(outcome);
        });
        promise
    }

    pub fn is_completed(&self) -> bool {
        matches!(*self.shared.lock(), State::Done(_))
    }

    /// The outcome, if already known.
    pub fn peek(&self) -> Option<Result<T>> {
        match &*self.shared.lock() {
            State::Done(outcome) => Some(outcome.clone()),
            State::Pending { .. } => None,
        }
    }

    /// Block the current thread until the promise completes or `timeout`
    /// elapses.
    ///
    /// Must not be called from a continuation of a promise this one depends
    /// on: the completing thread would wait on itself.
    pub fn get(&self, timeout: Duration) -> Result<T> {
        let (tx, rx) = mpsc::channel();
        self.on_complete(move |outcome| {
            let _ = tx.send(outcome);
        });
        match rx.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => Err(WsError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(WsError::Abandoned),
        }
    }
}

impl<T: Clone + Send + 'static> Future for Promise<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.shared.lock();
        match &mut *state {
            State::Done(outcome) => Poll::Ready(outcome.clone()),
            State::Pending { wakers, .. } => {
                if !wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.shared.state.lock().unwrap_or_else(PoisonError::into_inner) {
            State::Pending { .. } => "pending",
            State::Done(Ok(_)) => "resolved",
            State::Done(Err(_)) => "failed",
        };
        f.debug_struct("Promise").field("state", &state).finish()
    }
}

/// Run `f`, turning a panic into [`WsError::Chain`].
fn guarded<R>(f: impl FnOnce() -> Result<R>) -> Result<R> {
    panic::catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|payload| Err(WsError::Chain(panic_message(payload.as_ref()))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
