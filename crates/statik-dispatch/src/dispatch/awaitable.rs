//! Awaitable results
//!
//! A coroutine member returns an [`Awaitable`]. When the declared return type
//! has to be enforced, the awaitable is wrapped in a [`CheckedAwait`] adapter
//! that forwards every poll to the wrapped computation and runs the
//! [`ReturnCheck`] only once it resolves. An awaitable that is already
//! complete at wrap time is checked on the spot instead.

use crate::dispatch::enforcer::ReturnCheck;
use crate::error::{DispatchError, DispatchResult};
use crate::object::value::Value;
use futures::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::trace;

enum AwaitState {
    Ready(DispatchResult<Value>),
    Pending(BoxFuture<'static, DispatchResult<Value>>),
    Taken,
}

/// Result of calling a coroutine function
pub struct Awaitable {
    state: Mutex<AwaitState>,
}

impl Awaitable {
    /// Already completed with `value`
    pub fn ready(value: Value) -> Arc<Awaitable> {
        Self::from_state(AwaitState::Ready(Ok(value)))
    }

    /// Already failed with `error`
    pub fn failed(error: DispatchError) -> Arc<Awaitable> {
        Self::from_state(AwaitState::Ready(Err(error)))
    }

    /// Computation still to run
    pub fn pending<F>(future: F) -> Arc<Awaitable>
    where
        F: Future<Output = DispatchResult<Value>> + Send + 'static,
    {
        Self::from_state(AwaitState::Pending(future.boxed()))
    }

    fn from_state(state: AwaitState) -> Arc<Awaitable> {
        Arc::new(Awaitable {
            state: Mutex::new(state),
        })
    }

    /// Wrap into a value
    pub fn into_value(self: Arc<Self>) -> Value {
        Value::Awaitable(self)
    }

    /// Whether the result is available without polling
    pub fn is_ready(&self) -> bool {
        matches!(&*self.state.lock(), AwaitState::Ready(_))
    }

    /// Whether the awaitable has already been consumed
    pub fn is_consumed(&self) -> bool {
        matches!(&*self.state.lock(), AwaitState::Taken)
    }

    /// Take the underlying computation; an awaitable can be awaited once
    pub fn take_future(&self) -> BoxFuture<'static, DispatchResult<Value>> {
        let state = std::mem::replace(&mut *self.state.lock(), AwaitState::Taken);
        match state {
            AwaitState::Ready(result) => future::ready(result).boxed(),
            AwaitState::Pending(fut) => fut,
            AwaitState::Taken => future::ready(Err(DispatchError::Runtime(
                "cannot reuse already awaited coroutine".to_string(),
            )))
            .boxed(),
        }
    }

    /// Await the result
    pub async fn wait(&self) -> DispatchResult<Value> {
        self.take_future().await
    }

    /// Apply `check` to the eventual result.
    ///
    /// With `eager` set, a result that is already available is checked now
    /// and the returned awaitable is ready (possibly with the error).
    pub fn checked(&self, check: ReturnCheck, eager: bool) -> Arc<Awaitable> {
        if eager {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, AwaitState::Taken) {
                AwaitState::Ready(result) => {
                    drop(state);
                    trace!(member = check.member(), "eager await check");
                    return Self::from_state(AwaitState::Ready(result.and_then(|v| check.apply(v))));
                }
                other => *state = other,
            }
        }
        let inner = self.take_future();
        Self::from_state(AwaitState::Pending(CheckedAwait { inner, check }.boxed()))
    }
}

/// Future adapter applying a [`ReturnCheck`] once the inner future resolves
pub struct CheckedAwait {
    inner: BoxFuture<'static, DispatchResult<Value>>,
    check: ReturnCheck,
}

impl Future for CheckedAwait {
    type Output = DispatchResult<Value>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match this.inner.as_mut().poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(result) => Poll::Ready(result.and_then(|v| this.check.apply(v))),
        }
    }
}
