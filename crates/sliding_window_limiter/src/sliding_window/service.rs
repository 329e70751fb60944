use std::{
    fmt,
    sync::Arc,
    task::{Context, Poll, ready},
};

use futures::{FutureExt, future::BoxFuture};
use tokio_util::sync::CancellationToken;
use tower::Service;

use super::{
    LimiterError,
    clock::{Clock, SystemClock},
    future::ResponseFuture,
    limiter::SlidingWindowLimiter,
};

/// Gates an inner `Service` behind a shared [`SlidingWindowLimiter`].
///
/// `poll_ready` waits for an admission before asking the inner service for readiness,
/// so every `call` is charged against the window exactly once. Clones share the
/// limiter but start without an admission of their own.
pub struct SlidingWindow<S, C = SystemClock> {
    inner: S,
    limiter: Arc<SlidingWindowLimiter<C>>,
    cancel: Option<CancellationToken>,
    state: State,
}

enum State {
    Idle,
    Waiting(BoxFuture<'static, Result<(), LimiterError>>),
    Admitted,
}

impl<S, C: Clock> SlidingWindow<S, C> {
    pub fn new(inner: S, limiter: Arc<SlidingWindowLimiter<C>>) -> Self {
        Self {
            inner,
            limiter,
            cancel: None,
            state: State::Idle,
        }
    }

    /// Readiness fails with [`LimiterError::Cancelled`] once `cancel` fires.
    pub fn with_cancellation(
        inner: S,
        limiter: Arc<SlidingWindowLimiter<C>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            cancel: Some(cancel),
            ..Self::new(inner, limiter)
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn limiter(&self) -> &Arc<SlidingWindowLimiter<C>> {
        &self.limiter
    }

    fn admission(&self) -> BoxFuture<'static, Result<(), LimiterError>> {
        let limiter = Arc::clone(&self.limiter);
        match self.cancel.clone() {
            Some(cancel) => async move { limiter.acquire_with_cancel(&cancel).await }.boxed(),
            None => async move {
                limiter.acquire().await;
                Ok(())
            }
            .boxed(),
        }
    }
}

impl<S, C, Request> Service<Request> for SlidingWindow<S, C>
where
    S: Service<Request>,
    S::Error: Into<crate::Error>,
    C: Clock,
{
    type Response = S::Response;
    type Error = crate::Error;
    type Future = ResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        loop {
            match &mut self.state {
                State::Idle => self.state = State::Waiting(self.admission()),
                State::Waiting(admission) => {
                    let admitted = ready!(admission.poll_unpin(cx));
                    if let Err(error) = admitted {
                        self.state = State::Idle;
                        return Poll::Ready(Err(error.into()));
                    }
                    self.state = State::Admitted;
                }
                State::Admitted => return self.inner.poll_ready(cx).map_err(Into::into),
            }
        }
    }

    fn call(&mut self, request: Request) -> Self::Future {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::Admitted => ResponseFuture::new(self.inner.call(request)),
            _ => panic!("service not ready; poll_ready must be called first"),
        }
    }
}

impl<S: Clone, C> Clone for SlidingWindow<S, C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: Arc::clone(&self.limiter),
            cancel: self.cancel.clone(),
            state: State::Idle,
        }
    }
}

impl<S: fmt::Debug, C> fmt::Debug for SlidingWindow<S, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            State::Idle => "idle",
            State::Waiting(_) => "waiting",
            State::Admitted => "admitted",
        };
        f.debug_struct("SlidingWindow")
            .field("inner", &self.inner)
            .field("limiter", &self.limiter)
            .field("state", &state)
            .finish()
    }
}
