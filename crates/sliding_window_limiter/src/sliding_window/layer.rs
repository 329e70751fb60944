use std::{fmt, sync::Arc};

use tokio_util::sync::CancellationToken;
use tower::Layer;

use super::{
    clock::{Clock, SystemClock},
    limiter::SlidingWindowLimiter,
    service::SlidingWindow,
};

/// Enforces a sliding-window admission limit on the underlying service.
///
/// Every service produced by this layer charges the same limiter, so stacking the
/// layer on several services spreads one budget across all of them.
pub struct SlidingWindowLayer<C = SystemClock> {
    limiter: Arc<SlidingWindowLimiter<C>>,
    cancel: Option<CancellationToken>,
}

impl<C: Clock> SlidingWindowLayer<C> {
    pub fn new(limiter: Arc<SlidingWindowLimiter<C>>) -> Self {
        Self {
            limiter,
            cancel: None,
        }
    }

    /// Services built by this layer stop waiting for admission once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

impl<S, C: Clock> Layer<S> for SlidingWindowLayer<C> {
    type Service = SlidingWindow<S, C>;

    fn layer(&self, service: S) -> Self::Service {
        let limiter = Arc::clone(&self.limiter);
        match &self.cancel {
            Some(cancel) => SlidingWindow::with_cancellation(service, limiter, cancel.clone()),
            None => SlidingWindow::new(service, limiter),
        }
    }
}

impl<C> Clone for SlidingWindowLayer<C> {
    fn clone(&self) -> Self {
        Self {
            limiter: Arc::clone(&self.limiter),
            cancel: self.cancel.clone(),
        }
    }
}

impl<C> fmt::Debug for SlidingWindowLayer<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlidingWindowLayer")
            .field("limiter", &self.limiter)
            .field("cancellable", &self.cancel.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time;
    use tokio_test::{assert_pending, assert_ready_err, assert_ready_ok, task};
    use tower_test::{assert_request_eq, mock};

    use super::*;
    use crate::sliding_window::{LimiterError, WindowUnit};

    fn limiter(unit: WindowUnit, limit: usize) -> Arc<SlidingWindowLimiter> {
        Arc::new(SlidingWindowLimiter::from_unit(unit, limit).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn readiness_waits_for_the_window() {
        let layer = SlidingWindowLayer::new(limiter(WindowUnit::Seconds, 1));
        let (mut svc, mut handle) = mock::spawn_layer::<&'static str, &'static str, _>(layer);

        assert_ready_ok!(svc.poll_ready());
        let response = task::spawn(svc.call("first"));
        assert_request_eq!(handle, "first").send_response("ok");
        assert_eq!(response.await.unwrap(), "ok");

        assert_pending!(svc.poll_ready());
        time::advance(Duration::from_millis(500)).await;
        assert_pending!(svc.poll_ready());
        time::advance(Duration::from_millis(501)).await;
        assert_ready_ok!(svc.poll_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn inner_errors_are_boxed() {
        let layer = SlidingWindowLayer::new(limiter(WindowUnit::Seconds, 5));
        let (mut svc, mut handle) = mock::spawn_layer::<&'static str, &'static str, _>(layer);

        assert_ready_ok!(svc.poll_ready());
        let mut response = task::spawn(svc.call("hello"));
        assert_request_eq!(handle, "hello").send_error(LimiterError::InvalidConfig {
            reason: "boom".to_string(),
        });

        let error = assert_ready_err!(response.poll());
        assert!(error.to_string().contains("boom"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_readiness_fails() {
        let cancel = CancellationToken::new();
        let layer =
            SlidingWindowLayer::new(limiter(WindowUnit::Minutes, 1)).with_cancellation(cancel.clone());
        let (mut svc, mut handle) = mock::spawn_layer::<&'static str, &'static str, _>(layer);

        assert_ready_ok!(svc.poll_ready());
        let response = task::spawn(svc.call("first"));
        assert_request_eq!(handle, "first").send_response("ok");
        assert_eq!(response.await.unwrap(), "ok");

        assert_pending!(svc.poll_ready());
        cancel.cancel();
        let error = assert_ready_err!(svc.poll_ready());
        assert_eq!(
            error.downcast_ref::<LimiterError>(),
            Some(&LimiterError::Cancelled)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn clones_share_one_budget() {
        let layer = SlidingWindowLayer::new(limiter(WindowUnit::Seconds, 1));
        let (mut svc, _handle) = mock::spawn_layer::<&'static str, &'static str, _>(layer);
        let mut other = mock::Spawn::new(svc.get_ref().clone());

        assert_ready_ok!(svc.poll_ready());
        assert_pending!(other.poll_ready());
    }
}
