use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{
    LimiterError, SlidingWindowSettings, WindowUnit,
    clock::{Clock, SystemClock},
    internal_event::{
        AdmissionCancelled, AdmissionDelayed, AdmissionGranted, AdmissionsExpired, emit,
    },
};

// Upper bound for the up-front allocation of the admission log.
const MAX_PREALLOCATED_SLOTS: usize = 1024;

/// Outcome of a single admission attempt against the log.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Admission {
    Granted { in_window: usize },
    Wait(Duration),
}

/// Caps admissions to `limit` per trailing `window`.
///
/// Callers `acquire()` before each outbound call. When the window is full the caller
/// is suspended until the oldest admission expires, then the log is checked again
/// before the caller is recorded, so the cap holds no matter how many tasks share the
/// limiter.
///
/// Waiters line up on a fair async mutex; only the waiter at the front of the line
/// inspects the log and sleeps, so admission happens in arrival order.
///
/// An admission expires once it is *at least* `window` old: with `limit = 1` and a
/// one second window, a call admitted at `t` frees its slot at exactly `t + 1s`.
pub struct SlidingWindowLimiter<C = SystemClock> {
    settings: SlidingWindowSettings,
    clock: C,
    queue: tokio::sync::Mutex<()>,
    log: Mutex<VecDeque<Instant>>,
}

impl SlidingWindowLimiter<SystemClock> {
    pub fn new(settings: SlidingWindowSettings) -> Result<Self, LimiterError> {
        Self::with_clock(settings, SystemClock)
    }

    /// Builds a limiter admitting `limit` calls per one `unit` of time.
    pub fn from_unit(unit: WindowUnit, limit: usize) -> Result<Self, LimiterError> {
        Self::new(SlidingWindowSettings::from_unit(unit, limit))
    }
}

impl<C: Clock> SlidingWindowLimiter<C> {
    pub fn with_clock(settings: SlidingWindowSettings, clock: C) -> Result<Self, LimiterError> {
        settings.validate()?;

        debug!(
            target: "sliding_window_limiter::limiter",
            limit = settings.limit,
            window_ms = settings.window.as_millis(),
            "Sliding window limiter created"
        );

        Ok(Self {
            settings,
            clock,
            queue: tokio::sync::Mutex::new(()),
            log: Mutex::new(VecDeque::with_capacity(
                settings.limit.min(MAX_PREALLOCATED_SLOTS),
            )),
        })
    }

    pub fn settings(&self) -> &SlidingWindowSettings {
        &self.settings
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Waits until the call may proceed and records the admission.
    ///
    /// Dropping the returned future abandons the wait without consuming a slot.
    pub async fn acquire(&self) {
        // Nobody else holds this token, so the wait can only end in admission.
        let never = CancellationToken::new();
        let admitted = self.acquire_with_cancel(&never).await;
        debug_assert!(admitted.is_ok());
    }

    /// Like [`acquire`](Self::acquire), but gives up with [`LimiterError::Cancelled`]
    /// as soon as `cancel` fires, whether the caller is still queued behind other
    /// waiters or sleeping for the window to open.
    ///
    /// A token that is already cancelled fails the call without taking a slot.
    pub async fn acquire_with_cancel(&self, cancel: &CancellationToken) -> Result<(), LimiterError> {
        let started = self.clock.now();

        let _turn = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(self.cancelled(started)),
            turn = self.queue.lock() => turn,
        };

        loop {
            let now = self.clock.now();
            match self.try_admit(now) {
                Admission::Granted { in_window } => {
                    emit(AdmissionGranted {
                        waited: now.saturating_duration_since(started),
                        in_window,
                        limit: self.settings.limit,
                    });
                    return Ok(());
                }
                Admission::Wait(delay) => {
                    emit(AdmissionDelayed {
                        delay,
                        limit: self.settings.limit,
                    });
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(self.cancelled(started)),
                        _ = self.clock.sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Admits the caller only if a slot is free right now and nobody is waiting.
    pub fn try_acquire(&self) -> bool {
        let Ok(_turn) = self.queue.try_lock() else {
            return false;
        };

        match self.try_admit(self.clock.now()) {
            Admission::Granted { in_window } => {
                emit(AdmissionGranted {
                    waited: Duration::ZERO,
                    in_window,
                    limit: self.settings.limit,
                });
                true
            }
            Admission::Wait(_) => false,
        }
    }

    /// Number of admissions still inside the trailing window.
    pub fn in_window(&self) -> usize {
        let now = self.clock.now();
        let mut log = self.lock_log();
        self.evict_expired(&mut log, now);
        log.len()
    }

    fn try_admit(&self, now: Instant) -> Admission {
        let mut log = self.lock_log();
        self.evict_expired(&mut log, now);

        if log.len() < self.settings.limit {
            log.push_back(now);
            return Admission::Granted {
                in_window: log.len(),
            };
        }

        // The log is full, so it has a head and that head is still inside the window.
        let age = log
            .front()
            .map_or(Duration::ZERO, |head| now.saturating_duration_since(*head));
        Admission::Wait(self.settings.window.saturating_sub(age))
    }

    fn evict_expired(&self, log: &mut VecDeque<Instant>, now: Instant) {
        let mut expired = 0;
        while let Some(head) = log.front() {
            if now.saturating_duration_since(*head) >= self.settings.window {
                log.pop_front();
                expired += 1;
            } else {
                break;
            }
        }
        emit(AdmissionsExpired { count: expired });
    }

    fn cancelled(&self, started: Instant) -> LimiterError {
        emit(AdmissionCancelled {
            waited: self.clock.now().saturating_duration_since(started),
        });
        LimiterError::Cancelled
    }

    fn lock_log(&self) -> MutexGuard<'_, VecDeque<Instant>> {
        // The log is valid after any panic in a critical section: every mutation is a
        // single push or pop.
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C> std::fmt::Debug for SlidingWindowLimiter<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlidingWindowLimiter")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    use super::*;
    use crate::sliding_window::mocks::MockClock;

    fn mock_limiter(limit: usize, window: Duration) -> (SlidingWindowLimiter<MockClock>, MockClock) {
        let clock = MockClock::new(Instant::now());
        let settings = SlidingWindowSettings::builder()
            .limit(limit)
            .window(window)
            .build();
        let limiter = SlidingWindowLimiter::with_clock(settings, clock.clone()).unwrap();
        (limiter, clock)
    }

    #[tokio::test]
    async fn under_limit_never_waits() {
        let (limiter, clock) = mock_limiter(3, Duration::from_secs(1));
        let start = clock.now();

        for _ in 0..3 {
            limiter.acquire().await;
        }

        assert_eq!(clock.now(), start);
        assert_eq!(limiter.in_window(), 3);
    }

    #[tokio::test]
    async fn second_call_waits_a_full_window() {
        let (limiter, clock) = mock_limiter(1, Duration::from_secs(1));
        let start = clock.now();

        limiter.acquire().await;
        limiter.acquire().await;

        assert_eq!(clock.now(), start + Duration::from_secs(1));
    }

    #[tokio::test]
    async fn expired_slot_is_reused_without_waiting() {
        let (limiter, clock) = mock_limiter(2, Duration::from_secs(1));
        let start = clock.now();

        limiter.acquire().await;
        clock.advance(Duration::from_millis(600));
        limiter.acquire().await;
        clock.advance(Duration::from_millis(500));

        // The first admission is 1.1s old and frees its slot immediately.
        limiter.acquire().await;
        assert_eq!(clock.now(), start + Duration::from_millis(1100));

        // The second one is only 0.5s old, so this call sleeps out the rest of it.
        limiter.acquire().await;
        assert_eq!(clock.now(), start + Duration::from_millis(1600));
    }

    #[tokio::test]
    async fn admission_expires_at_exactly_one_window() {
        let (limiter, clock) = mock_limiter(1, Duration::from_secs(1));

        assert!(limiter.try_acquire());
        clock.advance(Duration::from_millis(999));
        assert!(!limiter.try_acquire());
        clock.advance(Duration::from_millis(1));
        assert!(limiter.try_acquire());
    }

    #[tokio::test]
    async fn equal_timestamps_are_distinct_admissions() {
        let (limiter, clock) = mock_limiter(2, Duration::from_secs(1));
        let start = clock.now();

        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        assert_eq!(limiter.in_window(), 2);
        assert_eq!(clock.now(), start);
    }

    #[test]
    fn try_admit_reports_remaining_wait() {
        let (limiter, clock) = mock_limiter(1, Duration::from_secs(1));
        let start = clock.now();

        assert_eq!(
            limiter.try_admit(start),
            Admission::Granted { in_window: 1 }
        );
        assert_eq!(
            limiter.try_admit(start + Duration::from_millis(300)),
            Admission::Wait(Duration::from_millis(700))
        );
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let err = SlidingWindowLimiter::from_unit(WindowUnit::Seconds, 0).unwrap_err();
        assert!(matches!(err, LimiterError::InvalidConfig { .. }));
    }

    #[tokio::test]
    async fn cancelled_token_fails_without_taking_a_slot() {
        let (limiter, _clock) = mock_limiter(1, Duration::from_secs(1));
        let token = CancellationToken::new();
        token.cancel();

        assert_eq!(
            limiter.acquire_with_cancel(&token).await,
            Err(LimiterError::Cancelled)
        );
        assert_eq!(limiter.in_window(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_a_blocked_waiter_releases_it() {
        let limiter = Arc::new(SlidingWindowLimiter::from_unit(WindowUnit::Minutes, 1).unwrap());
        limiter.acquire().await;

        let token = CancellationToken::new();
        let waiter = {
            let limiter = Arc::clone(&limiter);
            let token = token.clone();
            tokio::spawn(async move { limiter.acquire_with_cancel(&token).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());
        token.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("cancelled waiter should return promptly")
            .unwrap();
        assert_eq!(result, Err(LimiterError::Cancelled));
        assert_eq!(limiter.in_window(), 1);
    }

    #[test]
    fn admissions_are_counted_in_metrics() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            tokio_test::block_on(async {
                let (limiter, _clock) = mock_limiter(1, Duration::from_secs(1));
                limiter.acquire().await;
                limiter.acquire().await;
            })
        });

        let counters: Vec<(String, u64)> = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .filter_map(|(key, _, _, value)| match value {
                DebugValue::Counter(count) => Some((key.key().name().to_string(), count)),
                _ => None,
            })
            .collect();

        assert!(counters.contains(&("sliding_window_admissions_total".to_string(), 2)));
        assert!(counters.contains(&("sliding_window_delays_total".to_string(), 1)));
        assert!(counters.contains(&("sliding_window_expired_total".to_string(), 1)));
    }
}
