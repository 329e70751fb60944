use std::time::Duration;

use metrics::{counter, gauge, histogram};

use super::InternalEvent;

/// A caller was admitted, possibly after waiting for capacity.
#[derive(Clone, Copy, Debug)]
pub struct AdmissionGranted {
    pub waited: Duration,
    pub in_window: usize,
    pub limit: usize,
}

impl InternalEvent for AdmissionGranted {
    fn emit(self) {
        counter!("sliding_window_admissions_total").increment(1);
        // Zero waits are recorded too.
        histogram!("sliding_window_wait_seconds").record(self.waited);
        gauge!("sliding_window_in_window").set(self.in_window as f64);

        tracing::debug!(
            target: "sliding_window::stats",
            waited_ms = self.waited.as_millis(),
            in_window = self.in_window,
            limit = self.limit,
            "Admission granted"
        );
    }
}

/// The window was full; the queue head goes to sleep until the oldest slot expires.
#[derive(Clone, Copy, Debug)]
pub struct AdmissionDelayed {
    pub delay: Duration,
    pub limit: usize,
}

impl InternalEvent for AdmissionDelayed {
    fn emit(self) {
        counter!("sliding_window_delays_total").increment(1);

        tracing::debug!(
            target: "sliding_window::stats",
            delay_ms = self.delay.as_millis(),
            limit = self.limit,
            "Window full, waiting for the oldest admission to expire"
        );
    }
}

/// Admissions aged out of the trailing window and were dropped from the log.
#[derive(Clone, Copy, Debug)]
pub struct AdmissionsExpired {
    pub count: usize,
}

impl InternalEvent for AdmissionsExpired {
    fn emit(self) {
        if self.count == 0 {
            return;
        }
        counter!("sliding_window_expired_total").increment(self.count as u64);
        tracing::trace!(target: "sliding_window::stats", expired = self.count, "Expired admissions evicted");
    }
}

/// A waiter gave up before it was admitted.
#[derive(Clone, Copy, Debug)]
pub struct AdmissionCancelled {
    pub waited: Duration,
}

impl InternalEvent for AdmissionCancelled {
    fn emit(self) {
        counter!("sliding_window_cancellations_total").increment(1);

        tracing::info!(
            target: "sliding_window::stats",
            waited_ms = self.waited.as_millis(),
            "Admission wait cancelled"
        );
    }
}
