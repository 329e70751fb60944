//! Internal events emitted by the limiter.
//!
//! Each event records its metrics through the `metrics` facade and logs a matching
//! `tracing` record under the `sliding_window::stats` target.

mod sliding_window;

pub use sliding_window::{
    AdmissionCancelled, AdmissionDelayed, AdmissionGranted, AdmissionsExpired,
};

pub trait InternalEvent: Sized {
    fn emit(self);
}

pub fn emit(event: impl InternalEvent) {
    event.emit();
}
