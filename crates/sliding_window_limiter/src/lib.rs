//! Sliding-window rate limiter for outbound HTTP clients
//!
//! This crate caps the number of calls made against a single remote resource to at most
//! `limit` admissions within any trailing window of time (one second, one minute, ...).
//! Callers that hit the cap are suspended until the oldest admission ages out of the
//! window, then re-check and proceed.
//!
//! # Algorithm Overview
//!
//! The limiter keeps an ordered log of admission timestamps, never longer than `limit`:
//! 1. **Free slot**: fewer than `limit` entries in the log, so record `now` and proceed
//! 2. **Expired head**: the oldest entry is at least `window` old, so drop it and re-check
//! 3. **Full window**: sleep until the oldest entry expires, then re-check
//!
//! The window trails continuously from "now", so there is no burst at bucket edges the
//! way a fixed-window counter allows.
//!
//! # Features
//! - Async `acquire()` with cancellation through `tokio_util::sync::CancellationToken`
//! - FIFO admission among concurrent waiters
//! - Injectable [`sliding_window::clock::Clock`] for deterministic tests
//! - `tower` layer so any `Service` can be gated
//! - Reqwest transport service
//!
//! # Basic Usage
//! ```no_run
//! use sliding_window_limiter::sliding_window::{SlidingWindowLimiter, WindowUnit};
//!
//! # async fn run() -> Result<(), sliding_window_limiter::sliding_window::LimiterError> {
//! let limiter = SlidingWindowLimiter::from_unit(WindowUnit::Seconds, 5)?;
//! limiter.acquire().await;
//! // make the call
//! # Ok(())
//! # }
//! ```
//!
//! # Metrics
//! Emits metrics via the `InternalEvent` trait
pub mod sliding_window;

#[macro_use]
extern crate tracing;

pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;
