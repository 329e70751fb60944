//! Limit the number of requests started within any trailing time window.

pub mod clock;
pub mod future;
pub mod http;
pub mod internal_event;
pub mod layer;
pub mod limiter;
#[cfg(any(test, feature = "test-helpers"))]
pub mod mocks;
pub mod reqwest_integration;
pub mod service;

use std::{str::FromStr, time::Duration};

use bon::Builder;
use snafu::{Snafu, ensure};

pub use clock::{Clock, SystemClock};
pub use layer::SlidingWindowLayer;
pub use limiter::SlidingWindowLimiter;
pub use service::SlidingWindow;

/// Errors produced by the limiter itself.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum LimiterError {
    /// The caller's wait for admission was cancelled before a slot freed up.
    #[snafu(display("Waiting for admission was cancelled"))]
    Cancelled,

    /// The limiter was constructed with a zero limit or an empty window.
    #[snafu(display("Invalid limiter configuration: {reason}"))]
    InvalidConfig { reason: String },

    #[snafu(display("Unknown window unit '{value}'"))]
    UnknownWindowUnit { value: String },
}

/// Length of the trailing window, expressed as a single unit of time.
///
/// A limiter built from `(WindowUnit::Minutes, 10)` admits at most ten calls in
/// any sixty second stretch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum WindowUnit {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    #[default]
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl WindowUnit {
    /// The duration of one unit.
    pub const fn duration(self) -> Duration {
        match self {
            WindowUnit::Nanoseconds => Duration::from_nanos(1),
            WindowUnit::Microseconds => Duration::from_micros(1),
            WindowUnit::Milliseconds => Duration::from_millis(1),
            WindowUnit::Seconds => Duration::from_secs(1),
            WindowUnit::Minutes => Duration::from_secs(60),
            WindowUnit::Hours => Duration::from_secs(60 * 60),
            WindowUnit::Days => Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl FromStr for WindowUnit {
    type Err = LimiterError;

    /// Accepts the unit name in singular or plural form, or its short symbol
    /// (`ns`, `us`, `ms`, `s`, `m`, `h`, `d`). Case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unit = match s.trim().to_ascii_lowercase().as_str() {
            "ns" | "nanosecond" | "nanoseconds" => WindowUnit::Nanoseconds,
            "us" | "microsecond" | "microseconds" => WindowUnit::Microseconds,
            "ms" | "millisecond" | "milliseconds" => WindowUnit::Milliseconds,
            "s" | "sec" | "second" | "seconds" => WindowUnit::Seconds,
            "m" | "min" | "minute" | "minutes" => WindowUnit::Minutes,
            "h" | "hour" | "hours" => WindowUnit::Hours,
            "d" | "day" | "days" => WindowUnit::Days,
            _ => {
                return UnknownWindowUnitSnafu {
                    value: s.to_string(),
                }
                .fail();
            }
        };
        Ok(unit)
    }
}

/// Configuration of the sliding window.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use sliding_window_limiter::sliding_window::SlidingWindowSettings;
///
/// let settings = SlidingWindowSettings::builder()
///     .limit(10)
///     .window(Duration::from_secs(60))
///     .build();
/// assert!(settings.validate().is_ok());
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Builder)]
pub struct SlidingWindowSettings {
    /// Maximum number of admissions inside any trailing window. Must be positive.
    pub(super) limit: usize,

    /// Length of the trailing window. Must be non-zero.
    pub(super) window: Duration,
}

impl SlidingWindowSettings {
    pub fn from_unit(unit: WindowUnit, limit: usize) -> Self {
        Self {
            limit,
            window: unit.duration(),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Rejects a zero limit or a zero-length window.
    pub fn validate(&self) -> Result<(), LimiterError> {
        ensure!(
            self.limit > 0,
            InvalidConfigSnafu {
                reason: "limit must be a positive integer",
            }
        );
        ensure!(
            !self.window.is_zero(),
            InvalidConfigSnafu {
                reason: "window must be a positive duration",
            }
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_durations() {
        assert_eq!(WindowUnit::Seconds.duration(), Duration::from_secs(1));
        assert_eq!(WindowUnit::Minutes.duration(), Duration::from_secs(60));
        assert_eq!(WindowUnit::Days.duration(), Duration::from_secs(86_400));
        assert_eq!(WindowUnit::Nanoseconds.duration(), Duration::from_nanos(1));
    }

    #[test]
    fn parse_unit_names() {
        assert_eq!("second".parse::<WindowUnit>(), Ok(WindowUnit::Seconds));
        assert_eq!("MINUTES".parse::<WindowUnit>(), Ok(WindowUnit::Minutes));
        assert_eq!(" ms ".parse::<WindowUnit>(), Ok(WindowUnit::Milliseconds));
        assert_eq!(
            "fortnight".parse::<WindowUnit>(),
            Err(LimiterError::UnknownWindowUnit {
                value: "fortnight".to_string()
            })
        );
    }

    #[test]
    fn zero_limit_is_rejected() {
        let settings = SlidingWindowSettings::from_unit(WindowUnit::Seconds, 0);
        assert!(matches!(
            settings.validate(),
            Err(LimiterError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn zero_window_is_rejected() {
        let settings = SlidingWindowSettings::builder()
            .limit(3)
            .window(Duration::ZERO)
            .build();
        assert!(matches!(
            settings.validate(),
            Err(LimiterError::InvalidConfig { .. })
        ));
    }
}
