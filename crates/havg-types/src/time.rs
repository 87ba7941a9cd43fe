use std::fmt;
use std::ops::{Add, Sub};
use std::time;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// A duration wrapper providing convenient conversions.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Duration {
    nanos: u64,
}

impl Duration {
    pub const ZERO: Duration = Duration { nanos: 0 };

    pub fn from_nanos(nanos: u64) -> Self {
        Self { nanos }
    }

    pub fn from_millis(millis: u64) -> Self {
        Self {
            nanos: millis * 1_000_000,
        }
    }

    pub fn from_secs(secs: u64) -> Self {
        Self {
            nanos: secs * 1_000_000_000,
        }
    }

    pub fn as_nanos(&self) -> u64 {
        self.nanos
    }

    pub fn as_millis(&self) -> u64 {
        self.nanos / 1_000_000
    }

    pub fn as_secs(&self) -> u64 {
        self.nanos / 1_000_000_000
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.nanos as f64 / 1_000_000_000.0
    }

    /// Multiply by an integer factor, saturating on overflow.
    pub fn mul(&self, factor: u32) -> Duration {
        Duration {
            nanos: self.nanos.saturating_mul(factor as u64),
        }
    }
}

impl fmt::Debug for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Duration({}ns)", self.nanos)
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nanos >= 1_000_000_000 {
            write!(f, "{:.3}s", self.as_secs_f64())
        } else if self.nanos >= 1_000_000 {
            write!(f, "{}ms", self.as_millis())
        } else {
            write!(f, "{}ns", self.nanos)
        }
    }
}

impl Default for Duration {
    fn default() -> Self {
        Self::ZERO
    }
}

impl From<time::Duration> for Duration {
    fn from(d: time::Duration) -> Self {
        Self {
            nanos: d.as_nanos() as u64,
        }
    }
}

impl From<Duration> for time::Duration {
    fn from(d: Duration) -> Self {
        time::Duration::from_nanos(d.nanos)
    }
}

impl Add for Duration {
    type Output = Duration;
    fn add(self, rhs: Duration) -> Duration {
        Duration {
            nanos: self.nanos + rhs.nanos,
        }
    }
}

impl Sub for Duration {
    type Output = Duration;
    fn sub(self, rhs: Duration) -> Duration {
        Duration {
            nanos: self.nanos.saturating_sub(rhs.nanos),
        }
    }
}

/// A UTC timestamp wrapper around `chrono::DateTime<Utc>`.
///
/// Heartbeat values travel as decimal nanoseconds since the Unix epoch, so
/// the nanosecond accessors are the primary interface.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UtcTime {
    inner: DateTime<Utc>,
}

impl UtcTime {
    /// Get the current UTC time.
    pub fn now() -> Self {
        Self { inner: Utc::now() }
    }

    /// The Unix epoch; used for absent or expired timestamps.
    pub fn epoch() -> Self {
        Self {
            inner: DateTime::<Utc>::default(),
        }
    }

    /// Create from nanoseconds since the Unix epoch.
    pub fn from_timestamp_nanos(nanos: i64) -> Self {
        Self {
            inner: Utc.timestamp_nanos(nanos),
        }
    }

    /// Nanoseconds since the Unix epoch.
    ///
    /// Saturates rather than failing for dates outside the representable
    /// range (year 1678 to 2262).
    pub fn timestamp_nanos(&self) -> i64 {
        self.inner.timestamp_nanos_opt().unwrap_or(i64::MAX)
    }

    /// Seconds since the Unix epoch.
    pub fn timestamp(&self) -> i64 {
        self.inner.timestamp()
    }

    /// The elapsed duration from `earlier` to `self`, zero if negative.
    pub fn since(&self, earlier: UtcTime) -> Duration {
        let delta = self.timestamp_nanos() - earlier.timestamp_nanos();
        Duration::from_nanos(delta.max(0) as u64)
    }
}

impl fmt::Debug for UtcTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UtcTime({})", self.inner.to_rfc3339())
    }
}

impl fmt::Display for UtcTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.to_rfc3339())
    }
}

impl Default for UtcTime {
    fn default() -> Self {
        Self::epoch()
    }
}

impl From<DateTime<Utc>> for UtcTime {
    fn from(dt: DateTime<Utc>) -> Self {
        Self { inner: dt }
    }
}
