//! Wall-clock timestamps for messages and skew estimation.
//!
//! Timestamps travel between processes, so they are seconds since the UNIX
//! epoch rather than a monotonic tick. Reads go through `minstant`, anchored
//! once to wall time, which keeps `now()` cheap on the writer's hot path.

use std::fmt;
use std::ops::{Add, Sub};

use minstant::{Anchor, Instant};
use serde::{Deserialize, Serialize};

/// Seconds since the UNIX epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(f64);

impl Timestamp {
    /// The epoch itself; used as "never" by the heartbeat gate.
    pub const ZERO: Self = Self(0.0);

    /// Creates a timestamp from seconds since the epoch.
    #[inline]
    #[must_use]
    pub const fn from_secs(secs: f64) -> Self {
        Self(secs)
    }

    /// Returns seconds since the epoch.
    #[inline]
    #[must_use]
    pub const fn as_secs(self) -> f64 {
        self.0
    }

    /// Seconds elapsed from `earlier` to `self` (negative if `earlier` is later).
    #[inline]
    #[must_use]
    pub fn secs_since(self, earlier: Self) -> f64 {
        self.0 - earlier.0
    }
}

impl Add<f64> for Timestamp {
    type Output = Self;
    #[inline]
    fn add(self, secs: f64) -> Self::Output {
        Self(self.0 + secs)
    }
}

impl Sub<f64> for Timestamp {
    type Output = Self;
    #[inline]
    fn sub(self, secs: f64) -> Self::Output {
        Self(self.0 - secs)
    }
}

impl From<f64> for Timestamp {
    fn from(secs: f64) -> Self {
        Self(secs)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}s", self.0)
    }
}

/// Local wall clock backed by the TSC where available.
pub struct LocalClock {
    anchor: Anchor,
}

impl LocalClock {
    /// Anchors a new clock to the current wall time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            anchor: Anchor::new(),
        }
    }

    /// Current local time.
    #[must_use]
    pub fn now(&self) -> Timestamp {
        let nanos = Instant::now().as_unix_nanos(&self.anchor);
        Timestamp(nanos as f64 / 1e9)
    }
}

impl Default for LocalClock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LocalClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalClock").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    #[test]
    fn clock_tracks_system_time() {
        let clock = LocalClock::new();
        let system = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs_f64();
        assert!((clock.now().as_secs() - system).abs() < 1.0);
    }

    #[test]
    fn clock_advances() {
        let clock = LocalClock::new();
        let a = clock.now();
        std::thread::sleep(Duration::from_millis(10));
        let b = clock.now();
        assert!(b.secs_since(a) > 0.005);
    }

    #[test]
    fn timestamp_arithmetic() {
        let t = Timestamp::from_secs(100.0);
        assert_eq!((t + 2.5).as_secs(), 102.5);
        assert_eq!((t - 0.5).as_secs(), 99.5);
        assert_eq!(Timestamp::from_secs(103.0).secs_since(t), 3.0);
        assert!(Timestamp::ZERO < t);
    }
}
