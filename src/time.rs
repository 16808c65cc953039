//! Simulated time (spec §3, `SimTime`).
//!
//! A [`SimTime`] is a 64-bit count of nanoseconds since the start of the
//! simulation. `INVALID` is a sentinel past the end of any value a
//! scheduled event may legally carry.

use std::fmt;
use std::ops::{Add, AddAssign, Sub};
use std::time::Duration;

/// `timespec`-shaped record used at the syscall-interception boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeSpec {
    pub seconds: i64,
    pub nanoseconds: i64,
}

/// `timeval`-shaped record used at the syscall-interception boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeVal {
    pub seconds: i64,
    pub microseconds: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SimTime(u64);

impl SimTime {
    /// Sentinel value past the end of any legal scheduled time.
    pub const INVALID: SimTime = SimTime(u64::MAX);
    pub const ZERO: SimTime = SimTime(0);

    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    pub fn checked_add(self, duration: Duration) -> Option<Self> {
        if self == Self::INVALID {
            return Some(self);
        }
        self.0
            .checked_add(duration.as_nanos() as u64)
            .map(Self)
            .filter(|t| *t != Self::INVALID)
    }

    pub fn saturating_add(self, duration: Duration) -> Self {
        self.checked_add(duration).unwrap_or(Self::INVALID)
    }

    pub fn saturating_sub(self, other: Self) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(other.0))
    }

    pub fn to_timespec(self) -> TimeSpec {
        TimeSpec {
            seconds: (self.0 / 1_000_000_000) as i64,
            nanoseconds: (self.0 % 1_000_000_000) as i64,
        }
    }

    pub fn to_timeval(self) -> TimeVal {
        TimeVal {
            seconds: (self.0 / 1_000_000_000) as i64,
            microseconds: ((self.0 % 1_000_000_000) / 1_000) as i64,
        }
    }

    pub fn from_timespec(ts: TimeSpec) -> Self {
        Self((ts.seconds as u64) * 1_000_000_000 + ts.nanoseconds as u64)
    }

    pub fn from_timeval(tv: TimeVal) -> Self {
        Self((tv.seconds as u64) * 1_000_000_000 + (tv.microseconds as u64) * 1_000)
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "INVALID")
        } else {
            write!(f, "{}ns", self.0)
        }
    }
}

impl Add<Duration> for SimTime {
    type Output = SimTime;
    fn add(self, rhs: Duration) -> SimTime {
        self.saturating_add(rhs)
    }
}

impl AddAssign<Duration> for SimTime {
    fn add_assign(&mut self, rhs: Duration) {
        *self = *self + rhs;
    }
}

impl Sub for SimTime {
    type Output = Duration;
    fn sub(self, rhs: SimTime) -> Duration {
        self.saturating_sub(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_is_past_every_legal_time() {
        assert!(SimTime::from_nanos(u64::MAX - 1) < SimTime::INVALID);
    }

    #[test]
    fn timespec_roundtrip() {
        let t = SimTime::from_nanos(1_234_567_890_123);
        assert_eq!(SimTime::from_timespec(t.to_timespec()), t);
    }

    #[test]
    fn timeval_roundtrip_truncates_to_microseconds() {
        let t = SimTime::from_nanos(1_000_000_500); // 1.0000005s, truncates sub-us part
        let back = SimTime::from_timeval(t.to_timeval());
        assert_eq!(back, SimTime::from_nanos(1_000_000_000));
    }

    #[test]
    fn saturating_add_caps_at_invalid() {
        let near_max = SimTime::from_nanos(u64::MAX - 10);
        assert_eq!(
            near_max.saturating_add(Duration::from_nanos(1000)),
            SimTime::INVALID
        );
    }
}
