use std::fmt;
use std::time::Duration;

/// A point in time or a span, counted in 100-nanosecond ticks.
///
/// This is the unit Windows media APIs use for `TimeSpan`, so values cross the
/// platform boundary without conversion. It is signed because a timestamp rebased
/// against an origin can fall before it.
#[derive(Eq, PartialEq, Ord, PartialOrd, Clone, Copy, Debug, Default, Hash)]
pub struct MediaTime(i64);

impl MediaTime {
    pub const ZERO: Self = Self(0);
    pub const MAX: Self = Self(i64::MAX);
    pub const TICKS_PER_SECOND: i64 = 10_000_000;
    pub const TICKS_PER_MILLISECOND: i64 = 10_000;

    #[must_use]
    #[inline]
    pub const fn from_ticks(ticks: i64) -> Self {
        Self(ticks)
    }

    #[must_use]
    #[inline]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis.saturating_mul(Self::TICKS_PER_MILLISECOND))
    }

    #[must_use]
    #[inline]
    pub const fn from_micros(micros: i64) -> Self {
        Self(micros.saturating_mul(10))
    }

    #[must_use]
    #[inline]
    pub const fn ticks(self) -> i64 {
        self.0
    }

    /// Whole milliseconds, truncated toward zero.
    #[must_use]
    #[inline]
    pub const fn as_millis(self) -> i64 {
        self.0 / Self::TICKS_PER_MILLISECOND
    }

    #[must_use]
    #[inline]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    #[inline]
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    #[must_use]
    #[inline]
    pub const fn checked_add(self, rhs: Self) -> Option<Self> {
        match self.0.checked_add(rhs.0) {
            Some(ticks) => Some(Self(ticks)),
            None => None,
        }
    }

    #[must_use]
    #[inline]
    pub const fn checked_sub(self, rhs: Self) -> Option<Self> {
        match self.0.checked_sub(rhs.0) {
            Some(ticks) => Some(Self(ticks)),
            None => None,
        }
    }

    #[must_use]
    #[inline]
    pub const fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    /// Converts to a [`Duration`], or `None` when negative.
    #[must_use]
    #[inline]
    pub const fn to_duration(self) -> Option<Duration> {
        if self.0 < 0 {
            return None;
        }

        let ticks = self.0 as u64;
        let secs = ticks / Self::TICKS_PER_SECOND as u64;
        let nanos = (ticks % Self::TICKS_PER_SECOND as u64) * 100;
        Some(Duration::new(secs, nanos as u32))
    }
}

impl From<Duration> for MediaTime {
    /// Saturates at [`MediaTime::MAX`].
    #[inline]
    fn from(duration: Duration) -> Self {
        Self(i64::try_from(duration.as_nanos() / 100).unwrap_or(i64::MAX))
    }
}

impl fmt::Display for MediaTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let millis = self.0 as f64 / Self::TICKS_PER_MILLISECOND as f64;
        write!(f, "{millis:.3}ms")
    }
}
