//! Monotonic clock adapter.
//!
//! Converts the platform's high-resolution counter into [`MediaTime`] values that both
//! frame sources can share. The origin of this clock is fixed the first time it is read
//! anywhere in the process, so values from different sessions stay comparable.
//!
//! On Windows the counter is `QueryPerformanceCounter`, the same counter the capture
//! frame pool stamps frames with. Elsewhere it is [`std::time::Instant`].

use std::sync::OnceLock;
use std::time::Instant;

use crate::time::MediaTime;

static ORIGIN: OnceLock<Origin> = OnceLock::new();

struct Origin {
    instant: Instant,
    #[cfg(windows)]
    counter: i64,
    #[cfg(windows)]
    frequency: i64,
}

impl Origin {
    fn get() -> &'static Self {
        ORIGIN.get_or_init(|| {
            log::trace!("Establishing process clock origin");

            #[cfg(windows)]
            {
                let (counter, frequency) = performance_counter::read();
                Self { instant: Instant::now(), counter, frequency }
            }

            #[cfg(not(windows))]
            {
                Self { instant: Instant::now() }
            }
        })
    }
}

/// Converts a raw counter reading at `frequency` Hz into 100 ns ticks.
///
/// The whole-second part is scaled separately from the remainder so large counter
/// values don't overflow during the multiplication. Results beyond the tick range saturate.
/// A non-positive frequency yields 0.
#[must_use]
#[inline]
pub const fn counter_to_ticks(counter: i64, frequency: i64) -> i64 {
    if frequency <= 0 {
        return 0;
    }

    let whole = counter / frequency;
    let remainder = counter % frequency;
    let fraction = (remainder as i128 * MediaTime::TICKS_PER_SECOND as i128 / frequency as i128) as i64;
    whole.saturating_mul(MediaTime::TICKS_PER_SECOND).saturating_add(fraction)
}

/// Time elapsed since the process clock origin.
///
/// The first call anywhere in the process fixes the origin and returns (close to) zero.
#[must_use]
pub fn now() -> MediaTime {
    let origin = Origin::get();

    #[cfg(windows)]
    {
        let (counter, _) = performance_counter::read();
        MediaTime::from_ticks(counter_to_ticks(counter - origin.counter, origin.frequency))
    }

    #[cfg(not(windows))]
    {
        MediaTime::from(origin.instant.elapsed())
    }
}

/// Places an [`Instant`] on the process clock. Instants taken before the origin
/// clamp to zero.
#[must_use]
pub fn from_instant(instant: Instant) -> MediaTime {
    let origin = Origin::get();
    MediaTime::from(instant.saturating_duration_since(origin.instant))
}

/// Places a system-relative timestamp (100 ns ticks of the performance counter, as found
/// in `Direct3D11CaptureFrame::SystemRelativeTime`) on the process clock.
#[cfg(windows)]
#[must_use]
pub fn from_system_relative(ticks: i64) -> MediaTime {
    let origin = Origin::get();
    let origin_ticks = counter_to_ticks(origin.counter, origin.frequency);
    MediaTime::from_ticks(ticks.saturating_sub(origin_ticks))
}

#[cfg(windows)]
mod performance_counter {
    use windows::Win32::System::Performance::{QueryPerformanceCounter, QueryPerformanceFrequency};

    /// Returns `(counter, frequency)`. Both calls cannot fail on Windows XP and later.
    pub fn read() -> (i64, i64) {
        let mut counter = 0;
        let mut frequency = 0;
        unsafe {
            let _ = QueryPerformanceCounter(&mut counter);
            let _ = QueryPerformanceFrequency(&mut frequency);
        }
        (counter, frequency)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn counter_conversion_is_exact_at_tick_frequency() {
        assert_eq!(counter_to_ticks(123_456_789, 10_000_000), 123_456_789);
    }

    #[test]
    fn counter_conversion_scales_other_frequencies() {
        // 3 MHz: one second and a half.
        assert_eq!(counter_to_ticks(4_500_000, 3_000_000), 15_000_000);
        // 24 MHz: 1 ms.
        assert_eq!(counter_to_ticks(24_000, 24_000_000), 10_000);
    }

    #[test]
    fn counter_conversion_does_not_overflow_on_long_uptimes() {
        // Roughly 30 days at 24 MHz.
        let counter = 24_000_000_i64 * 60 * 60 * 24 * 30;
        assert_eq!(counter_to_ticks(counter, 24_000_000), 10_000_000 * 60 * 60 * 24 * 30);
    }

    #[test]
    fn counter_conversion_saturates_at_low_frequencies() {
        assert_eq!(counter_to_ticks(i64::MAX, 1), i64::MAX);
        assert_eq!(counter_to_ticks(i64::MIN, 1), i64::MIN);
        assert_eq!(counter_to_ticks(i64::MAX - 1, i64::MAX), 9_999_999);
    }

    #[test]
    fn counter_conversion_rejects_bad_frequency() {
        assert_eq!(counter_to_ticks(1000, 0), 0);
        assert_eq!(counter_to_ticks(1000, -1), 0);
    }

    #[test]
    fn now_is_monotonic() {
        let a = now();
        thread::sleep(Duration::from_millis(2));
        let b = now();
        assert!(!a.is_negative());
        assert!(b > a);
    }

    #[test]
    fn instants_share_the_origin() {
        let instant = Instant::now();
        let placed = from_instant(instant);
        assert!(placed <= now());
    }
}
