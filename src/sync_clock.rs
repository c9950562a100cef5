use crate::frame::StreamKind;
use crate::time::MediaTime;

/// The session's shared time origin.
///
/// Video frames carry absolute device-clock timestamps. Audio frames carry timestamps
/// relative to the moment their graph started, and the graph is started right after the
/// first video frame, so audio time is anchored at that frame's timestamp.
///
/// The origin is the first video timestamp plus the relative time of the first audio
/// frame, which lands both streams' first usable samples at or after zero.
#[derive(Eq, PartialEq, Clone, Copy, Debug)]
pub struct SyncClock {
    origin: MediaTime,
    audio_anchor: MediaTime,
}

impl SyncClock {
    /// Origin for a session without audio: the first video timestamp.
    #[must_use]
    pub const fn video_only(first_video: MediaTime) -> Self {
        Self { origin: first_video, audio_anchor: first_video }
    }

    /// Origin for a session with audio. `None` if the sum overflows.
    #[must_use]
    pub const fn with_audio(first_video: MediaTime, first_audio: MediaTime) -> Option<Self> {
        match first_video.checked_add(first_audio) {
            Some(origin) => Some(Self { origin, audio_anchor: first_video }),
            None => None,
        }
    }

    #[must_use]
    #[inline]
    pub const fn origin(&self) -> MediaTime {
        self.origin
    }

    /// Rebases an absolute video timestamp. `None` on overflow.
    #[must_use]
    #[inline]
    pub const fn rebase_video(&self, timestamp: MediaTime) -> Option<MediaTime> {
        timestamp.checked_sub(self.origin)
    }

    /// Rebases a graph-relative audio timestamp. `None` on overflow.
    #[must_use]
    #[inline]
    pub const fn rebase_audio(&self, relative: MediaTime) -> Option<MediaTime> {
        match self.audio_anchor.checked_add(relative) {
            Some(absolute) => absolute.checked_sub(self.origin),
            None => None,
        }
    }

    #[must_use]
    #[inline]
    pub const fn rebase(&self, stream: StreamKind, timestamp: MediaTime) -> Option<MediaTime> {
        match stream {
            StreamKind::Video => self.rebase_video(timestamp),
            StreamKind::Audio => self.rebase_audio(timestamp),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(millis: i64) -> MediaTime {
        MediaTime::from_millis(millis)
    }

    #[test]
    fn video_only_origin_is_first_frame() {
        let clock = SyncClock::video_only(ms(100));
        assert_eq!(clock.origin(), ms(100));
        assert_eq!(clock.rebase_video(ms(100)), Some(ms(0)));
        assert_eq!(clock.rebase_video(ms(133)), Some(ms(33)));
    }

    #[test]
    fn audio_lag_is_added_to_origin() {
        let clock = SyncClock::with_audio(ms(100), ms(5)).unwrap();
        assert_eq!(clock.origin(), ms(105));

        // The handshake frame itself would land before zero, later ones after it.
        assert_eq!(clock.rebase_video(ms(100)), Some(ms(-5)));
        assert_eq!(clock.rebase_video(ms(133)), Some(ms(28)));
        assert_eq!(clock.rebase_video(ms(166)), Some(ms(61)));

        // The first audio frame lands exactly on zero.
        assert_eq!(clock.rebase_audio(ms(5)), Some(ms(0)));
        assert_eq!(clock.rebase_audio(ms(25)), Some(ms(20)));
        assert_eq!(clock.rebase(StreamKind::Audio, ms(45)), Some(ms(40)));
    }

    #[test]
    fn overflow_is_reported() {
        assert_eq!(SyncClock::with_audio(MediaTime::MAX, ms(1)), None);

        let clock = SyncClock::video_only(ms(-1));
        assert_eq!(clock.rebase_video(MediaTime::MAX), None);
    }
}
