use crate::frame::StreamKind;
use crate::time::MediaTime;

/// A unit of media handed to the consumer, stamped on the session's synchronized clock.
#[derive(Clone, Debug)]
pub struct Sample<D> {
    data: D,
    timestamp: MediaTime,
    duration: Option<MediaTime>,
    key_frame: bool,
}

impl<D> Sample<D> {
    #[must_use]
    pub(crate) const fn video(data: D, timestamp: MediaTime) -> Self {
        Self { data, timestamp, duration: None, key_frame: false }
    }

    /// Audio samples are always key frames.
    #[must_use]
    pub(crate) const fn audio(data: D, timestamp: MediaTime, duration: MediaTime) -> Self {
        Self { data, timestamp, duration: Some(duration), key_frame: true }
    }

    #[must_use]
    #[inline]
    pub const fn data(&self) -> &D {
        &self.data
    }

    #[must_use]
    #[inline]
    pub fn into_data(self) -> D {
        self.data
    }

    /// Timestamp relative to the session origin.
    #[must_use]
    #[inline]
    pub const fn timestamp(&self) -> MediaTime {
        self.timestamp
    }

    #[must_use]
    #[inline]
    pub const fn duration(&self) -> Option<MediaTime> {
        self.duration
    }

    #[must_use]
    #[inline]
    pub const fn is_key_frame(&self) -> bool {
        self.key_frame
    }
}

/// Answer to a sample request.
#[derive(Clone, Debug)]
pub enum SampleResponse<V, A> {
    Video(Sample<V>),
    Audio(Sample<A>),
    /// No further samples will be produced for the requested stream.
    EndOfStream,
}

impl<V, A> SampleResponse<V, A> {
    #[must_use]
    #[inline]
    pub const fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::EndOfStream)
    }

    #[must_use]
    #[inline]
    pub const fn stream(&self) -> Option<StreamKind> {
        match self {
            Self::Video(_) => Some(StreamKind::Video),
            Self::Audio(_) => Some(StreamKind::Audio),
            Self::EndOfStream => None,
        }
    }

    #[must_use]
    #[inline]
    pub const fn timestamp(&self) -> Option<MediaTime> {
        match self {
            Self::Video(sample) => Some(sample.timestamp()),
            Self::Audio(sample) => Some(sample.timestamp()),
            Self::EndOfStream => None,
        }
    }

    #[must_use]
    pub fn into_video(self) -> Option<Sample<V>> {
        match self {
            Self::Video(sample) => Some(sample),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_audio(self) -> Option<Sample<A>> {
        match self {
            Self::Audio(sample) => Some(sample),
            _ => None,
        }
    }
}
