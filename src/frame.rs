//! Interfaces to the two frame producers.
//!
//! Both producers are pull-based and owned by the platform side. A pulled frame is
//! exclusively owned by whoever pulled it and is released by dropping it; the platform
//! surface or buffer behind it must be unlocked in `Drop`.

use std::convert::Infallible;
use std::fmt;

use crate::time::MediaTime;

/// The two logical streams a consumer can request samples for.
#[derive(Eq, PartialEq, Clone, Copy, Debug, Hash)]
pub enum StreamKind {
    Video,
    Audio,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => f.write_str("video"),
            Self::Audio => f.write_str("audio"),
        }
    }
}

/// A frame pulled from a source.
pub trait MediaFrame: Send {
    /// A shared reference to the frame's data that stays valid after the frame itself is
    /// released, e.g. a refcounted surface or an immutable byte buffer.
    type Data: Send + 'static;

    /// Timestamp on the source's own clock. Video frames carry an absolute device-clock
    /// time; audio frames carry a time relative to the start of their graph.
    fn timestamp(&self) -> MediaTime;

    /// Span of media covered by the frame. Video sources that don't know it return zero.
    fn duration(&self) -> MediaTime;

    /// Takes a shared reference to the frame's data.
    fn data(&self) -> Self::Data;
}

/// Blocking producer of video frames over a capture surface.
pub trait VideoFrameSource: Send + Sync {
    type Frame: MediaFrame;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Blocks until the next frame is available.
    ///
    /// Returns `Ok(None)` once the surface has closed, either on its own or because
    /// [`VideoFrameSource::close`] was called.
    fn wait_for_next_frame(&self) -> Result<Option<Self::Frame>, Self::Error>;

    /// Closes the surface. Must be idempotent and must wake every thread blocked in
    /// [`VideoFrameSource::wait_for_next_frame`].
    fn close(&self);
}

/// Non-blocking producer of audio frames over a device-input graph.
pub trait AudioFrameSource: Send + Sync {
    type Frame: MediaFrame;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Starts the graph. Frame timestamps are relative to this moment.
    fn start(&self) -> Result<(), Self::Error>;

    /// Stops the graph.
    fn stop(&self);

    /// Returns the next buffered frame without blocking. When nothing has been captured
    /// yet the frame may have zero duration.
    fn get_frame(&self) -> Result<Self::Frame, Self::Error>;
}

/// Audio source type for sessions that capture video only. It cannot be constructed.
#[derive(Debug)]
pub enum NoAudio {}

impl MediaFrame for NoAudio {
    type Data = ();

    fn timestamp(&self) -> MediaTime {
        match *self {}
    }

    fn duration(&self) -> MediaTime {
        match *self {}
    }

    fn data(&self) -> Self::Data {
        match *self {}
    }
}

impl AudioFrameSource for NoAudio {
    type Frame = Self;
    type Error = Infallible;

    fn start(&self) -> Result<(), Self::Error> {
        match *self {}
    }

    fn stop(&self) {
        match *self {}
    }

    fn get_frame(&self) -> Result<Self::Frame, Self::Error> {
        match *self {}
    }
}
