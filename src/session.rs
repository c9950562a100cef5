use std::error::Error;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use log::{debug, info, warn};

use crate::frame::{AudioFrameSource, NoAudio, VideoFrameSource};
use crate::lifecycle::RecordingState;
use crate::multiplexer::{Multiplexer, StartupError};
use crate::ready::Ready;
use crate::settings::SessionSettings;

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    /// The startup handshake was already run on this session.
    #[error("Session has already been started")]
    AlreadyStarted,
    /// An encode is already running on this session.
    #[error("An encode is already running on this session")]
    AlreadyEncoding,
    /// The session is closing or closed.
    #[error("Session is closed")]
    Closed,
    #[error("Session failed to start: {0}")]
    Startup(#[from] StartupError),
    /// The consumer returned an error.
    #[error("Consumer failed: {0}")]
    Consumer(Box<dyn Error + Send + Sync>),
    #[error("Failed to spawn the encode thread: {0}")]
    ThreadSpawn(io::Error),
    #[error("Encode thread panicked")]
    EncodeThreadPanicked,
}

/// Process-wide session identifier, used to tell sessions apart in logs.
#[derive(Eq, PartialEq, Ord, PartialOrd, Clone, Copy, Debug, Hash)]
pub struct SessionId(u64);

impl SessionId {
    /// Allocates the next identifier. Identifiers start at 1 and are never reused.
    #[must_use]
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// The transcoding stage that drains a session.
///
/// An implementation calls [`Multiplexer::starting`] once, then
/// [`Multiplexer::request_sample`] per stream until it receives end of stream, and
/// returns when its output is finalized. The multiplexer is handed out as an [`Arc`] so
/// platform callbacks can hold on to it.
pub trait MediaConsumer<V: VideoFrameSource, A: AudioFrameSource> {
    type Error: Error + Send + Sync + 'static;

    /// Drains the multiplexer. Called once per encode.
    fn consume(&mut self, source: &Arc<Multiplexer<V, A>>) -> Result<(), Self::Error>;
}

/// A capture session: a [`Multiplexer`] plus the encode operations that drive it.
///
/// Dropping the session stops it. A background encode keeps the multiplexer alive until
/// it finishes, but sees end of stream from then on.
pub struct CaptureSession<V: VideoFrameSource, A: AudioFrameSource = NoAudio> {
    multiplexer: Arc<Multiplexer<V, A>>,
}

impl<V: VideoFrameSource> CaptureSession<V, NoAudio> {
    /// Creates a session without an audio stream.
    #[must_use]
    pub fn video_only(video: V, settings: SessionSettings) -> Self {
        Self::new(video, None, settings)
    }
}

impl<V: VideoFrameSource, A: AudioFrameSource> CaptureSession<V, A> {
    #[must_use]
    pub fn new(video: V, audio: Option<A>, settings: SessionSettings) -> Self {
        let id = SessionId::next();
        info!("[{id}] Created capture session (audio: {})", audio.is_some());

        Self { multiplexer: Arc::new(Multiplexer::with_id(id, video, audio, settings)) }
    }

    #[must_use]
    #[inline]
    pub fn id(&self) -> SessionId {
        self.multiplexer.id()
    }

    #[must_use]
    #[inline]
    pub fn state(&self) -> RecordingState {
        self.multiplexer.state()
    }

    /// Resolves with the session origin once recording starts.
    #[must_use]
    #[inline]
    pub fn ready(&self) -> Ready {
        self.multiplexer.ready()
    }

    #[must_use]
    #[inline]
    pub const fn multiplexer(&self) -> &Arc<Multiplexer<V, A>> {
        &self.multiplexer
    }

    /// Runs `consumer` over this session on the current thread and returns once it
    /// finishes. The session is closed afterwards.
    ///
    /// # Errors
    ///
    /// - [`SessionError::AlreadyEncoding`] when another encode is running
    /// - [`SessionError::Closed`] when the session was stopped
    /// - [`SessionError::Consumer`] when the consumer fails
    pub fn encode<C: MediaConsumer<V, A>>(&self, consumer: &mut C) -> Result<(), SessionError> {
        self.multiplexer.begin_encode()?;
        drive(&self.multiplexer, consumer)
    }

    /// Like [`CaptureSession::encode`], on a dedicated thread.
    ///
    /// # Errors
    ///
    /// Fails up front for the same usage errors as [`CaptureSession::encode`], or when the
    /// thread cannot be spawned. Consumer errors are returned by [`EncodeHandle::wait`].
    pub fn encode_in_background<C>(&self, mut consumer: C) -> Result<EncodeHandle, SessionError>
    where
        C: MediaConsumer<V, A> + Send + 'static,
        V: 'static,
        A: 'static,
    {
        // Marked before the thread exists so a stop in between still defers the release.
        self.multiplexer.begin_encode()?;

        let id = self.id();
        let multiplexer = self.multiplexer.clone();
        let thread = thread::Builder::new()
            .name(format!("{id}-encode"))
            .spawn(move || drive(&multiplexer, &mut consumer));

        match thread {
            Ok(thread) => Ok(EncodeHandle { id, thread }),
            Err(e) => {
                self.multiplexer.end_encode();
                Err(SessionError::ThreadSpawn(e))
            }
        }
    }

    /// Stops the session. Idempotent.
    pub fn stop(&self) {
        self.multiplexer.close();
    }
}

impl<V: VideoFrameSource, A: AudioFrameSource> Drop for CaptureSession<V, A> {
    fn drop(&mut self) {
        self.stop();
    }
}

// Reports the consumer's pipe as closed and ends the encode, even if the consumer panics.
struct EncodeGuard<'a, V: VideoFrameSource, A: AudioFrameSource> {
    multiplexer: &'a Multiplexer<V, A>,
}

impl<V: VideoFrameSource, A: AudioFrameSource> Drop for EncodeGuard<'_, V, A> {
    fn drop(&mut self) {
        self.multiplexer.consumer_closed();
        self.multiplexer.end_encode();
    }
}

fn drive<V, A, C>(multiplexer: &Arc<Multiplexer<V, A>>, consumer: &mut C) -> Result<(), SessionError>
where
    V: VideoFrameSource,
    A: AudioFrameSource,
    C: MediaConsumer<V, A>,
{
    let id = multiplexer.id();
    debug!("[{id}] Encode started");

    let result = {
        let _guard = EncodeGuard { multiplexer };
        consumer.consume(multiplexer)
    };

    match result {
        Ok(()) => {
            info!("[{id}] Encode finished");
            Ok(())
        }
        Err(e) => {
            warn!("[{id}] Encode failed: {e}");
            Err(SessionError::Consumer(Box::new(e)))
        }
    }
}

/// Handle to an encode running on its own thread.
pub struct EncodeHandle {
    id: SessionId,
    thread: JoinHandle<Result<(), SessionError>>,
}

impl EncodeHandle {
    #[must_use]
    #[inline]
    pub const fn session_id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Blocks until the encode finishes and returns its result.
    ///
    /// # Errors
    ///
    /// Returns the encode's error, or [`SessionError::EncodeThreadPanicked`].
    pub fn wait(self) -> Result<(), SessionError> {
        self.thread.join().map_err(|_| SessionError::EncodeThreadPanicked)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_unique_and_named() {
        let a = SessionId::next();
        let b = SessionId::next();
        assert!(b > a);
        assert_eq!(a.to_string(), format!("session-{}", a.get()));
    }

    #[test]
    fn startup_errors_convert() {
        let error = SessionError::from(StartupError::NoFirstVideoFrame);
        assert!(matches!(error, SessionError::Startup(StartupError::NoFirstVideoFrame)));
    }
}
