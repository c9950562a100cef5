//! Stream sample multiplexer.
//!
//! Answers the consumer's per-stream sample requests by pulling from the matching frame
//! source and rebasing the frame's timestamp onto the session's [`SyncClock`]. The clock
//! is computed once, by the startup handshake in [`Multiplexer::starting`].

use std::any::Any;
use std::error::Error;
use std::panic::{self, AssertUnwindSafe};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, error, info, trace, warn};
use parking_lot::Mutex;

use crate::audio::pull_audio_frame;
use crate::frame::{AudioFrameSource, MediaFrame, NoAudio, StreamKind, VideoFrameSource};
use crate::lifecycle::{CloseTrigger, Lifecycle, RecordingState, StartOutcome, Teardown, Transition};
use crate::ready::{Ready, ReadySignal};
use crate::sample::{Sample, SampleResponse};
use crate::session::{SessionError, SessionId};
use crate::settings::SessionSettings;
use crate::sync_clock::SyncClock;
use crate::time::MediaTime;

/// Data carried by video samples of a multiplexer over `V`.
pub type VideoData<V> = <<V as VideoFrameSource>::Frame as MediaFrame>::Data;
/// Data carried by audio samples of a multiplexer over `A`.
pub type AudioData<A> = <<A as AudioFrameSource>::Frame as MediaFrame>::Data;
/// Response type of [`Multiplexer::request_sample`].
pub type Response<V, A> = SampleResponse<VideoData<V>, AudioData<A>>;

/// Reasons a session never reached the recording state.
#[derive(thiserror::Error, Eq, PartialEq, Clone, Debug)]
pub enum StartupError {
    /// The capture surface closed before it delivered a first frame.
    #[error("Video source closed before delivering its first frame")]
    NoFirstVideoFrame,
    /// The video source failed while waiting for its first frame.
    #[error("Video source failed before delivering its first frame: {0}")]
    VideoSource(String),
    /// The audio graph could not be started.
    #[error("Failed to start the audio source: {0}")]
    AudioStart(String),
    /// The audio source failed while the first frame was pulled.
    #[error("Audio source failed before delivering its first frame: {0}")]
    AudioSource(String),
    /// Every attempt of the underrun-skipping pull produced an empty frame.
    #[error("Audio source produced no frame with data in {0} attempts")]
    NoFirstAudioFrame(u32),
    /// The first video and audio timestamps don't add up to a representable origin.
    #[error("Session origin overflowed")]
    OriginOverflow,
    /// A frame source panicked during the handshake.
    #[error("Frame source panicked during startup: {0}")]
    SourcePanicked(String),
    /// The session was closed before startup could complete.
    #[error("Session was closed before startup completed")]
    Closed,
}

/// Failure while servicing a single sample request. Never leaves the request boundary.
#[derive(thiserror::Error, Debug)]
enum SampleFault {
    #[error("Video source error: {0}")]
    Video(Box<dyn Error + Send + Sync>),
    #[error("Audio source error: {0}")]
    Audio(Box<dyn Error + Send + Sync>),
    #[error("Rebasing a {0} timestamp overflowed")]
    TimestampOverflow(StreamKind),
    #[error("Frame source panicked: {0}")]
    Panicked(String),
}

struct Sources<V: VideoFrameSource, A: AudioFrameSource> {
    video: V,
    audio: Option<A>,
    audio_started: AtomicBool,
    // Audio frame pulled by the handshake, emitted as the first audio sample.
    handshake_audio: Mutex<Option<A::Frame>>,
}

impl<V: VideoFrameSource, A: AudioFrameSource> Teardown for Sources<V, A> {
    fn interrupt(&self) {
        self.video.close();
    }

    fn release(&self) {
        if self.audio_started.swap(false, Ordering::SeqCst)
            && let Some(audio) = &self.audio
        {
            audio.stop();
        }
        self.handshake_audio.lock().take();
    }
}

/// Serves time-aligned samples for a video stream and an optional audio stream.
///
/// The consumer calls [`Multiplexer::starting`] once, then
/// [`Multiplexer::request_sample`] for either stream as often as it needs, from one
/// thread per stream at most, and finally [`Multiplexer::consumer_closed`].
pub struct Multiplexer<V: VideoFrameSource, A: AudioFrameSource = NoAudio> {
    id: SessionId,
    settings: SessionSettings,
    has_audio: bool,
    lifecycle: Lifecycle<Sources<V, A>>,
    clock: OnceLock<SyncClock>,
    ready: ReadySignal,
}

impl<V: VideoFrameSource, A: AudioFrameSource> Multiplexer<V, A> {
    /// Creates an idle multiplexer. Passing `None` for `audio` makes the audio stream
    /// end immediately and keeps audio out of the origin.
    #[must_use]
    pub fn new(video: V, audio: Option<A>, settings: SessionSettings) -> Self {
        Self::with_id(SessionId::next(), video, audio, settings)
    }

    pub(crate) fn with_id(id: SessionId, video: V, audio: Option<A>, settings: SessionSettings) -> Self {
        let has_audio = audio.is_some();
        let sources = Sources {
            video,
            audio,
            audio_started: AtomicBool::new(false),
            handshake_audio: Mutex::new(None),
        };

        Self {
            id,
            settings,
            has_audio,
            lifecycle: Lifecycle::new(sources),
            clock: OnceLock::new(),
            ready: ReadySignal::new(),
        }
    }

    #[must_use]
    #[inline]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    #[inline]
    pub const fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    #[must_use]
    #[inline]
    pub const fn has_audio(&self) -> bool {
        self.has_audio
    }

    #[must_use]
    pub fn state(&self) -> RecordingState {
        self.lifecycle.state()
    }

    /// Whether an encode operation is currently running on this multiplexer.
    #[must_use]
    pub fn is_encoding(&self) -> bool {
        self.lifecycle.is_recording()
    }

    /// The synchronized clock, once the handshake has computed it.
    #[must_use]
    pub fn sync_clock(&self) -> Option<SyncClock> {
        self.clock.get().copied()
    }

    #[must_use]
    pub fn origin(&self) -> Option<MediaTime> {
        self.clock.get().map(SyncClock::origin)
    }

    /// Future resolving to the origin once the handshake succeeds.
    #[must_use]
    pub fn ready(&self) -> Ready {
        self.ready.ready()
    }

    /// Runs the startup handshake. Blocks until the first video frame (and, with audio,
    /// the first audio frame with data) has arrived.
    ///
    /// # Errors
    ///
    /// - [`SessionError::AlreadyStarted`] when called a second time
    /// - [`SessionError::Closed`] when the session is already closing
    /// - [`SessionError::Startup`] when the handshake fails; the session then closes and
    ///   the readiness future is rejected with the same error
    pub fn starting(&self) -> Result<MediaTime, SessionError> {
        let sources = self.lifecycle.begin_start()?;
        debug!("[{}] Starting, waiting for the first video frame", self.id);

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.handshake(&sources)))
            .unwrap_or_else(|payload| Err(StartupError::SourcePanicked(panic_message(&*payload))));
        drop(sources);

        let error = match result {
            Ok(clock) => {
                // Set before entering Recording so every request finds it.
                let _ = self.clock.set(clock);
                match self.lifecycle.finish_start(true) {
                    StartOutcome::Recording => {
                        let origin = clock.origin();
                        info!("[{}] Recording, origin at {origin}", self.id);
                        self.ready.resolve(origin);
                        return Ok(origin);
                    }
                    StartOutcome::Aborted(transition) => {
                        self.ready.reject(StartupError::Closed);
                        self.finish(transition);
                        return Err(StartupError::Closed.into());
                    }
                }
            }
            Err(error) => error,
        };

        let error =
            if self.lifecycle.state().is_closing_or_closed() { StartupError::Closed } else { error };
        warn!("[{}] Startup failed: {error}", self.id);
        self.ready.reject(error.clone());

        if let StartOutcome::Aborted(transition) = self.lifecycle.finish_start(false) {
            if matches!(transition, Transition::Close { .. }) {
                info!("[{}] Closing ({})", self.id, CloseTrigger::StartupFailed);
            }
            self.finish(transition);
        }

        Err(error.into())
    }

    fn handshake(&self, sources: &Sources<V, A>) -> Result<SyncClock, StartupError> {
        let first_video = sources
            .video
            .wait_for_next_frame()
            .map_err(|e| StartupError::VideoSource(e.to_string()))?
            .ok_or(StartupError::NoFirstVideoFrame)?;
        let first_video_time = first_video.timestamp();
        drop(first_video);
        debug!("[{}] First video frame at {first_video_time}", self.id);

        let Some(audio) = &sources.audio else {
            return Ok(SyncClock::video_only(first_video_time));
        };

        audio.start().map_err(|e| StartupError::AudioStart(e.to_string()))?;
        sources.audio_started.store(true, Ordering::SeqCst);

        let limit = self.settings.max_underrun_retries();
        let pulled = pull_audio_frame(audio, limit)
            .map_err(|e| StartupError::AudioSource(e.to_string()))?
            .ok_or(StartupError::NoFirstAudioFrame(limit))?;
        let first_audio_time = pulled.frame.timestamp();
        debug!(
            "[{}] First audio frame at +{first_audio_time} after {} empty frames",
            self.id, pulled.discarded
        );

        let clock = SyncClock::with_audio(first_video_time, first_audio_time)
            .ok_or(StartupError::OriginOverflow)?;

        if self.settings.retains_handshake_audio() {
            *sources.handshake_audio.lock() = Some(pulled.frame);
        }

        Ok(clock)
    }

    /// Produces the next sample of `stream`.
    ///
    /// Blocks on the video source for video requests; audio requests only spin on the
    /// non-blocking audio source. Outside the recording state this returns
    /// [`SampleResponse::EndOfStream`] right away, without touching a source, and closes
    /// the session. End of stream and every failure while pulling also close the session;
    /// failures are logged and never returned.
    pub fn request_sample(&self, stream: StreamKind) -> Response<V, A> {
        if stream == StreamKind::Audio && !self.has_audio {
            return SampleResponse::EndOfStream;
        }

        let (Some(sources), Some(clock)) = (self.lifecycle.acquire(), self.sync_clock()) else {
            trace!("[{}] {stream} sample requested while {:?}", self.id, self.state());
            self.trigger_close(CloseTrigger::EndOfStream);
            return SampleResponse::EndOfStream;
        };

        let result = panic::catch_unwind(AssertUnwindSafe(|| match stream {
            StreamKind::Video => self.next_video(&sources, &clock),
            StreamKind::Audio => self.next_audio(&sources, &clock),
        }))
        .unwrap_or_else(|payload| Err(SampleFault::Panicked(panic_message(&*payload))));
        drop(sources);

        match result {
            Ok(Some(response)) => response,
            Ok(None) => {
                debug!("[{}] The {stream} source ended", self.id);
                self.trigger_close(CloseTrigger::EndOfStream);
                SampleResponse::EndOfStream
            }
            Err(fault) => {
                error!("[{}] Failed to produce a {stream} sample: {fault}", self.id);
                self.trigger_close(CloseTrigger::RequestFault);
                SampleResponse::EndOfStream
            }
        }
    }

    fn next_video(
        &self,
        sources: &Sources<V, A>,
        clock: &SyncClock,
    ) -> Result<Option<Response<V, A>>, SampleFault> {
        loop {
            let Some(frame) =
                sources.video.wait_for_next_frame().map_err(|e| SampleFault::Video(Box::new(e)))?
            else {
                return Ok(None);
            };

            let timestamp = clock
                .rebase_video(frame.timestamp())
                .ok_or(SampleFault::TimestampOverflow(StreamKind::Video))?;
            if timestamp.is_negative() {
                trace!("[{}] Dropping video frame at {timestamp}, before the origin", self.id);
                continue;
            }

            let data = frame.data();
            drop(frame);
            return Ok(Some(SampleResponse::Video(Sample::video(data, timestamp))));
        }
    }

    fn next_audio(
        &self,
        sources: &Sources<V, A>,
        clock: &SyncClock,
    ) -> Result<Option<Response<V, A>>, SampleFault> {
        let Some(audio) = &sources.audio else {
            return Ok(None);
        };

        // Frames skipped before the origin share the underrun budget.
        let mut remaining = self.settings.max_underrun_retries();
        let mut retained = sources.handshake_audio.lock().take();
        loop {
            let frame = match retained.take() {
                Some(frame) => frame,
                None => {
                    let pulled =
                        pull_audio_frame(audio, remaining).map_err(|e| SampleFault::Audio(Box::new(e)))?;
                    match pulled {
                        Some(pulled) => {
                            remaining = remaining.saturating_sub(pulled.discarded.saturating_add(1));
                            pulled.frame
                        }
                        None => return Ok(None),
                    }
                }
            };

            let timestamp = clock
                .rebase_audio(frame.timestamp())
                .ok_or(SampleFault::TimestampOverflow(StreamKind::Audio))?;
            if timestamp.is_negative() {
                trace!("[{}] Dropping audio frame at {timestamp}, before the origin", self.id);
                continue;
            }

            let duration = frame.duration();
            let data = frame.data();
            drop(frame);
            return Ok(Some(SampleResponse::Audio(Sample::audio(data, timestamp, duration))));
        }
    }

    /// The consumer's sample pipe closed.
    pub fn consumer_closed(&self) {
        self.trigger_close(CloseTrigger::ConsumerClosed);
    }

    /// Closes the session. Idempotent.
    pub fn close(&self) {
        self.trigger_close(CloseTrigger::Caller);
    }

    pub(crate) fn begin_encode(&self) -> Result<(), SessionError> {
        self.lifecycle.begin_encode()
    }

    pub(crate) fn end_encode(&self) {
        let transition = self.lifecycle.end_encode();
        self.finish(transition);
    }

    fn trigger_close(&self, trigger: CloseTrigger) {
        let transition = self.lifecycle.request_close();
        if matches!(transition, Transition::Nothing) {
            trace!("[{}] Ignoring {trigger}, already closing", self.id);
            return;
        }

        info!("[{}] Closing ({trigger})", self.id);
        self.finish(transition);
    }

    fn finish(&self, transition: Transition<Sources<V, A>>) {
        let pending = !matches!(transition, Transition::Nothing);
        if self.lifecycle.run(transition) {
            self.ready.reject(StartupError::Closed);
            info!("[{}] Closed", self.id);
        } else if pending {
            debug!("[{}] Release deferred until the running operation completes", self.id);
        }
    }
}

impl<V: VideoFrameSource, A: AudioFrameSource> Drop for Multiplexer<V, A> {
    fn drop(&mut self) {
        self.trigger_close(CloseTrigger::Caller);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    #[derive(thiserror::Error, Debug)]
    #[error("surface lost")]
    struct SurfaceLost;

    struct Frame(MediaTime);

    impl MediaFrame for Frame {
        type Data = i64;

        fn timestamp(&self) -> MediaTime {
            self.0
        }

        fn duration(&self) -> MediaTime {
            MediaTime::ZERO
        }

        fn data(&self) -> i64 {
            self.0.ticks()
        }
    }

    struct Video {
        frames: Mutex<VecDeque<i64>>,
    }

    impl Video {
        fn at(millis: &[i64]) -> Self {
            Self { frames: Mutex::new(millis.iter().copied().collect()) }
        }
    }

    impl VideoFrameSource for Video {
        type Frame = Frame;
        type Error = SurfaceLost;

        fn wait_for_next_frame(&self) -> Result<Option<Frame>, SurfaceLost> {
            Ok(self.frames.lock().pop_front().map(|ms| Frame(MediaTime::from_millis(ms))))
        }

        fn close(&self) {}
    }

    fn multiplexer(millis: &[i64]) -> Multiplexer<Video> {
        Multiplexer::new(Video::at(millis), None, SessionSettings::default())
    }

    #[test]
    fn video_only_origin_is_first_frame() {
        let mux = multiplexer(&[100, 133]);
        assert_eq!(mux.origin(), None);

        assert_eq!(mux.starting().unwrap(), MediaTime::from_millis(100));
        assert_eq!(mux.state(), RecordingState::Recording);
        assert_eq!(mux.sync_clock(), Some(SyncClock::video_only(MediaTime::from_millis(100))));

        let SampleResponse::Video(sample) = mux.request_sample(StreamKind::Video) else {
            panic!("expected a video sample");
        };
        assert_eq!(sample.timestamp(), MediaTime::from_millis(33));
        assert_eq!(*sample.data(), MediaTime::from_millis(133).ticks());
        assert!(!sample.is_key_frame());
    }

    #[test]
    fn end_of_stream_closes_the_session() {
        let mux = multiplexer(&[100]);
        mux.starting().unwrap();

        assert!(mux.request_sample(StreamKind::Video).is_end_of_stream());
        assert_eq!(mux.state(), RecordingState::Closed);
        assert_eq!(mux.ready().try_get(), Some(Ok(MediaTime::from_millis(100))));
    }

    #[test]
    fn close_during_encode_defers_release() {
        let mux = multiplexer(&[100, 133]);
        mux.begin_encode().unwrap();
        mux.starting().unwrap();

        mux.close();
        assert_eq!(mux.state(), RecordingState::Closing);
        assert!(mux.is_encoding());

        assert!(mux.lifecycle.acquire().is_none());
        assert!(mux.request_sample(StreamKind::Video).is_end_of_stream());

        mux.end_encode();
        assert_eq!(mux.state(), RecordingState::Closed);
        assert!(!mux.is_encoding());
    }

    #[test]
    fn consumer_close_is_a_trigger() {
        let mux = multiplexer(&[100]);
        mux.starting().unwrap();
        mux.consumer_closed();
        mux.close();
        assert_eq!(mux.state(), RecordingState::Closed);
    }

    #[test]
    fn panic_payloads_are_described() {
        let payload = panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(&*payload), "boom");

        let payload = panic::catch_unwind(|| panic!("{} frames", 3)).unwrap_err();
        assert_eq!(panic_message(&*payload), "3 frames");
    }

    #[test]
    fn startup_errors_describe_the_cause() {
        assert_eq!(
            StartupError::NoFirstAudioFrame(48_000).to_string(),
            "Audio source produced no frame with data in 48000 attempts"
        );
        assert_eq!(
            StartupError::NoFirstVideoFrame.to_string(),
            "Video source closed before delivering its first frame"
        );
    }
}
