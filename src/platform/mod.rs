//! Windows implementations of the frame sources and the consumer.
//!
//! - [`FramePoolSource`] pulls video from a Graphics Capture frame pool
//! - [`AudioGraphSource`] pulls audio from an `AudioGraph` device input
//! - [`MediaTranscoderConsumer`] feeds both into a `MediaStreamSource` and encodes it
//!   with `MediaTranscoder`

use windows::Graphics::Capture::{GraphicsCaptureItem, GraphicsCaptureSession};
use windows::Graphics::DirectX::Direct3D11::IDirect3DDevice;
use windows::Graphics::SizeInt32;

use crate::multiplexer::StartupError;
use crate::session::CaptureSession;
use crate::settings::SessionSettings;

pub mod audio_graph;
pub mod capture_item;
pub mod d3d11;
pub mod frame_pool;
pub mod transcoder;
pub mod winrt;

pub use audio_graph::{AudioGraphFrame, AudioGraphSource};
pub use frame_pool::{CapturedFrame, FramePoolSource};
pub use transcoder::{
    AudioCodec, AudioSettingsBuilder, Container, ContainerSettingsBuilder, MediaTranscoderConsumer, VideoCodec,
    VideoSettingsBuilder,
};

/// Session type produced by [`start_capture`].
pub type WindowsCaptureSession = CaptureSession<FramePoolSource, AudioGraphSource>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Graphics Capture API is not supported")]
    Unsupported,
    #[error("Failed to create DirectX device with the recommended feature level")]
    FeatureLevelNotSatisfied,
    #[error("DirectX device creation returned no device")]
    NoDevice,
    #[error("There is no foreground window")]
    NoForegroundWindow,
    #[error("Failed to create the audio graph, status {0}")]
    AudioGraphCreation(i32),
    #[error("Failed to create the audio device input, status {0}")]
    AudioDeviceCreation(i32),
    #[error("Transcoder can't encode this stream, reason {0}")]
    CannotTranscode(i32),
    #[error("Session failed to start: {0}")]
    Startup(#[from] StartupError),
    #[error("Windows API error: {0}")]
    WindowsError(#[from] windows::core::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Starts capturing `item` on `device`, with the default microphone when `audio` is set.
///
/// Frames are copied into surfaces of `target_size`; the transcoder's video settings
/// must use the same size.
///
/// # Errors
///
/// Fails when Graphics Capture is unsupported or when the frame pool or the audio graph
/// cannot be created.
pub fn start_capture(
    device: &IDirect3DDevice,
    item: &GraphicsCaptureItem,
    target_size: SizeInt32,
    audio: bool,
) -> Result<WindowsCaptureSession, Error> {
    start_capture_with_settings(device, item, target_size, audio, SessionSettings::default())
}

/// [`start_capture`] with explicit session settings.
///
/// # Errors
///
/// Same as [`start_capture`].
pub fn start_capture_with_settings(
    device: &IDirect3DDevice,
    item: &GraphicsCaptureItem,
    target_size: SizeInt32,
    audio: bool,
    settings: SessionSettings,
) -> Result<WindowsCaptureSession, Error> {
    if !GraphicsCaptureSession::IsSupported()? {
        return Err(Error::Unsupported);
    }

    let video = FramePoolSource::new(device, item, target_size)?;
    let audio = if audio {
        Some(AudioGraphSource::new(audio_graph::DEFAULT_SAMPLE_RATE, audio_graph::DEFAULT_CHANNEL_COUNT)?)
    } else {
        None
    };

    Ok(CaptureSession::new(video, audio, settings))
}
