//! Encoding through `MediaStreamSource` and `MediaTranscoder`.

use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;

use log::{debug, error, info, warn};
use windows::Foundation::{TimeSpan, TypedEventHandler};
use windows::Graphics::DirectX::Direct3D11::IDirect3DSurface;
use windows::Media::Core::{
    AudioStreamDescriptor, MediaStreamSample, MediaStreamSource, MediaStreamSourceClosedEventArgs,
    MediaStreamSourceSampleRequestedEventArgs, MediaStreamSourceStartingEventArgs, VideoStreamDescriptor,
};
use windows::Media::MediaProperties::{
    AudioEncodingProperties, ContainerEncodingProperties, MediaEncodingProfile, MediaEncodingSubtypes,
    VideoEncodingProperties,
};
use windows::Media::Transcoding::MediaTranscoder;
use windows::Security::Cryptography::CryptographicBuffer;
use windows::Storage::Streams::IRandomAccessStream;
use windows::Storage::{FileAccessMode, StorageFile};
use windows::System::Threading::{ThreadPool, WorkItemHandler, WorkItemOptions, WorkItemPriority};
use windows::core::{HSTRING, Interface};
use windows_future::AsyncStatus;

use super::audio_graph::{AudioGraphSource, float_encoding_properties};
use super::d3d11::SendDirectX;
use super::frame_pool::FramePoolSource;
use super::winrt::WinRT;
use super::Error;
use crate::frame::StreamKind;
use crate::multiplexer::{Multiplexer, StartupError};
use crate::sample::SampleResponse;
use crate::session::MediaConsumer;

type WindowsMultiplexer = Multiplexer<FramePoolSource, AudioGraphSource>;
type WindowsResponse = SampleResponse<SendDirectX<IDirect3DSurface>, Arc<[u8]>>;

/// Builder for configuring video encoder settings.
#[derive(Clone, Copy, Debug)]
pub struct VideoSettingsBuilder {
    codec: VideoCodec,
    bitrate: u32,
    width: u32,
    height: u32,
    frame_rate: u32,
}

impl VideoSettingsBuilder {
    /// `width` and `height` must match the capture's target size.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { codec: VideoCodec::H264, bitrate: 9_000_000, width, height, frame_rate: 60 }
    }

    #[must_use]
    pub const fn codec(mut self, codec: VideoCodec) -> Self {
        self.codec = codec;
        self
    }

    #[must_use]
    pub const fn bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = bitrate;
        self
    }

    #[must_use]
    pub const fn frame_rate(mut self, frame_rate: u32) -> Self {
        self.frame_rate = frame_rate;
        self
    }

    #[must_use]
    #[inline]
    pub const fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    #[inline]
    pub const fn height(&self) -> u32 {
        self.height
    }

    fn build(self) -> Result<VideoEncodingProperties, Error> {
        let properties = match self.codec {
            VideoCodec::H264 => VideoEncodingProperties::CreateH264()?,
            VideoCodec::Hevc => VideoEncodingProperties::CreateHevc()?,
        };
        properties.SetBitrate(self.bitrate)?;
        properties.SetWidth(self.width)?;
        properties.SetHeight(self.height)?;
        let frame_rate = properties.FrameRate()?;
        frame_rate.SetNumerator(self.frame_rate)?;
        frame_rate.SetDenominator(1)?;
        Ok(properties)
    }
}

/// Builder for configuring audio encoder settings.
///
/// The sample rate and channel count also describe the incoming float PCM, so they must
/// match the audio graph's.
#[derive(Clone, Copy, Debug)]
pub struct AudioSettingsBuilder {
    codec: AudioCodec,
    bitrate: u32,
    sample_rate: u32,
    channel_count: u32,
    disabled: bool,
}

impl AudioSettingsBuilder {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            codec: AudioCodec::Aac,
            bitrate: 192_000,
            sample_rate: super::audio_graph::DEFAULT_SAMPLE_RATE,
            channel_count: super::audio_graph::DEFAULT_CHANNEL_COUNT,
            disabled: false,
        }
    }

    #[must_use]
    pub const fn codec(mut self, codec: AudioCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Ignored by lossless codecs.
    #[must_use]
    pub const fn bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = bitrate;
        self
    }

    #[must_use]
    pub const fn sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    #[must_use]
    pub const fn channel_count(mut self, channel_count: u32) -> Self {
        self.channel_count = channel_count;
        self
    }

    /// Leaves the audio track out even when the session captures audio.
    #[must_use]
    pub const fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    #[must_use]
    #[inline]
    pub const fn is_disabled(&self) -> bool {
        self.disabled
    }

    fn build(self) -> Result<AudioEncodingProperties, Error> {
        let properties = match self.codec {
            AudioCodec::Aac => AudioEncodingProperties::CreateAac(self.sample_rate, self.channel_count, self.bitrate)?,
            AudioCodec::Mp3 => AudioEncodingProperties::CreateMp3(self.sample_rate, self.channel_count, self.bitrate)?,
            AudioCodec::Flac => AudioEncodingProperties::CreateFlac(self.sample_rate, self.channel_count, 16)?,
        };
        Ok(properties)
    }
}

impl Default for AudioSettingsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for configuring container settings.
#[derive(Clone, Copy, Debug, Default)]
pub struct ContainerSettingsBuilder {
    container: Container,
}

impl ContainerSettingsBuilder {
    #[must_use]
    pub const fn new() -> Self {
        Self { container: Container::Mp4 }
    }

    #[must_use]
    pub const fn container(mut self, container: Container) -> Self {
        self.container = container;
        self
    }

    fn build(self) -> Result<ContainerEncodingProperties, Error> {
        let properties = ContainerEncodingProperties::new()?;
        let subtype = match self.container {
            Container::Mp4 => MediaEncodingSubtypes::Mpeg4()?,
            Container::Asf => MediaEncodingSubtypes::Asf()?,
        };
        properties.SetSubtype(&subtype)?;
        Ok(properties)
    }
}

/// Video codecs the transcoder can target from BGRA surfaces.
#[derive(Eq, PartialEq, Clone, Copy, Debug, Default)]
pub enum VideoCodec {
    #[default]
    H264,
    Hevc,
}

/// Audio codecs the transcoder can target from float PCM.
#[derive(Eq, PartialEq, Clone, Copy, Debug, Default)]
pub enum AudioCodec {
    #[default]
    Aac,
    Mp3,
    Flac,
}

/// Output containers.
#[derive(Eq, PartialEq, Clone, Copy, Debug, Default)]
pub enum Container {
    #[default]
    Mp4,
    Asf,
}

/// [`MediaConsumer`] that encodes a session with `MediaTranscoder`.
///
/// A `MediaStreamSource` forwards its `Starting` event to [`Multiplexer::starting`] and
/// answers every `SampleRequested` from the thread pool with
/// [`Multiplexer::request_sample`], so the event thread never blocks on a frame.
pub struct MediaTranscoderConsumer {
    video: VideoSettingsBuilder,
    audio: AudioSettingsBuilder,
    container: ContainerSettingsBuilder,
    output: SendDirectX<IRandomAccessStream>,
    hardware_acceleration: bool,
}

impl MediaTranscoderConsumer {
    /// Creates a consumer writing to the file at `path`, truncating it.
    ///
    /// # Errors
    ///
    /// Fails when the file can't be created or opened.
    pub fn new<P: AsRef<Path>>(
        path: P,
        video: VideoSettingsBuilder,
        audio: AudioSettingsBuilder,
        container: ContainerSettingsBuilder,
    ) -> Result<Self, Error> {
        let path = path.as_ref();
        File::create(path)?;

        let path = fs::canonicalize(path)?;
        let path = path.to_string_lossy();
        let path = path.strip_prefix(r"\\?\").unwrap_or(&*path);

        let file = StorageFile::GetFileFromPathAsync(&HSTRING::from(path))?.join()?;
        let stream = file.OpenAsync(FileAccessMode::ReadWrite)?.join()?;

        Ok(Self::from_stream(stream, video, audio, container))
    }

    /// Creates a consumer writing to `stream`.
    #[must_use]
    pub const fn from_stream(
        stream: IRandomAccessStream,
        video: VideoSettingsBuilder,
        audio: AudioSettingsBuilder,
        container: ContainerSettingsBuilder,
    ) -> Self {
        Self { video, audio, container, output: SendDirectX::new(stream), hardware_acceleration: true }
    }

    #[must_use]
    pub const fn hardware_acceleration(mut self, enabled: bool) -> Self {
        self.hardware_acceleration = enabled;
        self
    }

    fn transcode(&self, media_stream_source: &MediaStreamSource, profile: &MediaEncodingProfile) -> Result<(), Error> {
        let transcoder = MediaTranscoder::new()?;
        transcoder.SetHardwareAccelerationEnabled(self.hardware_acceleration)?;

        let prepared = transcoder
            .PrepareMediaStreamSourceTranscodeAsync(media_stream_source, &self.output.0, profile)?
            .join()?;
        if !prepared.CanTranscode()? {
            return Err(Error::CannotTranscode(prepared.FailureReason()?.0));
        }

        let operation = prepared.TranscodeAsync()?;
        let result = operation.join();
        match operation.Status()? {
            AsyncStatus::Completed => debug!("Transcode completed"),
            status => warn!("Transcode ended with status {status:?}"),
        }
        result?;

        Ok(())
    }
}

impl MediaConsumer<FramePoolSource, AudioGraphSource> for MediaTranscoderConsumer {
    type Error = Error;

    fn consume(&mut self, source: &Arc<WindowsMultiplexer>) -> Result<(), Error> {
        let _winrt = WinRT::new()?;
        let with_audio = source.has_audio() && !self.audio.is_disabled();

        let profile = MediaEncodingProfile::new()?;
        let video_properties = self.video.build()?;
        profile.SetVideo(&video_properties)?;
        if with_audio {
            profile.SetAudio(&self.audio.build()?)?;
        } else {
            profile.SetAudio(None)?;
        }
        profile.SetContainer(&self.container.build()?)?;

        let video_descriptor = VideoStreamDescriptor::Create(&VideoEncodingProperties::CreateUncompressed(
            &MediaEncodingSubtypes::Bgra8()?,
            self.video.width,
            self.video.height,
        )?)?;
        let media_stream_source = if with_audio {
            let audio_properties = float_encoding_properties(self.audio.sample_rate, self.audio.channel_count)?;
            let audio_descriptor = AudioStreamDescriptor::Create(&audio_properties)?;
            MediaStreamSource::CreateFromDescriptors(&video_descriptor, &audio_descriptor)?
        } else {
            MediaStreamSource::CreateFromDescriptor(&video_descriptor)?
        };
        media_stream_source.SetBufferTime(TimeSpan::default())?;

        info!("[{}] Transcoding (audio: {with_audio})", source.id());
        let handlers = Handlers::attach(&media_stream_source, source)?;
        let result = self.transcode(&media_stream_source, &profile);
        handlers.detach(&media_stream_source);
        result?;

        // A transcode over a session that never started finishes empty.
        match source.ready().try_get() {
            Some(Err(error)) if error != StartupError::Closed => Err(error.into()),
            _ => Ok(()),
        }
    }
}

struct Handlers {
    starting: i64,
    sample_requested: i64,
    closed: i64,
}

impl Handlers {
    fn attach(media_stream_source: &MediaStreamSource, multiplexer: &Arc<WindowsMultiplexer>) -> Result<Self, Error> {
        let starting = media_stream_source.Starting(&TypedEventHandler::<
            MediaStreamSource,
            MediaStreamSourceStartingEventArgs,
        >::new({
            let multiplexer = multiplexer.clone();
            move |_, stream_start| {
                let Some(stream_start) = stream_start.as_ref() else {
                    return Ok(());
                };

                // On failure the first sample request sees end of stream.
                if let Err(e) = multiplexer.starting() {
                    debug!("[{}] Starting hook failed: {e}", multiplexer.id());
                }
                stream_start.Request()?.SetActualStartPosition(TimeSpan::default())?;
                Ok(())
            }
        }))?;

        let sample_requested = media_stream_source.SampleRequested(&TypedEventHandler::<
            MediaStreamSource,
            MediaStreamSourceSampleRequestedEventArgs,
        >::new({
            let multiplexer = multiplexer.clone();
            move |_, sample_requested| {
                let Some(sample_requested) = sample_requested.as_ref() else {
                    return Ok(());
                };

                let request = sample_requested.Request()?;
                let stream = if request.StreamDescriptor()?.cast::<AudioStreamDescriptor>().is_ok() {
                    StreamKind::Audio
                } else {
                    StreamKind::Video
                };

                // Video requests block on the capture surface, keep them off the event thread.
                let deferral = request.GetDeferral()?;
                let multiplexer = multiplexer.clone();
                ThreadPool::RunWithPriorityAndOptionsAsync(
                    &WorkItemHandler::new(move |_| {
                        let sample = match media_sample(multiplexer.request_sample(stream)) {
                            Ok(sample) => sample,
                            Err(e) => {
                                error!("[{}] Failed to wrap a {stream} sample: {e}", multiplexer.id());
                                multiplexer.close();
                                None
                            }
                        };

                        match sample {
                            Some(sample) => request.SetSample(&sample)?,
                            None => request.SetSample(None)?,
                        }
                        deferral.Complete()?;
                        Ok(())
                    }),
                    WorkItemPriority::Normal,
                    WorkItemOptions::None,
                )?;

                Ok(())
            }
        }))?;

        let closed = media_stream_source.Closed(&TypedEventHandler::<
            MediaStreamSource,
            MediaStreamSourceClosedEventArgs,
        >::new({
            let multiplexer = multiplexer.clone();
            move |_, _| {
                multiplexer.consumer_closed();
                Ok(())
            }
        }))?;

        Ok(Self { starting, sample_requested, closed })
    }

    fn detach(self, media_stream_source: &MediaStreamSource) {
        let _ = media_stream_source.RemoveStarting(self.starting);
        let _ = media_stream_source.RemoveSampleRequested(self.sample_requested);
        let _ = media_stream_source.RemoveClosed(self.closed);
    }
}

fn media_sample(response: WindowsResponse) -> Result<Option<MediaStreamSample>, Error> {
    match response {
        SampleResponse::Video(sample) => {
            let timestamp = TimeSpan { Duration: sample.timestamp().ticks() };
            Ok(Some(MediaStreamSample::CreateFromDirect3D11Surface(&sample.data().0, timestamp)?))
        }
        SampleResponse::Audio(sample) => {
            let timestamp = TimeSpan { Duration: sample.timestamp().ticks() };
            let buffer = CryptographicBuffer::CreateFromByteArray(&sample.data()[..])?;
            let media_sample = MediaStreamSample::CreateFromBuffer(&buffer, timestamp)?;
            if let Some(duration) = sample.duration() {
                media_sample.SetDuration(TimeSpan { Duration: duration.ticks() })?;
            }
            media_sample.SetKeyFrame(sample.is_key_frame())?;
            Ok(Some(media_sample))
        }
        SampleResponse::EndOfStream => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::audio_graph::{DEFAULT_CHANNEL_COUNT, DEFAULT_SAMPLE_RATE};

    #[test]
    fn audio_defaults_match_the_graph_format() {
        let audio = AudioSettingsBuilder::default();
        assert_eq!(audio.sample_rate, DEFAULT_SAMPLE_RATE);
        assert_eq!(audio.channel_count, DEFAULT_CHANNEL_COUNT);
        assert_eq!(audio.codec, AudioCodec::Aac);
        assert!(!audio.is_disabled());
        assert!(audio.disabled(true).is_disabled());
    }

    #[test]
    fn video_settings_keep_the_target_size() {
        let video = VideoSettingsBuilder::new(1920, 1080).codec(VideoCodec::Hevc).frame_rate(30);
        assert_eq!((video.width(), video.height()), (1920, 1080));
        assert_eq!(video.codec, VideoCodec::Hevc);
        assert_eq!(video.frame_rate, 30);
    }

    #[test]
    fn containers_default_to_mp4() {
        assert_eq!(ContainerSettingsBuilder::default().container, Container::Mp4);
        assert_eq!(ContainerSettingsBuilder::new().container(Container::Asf).container, Container::Asf);
    }
}
