//! Audio frames from the default capture device, through an `AudioGraph`.

use std::ptr;
use std::slice;
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;
use windows::Foundation::{IReference, TimeSpan};
use windows::Media::Audio::{
    AudioDeviceInputNode, AudioDeviceNodeCreationStatus, AudioFrameOutputNode, AudioGraph,
    AudioGraphCreationStatus, AudioGraphSettings,
};
use windows::Media::Capture::MediaCategory;
use windows::Media::MediaProperties::{AudioEncodingProperties, MediaEncodingSubtypes};
use windows::Media::Render::AudioRenderCategory;
use windows::Media::{AudioBufferAccessMode, AudioFrame};
use windows::Win32::System::WinRT::IMemoryBufferByteAccess;
use windows::core::Interface;

use super::Error;
use super::d3d11::SendDirectX;
use crate::frame::{AudioFrameSource, MediaFrame};
use crate::time::MediaTime;

pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;
pub const DEFAULT_CHANNEL_COUNT: u32 = 2;
/// The graph delivers 32-bit float samples.
pub const BITS_PER_SAMPLE: u32 = 32;

/// Interleaved float PCM properties, the format frames leave the graph in.
///
/// # Errors
///
/// Fails if the properties object can't be created.
pub fn float_encoding_properties(sample_rate: u32, channel_count: u32) -> Result<AudioEncodingProperties, Error> {
    let properties = AudioEncodingProperties::CreatePcm(sample_rate, channel_count, BITS_PER_SAMPLE)?;
    properties.SetSubtype(&MediaEncodingSubtypes::Float()?)?;
    Ok(properties)
}

/// A frame of interleaved float samples, copied out of the graph's buffer.
pub struct AudioGraphFrame {
    samples: Arc<[u8]>,
    timestamp: MediaTime,
    duration: MediaTime,
}

impl MediaFrame for AudioGraphFrame {
    type Data = Arc<[u8]>;

    fn timestamp(&self) -> MediaTime {
        self.timestamp
    }

    fn duration(&self) -> MediaTime {
        self.duration
    }

    fn data(&self) -> Arc<[u8]> {
        self.samples.clone()
    }
}

struct Graph {
    graph: AudioGraph,
    _input: AudioDeviceInputNode,
    output: AudioFrameOutputNode,
}

/// [`AudioFrameSource`] over an `AudioFrameOutputNode` fed by the default microphone.
///
/// Timestamps are relative to [`AudioFrameSource::start`].
pub struct AudioGraphSource {
    graph: Mutex<SendDirectX<Graph>>,
    sample_rate: u32,
    channel_count: u32,
}

impl AudioGraphSource {
    /// Builds the graph. It stays idle until started.
    ///
    /// # Errors
    ///
    /// Fails when the graph or the device input node can't be created, e.g. when there is
    /// no microphone or access to it was denied.
    pub fn new(sample_rate: u32, channel_count: u32) -> Result<Self, Error> {
        let settings = AudioGraphSettings::Create(AudioRenderCategory::Media)?;
        settings.SetEncodingProperties(&float_encoding_properties(sample_rate, channel_count)?)?;

        let result = AudioGraph::CreateAsync(&settings)?.join()?;
        let status = result.Status()?;
        if status != AudioGraphCreationStatus::Success {
            return Err(Error::AudioGraphCreation(status.0));
        }
        let graph = result.Graph()?;

        let result = graph.CreateDeviceInputNodeAsync(MediaCategory::Media)?.join()?;
        let status = result.Status()?;
        if status != AudioDeviceNodeCreationStatus::Success {
            let _ = graph.Close();
            return Err(Error::AudioDeviceCreation(status.0));
        }
        let input = result.DeviceInputNode()?;

        let output = graph.CreateFrameOutputNode()?;
        input.AddOutgoingConnection(&output)?;
        debug!("Audio graph ready, {sample_rate} Hz, {channel_count} channels");

        Ok(Self {
            graph: Mutex::new(SendDirectX::new(Graph { graph, _input: input, output })),
            sample_rate,
            channel_count,
        })
    }

    #[must_use]
    #[inline]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[must_use]
    #[inline]
    pub const fn channel_count(&self) -> u32 {
        self.channel_count
    }
}

impl AudioFrameSource for AudioGraphSource {
    type Frame = AudioGraphFrame;
    type Error = Error;

    fn start(&self) -> Result<(), Error> {
        self.graph.lock().0.graph.Start()?;
        Ok(())
    }

    fn stop(&self) {
        if let Err(e) = self.graph.lock().0.graph.Stop() {
            warn!("Failed to stop the audio graph: {e}");
        }
    }

    fn get_frame(&self) -> Result<AudioGraphFrame, Error> {
        let frame = self.graph.lock().0.output.GetFrame()?;

        let timestamp = reference_time(frame.RelativeTime());
        let duration = reference_time(frame.Duration());
        let samples = if duration.is_zero() { Arc::from(Vec::new()) } else { copy_samples(&frame)? };
        let _ = frame.Close();

        Ok(AudioGraphFrame { samples, timestamp, duration })
    }
}

impl Drop for AudioGraphSource {
    fn drop(&mut self) {
        let _ = self.graph.lock().0.graph.Close();
    }
}

// Missing values read as zero, which is how an empty frame reports its duration.
fn reference_time(value: windows::core::Result<IReference<TimeSpan>>) -> MediaTime {
    value
        .and_then(|reference| reference.Value())
        .map_or(MediaTime::ZERO, |span| MediaTime::from_ticks(span.Duration))
}

fn copy_samples(frame: &AudioFrame) -> Result<Arc<[u8]>, Error> {
    let buffer = frame.LockBuffer(AudioBufferAccessMode::Read)?;
    let length = buffer.Length()? as usize;
    let reference = buffer.CreateReference()?;
    let access: IMemoryBufferByteAccess = reference.cast()?;

    let mut data = ptr::null_mut();
    let mut capacity = 0;
    unsafe { access.GetBuffer(&mut data, &mut capacity)? };

    let samples = if data.is_null() {
        Vec::new()
    } else {
        let length = length.min(capacity as usize);
        unsafe { slice::from_raw_parts(data, length) }.to_vec()
    };

    drop(access);
    let _ = reference.Close();
    let _ = buffer.Close();

    Ok(samples.into())
}
