//! # Capture Sync
//!
//! **Capture Sync** is the synchronization core of a screen recorder. It takes a video
//! frame source driven by a capture surface and an audio frame source driven by a live
//! device graph, two producers with unrelated clocks, and serves them to an encoder as a
//! single time-aligned sample stream.
//!
//! ## Features
//!
//! - Shared Time Origin Across Video And Audio Clocks.
//! - Pull-Based Sample Requests, Per Stream.
//! - Skips Audio Underruns Without Stalling The Encode.
//! - Idempotent Shutdown From Any Side.
//! - Windows Graphics Capture, AudioGraph And MediaTranscoder Adapters.
//!
//! ## Usage
//!
//! ```no_run
//! use std::convert::Infallible;
//! use std::sync::Arc;
//!
//! use capture_sync::{
//!     CaptureSession, MediaConsumer, MediaFrame, MediaTime, Multiplexer, NoAudio,
//!     SampleResponse, SessionError, SessionSettings, StreamKind, VideoFrameSource,
//! };
//!
//! // A frame handed out by the capture surface
//! struct Frame(MediaTime);
//!
//! impl MediaFrame for Frame {
//!     type Data = MediaTime;
//!
//!     fn timestamp(&self) -> MediaTime {
//!         self.0
//!     }
//!
//!     fn duration(&self) -> MediaTime {
//!         MediaTime::ZERO
//!     }
//!
//!     fn data(&self) -> MediaTime {
//!         self.0
//!     }
//! }
//!
//! // Capture Surface That Produces A Frame Every 16ms
//! struct Surface;
//!
//! impl VideoFrameSource for Surface {
//!     type Frame = Frame;
//!     type Error = Infallible;
//!
//!     fn wait_for_next_frame(&self) -> Result<Option<Frame>, Infallible> {
//!         std::thread::sleep(std::time::Duration::from_millis(16));
//!         Ok(Some(Frame(capture_sync::clock::now())))
//!     }
//!
//!     fn close(&self) {}
//! }
//!
//! // Encoder That Prints Every Sample
//! struct Printer;
//!
//! impl MediaConsumer<Surface, NoAudio> for Printer {
//!     type Error = SessionError;
//!
//!     fn consume(&mut self, source: &Arc<Multiplexer<Surface>>) -> Result<(), SessionError> {
//!         source.starting()?;
//!
//!         while let SampleResponse::Video(sample) = source.request_sample(StreamKind::Video) {
//!             println!("Video Sample At {}", sample.timestamp());
//!         }
//!
//!         Ok(())
//!     }
//! }
//!
//! let session = CaptureSession::video_only(Surface, SessionSettings::default());
//! let encode = session.encode_in_background(Printer).unwrap();
//!
//! println!("Recording Started, Origin: {}", session.ready().wait().unwrap());
//!
//! // Stop The Session, The Encode Sees End Of Stream
//! session.stop();
//! encode.wait().unwrap();
//! ```
#![warn(clippy::semicolon_if_nothing_returned)]
#![warn(clippy::inconsistent_struct_constructor)]
#![warn(clippy::must_use_candidate)]
#![warn(clippy::ptr_as_ptr)]
#![warn(clippy::borrow_as_ptr)]
#![warn(clippy::nursery)]
#![warn(clippy::cargo)]

/// Underrun-skipping audio pull.
pub mod audio;
pub mod clock;
pub mod frame;
pub mod lifecycle;
pub mod multiplexer;
/// Windows capture, audio and transcoding adapters.
#[cfg(windows)]
pub mod platform;
pub mod ready;
/// Samples handed to the consumer.
pub mod sample;
/// Caller-facing capture session.
pub mod session;
/// Session configuration.
pub mod settings;
/// Session time origin and timestamp rebasing.
pub mod sync_clock;
/// 100 ns media time values.
pub mod time;

pub use crate::frame::{AudioFrameSource, MediaFrame, NoAudio, StreamKind, VideoFrameSource};
pub use crate::lifecycle::{CloseTrigger, RecordingState};
pub use crate::multiplexer::{Multiplexer, StartupError};
pub use crate::ready::Ready;
pub use crate::sample::{Sample, SampleResponse};
pub use crate::session::{CaptureSession, EncodeHandle, MediaConsumer, SessionError, SessionId};
pub use crate::settings::SessionSettings;
pub use crate::sync_clock::SyncClock;
pub use crate::time::MediaTime;
