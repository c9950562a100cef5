use log::trace;

use crate::frame::{AudioFrameSource, MediaFrame};

/// A usable audio frame and the number of zero-duration frames skipped to reach it.
#[derive(Debug)]
pub struct PulledAudio<F> {
    pub frame: F,
    pub discarded: u32,
}

/// Pulls the next audio frame with a non-zero duration.
///
/// Live device graphs emit zero-duration frames while they fill their first buffers and
/// during some silence. Those are released and skipped, at most `retry_limit` times in
/// total. Each pull is non-blocking, so the bound caps latency rather than waiting.
///
/// Returns `Ok(None)` when every attempt yielded an empty frame: a device that produces
/// nothing for that long is treated as finished.
///
/// # Errors
///
/// Returns the source's error as soon as any pull fails.
pub fn pull_audio_frame<A: AudioFrameSource>(
    source: &A,
    retry_limit: u32,
) -> Result<Option<PulledAudio<A::Frame>>, A::Error> {
    for attempt in 0..retry_limit {
        let frame = source.get_frame()?;
        if !frame.duration().is_zero() {
            if attempt > 0 {
                trace!("Skipped {attempt} empty audio frames");
            }
            return Ok(Some(PulledAudio { frame, discarded: attempt }));
        }
    }

    trace!("No audio frame with data after {retry_limit} attempts");
    Ok(None)
}
