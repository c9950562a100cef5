#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use capture_sync::{AudioFrameSource, MediaFrame, MediaTime, VideoFrameSource};
use parking_lot::{Condvar, Mutex};

#[derive(thiserror::Error, Debug)]
#[error("device lost")]
pub struct DeviceLost;

#[derive(Default)]
pub struct Counters {
    pub released_frames: AtomicUsize,
    pub video_waits: AtomicUsize,
    pub video_closes: AtomicUsize,
    pub audio_pulls: AtomicUsize,
    pub audio_starts: AtomicUsize,
    pub audio_stops: AtomicUsize,
    pub dropped_sources: AtomicUsize,
}

impl Counters {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

pub struct TestFrame {
    timestamp: MediaTime,
    duration: MediaTime,
    counters: Arc<Counters>,
}

impl MediaFrame for TestFrame {
    type Data = MediaTime;

    fn timestamp(&self) -> MediaTime {
        self.timestamp
    }

    fn duration(&self) -> MediaTime {
        self.duration
    }

    // The source timestamp doubles as the payload so tests can tell frames apart.
    fn data(&self) -> MediaTime {
        self.timestamp
    }
}

impl Drop for TestFrame {
    fn drop(&mut self) {
        self.counters.released_frames.fetch_add(1, Ordering::SeqCst);
    }
}

pub enum VideoStep {
    Frame(i64),
    End,
    Fail,
    Panic,
}

/// Hands out scripted frames. Once the script runs out it blocks like a live surface
/// until closed.
pub struct ScriptedVideo {
    steps: Mutex<(VecDeque<VideoStep>, bool)>,
    condvar: Condvar,
    counters: Arc<Counters>,
}

impl ScriptedVideo {
    pub fn new(steps: impl IntoIterator<Item = VideoStep>, counters: &Arc<Counters>) -> Self {
        Self {
            steps: Mutex::new((steps.into_iter().collect(), false)),
            condvar: Condvar::new(),
            counters: counters.clone(),
        }
    }

    pub fn frames_at(millis: &[i64], counters: &Arc<Counters>) -> Self {
        Self::new(millis.iter().map(|&ms| VideoStep::Frame(ms)), counters)
    }
}

impl VideoFrameSource for ScriptedVideo {
    type Frame = TestFrame;
    type Error = DeviceLost;

    fn wait_for_next_frame(&self) -> Result<Option<TestFrame>, DeviceLost> {
        self.counters.video_waits.fetch_add(1, Ordering::SeqCst);

        let mut guard = self.steps.lock();
        loop {
            let (steps, closed) = &mut *guard;
            if *closed {
                return Ok(None);
            }

            match steps.pop_front() {
                Some(VideoStep::Frame(ms)) => {
                    return Ok(Some(TestFrame {
                        timestamp: MediaTime::from_millis(ms),
                        duration: MediaTime::ZERO,
                        counters: self.counters.clone(),
                    }));
                }
                Some(VideoStep::End) => return Ok(None),
                Some(VideoStep::Fail) => return Err(DeviceLost),
                Some(VideoStep::Panic) => panic!("scripted video panic"),
                None => self.condvar.wait(&mut guard),
            }
        }
    }

    fn close(&self) {
        self.counters.video_closes.fetch_add(1, Ordering::SeqCst);
        self.steps.lock().1 = true;
        self.condvar.notify_all();
    }
}

impl Drop for ScriptedVideo {
    fn drop(&mut self) {
        self.counters.dropped_sources.fetch_add(1, Ordering::SeqCst);
    }
}

pub enum AudioStep {
    /// Relative timestamp and duration, in milliseconds.
    Frame(i64, i64),
    Fail,
}

/// Hands out scripted frames, then zero-duration frames forever.
pub struct ScriptedAudio {
    steps: Mutex<VecDeque<AudioStep>>,
    fail_start: bool,
    counters: Arc<Counters>,
}

impl ScriptedAudio {
    pub fn new(steps: impl IntoIterator<Item = AudioStep>, counters: &Arc<Counters>) -> Self {
        Self { steps: Mutex::new(steps.into_iter().collect()), fail_start: false, counters: counters.clone() }
    }

    /// Back-to-back frames of `duration_ms`, the first at `offset_ms`.
    pub fn periodic(offset_ms: i64, duration_ms: i64, count: usize, counters: &Arc<Counters>) -> Self {
        let steps = (0..count as i64).map(|i| AudioStep::Frame(offset_ms + i * duration_ms, duration_ms));
        Self::new(steps, counters)
    }

    pub fn failing_start(counters: &Arc<Counters>) -> Self {
        Self { steps: Mutex::new(VecDeque::new()), fail_start: true, counters: counters.clone() }
    }
}

impl AudioFrameSource for ScriptedAudio {
    type Frame = TestFrame;
    type Error = DeviceLost;

    fn start(&self) -> Result<(), DeviceLost> {
        if self.fail_start {
            return Err(DeviceLost);
        }
        self.counters.audio_starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.counters.audio_stops.fetch_add(1, Ordering::SeqCst);
    }

    fn get_frame(&self) -> Result<TestFrame, DeviceLost> {
        self.counters.audio_pulls.fetch_add(1, Ordering::SeqCst);

        let (timestamp, duration) = match self.steps.lock().pop_front() {
            Some(AudioStep::Frame(at, length)) => (at, length),
            Some(AudioStep::Fail) => return Err(DeviceLost),
            None => (0, 0),
        };

        Ok(TestFrame {
            timestamp: MediaTime::from_millis(timestamp),
            duration: MediaTime::from_millis(duration),
            counters: self.counters.clone(),
        })
    }
}

impl Drop for ScriptedAudio {
    fn drop(&mut self) {
        self.counters.dropped_sources.fetch_add(1, Ordering::SeqCst);
    }
}
