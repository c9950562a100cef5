//! Close/dispose protocol shared by the caller, the sample-request path and the consumer.
//!
//! The first close trigger wins. It moves the session to [`RecordingState::Closing`] and
//! interrupts the sources so blocked pulls return. Releasing the sources happens exactly
//! once, and waits for an in-flight encode or startup handshake to finish first.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::session::SessionError;

/// Where a session is in its lifetime. No transition leaves `Closed`.
#[derive(Eq, PartialEq, Clone, Copy, Debug)]
pub enum RecordingState {
    Idle,
    Starting,
    Recording,
    Closing,
    Closed,
}

impl RecordingState {
    #[must_use]
    #[inline]
    pub const fn is_closing_or_closed(self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }
}

/// What asked for the session to close.
#[derive(Eq, PartialEq, Clone, Copy, Debug)]
pub enum CloseTrigger {
    /// The caller stopped or dropped the session.
    Caller,
    /// A frame source reported end of stream, or a request arrived outside the
    /// recording window.
    EndOfStream,
    /// Servicing a sample request failed.
    RequestFault,
    /// The consumer closed its sample pipe.
    ConsumerClosed,
    /// The startup handshake failed.
    StartupFailed,
}

impl fmt::Display for CloseTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Caller => "caller stop",
            Self::EndOfStream => "end of stream",
            Self::RequestFault => "sample request fault",
            Self::ConsumerClosed => "consumer closed",
            Self::StartupFailed => "startup failure",
        };
        f.write_str(s)
    }
}

/// Resources guarded by the lifecycle.
pub(crate) trait Teardown {
    /// Called once, on the first close trigger. Must wake blocked pulls and must not block.
    fn interrupt(&self);

    /// Called once, when nothing in flight can start using the resources anymore.
    fn release(&self);
}

/// Work the caller of a lifecycle method must carry out, outside the lock.
pub(crate) enum Transition<R> {
    Nothing,
    /// First trigger. Interrupt, and release too when `release` is set.
    Close { resources: Arc<R>, release: bool },
    /// A deferred release came due.
    Release(Arc<R>),
}

pub(crate) enum StartOutcome<R> {
    Recording,
    Aborted(Transition<R>),
}

struct Inner<R> {
    state: RecordingState,
    // An encode operation is running on the session.
    recording: bool,
    // The startup handshake is running.
    handshake: bool,
    resources: Option<Arc<R>>,
}

impl<R> Inner<R> {
    const fn busy(&self) -> bool {
        self.recording || self.handshake
    }

    fn first_close(&mut self) -> Transition<R> {
        self.state = RecordingState::Closing;
        let release = !self.busy();
        let resources = if release { self.resources.take() } else { self.resources.clone() };
        resources.map_or(Transition::Nothing, |resources| Transition::Close { resources, release })
    }

    fn due_release(&mut self) -> Transition<R> {
        if self.state == RecordingState::Closing && !self.busy() {
            self.resources.take().map_or(Transition::Nothing, Transition::Release)
        } else {
            Transition::Nothing
        }
    }
}

pub(crate) struct Lifecycle<R> {
    inner: Mutex<Inner<R>>,
}

impl<R: Teardown> Lifecycle<R> {
    pub(crate) fn new(resources: R) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: RecordingState::Idle,
                recording: false,
                handshake: false,
                resources: Some(Arc::new(resources)),
            }),
        }
    }

    pub(crate) fn state(&self) -> RecordingState {
        self.inner.lock().state
    }

    pub(crate) fn is_recording(&self) -> bool {
        self.inner.lock().recording
    }

    /// `Idle -> Starting`. Hands out the resources for the handshake.
    pub(crate) fn begin_start(&self) -> Result<Arc<R>, SessionError> {
        let mut inner = self.inner.lock();
        match inner.state {
            RecordingState::Idle => {}
            RecordingState::Starting | RecordingState::Recording => {
                return Err(SessionError::AlreadyStarted);
            }
            RecordingState::Closing | RecordingState::Closed => return Err(SessionError::Closed),
        }

        let resources = inner.resources.clone().ok_or(SessionError::Closed)?;
        inner.state = RecordingState::Starting;
        inner.handshake = true;
        Ok(resources)
    }

    /// Ends the handshake. `Starting -> Recording` on success; otherwise the failure counts
    /// as a close trigger unless the session was already closing.
    pub(crate) fn finish_start(&self, succeeded: bool) -> StartOutcome<R> {
        let mut inner = self.inner.lock();
        inner.handshake = false;
        match inner.state {
            RecordingState::Starting if succeeded => {
                inner.state = RecordingState::Recording;
                StartOutcome::Recording
            }
            RecordingState::Starting => StartOutcome::Aborted(inner.first_close()),
            _ => StartOutcome::Aborted(inner.due_release()),
        }
    }

    /// Hands out the resources to a sample request, only while recording.
    pub(crate) fn acquire(&self) -> Option<Arc<R>> {
        let inner = self.inner.lock();
        if inner.state == RecordingState::Recording { inner.resources.clone() } else { None }
    }

    pub(crate) fn request_close(&self) -> Transition<R> {
        let mut inner = self.inner.lock();
        if inner.state.is_closing_or_closed() {
            return Transition::Nothing;
        }
        inner.first_close()
    }

    pub(crate) fn begin_encode(&self) -> Result<(), SessionError> {
        let mut inner = self.inner.lock();
        if inner.state.is_closing_or_closed() {
            return Err(SessionError::Closed);
        }
        if inner.recording {
            return Err(SessionError::AlreadyEncoding);
        }
        inner.recording = true;
        Ok(())
    }

    pub(crate) fn end_encode(&self) -> Transition<R> {
        let mut inner = self.inner.lock();
        inner.recording = false;
        inner.due_release()
    }

    /// Carries out a transition. Returns `true` if the resources were released.
    pub(crate) fn run(&self, transition: Transition<R>) -> bool {
        match transition {
            Transition::Nothing => false,
            Transition::Close { resources, release } => {
                resources.interrupt();
                if release {
                    self.release(&resources);
                }
                release
            }
            Transition::Release(resources) => {
                self.release(&resources);
                true
            }
        }
    }

    fn release(&self, resources: &R) {
        resources.release();
        self.inner.lock().state = RecordingState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use super::*;

    #[derive(Default)]
    struct Counters {
        interrupted: AtomicUsize,
        released: AtomicUsize,
    }

    impl Teardown for Arc<Counters> {
        fn interrupt(&self) {
            self.interrupted.fetch_add(1, Ordering::SeqCst);
        }

        fn release(&self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn lifecycle() -> (Lifecycle<Arc<Counters>>, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        (Lifecycle::new(counters.clone()), counters)
    }

    fn counts(counters: &Counters) -> (usize, usize) {
        (counters.interrupted.load(Ordering::SeqCst), counters.released.load(Ordering::SeqCst))
    }

    fn start(lifecycle: &Lifecycle<Arc<Counters>>) {
        lifecycle.begin_start().unwrap();
        assert!(matches!(lifecycle.finish_start(true), StartOutcome::Recording));
    }

    #[test]
    fn closing_twice_releases_once() {
        let (lifecycle, counters) = lifecycle();
        start(&lifecycle);

        assert!(lifecycle.run(lifecycle.request_close()));
        assert!(!lifecycle.run(lifecycle.request_close()));

        assert_eq!(counts(&counters), (1, 1));
        assert_eq!(lifecycle.state(), RecordingState::Closed);
    }

    #[test]
    fn closing_an_idle_session_releases_immediately() {
        let (lifecycle, counters) = lifecycle();
        assert!(lifecycle.run(lifecycle.request_close()));
        assert_eq!(counts(&counters), (1, 1));
        assert!(matches!(lifecycle.begin_start(), Err(SessionError::Closed)));
    }

    #[test]
    fn release_waits_for_the_encode() {
        let (lifecycle, counters) = lifecycle();
        lifecycle.begin_encode().unwrap();
        start(&lifecycle);

        assert!(!lifecycle.run(lifecycle.request_close()));
        assert_eq!(counts(&counters), (1, 0));
        assert_eq!(lifecycle.state(), RecordingState::Closing);
        assert!(lifecycle.is_recording());

        // Later triggers change nothing.
        assert!(!lifecycle.run(lifecycle.request_close()));

        assert!(lifecycle.run(lifecycle.end_encode()));
        assert_eq!(counts(&counters), (1, 1));
        assert_eq!(lifecycle.state(), RecordingState::Closed);
    }

    #[test]
    fn release_waits_for_the_handshake() {
        let (lifecycle, counters) = lifecycle();
        lifecycle.begin_start().unwrap();

        assert!(!lifecycle.run(lifecycle.request_close()));
        assert_eq!(counts(&counters), (1, 0));

        let StartOutcome::Aborted(transition) = lifecycle.finish_start(true) else {
            panic!("a closed session must not enter recording");
        };
        assert!(lifecycle.run(transition));
        assert_eq!(counts(&counters), (1, 1));
        assert_eq!(lifecycle.state(), RecordingState::Closed);
    }

    #[test]
    fn failed_handshake_is_a_close_trigger() {
        let (lifecycle, counters) = lifecycle();
        lifecycle.begin_start().unwrap();

        let StartOutcome::Aborted(transition) = lifecycle.finish_start(false) else {
            panic!("a failed handshake must not enter recording");
        };
        assert!(lifecycle.run(transition));
        assert_eq!(counts(&counters), (1, 1));
        assert_eq!(lifecycle.state(), RecordingState::Closed);
    }

    #[test]
    fn invalid_usage_is_rejected() {
        let (lifecycle, _) = lifecycle();
        start(&lifecycle);
        assert!(matches!(lifecycle.begin_start(), Err(SessionError::AlreadyStarted)));

        lifecycle.begin_encode().unwrap();
        assert!(matches!(lifecycle.begin_encode(), Err(SessionError::AlreadyEncoding)));
        lifecycle.run(lifecycle.end_encode());

        lifecycle.run(lifecycle.request_close());
        assert!(matches!(lifecycle.begin_encode(), Err(SessionError::Closed)));
    }

    #[test]
    fn resources_are_only_handed_out_while_recording() {
        let (lifecycle, _) = lifecycle();
        assert!(lifecycle.acquire().is_none());

        lifecycle.begin_start().unwrap();
        assert!(lifecycle.acquire().is_none());

        assert!(matches!(lifecycle.finish_start(true), StartOutcome::Recording));
        assert!(lifecycle.acquire().is_some());

        lifecycle.run(lifecycle.request_close());
        assert!(lifecycle.acquire().is_none());
    }

    #[test]
    fn concurrent_triggers_release_once() {
        let (lifecycle, counters) = lifecycle();
        start(&lifecycle);
        let lifecycle = Arc::new(lifecycle);

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let lifecycle = lifecycle.clone();
                thread::spawn(move || lifecycle.run(lifecycle.request_close()))
            })
            .collect();
        let released = threads.into_iter().map(|t| t.join().unwrap()).filter(|released| *released);

        assert_eq!(released.count(), 1);
        assert_eq!(counts(&counters), (1, 1));
    }
}
