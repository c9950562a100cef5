//! One-shot readiness signal carrying the session origin.

use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::multiplexer::StartupError;
use crate::time::MediaTime;

enum State {
    Pending(Vec<Waker>),
    Resolved(MediaTime),
    Rejected(StartupError),
}

impl State {
    fn outcome(&self) -> Option<Result<MediaTime, StartupError>> {
        match self {
            Self::Pending(_) => None,
            Self::Resolved(origin) => Some(Ok(*origin)),
            Self::Rejected(error) => Some(Err(error.clone())),
        }
    }
}

struct Shared {
    state: Mutex<State>,
    condvar: Condvar,
}

/// Completing half of the signal. Only the first completion takes effect.
pub(crate) struct ReadySignal {
    shared: Arc<Shared>,
}

impl ReadySignal {
    pub(crate) fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::Pending(Vec::new())),
                condvar: Condvar::new(),
            }),
        }
    }

    pub(crate) fn ready(&self) -> Ready {
        Ready { shared: self.shared.clone() }
    }

    /// Returns `false` if the signal had already completed.
    pub(crate) fn resolve(&self, origin: MediaTime) -> bool {
        self.complete(State::Resolved(origin))
    }

    /// Returns `false` if the signal had already completed.
    pub(crate) fn reject(&self, error: StartupError) -> bool {
        self.complete(State::Rejected(error))
    }

    fn complete(&self, outcome: State) -> bool {
        let wakers = {
            let mut state = self.shared.state.lock();
            let State::Pending(wakers) = &mut *state else {
                return false;
            };
            let wakers = mem::take(wakers);
            *state = outcome;
            wakers
        };

        self.shared.condvar.notify_all();
        for waker in wakers {
            waker.wake();
        }

        true
    }
}

/// Waiting half of the signal: resolves to the session origin once startup has
/// completed, or to the [`StartupError`] that prevented it.
///
/// It can be waited on from any number of threads, and it is also a [`Future`].
#[derive(Clone)]
pub struct Ready {
    shared: Arc<Shared>,
}

impl Ready {
    /// Returns the outcome without blocking, or `None` while startup is still running.
    #[must_use]
    pub fn try_get(&self) -> Option<Result<MediaTime, StartupError>> {
        self.shared.state.lock().outcome()
    }

    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.try_get().is_some()
    }

    /// Blocks until startup completes.
    ///
    /// # Errors
    ///
    /// Returns the [`StartupError`] the session failed with.
    pub fn wait(&self) -> Result<MediaTime, StartupError> {
        let mut state = self.shared.state.lock();
        loop {
            if let Some(outcome) = state.outcome() {
                return outcome;
            }
            self.shared.condvar.wait(&mut state);
        }
    }

    /// Blocks until startup completes or `timeout` elapses. Returns `None` on timeout.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<MediaTime, StartupError>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        loop {
            if let Some(outcome) = state.outcome() {
                return Some(outcome);
            }
            if self.shared.condvar.wait_until(&mut state, deadline).timed_out() {
                return state.outcome();
            }
        }
    }
}

impl Future for Ready {
    type Output = Result<MediaTime, StartupError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.shared.state.lock();
        match &mut *state {
            State::Pending(wakers) => {
                if !wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
                    wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
            State::Resolved(origin) => Poll::Ready(Ok(*origin)),
            State::Rejected(error) => Poll::Ready(Err(error.clone())),
        }
    }
}
