//! Futures returned by the scheduling API.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context as PollContext, Poll, Waker};

use futures_channel::oneshot;
use pin_project_lite::pin_project;

use crate::context;
use crate::time::SimDuration;

use super::scheduler::Scheduler;
use super::zone::ClockZone;
use super::Timer;

/// Future suspending a task for a span of virtual time.
///
/// Returned by [`Scheduler::delay`], [`Scheduler::delta`](Scheduler::delta)
/// and [`ClockZone::delay`]. The underlying one-shot timer is registered
/// lazily on first poll, under the ambient zone of the polling task;
/// dropping the future before it completes releases the timer.
pub struct Delay {
    scheduler: Scheduler,
    duration: SimDuration,
    armed: Option<Armed>,
}

struct Armed {
    wait: Arc<Mutex<WaitState>>,
    timer: Timer,
}

struct WaitState {
    fired: bool,
    waker: Option<Waker>,
}

impl Delay {
    pub(crate) fn new(scheduler: Scheduler, duration: SimDuration) -> Self {
        Self {
            scheduler,
            duration,
            armed: None,
        }
    }
}

impl Future for Delay {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut PollContext<'_>) -> Poll<()> {
        let this = self.get_mut();

        match &this.armed {
            None => {
                let wait = Arc::new(Mutex::new(WaitState {
                    fired: false,
                    waker: Some(cx.waker().clone()),
                }));
                let shared = wait.clone();
                let timer = this
                    .scheduler
                    .create_timer(this.duration, move |_| {
                        let mut state = shared.lock().unwrap();
                        state.fired = true;
                        if let Some(waker) = state.waker.take() {
                            waker.wake();
                        }
                    })
                    .expect("delays are built from unsigned tick counts");
                this.armed = Some(Armed { wait, timer });

                Poll::Pending
            }
            Some(armed) => {
                let mut state = armed.wait.lock().unwrap();
                if state.fired {
                    Poll::Ready(())
                } else {
                    state.waker = Some(cx.waker().clone());

                    Poll::Pending
                }
            }
        }
    }
}

impl Drop for Delay {
    fn drop(&mut self) {
        // A delay dropped mid-flight releases its timer.
        if let Some(armed) = &self.armed {
            let fired = armed.wait.lock().unwrap().fired;
            if !fired {
                armed.timer.cancel();
            }
        }
    }
}

impl fmt::Debug for Delay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delay")
            .field("duration", &self.duration)
            .field("armed", &self.armed.is_some())
            .finish_non_exhaustive()
    }
}

pin_project! {
    /// Future adapter returned by [`ClockZone::run`].
    ///
    /// Installs the zone as the ambient context around every poll of the
    /// inner future and restores the enclosing context afterwards, so the
    /// override holds across all the suspensions the inner future creates.
    pub struct WithZone<F> {
        #[pin]
        inner: F,
        zone: ClockZone,
    }
}

impl<F> WithZone<F> {
    pub(crate) fn new(inner: F, zone: ClockZone) -> Self {
        Self { inner, zone }
    }
}

impl<F: Future> Future for WithZone<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut PollContext<'_>) -> Poll<F::Output> {
        let this = self.project();
        let _guard = context::enter_zone(this.zone.clone());

        this.inner.poll(cx)
    }
}

impl<F> fmt::Debug for WithZone<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WithZone")
            .field("zone", &self.zone)
            .finish_non_exhaustive()
    }
}

/// Handle to the output of a spawned task.
///
/// Returned by [`Simulation::run`](super::Simulation::run) and
/// [`Scheduler::spawn`]. Awaiting the handle from another task yields
/// `Some(output)` once the task completes, or `None` if the simulation was
/// reset first; from outside the simulation, [`try_take`](TaskHandle::try_take)
/// retrieves the output after an `elapse`.
pub struct TaskHandle<T> {
    receiver: oneshot::Receiver<T>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(receiver: oneshot::Receiver<T>) -> Self {
        Self { receiver }
    }

    /// Returns the task output if the task has completed.
    pub fn try_take(&mut self) -> Option<T> {
        self.receiver.try_recv().ok().flatten()
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Option<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut PollContext<'_>) -> Poll<Option<T>> {
        Pin::new(&mut self.receiver).poll(cx).map(Result::ok)
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle").finish_non_exhaustive()
    }
}
