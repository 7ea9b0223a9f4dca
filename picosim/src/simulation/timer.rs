//! Cancellable timers.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use crate::executor::TaskPanic;
use crate::time::{SimDuration, SimTime};

use super::scheduler::{EventEntry, Scheduler, SchedulingError};
use super::zone::ZoneId;

/// Shorthand for the boxed timer callback type.
pub(crate) type TimerCallback = Box<dyn FnMut(&Timer) + Send + 'static>;

/// Identifier of a timer.
///
/// The identity of a timer is independent of its deadline: cancelling,
/// rescheduling and resuming a timer all preserve its id.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer #{}", self.0)
    }
}

/// Lifecycle state of a timer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum TimerState {
    /// Registered in the event queue.
    Pending,
    /// The callback is executing.
    Firing,
    /// Taken out of the event queue; may be resumed.
    Cancelled,
    /// A one-shot timer that has fired.
    Done,
}

/// The record shared between the scheduler and the [`Timer`] handles.
pub(crate) struct TimerCore {
    pub(crate) id: TimerId,
    /// Deadline of the next firing.
    pub(crate) deadline: SimTime,
    /// Repetition period; `None` for a one-shot timer.
    pub(crate) period: Option<SimDuration>,
    /// The user callback, taken out of the record while it executes.
    pub(crate) callback: Option<TimerCallback>,
    /// The zone that was ambient when the timer was created.
    pub(crate) zone: ZoneId,
    pub(crate) state: TimerState,
    /// Completed firings.
    pub(crate) tick_count: u64,
    /// Bumped on every (re)insertion in the event queue; entries carrying an
    /// older value are stale and discarded when pulled.
    pub(crate) seq: u64,
}

/// Handle to a scheduled timer.
///
/// A `Timer` is returned by
/// [`Scheduler::create_timer`](super::Scheduler::create_timer) and
/// [`Scheduler::create_periodic_timer`](super::Scheduler::create_periodic_timer),
/// and is also passed to the timer's own callback at every firing, which
/// allows a periodic timer to observe its firing count and cancel itself.
///
/// The handle stays valid after the timer completes or is cancelled, so the
/// final [`is_active`](Timer::is_active) and [`tick_count`](Timer::tick_count)
/// remain observable.
///
/// # Examples
///
/// A periodic timer stopping itself after its second firing.
///
/// ```
/// use picosim::simulation::Simulation;
/// use picosim::time::{SimDuration, TickPeriod};
///
/// let mut simu = Simulation::new(TickPeriod::from_picos(10).unwrap());
/// let scheduler = simu.scheduler();
///
/// let timer = scheduler
///     .create_periodic_timer(
///         SimDuration::from_picos(50),
///         SimDuration::from_picos(50),
///         |timer| {
///             if timer.tick_count() == 1 {
///                 timer.cancel();
///             }
///         },
///     )
///     .unwrap();
///
/// simu.elapse(SimDuration::from_picos(1_000)).unwrap();
///
/// assert!(!timer.is_active());
/// assert_eq!(timer.tick_count(), 2);
/// ```
#[derive(Clone)]
pub struct Timer {
    core: Arc<Mutex<TimerCore>>,
    scheduler: Scheduler,
}

impl Timer {
    pub(crate) fn new(core: Arc<Mutex<TimerCore>>, scheduler: Scheduler) -> Self {
        Self { core, scheduler }
    }

    /// Returns the timer id.
    pub fn id(&self) -> TimerId {
        self.core.lock().unwrap().id
    }

    /// Reports whether the timer is registered or currently firing.
    pub fn is_active(&self) -> bool {
        matches!(
            self.core.lock().unwrap().state,
            TimerState::Pending | TimerState::Firing
        )
    }

    /// Returns the number of completed firings.
    ///
    /// When read from inside the timer's own callback, the count does not
    /// include the firing in progress: it is `0` on the first firing.
    pub fn tick_count(&self) -> u64 {
        self.core.lock().unwrap().tick_count
    }

    /// Cancels the timer.
    ///
    /// A one-shot timer cancelled before firing never fires; a periodic
    /// timer cancelled from inside its own callback fires no further. The
    /// operation is a no-op on a timer that already completed or was already
    /// cancelled.
    pub fn cancel(&self) {
        let deregister = {
            let mut core = self.core.lock().unwrap();
            match core.state {
                TimerState::Pending | TimerState::Firing => {
                    core.state = TimerState::Cancelled;
                    core.seq += 1;
                    Some((core.zone, core.id))
                }
                TimerState::Cancelled | TimerState::Done => None,
            }
        };

        if let Some((zone, id)) = deregister {
            self.scheduler.deregister_timer(zone, id);

            #[cfg(feature = "tracing")]
            tracing::trace!(target: env!("CARGO_PKG_NAME"), timer = %id, "timer cancelled");
        }
    }

    /// Offsets the stored deadline of a cancelled timer by `delta`.
    ///
    /// Rescheduling is only meaningful between [`cancel`](Timer::cancel) and
    /// [`resume`](Timer::resume); on a timer in any other state it has no
    /// effect. A deadline pushed before the epoch saturates to the epoch.
    pub fn reschedule(&self, delta: SimDuration) {
        let mut core = self.core.lock().unwrap();

        if core.state == TimerState::Cancelled {
            core.deadline = core.deadline.checked_add(delta).unwrap_or(SimTime::EPOCH);
        }
    }

    /// Re-registers a cancelled timer at its stored deadline.
    ///
    /// Returns [`SchedulingError::TimerNotInFuture`] if the stored deadline
    /// precedes the current simulation time; a deadline equal to the current
    /// time is accepted and fires in a later pass of the current instant.
    /// Resuming a timer that is not cancelled is a no-op.
    pub fn resume(&self) -> Result<(), SchedulingError> {
        let now = self.scheduler.now();

        let (deadline, id, zone) = {
            let core = self.core.lock().unwrap();
            if core.state != TimerState::Cancelled {
                return Ok(());
            }

            (core.deadline, core.id, core.zone)
        };

        if deadline < now {
            return Err(SchedulingError::TimerNotInFuture {
                timer: id,
                zone: self.scheduler.zone_name(zone),
                deadline,
                now,
            });
        }

        let seq = {
            let mut core = self.core.lock().unwrap();
            core.state = TimerState::Pending;
            core.seq += 1;
            core.seq
        };
        self.scheduler
            .register_timer(self.core.clone(), id, zone, deadline, seq);

        Ok(())
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.core.lock().unwrap();

        f.debug_struct("Timer")
            .field("id", &core.id)
            .field("deadline", &core.deadline)
            .field("tick_count", &core.tick_count)
            .finish_non_exhaustive()
    }
}

/// Dispatches one pulled event-queue entry.
///
/// Stale entries (cancelled or rescheduled since insertion) are discarded.
/// The callback runs with no lock held; afterwards the firing count is
/// advanced and, unless the callback cancelled the timer, a periodic timer
/// is re-registered one period after its previous deadline.
pub(crate) fn fire(entry: EventEntry, scheduler: &Scheduler) -> Result<(), TaskPanic> {
    let (mut callback, timer) = {
        let mut core = entry.core.lock().unwrap();
        if core.seq != entry.seq || core.state != TimerState::Pending {
            return Ok(());
        }
        core.state = TimerState::Firing;
        let callback = core
            .callback
            .take()
            .expect("a pending timer always holds its callback");

        (callback, Timer::new(entry.core.clone(), scheduler.clone()))
    };

    #[cfg(feature = "tracing")]
    tracing::trace!(
        target: env!("CARGO_PKG_NAME"),
        timer = %timer.id(),
        time = %scheduler.now(),
        "timer fired"
    );

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(&timer)));

    let mut core = entry.core.lock().unwrap();
    core.callback = Some(callback);
    core.tick_count += 1;

    match core.state {
        TimerState::Firing => {
            if let Some(period) = core.period {
                core.deadline = core.deadline + period;
                core.seq += 1;
                core.state = TimerState::Pending;
                let (deadline, seq) = (core.deadline, core.seq);
                drop(core);

                scheduler.defer_reinsert(entry.core.clone(), deadline, seq);
            } else {
                core.state = TimerState::Done;
                let (zone, id) = (core.zone, core.id);
                drop(core);

                scheduler.deregister_timer(zone, id);
            }
        }
        TimerState::Cancelled => {
            // Self-cancelled from the callback. Keep the cadence of a
            // periodic timer so a later resume continues where it left off.
            if let Some(period) = core.period {
                core.deadline = core.deadline + period;
            }
        }
        TimerState::Pending | TimerState::Done => {}
    }

    outcome.map_err(TaskPanic)
}
