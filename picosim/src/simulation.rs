//! Discrete-event simulation management.
//!
//! This module contains most notably the [`Simulation`] environment, the
//! [`Scheduler`] handle that cooperative tasks capture, the [`Timer`] and
//! [`ClockZone`] types, and the futures produced by the scheduling API.
//!
//! # Simulation lifecycle
//!
//! The lifecycle of a simulation typically comprises the following stages:
//!
//! 1. creation of a [`Simulation`] with a fixed root tick period,
//! 2. optional creation of [`ClockZone`]s dividing the root clock,
//! 3. spawning of the initial cooperative tasks with [`Simulation::run`],
//! 4. discrete-time simulation, alternating [`Simulation::elapse`] calls
//!    with observation of the state the tasks left behind.
//!
//! Exactly one simulation is meant to be active at a time; a simulation
//! value can be reused for a new run after [`Simulation::reset`].
//!
//! # Practical considerations
//!
//! ## Starvation is not an error
//!
//! When every task has reached a suspension point that no remaining event
//! can complete — for instance a task awaiting a signal no other task will
//! ever drive — [`Simulation::elapse`] simply returns once the event queue
//! is exhausted, with the starved tasks left pending. This mirrors the
//! "expected deadlock" at the end of a time slice and is indistinguishable
//! from normal completion by design; it is up to the bench author to assert
//! on the outputs the tasks were supposed to produce.
//!
//! ## Panics
//!
//! A panic in a task, a timer callback or a microtask is caught and
//! returned as [`ExecutionError::Panic`] from the [`run`](Simulation::run)
//! or [`elapse`](Simulation::elapse) call that dispatched it. The
//! simulation is then halted: every subsequent call returns
//! [`ExecutionError::Halted`] until [`reset`](Simulation::reset) is called.

mod futures;
mod scheduler;
mod timer;
mod zone;

pub use futures::{Delay, TaskHandle, WithZone};
pub use scheduler::{Scheduler, SchedulingError};
pub use timer::{Timer, TimerId};
pub use zone::ClockZone;

use std::any::Any;
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};

use crate::executor::Executor;
use crate::time::{SimDuration, SimTime, TickPeriod};

use scheduler::SchedulerInner;

/// Simulation environment.
///
/// A `Simulation` owns the virtual clock, the event and microtask queues,
/// the clock-zone registry and the cooperative task executor. It is driven
/// from the outside by spawning tasks with [`run`](Simulation::run) and
/// advancing virtual time with [`elapse`](Simulation::elapse); tasks
/// interact with it from the inside through cloned [`Scheduler`] handles.
///
/// A call to `elapse` repeatedly:
///
/// 1. polls every runnable task to its next suspension point,
/// 2. drains the microtask queue, one microtask per pass,
/// 3. advances the virtual time to the earliest timer deadline within the
///    horizon and fires every timer due at that instant, in registration
///    order.
///
/// It returns when the event queue is empty or the horizon is reached,
/// whichever comes first. An idle queue is a successful completion, not an
/// error.
pub struct Simulation {
    executor: Executor,
    scheduler: Scheduler,
    halted: bool,
}

impl Simulation {
    /// Creates a simulation with the specified root tick period.
    pub fn new(tick_period: TickPeriod) -> Self {
        Self {
            executor: Executor::new(),
            scheduler: Scheduler::new(tick_period),
            halted: false,
        }
    }

    /// Returns a handle to the scheduler.
    pub fn scheduler(&self) -> Scheduler {
        self.scheduler.clone()
    }

    /// Returns a handle to the root clock zone.
    pub fn root_zone(&self) -> ClockZone {
        self.scheduler.root_zone()
    }

    /// Returns the current simulation time.
    pub fn now(&self) -> SimTime {
        self.scheduler.now()
    }

    /// Returns the number of whole root ticks that have elapsed.
    pub fn elapsed_ticks(&self) -> u64 {
        self.scheduler.elapsed_ticks()
    }

    /// Spawns `task` as a cooperative task and settles the current instant.
    ///
    /// The task runs under the root zone until its first suspension point;
    /// microtasks and timers already due at the current instant are
    /// dispatched, but virtual time does not advance.
    pub fn run<F>(&mut self, task: F) -> Result<TaskHandle<F::Output>, ExecutionError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        if self.halted {
            return Err(ExecutionError::Halted);
        }

        let handle = self.scheduler.spawn(task);
        let now = self.now();
        self.settle(now)?;

        Ok(handle)
    }

    /// Advances virtual time toward `now + duration`.
    ///
    /// Returns when the event queue is empty or the horizon is reached. If
    /// events remain beyond the horizon, the simulation time lands exactly
    /// on the horizon; if the queue drains completely, it stays at the last
    /// dispatched deadline.
    pub fn elapse(&mut self, duration: SimDuration) -> Result<(), ExecutionError> {
        if self.halted {
            return Err(ExecutionError::Halted);
        }
        if duration.is_negative() {
            return Err(SchedulingError::InvalidDuration {
                entity: self.root_zone().full_name().to_string(),
                duration,
            }
            .into());
        }

        let horizon = self.now() + duration;
        self.settle(horizon)
    }

    /// Tears down all tasks, queues, timers and zones, returning to a fresh
    /// simulation with the same root tick period.
    ///
    /// This is the mandatory recovery step after a task panic. Handles
    /// obtained before the reset — schedulers excepted — must be dropped:
    /// clock zones and timers from a previous run are no longer registered.
    pub fn reset(&mut self) {
        self.executor.clear();

        let mut inner = self.scheduler.inner().lock().unwrap();
        let tick_period = inner.tick_period;
        *inner = SchedulerInner::new(tick_period);
        drop(inner);

        self.halted = false;
    }

    /// Runs the scheduling loop up to the specified horizon.
    fn settle(&mut self, horizon: SimTime) -> Result<(), ExecutionError> {
        loop {
            // Poll tasks to quiescence, accounting for tasks spawned from
            // within polls.
            loop {
                self.drain_spawned();
                if let Err(panic) = self.executor.run_until_stalled() {
                    return Err(self.halt(panic.0));
                }
                if self.scheduler.inner().lock().unwrap().spawned.is_empty() {
                    break;
                }
            }

            // Microtasks run one per pass, with a full task drain in
            // between, and always before any timer due at the instant.
            let microtask = self.scheduler.inner().lock().unwrap().microtasks.pop_front();
            if let Some(microtask) = microtask {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || microtask())) {
                    return Err(self.halt(payload));
                }
                continue;
            }

            // Advance to the next live deadline within the horizon.
            let due = {
                let mut inner = self.scheduler.inner().lock().unwrap();
                // Periodic re-registrations stay invisible to later passes
                // of the current instant.
                let next = inner.next_live_deadline();
                if next != Some(inner.now) {
                    inner.flush_deferred();
                }
                match inner.next_live_deadline() {
                    // Idle queue: successful completion, `now` stays put.
                    None => return Ok(()),
                    Some(deadline) if deadline > horizon => {
                        inner.now = horizon;

                        return Ok(());
                    }
                    Some(deadline) => {
                        inner.now = deadline;
                        // Snapshot of the entries due at this instant:
                        // timers registered by the callbacks below run in a
                        // later pass of the wheel.
                        inner.pull_due(deadline)
                    }
                }
            };

            for entry in due {
                if let Err(panic) = timer::fire(entry, &self.scheduler) {
                    return Err(self.halt(panic.0));
                }
            }
        }
    }

    /// Moves freshly spawned tasks onto the executor.
    fn drain_spawned(&mut self) {
        let spawned = std::mem::take(&mut self.scheduler.inner().lock().unwrap().spawned);

        for request in spawned {
            let context = crate::context::TaskContext {
                scheduler: self.scheduler.clone(),
                zone: request.zone,
            };
            self.executor.spawn(request.future, context);
        }
    }

    fn halt(&mut self, payload: Box<dyn Any + Send + 'static>) -> ExecutionError {
        self.halted = true;

        ExecutionError::Panic(payload)
    }
}

impl fmt::Debug for Simulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pending_events = self.scheduler.inner().lock().unwrap().queue.len();

        f.debug_struct("Simulation")
            .field("now", &self.now())
            .field("pending_events", &pending_events)
            .field("halted", &self.halted)
            .finish_non_exhaustive()
    }
}

/// Error returned when a simulation step cannot complete.
pub enum ExecutionError {
    /// A cooperative task, a timer callback or a microtask panicked; the
    /// panic payload is carried over.
    Panic(Box<dyn Any + Send + 'static>),
    /// The simulation was halted by an earlier panic and must be reset.
    Halted,
    /// A scheduling contract was violated.
    Scheduling(SchedulingError),
}

impl ExecutionError {
    /// Best-effort extraction of a panic message.
    fn panic_message(payload: &(dyn Any + Send)) -> &str {
        payload
            .downcast_ref::<&'static str>()
            .copied()
            .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
            .unwrap_or("<opaque payload>")
    }
}

impl fmt::Debug for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Panic(payload) => f
                .debug_tuple("Panic")
                .field(&Self::panic_message(payload.as_ref()))
                .finish(),
            Self::Halted => f.debug_tuple("Halted").finish(),
            Self::Scheduling(err) => f.debug_tuple("Scheduling").field(err).finish(),
        }
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Panic(payload) => {
                write!(
                    f,
                    "a simulation task panicked: {}",
                    Self::panic_message(payload.as_ref())
                )
            }
            Self::Halted => {
                write!(f, "the simulation was halted by a panic and must be reset")
            }
            Self::Scheduling(err) => fmt::Display::fmt(err, f),
        }
    }
}

impl Error for ExecutionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Scheduling(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SchedulingError> for ExecutionError {
    fn from(err: SchedulingError) -> Self {
        Self::Scheduling(err)
    }
}
