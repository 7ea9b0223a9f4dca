//! Scheduling handle, queues and scheduling errors.

use std::collections::VecDeque;
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};

use futures_channel::oneshot;
use slab::Slab;

use crate::context;
use crate::executor::TaskFuture;
use crate::time::{SimDuration, SimTime, TickPeriod};
use crate::util::priority_queue::PriorityQueue;

use super::futures::{Delay, TaskHandle};
use super::timer::{Timer, TimerCallback, TimerCore, TimerId, TimerState};
use super::zone::{ClockZone, ZoneId, ZoneRecord};

/// Shorthand for the event queue type.
///
/// Keys are deadlines; the queue's stable ordering of equal keys is what
/// guarantees that timers due at the same instant fire in registration
/// order.
pub(crate) type EventQueue = PriorityQueue<SimTime, EventEntry>;

/// Shorthand for the boxed microtask type.
pub(crate) type Microtask = Box<dyn FnOnce() + Send + 'static>;

/// A scheduled dispatch of a timer.
pub(crate) struct EventEntry {
    pub(crate) core: Arc<Mutex<TimerCore>>,
    /// Registration sequence number at insertion; a mismatch with the
    /// record marks the entry stale.
    pub(crate) seq: u64,
}

/// A task waiting to be moved onto the executor.
pub(crate) struct SpawnRequest {
    pub(crate) future: TaskFuture,
    /// The zone the task will run under.
    pub(crate) zone: ClockZone,
}

/// State shared by the simulation, the scheduler handles and the zones.
pub(crate) struct SchedulerInner {
    pub(crate) queue: EventQueue,
    pub(crate) microtasks: VecDeque<Microtask>,
    pub(crate) now: SimTime,
    /// Tick period of the root zone.
    pub(crate) tick_period: TickPeriod,
    pub(crate) zones: Slab<ZoneRecord>,
    /// Tasks spawned since the last executor drain.
    pub(crate) spawned: Vec<SpawnRequest>,
    /// Periodic re-registrations held back until the current instant is
    /// exhausted, so that the next firing of a periodic timer sorts behind
    /// any same-deadline timer registered later within the instant.
    deferred: Vec<(Arc<Mutex<TimerCore>>, SimTime, u64)>,
    next_timer_id: u64,
}

impl SchedulerInner {
    pub(crate) fn new(tick_period: TickPeriod) -> Self {
        let mut zones = Slab::new();
        let root = zones.insert(ZoneRecord {
            name: "root".into(),
            parent: None,
            period: tick_period,
            timers: std::collections::BTreeMap::new(),
            suspended: None,
        });
        debug_assert_eq!(root, 0);

        Self {
            queue: PriorityQueue::new(),
            microtasks: VecDeque::new(),
            now: SimTime::EPOCH,
            tick_period,
            zones,
            spawned: Vec::new(),
            deferred: Vec::new(),
            next_timer_id: 0,
        }
    }

    /// Moves the held-back periodic re-registrations into the event queue.
    pub(crate) fn flush_deferred(&mut self) {
        let deferred = std::mem::take(&mut self.deferred);
        for (core, deadline, seq) in deferred {
            self.queue.insert(deadline, EventEntry { core, seq });
        }
    }

    pub(crate) fn zone_name(&self, zone: ZoneId) -> String {
        self.zones[zone.0].name.to_string()
    }

    /// Returns the ids of `ancestor` and of every zone below it.
    pub(crate) fn descendant_zones(&self, ancestor: ZoneId) -> Vec<ZoneId> {
        self.zones
            .iter()
            .filter_map(|(id, _)| {
                let mut cursor = Some(ZoneId(id));
                while let Some(zone) = cursor {
                    if zone == ancestor {
                        return Some(ZoneId(id));
                    }
                    cursor = self.zones[zone.0].parent;
                }

                None
            })
            .collect()
    }

    /// Returns the deadline of the earliest live event, discarding stale
    /// entries along the way.
    pub(crate) fn next_live_deadline(&mut self) -> Option<SimTime> {
        loop {
            let live = {
                let (key, entry) = self.queue.peek()?;
                let core = entry.core.lock().unwrap();

                (core.seq == entry.seq && core.state == TimerState::Pending).then_some(*key)
            };

            match live {
                Some(deadline) => return Some(deadline),
                // Cancelled or rescheduled since insertion.
                None => {
                    self.queue.pull();
                }
            }
        }
    }

    /// Removes and returns all entries due at `deadline`, in insertion
    /// order.
    pub(crate) fn pull_due(&mut self, deadline: SimTime) -> Vec<EventEntry> {
        let mut due = Vec::new();
        while self.queue.peek().is_some_and(|(key, _)| *key == deadline) {
            due.push(self.queue.pull().unwrap().1);
        }

        due
    }
}

/// Handle to the scheduler of a simulation.
///
/// A `Scheduler` is a cheap clone of the handle returned by
/// [`Simulation::scheduler`](super::Simulation::scheduler); cooperative
/// tasks capture one to observe virtual time, suspend themselves, post
/// microtasks, register timers and spawn further tasks.
///
/// # Examples
///
/// A task creating a one-shot timer two ticks ahead.
///
/// ```
/// use picosim::simulation::Simulation;
/// use picosim::time::{SimDuration, TickPeriod};
///
/// let mut simu = Simulation::new(TickPeriod::from_picos(10).unwrap());
/// let scheduler = simu.scheduler();
///
/// scheduler
///     .create_timer(SimDuration::from_picos(20), |_| println!("ding"))
///     .unwrap();
/// simu.elapse(SimDuration::from_picos(100)).unwrap();
/// ```
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Mutex<SchedulerInner>>,
}

impl Scheduler {
    pub(crate) fn new(tick_period: TickPeriod) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SchedulerInner::new(tick_period))),
        }
    }

    pub(crate) fn inner(&self) -> &Mutex<SchedulerInner> {
        &self.inner
    }

    /// Returns the current simulation time.
    pub fn now(&self) -> SimTime {
        self.inner.lock().unwrap().now
    }

    /// Returns the number of whole root ticks that have elapsed.
    pub fn elapsed_ticks(&self) -> u64 {
        let inner = self.inner.lock().unwrap();

        inner.now.elapsed_ticks(inner.tick_period)
    }

    /// Returns the ambient tick period: the period of the zone the calling
    /// task runs under, or the root period outside of any task.
    pub fn tick_period(&self) -> TickPeriod {
        context::current_zone()
            .map(|zone| zone.tick_period())
            .unwrap_or_else(|| self.inner.lock().unwrap().tick_period)
    }

    /// Returns a handle to the root clock zone.
    pub fn root_zone(&self) -> ClockZone {
        let (name, period) = {
            let inner = self.inner.lock().unwrap();
            let record = &inner.zones[0];

            (record.name.clone(), record.period)
        };

        ClockZone::from_parts(self.clone(), ZoneId(0), name, period)
    }

    /// Enqueues a callback to run before the next time advance.
    ///
    /// Microtasks run in strict insertion order and are never delayed
    /// relative to timers due at the current instant.
    pub fn schedule_microtask<F>(&self, microtask: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner
            .lock()
            .unwrap()
            .microtasks
            .push_back(Box::new(microtask));
    }

    /// Registers a one-shot timer firing `delay` after the current time.
    ///
    /// The timer is owned by the ambient zone of the caller. A zero delay is
    /// valid: the timer fires in a later pass of the wheel within the
    /// current instant. A negative delay is rejected with
    /// [`SchedulingError::InvalidDuration`].
    pub fn create_timer<F>(&self, delay: SimDuration, callback: F) -> Result<Timer, SchedulingError>
    where
        F: FnMut(&Timer) + Send + 'static,
    {
        self.create_timer_inner(delay, None, Box::new(callback))
    }

    /// Registers a periodic timer first firing `delay` after the current
    /// time and then once per `period`.
    ///
    /// The period is captured at creation and reused for all firings; it
    /// must be strictly positive, otherwise
    /// [`SchedulingError::InvalidDuration`] is returned.
    pub fn create_periodic_timer<F>(
        &self,
        delay: SimDuration,
        period: SimDuration,
        callback: F,
    ) -> Result<Timer, SchedulingError>
    where
        F: FnMut(&Timer) + Send + 'static,
    {
        self.create_timer_inner(delay, Some(period), Box::new(callback))
    }

    fn create_timer_inner(
        &self,
        delay: SimDuration,
        period: Option<SimDuration>,
        callback: TimerCallback,
    ) -> Result<Timer, SchedulingError> {
        let zone = self.ambient_zone();

        if delay.is_negative() {
            return Err(SchedulingError::InvalidDuration {
                entity: zone.full_name().to_string(),
                duration: delay,
            });
        }
        if let Some(period) = period {
            if period <= SimDuration::ZERO {
                return Err(SchedulingError::InvalidDuration {
                    entity: zone.full_name().to_string(),
                    duration: period,
                });
            }
        }

        let mut inner = self.inner.lock().unwrap();
        let deadline = inner.now + delay;
        let id = TimerId::new(inner.next_timer_id);
        inner.next_timer_id += 1;

        let core = Arc::new(Mutex::new(TimerCore {
            id,
            deadline,
            period,
            callback: Some(callback),
            zone: zone.id(),
            state: TimerState::Pending,
            tick_count: 0,
            seq: 0,
        }));

        inner.queue.insert(
            deadline,
            EventEntry {
                core: core.clone(),
                seq: 0,
            },
        );
        inner.zones[zone.id().0].timers.insert(id, core.clone());

        Ok(Timer::new(core, self.clone()))
    }

    /// Suspends the calling task for `ticks` of its ambient clock.
    pub fn delay(&self, ticks: u64) -> Delay {
        let period = self.tick_period();

        Delay::new(self.clone(), SimDuration::from_ticks(ticks, period))
    }

    /// Suspends the calling task for exactly one delta cycle.
    ///
    /// Time does not advance: the task resumes in a later pass of the wheel
    /// within the current instant.
    pub fn delta(&self) -> Delay {
        Delay::new(self.clone(), SimDuration::ZERO)
    }

    /// Spawns a concurrent cooperative task under the ambient zone.
    ///
    /// The task starts running at the current instant, once the wheel next
    /// polls its tasks. The returned handle resolves to the task output, or
    /// to `None` if the simulation is reset before the task completes.
    pub fn spawn<F>(&self, task: F) -> TaskHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let zone = self.ambient_zone();
        let (sender, receiver) = oneshot::channel();
        let future = async move {
            let _ = sender.send(task.await);
        };

        #[cfg(feature = "tracing")]
        let future = {
            use tracing::Instrument;

            let span = tracing::info_span!(
                target: env!("CARGO_PKG_NAME"),
                "task",
                zone = %zone.full_name()
            );
            future.instrument(span)
        };

        self.inner.lock().unwrap().spawned.push(SpawnRequest {
            future: Box::pin(future),
            zone,
        });

        TaskHandle::new(receiver)
    }

    /// Runs `action` as a microtask and suspends until its result is
    /// available.
    ///
    /// The caller resumes within the same tick: the microtask runs before
    /// the next time advance and completes the suspension immediately.
    pub async fn blocking_microtask<T, F>(&self, action: F) -> T
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        self.schedule_microtask(move || {
            let _ = sender.send(action());
        });

        receiver
            .await
            .expect("the microtask was dropped before it could run")
    }

    /// Runs `action` as a zero-delay timer and suspends until its result is
    /// available.
    ///
    /// The caller resumes within the same tick, but after at least one delta
    /// cycle: the action runs in a later pass of the wheel, behind every
    /// pending microtask and every timer already due at the current instant.
    pub async fn blocking_delta<T, F>(&self, action: F) -> T
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let mut payload = Some((sender, action));
        self.create_timer(SimDuration::ZERO, move |_| {
            if let Some((sender, action)) = payload.take() {
                let _ = sender.send(action());
            }
        })
        .expect("a zero-length delay is always valid");

        receiver
            .await
            .expect("the delta action was dropped before it could run")
    }

    pub(crate) fn register_zone(&self, record: ZoneRecord) -> ZoneId {
        ZoneId(self.inner.lock().unwrap().zones.insert(record))
    }

    /// Inserts a timer in the event queue and in its zone's live set.
    pub(crate) fn register_timer(
        &self,
        core: Arc<Mutex<TimerCore>>,
        id: TimerId,
        zone: ZoneId,
        deadline: SimTime,
        seq: u64,
    ) {
        let mut inner = self.inner.lock().unwrap();
        inner.queue.insert(
            deadline,
            EventEntry {
                core: core.clone(),
                seq,
            },
        );
        if let Some(record) = inner.zones.get_mut(zone.0) {
            record.timers.insert(id, core);
        }
    }

    /// Queues a periodic re-registration; it becomes visible in the event
    /// queue once the current instant is exhausted.
    pub(crate) fn defer_reinsert(&self, core: Arc<Mutex<TimerCore>>, deadline: SimTime, seq: u64) {
        self.inner
            .lock()
            .unwrap()
            .deferred
            .push((core, deadline, seq));
    }

    /// Removes a timer from its zone's live set.
    pub(crate) fn deregister_timer(&self, zone: ZoneId, id: TimerId) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(record) = inner.zones.get_mut(zone.0) {
            record.timers.remove(&id);
        }
    }

    pub(crate) fn zone_name(&self, zone: ZoneId) -> String {
        self.inner.lock().unwrap().zone_name(zone)
    }

    /// The zone of the currently polled task, or the root zone outside of
    /// any task.
    fn ambient_zone(&self) -> ClockZone {
        context::current_zone().unwrap_or_else(|| self.root_zone())
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("now", &self.now())
            .finish_non_exhaustive()
    }
}

/// Error returned when a scheduling contract is violated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulingError {
    /// The requested delay is negative, or a repetition period is not
    /// strictly positive.
    InvalidDuration {
        /// Full name of the zone the request was issued under.
        entity: String,
        /// The offending duration.
        duration: SimDuration,
    },
    /// Resuming a timer would place its deadline before the current
    /// simulation time.
    TimerNotInFuture {
        /// The timer whose deadline lies in the past.
        timer: TimerId,
        /// Full name of the timer's owning zone.
        zone: String,
        /// The deadline that was requested.
        deadline: SimTime,
        /// The current simulation time.
        now: SimTime,
    },
}

impl fmt::Display for SchedulingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidDuration { entity, duration } => {
                write!(f, "invalid duration {duration} requested in zone '{entity}'")
            }
            Self::TimerNotInFuture {
                timer,
                zone,
                deadline,
                now,
            } => {
                write!(
                    f,
                    "{timer} in zone '{zone}' cannot be resumed: its deadline ({deadline}) \
                     precedes the current simulation time ({now})"
                )
            }
        }
    }
}

impl Error for SchedulingError {}
