//! Hierarchical clock zones.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::num::NonZeroU64;
use std::sync::{Arc, Mutex};

use crate::time::{SimDuration, SimTime, TickPeriod};

use super::futures::{Delay, WithZone};
use super::scheduler::{EventEntry, Scheduler, SchedulingError};
use super::timer::{TimerCore, TimerId, TimerState};

/// Identifier of a zone record in the scheduler registry.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub(crate) struct ZoneId(pub(crate) usize);

/// Registry record of a clock zone.
pub(crate) struct ZoneRecord {
    /// Full dotted name.
    pub(crate) name: Arc<str>,
    /// Parent zone; `None` for the root zone.
    pub(crate) parent: Option<ZoneId>,
    pub(crate) period: TickPeriod,
    /// Live timers owned by tasks launched under this zone, in creation
    /// order.
    pub(crate) timers: BTreeMap<TimerId, Arc<Mutex<TimerCore>>>,
    /// Captured timers and capture time while the zone is suspended.
    pub(crate) suspended: Option<SuspendedSet>,
}

/// The timers cancelled by a bulk suspension, pending resume.
pub(crate) struct SuspendedSet {
    pub(crate) at: SimTime,
    pub(crate) timers: Vec<Arc<Mutex<TimerCore>>>,
}

/// A scoped scaling of the tick period.
///
/// A clock zone forks a new timing context off its parent: its tick period
/// is the parent period multiplied by a positive integer divisor, and its
/// full name extends the parent name with a dot-separated component. Any
/// task wrapped with [`run`](ClockZone::run) expresses its delays in this
/// zone's ticks, and every timer such a task creates is owned by the zone,
/// which makes the zone a unit of bulk suspension.
///
/// The root zone is the simulation's own zone (divisor 1); it is returned by
/// [`Simulation::root_zone`](super::Simulation::root_zone).
///
/// # Examples
///
/// ```
/// use std::num::NonZeroU64;
/// use picosim::simulation::{ClockZone, Simulation};
/// use picosim::time::{SimDuration, TickPeriod};
///
/// let mut simu = Simulation::new(TickPeriod::from_picos(10).unwrap());
/// let half = ClockZone::new("half", &simu.root_zone(), NonZeroU64::new(2).unwrap());
///
/// assert_eq!(half.full_name(), "root.half");
/// assert_eq!(half.tick_period().as_picos(), 20);
///
/// // One `half` tick spans two root ticks.
/// let scheduler = simu.scheduler();
/// let zone = half.clone();
/// simu.run(zone.run(async move {
///     scheduler.delay(1).await;
/// }))
/// .unwrap();
/// simu.elapse(SimDuration::from_picos(100)).unwrap();
///
/// assert_eq!(half.elapsed_ticks(), 1);
/// assert_eq!(simu.elapsed_ticks(), 2);
/// ```
#[derive(Clone)]
pub struct ClockZone {
    scheduler: Scheduler,
    id: ZoneId,
    name: Arc<str>,
    period: TickPeriod,
}

impl ClockZone {
    /// Creates a zone running `divisor` times slower than `parent`.
    ///
    /// # Panics
    ///
    /// Panics if the derived tick period overflows the representable range.
    pub fn new(name: &str, parent: &ClockZone, divisor: NonZeroU64) -> Self {
        let period = parent
            .period
            .checked_mul(divisor)
            .expect("the derived tick period is outside the representable range");
        let name: Arc<str> = format!("{}.{}", parent.name, name).into();

        let id = parent.scheduler.register_zone(ZoneRecord {
            name: name.clone(),
            parent: Some(parent.id),
            period,
            timers: BTreeMap::new(),
            suspended: None,
        });

        Self {
            scheduler: parent.scheduler.clone(),
            id,
            name,
            period,
        }
    }

    pub(crate) fn from_parts(
        scheduler: Scheduler,
        id: ZoneId,
        name: Arc<str>,
        period: TickPeriod,
    ) -> Self {
        Self {
            scheduler,
            id,
            name,
            period,
        }
    }

    pub(crate) fn id(&self) -> ZoneId {
        self.id
    }

    pub(crate) fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Returns the full dotted name of the zone.
    pub fn full_name(&self) -> &str {
        &self.name
    }

    /// Returns the tick period of the zone.
    pub fn tick_period(&self) -> TickPeriod {
        self.period
    }

    /// Returns the number of whole ticks of this zone that have elapsed.
    pub fn elapsed_ticks(&self) -> u64 {
        self.scheduler.now().elapsed_ticks(self.period)
    }

    /// Runs a future with this zone as its ambient timing context.
    ///
    /// Every poll of `future` sees this zone installed, so all the delays it
    /// awaits are counted in this zone's ticks and all the timers it creates
    /// are owned by this zone. Leaving the scope restores the enclosing
    /// context, including across suspensions. The adapter composes with
    /// [`Scheduler::spawn`](super::Scheduler::spawn) to launch concurrent
    /// tasks under the zone.
    pub fn run<F: Future>(&self, future: F) -> WithZone<F> {
        WithZone::new(future, self.clone())
    }

    /// Suspends the calling task for `ticks` of *this zone's* clock.
    ///
    /// Unlike [`run`](ClockZone::run), this does not change the ambient
    /// context: it is meant for cross-hierarchy waits, and the underlying
    /// timer remains owned by the caller's own zone.
    pub fn delay(&self, ticks: u64) -> Delay {
        Delay::new(
            self.scheduler.clone(),
            SimDuration::from_ticks(ticks, self.period),
        )
    }

    /// Cancels every active timer owned by this zone or one of its
    /// descendants, recording the set and the suspension time.
    ///
    /// Idempotent: a second `suspend` before [`resume`](ClockZone::resume)
    /// is a no-op.
    pub fn suspend(&self) {
        let mut inner = self.scheduler.inner().lock().unwrap();

        if inner.zones[self.id.0].suspended.is_some() {
            return;
        }

        let mut captured = Vec::new();
        for zone in inner.descendant_zones(self.id) {
            let record = &mut inner.zones[zone.0];
            captured.extend(std::mem::take(&mut record.timers).into_values());
        }
        // Creation order, so a resume preserves intra-deadline ordering.
        captured.sort_by_key(|core| core.lock().unwrap().id);

        for core in &captured {
            let mut core = core.lock().unwrap();
            core.state = TimerState::Cancelled;
            core.seq += 1;
        }

        let at = inner.now;

        #[cfg(feature = "tracing")]
        tracing::trace!(
            target: env!("CARGO_PKG_NAME"),
            zone = %self.name,
            timers = captured.len(),
            time = %at,
            "zone suspended"
        );

        inner.zones[self.id.0].suspended = Some(SuspendedSet {
            at,
            timers: captured,
        });
    }

    /// Re-registers the timers captured by [`suspend`](ClockZone::suspend),
    /// shifting every deadline by the time spent suspended.
    ///
    /// After a successful resume, each timer's next firing occurs exactly as
    /// far behind its original schedule as the zone was suspended. The
    /// operation is all-or-nothing: if any shifted deadline would precede
    /// the current time, [`SchedulingError::TimerNotInFuture`] is returned
    /// and the captured set is retained. A `resume` with no preceding
    /// `suspend` is a no-op.
    pub fn resume(&self) -> Result<(), SchedulingError> {
        let mut inner = self.scheduler.inner().lock().unwrap();

        let Some(set) = inner.zones[self.id.0].suspended.take() else {
            return Ok(());
        };
        let now = inner.now;
        let delta = now - set.at;

        let mut failure = None;
        for core in &set.timers {
            let core = core.lock().unwrap();
            let shifted = core.deadline + delta;
            if shifted < now {
                failure = Some(SchedulingError::TimerNotInFuture {
                    timer: core.id,
                    zone: inner.zone_name(core.zone),
                    deadline: shifted,
                    now,
                });
                break;
            }
        }
        if let Some(err) = failure {
            inner.zones[self.id.0].suspended = Some(set);

            return Err(err);
        }

        #[cfg(feature = "tracing")]
        tracing::trace!(
            target: env!("CARGO_PKG_NAME"),
            zone = %self.name,
            timers = set.timers.len(),
            shift = %delta,
            "zone resumed"
        );

        for core in set.timers {
            let (id, zone, deadline, seq) = {
                let mut core = core.lock().unwrap();
                core.deadline = core.deadline + delta;
                core.state = TimerState::Pending;
                core.seq += 1;

                (core.id, core.zone, core.deadline, core.seq)
            };

            inner.queue.insert(
                deadline,
                EventEntry {
                    core: core.clone(),
                    seq,
                },
            );
            inner.zones[zone.0].timers.insert(id, core);
        }

        Ok(())
    }
}

impl fmt::Debug for ClockZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClockZone")
            .field("name", &self.name)
            .field("tick_period", &self.period)
            .finish_non_exhaustive()
    }
}
