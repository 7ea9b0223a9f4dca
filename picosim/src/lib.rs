//! A discrete-event simulation kernel for transaction-level modeling of
//! digital hardware systems.
//!
//! Picosim drives user-written cooperative tasks against a *virtual* time
//! axis with picosecond granularity: wall-clock time is irrelevant, and the
//! passage of time is produced exclusively by the kernel advancing a
//! monotonically non-decreasing counter as it dispatches events. The
//! simulator is deterministic and single-threaded by design.
//!
//! The kernel is made of four tightly coupled subsystems:
//!
//! * the **event wheel** ([`Simulation`](simulation::Simulation)), the
//!   cooperative scheduler that owns simulated time, orders events and polls
//!   user tasks to their suspension points,
//! * **timers and delta-cycle microtasks**
//!   ([`Timer`](simulation::Timer),
//!   [`Scheduler::schedule_microtask`](simulation::Scheduler::schedule_microtask)),
//!   the two event classes the wheel dispatches, with a fixed intra-instant
//!   ordering,
//! * **clock zones** ([`ClockZone`](simulation::ClockZone)), hierarchical
//!   on-the-fly clock dividers that scope the tick period for the tasks they
//!   launch and support bulk suspension of all the timers they contain,
//! * the **signal primitive** ([`Signal`](signal::Signal)), a 64-bit value
//!   with a two-phase update synchronized with delta cycles and edge-filtered
//!   wait/notify.
//!
//! Higher-level facilities (fifos, mutexes, registers, memories, routers)
//! are thin constructions atop these contracts and are left to the
//! application layer.
//!
//!
//! # A practical overview
//!
//! A simulation is created with a fixed root tick period and is driven from
//! the outside by alternating two activities:
//!
//! 1. spawning cooperative tasks with
//!    [`Simulation::run`](simulation::Simulation::run) or
//!    [`Scheduler::spawn`](simulation::Scheduler::spawn),
//! 2. advancing virtual time with
//!    [`Simulation::elapse`](simulation::Simulation::elapse).
//!
//! Tasks suspend by awaiting a [`delay`](simulation::Scheduler::delay), a
//! [signal change](signal::Signal::changed), a
//! [non-blocking assignment](signal::Signal::nba) or a
//! [blocking microtask](simulation::Scheduler::blocking_microtask); every
//! suspension resolves against the scheduler, never against the operating
//! system.
//!
//! ```
//! use picosim::simulation::Simulation;
//! use picosim::time::{SimDuration, SimTime, TickPeriod};
//!
//! // A simulation with a 10 ps root tick.
//! let mut simu = Simulation::new(TickPeriod::from_picos(10).unwrap());
//! let scheduler = simu.scheduler();
//!
//! // The root task waits 5 ticks (50 ps) and reports the time it woke at.
//! let mut wake_time = simu
//!     .run(async move {
//!         scheduler.delay(5).await;
//!         scheduler.now()
//!     })
//!     .unwrap();
//!
//! simu.elapse(SimDuration::from_picos(1_000)).unwrap();
//!
//! assert_eq!(
//!     wake_time.try_take(),
//!     Some(SimTime::EPOCH + SimDuration::from_picos(50))
//! );
//! ```
//!
//!
//! # Intra-instant ordering guarantees
//!
//! Determinism requires a strict ordering of everything that happens at a
//! single value of the virtual time. Within one instant:
//!
//! 1. microtasks run to exhaustion before any timer fires,
//! 2. timers due at the instant fire in registration order,
//! 3. a microtask enqueued from a timer callback runs before time advances
//!    again,
//! 4. a newly registered zero-delay timer runs in a *later* pass of the
//!    wheel: after the current microtask drain, but before time advances.
//!
//! The intra-instant hop produced by a zero-duration wait is called a *delta
//! cycle*; it is the mechanism signals use to stage their two-phase
//! non-blocking updates.
//!
//!
//! # Clock zones
//!
//! A [`ClockZone`](simulation::ClockZone) forks a new timing context off its
//! parent with a tick period multiplied by a positive integer divisor. A
//! task launched under a zone (or wrapped with
//! [`ClockZone::run`](simulation::ClockZone::run)) expresses all its delays
//! in that zone's ticks, and every timer it creates is owned by the zone so
//! that [`suspend`](simulation::ClockZone::suspend) and
//! [`resume`](simulation::ClockZone::resume) can freeze and release an
//! entire clock domain at once.
//!
//!
//! # Modules documentation
//!
//! * the [`simulation`] module covers the event wheel, timers, clock zones
//!   and the task-facing [`Scheduler`](simulation::Scheduler) handle,
//! * the [`signal`] module covers two-phase non-blocking assignment and
//!   edge filters,
//! * the [`time`] module covers the picosecond-granular virtual time types.
#![warn(missing_docs, missing_debug_implementations, unreachable_pub)]

pub(crate) mod context;
pub(crate) mod executor;
pub mod signal;
pub mod simulation;
pub mod time;
pub(crate) mod util;
