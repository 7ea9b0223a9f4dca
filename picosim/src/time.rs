//! Virtual simulation time.
//!
//! This module provides the picosecond-granular time types shared by the
//! whole kernel:
//!
//! * [`SimTime`]: an absolute virtual timestamp,
//! * [`SimDuration`]: a signed span of virtual time,
//! * [`TickPeriod`]: the strictly positive duration of one clock tick.
//!
//! All durations are expressed in picoseconds; conversions from coarser
//! units are exact. Virtual time has no relationship whatsoever with the
//! wall clock: it only advances when the simulation dispatches events.
//!
//! # Examples
//!
//! ```
//! use picosim::time::{SimDuration, SimTime, TickPeriod};
//!
//! let period = TickPeriod::from_picos(10).unwrap();
//! let t = SimTime::EPOCH + SimDuration::from_ticks(8, period);
//!
//! assert_eq!(t.as_picos(), 80);
//! assert_eq!(t.elapsed_ticks(period), 8);
//! assert_eq!(t - SimTime::EPOCH, SimDuration::from_picos(80));
//! ```

mod duration;
mod sim_time;

pub use duration::{SimDuration, TickPeriod};
pub use sim_time::SimTime;
