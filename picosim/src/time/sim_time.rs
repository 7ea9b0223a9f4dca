//! Absolute virtual timestamps.

use std::fmt;
use std::ops::{Add, AddAssign, Sub};

use super::{SimDuration, TickPeriod};

/// An absolute virtual timestamp with picosecond resolution.
///
/// A `SimTime` counts the picoseconds elapsed since [`SimTime::EPOCH`], the
/// instant at which every simulation starts. The current simulation time is
/// monotonically non-decreasing across the life of a run: it only moves when
/// the event wheel advances to the deadline of a scheduled timer.
///
/// # Examples
///
/// ```
/// use picosim::time::{SimDuration, SimTime};
///
/// let t = SimTime::EPOCH + SimDuration::from_nanos(1);
///
/// assert_eq!(t.as_picos(), 1_000);
/// assert_eq!(t - SimTime::EPOCH, SimDuration::from_nanos(1));
/// ```
#[derive(Copy, Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct SimTime {
    picos: u64,
}

impl SimTime {
    /// The start of the virtual time axis.
    pub const EPOCH: Self = Self { picos: 0 };

    /// The latest representable timestamp.
    pub const MAX: Self = Self { picos: u64::MAX };

    /// Creates a timestamp from a picosecond count since the epoch.
    pub const fn from_picos(picos: u64) -> Self {
        Self { picos }
    }

    /// Returns the picosecond count since the epoch.
    pub const fn as_picos(&self) -> u64 {
        self.picos
    }

    /// Returns the number of whole ticks of a clock with the specified
    /// period that have elapsed at this timestamp.
    pub const fn elapsed_ticks(&self, period: TickPeriod) -> u64 {
        self.picos / period.as_picos()
    }

    /// Checked timestamp offset, returning `None` when the result would
    /// precede the epoch or overflow the representable range.
    pub const fn checked_add(self, duration: SimDuration) -> Option<Self> {
        let picos = duration.as_picos();
        let shifted = if picos >= 0 {
            self.picos.checked_add(picos as u64)
        } else {
            self.picos.checked_sub(picos.unsigned_abs())
        };

        match shifted {
            Some(picos) => Some(Self { picos }),
            None => None,
        }
    }
}

impl Add<SimDuration> for SimTime {
    type Output = Self;

    fn add(self, rhs: SimDuration) -> Self {
        self.checked_add(rhs)
            .expect("the offset timestamp is outside the virtual time axis")
    }
}

impl AddAssign<SimDuration> for SimTime {
    fn add_assign(&mut self, rhs: SimDuration) {
        *self = *self + rhs;
    }
}

impl Sub for SimTime {
    type Output = SimDuration;

    fn sub(self, rhs: Self) -> SimDuration {
        let diff = self.picos as i128 - rhs.picos as i128;

        SimDuration::from_picos(i64::try_from(diff).expect("virtual time difference overflow"))
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ps", self.picos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_offsets() {
        let t = SimTime::from_picos(100);

        assert_eq!(t + SimDuration::from_picos(20), SimTime::from_picos(120));
        assert_eq!(t + SimDuration::from_picos(-100), SimTime::EPOCH);
        assert_eq!(t.checked_add(SimDuration::from_picos(-101)), None);
    }

    #[test]
    fn timestamp_differences_are_signed() {
        let earlier = SimTime::from_picos(100);
        let later = SimTime::from_picos(250);

        assert_eq!(later - earlier, SimDuration::from_picos(150));
        assert_eq!(earlier - later, SimDuration::from_picos(-150));
    }

    #[test]
    fn elapsed_ticks_truncate() {
        let period = TickPeriod::from_picos(40).unwrap();

        assert_eq!(SimTime::from_picos(79).elapsed_ticks(period), 1);
        assert_eq!(SimTime::from_picos(80).elapsed_ticks(period), 2);
    }
}
