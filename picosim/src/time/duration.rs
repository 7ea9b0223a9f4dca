//! Spans of virtual time and clock tick periods.

use std::fmt;
use std::num::NonZeroU64;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

/// A signed span of virtual time with picosecond resolution.
///
/// A duration is a plain picosecond count. It may be negative, which makes
/// the result of timestamp subtraction well-defined in either direction;
/// scheduling operations reject negative durations with
/// [`SchedulingError::InvalidDuration`](crate::simulation::SchedulingError).
/// A zero duration is legal and distinct from "no delay": a zero-delay
/// timer fires in a later pass of the wheel within the same instant.
///
/// # Examples
///
/// ```
/// use picosim::time::SimDuration;
///
/// assert_eq!(SimDuration::from_nanos(1), SimDuration::from_picos(1_000));
/// assert!((SimDuration::ZERO - SimDuration::from_picos(1)).is_negative());
/// ```
#[derive(Copy, Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct SimDuration {
    picos: i64,
}

impl SimDuration {
    /// A duration of zero.
    pub const ZERO: Self = Self { picos: 0 };

    /// Creates a duration from a picosecond count.
    pub const fn from_picos(picos: i64) -> Self {
        Self { picos }
    }

    /// Creates a duration from a nanosecond count.
    pub const fn from_nanos(nanos: i64) -> Self {
        Self {
            picos: nanos * 1_000,
        }
    }

    /// Creates a duration from a microsecond count.
    pub const fn from_micros(micros: i64) -> Self {
        Self {
            picos: micros * 1_000_000,
        }
    }

    /// Creates a duration from a millisecond count.
    pub const fn from_millis(millis: i64) -> Self {
        Self {
            picos: millis * 1_000_000_000,
        }
    }

    /// Creates a duration from a second count.
    pub const fn from_secs(secs: i64) -> Self {
        Self {
            picos: secs * 1_000_000_000_000,
        }
    }

    /// Creates a duration spanning the specified number of ticks of a clock.
    ///
    /// # Panics
    ///
    /// Panics if the resulting picosecond count overflows the representable
    /// range.
    pub fn from_ticks(ticks: u64, period: TickPeriod) -> Self {
        let picos = ticks as i128 * period.as_picos() as i128;

        Self {
            picos: i64::try_from(picos).expect("tick count overflows the duration range"),
        }
    }

    /// Returns the picosecond count.
    pub const fn as_picos(&self) -> i64 {
        self.picos
    }

    /// Reports whether the duration is zero.
    pub const fn is_zero(&self) -> bool {
        self.picos == 0
    }

    /// Reports whether the duration is strictly negative.
    pub const fn is_negative(&self) -> bool {
        self.picos < 0
    }

    /// Checked duration addition, returning `None` on overflow.
    pub const fn checked_add(self, rhs: Self) -> Option<Self> {
        match self.picos.checked_add(rhs.picos) {
            Some(picos) => Some(Self { picos }),
            None => None,
        }
    }
}

impl Add for SimDuration {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        self.checked_add(rhs).expect("duration addition overflow")
    }
}

impl AddAssign for SimDuration {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for SimDuration {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self {
            picos: self
                .picos
                .checked_sub(rhs.picos)
                .expect("duration subtraction overflow"),
        }
    }
}

impl SubAssign for SimDuration {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl Neg for SimDuration {
    type Output = Self;

    fn neg(self) -> Self {
        Self { picos: -self.picos }
    }
}

impl Mul<i64> for SimDuration {
    type Output = Self;

    fn mul(self, rhs: i64) -> Self {
        Self {
            picos: self
                .picos
                .checked_mul(rhs)
                .expect("duration multiplication overflow"),
        }
    }
}

impl fmt::Display for SimDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ps", self.picos)
    }
}

/// The strictly positive duration of one clock tick, in picoseconds.
///
/// The tick period of the root scheduler is fixed at construction of the
/// simulation; child [`ClockZone`](crate::simulation::ClockZone)s derive
/// theirs by multiplying the parent period by a positive integer divisor.
/// The zero-period case is unrepresentable.
///
/// # Examples
///
/// ```
/// use std::num::NonZeroU64;
/// use picosim::time::TickPeriod;
///
/// let root = TickPeriod::from_picos(10).unwrap();
/// let slow = root.checked_mul(NonZeroU64::new(4).unwrap()).unwrap();
///
/// assert_eq!(slow.as_picos(), 40);
/// assert!(TickPeriod::from_picos(0).is_none());
/// ```
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct TickPeriod(NonZeroU64);

impl TickPeriod {
    /// Creates a tick period from a picosecond count, or `None` if the count
    /// is zero.
    pub const fn from_picos(picos: u64) -> Option<Self> {
        match NonZeroU64::new(picos) {
            Some(picos) => Some(Self(picos)),
            None => None,
        }
    }

    /// Returns the picosecond count.
    pub const fn as_picos(&self) -> u64 {
        self.0.get()
    }

    /// Derives the period of a clock running `divisor` times slower,
    /// returning `None` on overflow.
    pub fn checked_mul(&self, divisor: NonZeroU64) -> Option<Self> {
        self.0.checked_mul(divisor).map(Self)
    }
}

impl fmt::Display for TickPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ps", self.0.get())
    }
}
