//! Two-phase non-blocking signal assignment.
//!
//! A [`Signal`] is a shared 64-bit variable whose writes do not take effect
//! until the delta-cycle boundary that follows them, emulating the
//! non-blocking assignment of hardware description languages.
//!
//! An assignment posted with [`Signal::nba`] goes through two phases:
//!
//! 1. the *commit phase* runs as a microtask, before the next time advance:
//!    it records the pending value (detecting conflicting same-delta
//!    writes), then
//! 2. after one zero-duration hop — so that it lands in a distinct delta —
//!    the *trigger phase* completes the pending change waiters and invokes
//!    the persistent observers whose [`EdgeFilter`] matches the transition.
//!
//! A signal triggers at most once per delta, and only when the delta
//! actually changed its value: rewriting the current value is legal and
//! silent. Conflicting writes of different values within one delta fail
//! with [`SignalError::MultipleNba`].
//!
//! # Examples
//!
//! Counting rising edges:
//!
//! ```
//! use std::sync::{Arc, Mutex};
//! use picosim::signal::{EdgeFilter, Signal};
//! use picosim::simulation::Simulation;
//! use picosim::time::TickPeriod;
//!
//! let mut simu = Simulation::new(TickPeriod::from_picos(10).unwrap());
//!
//! let signal = Signal::new();
//! let rising = Arc::new(Mutex::new(0));
//!
//! let counter = rising.clone();
//! signal.always_at(
//!     move |_| *counter.lock().unwrap() += 1,
//!     EdgeFilter::Pos,
//! );
//!
//! let driven = signal.clone();
//! simu.run(async move {
//!     driven.nba(1).await.unwrap();
//!     driven.nba(0).await.unwrap();
//!     driven.nba(5).await.unwrap();
//! })
//! .unwrap();
//!
//! assert_eq!(*rising.lock().unwrap(), 2);
//! ```

use std::error::Error;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context as PollContext, Poll, Waker};

use crate::context;

/// Monotonic source for auto-generated signal names.
static NEXT_SIGNAL_ID: AtomicU64 = AtomicU64::new(0);

/// A transition filter for signal waiters and observers.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EdgeFilter {
    /// Matches every value change.
    Any,
    /// Matches a rising edge: previous value zero, current value non-zero.
    Pos,
    /// Matches a falling edge: previous value non-zero, current value zero.
    Neg,
    /// Matches when the current value equals the given constant.
    Value(u64),
}

impl EdgeFilter {
    /// Evaluates the filter against a transition.
    pub fn matches(&self, previous: u64, current: u64) -> bool {
        match self {
            Self::Any => true,
            Self::Pos => previous == 0 && current != 0,
            Self::Neg => previous != 0 && current == 0,
            Self::Value(value) => current == *value,
        }
    }
}

/// Update phase of a signal.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Phase {
    /// A committed value is pending its trigger.
    Set,
    /// The last update has fully propagated.
    Triggered,
}

/// A shared 64-bit variable with two-phase non-blocking assignment.
///
/// Cloning a `Signal` clones the handle, not the variable: all clones
/// observe and drive the same value. See the [module documentation](self)
/// for the update protocol.
#[derive(Clone)]
pub struct Signal {
    name: Arc<str>,
    state: Arc<Mutex<SignalState>>,
}

struct SignalState {
    current: u64,
    previous: u64,
    phase: Phase,
    /// Whether the pending delta actually changed the value.
    changed: bool,
    waiters: Vec<Waiter>,
    observers: Vec<Observer>,
}

struct Waiter {
    slot: Arc<Mutex<WaiterSlot>>,
    filter: EdgeFilter,
}

struct WaiterSlot {
    done: bool,
    waker: Option<Waker>,
}

struct Observer {
    callback: Box<dyn FnMut(&Signal) + Send + 'static>,
    filter: EdgeFilter,
}

impl Signal {
    /// Creates a signal with value zero and an auto-generated name.
    pub fn new() -> Self {
        let id = NEXT_SIGNAL_ID.fetch_add(1, Ordering::Relaxed);

        Self::with_name(format!("signal-{id}"))
    }

    /// Creates a signal with value zero and the specified name.
    ///
    /// The name identifies the signal in error payloads.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into().into(),
            state: Arc::new(Mutex::new(SignalState {
                current: 0,
                previous: 0,
                phase: Phase::Triggered,
                changed: false,
                waiters: Vec::new(),
                observers: Vec::new(),
            })),
        }
    }

    /// Returns the signal name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the current value. Non-suspending.
    pub fn read_current(&self) -> u64 {
        self.state.lock().unwrap().current
    }

    /// Returns the value held before the last change. Non-suspending.
    pub fn read_previous(&self) -> u64 {
        self.state.lock().unwrap().previous
    }

    /// Posts a non-blocking assignment of `value` and suspends the calling
    /// task until the update has propagated.
    ///
    /// The commit runs as a microtask before the next time advance; the
    /// trigger runs one delta later, completing matching waiters and
    /// invoking matching observers. Within one delta, writes of a value
    /// different from the already-pending one fail with
    /// [`SignalError::MultipleNba`]; rewriting the pending value is
    /// idempotent. A same-value assignment propagates silently: `previous`
    /// is updated exactly when `current` changes, and observers only run on
    /// an actual change.
    ///
    /// # Panics
    ///
    /// Panics when called from outside a simulation task, as the two-phase
    /// update is staged through the ambient scheduler.
    pub async fn nba(&self, value: u64) -> Result<(), SignalError> {
        let scheduler = context::current_scheduler()
            .expect("signals can only be driven from within a simulation task");

        let state = self.state.clone();
        let name = self.name.clone();
        scheduler
            .blocking_microtask(move || commit(&state, &name, value))
            .await?;

        // One zero-duration hop so the trigger runs in a distinct delta.
        scheduler.delta().await;
        self.trigger();

        Ok(())
    }

    /// Returns a future resolving the next time a delta triggers this
    /// signal with a transition matching `filter`.
    ///
    /// Non-matching triggers leave the waiter pending. A matched waiter is
    /// delivered exactly once and then removed.
    pub fn changed(&self, filter: EdgeFilter) -> Changed {
        let slot = Arc::new(Mutex::new(WaiterSlot {
            done: false,
            waker: None,
        }));
        self.state.lock().unwrap().waiters.push(Waiter {
            slot: slot.clone(),
            filter,
        });

        Changed { slot }
    }

    /// Registers a persistent observer invoked in every triggering delta
    /// whose transition matches `filter`.
    pub fn always_at<F>(&self, callback: F, filter: EdgeFilter)
    where
        F: FnMut(&Signal) + Send + 'static,
    {
        self.state.lock().unwrap().observers.push(Observer {
            callback: Box::new(callback),
            filter,
        });
    }

    /// Runs the trigger phase of a pending update.
    ///
    /// Fires at most once per delta; the first writer to resume after the
    /// delta hop performs it on behalf of all same-delta writers.
    fn trigger(&self) {
        let (to_wake, observers, previous, current) = {
            let mut state = self.state.lock().unwrap();
            if state.phase != Phase::Set {
                return;
            }
            state.phase = Phase::Triggered;

            if !state.changed {
                return;
            }
            state.changed = false;

            let previous = state.previous;
            let current = state.current;

            let mut to_wake = Vec::new();
            state.waiters.retain(|waiter| {
                if waiter.filter.matches(previous, current) {
                    to_wake.push(waiter.slot.clone());

                    false
                } else {
                    true
                }
            });

            // Observers are taken out so user callbacks run with the signal
            // unlocked and may re-enter it.
            let observers = std::mem::take(&mut state.observers);

            (to_wake, observers, previous, current)
        };

        #[cfg(feature = "tracing")]
        tracing::trace!(
            target: env!("CARGO_PKG_NAME"),
            signal = %self.name,
            previous,
            current,
            "signal triggered"
        );

        for slot in to_wake {
            let mut slot = slot.lock().unwrap();
            slot.done = true;
            if let Some(waker) = slot.waker.take() {
                waker.wake();
            }
        }

        let mut kept = Vec::with_capacity(observers.len());
        for mut observer in observers {
            if observer.filter.matches(previous, current) {
                (observer.callback)(self);
            }
            kept.push(observer);
        }

        // Observers registered from inside a callback land behind the
        // pre-existing ones.
        let mut state = self.state.lock().unwrap();
        let appended = std::mem::replace(&mut state.observers, kept);
        state.observers.extend(appended);
    }
}

/// Commit phase: records the pending value, detecting same-delta conflicts.
fn commit(state: &Mutex<SignalState>, name: &str, value: u64) -> Result<(), SignalError> {
    let mut state = state.lock().unwrap();

    match state.phase {
        Phase::Triggered => {
            if value != state.current {
                state.previous = state.current;
                state.current = value;
                state.changed = true;
            } else {
                state.changed = false;
            }
            state.phase = Phase::Set;

            Ok(())
        }
        Phase::Set => {
            if value == state.current {
                Ok(())
            } else {
                Err(SignalError::MultipleNba {
                    signal: name.to_string(),
                    pending: state.current,
                    rejected: value,
                })
            }
        }
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().unwrap();

        f.debug_struct("Signal")
            .field("name", &self.name)
            .field("current", &state.current)
            .field("previous", &state.previous)
            .finish_non_exhaustive()
    }
}

/// Future returned by [`Signal::changed`].
pub struct Changed {
    slot: Arc<Mutex<WaiterSlot>>,
}

impl Future for Changed {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut PollContext<'_>) -> Poll<()> {
        let mut slot = self.slot.lock().unwrap();
        if slot.done {
            Poll::Ready(())
        } else {
            slot.waker = Some(cx.waker().clone());

            Poll::Pending
        }
    }
}

impl fmt::Debug for Changed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Changed").finish_non_exhaustive()
    }
}

/// Error returned on conflicting same-delta assignments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalError {
    /// Two non-blocking assignments with different values were posted to
    /// the same signal within a single delta.
    MultipleNba {
        /// Name of the signal.
        signal: String,
        /// The value already committed for the pending delta.
        pending: u64,
        /// The conflicting value that was rejected.
        rejected: u64,
    },
}

impl fmt::Display for SignalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MultipleNba {
                signal,
                pending,
                rejected,
            } => {
                write!(
                    f,
                    "conflicting non-blocking assignments to '{signal}' within one delta: \
                     {rejected} posted while {pending} is pending"
                )
            }
        }
    }
}

impl Error for SignalError {}
