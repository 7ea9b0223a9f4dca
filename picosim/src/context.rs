//! Ambient task context.
//!
//! Every cooperative task carries an environment made of the scheduler
//! handle and the clock zone that scopes its tick period. The executor
//! installs that environment in a thread-local slot for the duration of each
//! poll, and [`ClockZone::run`](crate::simulation::ClockZone::run) overrides
//! the zone for the scope of the future it wraps. Save/restore happens
//! through drop guards so the enclosing context is reinstated even when a
//! poll unwinds, and no task can ever observe a tick period different from
//! the one active at its most recent resumption.

use std::cell::RefCell;

use crate::simulation::{ClockZone, Scheduler};

thread_local! {
    static CURRENT: RefCell<Option<TaskContext>> = const { RefCell::new(None) };
}

/// The environment a cooperative task runs under.
#[derive(Clone)]
pub(crate) struct TaskContext {
    pub(crate) scheduler: Scheduler,
    pub(crate) zone: ClockZone,
}

/// Restores the previously installed context when dropped.
pub(crate) struct ContextGuard {
    saved: Option<TaskContext>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        CURRENT.with(|current| *current.borrow_mut() = self.saved.take());
    }
}

/// Installs a task context until the returned guard is dropped.
pub(crate) fn enter(context: TaskContext) -> ContextGuard {
    let saved = CURRENT.with(|current| current.borrow_mut().replace(context));

    ContextGuard { saved }
}

/// Installs a zone (and its scheduler) as the ambient context until the
/// returned guard is dropped.
pub(crate) fn enter_zone(zone: ClockZone) -> ContextGuard {
    let scheduler = zone.scheduler().clone();

    enter(TaskContext { scheduler, zone })
}

/// Returns the zone of the currently polled task, if any.
pub(crate) fn current_zone() -> Option<ClockZone> {
    CURRENT.with(|current| current.borrow().as_ref().map(|context| context.zone.clone()))
}

/// Returns the scheduler of the currently polled task, if any.
pub(crate) fn current_scheduler() -> Option<Scheduler> {
    CURRENT.with(|current| {
        current
            .borrow()
            .as_ref()
            .map(|context| context.scheduler.clone())
    })
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU64;

    use super::*;
    use crate::simulation::{ClockZone, Simulation};
    use crate::time::TickPeriod;

    #[test]
    fn contexts_nest_and_restore() {
        let simu = Simulation::new(TickPeriod::from_picos(10).unwrap());
        let root = simu.root_zone();
        let child = ClockZone::new("child", &root, NonZeroU64::new(2).unwrap());

        assert!(current_zone().is_none());

        {
            let _outer = enter_zone(root.clone());
            assert_eq!(current_zone().unwrap().full_name(), "root");

            {
                let _inner = enter_zone(child);
                assert_eq!(current_zone().unwrap().full_name(), "root.child");
            }

            assert_eq!(current_zone().unwrap().full_name(), "root");
        }

        assert!(current_zone().is_none());
    }
}
