//! Event wheel scheduling semantics.

use std::sync::{Arc, Mutex};

use picosim::simulation::{ExecutionError, SchedulingError, Simulation};
use picosim::time::{SimDuration, SimTime, TickPeriod};

/// A simulation with a 10 ps root tick.
fn bench() -> Simulation {
    Simulation::new(TickPeriod::from_picos(10).unwrap())
}

#[test]
fn microtasks_run_before_zero_delay_timers() {
    let mut simu = bench();
    let scheduler = simu.scheduler();

    let log: Arc<Mutex<Vec<(&'static str, SimTime)>>> = Arc::new(Mutex::new(Vec::new()));

    {
        let log = log.clone();
        let sched = scheduler.clone();
        scheduler
            .create_timer(SimDuration::from_picos(50), move |_| {
                log.lock().unwrap().push(("timer", sched.now()));

                for name in ["A", "B"] {
                    let log = log.clone();
                    let sched = sched.clone();
                    sched
                        .clone()
                        .create_timer(SimDuration::ZERO, move |_| {
                            log.lock().unwrap().push((name, sched.now()));
                        })
                        .unwrap();
                }
                for name in ["M1", "M2"] {
                    let log = log.clone();
                    let sched = sched.clone();
                    sched.clone().schedule_microtask(move || {
                        log.lock().unwrap().push((name, sched.now()));
                    });
                }
            })
            .unwrap();
    }

    simu.elapse(SimDuration::from_picos(1_000)).unwrap();

    let log = log.lock().unwrap();
    let order: Vec<&str> = log.iter().map(|(name, _)| *name).collect();
    assert_eq!(order, ["timer", "M1", "M2", "A", "B"]);
    for (_, time) in log.iter() {
        assert_eq!(*time, SimTime::from_picos(50));
    }
}

#[test]
fn periodic_timer_cancels_itself() {
    let mut simu = bench();
    let scheduler = simu.scheduler();

    let observed = Arc::new(Mutex::new(Vec::new()));
    let timer = {
        let observed = observed.clone();
        scheduler
            .create_periodic_timer(
                SimDuration::from_picos(50),
                SimDuration::from_picos(50),
                move |timer| {
                    observed.lock().unwrap().push(timer.tick_count());
                    if timer.tick_count() == 1 {
                        timer.cancel();
                    }
                },
            )
            .unwrap()
    };

    simu.elapse(SimDuration::from_picos(1_000)).unwrap();

    assert!(!timer.is_active());
    assert_eq!(timer.tick_count(), 2);
    assert_eq!(*observed.lock().unwrap(), vec![0, 1]);
}

#[test]
fn periodic_timers_fire_on_a_fixed_cadence() {
    let mut simu = bench();
    let scheduler = simu.scheduler();

    let fired = Arc::new(Mutex::new(Vec::new()));
    {
        let fired = fired.clone();
        let sched = scheduler.clone();
        scheduler
            .create_periodic_timer(
                SimDuration::from_picos(50),
                SimDuration::from_picos(50),
                move |_| fired.lock().unwrap().push(sched.now().as_picos()),
            )
            .unwrap();
    }

    simu.elapse(SimDuration::from_picos(300)).unwrap();

    assert_eq!(*fired.lock().unwrap(), vec![50, 100, 150, 200, 250, 300]);
    assert_eq!(simu.now(), SimTime::from_picos(300));
}

#[test]
fn periodic_reregistration_sorts_behind_later_registrations() {
    let mut simu = bench();
    let scheduler = simu.scheduler();

    let log = Arc::new(Mutex::new(Vec::new()));

    // Fires at 50 ps and 100 ps.
    {
        let log = log.clone();
        scheduler
            .create_periodic_timer(
                SimDuration::from_picos(50),
                SimDuration::from_picos(50),
                move |_| log.lock().unwrap().push("periodic"),
            )
            .unwrap();
    }
    // Fires at 50 ps, right after the periodic timer, and registers a
    // one-shot for 100 ps within the same instant.
    {
        let log = log.clone();
        let sched = scheduler.clone();
        scheduler
            .create_timer(SimDuration::from_picos(50), move |_| {
                log.lock().unwrap().push("starter");

                let log = log.clone();
                sched
                    .create_timer(SimDuration::from_picos(50), move |_| {
                        log.lock().unwrap().push("late");
                    })
                    .unwrap();
            })
            .unwrap();
    }

    simu.elapse(SimDuration::from_picos(100)).unwrap();

    // At 100 ps, the one-shot registered within the previous instant fires
    // before the periodic timer's re-registration.
    assert_eq!(
        *log.lock().unwrap(),
        vec!["periodic", "starter", "late", "periodic"]
    );
}

#[test]
fn same_deadline_timers_fire_in_registration_order() {
    let mut simu = bench();
    let scheduler = simu.scheduler();

    let log = Arc::new(Mutex::new(Vec::new()));
    for i in 0..5 {
        let log = log.clone();
        scheduler
            .create_timer(SimDuration::from_picos(100), move |_| {
                log.lock().unwrap().push(i);
            })
            .unwrap();
    }

    simu.elapse(SimDuration::from_picos(100)).unwrap();

    assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3, 4]);
}

#[test]
fn cancelled_one_shot_never_fires() {
    let mut simu = bench();
    let scheduler = simu.scheduler();

    let fired = Arc::new(Mutex::new(false));
    let timer = {
        let fired = fired.clone();
        scheduler
            .create_timer(SimDuration::from_picos(100), move |_| {
                *fired.lock().unwrap() = true;
            })
            .unwrap()
    };

    simu.elapse(SimDuration::from_picos(50)).unwrap();
    timer.cancel();
    assert!(!timer.is_active());

    simu.elapse(SimDuration::from_picos(500)).unwrap();

    assert!(!*fired.lock().unwrap());
    assert_eq!(timer.tick_count(), 0);
}

#[test]
fn cancel_then_resume_restores_the_deadline() {
    let mut simu = bench();
    let scheduler = simu.scheduler();

    let fired_at = Arc::new(Mutex::new(None));
    let timer = {
        let fired_at = fired_at.clone();
        let sched = scheduler.clone();
        scheduler
            .create_timer(SimDuration::from_picos(100), move |_| {
                *fired_at.lock().unwrap() = Some(sched.now());
            })
            .unwrap()
    };

    simu.elapse(SimDuration::from_picos(30)).unwrap();
    timer.cancel();
    timer.resume().unwrap();
    simu.elapse(SimDuration::from_picos(1_000)).unwrap();

    assert_eq!(*fired_at.lock().unwrap(), Some(SimTime::from_picos(100)));
    assert_eq!(timer.tick_count(), 1);
}

#[test]
fn resuming_into_the_past_is_rejected() {
    let mut simu = bench();
    let scheduler = simu.scheduler();

    let timer = scheduler
        .create_timer(SimDuration::from_picos(100), |_| {})
        .unwrap();

    simu.elapse(SimDuration::from_picos(80)).unwrap();
    timer.cancel();
    timer.reschedule(SimDuration::from_picos(-50));

    let err = timer.resume().unwrap_err();
    assert!(matches!(err, SchedulingError::TimerNotInFuture { .. }));
    assert!(!timer.is_active());
}

#[test]
fn invalid_durations_are_rejected() {
    let mut simu = bench();
    let scheduler = simu.scheduler();

    let err = scheduler
        .create_timer(SimDuration::from_picos(-1), |_| {})
        .unwrap_err();
    assert!(matches!(err, SchedulingError::InvalidDuration { .. }));

    // A periodic timer with a zero period is malformed.
    let err = scheduler
        .create_periodic_timer(SimDuration::from_picos(10), SimDuration::ZERO, |_| {})
        .unwrap_err();
    assert!(matches!(err, SchedulingError::InvalidDuration { .. }));

    let err = simu.elapse(SimDuration::from_picos(-10)).unwrap_err();
    assert!(matches!(
        err,
        ExecutionError::Scheduling(SchedulingError::InvalidDuration { .. })
    ));
}

#[test]
fn elapsing_an_idle_queue_succeeds() {
    let mut simu = bench();

    simu.elapse(SimDuration::from_nanos(1)).unwrap();

    assert_eq!(simu.now(), SimTime::EPOCH);
}

#[test]
fn zero_tick_delay_resumes_within_the_same_instant() {
    let mut simu = bench();
    let scheduler = simu.scheduler();

    let log = Arc::new(Mutex::new(Vec::new()));
    {
        let log = log.clone();
        let sched = scheduler.clone();
        simu.run(async move {
            log.lock().unwrap().push(("before", sched.now()));
            sched.delay(0).await;
            log.lock().unwrap().push(("after", sched.now()));
        })
        .unwrap();
    }

    // Both entries are recorded without any elapse: `run` settles the
    // current instant, including the delta cycle.
    let log = log.lock().unwrap();
    assert_eq!(*log, vec![("before", SimTime::EPOCH), ("after", SimTime::EPOCH)]);
}

#[test]
fn blocking_operations_resume_in_the_same_tick() {
    let mut simu = bench();
    let scheduler = simu.scheduler();

    let mut result = {
        let sched = scheduler.clone();
        simu.run(async move {
            let a = sched.blocking_microtask(|| 21).await;
            let b = sched.blocking_delta(move || a * 2).await;

            (a, b, sched.now())
        })
        .unwrap()
    };

    assert_eq!(result.try_take(), Some((21, 42, SimTime::EPOCH)));
}

#[test]
fn task_handles_can_be_awaited_from_other_tasks() {
    let mut simu = bench();
    let scheduler = simu.scheduler();

    let mut out = {
        let sched = scheduler.clone();
        simu.run(async move {
            let worker = sched.spawn({
                let sched = sched.clone();
                async move {
                    sched.delay(3).await;

                    5u64
                }
            });

            worker.await
        })
        .unwrap()
    };

    simu.elapse(SimDuration::from_picos(100)).unwrap();

    assert_eq!(out.try_take(), Some(Some(5)));
    assert_eq!(simu.elapsed_ticks(), 3);
}

#[test]
fn elapse_lands_on_the_horizon_when_events_remain() {
    let mut simu = bench();
    let scheduler = simu.scheduler();

    scheduler
        .create_timer(SimDuration::from_picos(500), |_| {})
        .unwrap();

    simu.elapse(SimDuration::from_picos(120)).unwrap();
    assert_eq!(simu.now(), SimTime::from_picos(120));

    // Consecutive elapse calls tile the time axis.
    simu.elapse(SimDuration::from_picos(120)).unwrap();
    assert_eq!(simu.now(), SimTime::from_picos(240));
}

#[test]
fn task_panics_halt_the_simulation_until_reset() {
    let mut simu = bench();

    let err = simu
        .run(async {
            panic!("boom");
        })
        .unwrap_err();
    assert!(matches!(err, ExecutionError::Panic(_)));

    let err = simu.elapse(SimDuration::from_picos(10)).unwrap_err();
    assert!(matches!(err, ExecutionError::Halted));

    simu.reset();
    assert_eq!(simu.now(), SimTime::EPOCH);

    let scheduler = simu.scheduler();
    let mut out = simu
        .run(async move {
            scheduler.delay(1).await;

            7
        })
        .unwrap();
    simu.elapse(SimDuration::from_picos(100)).unwrap();

    assert_eq!(out.try_take(), Some(7));
}
