//! Two-phase non-blocking assignment and edge filters.

use std::sync::{Arc, Mutex};

use picosim::signal::{EdgeFilter, Signal, SignalError};
use picosim::simulation::Simulation;
use picosim::time::{SimDuration, TickPeriod};

/// A simulation with a 10 ps root tick.
fn bench() -> Simulation {
    Simulation::new(TickPeriod::from_picos(10).unwrap())
}

#[test]
fn edge_observers_count_transitions() {
    let mut simu = bench();
    let signal = Signal::with_name("bus");

    let counts = Arc::new(Mutex::new([0u64; 4]));
    for (slot, filter) in [
        (0, EdgeFilter::Any),
        (1, EdgeFilter::Pos),
        (2, EdgeFilter::Neg),
        (3, EdgeFilter::Value(4)),
    ] {
        let counts = counts.clone();
        signal.always_at(move |_| counts.lock().unwrap()[slot] += 1, filter);
    }

    // Five increments with a delta between each, then back to zero.
    let driven = signal.clone();
    simu.run(async move {
        for value in 1..=5 {
            driven.nba(value).await.unwrap();
        }
        driven.nba(0).await.unwrap();
    })
    .unwrap();

    assert_eq!(*counts.lock().unwrap(), [6, 1, 1, 1]);
    assert_eq!(signal.read_current(), 0);
    assert_eq!(signal.read_previous(), 5);
}

#[test]
fn conflicting_same_delta_writes_fail() {
    let mut simu = bench();
    let scheduler = simu.scheduler();
    let signal = Signal::with_name("conflict");

    let writer1 = signal.clone();
    let writer2 = signal.clone();
    let mut first = scheduler.spawn(async move { writer1.nba(1).await });
    let mut second = scheduler.spawn(async move { writer2.nba(2).await });

    simu.elapse(SimDuration::ZERO).unwrap();

    assert_eq!(first.try_take(), Some(Ok(())));
    match second.try_take() {
        Some(Err(SignalError::MultipleNba {
            signal,
            pending,
            rejected,
        })) => {
            assert_eq!(signal, "conflict");
            assert_eq!(pending, 1);
            assert_eq!(rejected, 2);
        }
        other => panic!("expected a conflict, got {other:?}"),
    }

    assert_eq!(signal.read_current(), 1);
}

#[test]
fn same_value_writes_are_idempotent_and_silent() {
    let mut simu = bench();
    let scheduler = simu.scheduler();
    let signal = Signal::with_name("idem");

    let changes = Arc::new(Mutex::new(0));
    {
        let changes = changes.clone();
        signal.always_at(move |_| *changes.lock().unwrap() += 1, EdgeFilter::Any);
    }

    // Two same-delta writers of the same value are both accepted.
    let writer1 = signal.clone();
    let writer2 = signal.clone();
    let mut first = scheduler.spawn(async move { writer1.nba(7).await });
    let mut second = scheduler.spawn(async move { writer2.nba(7).await });
    simu.elapse(SimDuration::ZERO).unwrap();

    assert_eq!(first.try_take(), Some(Ok(())));
    assert_eq!(second.try_take(), Some(Ok(())));
    assert_eq!(*changes.lock().unwrap(), 1);
    assert_eq!(signal.read_current(), 7);
    assert_eq!(signal.read_previous(), 0);

    // Rewriting the held value in a later delta propagates silently.
    let writer = signal.clone();
    simu.run(async move {
        writer.nba(7).await.unwrap();
    })
    .unwrap();

    assert_eq!(*changes.lock().unwrap(), 1);
    assert_eq!(signal.read_previous(), 0);
}

#[test]
fn changed_waiters_are_filtered_and_delivered_once() {
    let mut simu = bench();
    let scheduler = simu.scheduler();
    let signal = Signal::with_name("edges");

    let rising_seen = Arc::new(Mutex::new(Vec::new()));
    {
        let signal = signal.clone();
        let rising_seen = rising_seen.clone();
        let _waiter = scheduler.spawn(async move {
            signal.changed(EdgeFilter::Pos).await;
            rising_seen.lock().unwrap().push(signal.read_current());
        });
    }

    let starved = Arc::new(Mutex::new(false));
    {
        let signal = signal.clone();
        let starved = starved.clone();
        let _waiter = scheduler.spawn(async move {
            signal.changed(EdgeFilter::Value(100)).await;
            *starved.lock().unwrap() = true;
        });
    }

    // 0 -> 3 (rising), 3 -> 0 (falling), 0 -> 9 (rising again).
    let driver = signal.clone();
    simu.run(async move {
        driver.nba(3).await.unwrap();
        driver.nba(0).await.unwrap();
        driver.nba(9).await.unwrap();
    })
    .unwrap();

    // The waiter resolved exactly once, at the first matching edge.
    assert_eq!(*rising_seen.lock().unwrap(), vec![3]);
    // The non-matching waiter is still pending.
    assert!(!*starved.lock().unwrap());
}
