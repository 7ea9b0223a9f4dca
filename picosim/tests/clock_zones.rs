//! Clock-zone scaling and bulk suspension.

use std::num::NonZeroU64;
use std::sync::{Arc, Mutex};

use picosim::simulation::{ClockZone, Simulation};
use picosim::time::{SimDuration, SimTime, TickPeriod};

fn div(divisor: u64) -> NonZeroU64 {
    NonZeroU64::new(divisor).unwrap()
}

/// A simulation with a 10 ps root tick.
fn bench() -> Simulation {
    Simulation::new(TickPeriod::from_picos(10).unwrap())
}

#[test]
fn nested_zones_scale_delays() {
    let mut simu = bench();
    let root = simu.root_zone();
    let zone1 = ClockZone::new("zone1", &root, div(2));
    let zone2 = ClockZone::new("zone2", &zone1, div(2));

    assert_eq!(root.full_name(), "root");
    assert_eq!(zone2.full_name(), "root.zone1.zone2");
    assert_eq!(zone1.tick_period().as_picos(), 20);
    assert_eq!(zone2.tick_period().as_picos(), 40);

    let scheduler = simu.scheduler();
    {
        let zone2 = zone2.clone();
        let sched = scheduler.clone();
        simu.run(zone2.clone().run(async move {
            sched.delay(2).await;
        }))
        .unwrap();
    }

    simu.elapse(SimDuration::from_picos(1_000)).unwrap();

    assert_eq!(zone2.elapsed_ticks(), 2);
    assert_eq!(zone1.elapsed_ticks(), 4);
    assert_eq!(simu.elapsed_ticks(), 8);
    assert_eq!(simu.now(), SimTime::from_picos(80));
}

#[test]
fn unit_divisor_zone_is_timing_identical_to_its_parent() {
    let mut simu = bench();
    let root = simu.root_zone();
    let alias = ClockZone::new("alias", &root, div(1));

    assert_eq!(alias.tick_period(), root.tick_period());

    let scheduler = simu.scheduler();
    {
        let alias = alias.clone();
        let sched = scheduler.clone();
        simu.run(alias.clone().run(async move {
            sched.delay(3).await;
        }))
        .unwrap();
    }

    simu.elapse(SimDuration::from_picos(1_000)).unwrap();

    assert_eq!(simu.now(), SimTime::from_picos(30));
    assert_eq!(alias.elapsed_ticks(), simu.elapsed_ticks());
}

#[test]
fn zone_delay_counts_in_the_target_zone_units() {
    let mut simu = bench();
    let root = simu.root_zone();
    let slow = ClockZone::new("slow", &root, div(4));

    // A root task waits two ticks of the slower zone.
    {
        let slow = slow.clone();
        simu.run(async move {
            slow.delay(2).await;
        })
        .unwrap();
    }

    simu.elapse(SimDuration::from_picos(1_000)).unwrap();

    assert_eq!(simu.now(), SimTime::from_picos(80));
}

#[test]
fn spawned_tasks_inherit_the_ambient_zone() {
    let mut simu = bench();
    let root = simu.root_zone();
    let zone = ClockZone::new("inherited", &root, div(4));
    let scheduler = simu.scheduler();

    let woke_at = Arc::new(Mutex::new(None));
    {
        let woke_at = woke_at.clone();
        let sched = scheduler.clone();
        simu.run(zone.run(async move {
            let inner = sched.clone();
            let _worker = sched.spawn(async move {
                // One tick of the inherited zone: 40 ps.
                inner.delay(1).await;
                *woke_at.lock().unwrap() = Some(inner.now());
            });
        }))
        .unwrap();
    }

    simu.elapse(SimDuration::from_picos(1_000)).unwrap();

    assert_eq!(*woke_at.lock().unwrap(), Some(SimTime::from_picos(40)));
}

#[test]
fn suspend_resume_freezes_a_clock_domain() {
    let mut simu = bench();
    let root = simu.root_zone();
    let zone1 = ClockZone::new("zone1", &root, div(2)); // 20 ps
    let zone2 = ClockZone::new("zone2", &zone1, div(2)); // 40 ps
    let scheduler = simu.scheduler();

    let fires: Arc<Mutex<Vec<(&'static str, SimTime)>>> = Arc::new(Mutex::new(Vec::new()));

    // A periodic timer in each zone, with a period of 5 of its own ticks.
    for (name, zone) in [("zone1", zone1.clone()), ("zone2", zone2.clone())] {
        let fires = fires.clone();
        let sched = scheduler.clone();
        simu.run(zone.run(async move {
            let period = SimDuration::from_ticks(5, sched.tick_period());
            let at = sched.clone();
            sched
                .create_periodic_timer(period, period, move |_| {
                    fires.lock().unwrap().push((name, at.now()));
                })
                .unwrap();
        }))
        .unwrap();
    }

    // The controlling task suspends zone1 (and zone2 below it) for 15 of
    // zone1's ticks; its own wake-up timers are root-owned and unaffected.
    {
        let zone1 = zone1.clone();
        simu.run(async move {
            zone1.delay(15).await; // t = 300 ps
            zone1.suspend();
            zone1.delay(15).await; // t = 600 ps
            zone1.resume().unwrap();
        })
        .unwrap();
    }

    simu.elapse(SimDuration::from_picos(1_500)).unwrap();

    let fires = fires.lock().unwrap();
    assert!(!fires.is_empty());
    for (_, time) in fires.iter() {
        let t = time.as_picos();
        assert!(
            t <= 300 || t >= 700,
            "a timer fired at {t} ps, inside the suspension window"
        );
    }

    // Both cadences resume exactly 300 ps behind their original schedule.
    assert!(fires.contains(&("zone1", SimTime::from_picos(100))));
    assert!(fires.contains(&("zone1", SimTime::from_picos(300))));
    assert!(fires.contains(&("zone1", SimTime::from_picos(700))));
    assert!(fires.contains(&("zone2", SimTime::from_picos(200))));
    assert!(fires.contains(&("zone2", SimTime::from_picos(700))));
}

#[test]
fn suspend_is_idempotent_and_unpaired_resume_is_a_noop() {
    let mut simu = bench();
    let root = simu.root_zone();
    let zone = ClockZone::new("zone", &root, div(2));
    let scheduler = simu.scheduler();

    // A resume with no preceding suspend does nothing.
    zone.resume().unwrap();

    let fired = Arc::new(Mutex::new(Vec::new()));
    {
        let fired = fired.clone();
        let sched = scheduler.clone();
        simu.run(zone.clone().run(async move {
            let at = sched.clone();
            sched
                .create_timer(SimDuration::from_picos(100), move |_| {
                    fired.lock().unwrap().push(at.now());
                })
                .unwrap();
        }))
        .unwrap();
    }

    zone.suspend();
    zone.suspend(); // no-op: the capture time stays at 0 ps

    // A root-owned marker advances virtual time to 40 ps.
    scheduler
        .create_timer(SimDuration::from_picos(40), |_| {})
        .unwrap();
    simu.elapse(SimDuration::from_picos(40)).unwrap();

    zone.resume().unwrap();
    zone.resume().unwrap(); // no-op

    simu.elapse(SimDuration::from_picos(1_000)).unwrap();

    // The deadline shifted by the full 40 ps suspension.
    assert_eq!(*fired.lock().unwrap(), vec![SimTime::from_picos(140)]);
}
