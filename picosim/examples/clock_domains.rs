//! Two clock domains sampling a shared signal.
//!
//! A producer running in the fast "core" domain drives a data signal; a
//! sampler running in the four-times-slower "bus" domain records it once per
//! bus tick. Halfway through, the bus domain is suspended for a while and
//! then resumed: its sampling cadence picks up exactly as far behind its
//! original schedule as the suspension lasted.
//!
//! ```text
//!               ┌──────────────┐   data    ┌──────────────┐
//!               │   Producer   ├──────────▶│   Sampler    │
//!               │ (core, 1 ns) │  signal   │ (bus, 4 ns)  │
//!               └──────────────┘           └──────────────┘
//! ```

use std::num::NonZeroU64;
use std::sync::{Arc, Mutex};

use picosim::signal::{EdgeFilter, Signal};
use picosim::simulation::{ClockZone, Simulation};
use picosim::time::{SimDuration, TickPeriod};

fn main() {
    // Root clock: 1 ns per tick.
    let mut simu = Simulation::new(TickPeriod::from_picos(1_000).unwrap());
    let scheduler = simu.scheduler();

    let core = simu.root_zone();
    let bus = ClockZone::new("bus", &core, NonZeroU64::new(4).unwrap());

    let data = Signal::with_name("data");

    // Count the rising edges of the data signal.
    let rising = Arc::new(Mutex::new(0u64));
    {
        let rising = rising.clone();
        data.always_at(move |_| *rising.lock().unwrap() += 1, EdgeFilter::Pos);
    }

    // Producer: toggles the data signal every two core ticks.
    let producer = {
        let scheduler = scheduler.clone();
        let data = data.clone();
        async move {
            for step in 1..=16u64 {
                scheduler.delay(2).await;
                data.nba(step % 2).await.unwrap();
            }
        }
    };

    // Sampler: records the signal value once per bus tick.
    let samples = Arc::new(Mutex::new(Vec::new()));
    let sampler = {
        let scheduler = scheduler.clone();
        let data = data.clone();
        let samples = samples.clone();
        bus.run(async move {
            for _ in 0..6 {
                scheduler.delay(1).await; // one bus tick = 4 ns
                samples
                    .lock()
                    .unwrap()
                    .push((scheduler.now(), data.read_current()));
            }
        })
    };

    simu.run(producer).unwrap();
    simu.run(sampler).unwrap();

    // First phase: 12 ns of simulation.
    simu.elapse(SimDuration::from_nanos(12)).unwrap();

    // Freeze the bus domain for 8 ns; the producer keeps running.
    bus.suspend();
    simu.elapse(SimDuration::from_nanos(8)).unwrap();
    bus.resume().unwrap();

    // Let the rest of the bench play out.
    simu.elapse(SimDuration::from_nanos(40)).unwrap();

    println!("virtual time now: {}", simu.now());
    println!("rising edges:     {}", *rising.lock().unwrap());
    for (time, value) in samples.lock().unwrap().iter() {
        println!("sample @ {time}: {value}");
    }
}
