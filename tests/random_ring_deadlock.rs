use deadlock_sim::{MonitorPolicy, WaitOutcome};
use rand::Rng;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
mod common;
use common::{expect_deadlock, start_detector};

#[test]
fn test_random_ring_deadlock() {
    let harness = start_detector(MonitorPolicy::ReportOnly);

    // Pick a random ring size between 3 and 8
    let mut rng = rand::rng();
    let n = rng.random_range(3..=8);
    println!("→ testing a ring of {n} processes");

    let barrier = Arc::new(Barrier::new(n));
    let mut handles = Vec::with_capacity(n);

    for i in 0..n {
        let sim = Arc::clone(&harness.sim);
        let bar = Arc::clone(&barrier);
        let me = format!("P{i}");
        let first = format!("R{i}");
        let second = format!("R{}", (i + 1) % n);

        handles.push(thread::spawn(move || {
            let mut rng = rand::rng();

            // Random jitter before first resource
            thread::sleep(Duration::from_millis(rng.random_range(0..20)));
            assert!(sim.acquire(&*first, &*me));

            // Rendezvous so the ring closes
            bar.wait();
            thread::sleep(Duration::from_millis(rng.random_range(0..20)));
            let outcome = sim.acquire_blocking(&*second, &*me, None);
            sim.release_all(&*me);
            outcome
        }));
    }

    let info = expect_deadlock(&harness, Duration::from_secs(5));
    assert_eq!(
        info.process_cycle.len(),
        n,
        "Expected a cycle of length {n}, got {:?}",
        info.process_cycle
    );
    assert_eq!(info.waiting_for.len(), n);

    // Report-only left the ring in place; break it ourselves
    assert!(harness.sim.detect_cycle());
    harness.sim.resolve_circular_wait();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), WaitOutcome::Withdrawn);
    }
}
