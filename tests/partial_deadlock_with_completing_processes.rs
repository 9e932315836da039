use deadlock_sim::{MonitorPolicy, ProcessId, WaitOutcome};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
mod common;
use common::{DEADLOCK_TIMEOUT, expect_deadlock, start_detector};

#[test]
fn test_partial_deadlock_with_completing_processes() {
    let harness = start_detector(MonitorPolicy::AbortVictim);
    let barrier = Arc::new(Barrier::new(2));

    // Workers contend on a shared resource but always finish
    let workers: Vec<_> = (0..4)
        .map(|i| {
            let sim = Arc::clone(&harness.sim);
            thread::spawn(move || {
                let me = format!("W{i}");
                for _ in 0..5 {
                    let outcome =
                        sim.acquire_blocking("Shared", &*me, Some(Duration::from_secs(5)));
                    assert!(outcome.is_acquired(), "{me} got {outcome:?}");
                    thread::sleep(Duration::from_millis(2));
                    sim.release_all(&*me);
                }
            })
        })
        .collect();

    // Two processes deadlock on their own pair
    let pair: Vec<_> = [("D1", "A", "B"), ("D2", "B", "A")]
        .into_iter()
        .map(|(me, first, second)| {
            let sim = Arc::clone(&harness.sim);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                assert!(sim.acquire(first, me));
                barrier.wait();
                let outcome = sim.acquire_blocking(second, me, Some(Duration::from_secs(5)));
                sim.release_all(me);
                outcome
            })
        })
        .collect();

    let mut info = expect_deadlock(&harness, DEADLOCK_TIMEOUT);
    info.process_cycle.sort();
    assert_eq!(
        info.process_cycle,
        vec![ProcessId::from("D1"), ProcessId::from("D2")]
    );

    for worker in workers {
        worker.join().unwrap();
    }

    let outcomes: Vec<WaitOutcome> = pair.into_iter().map(|h| h.join().unwrap()).collect();
    // D2 is the victim, D1 then gets B
    assert_eq!(outcomes, vec![WaitOutcome::Acquired, WaitOutcome::Aborted]);
}
