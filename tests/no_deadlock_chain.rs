use deadlock_sim::{MonitorPolicy, WaitOutcome};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
mod common;
use common::{NO_DEADLOCK_TIMEOUT, assert_no_deadlock, start_detector, wait_for};

#[test]
fn test_wait_chain_is_not_reported() {
    let harness = start_detector(MonitorPolicy::ResetGraph);
    let sim = &harness.sim;

    // P1 holds R1, P2 holds R2; P3 waits on P2 which waits on P1
    sim.acquire("R1", "P1");
    sim.acquire("R2", "P2");

    let p2 = {
        let sim = Arc::clone(sim);
        thread::spawn(move || sim.acquire_blocking("R1", "P2", None))
    };
    let p3 = {
        let sim = Arc::clone(sim);
        thread::spawn(move || sim.acquire_blocking("R2", "P3", None))
    };

    wait_for(|| sim.wait_edge_count() == 2);
    assert_no_deadlock(&harness, NO_DEADLOCK_TIMEOUT);

    // Unwind the chain from the head
    sim.release_all("P1");
    assert_eq!(p2.join().unwrap(), WaitOutcome::Acquired);
    sim.release_all("P2");
    assert_eq!(p3.join().unwrap(), WaitOutcome::Acquired);
    assert_eq!(sim.wait_edge_count(), 0);

    thread::sleep(Duration::from_millis(50));
    assert!(!*harness.detected.lock().unwrap());
}
