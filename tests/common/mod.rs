use deadlock_sim::{
    DeadlockInfo, EngineEvent, Monitor, MonitorConfig, MonitorPolicy, SimConfig, Simulator,
};
use std::sync::{Arc, Mutex as StdMutex, mpsc};
use std::time::Duration;

#[allow(dead_code)]
pub const DEADLOCK_TIMEOUT: Duration = Duration::from_secs(3);
#[allow(dead_code)]
pub const NO_DEADLOCK_TIMEOUT: Duration = Duration::from_millis(500);
#[allow(dead_code)]
pub const MONITOR_INTERVAL: Duration = Duration::from_millis(20);

pub struct DetectorHarness {
    pub sim: Arc<Simulator>,
    pub rx: mpsc::Receiver<DeadlockInfo>,
    pub detected: Arc<StdMutex<bool>>,
    pub events: Arc<StdMutex<Vec<EngineEvent>>>,
    pub monitor: Option<Monitor>,
}

/// Simulator recording every event, supervised by a monitor with `policy`
pub fn start_detector(policy: MonitorPolicy) -> DetectorHarness {
    let (tx, rx) = mpsc::channel::<DeadlockInfo>();
    let detected = Arc::new(StdMutex::new(false));
    let flag = Arc::clone(&detected);

    let events = Arc::new(StdMutex::new(Vec::new()));
    let sink = Arc::clone(&events);

    let sim = Arc::new(
        SimConfig::new()
            .observer(move |event| sink.lock().unwrap().push(event.clone()))
            .build()
            .expect("Failed to build simulator"),
    );

    let monitor = Monitor::spawn(
        Arc::clone(&sim),
        MonitorConfig::new()
            .interval(MONITOR_INTERVAL)
            .policy(policy)
            .callback(move |info| {
                *flag.lock().unwrap() = true;
                let _ = tx.send(info);
            }),
    );

    DetectorHarness {
        sim,
        rx,
        detected,
        events,
        monitor: Some(monitor),
    }
}

#[allow(dead_code)]
pub fn expect_deadlock(h: &DetectorHarness, timeout: Duration) -> DeadlockInfo {
    match h.rx.recv_timeout(timeout) {
        Ok(info) => {
            assert!(*h.detected.lock().unwrap(), "Deadlock flag should be set");
            info
        }
        Err(_) => panic!("No deadlock detected within {timeout:?}"),
    }
}

#[allow(dead_code)]
pub fn assert_no_deadlock(h: &DetectorHarness, timeout: Duration) {
    assert!(
        h.rx.recv_timeout(timeout).is_err(),
        "Unexpected deadlock detected"
    );
    assert!(
        !*h.detected.lock().unwrap(),
        "Deadlock flag should not be set"
    );
}

/// Poll until `condition` holds or the deadlock timeout passes
#[allow(dead_code)]
pub fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = std::time::Instant::now() + DEADLOCK_TIMEOUT;
    while !condition() {
        assert!(
            std::time::Instant::now() < deadline,
            "Condition not reached within {DEADLOCK_TIMEOUT:?}"
        );
        std::thread::sleep(Duration::from_millis(5));
    }
}
