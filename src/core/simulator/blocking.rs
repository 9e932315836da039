//! Blocking acquisition and cancellation
//!
//! A blocked request records a wait edge from the requester to the current
//! holder and parks on the engine condvar. Every release, preemption, edge
//! removal, graph reset or abort wakes all parked requests, which then
//! re-evaluate:
//!
//! 1. aborted while parked → [`WaitOutcome::Aborted`]
//! 2. edge removed by someone else → [`WaitOutcome::Withdrawn`]
//! 3. resource now available → [`WaitOutcome::Acquired`], edge removed
//! 4. holder changed → the edge is re-pointed at the new holder
//! 5. deadline passed → [`WaitOutcome::TimedOut`], edge removed
//!
//! Withdrawal is checked before retrying, so every request whose edge was
//! dropped by a resolution is withdrawn no matter which waiter wakes first.

use super::{PendingWait, Simulator, State};
use crate::core::registry::{Allocator, Grant};
use crate::core::types::{EngineEvent, Events, ProcessId, ResourceId, WaitOutcome};
use parking_lot::MutexGuard;
use std::time::{Duration, Instant};

impl Simulator {
    /// Acquire a resource, waiting while another process holds it
    ///
    /// While parked, the request is visible in the wait-for graph as an edge
    /// `process -> holder`, so a supervising [`Monitor`](crate::Monitor) can
    /// spot circular waits between blocked requests. Utilization time for a
    /// granted request includes the time spent waiting.
    ///
    /// # Arguments
    /// * `resource` - Resource to acquire
    /// * `process` - Requesting process
    /// * `timeout` - Give up after this long; `None`, or a timeout too large to
    ///   represent as a deadline, waits indefinitely
    pub fn acquire_blocking(
        &self,
        resource: impl Into<ResourceId>,
        process: impl Into<ProcessId>,
        timeout: Option<Duration>,
    ) -> WaitOutcome {
        let (resource, process) = (resource.into(), process.into());
        let started = Instant::now();
        let deadline = timeout.and_then(|t| started.checked_add(t));

        self.before_attempt();

        let mut events = Vec::new();
        let mut state = self.state.lock();
        // A stale abort marker must not cancel a fresh request
        state.aborted.remove(&process);
        let mut expired = false;

        let outcome = loop {
            if state.aborted.remove(&process) {
                state.pending.remove(&process);
                break WaitOutcome::Aborted;
            }

            if let Some(wait) = state.pending.get(&process)
                && !state.graph.contains_edge(&process, &wait.holder)
            {
                state.pending.remove(&process);
                break WaitOutcome::Withdrawn;
            }

            match state.registry.acquire_since(&resource, &process, started) {
                Grant::Granted => {
                    if let Some(wait) = state.pending.remove(&process)
                        && state.graph.remove_edge(&process, &wait.holder)
                    {
                        events.push(
                            EngineEvent::new(Events::WaitEdgeRemoved)
                                .process(&process)
                                .peer(&wait.holder),
                        );
                    }
                    events.push(
                        EngineEvent::new(Events::Acquired)
                            .process(&process)
                            .resource(&resource),
                    );
                    break WaitOutcome::Acquired;
                }
                Grant::Blocked { holder, .. } => {
                    let previous = state.pending.get(&process).map(|w| w.holder.clone());
                    match previous {
                        None => {
                            events.push(
                                EngineEvent::new(Events::Blocked)
                                    .process(&process)
                                    .resource(&resource)
                                    .peer(&holder),
                            );
                            park(&mut state, &process, &resource, holder, &mut events);
                        }
                        Some(previous) if previous != holder => {
                            if state.graph.remove_edge(&process, &previous) {
                                events.push(
                                    EngineEvent::new(Events::WaitEdgeRemoved)
                                        .process(&process)
                                        .peer(&previous),
                                );
                            }
                            park(&mut state, &process, &resource, holder, &mut events);
                        }
                        Some(_) => {}
                    }
                }
            }

            if expired {
                if let Some(wait) = state.pending.remove(&process)
                    && state.graph.remove_edge(&process, &wait.holder)
                {
                    events.push(
                        EngineEvent::new(Events::WaitEdgeRemoved)
                            .process(&process)
                            .peer(&wait.holder),
                    );
                }
                break WaitOutcome::TimedOut;
            }

            if !events.is_empty() {
                // Publish, then re-check: a notification may have fired meanwhile
                let batch = std::mem::take(&mut events);
                MutexGuard::unlocked(&mut state, || self.emit(batch));
                continue;
            }

            expired = match deadline {
                Some(deadline) => self.wakeup.wait_until(&mut state, deadline).timed_out(),
                None => {
                    self.wakeup.wait(&mut state);
                    false
                }
            };
        };

        if outcome != WaitOutcome::Acquired {
            // Our edge went away; someone else may be waiting on that
            self.wakeup.notify_all();
        }
        drop(state);
        self.emit(events);
        outcome
    }

    /// Cancel a process
    ///
    /// Releases everything it holds, removes every wait edge where it is the
    /// waiter and wakes its own parked request, if any, with
    /// [`WaitOutcome::Aborted`]. Edges pointing at the process stay; the
    /// requests behind them re-evaluate once woken.
    ///
    /// # Returns
    /// The released resources, sorted by key
    pub fn abort(&self, process: impl Into<ProcessId>) -> Vec<ResourceId> {
        let process = process.into();

        let (released, targets) = {
            let mut state = self.state.lock();
            let released = state.registry.release_all(&process);
            let targets = state.graph.clear_wait_edges(&process);
            if state.pending.contains_key(&process) {
                state.aborted.insert(process.clone());
            }
            (released, targets)
        };
        self.wakeup.notify_all();

        let mut events = Vec::with_capacity(targets.len() + 1);
        for target in &targets {
            events.push(
                EngineEvent::new(Events::WaitEdgeRemoved)
                    .process(&process)
                    .peer(target),
            );
        }
        events.push(
            EngineEvent::new(Events::Aborted)
                .process(&process)
                .resources(&released),
        );
        self.emit(events);
        self.after_release();

        released
    }
}

/// Point the derived wait edge of `process` at `holder` and remember the request
fn park(
    state: &mut State,
    process: &ProcessId,
    resource: &ResourceId,
    holder: ProcessId,
    events: &mut Vec<EngineEvent>,
) {
    if state.graph.add_edge(process, &holder) {
        events.push(
            EngineEvent::new(Events::WaitEdgeAdded)
                .process(process)
                .peer(&holder),
        );
    }
    state.pending.insert(
        process.clone(),
        PendingWait {
            resource: resource.clone(),
            holder,
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(3);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_free_resource_is_granted_immediately() {
        let sim = Simulator::new();
        assert_eq!(sim.acquire_blocking("R1", "P1", None), WaitOutcome::Acquired);
        assert_eq!(sim.wait_edge_count(), 0);
    }

    #[test]
    fn test_timeout_removes_edge() {
        let sim = Simulator::new();
        sim.acquire("R1", "P1");

        let outcome = sim.acquire_blocking("R1", "P2", Some(Duration::from_millis(30)));
        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert_eq!(sim.wait_edge_count(), 0);
        assert_eq!(sim.holder_of("R1"), Some(ProcessId::from("P1")));
    }

    #[test]
    fn test_release_wakes_waiter() {
        let sim = Arc::new(Simulator::new());
        sim.acquire("R1", "P1");

        let waiter = {
            let sim = Arc::clone(&sim);
            thread::spawn(move || sim.acquire_blocking("R1", "P2", None))
        };

        wait_until(|| sim.waits_for("P2") == vec![ProcessId::from("P1")]);
        sim.release_all("P1");

        assert_eq!(waiter.join().unwrap(), WaitOutcome::Acquired);
        assert_eq!(sim.holder_of("R1"), Some(ProcessId::from("P2")));
        assert_eq!(sim.wait_edge_count(), 0);
    }

    #[test]
    fn test_edge_follows_new_holder() {
        let sim = Arc::new(Simulator::new());
        sim.acquire("R1", "P1");

        let waiter = {
            let sim = Arc::clone(&sim);
            thread::spawn(move || sim.acquire_blocking("R1", "P2", Some(Duration::from_secs(5))))
        };

        wait_until(|| sim.waits_for("P2") == vec![ProcessId::from("P1")]);
        sim.preempt_and_acquire("R1", "P3");
        wait_until(|| sim.waits_for("P2") == vec![ProcessId::from("P3")]);

        sim.release("R1");
        assert_eq!(waiter.join().unwrap(), WaitOutcome::Acquired);
    }

    #[test]
    fn test_unrepresentable_timeout_waits_indefinitely() {
        let sim = Arc::new(Simulator::new());
        sim.acquire("R1", "P1");

        let waiter = {
            let sim = Arc::clone(&sim);
            thread::spawn(move || sim.acquire_blocking("R1", "P2", Some(Duration::MAX)))
        };

        wait_until(|| sim.waits_for("P2") == vec![ProcessId::from("P1")]);
        sim.release("R1");

        assert_eq!(waiter.join().unwrap(), WaitOutcome::Acquired);
        assert_eq!(sim.holder_of("R1"), Some(ProcessId::from("P2")));
    }

    #[test]
    fn test_abort_releases_holdings_of_idle_process() {
        let sim = Simulator::new();
        sim.acquire_all("P1", ["R1", "R2"]);
        sim.add_wait_edge("P1", "P2");

        assert_eq!(
            sim.abort("P1"),
            vec![ResourceId::from("R1"), ResourceId::from("R2")]
        );
        assert!(sim.held_by("P1").is_empty());
        assert_eq!(sim.wait_edge_count(), 0);
    }

    #[test]
    fn test_reset_withdraws_waiter() {
        let sim = Arc::new(Simulator::new());
        sim.acquire("R1", "P1");

        let waiter = {
            let sim = Arc::clone(&sim);
            thread::spawn(move || sim.acquire_blocking("R1", "P2", None))
        };

        wait_until(|| sim.wait_edge_count() == 1);
        sim.reset_graph();

        assert_eq!(waiter.join().unwrap(), WaitOutcome::Withdrawn);
        assert_eq!(sim.holder_of("R1"), Some(ProcessId::from("P1")));
    }

    #[test]
    fn test_abort_cancels_waiter_and_frees_holdings() {
        let sim = Arc::new(Simulator::new());
        sim.acquire("R1", "P1");
        sim.acquire("R2", "P2");

        let waiter = {
            let sim = Arc::clone(&sim);
            thread::spawn(move || sim.acquire_blocking("R1", "P2", None))
        };

        wait_until(|| sim.wait_edge_count() == 1);
        assert_eq!(sim.abort("P2"), vec![ResourceId::from("R2")]);

        assert_eq!(waiter.join().unwrap(), WaitOutcome::Aborted);
        assert!(sim.held_by("P2").is_empty());
        assert!(sim.waits_for("P2").is_empty());
        assert_eq!(sim.holder_of("R1"), Some(ProcessId::from("P1")));
    }

    #[test]
    fn test_abort_of_idle_process_does_not_poison_later_requests() {
        let sim = Simulator::new();
        sim.abort("P1");
        assert_eq!(sim.acquire_blocking("R1", "P1", None), WaitOutcome::Acquired);
    }
}
