//! The thread-safe allocation engine
//!
//! A [`Simulator`] owns the resource registry and the wait-for graph behind a
//! single engine lock. Every public operation takes the lock once, so each
//! one is linearizable, and composite operations (like `acquire_all`'s
//! scan-then-commit) can never be observed half done. Because there is only
//! one lock, the locking layer has no ordering of its own to get wrong.
//!
//! Events describing each state transition are collected while the lock is
//! held and delivered to the observer and event log after it is released.

mod blocking;
mod resolution;

pub use resolution::Resolution;

use crate::core::graph::WaitForGraph;
#[cfg(feature = "event-log")]
use crate::core::logger::EventLogger;
use crate::core::metrics::{Metered, Metrics, MetricsSnapshot, SessionSummary};
use crate::core::monitor::DeadlockCallback;
use crate::core::registry::{Allocator, Grant, ResourceRegistry};
use crate::core::stress::{self, StressConfig};
use crate::core::types::{
    DeadlockCondition, DeadlockInfo, EngineEvent, Events, ProcessId, ResourceId,
};
use chrono::Utc;
use fxhash::{FxHashMap, FxHashSet};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

/// Callback receiving every engine event
pub type Observer = Arc<dyn Fn(&EngineEvent) + Send + Sync>;

/// A request parked in [`Simulator::acquire_blocking`]
#[derive(Debug, Clone)]
pub(crate) struct PendingWait {
    pub(crate) resource: ResourceId,
    /// Holder the derived wait edge currently points at
    pub(crate) holder: ProcessId,
}

/// Everything guarded by the engine lock
pub(crate) struct State {
    pub(crate) registry: Metered<ResourceRegistry>,
    pub(crate) graph: WaitForGraph,
    /// Maps blocked processes to the request they are parked on
    pub(crate) pending: FxHashMap<ProcessId, PendingWait>,
    /// Parked processes that were aborted and have not noticed yet
    pub(crate) aborted: FxHashSet<ProcessId>,
}

/// Resource allocation and deadlock detection engine
///
/// # Example
///
/// ```rust
/// use deadlock_sim::Simulator;
///
/// let sim = Simulator::new();
/// assert!(sim.acquire("R1", "P1"));
/// assert!(!sim.acquire("R1", "P2"));
///
/// sim.add_wait_edge("P2", "P1");
/// sim.add_wait_edge("P1", "P2");
/// assert!(sim.detect_cycle());
///
/// sim.reset_graph();
/// assert!(!sim.detect_cycle());
/// ```
pub struct Simulator {
    state: Mutex<State>,
    /// Signalled whenever a resource is freed or reassigned or wait edges vanish
    wakeup: Condvar,
    metrics: Arc<Metrics>,
    observer: Option<Observer>,
    /// Invoked with every reported circular wait
    on_deadlock: Option<DeadlockCallback>,
    #[cfg(feature = "event-log")]
    logger: Option<EventLogger>,
    stress: Option<StressConfig>,
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulator {
    /// Create an engine with empty assignment map and wait-for graph,
    /// no observer and no event log
    pub fn new() -> Self {
        Self::with_parts(None, None)
    }

    pub(crate) fn with_parts(observer: Option<Observer>, stress: Option<StressConfig>) -> Self {
        let metrics = Arc::new(Metrics::new());
        Simulator {
            state: Mutex::new(State {
                registry: Metered::new(ResourceRegistry::new(), Arc::clone(&metrics)),
                graph: WaitForGraph::new(),
                pending: FxHashMap::default(),
                aborted: FxHashSet::default(),
            }),
            wakeup: Condvar::new(),
            metrics,
            observer,
            on_deadlock: None,
            #[cfg(feature = "event-log")]
            logger: None,
            stress,
        }
    }

    pub(crate) fn set_deadlock_callback(&mut self, callback: DeadlockCallback) {
        self.on_deadlock = Some(callback);
    }

    #[cfg(feature = "event-log")]
    pub(crate) fn set_logger(&mut self, logger: EventLogger) {
        self.logger = Some(logger);
    }

    /// Deliver events outside the engine lock
    pub(crate) fn emit(&self, events: Vec<EngineEvent>) {
        for event in &events {
            if let Some(observer) = &self.observer {
                observer(event);
            }
            #[cfg(feature = "event-log")]
            if let Some(logger) = &self.logger {
                logger.log_event(event);
            }
        }
    }

    fn before_attempt(&self) {
        if let Some(config) = &self.stress {
            stress::on_acquire_attempt(config);
        }
    }

    fn after_release(&self) {
        if let Some(config) = &self.stress {
            stress::on_release(config);
        }
    }

    /// Request a single resource without blocking
    ///
    /// Succeeds if the resource is free or already held by `process`.
    /// Otherwise nothing changes and `false` is returned; whether to record
    /// a wait edge is up to the caller.
    pub fn acquire(&self, resource: impl Into<ResourceId>, process: impl Into<ProcessId>) -> bool {
        self.request(resource.into(), process.into(), None)
    }

    /// Mutual-exclusion request pattern: exclusive single-resource hold
    pub fn mutual_exclusion(
        &self,
        resource: impl Into<ResourceId>,
        process: impl Into<ProcessId>,
    ) -> bool {
        self.request(
            resource.into(),
            process.into(),
            Some(DeadlockCondition::MutualExclusion),
        )
    }

    /// No-preemption request pattern: a held resource is never taken away
    /// by a plain request
    pub fn no_preemption(
        &self,
        resource: impl Into<ResourceId>,
        process: impl Into<ProcessId>,
    ) -> bool {
        self.request(
            resource.into(),
            process.into(),
            Some(DeadlockCondition::NoPreemption),
        )
    }

    fn request(
        &self,
        resource: ResourceId,
        process: ProcessId,
        condition: Option<DeadlockCondition>,
    ) -> bool {
        self.before_attempt();

        let (granted, event) = {
            let mut state = self.state.lock();
            match state.registry.acquire(&resource, &process) {
                Grant::Granted => (
                    true,
                    EngineEvent::new(Events::Acquired)
                        .process(&process)
                        .resource(&resource),
                ),
                Grant::Blocked { holder, .. } => (
                    false,
                    EngineEvent::new(Events::Blocked)
                        .process(&process)
                        .resource(&resource)
                        .peer(&holder),
                ),
            }
        };

        let event = match condition {
            Some(condition) => event.condition(condition),
            None => event,
        };
        self.emit(vec![event]);
        granted
    }

    /// Acquire every resource in the set, or none of them
    ///
    /// The whole set is checked before anything is assigned. If any resource
    /// is held by a different process the call fails and no resource in the
    /// set changes hands. Duplicates in `resources` are ignored.
    pub fn acquire_all<I, R>(&self, process: impl Into<ProcessId>, resources: I) -> bool
    where
        I: IntoIterator<Item = R>,
        R: Into<ResourceId>,
    {
        let process = process.into();
        let mut resources: Vec<ResourceId> = resources.into_iter().map(Into::into).collect();
        resources.sort();
        resources.dedup();

        self.before_attempt();

        let (granted, event) = {
            let mut state = self.state.lock();
            match state.registry.acquire_all(&process, &resources) {
                Grant::Granted => (
                    true,
                    EngineEvent::new(Events::Acquired)
                        .process(&process)
                        .resources(&resources),
                ),
                Grant::Blocked { resource, holder } => (
                    false,
                    EngineEvent::new(Events::Blocked)
                        .process(&process)
                        .resource(&resource)
                        .peer(&holder),
                ),
            }
        };

        self.emit(vec![event.condition(DeadlockCondition::HoldAndWait)]);
        granted
    }

    /// Hold-and-wait request pattern: atomic multi-resource hold
    ///
    /// Same as [`Simulator::acquire_all`].
    pub fn hold_and_wait<I, R>(&self, process: impl Into<ProcessId>, resources: I) -> bool
    where
        I: IntoIterator<Item = R>,
        R: Into<ResourceId>,
    {
        self.acquire_all(process, resources)
    }

    /// Forcibly drop the assignment of a resource, whoever holds it
    ///
    /// # Returns
    /// The previous holder, if any
    pub fn release(&self, resource: impl Into<ResourceId>) -> Option<ProcessId> {
        let resource = resource.into();
        let previous = self.state.lock().registry.release(&resource);

        if let Some(holder) = &previous {
            self.wakeup.notify_all();
            self.emit(vec![
                EngineEvent::new(Events::Released)
                    .process(holder)
                    .resource(&resource),
            ]);
            self.after_release();
        }
        previous
    }

    /// Evict any holder of `resource` and hand it to `process`
    ///
    /// Always succeeds.
    ///
    /// # Returns
    /// The evicted holder, if any
    pub fn preempt_and_acquire(
        &self,
        resource: impl Into<ResourceId>,
        process: impl Into<ProcessId>,
    ) -> Option<ProcessId> {
        self.preempt(resource.into(), process.into(), None)
    }

    pub(crate) fn preempt(
        &self,
        resource: ResourceId,
        process: ProcessId,
        condition: Option<DeadlockCondition>,
    ) -> Option<ProcessId> {
        let evicted = self
            .state
            .lock()
            .registry
            .preempt_and_acquire(&resource, &process);

        let mut events = Vec::with_capacity(2);
        if let Some(holder) = &evicted {
            self.wakeup.notify_all();
            events.push(
                EngineEvent::new(Events::Preempted)
                    .process(&process)
                    .resource(&resource)
                    .peer(holder),
            );
        }
        events.push(
            EngineEvent::new(Events::Acquired)
                .process(&process)
                .resource(&resource),
        );

        let events: Vec<EngineEvent> = match condition {
            Some(condition) => events.into_iter().map(|e| e.condition(condition)).collect(),
            None => events,
        };
        self.emit(events);
        evicted
    }

    /// Release everything `process` holds
    ///
    /// Releasing a process that holds nothing is a no-op.
    ///
    /// # Returns
    /// The released resources, sorted by key
    pub fn release_all(&self, process: impl Into<ProcessId>) -> Vec<ResourceId> {
        self.release_holdings(process.into(), None)
    }

    pub(crate) fn release_holdings(
        &self,
        process: ProcessId,
        condition: Option<DeadlockCondition>,
    ) -> Vec<ResourceId> {
        let released = self.state.lock().registry.release_all(&process);

        if !released.is_empty() {
            self.wakeup.notify_all();
            let event = EngineEvent::new(Events::Released)
                .process(&process)
                .resources(&released);
            self.emit(vec![match condition {
                Some(condition) => event.condition(condition),
                None => event,
            }]);
            self.after_release();
        }
        released
    }

    /// Record that `waiter` waits for `holder`
    ///
    /// Edges are never derived from failed non-blocking requests; callers
    /// assert them here. A self-edge is accepted and counts as a cycle.
    pub fn add_wait_edge(&self, waiter: impl Into<ProcessId>, holder: impl Into<ProcessId>) {
        let (waiter, holder) = (waiter.into(), holder.into());
        let added = self.state.lock().graph.add_edge(&waiter, &holder);

        if added {
            self.emit(vec![
                EngineEvent::new(Events::WaitEdgeAdded)
                    .process(&waiter)
                    .peer(&holder),
            ]);
        }
    }

    /// Remove a single wait edge
    ///
    /// A blocked request whose derived edge is removed is withdrawn.
    ///
    /// # Returns
    /// `true` if the edge existed
    pub fn remove_wait_edge(
        &self,
        waiter: impl Into<ProcessId>,
        holder: impl Into<ProcessId>,
    ) -> bool {
        let (waiter, holder) = (waiter.into(), holder.into());
        let removed = self.state.lock().graph.remove_edge(&waiter, &holder);

        if removed {
            self.wakeup.notify_all();
            self.emit(vec![
                EngineEvent::new(Events::WaitEdgeRemoved)
                    .process(&waiter)
                    .peer(&holder),
            ]);
        }
        removed
    }

    /// Check the wait-for graph for a circular wait
    pub fn detect_cycle(&self) -> bool {
        self.find_deadlock().is_some()
    }

    /// Check the wait-for graph for a circular wait and describe it
    ///
    /// A detected cycle is reported: a `CycleDetected` event is emitted and
    /// the deadlock callback, if configured, is invoked.
    pub fn find_deadlock(&self) -> Option<DeadlockInfo> {
        let info = self.scan_deadlock()?;
        self.report_deadlock(&info);
        Some(info)
    }

    /// Look for a circular wait without reporting it
    pub(crate) fn scan_deadlock(&self) -> Option<DeadlockInfo> {
        let state = self.state.lock();
        let cycle = state.graph.find_cycle()?;
        let waiting_for = cycle
            .iter()
            .filter_map(|p| state.pending.get(p).map(|w| (p.clone(), w.resource.clone())))
            .collect();
        Some(DeadlockInfo {
            process_cycle: cycle,
            waiting_for,
            timestamp: Utc::now().to_rfc3339(),
        })
    }

    pub(crate) fn report_deadlock(&self, info: &DeadlockInfo) {
        let mut event = EngineEvent::new(Events::CycleDetected)
            .condition(DeadlockCondition::CircularWait)
            .resources(info.waiting_for.iter().map(|(_, r)| r));
        if let Some(first) = info.process_cycle.first() {
            event = event.process(first);
        }
        self.emit(vec![event]);

        if let Some(callback) = &self.on_deadlock {
            callback(info.clone());
        }
    }

    /// Clear every wait edge
    ///
    /// Blocked requests lose their derived edges and are withdrawn.
    pub fn reset_graph(&self) {
        self.reset(None);
    }

    pub(crate) fn reset(&self, condition: Option<DeadlockCondition>) {
        self.state.lock().graph.clear();
        self.wakeup.notify_all();

        let event = EngineEvent::new(Events::GraphReset);
        self.emit(vec![match condition {
            Some(condition) => event.condition(condition),
            None => event,
        }]);
    }

    /// Current holder of a resource
    pub fn holder_of(&self, resource: impl Into<ResourceId>) -> Option<ProcessId> {
        self.state
            .lock()
            .registry
            .holder_of(&resource.into())
            .cloned()
    }

    /// Resources held by a process, sorted by key
    pub fn held_by(&self, process: impl Into<ProcessId>) -> Vec<ResourceId> {
        self.state.lock().registry.inner().held_by(&process.into())
    }

    /// Processes `waiter` currently waits for, sorted by key
    pub fn waits_for(&self, waiter: impl Into<ProcessId>) -> Vec<ProcessId> {
        self.state.lock().graph.waits_for(&waiter.into())
    }

    /// Number of wait edges in the graph
    pub fn wait_edge_count(&self) -> usize {
        self.state.lock().graph.edge_count()
    }

    /// Shared handle to the metrics counters
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Completed operations and mean utilization so far
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Start the wall-clock session timer
    pub fn start_session(&self) {
        self.metrics.start_session();
    }

    /// Stop the session timer and summarize the run
    pub fn end_session(&self) -> SessionSummary {
        self.metrics.end_session()
    }

    /// Write a deadlock report to the event log, if one is configured
    #[cfg_attr(not(feature = "event-log"), allow(unused_variables))]
    pub(crate) fn log_deadlock(&self, info: &DeadlockInfo) {
        #[cfg(feature = "event-log")]
        if let Some(logger) = &self.logger {
            logger.log_deadlock(info);
        }
    }

    /// Block until every queued log record is on disk
    ///
    /// # Errors
    /// Returns an error if the log writer fails to flush
    #[cfg(feature = "event-log")]
    pub fn flush_log(&self) -> anyhow::Result<()> {
        match &self.logger {
            Some(logger) => logger.flush(),
            None => Ok(()),
        }
    }
}
