use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Process identifier
///
/// Uniquely identifies a simulated process. Processes are never registered
/// up front; any key that shows up in a request is a process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(String);

/// Resource identifier
///
/// Uniquely identifies a resource. A resource is free until some process
/// acquires it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

macro_rules! string_id {
    ($ty:ident) => {
        impl $ty {
            pub fn new(id: impl Into<String>) -> Self {
                $ty(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $ty {
            fn from(id: &str) -> Self {
                $ty(id.to_owned())
            }
        }

        impl From<String> for $ty {
            fn from(id: String) -> Self {
                $ty(id)
            }
        }

        impl From<&$ty> for $ty {
            fn from(id: &$ty) -> Self {
                id.clone()
            }
        }
    };
}

string_id!(ProcessId);
string_id!(ResourceId);

/// The classical deadlock condition a request or resolution is attributed to
///
/// This is a narrative label only. Mutual exclusion and no-preemption share
/// the exact same state transitions; the label is what tells them apart in
/// the event stream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DeadlockCondition {
    /// A resource may be held by only one process at a time
    MutualExclusion,
    /// A process holding resources requests more
    HoldAndWait,
    /// A resource cannot be taken from its holder without an override
    NoPreemption,
    /// A cycle of processes each waiting on the next
    CircularWait,
}

/// Represents the type of engine event that occurred
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Events {
    /// A process now holds a resource (or a whole set of them)
    Acquired,
    /// A request failed because another process holds the resource
    Blocked,
    /// A holder lost a resource to a preempting process
    Preempted,
    /// A resource was released by a resolution strategy or an abort
    Released,
    /// A wait-for edge was added to the graph
    WaitEdgeAdded,
    /// A wait-for edge was removed from the graph
    WaitEdgeRemoved,
    /// Cycle detection found a circular wait
    CycleDetected,
    /// All wait-for edges were cleared
    GraphReset,
    /// A process aborted and gave up everything it held
    Aborted,
}

/// Structured record of a single engine state transition
///
/// Every operation produces zero or more of these. They are handed to the
/// configured observer and event log after the engine lock is released.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineEvent {
    /// What happened
    pub event: Events,
    /// The acting process (requester, waiter, victim)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process: Option<ProcessId>,
    /// The resources involved, sorted by key for multi-resource requests
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub resources: Vec<ResourceId>,
    /// The other process involved (current holder, waited-on process, evicted holder)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer: Option<ProcessId>,
    /// Deadlock condition this transition is attributed to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<DeadlockCondition>,
    /// RFC-3339 timestamp of when the event was recorded
    pub timestamp: String,
}

impl EngineEvent {
    pub(crate) fn new(event: Events) -> Self {
        EngineEvent {
            event,
            process: None,
            resources: Vec::new(),
            peer: None,
            condition: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub(crate) fn process(mut self, process: &ProcessId) -> Self {
        self.process = Some(process.clone());
        self
    }

    pub(crate) fn resource(mut self, resource: &ResourceId) -> Self {
        self.resources.push(resource.clone());
        self
    }

    pub(crate) fn resources<'a>(
        mut self,
        resources: impl IntoIterator<Item = &'a ResourceId>,
    ) -> Self {
        self.resources.extend(resources.into_iter().cloned());
        self
    }

    pub(crate) fn peer(mut self, peer: &ProcessId) -> Self {
        self.peer = Some(peer.clone());
        self
    }

    pub(crate) fn condition(mut self, condition: DeadlockCondition) -> Self {
        self.condition = Some(condition);
        self
    }
}

/// Represents the result of a deadlock detection
///
/// Passed to the deadlock callback by the monitor when the wait-for graph
/// contains a cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadlockInfo {
    /// Processes on the detected cycle, in wait order
    ///
    /// If P1 waits for P2 and P2 waits for P1 the cycle is [P1, P2]. A
    /// self-edge yields a single-element cycle.
    pub process_cycle: Vec<ProcessId>,

    /// Blocked requests of the processes on the cycle as (process, resource)
    ///
    /// Only requests issued through the blocking path are known here; manually
    /// asserted edges carry no resource.
    pub waiting_for: Vec<(ProcessId, ResourceId)>,

    /// ISO-8601 timestamp of when the deadlock was detected
    pub timestamp: String,
}

/// How a blocking acquisition ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaitOutcome {
    /// The resource is now held by the requester
    Acquired,
    /// A resolution strategy removed the request's wait edge
    Withdrawn,
    /// The requester was aborted while waiting
    Aborted,
    /// The deadline passed before the resource became available
    TimedOut,
}

impl WaitOutcome {
    pub fn is_acquired(self) -> bool {
        matches!(self, WaitOutcome::Acquired)
    }
}
