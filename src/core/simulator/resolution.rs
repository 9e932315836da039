//! Resolution strategies for the four deadlock conditions
//!
//! | condition        | strategy                                    |
//! |------------------|---------------------------------------------|
//! | mutual exclusion | preempt the holder in favour of the requester |
//! | hold and wait    | the process forfeits everything it holds    |
//! | no preemption    | forcibly release and reassign the resource  |
//! | circular wait    | forget all wait edges                       |
//!
//! Mutual exclusion and no-preemption perform the same forced reassignment;
//! only the condition attached to the emitted events differs.

use super::Simulator;
use crate::core::types::{DeadlockCondition, ProcessId, ResourceId};
use serde::{Deserialize, Serialize};

/// A resolution strategy and its arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    /// Preempt `resource` in favour of the higher-priority `process`
    PreemptByPriority {
        resource: ResourceId,
        process: ProcessId,
    },
    /// Make `process` give up all of its holdings
    ReleaseHoldings { process: ProcessId },
    /// Take `resource` away from its holder and give it to `process`
    ForceRelease {
        resource: ResourceId,
        process: ProcessId,
    },
    /// Clear the wait-for graph
    ResetGraph,
}

impl Resolution {
    /// The deadlock condition this strategy breaks
    pub fn condition(&self) -> DeadlockCondition {
        match self {
            Resolution::PreemptByPriority { .. } => DeadlockCondition::MutualExclusion,
            Resolution::ReleaseHoldings { .. } => DeadlockCondition::HoldAndWait,
            Resolution::ForceRelease { .. } => DeadlockCondition::NoPreemption,
            Resolution::ResetGraph => DeadlockCondition::CircularWait,
        }
    }
}

impl Simulator {
    /// Break a mutual-exclusion deadlock by preempting the holder of `resource`
    ///
    /// # Returns
    /// The evicted holder, if any
    pub fn resolve_mutual_exclusion(
        &self,
        resource: impl Into<ResourceId>,
        requester: impl Into<ProcessId>,
    ) -> Option<ProcessId> {
        self.preempt(
            resource.into(),
            requester.into(),
            Some(DeadlockCondition::MutualExclusion),
        )
    }

    /// Break a hold-and-wait deadlock by releasing everything `process` holds
    ///
    /// # Returns
    /// The released resources, sorted by key
    pub fn resolve_hold_and_wait(&self, process: impl Into<ProcessId>) -> Vec<ResourceId> {
        self.release_holdings(process.into(), Some(DeadlockCondition::HoldAndWait))
    }

    /// Break a no-preemption deadlock by forcibly reassigning `resource`
    ///
    /// # Returns
    /// The process the resource was taken from, if any
    pub fn resolve_no_preemption(
        &self,
        resource: impl Into<ResourceId>,
        requester: impl Into<ProcessId>,
    ) -> Option<ProcessId> {
        self.preempt(
            resource.into(),
            requester.into(),
            Some(DeadlockCondition::NoPreemption),
        )
    }

    /// Break a circular wait by clearing the wait-for graph
    ///
    /// Models imposing a global acquisition order from here on: no cycle can
    /// be detected again until new edges are added.
    pub fn resolve_circular_wait(&self) {
        self.reset(Some(DeadlockCondition::CircularWait));
    }

    /// Apply a resolution strategy
    pub fn resolve(&self, resolution: &Resolution) {
        match resolution {
            Resolution::PreemptByPriority { resource, process } => {
                self.resolve_mutual_exclusion(resource, process);
            }
            Resolution::ReleaseHoldings { process } => {
                self.resolve_hold_and_wait(process);
            }
            Resolution::ForceRelease { resource, process } => {
                self.resolve_no_preemption(resource, process);
            }
            Resolution::ResetGraph => self.resolve_circular_wait(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preemption_transfers_ownership() {
        let sim = Simulator::new();
        sim.mutual_exclusion("R1", "P1");
        assert_eq!(
            sim.resolve_mutual_exclusion("R1", "P2"),
            Some(ProcessId::from("P1"))
        );
        assert_eq!(sim.holder_of("R1"), Some(ProcessId::from("P2")));
        assert!(sim.held_by("P1").is_empty());
    }

    #[test]
    fn test_resolve_dispatch() {
        let sim = Simulator::new();
        sim.acquire_all("P2", ["R1", "R2"]);

        sim.resolve(&Resolution::ReleaseHoldings {
            process: ProcessId::from("P2"),
        });
        assert!(sim.held_by("P2").is_empty());

        sim.acquire("R2", "P2");
        sim.resolve(&Resolution::ForceRelease {
            resource: ResourceId::from("R2"),
            process: ProcessId::from("P3"),
        });
        assert_eq!(sim.holder_of("R2"), Some(ProcessId::from("P3")));

        sim.add_wait_edge("P1", "P2");
        sim.add_wait_edge("P2", "P1");
        sim.resolve(&Resolution::ResetGraph);
        assert!(!sim.detect_cycle());
    }

    #[test]
    fn test_conditions() {
        assert_eq!(
            Resolution::ResetGraph.condition(),
            DeadlockCondition::CircularWait
        );
        assert_eq!(
            Resolution::ReleaseHoldings {
                process: ProcessId::from("P1")
            }
            .condition(),
            DeadlockCondition::HoldAndWait
        );
    }
}
