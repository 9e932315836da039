//! Resource registry holding the current resource → holder assignments
//!
//! The registry is the only owner of the assignment map. It is a plain,
//! single-threaded structure: the [`Simulator`](crate::Simulator) wraps it in
//! its engine lock, which is what makes the operations linearizable.
//!
//! # Invariant
//!
//! A resource key present in the map is held by exactly one process. Absence
//! means the resource is free. No operation ever records two holders for the
//! same resource, and a failed operation leaves the map untouched.

use crate::core::types::{ProcessId, ResourceId};
use fxhash::FxHashMap;

/// Result of an allocation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grant {
    /// Every requested resource is now held by the requester
    Granted,
    /// The request conflicts with another holder; nothing was assigned
    Blocked {
        /// First requested resource found held by someone else
        resource: ResourceId,
        /// The process holding it
        holder: ProcessId,
    },
}

impl Grant {
    pub fn is_granted(&self) -> bool {
        matches!(self, Grant::Granted)
    }
}

/// Allocation primitives over an assignment map
///
/// Implemented by [`ResourceRegistry`] and by the
/// [`Metered`](crate::core::metrics::Metered) decorator that records
/// throughput and utilization around it.
pub trait Allocator {
    /// Assign `resource` to `process` if it is free or already theirs
    fn acquire(&mut self, resource: &ResourceId, process: &ProcessId) -> Grant;

    /// Forcibly drop the assignment of `resource`, whoever holds it
    ///
    /// Returns the previous holder, if any.
    fn release(&mut self, resource: &ResourceId) -> Option<ProcessId>;

    /// Evict any current holder of `resource`, then acquire it for `process`
    ///
    /// Returns the evicted holder. Re-preempting a resource you already hold
    /// evicts nobody.
    fn preempt_and_acquire(&mut self, resource: &ResourceId, process: &ProcessId)
    -> Option<ProcessId>;

    /// Acquire every resource in `resources` or none of them
    fn acquire_all(&mut self, process: &ProcessId, resources: &[ResourceId]) -> Grant;

    /// Release everything `process` holds, returning the released resources
    fn release_all(&mut self, process: &ProcessId) -> Vec<ResourceId>;

    /// Current holder of `resource`
    fn holder_of(&self, resource: &ResourceId) -> Option<&ProcessId>;
}

/// Owned assignment map enforcing mutual exclusion
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    /// Maps resources to the process currently holding them
    assignments: FxHashMap<ResourceId, ProcessId>,
}

impl ResourceRegistry {
    /// Create an empty registry, every resource free
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether `resource` is unassigned
    pub fn is_free(&self, resource: &ResourceId) -> bool {
        !self.assignments.contains_key(resource)
    }

    /// All resources currently held by `process`, sorted by key
    pub fn held_by(&self, process: &ProcessId) -> Vec<ResourceId> {
        let mut held: Vec<ResourceId> = self
            .assignments
            .iter()
            .filter(|(_, holder)| *holder == process)
            .map(|(resource, _)| resource.clone())
            .collect();
        held.sort();
        held
    }

    /// Number of assigned resources
    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Find the first resource in `resources` held by someone other than `process`
    fn conflict(&self, process: &ProcessId, resources: &[ResourceId]) -> Option<Grant> {
        resources.iter().find_map(|resource| match self.assignments.get(resource) {
            Some(holder) if holder != process => Some(Grant::Blocked {
                resource: resource.clone(),
                holder: holder.clone(),
            }),
            _ => None,
        })
    }
}

impl Allocator for ResourceRegistry {
    fn acquire(&mut self, resource: &ResourceId, process: &ProcessId) -> Grant {
        if let Some(blocked) = self.conflict(process, std::slice::from_ref(resource)) {
            return blocked;
        }
        self.assignments.insert(resource.clone(), process.clone());
        Grant::Granted
    }

    fn release(&mut self, resource: &ResourceId) -> Option<ProcessId> {
        self.assignments.remove(resource)
    }

    fn preempt_and_acquire(
        &mut self,
        resource: &ResourceId,
        process: &ProcessId,
    ) -> Option<ProcessId> {
        self.assignments
            .insert(resource.clone(), process.clone())
            .filter(|previous| previous != process)
    }

    fn acquire_all(&mut self, process: &ProcessId, resources: &[ResourceId]) -> Grant {
        // Scan everything before committing anything
        if let Some(blocked) = self.conflict(process, resources) {
            return blocked;
        }
        for resource in resources {
            self.assignments.insert(resource.clone(), process.clone());
        }
        Grant::Granted
    }

    fn release_all(&mut self, process: &ProcessId) -> Vec<ResourceId> {
        let released = self.held_by(process);
        for resource in &released {
            self.assignments.remove(resource);
        }
        released
    }

    fn holder_of(&self, resource: &ResourceId) -> Option<&ProcessId> {
        self.assignments.get(resource)
    }
}
