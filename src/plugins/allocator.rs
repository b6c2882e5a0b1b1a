//! Priority-weighted allocator for the shared resource pool.
//!
//! Availability for a request is the pool minus every *other* project's grant;
//! the requester's own grant is credited back so a resize is not penalized.
//! When a request does not fit, capacity is reclaimed from strictly
//! lower-priority projects, least important first. The whole reclamation plan
//! is computed before anything is mutated: a denied request leaves every
//! allocation exactly as it was.

use crate::core::error::StewardError;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::registry::{Priority, ProjectRegistry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const ALLOCATIONS_KEY: &str = "_allocations.json";

/// A quantity in each pooled dimension.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Resources {
    pub workers: u64,
    pub model_capacity: u64,
    pub token_budget: u64,
}

impl Resources {
    pub const ZERO: Resources = Resources {
        workers: 0,
        model_capacity: 0,
        token_budget: 0,
    };

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    pub fn saturating_sub(&self, other: &Resources) -> Resources {
        Resources {
            workers: self.workers.saturating_sub(other.workers),
            model_capacity: self.model_capacity.saturating_sub(other.model_capacity),
            token_budget: self.token_budget.saturating_sub(other.token_budget),
        }
    }

    pub fn saturating_add(&self, other: &Resources) -> Resources {
        Resources {
            workers: self.workers.saturating_add(other.workers),
            model_capacity: self.model_capacity.saturating_add(other.model_capacity),
            token_budget: self.token_budget.saturating_add(other.token_budget),
        }
    }

    /// Per-dimension minimum.
    pub fn min(&self, other: &Resources) -> Resources {
        Resources {
            workers: self.workers.min(other.workers),
            model_capacity: self.model_capacity.min(other.model_capacity),
            token_budget: self.token_budget.min(other.token_budget),
        }
    }

    /// True when every dimension of `self` is within `capacity`.
    pub fn fits_within(&self, capacity: &Resources) -> bool {
        self.workers <= capacity.workers
            && self.model_capacity <= capacity.model_capacity
            && self.token_budget <= capacity.token_budget
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectAllocation {
    pub project: String,
    pub resources: Resources,
    pub allocated_at: DateTime<Utc>,
    #[serde(default)]
    pub forced: bool,
}

#[derive(Debug, Clone)]
pub struct AllocationRequest {
    pub project: String,
    pub resources: Resources,
}

#[derive(Debug, Clone, Serialize)]
pub struct AllocationOutcome {
    pub granted: bool,
    pub allocation: Option<ProjectAllocation>,
    /// Projects that gave up capacity, in the order they were drawn from.
    pub reallocated_from: Vec<String>,
    /// Capacity still missing when the request was denied.
    pub shortfall: Option<Resources>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolUtilization {
    pub pool: Resources,
    pub allocated: Resources,
    pub available: Resources,
    pub over_committed: bool,
    pub projects: usize,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AllocationsDocument {
    #[serde(default)]
    allocations: Vec<ProjectAllocation>,
}

/// One donor's contribution in a reclamation plan.
struct Draw {
    project: String,
    taken: Resources,
}

#[derive(Debug)]
pub struct ResourceAllocator {
    store: Store,
    pool: Resources,
    allocations: BTreeMap<String, ProjectAllocation>,
}

impl ResourceAllocator {
    pub fn open(store: Store, pool: Resources) -> Result<Self, StewardError> {
        let doc: AllocationsDocument = store.load(ALLOCATIONS_KEY)?.unwrap_or_default();
        let allocations = doc
            .allocations
            .into_iter()
            .map(|a| (a.project.clone(), a))
            .collect();
        Ok(Self {
            store,
            pool,
            allocations,
        })
    }

    /// Write `next` and adopt it only once the write succeeded.
    fn persist(&mut self, next: BTreeMap<String, ProjectAllocation>) -> Result<(), StewardError> {
        let doc = AllocationsDocument {
            allocations: next.values().cloned().collect(),
        };
        self.store.save(ALLOCATIONS_KEY, &doc)?;
        self.allocations = next;
        Ok(())
    }

    pub fn pool(&self) -> Resources {
        self.pool
    }

    pub fn allocation(&self, project: &str) -> Option<&ProjectAllocation> {
        self.allocations.get(project)
    }

    pub fn allocations(&self) -> Vec<&ProjectAllocation> {
        self.allocations.values().collect()
    }

    fn allocated_except(&self, project: &str) -> Resources {
        self.allocations
            .values()
            .filter(|a| a.project != project)
            .fold(Resources::ZERO, |acc, a| acc.saturating_add(&a.resources))
    }

    pub fn allocate(
        &mut self,
        registry: &ProjectRegistry,
        request: AllocationRequest,
    ) -> Result<AllocationOutcome, StewardError> {
        self.allocate_inner(registry, request, false)
    }

    /// Same as [`allocate`](Self::allocate) but every other project is an
    /// eligible donor and the grant is made even if the pool is exceeded.
    pub fn force_allocate(
        &mut self,
        registry: &ProjectRegistry,
        request: AllocationRequest,
    ) -> Result<AllocationOutcome, StewardError> {
        self.allocate_inner(registry, request, true)
    }

    fn allocate_inner(
        &mut self,
        registry: &ProjectRegistry,
        request: AllocationRequest,
        forced: bool,
    ) -> Result<AllocationOutcome, StewardError> {
        let requester_priority = registry
            .priority_of(&request.project)
            .ok_or_else(|| StewardError::NotFound(format!("project '{}'", request.project)))?;

        let available = self
            .pool
            .saturating_sub(&self.allocated_except(&request.project));

        if request.resources.fits_within(&available) {
            let allocation = self.commit(&request, &[], false)?;
            tracing::info!(project = %request.project, "allocation granted");
            return Ok(AllocationOutcome {
                granted: true,
                allocation: Some(allocation),
                reallocated_from: Vec::new(),
                shortfall: None,
                reason: "granted from free capacity".to_string(),
            });
        }

        let deficit = request.resources.saturating_sub(&available);
        let (plan, remaining) = self.plan_reclaim(registry, &request.project, requester_priority, deficit, forced);

        if !remaining.is_zero() && !forced {
            tracing::warn!(
                project = %request.project,
                workers = remaining.workers,
                model_capacity = remaining.model_capacity,
                token_budget = remaining.token_budget,
                "allocation denied"
            );
            return Ok(AllocationOutcome {
                granted: false,
                allocation: None,
                reallocated_from: Vec::new(),
                shortfall: Some(remaining),
                reason: format!(
                    "insufficient capacity: {} lower-priority donor(s) cannot cover the deficit",
                    plan.len()
                ),
            });
        }

        let reallocated_from: Vec<String> = plan.iter().map(|d| d.project.clone()).collect();
        let allocation = self.commit(&request, &plan, forced)?;
        if forced {
            tracing::warn!(
                project = %request.project,
                donors = ?reallocated_from,
                over_committed = !remaining.is_zero(),
                "forced allocation override"
            );
        } else {
            tracing::info!(project = %request.project, donors = ?reallocated_from, "allocation granted by reallocation");
        }
        Ok(AllocationOutcome {
            granted: true,
            allocation: Some(allocation),
            reason: if remaining.is_zero() {
                format!("granted after reclaiming from {} project(s)", plan.len())
            } else {
                "forced grant exceeds the shared pool".to_string()
            },
            reallocated_from,
            shortfall: None,
        })
    }

    /// Decide who gives what, without touching any allocation.
    fn plan_reclaim(
        &self,
        registry: &ProjectRegistry,
        requester: &str,
        requester_priority: Priority,
        deficit: Resources,
        any_priority: bool,
    ) -> (Vec<Draw>, Resources) {
        let mut donors: Vec<(Priority, &ProjectAllocation)> = self
            .allocations
            .values()
            .filter(|a| a.project != requester)
            .map(|a| {
                let p = registry.priority_of(&a.project).unwrap_or(Priority::Low);
                (p, a)
            })
            .filter(|(p, _)| any_priority || *p < requester_priority)
            .collect();
        donors.sort_by(|(pa, a), (pb, b)| pa.cmp(pb).then_with(|| a.project.cmp(&b.project)));

        let mut remaining = deficit;
        let mut plan = Vec::new();
        for (_, donor) in donors {
            if remaining.is_zero() {
                break;
            }
            let taken = donor.resources.min(&remaining);
            if taken.is_zero() {
                continue;
            }
            remaining = remaining.saturating_sub(&taken);
            plan.push(Draw {
                project: donor.project.clone(),
                taken,
            });
        }
        (plan, remaining)
    }

    fn commit(
        &mut self,
        request: &AllocationRequest,
        plan: &[Draw],
        forced: bool,
    ) -> Result<ProjectAllocation, StewardError> {
        let mut next = self.allocations.clone();
        for draw in plan {
            if let Some(donor) = next.get_mut(&draw.project) {
                donor.resources = donor.resources.saturating_sub(&draw.taken);
            }
        }
        let allocation = ProjectAllocation {
            project: request.project.clone(),
            resources: request.resources,
            allocated_at: time::now(),
            forced,
        };
        next.insert(request.project.clone(), allocation.clone());
        self.persist(next)?;
        Ok(allocation)
    }

    /// Drop a project's grant. Donors are not compensated.
    pub fn release(&mut self, project: &str) -> Result<Option<ProjectAllocation>, StewardError> {
        if !self.allocations.contains_key(project) {
            return Ok(None);
        }
        let mut next = self.allocations.clone();
        let removed = next.remove(project);
        self.persist(next)?;
        tracing::info!(project = %project, "allocation released");
        Ok(removed)
    }

    pub fn utilization(&self) -> PoolUtilization {
        let allocated = self
            .allocations
            .values()
            .fold(Resources::ZERO, |acc, a| acc.saturating_add(&a.resources));
        PoolUtilization {
            pool: self.pool,
            available: self.pool.saturating_sub(&allocated),
            over_committed: !allocated.fits_within(&self.pool),
            allocated,
            projects: self.allocations.len(),
        }
    }
}
