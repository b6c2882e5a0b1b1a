//! The engine facade: one owner for every governance component.
//!
//! `Steward` is built from an explicit [`Store`] and [`GovernanceConfig`];
//! nothing is global. Components that need a registry lookup get it by
//! reference from here, so cross-component calls never hold two mutable
//! borrows of the same state.

use crate::core::config::GovernanceConfig;
use crate::core::error::StewardError;
use crate::core::store::{Store, StoreKind};
use crate::plugins::allocator::{self, AllocationOutcome, AllocationRequest, ResourceAllocator};
use crate::plugins::challenge::{ChallengeOutcome, ChallengeProtocol, ExecutionCheck};
use crate::plugins::decision::{DecisionRecord, DecisionStore};
use crate::plugins::gate::{self, GateEnforcement, GateVerdict, PhaseState};
use crate::plugins::isolation::{self, CrossProjectGrant, IsolationDecision, IsolationEnforcer, Operation};
use crate::plugins::protection::{self, GovernanceProtection};
use crate::plugins::registry::ProjectRegistry;
use serde::Serialize;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

/// Global documents owned by each subsystem.
pub(crate) const GLOBAL_DOCUMENTS: &[(&str, &str)] = &[
    ("gate", gate::GATE_HISTORY_KEY),
    ("allocator", allocator::ALLOCATIONS_KEY),
    ("isolation", isolation::ISOLATION_KEY),
    ("protection", protection::AUDIT_LOG_KEY),
];

#[derive(Debug, Clone, Serialize)]
pub struct DocumentStatus {
    pub subsystem: &'static str,
    pub key: &'static str,
    pub present: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StewardStatus {
    pub root: String,
    pub backend: &'static str,
    pub projects: usize,
    pub documents: Vec<DocumentStatus>,
}

fn ledger<'a>(
    cache: &'a mut BTreeMap<String, DecisionStore>,
    store: &Store,
    project: &str,
) -> Result<&'a mut DecisionStore, StewardError> {
    match cache.entry(project.to_string()) {
        Entry::Occupied(e) => Ok(e.into_mut()),
        Entry::Vacant(e) => Ok(e.insert(DecisionStore::open(store.clone(), project)?)),
    }
}

#[derive(Debug)]
pub struct Steward {
    store: Store,
    config: GovernanceConfig,
    registry: ProjectRegistry,
    allocator: ResourceAllocator,
    isolation: IsolationEnforcer,
    protection: GovernanceProtection,
    gates: GateEnforcement,
    challenge: ChallengeProtocol,
    decisions: BTreeMap<String, DecisionStore>,
}

impl Steward {
    pub fn open(store: Store, config: GovernanceConfig) -> Result<Self, StewardError> {
        config.validate()?;
        let registry = ProjectRegistry::open(store.clone())?;
        let allocator = ResourceAllocator::open(store.clone(), config.resources)?;
        let isolation = IsolationEnforcer::open(store.clone())?;
        let protection = GovernanceProtection::open(store.clone(), &config)?;
        let gates = GateEnforcement::new(store.clone(), config.clone());
        let challenge = ChallengeProtocol::new(&config);
        tracing::debug!(root = %store.root.display(), projects = registry.list(None).len(), "steward opened");
        Ok(Self {
            store,
            config,
            registry,
            allocator,
            isolation,
            protection,
            gates,
            challenge,
            decisions: BTreeMap::new(),
        })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &GovernanceConfig {
        &self.config
    }

    pub fn registry(&self) -> &ProjectRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ProjectRegistry {
        &mut self.registry
    }

    pub fn allocator(&self) -> &ResourceAllocator {
        &self.allocator
    }

    pub fn isolation(&self) -> &IsolationEnforcer {
        &self.isolation
    }

    pub fn protection(&self) -> &GovernanceProtection {
        &self.protection
    }

    pub fn protection_mut(&mut self) -> &mut GovernanceProtection {
        &mut self.protection
    }

    pub fn gates(&self) -> &GateEnforcement {
        &self.gates
    }

    pub fn challenge_protocol(&self) -> &ChallengeProtocol {
        &self.challenge
    }

    /// The project's decision ledger, opened on first use.
    pub fn decisions(&mut self, project: &str) -> Result<&mut DecisionStore, StewardError> {
        ledger(&mut self.decisions, &self.store, project)
    }

    pub fn challenge_decision(
        &mut self,
        project: &str,
        id: &str,
        challenger: &str,
        rationale: &str,
        counter_proposal: Option<&str>,
    ) -> Result<ChallengeOutcome, StewardError> {
        let ledger = ledger(&mut self.decisions, &self.store, project)?;
        self.challenge
            .challenge(ledger, id, challenger, rationale, counter_proposal)
    }

    pub fn accept_decision(
        &mut self,
        project: &str,
        id: &str,
        challenger: &str,
        rationale: &str,
    ) -> Result<DecisionRecord, StewardError> {
        let ledger = ledger(&mut self.decisions, &self.store, project)?;
        self.challenge.accept(ledger, id, challenger, rationale)
    }

    pub fn escalate_decision(&mut self, project: &str, id: &str) -> Result<DecisionRecord, StewardError> {
        let ledger = ledger(&mut self.decisions, &self.store, project)?;
        self.challenge.escalate(ledger, id)
    }

    pub fn can_execute(&mut self, project: &str, id: &str) -> Result<ExecutionCheck, StewardError> {
        let ledger = ledger(&mut self.decisions, &self.store, project)?;
        let decision = ledger
            .get(id)
            .ok_or_else(|| StewardError::NotFound(format!("decision '{id}'")))?;
        Ok(self.challenge.can_execute(decision))
    }

    pub fn record_verdict(&mut self, verdict: GateVerdict) -> Result<PhaseState, StewardError> {
        self.gates.record_verdict(verdict)
    }

    /// Advance the phase and mirror the new phase number into the registry
    /// when the project is registered.
    pub fn advance_phase(
        &mut self,
        project: &str,
        from_phase: u32,
        to_phase: u32,
        transition: &str,
    ) -> Result<PhaseState, StewardError> {
        let state = self
            .gates
            .advance_phase(project, from_phase, to_phase, transition)?;
        if self.registry.contains(project) {
            self.registry.set_current_phase(project, state.current_phase)?;
        }
        Ok(state)
    }

    pub fn revert_phase(&mut self, project: &str, reason: &str) -> Result<PhaseState, StewardError> {
        let state = self.gates.revert_phase(project, reason)?;
        if self.registry.contains(project) {
            self.registry.set_current_phase(project, state.current_phase)?;
        }
        Ok(state)
    }

    pub fn allocate(&mut self, request: AllocationRequest) -> Result<AllocationOutcome, StewardError> {
        self.allocator.allocate(&self.registry, request)
    }

    pub fn force_allocate(&mut self, request: AllocationRequest) -> Result<AllocationOutcome, StewardError> {
        self.allocator.force_allocate(&self.registry, request)
    }

    pub fn release(&mut self, project: &str) -> Result<(), StewardError> {
        self.allocator.release(project)?;
        Ok(())
    }

    pub fn check_access(
        &mut self,
        source: &str,
        target: &str,
        operation: Operation,
    ) -> Result<IsolationDecision, StewardError> {
        self.isolation
            .check_access(&self.registry, source, target, operation)
    }

    pub fn grant_access(
        &mut self,
        source: &str,
        target: &str,
        operations: &[Operation],
    ) -> Result<CrossProjectGrant, StewardError> {
        self.isolation
            .grant_cross_project_access(&self.registry, source, target, operations)
    }

    pub fn revoke_access(
        &mut self,
        source: &str,
        target: &str,
        operations: &[Operation],
    ) -> Result<Option<CrossProjectGrant>, StewardError> {
        self.isolation
            .revoke_cross_project_access(&self.registry, source, target, operations)
    }

    /// Unregister a project and drop its allocation, its cross-project
    /// grants in both directions and its cached ledger.
    pub fn unregister_project(&mut self, project: &str) -> Result<(), StewardError> {
        self.registry.unregister(project)?;
        self.allocator.release(project)?;
        self.isolation.forget_project(project)?;
        self.decisions.remove(project);
        Ok(())
    }

    pub fn status(&self) -> Result<StewardStatus, StewardError> {
        let keys = self.store.keys()?;
        let documents = GLOBAL_DOCUMENTS
            .iter()
            .map(|&(subsystem, key)| DocumentStatus {
                subsystem,
                key,
                present: keys.iter().any(|k| k == key),
            })
            .collect();
        Ok(StewardStatus {
            root: self.store.root.display().to_string(),
            backend: match self.store.kind {
                StoreKind::Json => "json",
                StoreKind::Sqlite => "sqlite",
            },
            projects: self.registry.list(None).len(),
            documents,
        })
    }
}
