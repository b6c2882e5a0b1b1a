//! Cross-project isolation.
//!
//! A project may always touch its own state. Touching another project's state
//! requires an explicit `source -> target` grant for the operation (or the
//! `*` wildcard). Every denial is recorded as an [`IsolationViolation`].

use crate::core::error::StewardError;
use crate::core::store::{Store, normalize_path};
use crate::core::time;
use crate::plugins::registry::ProjectRegistry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

pub const ISOLATION_KEY: &str = "_isolation.json";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Read,
    Write,
    Execute,
    /// Wildcard: in a grant it covers every operation.
    #[serde(rename = "*")]
    Any,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Read => "read",
            Operation::Write => "write",
            Operation::Execute => "execute",
            Operation::Any => "*",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Operation {
    type Err = StewardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Operation::Read),
            "write" => Ok(Operation::Write),
            "execute" => Ok(Operation::Execute),
            "*" => Ok(Operation::Any),
            other => Err(StewardError::ValidationError(format!(
                "unknown operation '{other}' (expected read, write, execute or *)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IsolationViolation {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub target: String,
    pub operation: Operation,
    pub severity: Severity,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CrossProjectGrant {
    pub source: String,
    pub target: String,
    pub operations: BTreeSet<Operation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IsolationDecision {
    pub allowed: bool,
    pub reason: String,
    pub violation: Option<IsolationViolation>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IsolationDocument {
    #[serde(default)]
    grants: Vec<CrossProjectGrant>,
    #[serde(default)]
    violations: Vec<IsolationViolation>,
}

/// source -> target -> granted operations
type GrantMap = BTreeMap<String, BTreeMap<String, BTreeSet<Operation>>>;

fn flatten(grants: &GrantMap) -> Vec<CrossProjectGrant> {
    grants
        .iter()
        .flat_map(|(source, targets)| {
            targets.iter().map(move |(target, ops)| CrossProjectGrant {
                source: source.clone(),
                target: target.clone(),
                operations: ops.clone(),
            })
        })
        .collect()
}

#[derive(Debug)]
pub struct IsolationEnforcer {
    store: Store,
    grants: GrantMap,
    violations: Vec<IsolationViolation>,
}

impl IsolationEnforcer {
    pub fn open(store: Store) -> Result<Self, StewardError> {
        let doc: IsolationDocument = store.load(ISOLATION_KEY)?.unwrap_or_default();
        let mut grants = GrantMap::new();
        for g in doc.grants {
            grants
                .entry(g.source)
                .or_default()
                .entry(g.target)
                .or_default()
                .extend(g.operations);
        }
        Ok(Self {
            store,
            grants,
            violations: doc.violations,
        })
    }

    /// Write the next state and adopt it only once the write succeeded.
    fn persist(
        &mut self,
        grants: GrantMap,
        violations: Vec<IsolationViolation>,
    ) -> Result<(), StewardError> {
        let doc = IsolationDocument {
            grants: flatten(&grants),
            violations,
        };
        self.store.save(ISOLATION_KEY, &doc)?;
        self.grants = grants;
        self.violations = doc.violations;
        Ok(())
    }

    fn is_granted(&self, source: &str, target: &str, operation: Operation) -> bool {
        self.grants
            .get(source)
            .and_then(|targets| targets.get(target))
            .is_some_and(|ops| ops.contains(&Operation::Any) || ops.contains(&operation))
    }

    pub fn check_access(
        &mut self,
        registry: &ProjectRegistry,
        source: &str,
        target: &str,
        operation: Operation,
    ) -> Result<IsolationDecision, StewardError> {
        if source == target {
            return Ok(IsolationDecision {
                allowed: true,
                reason: "same-project access".to_string(),
                violation: None,
            });
        }

        let denial = if !registry.contains(source) {
            Some(format!("source project '{source}' is not registered"))
        } else if !registry.contains(target) {
            Some(format!("target project '{target}' is not registered"))
        } else if self.is_granted(source, target, operation) {
            None
        } else {
            Some(format!(
                "no grant allows '{source}' to {operation} state of '{target}'"
            ))
        };

        let Some(reason) = denial else {
            return Ok(IsolationDecision {
                allowed: true,
                reason: format!("granted {source}->{target}"),
                violation: None,
            });
        };

        let severity = if operation == Operation::Write {
            Severity::Critical
        } else {
            Severity::Warning
        };
        let violation = IsolationViolation {
            id: time::new_event_id(),
            timestamp: time::now(),
            source: source.to_string(),
            target: target.to_string(),
            operation,
            severity,
            reason: reason.clone(),
        };
        let mut violations = self.violations.clone();
        violations.push(violation.clone());
        self.persist(self.grants.clone(), violations)?;
        tracing::warn!(source, target, operation = %operation, ?severity, "cross-project access denied");
        Ok(IsolationDecision {
            allowed: false,
            reason,
            violation: Some(violation),
        })
    }

    /// Mutation-site variant of [`check_access`](Self::check_access).
    pub fn require_access(
        &mut self,
        registry: &ProjectRegistry,
        source: &str,
        target: &str,
        operation: Operation,
    ) -> Result<(), StewardError> {
        let decision = self.check_access(registry, source, target, operation)?;
        if decision.allowed {
            Ok(())
        } else {
            Err(StewardError::AccessDenied {
                violation_type: crate::core::error::ViolationType::CrossProject,
                reason: decision.reason,
            })
        }
    }

    fn ensure_registered(registry: &ProjectRegistry, names: &[&str]) -> Result<(), StewardError> {
        for name in names {
            if !registry.contains(name) {
                return Err(StewardError::NotFound(format!("project '{name}'")));
            }
        }
        Ok(())
    }

    pub fn grant_cross_project_access(
        &mut self,
        registry: &ProjectRegistry,
        source: &str,
        target: &str,
        operations: &[Operation],
    ) -> Result<CrossProjectGrant, StewardError> {
        Self::ensure_registered(registry, &[source, target])?;
        if source == target {
            return Err(StewardError::ValidationError(
                "a project cannot be granted access to itself".to_string(),
            ));
        }
        let mut grants = self.grants.clone();
        let ops = grants
            .entry(source.to_string())
            .or_default()
            .entry(target.to_string())
            .or_default();
        ops.extend(operations.iter().copied());
        let grant = CrossProjectGrant {
            source: source.to_string(),
            target: target.to_string(),
            operations: ops.clone(),
        };
        self.persist(grants, self.violations.clone())?;
        tracing::info!(source, target, operations = ?grant.operations, "cross-project access granted");
        Ok(grant)
    }

    /// Remove operations from a grant. Returns what is left, if anything.
    pub fn revoke_cross_project_access(
        &mut self,
        registry: &ProjectRegistry,
        source: &str,
        target: &str,
        operations: &[Operation],
    ) -> Result<Option<CrossProjectGrant>, StewardError> {
        Self::ensure_registered(registry, &[source, target])?;
        let mut grants = self.grants.clone();
        let mut left = None;
        if let Some(targets) = grants.get_mut(source) {
            if let Some(ops) = targets.get_mut(target) {
                for op in operations {
                    ops.remove(op);
                }
                if ops.is_empty() {
                    targets.remove(target);
                } else {
                    left = Some(CrossProjectGrant {
                        source: source.to_string(),
                        target: target.to_string(),
                        operations: ops.clone(),
                    });
                }
            }
            if targets.is_empty() {
                grants.remove(source);
            }
        }
        self.persist(grants, self.violations.clone())?;
        tracing::info!(source, target, "cross-project access revoked");
        Ok(left)
    }

    /// Drop every grant naming `project` as source or target. Returns how
    /// many grants were removed. Violations are kept as history.
    pub fn forget_project(&mut self, project: &str) -> Result<usize, StewardError> {
        let mut grants = self.grants.clone();
        let mut removed = grants.remove(project).map_or(0, |targets| targets.len());
        for targets in grants.values_mut() {
            if targets.remove(project).is_some() {
                removed += 1;
            }
        }
        grants.retain(|_, targets| !targets.is_empty());
        if removed == 0 {
            return Ok(0);
        }
        self.persist(grants, self.violations.clone())?;
        tracing::info!(project, removed, "cross-project grants dropped");
        Ok(removed)
    }

    pub fn grants(&self) -> Vec<CrossProjectGrant> {
        flatten(&self.grants)
    }

    pub fn grants_from(&self, source: &str) -> Vec<CrossProjectGrant> {
        self.grants()
            .into_iter()
            .filter(|g| g.source == source)
            .collect()
    }

    /// Violations involving `project` as source or target; all when `None`.
    pub fn violations(&self, project: Option<&str>) -> Vec<&IsolationViolation> {
        self.violations
            .iter()
            .filter(|v| project.is_none_or(|p| v.source == p || v.target == p))
            .collect()
    }

    /// True when `path` lies inside the project's registered state directory.
    pub fn validate_state_path(
        registry: &ProjectRegistry,
        project: &str,
        path: &Path,
    ) -> bool {
        let Some(state) = registry.get(project) else {
            return false;
        };
        normalize_path(path).starts_with(normalize_path(&state.state_dir))
    }
}
