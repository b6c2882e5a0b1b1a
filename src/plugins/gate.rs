//! Phase gates.
//!
//! Projects walk a fixed linear chain of phases. Leaving a phase requires the
//! verdicts named by that phase's exit gate. A FAIL on a structural gate
//! hard-blocks the project the moment it is recorded, independent of any
//! later advance attempt.
//!
//! Per-project state lives in `<root>/<project>/phase.json`; every verdict is
//! also appended to the cross-project `<root>/_gate_history.json`.

use crate::core::config::{GovernanceConfig, PhaseDefinition, VerdictType};
use crate::core::error::StewardError;
use crate::core::store::Store;
use crate::core::time;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const PHASE_FILE: &str = "phase.json";
pub const GATE_HISTORY_KEY: &str = "_gate_history.json";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Fail,
    Conditional,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Pass => "PASS",
            Verdict::Fail => "FAIL",
            Verdict::Conditional => "CONDITIONAL",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Verdict {
    type Err = StewardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PASS" => Ok(Verdict::Pass),
            "FAIL" => Ok(Verdict::Fail),
            "CONDITIONAL" => Ok(Verdict::Conditional),
            other => Err(StewardError::ValidationError(format!(
                "unknown verdict '{other}' (expected PASS, FAIL or CONDITIONAL)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Planning,
    InProgress,
    AwaitingReview,
    AwaitingGate,
    GatedFail,
    GatedConditional,
    Complete,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseStatus::Planning => "planning",
            PhaseStatus::InProgress => "in_progress",
            PhaseStatus::AwaitingReview => "awaiting_review",
            PhaseStatus::AwaitingGate => "awaiting_gate",
            PhaseStatus::GatedFail => "gated_fail",
            PhaseStatus::GatedConditional => "gated_conditional",
            PhaseStatus::Complete => "complete",
        }
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PhaseStatus {
    type Err = StewardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            PhaseStatus::Planning,
            PhaseStatus::InProgress,
            PhaseStatus::AwaitingReview,
            PhaseStatus::AwaitingGate,
            PhaseStatus::GatedFail,
            PhaseStatus::GatedConditional,
            PhaseStatus::Complete,
        ]
        .into_iter()
        .find(|status| status.as_str() == s)
        .ok_or_else(|| StewardError::ValidationError(format!("unknown phase status '{s}'")))
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TestMetrics {
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GateVerdict {
    pub gate_id: String,
    pub verdict: Verdict,
    /// Role that issued the verdict.
    pub issued_by: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub tests: TestMetrics,
    #[serde(default)]
    pub coverage: Option<f64>,
    #[serde(default)]
    pub blocking_issues: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub conditions: Vec<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recommendation: String,
    pub project: String,
    pub phase: u32,
}

impl GateVerdict {
    /// A verdict stamped now with empty metrics.
    pub fn new(project: &str, phase: u32, gate_id: &str, issued_by: &str, verdict: Verdict) -> Self {
        Self {
            gate_id: gate_id.to_string(),
            verdict,
            issued_by: issued_by.to_string(),
            timestamp: time::now(),
            tests: TestMetrics::default(),
            coverage: None,
            blocking_issues: Vec::new(),
            warnings: Vec::new(),
            conditions: Vec::new(),
            expires_at: None,
            recommendation: String::new(),
            project: project.to_string(),
            phase,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseState {
    pub project: String,
    pub current_phase: u32,
    pub phase_name: String,
    pub status: PhaseStatus,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub gate_verdicts: Vec<GateVerdict>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct AdvanceCheck {
    pub allowed: bool,
    pub blockers: Vec<String>,
    pub conditions: Vec<String>,
    pub warnings: Vec<String>,
    /// At least one consulted verdict was a live CONDITIONAL.
    pub conditional: bool,
}

#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    pub project: Option<String>,
    pub phase: Option<u32>,
    pub verdict: Option<Verdict>,
    pub issued_by: Option<String>,
    pub gate_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl HistoryQuery {
    fn matches(&self, v: &GateVerdict) -> bool {
        self.project.as_ref().is_none_or(|p| &v.project == p)
            && self.phase.is_none_or(|p| v.phase == p)
            && self.verdict.is_none_or(|x| v.verdict == x)
            && self.issued_by.as_ref().is_none_or(|i| &v.issued_by == i)
            && self.gate_id.as_ref().is_none_or(|g| &v.gate_id == g)
            && time::within(&v.timestamp, self.since.as_ref(), self.until.as_ref())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct GateHistory {
    #[serde(default)]
    verdicts: Vec<GateVerdict>,
}

fn phase_key(project: &str) -> String {
    format!("{project}/{PHASE_FILE}")
}

#[derive(Debug)]
pub struct GateEnforcement {
    store: Store,
    config: GovernanceConfig,
}

impl GateEnforcement {
    pub fn new(store: Store, config: GovernanceConfig) -> Self {
        Self { store, config }
    }

    pub fn phases(&self) -> &[PhaseDefinition] {
        &self.config.phases
    }

    fn phase_name(&self, number: u32) -> String {
        self.config
            .phase(number)
            .map(|p| p.name.clone())
            .unwrap_or_else(|| format!("phase-{number}"))
    }

    pub fn phase_state(&self, project: &str) -> Result<Option<PhaseState>, StewardError> {
        crate::plugins::registry::validate_project_name(project)?;
        self.store.load(&phase_key(project))
    }

    fn load_or_init(&self, project: &str) -> Result<PhaseState, StewardError> {
        if let Some(state) = self.phase_state(project)? {
            return Ok(state);
        }
        let now = time::now();
        Ok(PhaseState {
            project: project.to_string(),
            current_phase: 1,
            phase_name: self.phase_name(1),
            status: PhaseStatus::Planning,
            started_at: now,
            updated_at: now,
            gate_verdicts: Vec::new(),
        })
    }

    fn save(&self, state: &PhaseState) -> Result<(), StewardError> {
        self.store.save(&phase_key(&state.project), state)
    }

    pub fn can_advance(
        &self,
        project: &str,
        from_phase: u32,
        to_phase: u32,
        transition: &str,
    ) -> Result<AdvanceCheck, StewardError> {
        let state = self.load_or_init(project)?;
        Ok(self.evaluate(&state, from_phase, to_phase, transition, &time::now()))
    }

    fn evaluate(
        &self,
        state: &PhaseState,
        from_phase: u32,
        _to_phase: u32,
        transition: &str,
        now: &DateTime<Utc>,
    ) -> AdvanceCheck {
        let Some(gate) = self.config.gate(transition) else {
            return AdvanceCheck {
                allowed: true,
                ..AdvanceCheck::default()
            };
        };

        let mut check = AdvanceCheck::default();
        for role in &gate.required {
            let latest = state
                .gate_verdicts
                .iter()
                .rev()
                .find(|v| &v.issued_by == role && v.phase == from_phase);
            let Some(v) = latest else {
                check.blockers.push(format!("Missing verdict from {role}"));
                continue;
            };
            match v.verdict {
                Verdict::Pass => check.warnings.extend(v.warnings.iter().cloned()),
                Verdict::Fail => {
                    let issues = if v.blocking_issues.is_empty() {
                        "no blocking issues listed".to_string()
                    } else {
                        v.blocking_issues.join("; ")
                    };
                    check.blockers.push(format!("FAIL from {role}: {issues}"));
                }
                Verdict::Conditional => {
                    if time::is_expired(v.expires_at.as_ref(), now) {
                        check
                            .blockers
                            .push(format!("CONDITIONAL verdict from {role} has expired"));
                    } else {
                        check.conditional = true;
                        check.conditions.extend(v.conditions.iter().cloned());
                        check.warnings.extend(v.warnings.iter().cloned());
                    }
                }
            }
        }
        check.allowed = check.blockers.is_empty();
        check
    }

    pub fn record_verdict(&self, verdict: GateVerdict) -> Result<PhaseState, StewardError> {
        let mut state = self.load_or_init(&verdict.project)?;
        let structural_fail = verdict.verdict == Verdict::Fail
            && self
                .config
                .gate(&verdict.gate_id)
                .is_some_and(|g| g.verdict_type == VerdictType::Structural);

        let mut history: GateHistory = self.store.load(GATE_HISTORY_KEY)?.unwrap_or_default();
        history.verdicts.push(verdict.clone());

        state.gate_verdicts.push(verdict.clone());
        state.updated_at = time::now();
        if structural_fail {
            state.status = PhaseStatus::GatedFail;
        }

        // Global log first: a verdict in phase.json is always in the history.
        self.store.save(GATE_HISTORY_KEY, &history)?;
        self.save(&state)?;

        if structural_fail {
            tracing::warn!(
                project = %verdict.project,
                gate = %verdict.gate_id,
                issued_by = %verdict.issued_by,
                "structural gate failed, project blocked"
            );
        } else {
            tracing::info!(
                project = %verdict.project,
                gate = %verdict.gate_id,
                verdict = %verdict.verdict,
                issued_by = %verdict.issued_by,
                "gate verdict recorded"
            );
        }
        Ok(state)
    }

    pub fn advance_phase(
        &self,
        project: &str,
        from_phase: u32,
        to_phase: u32,
        transition: &str,
    ) -> Result<PhaseState, StewardError> {
        let mut state = self.load_or_init(project)?;

        if from_phase != state.current_phase {
            return Err(StewardError::InvalidPhaseTransition(format!(
                "project '{project}' is in phase {} ({}), not phase {from_phase}",
                state.current_phase, state.phase_name
            )));
        }
        let current = self.config.phase(from_phase).ok_or_else(|| {
            StewardError::InvalidPhaseTransition(format!("phase {from_phase} is not configured"))
        })?;
        match &current.exit_gate {
            None => {
                return Err(StewardError::InvalidPhaseTransition(format!(
                    "phase '{}' is terminal and has no exit gate",
                    current.name
                )));
            }
            Some(gate) if gate != transition => {
                return Err(StewardError::InvalidPhaseTransition(format!(
                    "phase '{}' exits through gate '{gate}', not '{transition}'",
                    current.name
                )));
            }
            Some(_) => {}
        }
        if to_phase != from_phase + 1 {
            let kind = if to_phase <= from_phase {
                "rollback"
            } else {
                "phase skip"
            };
            return Err(StewardError::InvalidPhaseTransition(format!(
                "{kind} from phase {from_phase} to {to_phase} is not allowed; phases advance one at a time"
            )));
        }
        if self.config.phase(to_phase).is_none() {
            return Err(StewardError::InvalidPhaseTransition(format!(
                "phase {to_phase} is not configured"
            )));
        }

        let check = self.evaluate(&state, from_phase, to_phase, transition, &time::now());
        if !check.allowed {
            tracing::warn!(project, transition, blockers = ?check.blockers, "phase advance blocked");
            return Err(StewardError::GateBlocked {
                project: project.to_string(),
                transition: transition.to_string(),
                blockers: check.blockers,
            });
        }

        state.current_phase = to_phase;
        state.phase_name = self.phase_name(to_phase);
        state.status = if check.conditional {
            PhaseStatus::GatedConditional
        } else {
            PhaseStatus::Planning
        };
        state.updated_at = time::now();
        self.save(&state)?;
        tracing::info!(project, phase = to_phase, name = %state.phase_name, status = %state.status, "phase advanced");
        Ok(state)
    }

    /// Out-of-band failure marker: step back one phase and hard-block.
    pub fn revert_phase(&self, project: &str, reason: &str) -> Result<PhaseState, StewardError> {
        let mut state = self
            .phase_state(project)?
            .ok_or_else(|| StewardError::NotFound(format!("phase state for project '{project}'")))?;
        state.current_phase = state.current_phase.saturating_sub(1).max(1);
        state.phase_name = self.phase_name(state.current_phase);
        state.status = PhaseStatus::GatedFail;
        state.updated_at = time::now();
        self.save(&state)?;
        tracing::warn!(project, phase = state.current_phase, reason, "phase reverted");
        Ok(state)
    }

    /// Work-progress status updates. Gate-driven statuses are owned by
    /// verdicts and advances, so they cannot be set or cleared here.
    pub fn set_status(&self, project: &str, status: PhaseStatus) -> Result<PhaseState, StewardError> {
        let mut state = self.load_or_init(project)?;
        if matches!(status, PhaseStatus::GatedFail | PhaseStatus::GatedConditional) {
            return Err(StewardError::InvalidStateTransition(format!(
                "status '{status}' is set by gate verdicts, not directly"
            )));
        }
        if state.status == PhaseStatus::GatedFail {
            return Err(StewardError::InvalidStateTransition(format!(
                "project '{project}' is gated_fail; only a passing gate advance clears it"
            )));
        }
        if status == PhaseStatus::Complete && state.current_phase != self.config.final_phase() {
            return Err(StewardError::InvalidStateTransition(format!(
                "project '{project}' can only complete in the final phase"
            )));
        }
        state.status = status;
        state.updated_at = time::now();
        self.save(&state)?;
        Ok(state)
    }

    /// Global verdict log filtered by `query`, newest first.
    pub fn query_history(&self, query: &HistoryQuery) -> Result<Vec<GateVerdict>, StewardError> {
        let history: GateHistory = self.store.load(GATE_HISTORY_KEY)?.unwrap_or_default();
        let mut out: Vec<GateVerdict> = history
            .verdicts
            .into_iter()
            .rev()
            .filter(|v| query.matches(v))
            .collect();
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = query.limit {
            out.truncate(limit);
        }
        Ok(out)
    }
}
