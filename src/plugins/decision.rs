//! Append-only decision ledger with lineage.
//!
//! One ledger per project, persisted at `<root>/<project>/decisions.json`.
//! Records are never deleted and their identity fields never change; only the
//! status and challenge fields move. Two reverse indices (supersededBy and
//! dependedOn) make forward lineage walks proportional to the number of
//! successors instead of a scan of the whole ledger.

use crate::core::error::StewardError;
use crate::core::store::Store;
use crate::core::time;
use chrono::{DateTime, Utc};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::fmt::Write as _;

pub const DECISIONS_FILE: &str = "decisions.json";
const ID_PREFIX: &str = "DEC-";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DecisionType {
    Architecture,
    Implementation,
    Process,
    Scope,
    Resource,
    Risk,
    Other,
}

impl DecisionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionType::Architecture => "architecture",
            DecisionType::Implementation => "implementation",
            DecisionType::Process => "process",
            DecisionType::Scope => "scope",
            DecisionType::Resource => "resource",
            DecisionType::Risk => "risk",
            DecisionType::Other => "other",
        }
    }
}

impl fmt::Display for DecisionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DecisionType {
    type Err = StewardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "architecture" => Ok(DecisionType::Architecture),
            "implementation" => Ok(DecisionType::Implementation),
            "process" => Ok(DecisionType::Process),
            "scope" => Ok(DecisionType::Scope),
            "resource" => Ok(DecisionType::Resource),
            "risk" => Ok(DecisionType::Risk),
            "other" => Ok(DecisionType::Other),
            other => Err(StewardError::ValidationError(format!(
                "unknown decision type '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DecisionStatus {
    Proposed,
    Accepted,
    Challenged,
    Escalated,
    Superseded,
    Rejected,
}

impl DecisionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionStatus::Proposed => "proposed",
            DecisionStatus::Accepted => "accepted",
            DecisionStatus::Challenged => "challenged",
            DecisionStatus::Escalated => "escalated",
            DecisionStatus::Superseded => "superseded",
            DecisionStatus::Rejected => "rejected",
        }
    }

    /// Statuses from which a new challenge round may be opened.
    pub fn is_challengeable(&self) -> bool {
        matches!(self, DecisionStatus::Proposed | DecisionStatus::Challenged)
    }
}

impl fmt::Display for DecisionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DecisionStatus {
    type Err = StewardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "proposed" => Ok(DecisionStatus::Proposed),
            "accepted" => Ok(DecisionStatus::Accepted),
            "challenged" => Ok(DecisionStatus::Challenged),
            "escalated" => Ok(DecisionStatus::Escalated),
            "superseded" => Ok(DecisionStatus::Superseded),
            "rejected" => Ok(DecisionStatus::Rejected),
            other => Err(StewardError::ValidationError(format!(
                "unknown decision status '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeAction {
    Accepted,
    Challenged,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChallengeRound {
    pub round: u32,
    pub challenger: String,
    pub action: ChallengeAction,
    pub rationale: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counter_proposal: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// Role of the proposing agent.
    pub author: String,
    #[serde(rename = "type")]
    pub decision_type: DecisionType,
    pub summary: String,
    pub rationale: String,
    #[serde(default)]
    pub evidence: Vec<String>,
    #[serde(default)]
    pub challenged_by: Option<String>,
    #[serde(default)]
    pub challenge_rounds: u32,
    #[serde(default)]
    pub challenge_history: Vec<ChallengeRound>,
    pub status: DecisionStatus,
    #[serde(default)]
    pub supersedes: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub phase: u32,
    pub project: String,
}

impl DecisionRecord {
    pub fn was_challenged(&self) -> bool {
        self.challenge_history
            .iter()
            .any(|r| r.action == ChallengeAction::Challenged)
    }

    fn next_round(&self) -> u32 {
        self.challenge_history
            .last()
            .map(|r| r.round + 1)
            .unwrap_or(1)
    }
}

#[derive(Debug, Clone)]
pub struct ProposeRequest {
    pub author: String,
    pub decision_type: DecisionType,
    pub summary: String,
    pub rationale: String,
    pub evidence: Vec<String>,
    pub phase: u32,
    pub supersedes: Option<String>,
    pub dependencies: Vec<String>,
}

/// Conjunctive filter; unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct DecisionQuery {
    pub author: Option<String>,
    pub decision_type: Option<DecisionType>,
    pub status: Option<DecisionStatus>,
    pub project: Option<String>,
    pub phase: Option<u32>,
    pub challenged: Option<bool>,
    pub depends_on: Option<String>,
    pub supersedes_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl DecisionQuery {
    pub fn matches(&self, d: &DecisionRecord) -> bool {
        self.author.as_ref().is_none_or(|a| &d.author == a)
            && self.decision_type.is_none_or(|t| d.decision_type == t)
            && self.status.is_none_or(|s| d.status == s)
            && self.project.as_ref().is_none_or(|p| &d.project == p)
            && self.phase.is_none_or(|p| d.phase == p)
            && self.challenged.is_none_or(|c| d.was_challenged() == c)
            && self
                .depends_on
                .as_ref()
                .is_none_or(|dep| d.dependencies.contains(dep))
            && self
                .supersedes_id
                .as_ref()
                .is_none_or(|s| d.supersedes.as_ref() == Some(s))
            && time::within(&d.timestamp, self.since.as_ref(), self.until.as_ref())
    }
}

pub fn format_id(seq: u32) -> String {
    format!("{ID_PREFIX}{seq:04}")
}

pub fn parse_id(id: &str) -> Option<u32> {
    id.strip_prefix(ID_PREFIX)?.parse().ok()
}

#[derive(Debug)]
pub struct DecisionStore {
    store: Store,
    project: String,
    records: Vec<DecisionRecord>,
    by_id: FxHashMap<String, usize>,
    superseded_by: FxHashMap<String, Vec<String>>,
    depended_on: FxHashMap<String, Vec<String>>,
    next_seq: u32,
}

impl DecisionStore {
    pub fn open(store: Store, project: &str) -> Result<Self, StewardError> {
        crate::plugins::registry::validate_project_name(project)?;
        let records: Vec<DecisionRecord> = store.load(&Self::key(project))?.unwrap_or_default();
        let mut ledger = Self {
            store,
            project: project.to_string(),
            records: Vec::new(),
            by_id: FxHashMap::default(),
            superseded_by: FxHashMap::default(),
            depended_on: FxHashMap::default(),
            next_seq: 1,
        };
        for record in records {
            ledger.index(record);
        }
        Ok(ledger)
    }

    fn key(project: &str) -> String {
        format!("{project}/{DECISIONS_FILE}")
    }

    fn index(&mut self, record: DecisionRecord) {
        if let Some(seq) = parse_id(&record.id) {
            self.next_seq = self.next_seq.max(seq.saturating_add(1));
        }
        if let Some(parent) = &record.supersedes {
            self.superseded_by
                .entry(parent.clone())
                .or_default()
                .push(record.id.clone());
        }
        for dep in &record.dependencies {
            self.depended_on
                .entry(dep.clone())
                .or_default()
                .push(record.id.clone());
        }
        self.by_id.insert(record.id.clone(), self.records.len());
        self.records.push(record);
    }

    fn persist(&self) -> Result<(), StewardError> {
        self.store.save(&Self::key(&self.project), &self.records)
    }

    /// Undo the most recent `index` after a failed write.
    fn unindex_last(&mut self, seq: u32) {
        let Some(record) = self.records.pop() else {
            return;
        };
        self.by_id.remove(&record.id);
        if let Some(parent) = &record.supersedes
            && let Some(children) = self.superseded_by.get_mut(parent)
        {
            children.retain(|c| c != &record.id);
        }
        for dep in &record.dependencies {
            if let Some(dependents) = self.depended_on.get_mut(dep) {
                dependents.retain(|c| c != &record.id);
            }
        }
        self.next_seq = seq;
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&DecisionRecord> {
        self.by_id.get(id).map(|&idx| &self.records[idx])
    }

    pub fn list(&self) -> &[DecisionRecord] {
        &self.records
    }

    fn require(&self, id: &str) -> Result<usize, StewardError> {
        self.by_id
            .get(id)
            .copied()
            .ok_or_else(|| StewardError::NotFound(format!("decision '{id}' in project '{}'", self.project)))
    }

    /// Apply `f` to a record, persist the ledger, return the updated record.
    fn mutate<F>(&mut self, id: &str, f: F) -> Result<DecisionRecord, StewardError>
    where
        F: FnOnce(&mut DecisionRecord) -> Result<(), StewardError>,
    {
        let idx = self.require(id)?;
        let mut updated = self.records[idx].clone();
        f(&mut updated)?;
        let previous = std::mem::replace(&mut self.records[idx], updated);
        if let Err(e) = self.persist() {
            self.records[idx] = previous;
            return Err(e);
        }
        Ok(self.records[idx].clone())
    }

    pub fn propose(&mut self, req: ProposeRequest) -> Result<DecisionRecord, StewardError> {
        if req.author.trim().is_empty() {
            return Err(StewardError::ValidationError(
                "decision author cannot be empty".to_string(),
            ));
        }
        if req.summary.trim().is_empty() {
            return Err(StewardError::ValidationError(
                "decision summary cannot be empty".to_string(),
            ));
        }
        if self.by_id.contains_key(&format_id(self.next_seq)) {
            return Err(StewardError::ValidationError(format!(
                "decision id space exhausted in project '{}'",
                self.project
            )));
        }
        if let Some(parent) = &req.supersedes {
            self.require(parent)?;
        }
        for dep in &req.dependencies {
            self.require(dep)?;
        }

        let record = DecisionRecord {
            id: format_id(self.next_seq),
            timestamp: time::now(),
            author: req.author,
            decision_type: req.decision_type,
            summary: req.summary,
            rationale: req.rationale,
            evidence: req.evidence,
            challenged_by: None,
            challenge_rounds: 0,
            challenge_history: Vec::new(),
            status: DecisionStatus::Proposed,
            supersedes: req.supersedes,
            dependencies: req.dependencies,
            phase: req.phase,
            project: self.project.clone(),
        };
        let seq = self.next_seq;
        self.index(record.clone());
        if let Err(e) = self.persist() {
            self.unindex_last(seq);
            return Err(e);
        }
        tracing::info!(
            project = %self.project,
            id = %record.id,
            author = %record.author,
            "decision proposed"
        );
        Ok(record)
    }

    pub fn challenge(
        &mut self,
        id: &str,
        challenger: &str,
        rationale: &str,
        counter_proposal: Option<&str>,
    ) -> Result<DecisionRecord, StewardError> {
        let record = self.mutate(id, |d| {
            if !d.status.is_challengeable() {
                return Err(StewardError::InvalidStateTransition(format!(
                    "decision {} is {} and can no longer be challenged",
                    d.id, d.status
                )));
            }
            let round = d.next_round();
            d.challenge_history.push(ChallengeRound {
                round,
                challenger: challenger.to_string(),
                action: ChallengeAction::Challenged,
                rationale: rationale.to_string(),
                counter_proposal: counter_proposal.map(str::to_string),
                timestamp: time::now(),
            });
            d.challenge_rounds += 1;
            d.challenged_by = Some(challenger.to_string());
            d.status = DecisionStatus::Challenged;
            Ok(())
        })?;
        tracing::info!(
            project = %self.project,
            id = %record.id,
            challenger,
            rounds = record.challenge_rounds,
            "decision challenged"
        );
        Ok(record)
    }

    /// Mark a decision accepted. With `accepted_by`, an `accepted` round is
    /// appended to the challenge history.
    pub fn accept(
        &mut self,
        id: &str,
        accepted_by: Option<&str>,
        rationale: Option<&str>,
    ) -> Result<DecisionRecord, StewardError> {
        let record = self.mutate(id, |d| {
            if let Some(by) = accepted_by {
                let round = d.next_round();
                d.challenge_history.push(ChallengeRound {
                    round,
                    challenger: by.to_string(),
                    action: ChallengeAction::Accepted,
                    rationale: rationale.unwrap_or_default().to_string(),
                    counter_proposal: None,
                    timestamp: time::now(),
                });
            }
            d.status = DecisionStatus::Accepted;
            Ok(())
        })?;
        tracing::info!(project = %self.project, id = %record.id, "decision accepted");
        Ok(record)
    }

    fn set_status(&mut self, id: &str, status: DecisionStatus) -> Result<DecisionRecord, StewardError> {
        let record = self.mutate(id, |d| {
            d.status = status;
            Ok(())
        })?;
        tracing::info!(project = %self.project, id = %record.id, status = %status, "decision status set");
        Ok(record)
    }

    pub fn escalate(&mut self, id: &str) -> Result<DecisionRecord, StewardError> {
        self.set_status(id, DecisionStatus::Escalated)
    }

    pub fn supersede(&mut self, id: &str) -> Result<DecisionRecord, StewardError> {
        self.set_status(id, DecisionStatus::Superseded)
    }

    pub fn reject(&mut self, id: &str) -> Result<DecisionRecord, StewardError> {
        self.set_status(id, DecisionStatus::Rejected)
    }

    pub fn query(&self, query: &DecisionQuery) -> Vec<&DecisionRecord> {
        self.records.iter().filter(|d| query.matches(d)).collect()
    }

    /// Supersession lineage from the root down to `id`.
    pub fn chain(&self, id: &str) -> Vec<&DecisionRecord> {
        let mut out = Vec::new();
        let mut seen = FxHashSet::default();
        let mut cursor = self.get(id);
        while let Some(record) = cursor {
            if !seen.insert(record.id.as_str()) {
                break;
            }
            out.push(record);
            cursor = record.supersedes.as_deref().and_then(|p| self.get(p));
        }
        out.reverse();
        out
    }

    /// Every transitive successor of `id`, breadth-first.
    pub fn forward_chain(&self, id: &str) -> Vec<&DecisionRecord> {
        let mut out = Vec::new();
        if self.get(id).is_none() {
            return out;
        }
        let mut seen: FxHashSet<&str> = FxHashSet::default();
        seen.insert(id);
        let mut queue: VecDeque<&str> = VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            for next in self.superseded_by(current) {
                if seen.insert(next.as_str()) {
                    if let Some(record) = self.get(next) {
                        out.push(record);
                    }
                    queue.push_back(next.as_str());
                }
            }
        }
        out
    }

    /// Transitive dependencies of `id` in depth-first postorder, excluding
    /// `id` itself. Each record appears once.
    pub fn dependency_graph(&self, id: &str) -> Vec<&DecisionRecord> {
        let mut out = Vec::new();
        let Some(root) = self.get(id) else {
            return out;
        };
        let mut visited: FxHashSet<&str> = FxHashSet::default();
        visited.insert(root.id.as_str());
        self.visit_dependencies(root, &mut visited, &mut out);
        out
    }

    fn visit_dependencies<'a>(
        &'a self,
        record: &'a DecisionRecord,
        visited: &mut FxHashSet<&'a str>,
        out: &mut Vec<&'a DecisionRecord>,
    ) {
        for dep in &record.dependencies {
            if !visited.insert(dep.as_str()) {
                continue;
            }
            if let Some(child) = self.get(dep) {
                self.visit_dependencies(child, visited, out);
                out.push(child);
            }
        }
    }

    pub fn superseded_by(&self, id: &str) -> &[String] {
        self.superseded_by.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn dependents(&self, id: &str) -> &[String] {
        self.depended_on.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn export_json(&self, query: &DecisionQuery) -> Result<String, StewardError> {
        Ok(serde_json::to_string_pretty(&self.query(query))?)
    }

    pub fn export_markdown(&self, query: &DecisionQuery) -> String {
        let records = self.query(query);
        let mut out = String::new();
        let _ = writeln!(out, "# Decision Log: {}\n", self.project);
        if records.is_empty() {
            out.push_str("_No decisions recorded._\n");
            return out;
        }
        for d in records {
            let _ = writeln!(out, "## {}: {}\n", d.id, d.summary);
            let _ = writeln!(out, "- **Status:** {}", d.status);
            let _ = writeln!(out, "- **Type:** {}", d.decision_type);
            let _ = writeln!(out, "- **Author:** {}", d.author);
            let _ = writeln!(out, "- **Phase:** {}", d.phase);
            let _ = writeln!(out, "- **Proposed:** {}", d.timestamp.to_rfc3339());
            if let Some(parent) = &d.supersedes {
                let _ = writeln!(out, "- **Supersedes:** {parent}");
            }
            if !d.dependencies.is_empty() {
                let _ = writeln!(out, "- **Depends on:** {}", d.dependencies.join(", "));
            }
            let _ = writeln!(out, "\n**Rationale:** {}\n", d.rationale);
            if !d.evidence.is_empty() {
                out.push_str("**Evidence:**\n\n");
                for e in &d.evidence {
                    let _ = writeln!(out, "- {e}");
                }
                out.push('\n');
            }
            if !d.challenge_history.is_empty() {
                let _ = writeln!(
                    out,
                    "### Challenge history ({} round(s) challenged)\n",
                    d.challenge_rounds
                );
                for round in &d.challenge_history {
                    let verb = match round.action {
                        ChallengeAction::Challenged => "challenged",
                        ChallengeAction::Accepted => "accepted",
                    };
                    let _ = writeln!(
                        out,
                        "{}. **{}** {} at {}: {}",
                        round.round,
                        round.challenger,
                        verb,
                        round.timestamp.to_rfc3339(),
                        round.rationale
                    );
                    if let Some(counter) = &round.counter_proposal {
                        let _ = writeln!(out, "   - Counter-proposal: {counter}");
                    }
                }
                out.push('\n');
            }
        }
        out
    }
}
