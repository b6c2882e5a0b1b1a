//! Project registry: one sovereign record per project.
//!
//! Each project lives at `<root>/<name>/project.json`. Names beginning with
//! `_` are reserved for engine-wide documents such as `_gate_history.json`.

use crate::core::error::StewardError;
use crate::core::store::Store;
use crate::core::time;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

pub const PROJECT_FILE: &str = "project.json";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Active,
    Paused,
    Completed,
    Archived,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Active => "active",
            ProjectStatus::Paused => "paused",
            ProjectStatus::Completed => "completed",
            ProjectStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProjectStatus {
    type Err = StewardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ProjectStatus::Active),
            "paused" => Ok(ProjectStatus::Paused),
            "completed" => Ok(ProjectStatus::Completed),
            "archived" => Ok(ProjectStatus::Archived),
            other => Err(StewardError::ValidationError(format!(
                "unknown project status '{other}'"
            ))),
        }
    }
}

/// Contention tier. Ordering follows weight: `Low < Normal < High < Critical`.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl Priority {
    pub fn weight(&self) -> u8 {
        match self {
            Priority::Critical => 4,
            Priority::High => 3,
            Priority::Normal => 2,
            Priority::Low => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = StewardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" => Ok(Priority::Critical),
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            other => Err(StewardError::ValidationError(format!(
                "unknown priority '{other}' (expected critical, high, normal or low)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectEntry {
    pub name: String,
    pub status: ProjectStatus,
    pub priority: Priority,
    pub budget_total: f64,
    pub budget_used: f64,
    pub team_count: usize,
    pub current_phase: u32,
    pub started: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TeamRecord {
    pub name: String,
    pub lead: String,
    #[serde(default)]
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectState {
    pub entry: ProjectEntry,
    pub state_dir: PathBuf,
    #[serde(default)]
    pub teams: Vec<TeamRecord>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl ProjectState {
    pub fn budget_remaining(&self) -> f64 {
        (self.entry.budget_total - self.entry.budget_used).max(0.0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RegisterProject {
    pub name: String,
    pub priority: Priority,
    pub budget_total: f64,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

pub fn validate_project_name(name: &str) -> Result<(), StewardError> {
    if name.is_empty() {
        return Err(StewardError::ValidationError(
            "project name cannot be empty".to_string(),
        ));
    }
    if name.starts_with('_') {
        return Err(StewardError::ValidationError(format!(
            "project name '{name}' is reserved: names may not start with '_'"
        )));
    }
    if name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        Ok(())
    } else {
        Err(StewardError::ValidationError(format!(
            "invalid project name '{name}': allowed characters are [A-Za-z0-9_-]"
        )))
    }
}

fn project_key(name: &str) -> String {
    format!("{name}/{PROJECT_FILE}")
}

#[derive(Debug)]
pub struct ProjectRegistry {
    store: Store,
    projects: BTreeMap<String, ProjectState>,
}

impl ProjectRegistry {
    pub fn open(store: Store) -> Result<Self, StewardError> {
        let mut projects = BTreeMap::new();
        let suffix = format!("/{PROJECT_FILE}");
        for key in store.keys()? {
            let Some(name) = key.strip_suffix(&suffix) else {
                continue;
            };
            if name.contains('/') || validate_project_name(name).is_err() {
                continue;
            }
            if let Some(state) = store.load::<ProjectState>(&key)? {
                projects.insert(state.entry.name.clone(), state);
            }
        }
        Ok(Self { store, projects })
    }

    /// Apply `f` to a copy of the project, persist it, then adopt it.
    fn update<F>(&mut self, name: &str, f: F) -> Result<ProjectState, StewardError>
    where
        F: FnOnce(&mut ProjectState) -> Result<(), StewardError>,
    {
        let mut next = self
            .projects
            .get(name)
            .cloned()
            .ok_or_else(|| StewardError::NotFound(format!("project '{name}'")))?;
        f(&mut next)?;
        self.store.save(&project_key(name), &next)?;
        self.projects.insert(name.to_string(), next.clone());
        Ok(next)
    }

    pub fn register(&mut self, req: RegisterProject) -> Result<ProjectState, StewardError> {
        validate_project_name(&req.name)?;
        if self.projects.contains_key(&req.name) {
            return Err(StewardError::AlreadyExists(format!(
                "project '{}' is already registered",
                req.name
            )));
        }
        if !req.budget_total.is_finite() || req.budget_total < 0.0 {
            return Err(StewardError::ValidationError(format!(
                "budget_total must be a non-negative number, got {}",
                req.budget_total
            )));
        }
        let state = ProjectState {
            entry: ProjectEntry {
                name: req.name.clone(),
                status: ProjectStatus::Active,
                priority: req.priority,
                budget_total: req.budget_total,
                budget_used: 0.0,
                team_count: 0,
                current_phase: 1,
                started: time::now(),
            },
            state_dir: self.store.project_dir(&req.name),
            teams: Vec::new(),
            metadata: req.metadata,
        };
        self.store.save(&project_key(&req.name), &state)?;
        self.projects.insert(req.name.clone(), state.clone());
        tracing::info!(project = %req.name, priority = %req.priority, "project registered");
        Ok(state)
    }

    pub fn unregister(&mut self, name: &str) -> Result<ProjectState, StewardError> {
        if !self.projects.contains_key(name) {
            return Err(StewardError::NotFound(format!("project '{name}'")));
        }
        self.store.remove(&project_key(name))?;
        let state = self
            .projects
            .remove(name)
            .ok_or_else(|| StewardError::NotFound(format!("project '{name}'")))?;
        tracing::info!(project = %name, "project unregistered");
        Ok(state)
    }

    pub fn get(&self, name: &str) -> Option<&ProjectState> {
        self.projects.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.projects.contains_key(name)
    }

    pub fn priority_of(&self, name: &str) -> Option<Priority> {
        self.projects.get(name).map(|p| p.entry.priority)
    }

    /// Projects ordered by priority (highest first), then name.
    pub fn list(&self, status: Option<ProjectStatus>) -> Vec<&ProjectState> {
        let mut out: Vec<&ProjectState> = self
            .projects
            .values()
            .filter(|p| status.is_none_or(|s| p.entry.status == s))
            .collect();
        out.sort_by(|a, b| {
            b.entry
                .priority
                .cmp(&a.entry.priority)
                .then_with(|| a.entry.name.cmp(&b.entry.name))
        });
        out
    }

    fn transition(
        &mut self,
        name: &str,
        allowed_from: &[ProjectStatus],
        to: ProjectStatus,
        verb: &str,
    ) -> Result<ProjectState, StewardError> {
        let state = self.update(name, |state| {
            let current = state.entry.status;
            if !allowed_from.contains(&current) {
                return Err(StewardError::InvalidStateTransition(format!(
                    "cannot {verb} project '{name}' while it is {current}"
                )));
            }
            state.entry.status = to;
            Ok(())
        })?;
        tracing::info!(project = %name, status = %to, "project lifecycle changed");
        Ok(state)
    }

    pub fn pause(&mut self, name: &str) -> Result<ProjectState, StewardError> {
        self.transition(name, &[ProjectStatus::Active], ProjectStatus::Paused, "pause")
    }

    pub fn resume(&mut self, name: &str) -> Result<ProjectState, StewardError> {
        self.transition(name, &[ProjectStatus::Paused], ProjectStatus::Active, "resume")
    }

    pub fn complete(&mut self, name: &str) -> Result<ProjectState, StewardError> {
        self.transition(
            name,
            &[ProjectStatus::Active, ProjectStatus::Paused],
            ProjectStatus::Completed,
            "complete",
        )
    }

    pub fn archive(&mut self, name: &str) -> Result<ProjectState, StewardError> {
        self.transition(
            name,
            &[ProjectStatus::Completed],
            ProjectStatus::Archived,
            "archive",
        )
    }

    pub fn set_priority(
        &mut self,
        name: &str,
        priority: Priority,
    ) -> Result<ProjectState, StewardError> {
        self.update(name, |state| {
            state.entry.priority = priority;
            Ok(())
        })
    }

    /// Charge `amount` against the project's budget. Never lets usage pass
    /// the total.
    pub fn record_spend(&mut self, name: &str, amount: f64) -> Result<ProjectState, StewardError> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(StewardError::ValidationError(format!(
                "spend amount must be a non-negative number, got {amount}"
            )));
        }
        self.update(name, |state| {
            let next = state.entry.budget_used + amount;
            if next > state.entry.budget_total {
                return Err(StewardError::BudgetExceeded(format!(
                    "project '{name}' would use {next} of {} budget",
                    state.entry.budget_total
                )));
            }
            state.entry.budget_used = next;
            Ok(())
        })
    }

    pub fn add_team(&mut self, name: &str, team: TeamRecord) -> Result<ProjectState, StewardError> {
        self.update(name, |state| {
            if state.teams.iter().any(|t| t.name == team.name) {
                return Err(StewardError::AlreadyExists(format!(
                    "team '{}' in project '{name}'",
                    team.name
                )));
            }
            state.teams.push(team);
            state.entry.team_count = state.teams.len();
            Ok(())
        })
    }

    pub fn remove_team(&mut self, name: &str, team: &str) -> Result<ProjectState, StewardError> {
        self.update(name, |state| {
            let before = state.teams.len();
            state.teams.retain(|t| t.name != team);
            if state.teams.len() == before {
                return Err(StewardError::NotFound(format!(
                    "team '{team}' in project '{name}'"
                )));
            }
            state.entry.team_count = state.teams.len();
            Ok(())
        })
    }

    pub fn set_current_phase(&mut self, name: &str, phase: u32) -> Result<ProjectState, StewardError> {
        self.update(name, |state| {
            state.entry.current_phase = phase;
            Ok(())
        })
    }

    pub fn set_metadata(
        &mut self,
        name: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<ProjectState, StewardError> {
        self.update(name, |state| {
            state.metadata.insert(key.to_string(), value);
            Ok(())
        })
    }
}
