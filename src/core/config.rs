//! Governance configuration.
//!
//! The engine trusts this object: gates, phases, challenge limits, protected
//! assets and the shared resource pool. It is read from `steward.toml`; a
//! missing file means "all defaults".

use crate::core::error::StewardError;
use crate::core::glob;
use crate::plugins::allocator::Resources;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "steward.toml";

/// One stage of the linear project lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PhaseDefinition {
    pub number: u32,
    pub name: String,
    #[serde(default)]
    pub exit_gate: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum VerdictType {
    /// A FAIL immediately hard-blocks the project.
    #[default]
    Structural,
    /// A FAIL blocks advancement but leaves the project status alone.
    Advisory,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GateDefinition {
    pub required: Vec<String>,
    #[serde(default)]
    pub verdict_type: VerdictType,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoleConfig {
    /// Roles whose decisions this role may challenge.
    #[serde(default)]
    pub challenges: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DefaultAction {
    #[default]
    Escalate,
    Accept,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChallengeLimits {
    pub max_rounds: u32,
    pub auto_escalation: bool,
    pub default_action: DefaultAction,
}

impl Default for ChallengeLimits {
    fn default() -> Self {
        Self {
            max_rounds: 3,
            auto_escalation: true,
            default_action: DefaultAction::Escalate,
        }
    }
}

/// Whether agents may edit their own role definitions and prompts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SelfModificationPolicy {
    pub allowed: bool,
    pub paths: Vec<String>,
}

impl Default for SelfModificationPolicy {
    fn default() -> Self {
        Self {
            allowed: false,
            paths: vec!["agents/*.toml".to_string(), "agents/**/prompts/**".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GovernanceConfig {
    /// Directory every agent write is resolved against.
    pub project_base: PathBuf,
    pub phases: Vec<PhaseDefinition>,
    pub gates: BTreeMap<String, GateDefinition>,
    pub roles: BTreeMap<String, RoleConfig>,
    pub protected_assets: Vec<String>,
    pub self_modification: SelfModificationPolicy,
    pub challenge: ChallengeLimits,
    pub resources: Resources,
}

fn phase(number: u32, name: &str, exit_gate: Option<&str>) -> PhaseDefinition {
    PhaseDefinition {
        number,
        name: name.to_string(),
        exit_gate: exit_gate.map(str::to_string),
    }
}

fn gate(required: &[&str], verdict_type: VerdictType) -> GateDefinition {
    GateDefinition {
        required: required.iter().map(|r| r.to_string()).collect(),
        verdict_type,
    }
}

fn role(challenges: &[&str]) -> RoleConfig {
    RoleConfig {
        challenges: challenges.iter().map(|r| r.to_string()).collect(),
    }
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            project_base: PathBuf::from("."),
            phases: default_phases(),
            gates: BTreeMap::from([
                (
                    "planning_review".to_string(),
                    gate(&["architect"], VerdictType::Structural),
                ),
                (
                    "architecture_review".to_string(),
                    gate(&["reviewer"], VerdictType::Structural),
                ),
                (
                    "implementation_review".to_string(),
                    gate(&["qa", "reviewer"], VerdictType::Structural),
                ),
                (
                    "integration_review".to_string(),
                    gate(&["qa"], VerdictType::Structural),
                ),
            ]),
            roles: BTreeMap::from([
                ("reviewer".to_string(), role(&["architect"])),
                ("architect".to_string(), role(&["engineer"])),
                ("qa".to_string(), role(&["engineer"])),
            ]),
            protected_assets: vec![
                "board.yaml".to_string(),
                CONFIG_FILE_NAME.to_string(),
                "governance/**".to_string(),
                ".steward/**".to_string(),
                "**/gates.yaml".to_string(),
            ],
            self_modification: SelfModificationPolicy::default(),
            challenge: ChallengeLimits::default(),
            resources: Resources {
                workers: 8,
                model_capacity: 4,
                token_budget: 1_000_000,
            },
        }
    }
}

pub fn default_phases() -> Vec<PhaseDefinition> {
    vec![
        phase(1, "planning", Some("planning_review")),
        phase(2, "architecture", Some("architecture_review")),
        phase(3, "implementation", Some("implementation_review")),
        phase(4, "integration", Some("integration_review")),
        phase(5, "delivery", None),
    ]
}

impl GovernanceConfig {
    pub fn phase(&self, number: u32) -> Option<&PhaseDefinition> {
        self.phases.iter().find(|p| p.number == number)
    }

    pub fn gate(&self, transition: &str) -> Option<&GateDefinition> {
        self.gates.get(transition)
    }

    pub fn final_phase(&self) -> u32 {
        self.phases.iter().map(|p| p.number).max().unwrap_or(1)
    }

    /// Structural sanity checks. Gate names referenced by phases but absent
    /// from `gates` are fine: an unregistered gate never blocks.
    pub fn validate(&self) -> Result<(), StewardError> {
        if self.phases.is_empty() {
            return Err(StewardError::ValidationError(
                "at least one phase must be configured".to_string(),
            ));
        }
        let mut names = BTreeSet::new();
        for (idx, p) in self.phases.iter().enumerate() {
            let expected = idx as u32 + 1;
            if p.number != expected {
                return Err(StewardError::ValidationError(format!(
                    "phase '{}' has number {}, expected {} (phases must be numbered 1..n in order)",
                    p.name, p.number, expected
                )));
            }
            if !names.insert(p.name.as_str()) {
                return Err(StewardError::ValidationError(format!(
                    "duplicate phase name '{}'",
                    p.name
                )));
            }
        }
        for (name, def) in &self.gates {
            if def.required.is_empty() {
                return Err(StewardError::ValidationError(format!(
                    "gate '{name}' requires no roles"
                )));
            }
        }
        if self.challenge.max_rounds == 0 {
            return Err(StewardError::ValidationError(
                "challenge.max_rounds must be at least 1".to_string(),
            ));
        }
        glob::compile_all(&self.protected_assets)?;
        glob::compile_all(&self.self_modification.paths)?;
        Ok(())
    }
}

/// Load `steward.toml` from `dir`. No file means defaults.
pub fn load_config(dir: &Path) -> Result<GovernanceConfig, StewardError> {
    let path = dir.join(CONFIG_FILE_NAME);
    if !path.exists() {
        return Ok(GovernanceConfig::default());
    }
    let content = fs::read_to_string(&path)?;
    let config: GovernanceConfig = toml::from_str(&content)
        .map_err(|e| StewardError::ValidationError(format!("{}: {e}", path.display())))?;
    config.validate()?;
    Ok(config)
}
