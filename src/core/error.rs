use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use thiserror::Error;

/// Machine-readable reason attached to every access-control denial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    GovernanceAsset,
    OutOfScope,
    SelfModification,
    UnauthorizedChallenger,
    CrossProject,
}

impl ViolationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationType::GovernanceAsset => "governance_asset",
            ViolationType::OutOfScope => "out_of_scope",
            ViolationType::SelfModification => "self_modification",
            ViolationType::UnauthorizedChallenger => "unauthorized_challenger",
            ViolationType::CrossProject => "cross_project",
        }
    }
}

impl fmt::Display for ViolationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ViolationType {
    type Err = StewardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "governance_asset" => Ok(ViolationType::GovernanceAsset),
            "out_of_scope" => Ok(ViolationType::OutOfScope),
            "self_modification" => Ok(ViolationType::SelfModification),
            "unauthorized_challenger" => Ok(ViolationType::UnauthorizedChallenger),
            "cross_project" => Ok(ViolationType::CrossProject),
            other => Err(StewardError::ValidationError(format!(
                "unknown violation type '{other}'"
            ))),
        }
    }
}

#[derive(Error, Debug)]
pub enum StewardError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),
    #[error("Invalid phase transition: {0}")]
    InvalidPhaseTransition(String),
    #[error("Gate '{transition}' blocks project '{project}': {}", blockers.join("; "))]
    GateBlocked {
        project: String,
        transition: String,
        blockers: Vec<String>,
    },
    #[error("Access denied ({violation_type}): {reason}")]
    AccessDenied {
        violation_type: ViolationType,
        reason: String,
    },
    #[error("Already exists: {0}")]
    AlreadyExists(String),
    #[error("Budget exceeded: {0}")]
    BudgetExceeded(String),
    #[error("Storage error: {0}")]
    StorageError(String),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl StewardError {
    /// Violation type for access denials, `None` for every other error.
    pub fn violation_type(&self) -> Option<ViolationType> {
        match self {
            StewardError::AccessDenied { violation_type, .. } => Some(*violation_type),
            _ => None,
        }
    }
}
