//! CLI struct definitions for the `steward` command-line interface.
//!
//! All clap-derived types live here. Dispatch lives in `lib.rs`.

use crate::core::error::ViolationType;
use crate::plugins::decision::{DecisionStatus, DecisionType};
use crate::plugins::gate::{PhaseStatus, Verdict};
use crate::plugins::isolation::Operation;
use crate::plugins::registry::{Priority, ProjectStatus};

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "steward",
    version = env!("CARGO_PKG_VERSION"),
    about = "Governance control plane for multi-agent project execution"
)]
pub(crate) struct Cli {
    /// State root holding every governance document.
    #[clap(long, global = true, default_value = ".steward")]
    pub root: PathBuf,
    /// Directory containing `steward.toml` (defaults apply when absent).
    #[clap(long, global = true, default_value = ".")]
    pub config_dir: PathBuf,
    /// Persistence backend.
    #[clap(long, global = true, value_enum, default_value_t = Backend::Json)]
    pub backend: Backend,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Backend {
    Json,
    Sqlite,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ExportFormat {
    Json,
    Markdown,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Show the state root, backend and which documents exist
    Status,

    /// Register and manage projects
    #[clap(name = "project", visible_alias = "p")]
    Project(ProjectCli),

    /// Decision ledger and challenge protocol
    #[clap(name = "decision", visible_alias = "d")]
    Decision(DecisionCli),

    /// Phase gates and verdicts
    #[clap(name = "gate", visible_alias = "g")]
    Gate(GateCli),

    /// Write-access policy and audit log
    #[clap(name = "access", visible_alias = "a")]
    Access(AccessCli),

    /// Shared resource pool
    #[clap(name = "resource", visible_alias = "r")]
    Resource(ResourceCli),

    /// Cross-project isolation grants and violations
    #[clap(name = "isolation", visible_alias = "i")]
    Isolation(IsolationCli),
}

// ===== project =====

#[derive(clap::Args, Debug)]
pub(crate) struct ProjectCli {
    #[clap(subcommand)]
    pub command: ProjectCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum ProjectCommand {
    Register {
        name: String,
        #[clap(long, default_value = "normal")]
        priority: Priority,
        #[clap(long, default_value_t = 0.0)]
        budget: f64,
    },
    Unregister {
        name: String,
    },
    Show {
        name: String,
    },
    List {
        #[clap(long)]
        status: Option<ProjectStatus>,
    },
    Pause {
        name: String,
    },
    Resume {
        name: String,
    },
    Complete {
        name: String,
    },
    Archive {
        name: String,
    },
    Priority {
        name: String,
        priority: Priority,
    },
    /// Record budget spend against a project
    Spend {
        name: String,
        amount: f64,
    },
}

// ===== decision =====

#[derive(clap::Args, Debug)]
pub(crate) struct DecisionCli {
    /// Project whose ledger to use.
    #[clap(long)]
    pub project: String,
    #[clap(subcommand)]
    pub command: DecisionCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum DecisionCommand {
    Propose {
        /// Role of the proposing agent.
        #[clap(long)]
        author: String,
        #[clap(long = "type", default_value = "other")]
        decision_type: DecisionType,
        #[clap(long)]
        summary: String,
        #[clap(long, default_value = "")]
        rationale: String,
        #[clap(long)]
        evidence: Vec<String>,
        #[clap(long, default_value_t = 1)]
        phase: u32,
        #[clap(long)]
        supersedes: Option<String>,
        #[clap(long = "depends-on")]
        dependencies: Vec<String>,
    },
    Challenge {
        id: String,
        #[clap(long)]
        challenger: String,
        #[clap(long)]
        rationale: String,
        #[clap(long)]
        counter: Option<String>,
    },
    Accept {
        id: String,
        #[clap(long)]
        challenger: String,
        #[clap(long, default_value = "")]
        rationale: String,
    },
    Escalate {
        id: String,
    },
    Supersede {
        id: String,
    },
    Reject {
        id: String,
    },
    Show {
        id: String,
    },
    /// Whether the decision may be acted upon
    CanExecute {
        id: String,
    },
    List {
        #[clap(long)]
        author: Option<String>,
        #[clap(long = "type")]
        decision_type: Option<DecisionType>,
        #[clap(long)]
        status: Option<DecisionStatus>,
        #[clap(long)]
        phase: Option<u32>,
    },
    /// Supersession lineage, root first
    Chain {
        id: String,
    },
    /// Every transitive successor
    Forward {
        id: String,
    },
    /// Transitive dependencies, postorder
    Deps {
        id: String,
    },
    Export {
        #[clap(long, value_enum, default_value_t = ExportFormat::Json)]
        format: ExportFormat,
    },
}

// ===== gate =====

#[derive(clap::Args, Debug)]
pub(crate) struct GateCli {
    #[clap(subcommand)]
    pub command: GateCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum GateCommand {
    /// Record a gate verdict
    Verdict {
        #[clap(long)]
        project: String,
        #[clap(long)]
        phase: u32,
        #[clap(long)]
        gate: String,
        #[clap(long = "by")]
        issued_by: String,
        verdict: Verdict,
        #[clap(long = "issue")]
        blocking_issues: Vec<String>,
        #[clap(long = "warning")]
        warnings: Vec<String>,
        #[clap(long = "condition")]
        conditions: Vec<String>,
        /// Hours until a CONDITIONAL verdict lapses.
        #[clap(long)]
        expires_in_hours: Option<i64>,
        #[clap(long)]
        coverage: Option<f64>,
        #[clap(long, default_value = "")]
        recommendation: String,
    },
    /// Evaluate a transition without changing anything
    Check {
        project: String,
        from: u32,
        to: u32,
        transition: String,
    },
    Advance {
        project: String,
        from: u32,
        to: u32,
        transition: String,
    },
    Revert {
        project: String,
        #[clap(long)]
        reason: String,
    },
    SetStatus {
        project: String,
        status: PhaseStatus,
    },
    Show {
        project: String,
    },
    History {
        #[clap(long)]
        project: Option<String>,
        #[clap(long)]
        phase: Option<u32>,
        #[clap(long)]
        verdict: Option<Verdict>,
        #[clap(long = "by")]
        issued_by: Option<String>,
        #[clap(long)]
        gate: Option<String>,
        #[clap(long)]
        limit: Option<usize>,
    },
}

// ===== access =====

#[derive(clap::Args, Debug)]
pub(crate) struct AccessCli {
    #[clap(subcommand)]
    pub command: AccessCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum AccessCommand {
    /// Check whether a role may write a path
    Check {
        #[clap(long)]
        role: String,
        path: String,
        /// Glob patterns the role is scoped to; repeatable.
        #[clap(long = "allow")]
        allowed: Vec<String>,
    },
    Audit {
        #[clap(long)]
        role: Option<String>,
        #[clap(long)]
        denied: bool,
        #[clap(long)]
        violation: Option<ViolationType>,
        #[clap(long)]
        limit: Option<usize>,
    },
    Summary {
        #[clap(long, default_value_t = 10)]
        top: usize,
    },
    Export,
    /// Export then empty the audit log
    Clear,
}

// ===== resource =====

#[derive(clap::Args, Debug)]
pub(crate) struct ResourceCli {
    #[clap(subcommand)]
    pub command: ResourceCommand,
}

#[derive(clap::Args, Debug, Clone)]
pub(crate) struct ResourceArgs {
    pub project: String,
    #[clap(long, default_value_t = 0)]
    pub workers: u64,
    #[clap(long, default_value_t = 0)]
    pub model_capacity: u64,
    #[clap(long, default_value_t = 0)]
    pub token_budget: u64,
}

#[derive(Subcommand, Debug)]
pub(crate) enum ResourceCommand {
    Allocate(ResourceArgs),
    /// Allocate regardless of priority or pool size
    Force(ResourceArgs),
    Release {
        project: String,
    },
    List,
    Utilization,
}

// ===== isolation =====

#[derive(clap::Args, Debug)]
pub(crate) struct IsolationCli {
    #[clap(subcommand)]
    pub command: IsolationCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum IsolationCommand {
    Check {
        source: String,
        target: String,
        operation: Operation,
    },
    Grant {
        source: String,
        target: String,
        #[clap(required = true)]
        operations: Vec<Operation>,
    },
    Revoke {
        source: String,
        target: String,
        #[clap(required = true)]
        operations: Vec<Operation>,
    },
    Grants {
        #[clap(long)]
        source: Option<String>,
    },
    Violations {
        #[clap(long)]
        project: Option<String>,
    },
}
