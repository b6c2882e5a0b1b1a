//! Steward: a governance control plane for multi-agent project execution.
//!
//! Agents do not follow the process because a prompt asks them to. Steward is
//! the code path every mutation goes through, and it refuses the ones that
//! break the rules.
//!
//! # Components
//!
//! - [`plugins::decision`]: append-only decision ledger with supersession and
//!   dependency lineage
//! - [`plugins::challenge`]: adversarial review; the only way a challenged
//!   decision becomes executable
//! - [`plugins::gate`]: linear phase state machine guarded by reviewer verdicts
//! - [`plugins::protection`]: write-access policy with an audit log
//! - [`plugins::registry`], [`plugins::allocator`], [`plugins::isolation`]:
//!   projects, shared capacity and cross-project boundaries
//!
//! [`subsystems::Steward`] owns one of each, built from an explicit
//! [`core::store::Store`] and [`core::config::GovernanceConfig`].
//!
//! # State layout
//!
//! ```text
//! <root>/<project>/decisions.json
//! <root>/<project>/phase.json
//! <root>/<project>/project.json
//! <root>/_gate_history.json
//! <root>/_allocations.json
//! <root>/_isolation.json
//! <root>/_audit_log.json
//! ```
//!
//! # Examples
//!
//! ```bash
//! steward project register alpha --priority high --budget 500
//! steward decision --project alpha propose --author engineer --summary "Use WAL mode"
//! steward decision --project alpha challenge DEC-0001 --challenger architect --rationale "bench it"
//! steward gate verdict --project alpha --phase 1 --gate planning_review --by architect PASS
//! steward gate advance alpha 1 2 planning_review
//! steward access check --role engineer --allow 'src/**' board.yaml
//! ```

mod cli;
pub mod core;
pub mod plugins;
pub mod subsystems;

use cli::{
    AccessCommand, Backend, Cli, Command, DecisionCommand, ExportFormat, GateCommand,
    IsolationCommand, ProjectCommand, ResourceArgs, ResourceCommand,
};
use crate::core::config;
use crate::core::error::StewardError;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::allocator::{AllocationRequest, Resources};
use crate::plugins::decision::{DecisionQuery, ProposeRequest};
use crate::plugins::gate::{GateVerdict, HistoryQuery};
use crate::plugins::protection::AuditQuery;
use crate::plugins::registry::RegisterProject;
use crate::subsystems::Steward;

use clap::Parser;
use serde::Serialize;

fn emit<T: Serialize + ?Sized>(value: &T) -> Result<(), StewardError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn open_steward(cli: &Cli) -> Result<Steward, StewardError> {
    let config = config::load_config(&cli.config_dir)?;
    let store = match cli.backend {
        Backend::Json => Store::json(&cli.root),
        Backend::Sqlite => {
            std::fs::create_dir_all(&cli.root)?;
            Store::sqlite(&cli.root)?
        }
    };
    Steward::open(store, config)
}

fn resource_request(args: ResourceArgs) -> AllocationRequest {
    AllocationRequest {
        project: args.project,
        resources: Resources {
            workers: args.workers,
            model_capacity: args.model_capacity,
            token_budget: args.token_budget,
        },
    }
}

pub fn run() -> Result<(), StewardError> {
    let cli = Cli::parse();
    let mut steward = open_steward(&cli)?;

    match cli.command {
        Command::Status => emit(&steward.status()?),
        Command::Project(p) => run_project(&mut steward, p.command),
        Command::Decision(d) => run_decision(&mut steward, &d.project, d.command),
        Command::Gate(g) => run_gate(&mut steward, g.command),
        Command::Access(a) => run_access(&mut steward, a.command),
        Command::Resource(r) => run_resource(&mut steward, r.command),
        Command::Isolation(i) => run_isolation(&mut steward, i.command),
    }
}

fn run_project(steward: &mut Steward, command: ProjectCommand) -> Result<(), StewardError> {
    let state = match command {
        ProjectCommand::Register {
            name,
            priority,
            budget,
        } => steward.registry_mut().register(RegisterProject {
            name,
            priority,
            budget_total: budget,
            metadata: Default::default(),
        })?,
        ProjectCommand::Unregister { name } => {
            steward.unregister_project(&name)?;
            return emit(&serde_json::json!({ "unregistered": name }));
        }
        ProjectCommand::Show { name } => steward
            .registry()
            .get(&name)
            .cloned()
            .ok_or_else(|| StewardError::NotFound(format!("project '{name}'")))?,
        ProjectCommand::List { status } => return emit(&steward.registry().list(status)),
        ProjectCommand::Pause { name } => steward.registry_mut().pause(&name)?,
        ProjectCommand::Resume { name } => steward.registry_mut().resume(&name)?,
        ProjectCommand::Complete { name } => steward.registry_mut().complete(&name)?,
        ProjectCommand::Archive { name } => steward.registry_mut().archive(&name)?,
        ProjectCommand::Priority { name, priority } => {
            steward.registry_mut().set_priority(&name, priority)?
        }
        ProjectCommand::Spend { name, amount } => steward.registry_mut().record_spend(&name, amount)?,
    };
    emit(&state)
}

fn run_decision(steward: &mut Steward, project: &str, command: DecisionCommand) -> Result<(), StewardError> {
    match command {
        DecisionCommand::Propose {
            author,
            decision_type,
            summary,
            rationale,
            evidence,
            phase,
            supersedes,
            dependencies,
        } => emit(&steward.decisions(project)?.propose(ProposeRequest {
            author,
            decision_type,
            summary,
            rationale,
            evidence,
            phase,
            supersedes,
            dependencies,
        })?),
        DecisionCommand::Challenge {
            id,
            challenger,
            rationale,
            counter,
        } => emit(&steward.challenge_decision(
            project,
            &id,
            &challenger,
            &rationale,
            counter.as_deref(),
        )?),
        DecisionCommand::Accept {
            id,
            challenger,
            rationale,
        } => emit(&steward.accept_decision(project, &id, &challenger, &rationale)?),
        DecisionCommand::Escalate { id } => emit(&steward.escalate_decision(project, &id)?),
        DecisionCommand::Supersede { id } => emit(&steward.decisions(project)?.supersede(&id)?),
        DecisionCommand::Reject { id } => emit(&steward.decisions(project)?.reject(&id)?),
        DecisionCommand::CanExecute { id } => emit(&steward.can_execute(project, &id)?),
        DecisionCommand::Show { id } => {
            let ledger = steward.decisions(project)?;
            let record = ledger
                .get(&id)
                .ok_or_else(|| StewardError::NotFound(format!("decision '{id}'")))?;
            emit(record)
        }
        DecisionCommand::List {
            author,
            decision_type,
            status,
            phase,
        } => emit(&steward.decisions(project)?.query(&DecisionQuery {
            author,
            decision_type,
            status,
            phase,
            ..DecisionQuery::default()
        })),
        DecisionCommand::Chain { id } => emit(&steward.decisions(project)?.chain(&id)),
        DecisionCommand::Forward { id } => emit(&steward.decisions(project)?.forward_chain(&id)),
        DecisionCommand::Deps { id } => emit(&steward.decisions(project)?.dependency_graph(&id)),
        DecisionCommand::Export { format } => {
            let ledger = steward.decisions(project)?;
            let all = DecisionQuery::default();
            match format {
                ExportFormat::Json => println!("{}", ledger.export_json(&all)?),
                ExportFormat::Markdown => print!("{}", ledger.export_markdown(&all)),
            }
            Ok(())
        }
    }
}

fn run_gate(steward: &mut Steward, command: GateCommand) -> Result<(), StewardError> {
    match command {
        GateCommand::Verdict {
            project,
            phase,
            gate,
            issued_by,
            verdict,
            blocking_issues,
            warnings,
            conditions,
            expires_in_hours,
            coverage,
            recommendation,
        } => {
            let mut v = GateVerdict::new(&project, phase, &gate, &issued_by, verdict);
            v.blocking_issues = blocking_issues;
            v.warnings = warnings;
            v.conditions = conditions;
            v.coverage = coverage;
            v.recommendation = recommendation;
            v.expires_at = expires_in_hours.map(|h| time::now() + chrono::Duration::hours(h));
            emit(&steward.record_verdict(v)?)
        }
        GateCommand::Check {
            project,
            from,
            to,
            transition,
        } => emit(&steward.gates().can_advance(&project, from, to, &transition)?),
        GateCommand::Advance {
            project,
            from,
            to,
            transition,
        } => emit(&steward.advance_phase(&project, from, to, &transition)?),
        GateCommand::Revert { project, reason } => emit(&steward.revert_phase(&project, &reason)?),
        GateCommand::SetStatus { project, status } => {
            emit(&steward.gates().set_status(&project, status)?)
        }
        GateCommand::Show { project } => emit(&steward.gates().phase_state(&project)?),
        GateCommand::History {
            project,
            phase,
            verdict,
            issued_by,
            gate,
            limit,
        } => emit(&steward.gates().query_history(&HistoryQuery {
            project,
            phase,
            verdict,
            issued_by,
            gate_id: gate,
            limit,
            ..HistoryQuery::default()
        })?),
    }
}

fn run_access(steward: &mut Steward, command: AccessCommand) -> Result<(), StewardError> {
    let protection = steward.protection_mut();
    match command {
        AccessCommand::Check {
            role,
            path,
            allowed,
        } => {
            let scope = (!allowed.is_empty()).then_some(allowed.as_slice());
            emit(&protection.check_write_access(&role, &path, scope)?)
        }
        AccessCommand::Audit {
            role,
            denied,
            violation,
            limit,
        } => emit(&protection.query_audit_log(&AuditQuery {
            agent_role: role,
            allowed: denied.then_some(false),
            violation_type: violation,
            limit,
            ..AuditQuery::default()
        })),
        AccessCommand::Summary { top } => emit(&protection.audit_summary(top)),
        AccessCommand::Export => emit(&protection.export_audit_log()?),
        AccessCommand::Clear => emit(&protection.clear_audit_log()?),
    }
}

fn run_resource(steward: &mut Steward, command: ResourceCommand) -> Result<(), StewardError> {
    match command {
        ResourceCommand::Allocate(args) => emit(&steward.allocate(resource_request(args))?),
        ResourceCommand::Force(args) => emit(&steward.force_allocate(resource_request(args))?),
        ResourceCommand::Release { project } => {
            steward.release(&project)?;
            emit(&serde_json::json!({ "released": project }))
        }
        ResourceCommand::List => emit(&steward.allocator().allocations()),
        ResourceCommand::Utilization => emit(&steward.allocator().utilization()),
    }
}

fn run_isolation(steward: &mut Steward, command: IsolationCommand) -> Result<(), StewardError> {
    match command {
        IsolationCommand::Check {
            source,
            target,
            operation,
        } => emit(&steward.check_access(&source, &target, operation)?),
        IsolationCommand::Grant {
            source,
            target,
            operations,
        } => emit(&steward.grant_access(&source, &target, &operations)?),
        IsolationCommand::Revoke {
            source,
            target,
            operations,
        } => emit(&steward.revoke_access(&source, &target, &operations)?),
        IsolationCommand::Grants { source } => match source {
            Some(source) => emit(&steward.isolation().grants_from(&source)),
            None => emit(&steward.isolation().grants()),
        },
        IsolationCommand::Violations { project } => {
            emit(&steward.isolation().violations(project.as_deref()))
        }
    }
}
