use chrono::Duration;
use steward::core::config::{GateDefinition, GovernanceConfig, VerdictType};
use steward::core::error::StewardError;
use steward::core::store::Store;
use steward::core::time;
use steward::plugins::gate::{GateEnforcement, GateVerdict, HistoryQuery, PhaseStatus, Verdict};
use tempfile::tempdir;

fn test_gates(config: GovernanceConfig) -> (tempfile::TempDir, GateEnforcement) {
    let tmp = tempdir().unwrap();
    let gates = GateEnforcement::new(Store::json(tmp.path()), config);
    (tmp, gates)
}

fn verdict(project: &str, phase: u32, gate: &str, by: &str, v: Verdict) -> GateVerdict {
    GateVerdict::new(project, phase, gate, by, v)
}

/// Walk a project from phase 1 up to `target` with passing verdicts.
fn walk_to(gates: &GateEnforcement, config: &GovernanceConfig, project: &str, target: u32) {
    for phase in 1..target {
        let gate_name = config.phase(phase).unwrap().exit_gate.clone().unwrap();
        for role in &config.gate(&gate_name).unwrap().required {
            gates
                .record_verdict(verdict(project, phase, &gate_name, role, Verdict::Pass))
                .unwrap();
        }
        gates.advance_phase(project, phase, phase + 1, &gate_name).unwrap();
    }
}

#[test]
fn test_missing_required_verdict_blocks() {
    let (_tmp, gates) = test_gates(GovernanceConfig::default());
    gates
        .record_verdict(verdict("alpha", 3, "implementation_review", "reviewer", Verdict::Pass))
        .unwrap();
    let check = gates
        .can_advance("alpha", 3, 4, "implementation_review")
        .unwrap();
    assert!(!check.allowed);
    assert_eq!(check.blockers, vec!["Missing verdict from qa".to_string()]);
}

#[test]
fn test_unregistered_transition_is_allowed() {
    let (_tmp, gates) = test_gates(GovernanceConfig::default());
    let check = gates.can_advance("alpha", 1, 2, "no_such_gate").unwrap();
    assert!(check.allowed);
    assert!(check.blockers.is_empty());
}

#[test]
fn test_latest_verdict_per_role_wins() {
    let (_tmp, gates) = test_gates(GovernanceConfig::default());
    let mut fail = verdict("alpha", 1, "planning_review", "architect", Verdict::Fail);
    fail.blocking_issues = vec!["no threat model".to_string()];
    gates.record_verdict(fail).unwrap();
    let check = gates.can_advance("alpha", 1, 2, "planning_review").unwrap();
    assert!(!check.allowed);
    assert!(check.blockers[0].contains("no threat model"));

    gates
        .record_verdict(verdict("alpha", 1, "planning_review", "architect", Verdict::Pass))
        .unwrap();
    assert!(gates.can_advance("alpha", 1, 2, "planning_review").unwrap().allowed);
}

#[test]
fn test_structural_fail_sets_gated_fail_immediately() {
    let (_tmp, gates) = test_gates(GovernanceConfig::default());
    gates
        .record_verdict(verdict("alpha", 1, "planning_review", "architect", Verdict::Pass))
        .unwrap();
    let state = gates
        .record_verdict(verdict("alpha", 1, "planning_review", "architect", Verdict::Fail))
        .unwrap();
    assert_eq!(state.status, PhaseStatus::GatedFail);
    assert_eq!(
        gates.phase_state("alpha").unwrap().unwrap().status,
        PhaseStatus::GatedFail
    );
    assert_eq!(state.gate_verdicts.len(), 2);
}

#[test]
fn test_advisory_fail_leaves_status_alone() {
    let mut config = GovernanceConfig::default();
    config.gates.insert(
        "planning_review".to_string(),
        GateDefinition {
            required: vec!["architect".to_string()],
            verdict_type: VerdictType::Advisory,
        },
    );
    let (_tmp, gates) = test_gates(config);
    let state = gates
        .record_verdict(verdict("alpha", 1, "planning_review", "architect", Verdict::Fail))
        .unwrap();
    assert_eq!(state.status, PhaseStatus::Planning);
    assert!(!gates.can_advance("alpha", 1, 2, "planning_review").unwrap().allowed);
}

#[test]
fn test_phase_skip_rejected_regardless_of_verdicts() {
    let (_tmp, gates) = test_gates(GovernanceConfig::default());
    gates
        .record_verdict(verdict("alpha", 1, "planning_review", "architect", Verdict::Pass))
        .unwrap();
    let err = gates.advance_phase("alpha", 1, 3, "planning_review").unwrap_err();
    assert!(matches!(err, StewardError::InvalidPhaseTransition(_)));
    let err = gates.advance_phase("alpha", 1, 1, "planning_review").unwrap_err();
    assert!(matches!(err, StewardError::InvalidPhaseTransition(_)));
}

#[test]
fn test_advance_checks_sequencing_before_verdicts() {
    let (_tmp, gates) = test_gates(GovernanceConfig::default());
    let err = gates.advance_phase("alpha", 2, 3, "architecture_review").unwrap_err();
    assert!(matches!(err, StewardError::InvalidPhaseTransition(_)));
    let err = gates.advance_phase("alpha", 1, 2, "architecture_review").unwrap_err();
    assert!(matches!(err, StewardError::InvalidPhaseTransition(_)));

    let err = gates.advance_phase("alpha", 1, 2, "planning_review").unwrap_err();
    match err {
        StewardError::GateBlocked { blockers, .. } => {
            assert_eq!(blockers, vec!["Missing verdict from architect".to_string()]);
        }
        other => panic!("expected GateBlocked, got {other:?}"),
    }
}

#[test]
fn test_successful_advance_resets_status() {
    let config = GovernanceConfig::default();
    let (_tmp, gates) = test_gates(config.clone());
    gates
        .record_verdict(verdict("alpha", 1, "planning_review", "architect", Verdict::Pass))
        .unwrap();
    let state = gates.advance_phase("alpha", 1, 2, "planning_review").unwrap();
    assert_eq!(state.current_phase, 2);
    assert_eq!(state.phase_name, "architecture");
    assert_eq!(state.status, PhaseStatus::Planning);

    walk_to(&gates, &config, "beta", 5);
    let beta = gates.phase_state("beta").unwrap().unwrap();
    assert_eq!(beta.current_phase, 5);
    let err = gates.advance_phase("beta", 5, 6, "delivery_review").unwrap_err();
    assert!(matches!(err, StewardError::InvalidPhaseTransition(_)));
}

#[test]
fn test_conditional_verdict_is_soft_pass_until_expiry() {
    let (_tmp, gates) = test_gates(GovernanceConfig::default());
    let mut v = verdict("alpha", 1, "planning_review", "architect", Verdict::Conditional);
    v.conditions = vec!["add rollback plan".to_string()];
    v.expires_at = Some(time::now() + Duration::hours(4));
    gates.record_verdict(v).unwrap();

    let check = gates.can_advance("alpha", 1, 2, "planning_review").unwrap();
    assert!(check.allowed);
    assert!(check.conditional);
    assert_eq!(check.conditions, vec!["add rollback plan".to_string()]);

    let state = gates.advance_phase("alpha", 1, 2, "planning_review").unwrap();
    assert_eq!(state.status, PhaseStatus::GatedConditional);

    let mut expired = verdict("beta", 1, "planning_review", "architect", Verdict::Conditional);
    expired.expires_at = Some(time::now() - Duration::minutes(1));
    gates.record_verdict(expired).unwrap();
    let check = gates.can_advance("beta", 1, 2, "planning_review").unwrap();
    assert!(!check.allowed);
    assert!(check.blockers[0].contains("expired"));
}

#[test]
fn test_revert_phase_marks_gated_fail() {
    let config = GovernanceConfig::default();
    let (_tmp, gates) = test_gates(config.clone());
    walk_to(&gates, &config, "alpha", 3);
    let state = gates.revert_phase("alpha", "integration broke main").unwrap();
    assert_eq!(state.current_phase, 2);
    assert_eq!(state.status, PhaseStatus::GatedFail);

    walk_to(&gates, &config, "beta", 1);
    gates.set_status("beta", PhaseStatus::InProgress).unwrap();
    let state = gates.revert_phase("beta", "bad start").unwrap();
    assert_eq!(state.current_phase, 1);

    assert!(matches!(
        gates.revert_phase("ghost", "x"),
        Err(StewardError::NotFound(_))
    ));
}

#[test]
fn test_set_status_rules() {
    let config = GovernanceConfig::default();
    let (_tmp, gates) = test_gates(config.clone());
    let state = gates.set_status("alpha", PhaseStatus::InProgress).unwrap();
    assert_eq!(state.status, PhaseStatus::InProgress);

    assert!(gates.set_status("alpha", PhaseStatus::GatedFail).is_err());
    assert!(gates.set_status("alpha", PhaseStatus::Complete).is_err());

    gates
        .record_verdict(verdict("alpha", 1, "planning_review", "architect", Verdict::Fail))
        .unwrap();
    let err = gates.set_status("alpha", PhaseStatus::InProgress).unwrap_err();
    assert!(matches!(err, StewardError::InvalidStateTransition(_)));

    walk_to(&gates, &config, "beta", 5);
    let done = gates.set_status("beta", PhaseStatus::Complete).unwrap();
    assert_eq!(done.status, PhaseStatus::Complete);
}

#[test]
fn test_history_is_newest_first_and_filtered() {
    let (_tmp, gates) = test_gates(GovernanceConfig::default());
    gates
        .record_verdict(verdict("alpha", 1, "planning_review", "architect", Verdict::Fail))
        .unwrap();
    gates
        .record_verdict(verdict("alpha", 1, "planning_review", "architect", Verdict::Pass))
        .unwrap();
    gates
        .record_verdict(verdict("beta", 1, "planning_review", "architect", Verdict::Pass))
        .unwrap();

    let all = gates.query_history(&HistoryQuery::default()).unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].project, "beta");

    let alpha = gates
        .query_history(&HistoryQuery {
            project: Some("alpha".to_string()),
            ..HistoryQuery::default()
        })
        .unwrap();
    assert_eq!(alpha.len(), 2);
    assert_eq!(alpha[0].verdict, Verdict::Pass);

    let fails = gates
        .query_history(&HistoryQuery {
            verdict: Some(Verdict::Fail),
            ..HistoryQuery::default()
        })
        .unwrap();
    assert_eq!(fails.len(), 1);

    let limited = gates
        .query_history(&HistoryQuery {
            limit: Some(1),
            ..HistoryQuery::default()
        })
        .unwrap();
    assert_eq!(limited.len(), 1);
}

#[test]
fn test_verdicts_persist_across_instances() {
    let tmp = tempdir().unwrap();
    let store = Store::json(tmp.path());
    {
        let gates = GateEnforcement::new(store.clone(), GovernanceConfig::default());
        gates
            .record_verdict(verdict("alpha", 1, "planning_review", "architect", Verdict::Pass))
            .unwrap();
    }
    assert!(tmp.path().join("alpha").join("phase.json").exists());
    assert!(tmp.path().join("_gate_history.json").exists());
    let gates = GateEnforcement::new(store, GovernanceConfig::default());
    assert!(gates.can_advance("alpha", 1, 2, "planning_review").unwrap().allowed);
}

#[test]
fn test_structural_fail_from_one_role_overrides_pass_from_another() {
    let config = GovernanceConfig::default();
    let (_tmp, gates) = test_gates(config.clone());
    walk_to(&gates, &config, "alpha", 3);

    gates
        .record_verdict(verdict("alpha", 3, "implementation_review", "reviewer", Verdict::Pass))
        .unwrap();
    let mut fail = verdict("alpha", 3, "implementation_review", "qa", Verdict::Fail);
    fail.blocking_issues = vec!["flaky integration suite".to_string()];
    let state = gates.record_verdict(fail).unwrap();
    assert_eq!(state.status, PhaseStatus::GatedFail);

    let check = gates
        .can_advance("alpha", 3, 4, "implementation_review")
        .unwrap();
    assert!(!check.allowed);
    assert_eq!(check.blockers, vec!["FAIL from qa: flaky integration suite".to_string()]);

    let err = gates
        .advance_phase("alpha", 3, 4, "implementation_review")
        .unwrap_err();
    assert!(matches!(err, StewardError::GateBlocked { .. }));
    let state = gates.phase_state("alpha").unwrap().unwrap();
    assert_eq!(state.current_phase, 3);
    assert_eq!(state.status, PhaseStatus::GatedFail);
}

#[test]
fn test_failed_history_write_records_nothing() {
    let (tmp, gates) = test_gates(GovernanceConfig::default());
    std::fs::create_dir(tmp.path().join("_gate_history.json")).unwrap();

    let err = gates
        .record_verdict(verdict("alpha", 1, "planning_review", "architect", Verdict::Pass))
        .unwrap_err();
    assert!(matches!(err, StewardError::StorageError(_)));
    assert!(gates.phase_state("alpha").unwrap().is_none());
}
