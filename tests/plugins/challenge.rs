use steward::core::config::{DefaultAction, GovernanceConfig};
use steward::core::error::{StewardError, ViolationType};
use steward::core::store::Store;
use steward::plugins::challenge::{ChallengeProtocol, Resolution};
use steward::plugins::decision::{DecisionStatus, DecisionStore, DecisionType, ProposeRequest};
use tempfile::tempdir;

fn test_ledger() -> (tempfile::TempDir, DecisionStore) {
    let tmp = tempdir().unwrap();
    let ledger = DecisionStore::open(Store::json(tmp.path()), "alpha").unwrap();
    (tmp, ledger)
}

fn propose(ledger: &mut DecisionStore, author: &str) -> String {
    ledger
        .propose(ProposeRequest {
            author: author.to_string(),
            decision_type: DecisionType::Implementation,
            summary: "switch to async io".to_string(),
            rationale: "throughput".to_string(),
            evidence: Vec::new(),
            phase: 3,
            supersedes: None,
            dependencies: Vec::new(),
        })
        .unwrap()
        .id
}

#[test]
fn test_targeted_author_needs_review_before_execution() {
    let (_tmp, mut ledger) = test_ledger();
    let protocol = ChallengeProtocol::new(&GovernanceConfig::default());
    let id = propose(&mut ledger, "engineer");

    let check = protocol.can_execute(ledger.get(&id).unwrap());
    assert!(!check.executable);
    assert_eq!(check.required_challengers, vec!["architect", "qa"]);

    protocol
        .accept(&mut ledger, &id, "qa", "tests look good")
        .unwrap();
    let check = protocol.can_execute(ledger.get(&id).unwrap());
    assert!(check.executable);
}

#[test]
fn test_untargeted_author_is_always_executable() {
    let (_tmp, mut ledger) = test_ledger();
    let protocol = ChallengeProtocol::new(&GovernanceConfig::default());
    let id = propose(&mut ledger, "coordinator");
    let check = protocol.can_execute(ledger.get(&id).unwrap());
    assert!(check.executable);
    assert!(check.required_challengers.is_empty());
}

#[test]
fn test_unauthorized_challenger_is_denied() {
    let (_tmp, mut ledger) = test_ledger();
    let protocol = ChallengeProtocol::new(&GovernanceConfig::default());
    let id = propose(&mut ledger, "engineer");

    let err = protocol
        .challenge(&mut ledger, &id, "reviewer", "nope", None)
        .unwrap_err();
    assert_eq!(err.violation_type(), Some(ViolationType::UnauthorizedChallenger));
    assert_eq!(ledger.get(&id).unwrap().challenge_rounds, 0);

    let err = protocol.accept(&mut ledger, &id, "engineer", "self-approve").unwrap_err();
    assert!(matches!(err, StewardError::AccessDenied { .. }));

    assert!(matches!(
        protocol.challenge(&mut ledger, "DEC-0404", "architect", "x", None),
        Err(StewardError::NotFound(_))
    ));
}

#[test]
fn test_exhausted_rounds_escalate_by_default() {
    let (_tmp, mut ledger) = test_ledger();
    let protocol = ChallengeProtocol::new(&GovernanceConfig::default());
    let id = propose(&mut ledger, "engineer");

    for round in 1..3 {
        let outcome = protocol
            .challenge(&mut ledger, &id, "architect", &format!("round {round}"), None)
            .unwrap();
        assert!(outcome.resolution.is_none());
        assert_eq!(outcome.decision.status, DecisionStatus::Challenged);
    }
    let outcome = protocol
        .challenge(&mut ledger, &id, "qa", "still broken", None)
        .unwrap();
    assert_eq!(outcome.resolution, Some(Resolution::Escalated));
    assert_eq!(outcome.decision.status, DecisionStatus::Escalated);
    assert_eq!(outcome.decision.challenge_rounds, 3);

    assert!(protocol.can_execute(ledger.get(&id).unwrap()).executable);
    let err = protocol
        .challenge(&mut ledger, &id, "architect", "one more", None)
        .unwrap_err();
    assert!(matches!(err, StewardError::InvalidStateTransition(_)));
}

#[test]
fn test_exhausted_rounds_auto_accept_when_configured() {
    let (_tmp, mut ledger) = test_ledger();
    let mut config = GovernanceConfig::default();
    config.challenge.max_rounds = 2;
    config.challenge.auto_escalation = false;
    config.challenge.default_action = DefaultAction::Accept;
    let protocol = ChallengeProtocol::new(&config);
    let id = propose(&mut ledger, "engineer");

    protocol.challenge(&mut ledger, &id, "architect", "a", None).unwrap();
    let outcome = protocol.challenge(&mut ledger, &id, "architect", "b", None).unwrap();
    assert_eq!(outcome.resolution, Some(Resolution::AutoAccepted));
    assert_eq!(outcome.decision.status, DecisionStatus::Accepted);
}

#[test]
fn test_auto_escalation_off_with_escalate_default_still_escalates() {
    let (_tmp, mut ledger) = test_ledger();
    let mut config = GovernanceConfig::default();
    config.challenge.max_rounds = 1;
    config.challenge.auto_escalation = false;
    let protocol = ChallengeProtocol::new(&config);
    let id = propose(&mut ledger, "architect");

    let outcome = protocol.challenge(&mut ledger, &id, "reviewer", "x", None).unwrap();
    assert_eq!(outcome.resolution, Some(Resolution::Escalated));
}

#[test]
fn test_manual_escalation_needs_no_authorization() {
    let (_tmp, mut ledger) = test_ledger();
    let protocol = ChallengeProtocol::new(&GovernanceConfig::default());
    let id = propose(&mut ledger, "engineer");
    let d = protocol.escalate(&mut ledger, &id).unwrap();
    assert_eq!(d.status, DecisionStatus::Escalated);
}
