use std::path::Path;
use steward::core::error::{StewardError, ViolationType};
use steward::core::store::Store;
use steward::plugins::isolation::{IsolationEnforcer, Operation, Severity};
use steward::plugins::registry::{ProjectRegistry, RegisterProject};
use tempfile::tempdir;

fn setup() -> (tempfile::TempDir, ProjectRegistry, IsolationEnforcer) {
    let tmp = tempdir().unwrap();
    let store = Store::json(tmp.path());
    let mut registry = ProjectRegistry::open(store.clone()).unwrap();
    for name in ["alpha", "beta"] {
        registry
            .register(RegisterProject {
                name: name.to_string(),
                ..RegisterProject::default()
            })
            .unwrap();
    }
    let isolation = IsolationEnforcer::open(store).unwrap();
    (tmp, registry, isolation)
}

#[test]
fn test_same_project_always_allowed() {
    let (_tmp, registry, mut iso) = setup();
    let d = iso.check_access(&registry, "alpha", "alpha", Operation::Write).unwrap();
    assert!(d.allowed);
    assert!(iso.violations(None).is_empty());
}

#[test]
fn test_cross_project_denied_without_grant() {
    let (_tmp, registry, mut iso) = setup();
    let d = iso.check_access(&registry, "alpha", "beta", Operation::Write).unwrap();
    assert!(!d.allowed);
    assert_eq!(d.violation.as_ref().unwrap().severity, Severity::Critical);

    let d = iso.check_access(&registry, "alpha", "beta", Operation::Read).unwrap();
    assert_eq!(d.violation.unwrap().severity, Severity::Warning);

    let d = iso.check_access(&registry, "alpha", "ghost", Operation::Read).unwrap();
    assert!(!d.allowed);
    assert_eq!(iso.violations(Some("beta")).len(), 2);
    assert_eq!(iso.violations(None).len(), 3);
}

#[test]
fn test_grants_are_per_operation_and_wildcard() {
    let (_tmp, registry, mut iso) = setup();
    iso.grant_cross_project_access(&registry, "alpha", "beta", &[Operation::Read])
        .unwrap();
    assert!(iso.check_access(&registry, "alpha", "beta", Operation::Read).unwrap().allowed);
    assert!(!iso.check_access(&registry, "alpha", "beta", Operation::Write).unwrap().allowed);
    assert!(!iso.check_access(&registry, "beta", "alpha", Operation::Read).unwrap().allowed);

    iso.grant_cross_project_access(&registry, "alpha", "beta", &[Operation::Any])
        .unwrap();
    assert!(iso.check_access(&registry, "alpha", "beta", Operation::Execute).unwrap().allowed);
    assert_eq!(iso.grants_from("alpha").len(), 1);
    assert_eq!(iso.grants_from("alpha")[0].operations.len(), 2);
}

#[test]
fn test_revoke_is_subtractive() {
    let (_tmp, registry, mut iso) = setup();
    iso.grant_cross_project_access(&registry, "alpha", "beta", &[Operation::Read, Operation::Write])
        .unwrap();
    let left = iso
        .revoke_cross_project_access(&registry, "alpha", "beta", &[Operation::Write])
        .unwrap()
        .unwrap();
    assert_eq!(left.operations.len(), 1);
    assert!(!iso.check_access(&registry, "alpha", "beta", Operation::Write).unwrap().allowed);

    let left = iso
        .revoke_cross_project_access(&registry, "alpha", "beta", &[Operation::Read])
        .unwrap();
    assert!(left.is_none());
    assert!(iso.grants().is_empty());
}

#[test]
fn test_grant_requires_registered_projects() {
    let (_tmp, registry, mut iso) = setup();
    assert!(matches!(
        iso.grant_cross_project_access(&registry, "alpha", "ghost", &[Operation::Read]),
        Err(StewardError::NotFound(_))
    ));
    assert!(matches!(
        iso.revoke_cross_project_access(&registry, "ghost", "beta", &[Operation::Read]),
        Err(StewardError::NotFound(_))
    ));
}

#[test]
fn test_require_access_maps_to_cross_project_denial() {
    let (_tmp, registry, mut iso) = setup();
    let err = iso
        .require_access(&registry, "alpha", "beta", Operation::Write)
        .unwrap_err();
    assert_eq!(err.violation_type(), Some(ViolationType::CrossProject));
}

#[test]
fn test_grants_and_violations_persist() {
    let (tmp, registry, mut iso) = setup();
    iso.grant_cross_project_access(&registry, "beta", "alpha", &[Operation::Read])
        .unwrap();
    iso.check_access(&registry, "alpha", "beta", Operation::Write).unwrap();
    let reopened = IsolationEnforcer::open(Store::json(tmp.path())).unwrap();
    assert_eq!(reopened.grants().len(), 1);
    assert_eq!(reopened.violations(None).len(), 1);
}

#[test]
fn test_validate_state_path() {
    let (tmp, registry, _iso) = setup();
    let alpha_dir = tmp.path().join("alpha");
    assert!(IsolationEnforcer::validate_state_path(
        &registry,
        "alpha",
        &alpha_dir.join("decisions.json")
    ));
    assert!(!IsolationEnforcer::validate_state_path(
        &registry,
        "alpha",
        &alpha_dir.join("..").join("beta").join("phase.json")
    ));
    assert!(!IsolationEnforcer::validate_state_path(
        &registry,
        "alpha",
        &tmp.path().join("alpha-evil").join("x.json")
    ));
    assert!(!IsolationEnforcer::validate_state_path(
        &registry,
        "ghost",
        Path::new("/anywhere")
    ));
}

#[test]
fn test_failed_write_leaves_grants_and_violations_unchanged() {
    let (tmp, registry, mut iso) = setup();
    std::fs::create_dir(tmp.path().join("_isolation.json")).unwrap();

    let err = iso
        .grant_cross_project_access(&registry, "alpha", "beta", &[Operation::Write])
        .unwrap_err();
    assert!(matches!(err, StewardError::StorageError(_)));
    assert!(iso.grants().is_empty());

    assert!(iso.check_access(&registry, "alpha", "beta", Operation::Write).is_err());
    assert!(iso.violations(None).is_empty());
}

#[test]
fn test_forget_project_drops_grants_both_ways() {
    let (tmp, registry, mut iso) = setup();
    iso.grant_cross_project_access(&registry, "alpha", "beta", &[Operation::Read])
        .unwrap();
    iso.grant_cross_project_access(&registry, "beta", "alpha", &[Operation::Any])
        .unwrap();
    iso.check_access(&registry, "alpha", "beta", Operation::Write).unwrap();

    assert_eq!(iso.forget_project("beta").unwrap(), 2);
    assert!(iso.grants().is_empty());
    assert_eq!(iso.violations(Some("beta")).len(), 1);
    assert_eq!(iso.forget_project("beta").unwrap(), 0);

    let reopened = IsolationEnforcer::open(Store::json(tmp.path())).unwrap();
    assert!(reopened.grants().is_empty());
}
