use steward::core::error::StewardError;
use steward::core::store::Store;
use steward::plugins::registry::{
    Priority, ProjectRegistry, ProjectStatus, RegisterProject, TeamRecord,
};
use tempfile::tempdir;

fn test_registry() -> (tempfile::TempDir, ProjectRegistry) {
    let tmp = tempdir().unwrap();
    let registry = ProjectRegistry::open(Store::json(tmp.path())).unwrap();
    (tmp, registry)
}

fn register(registry: &mut ProjectRegistry, name: &str, priority: Priority, budget: f64) {
    registry
        .register(RegisterProject {
            name: name.to_string(),
            priority,
            budget_total: budget,
            ..RegisterProject::default()
        })
        .unwrap();
}

#[test]
fn test_register_defaults_and_duplicates() {
    let (tmp, mut registry) = test_registry();
    register(&mut registry, "alpha", Priority::High, 50.0);
    let alpha = registry.get("alpha").unwrap();
    assert_eq!(alpha.entry.status, ProjectStatus::Active);
    assert_eq!(alpha.entry.current_phase, 1);
    assert_eq!(alpha.state_dir, tmp.path().join("alpha"));
    assert!(tmp.path().join("alpha").join("project.json").exists());

    let err = registry
        .register(RegisterProject {
            name: "alpha".to_string(),
            ..RegisterProject::default()
        })
        .unwrap_err();
    assert!(matches!(err, StewardError::AlreadyExists(_)));

    for bad in ["", "_hidden", "a b", "../x"] {
        assert!(registry
            .register(RegisterProject {
                name: bad.to_string(),
                ..RegisterProject::default()
            })
            .is_err());
    }
}

#[test]
fn test_list_orders_by_priority_then_name() {
    let (_tmp, mut registry) = test_registry();
    register(&mut registry, "zeta", Priority::Low, 0.0);
    register(&mut registry, "beta", Priority::Critical, 0.0);
    register(&mut registry, "alpha", Priority::Critical, 0.0);
    register(&mut registry, "mid", Priority::Normal, 0.0);
    let names: Vec<&str> = registry
        .list(None)
        .iter()
        .map(|p| p.entry.name.as_str())
        .collect();
    assert_eq!(names, vec!["alpha", "beta", "mid", "zeta"]);

    registry.pause("mid").unwrap();
    assert_eq!(registry.list(Some(ProjectStatus::Paused)).len(), 1);
}

#[test]
fn test_lifecycle_transitions() {
    let (_tmp, mut registry) = test_registry();
    register(&mut registry, "alpha", Priority::Normal, 0.0);

    assert!(matches!(
        registry.resume("alpha"),
        Err(StewardError::InvalidStateTransition(_))
    ));
    assert!(matches!(
        registry.archive("alpha"),
        Err(StewardError::InvalidStateTransition(_))
    ));
    registry.pause("alpha").unwrap();
    assert!(registry.pause("alpha").is_err());
    registry.resume("alpha").unwrap();
    registry.pause("alpha").unwrap();
    assert_eq!(
        registry.complete("alpha").unwrap().entry.status,
        ProjectStatus::Completed
    );
    assert_eq!(
        registry.archive("alpha").unwrap().entry.status,
        ProjectStatus::Archived
    );
    assert!(registry.complete("alpha").is_err());
}

#[test]
fn test_budget_enforcement() {
    let (_tmp, mut registry) = test_registry();
    register(&mut registry, "alpha", Priority::Normal, 10.0);
    registry.record_spend("alpha", 6.0).unwrap();
    let err = registry.record_spend("alpha", 5.0).unwrap_err();
    assert!(matches!(err, StewardError::BudgetExceeded(_)));
    let state = registry.record_spend("alpha", 4.0).unwrap();
    assert_eq!(state.entry.budget_used, 10.0);
    assert_eq!(state.budget_remaining(), 0.0);
    assert!(registry.record_spend("alpha", -1.0).is_err());
}

#[test]
fn test_teams_priority_phase_and_metadata() {
    let (_tmp, mut registry) = test_registry();
    register(&mut registry, "alpha", Priority::Low, 0.0);
    registry
        .add_team(
            "alpha",
            TeamRecord {
                name: "core".to_string(),
                lead: "architect".to_string(),
                members: vec!["engineer".to_string(), "qa".to_string()],
            },
        )
        .unwrap();
    assert_eq!(registry.get("alpha").unwrap().entry.team_count, 1);
    let state = registry.remove_team("alpha", "core").unwrap();
    assert_eq!(state.entry.team_count, 0);
    assert!(matches!(
        registry.remove_team("alpha", "core"),
        Err(StewardError::NotFound(_))
    ));

    registry.set_priority("alpha", Priority::Critical).unwrap();
    assert_eq!(registry.priority_of("alpha"), Some(Priority::Critical));
    registry.set_current_phase("alpha", 3).unwrap();
    registry
        .set_metadata("alpha", "owner", serde_json::json!("platform"))
        .unwrap();
    assert_eq!(registry.get("alpha").unwrap().metadata["owner"], "platform");
}

#[test]
fn test_reload_and_unregister() {
    let (tmp, mut registry) = test_registry();
    register(&mut registry, "alpha", Priority::High, 5.0);
    register(&mut registry, "beta", Priority::Low, 5.0);
    registry.unregister("beta").unwrap();
    assert!(!tmp.path().join("beta").join("project.json").exists());

    let reopened = ProjectRegistry::open(Store::json(tmp.path())).unwrap();
    assert!(reopened.contains("alpha"));
    assert!(!reopened.contains("beta"));
    assert_eq!(reopened.priority_of("alpha"), Some(Priority::High));
    assert!(matches!(
        registry.unregister("beta"),
        Err(StewardError::NotFound(_))
    ));
}

#[test]
fn test_failed_write_leaves_registry_unchanged() {
    let (tmp, mut registry) = test_registry();
    std::fs::write(tmp.path().join("alpha"), b"in the way").unwrap();

    let err = registry
        .register(RegisterProject {
            name: "alpha".to_string(),
            ..RegisterProject::default()
        })
        .unwrap_err();
    assert!(matches!(err, StewardError::StorageError(_)));
    assert!(!registry.contains("alpha"));

    std::fs::remove_file(tmp.path().join("alpha")).unwrap();
    register(&mut registry, "alpha", Priority::Normal, 10.0);
    assert!(registry.contains("alpha"));

    let doc = tmp.path().join("alpha").join("project.json");
    std::fs::remove_file(&doc).unwrap();
    std::fs::create_dir(&doc).unwrap();
    assert!(registry.pause("alpha").is_err());
    assert_eq!(registry.get("alpha").unwrap().entry.status, ProjectStatus::Active);
}
