use steward::core::error::StewardError;
use steward::core::store::Store;
use steward::plugins::allocator::{AllocationRequest, ResourceAllocator, Resources};
use steward::plugins::registry::{Priority, ProjectRegistry, RegisterProject};
use tempfile::tempdir;

fn workers(n: u64) -> Resources {
    Resources {
        workers: n,
        ..Resources::ZERO
    }
}

fn setup(pool: Resources, projects: &[(&str, Priority)]) -> (tempfile::TempDir, ProjectRegistry, ResourceAllocator) {
    let tmp = tempdir().unwrap();
    let store = Store::json(tmp.path());
    let mut registry = ProjectRegistry::open(store.clone()).unwrap();
    for (name, priority) in projects {
        registry
            .register(RegisterProject {
                name: name.to_string(),
                priority: *priority,
                budget_total: 100.0,
                ..RegisterProject::default()
            })
            .unwrap();
    }
    let allocator = ResourceAllocator::open(store, pool).unwrap();
    (tmp, registry, allocator)
}

fn request(project: &str, resources: Resources) -> AllocationRequest {
    AllocationRequest {
        project: project.to_string(),
        resources,
    }
}

#[test]
fn test_reallocation_from_lower_priority() {
    let (_tmp, registry, mut alloc) =
        setup(workers(3), &[("P", Priority::Low), ("Q", Priority::Critical)]);
    assert!(alloc.allocate(&registry, request("P", workers(2))).unwrap().granted);

    let outcome = alloc.allocate(&registry, request("Q", workers(3))).unwrap();
    assert!(outcome.granted);
    assert_eq!(outcome.reallocated_from, vec!["P".to_string()]);
    assert_eq!(alloc.allocation("P").unwrap().resources.workers, 0);
    assert_eq!(alloc.allocation("Q").unwrap().resources.workers, 3);
    assert!(!alloc.utilization().over_committed);
}

#[test]
fn test_denial_leaves_donors_untouched() {
    let (_tmp, registry, mut alloc) = setup(
        workers(4),
        &[("low", Priority::Low), ("peer", Priority::High), ("req", Priority::High)],
    );
    alloc.allocate(&registry, request("low", workers(1))).unwrap();
    alloc.allocate(&registry, request("peer", workers(3))).unwrap();

    let outcome = alloc.allocate(&registry, request("req", workers(3))).unwrap();
    assert!(!outcome.granted);
    assert_eq!(outcome.shortfall, Some(workers(2)));
    assert_eq!(alloc.allocation("low").unwrap().resources.workers, 1);
    assert_eq!(alloc.allocation("peer").unwrap().resources.workers, 3);
    assert!(alloc.allocation("req").is_none());
}

#[test]
fn test_allocate_never_exceeds_pool() {
    let pool = Resources {
        workers: 8,
        model_capacity: 4,
        token_budget: 1_000,
    };
    let (_tmp, registry, mut alloc) = setup(
        pool,
        &[
            ("a", Priority::Low),
            ("b", Priority::Normal),
            ("c", Priority::High),
            ("d", Priority::Critical),
        ],
    );
    let asks = [
        ("a", 5, 2, 600),
        ("b", 4, 2, 300),
        ("c", 6, 3, 900),
        ("d", 8, 1, 200),
        ("a", 2, 1, 100),
        ("b", 9, 5, 5_000),
    ];
    for (project, w, m, t) in asks {
        alloc
            .allocate(
                &registry,
                request(
                    project,
                    Resources {
                        workers: w,
                        model_capacity: m,
                        token_budget: t,
                    },
                ),
            )
            .unwrap();
        let u = alloc.utilization();
        assert!(u.allocated.fits_within(&pool), "pool exceeded after {project}");
    }
}

#[test]
fn test_resize_credits_own_grant() {
    let (_tmp, registry, mut alloc) = setup(workers(4), &[("solo", Priority::Normal)]);
    alloc.allocate(&registry, request("solo", workers(3))).unwrap();
    let outcome = alloc.allocate(&registry, request("solo", workers(4))).unwrap();
    assert!(outcome.granted);
    assert!(outcome.reallocated_from.is_empty());
}

#[test]
fn test_force_allocate_may_exceed_pool() {
    let (_tmp, registry, mut alloc) =
        setup(workers(2), &[("hi", Priority::Critical), ("lo", Priority::Low)]);
    alloc.allocate(&registry, request("hi", workers(2))).unwrap();
    let outcome = alloc.force_allocate(&registry, request("lo", workers(3))).unwrap();
    assert!(outcome.granted);
    assert_eq!(outcome.reallocated_from, vec!["hi".to_string()]);
    let grant = alloc.allocation("lo").unwrap();
    assert!(grant.forced);
    assert_eq!(alloc.allocation("hi").unwrap().resources.workers, 0);
    assert!(alloc.utilization().over_committed);
}

#[test]
fn test_unregistered_requester_and_release() {
    let (tmp, registry, mut alloc) = setup(workers(2), &[("a", Priority::Normal)]);
    assert!(matches!(
        alloc.allocate(&registry, request("ghost", workers(1))),
        Err(StewardError::NotFound(_))
    ));
    alloc.allocate(&registry, request("a", workers(2))).unwrap();
    let reopened = ResourceAllocator::open(Store::json(tmp.path()), workers(2)).unwrap();
    assert_eq!(reopened.allocations().len(), 1);

    assert!(alloc.release("a").unwrap().is_some());
    assert!(alloc.release("a").unwrap().is_none());
    assert!(alloc.utilization().allocated.is_zero());
}

#[test]
fn test_failed_write_leaves_allocations_unchanged() {
    let (tmp, registry, mut alloc) =
        setup(workers(3), &[("P", Priority::Low), ("Q", Priority::Critical)]);
    alloc.allocate(&registry, request("P", workers(2))).unwrap();

    let doc = tmp.path().join("_allocations.json");
    std::fs::remove_file(&doc).unwrap();
    std::fs::create_dir(&doc).unwrap();

    let err = alloc.allocate(&registry, request("Q", workers(3))).unwrap_err();
    assert!(matches!(err, StewardError::StorageError(_)));
    assert_eq!(alloc.allocation("P").unwrap().resources.workers, 2);
    assert!(alloc.allocation("Q").is_none());

    assert!(alloc.release("P").is_err());
    assert!(alloc.allocation("P").is_some());
}
