//! Tests for `src/resolver/tracker.rs`: runtime release and cascade rules.

use turnstile::resolver::tracker::{ExecutionTracker, TaskStatus, TrackerError};
use turnstile::resolver::DependencyResolver;
use turnstile::types::{Task, TaskDependency};

fn tracker(tasks: &[Task]) -> ExecutionTracker {
    ExecutionTracker::new(DependencyResolver::new().build_graph(tasks))
}

#[test]
fn dependents_become_ready_after_prerequisite_completes() {
    let t = tracker(&[
        Task::new("a", "research"),
        Task::new("b", "writing").depends_on("a"),
    ]);
    assert_eq!(t.ready_tasks(), vec!["a"]);
    assert!(!t.is_admissible("b"));
    assert_eq!(t.blocked_tasks()["b"], vec!["a"]);

    t.mark_running("a").expect("a should start");
    assert!(t.ready_tasks().is_empty());
    let cancelled = t.mark_completed("a").expect("a should complete");
    assert!(cancelled.is_empty());
    assert!(t.is_admissible("b"));
}

#[test]
fn starting_a_blocked_task_is_refused() {
    let t = tracker(&[
        Task::new("a", "research"),
        Task::new("b", "writing").depends_on("a"),
    ]);
    let err = t.mark_running("b").expect_err("b is still waiting");
    assert_eq!(
        err,
        TrackerError::NotReady {
            task: "b".to_owned(),
            waiting: vec!["a".to_owned()],
        }
    );
    assert!(matches!(
        t.mark_running("ghost"),
        Err(TrackerError::UnknownTask(_))
    ));
}

#[test]
fn strict_failure_cascades_transitively() {
    let t = tracker(&[
        Task::new("a", "research"),
        Task::new("b", "writing").depends_on("a"),
        Task::new("c", "review").depends_on("b"),
        Task::new("d", "review").with_dependency(TaskDependency::soft("a")),
    ]);
    let mut cancelled = t.mark_failed("a").expect("a should fail");
    cancelled.sort();
    assert_eq!(cancelled, vec!["b", "c"]);
    assert_eq!(t.status("c"), Some(TaskStatus::Cancelled));
    assert!(t.is_admissible("d"), "soft dependents survive failure");
}

#[test]
fn conditional_dependency_follows_outcome() {
    let t = tracker(&[
        Task::new("deploy", "deployment"),
        Task::new("rollback", "deployment")
            .with_dependency(TaskDependency::conditional("deploy", "failure")),
        Task::new("announce", "writing")
            .with_dependency(TaskDependency::conditional("deploy", "success")),
        Task::new("cleanup", "validation")
            .with_dependency(TaskDependency::conditional("deploy", "completion")),
    ]);
    let cancelled = t.mark_completed("deploy").expect("deploy should complete");
    assert_eq!(cancelled, vec!["rollback"]);
    assert!(t.is_admissible("announce"));
    assert!(t.is_admissible("cleanup"));
}

#[test]
fn terminal_tasks_cannot_change_again() {
    let t = tracker(&[Task::new("a", "research")]);
    t.mark_completed("a").expect("a should complete");
    assert!(matches!(
        t.mark_failed("a"),
        Err(TrackerError::InvalidTransition { .. })
    ));
    assert!(t.is_finished());
    assert_eq!(t.completed_tasks(), vec!["a"]);
}

#[test]
fn cancel_reports_task_and_cascade() {
    let t = tracker(&[
        Task::new("a", "research"),
        Task::new("b", "writing").depends_on("a"),
    ]);
    let cancelled = t.cancel("a").expect("a should cancel");
    assert_eq!(cancelled, vec!["a", "b"]);
    assert_eq!(t.cancelled_tasks(), vec!["a", "b"]);
    assert!(t.is_finished());
}
