//! Tests for `src/resolver/mod.rs`: ordering, levels, cycles, critical path.

use std::sync::Arc;

use turnstile::catalog::{AgentDescriptor, Catalog};
use turnstile::resolver::DependencyResolver;
use turnstile::types::{Priority, Task, TaskDependency};

#[test]
fn critical_dependent_runs_before_medium_sibling() {
    let tasks = vec![
        Task::new("A", "research").with_priority(Priority::High),
        Task::new("B", "writing").depends_on("A"),
        Task::new("C", "review")
            .depends_on("A")
            .with_priority(Priority::Critical),
    ];
    let result = DependencyResolver::new().resolve(&tasks);

    assert!(result.is_valid);
    assert_eq!(result.execution_order, vec!["A", "C", "B"]);
    assert_eq!(result.execution_levels["A"], 0);
    assert_eq!(result.execution_levels["B"], 1);
    assert_eq!(result.execution_levels["C"], 1);
    assert_eq!(result.parallel_groups(), vec![vec!["A"], vec!["C", "B"]]);
    assert_eq!(result.depth(), 2);
}

#[test]
fn every_prerequisite_precedes_its_dependent() {
    let tasks = vec![
        Task::new("deploy", "deployment").depends_on("review"),
        Task::new("review", "review").depends_on("write"),
        Task::new("write", "writing").depends_on("research"),
        Task::new("research", "research"),
        Task::new("validate", "validation").with_dependency(TaskDependency::soft("write")),
    ];
    let result = DependencyResolver::new().resolve(&tasks);
    assert!(result.is_valid);

    let pos = |id: &str| {
        result
            .execution_order
            .iter()
            .position(|t| t == id)
            .expect("task should be ordered")
    };
    for (task, prereqs) in &result.blocking {
        for prereq in prereqs {
            assert!(pos(prereq) < pos(task), "{prereq} should precede {task}");
            assert!(result.execution_levels[prereq] < result.execution_levels[task]);
        }
    }
    assert_eq!(
        result.critical_path,
        vec!["research", "write", "review", "deploy"]
    );
    assert_eq!(result.critical_path_duration, 30 + 25 + 10 + 15);
}

#[test]
fn cycles_are_reported_closed() {
    let tasks = vec![
        Task::new("a", "research").depends_on("c"),
        Task::new("b", "writing").depends_on("a"),
        Task::new("c", "review").depends_on("b"),
        Task::new("d", "review"),
    ];
    let result = DependencyResolver::new().resolve(&tasks);

    assert!(!result.is_valid);
    assert!(result.execution_order.is_empty());
    assert_eq!(result.cycles.len(), 1);
    let cycle = &result.cycles[0];
    assert_eq!(cycle.first(), cycle.last());
    assert_eq!(cycle.len(), 4);
}

#[test]
fn every_cycle_step_is_a_graph_edge() {
    let tasks = vec![
        Task::new("a", "research").depends_on("b"),
        Task::new("b", "writing").depends_on("a"),
        Task::new("c", "review").depends_on("d"),
        Task::new("d", "review").depends_on("e"),
        Task::new("e", "review").depends_on("c").depends_on("a"),
    ];
    let resolver = DependencyResolver::new();
    let result = resolver.resolve(&tasks);
    let graph = resolver.build_graph(&tasks);

    assert!(!result.is_valid);
    assert_eq!(result.cycles.len(), 2);
    for cycle in &result.cycles {
        assert_eq!(cycle.first(), cycle.last());
        for step in cycle.windows(2) {
            assert!(
                graph.dependents(&step[0]).contains(&step[1].as_str()),
                "{} -> {} is not an edge",
                step[0],
                step[1]
            );
        }
    }
}

#[test]
fn ready_tasks_keep_discovery_order_within_a_priority() {
    let tasks = vec![
        Task::new("X", "review").depends_on("Y"),
        Task::new("Y", "review"),
        Task::new("Z", "review"),
        Task::new("W", "review").depends_on("Z"),
    ];
    let result = DependencyResolver::new().resolve(&tasks);

    assert!(result.is_valid);
    assert_eq!(result.execution_order, vec!["Y", "Z", "X", "W"]);
}

#[test]
fn unknown_strict_prerequisite_invalidates_resolution() {
    let tasks = vec![Task::new("a", "writing").depends_on("ghost")];
    let result = DependencyResolver::new().resolve(&tasks);
    assert!(!result.is_valid);
    assert!(result.errors.iter().any(|e| e.contains("ghost")));
}

#[test]
fn unknown_soft_prerequisite_is_ignored() {
    let tasks = vec![Task::new("a", "writing").with_dependency(TaskDependency::soft("ghost"))];
    let result = DependencyResolver::new().resolve(&tasks);
    assert!(result.is_valid);
    assert_eq!(result.execution_order, vec!["a"]);
}

#[test]
fn duplicate_ids_invalidate_resolution() {
    let tasks = vec![Task::new("a", "writing"), Task::new("a", "review")];
    let result = DependencyResolver::new().resolve(&tasks);
    assert!(!result.is_valid);
    assert!(result.errors.iter().any(|e| e.contains("duplicate")));
}

#[test]
fn empty_input_resolves_to_empty_plan() {
    let result = DependencyResolver::new().resolve(&[]);
    assert!(result.is_valid);
    assert!(result.execution_order.is_empty());
    assert!(result.critical_path.is_empty());
    assert_eq!(result.critical_path_duration, 0);
}

#[test]
fn resolution_is_deterministic() {
    let tasks = vec![
        Task::new("x", "review"),
        Task::new("y", "review"),
        Task::new("z", "writing").depends_on("x").depends_on("y"),
    ];
    let resolver = DependencyResolver::new();
    let first = resolver.resolve(&tasks);
    for _ in 0..5 {
        assert_eq!(resolver.resolve(&tasks), first);
    }
}

#[test]
fn agent_descriptors_add_ordering_edges() {
    let mut writer = AgentDescriptor::new("writer");
    writer.dependencies.before_execution = vec!["researcher".to_owned()];
    let mut reviewer = AgentDescriptor::new("reviewer");
    reviewer
        .dependencies
        .task_dependencies
        .insert("review".to_owned(), vec!["writing".to_owned()]);
    let catalog = Catalog::from_descriptors([writer, reviewer]).expect("catalog should build");

    let tasks = vec![
        Task::new("check", "review").with_agent("reviewer"),
        Task::new("draft", "writing").with_agent("writer"),
        Task::new("dig", "research").with_agent("researcher"),
    ];
    let result = DependencyResolver::new()
        .with_catalog(Arc::new(catalog))
        .resolve(&tasks);

    assert!(result.is_valid);
    assert_eq!(result.execution_order, vec!["dig", "draft", "check"]);
    assert_eq!(result.blocking["draft"], vec!["dig"]);
    assert_eq!(result.blocking["check"], vec!["draft"]);
}

#[test]
fn custom_durations_shift_the_critical_path() {
    let tasks = vec![
        Task::new("fast", "research"),
        Task::new("slow", "custom"),
        Task::new("end", "review").depends_on("fast").depends_on("slow"),
    ];
    let resolver = DependencyResolver::new().with_duration("custom", 100);
    let result = resolver.resolve(&tasks);
    assert_eq!(result.critical_path, vec!["slow", "end"]);
    assert_eq!(result.critical_path_duration, 110);
}
