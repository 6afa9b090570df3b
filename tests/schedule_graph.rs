use titan_engine::{
    ComponentID, ConflictPolicy, GraphError, Schedule, ScheduleBuilder, Stage, StageGraph, SystemDescriptor,
    COMPONENT_CAP,
};

mod common;
use common::*;

fn update(name: &str) -> SystemDescriptor {
    SystemDescriptor::new(name, Stage::Update)
}

fn names(graph: &StageGraph) -> Vec<&str> {
    graph.nodes().iter().map(|node| node.name()).collect()
}

fn deps<'g>(graph: &'g StageGraph, name: &str) -> Vec<&'g str> {
    let index = graph.index_of(name).expect("system must be scheduled");
    graph.nodes()[index]
        .dependencies()
        .iter()
        .map(|&d| graph.nodes()[d].name())
        .collect()
}

fn build(builder: ScheduleBuilder) -> Schedule {
    builder.build().expect("schedule must build")
}

#[test]
fn conflicting_systems_are_ordered_by_registration() {
    let (_, ids) = world_with_components();
    let mut builder = ScheduleBuilder::new();
    builder
        .add_fn(update("writer").writes(ids.position), noop)
        .add_fn(update("reader").reads(ids.position), noop);
    let schedule = build(builder);
    let graph = schedule.stage(Stage::Update);

    assert_eq!(names(graph), ["writer", "reader"]);
    assert_eq!(deps(graph, "reader"), ["writer"]);
    assert!(deps(graph, "writer").is_empty());
    assert_eq!(graph.edge_count(), 1);
}

#[test]
fn disjoint_and_read_only_systems_stay_unordered() {
    let (_, ids) = world_with_components();
    let mut builder = ScheduleBuilder::new();
    builder
        .add_fn(update("a").writes(ids.position), noop)
        .add_fn(update("b").writes(ids.velocity), noop)
        .add_fn(update("c").reads(ids.health), noop)
        .add_fn(update("d").reads(ids.health), noop);
    let schedule = build(builder);
    let graph = schedule.stage(Stage::Update);

    assert_eq!(names(graph), ["a", "b", "c", "d"]);
    assert_eq!(graph.edge_count(), 0);
}

#[test]
fn explicit_after_overrides_registration_order() {
    let (_, ids) = world_with_components();
    let mut builder = ScheduleBuilder::new();
    builder
        .add_fn(update("late").writes(ids.position).after("early"), noop)
        .add_fn(update("early").writes(ids.position), noop);
    let schedule = build(builder);
    let graph = schedule.stage(Stage::Update);

    assert_eq!(names(graph), ["early", "late"]);
    assert_eq!(deps(graph, "late"), ["early"]);
    assert_eq!(graph.edge_count(), 1);
}

#[test]
fn explicit_before_adds_edge_without_conflict() {
    let (_, ids) = world_with_components();
    let mut builder = ScheduleBuilder::new();
    builder
        .add_fn(update("second").reads(ids.position), noop)
        .add_fn(update("first").reads(ids.velocity).before("second"), noop);
    let schedule = build(builder);
    let graph = schedule.stage(Stage::Update);

    assert_eq!(names(graph), ["first", "second"]);
    assert_eq!(deps(graph, "second"), ["first"]);
}

#[test]
fn two_cycle_is_reported_deterministically() {
    let make = || {
        let mut builder = ScheduleBuilder::new();
        builder
            .add_fn(update("A").after("B"), noop)
            .add_fn(update("B").after("A"), noop);
        builder.build()
    };

    let expected = GraphError::Cycle {
        stage: Stage::Update,
        systems: vec!["A".to_owned(), "B".to_owned(), "A".to_owned()],
    };
    for _ in 0..5 {
        assert_eq!(make().unwrap_err(), expected);
    }
}

#[test]
fn three_cycle_through_before_is_reported() {
    let mut builder = ScheduleBuilder::new();
    builder
        .add_fn(update("A").before("B"), noop)
        .add_fn(update("B").before("C"), noop)
        .add_fn(update("C").before("A"), noop);

    match builder.build() {
        Err(GraphError::Cycle { stage, systems }) => {
            assert_eq!(stage, Stage::Update);
            assert_eq!(systems, ["A", "B", "C", "A"]);
        }
        other => panic!("expected a cycle, got {other:?}"),
    }
}

#[test]
fn unknown_and_duplicate_names_are_rejected() {
    let mut builder = ScheduleBuilder::new();
    builder.add_fn(update("a").after("ghost"), noop);
    assert_eq!(
        builder.build().unwrap_err(),
        GraphError::UnknownSystem { system: "a".to_owned(), missing: "ghost".to_owned() }
    );

    let mut builder = ScheduleBuilder::new();
    builder
        .add_fn(update("twin"), noop)
        .add_fn(SystemDescriptor::new("twin", Stage::Last), noop);
    assert_eq!(builder.build().unwrap_err(), GraphError::DuplicateSystem("twin".to_owned()));
}

#[test]
fn ordering_across_stages() {
    // Waiting for an earlier stage is implied by stage order.
    let mut builder = ScheduleBuilder::new();
    builder
        .add_fn(SystemDescriptor::new("setup", Stage::PreUpdate), noop)
        .add_fn(update("tick").after("setup"), noop);
    let schedule = build(builder);
    assert_eq!(schedule.stage(Stage::Update).edge_count(), 0);
    assert_eq!(schedule.stage(Stage::PreUpdate).len(), 1);

    // Waiting for a later stage can never be satisfied.
    let mut builder = ScheduleBuilder::new();
    builder
        .add_fn(update("tick").after("report"), noop)
        .add_fn(SystemDescriptor::new("report", Stage::Last), noop);
    assert_eq!(
        builder.build().unwrap_err(),
        GraphError::CrossStageOrdering {
            system: "tick".to_owned(),
            stage: Stage::Update,
            other: "report".to_owned(),
            other_stage: Stage::Last,
        }
    );

    // `before` an earlier stage is unsatisfiable too, and names the declaring system.
    let mut builder = ScheduleBuilder::new();
    builder
        .add_fn(SystemDescriptor::new("setup", Stage::PreUpdate), noop)
        .add_fn(update("tick").before("setup"), noop);
    assert_eq!(
        builder.build().unwrap_err(),
        GraphError::CrossStageOrdering {
            system: "tick".to_owned(),
            stage: Stage::Update,
            other: "setup".to_owned(),
            other_stage: Stage::PreUpdate,
        }
    );

    // `before` a later stage is implied by stage order.
    let mut builder = ScheduleBuilder::new();
    builder
        .add_fn(update("tick").before("report"), noop)
        .add_fn(SystemDescriptor::new("report", Stage::Last), noop);
    let schedule = build(builder);
    assert_eq!(schedule.stage(Stage::Update).edge_count(), 0);
}

#[test]
fn access_beyond_component_capacity_is_rejected() {
    let (_, ids) = world_with_components();
    let beyond = COMPONENT_CAP as ComponentID + 44;

    for descriptor in [update("stray").reads(beyond), update("stray").writes(ids.position).writes(beyond)] {
        let mut builder = ScheduleBuilder::new();
        builder.add_fn(update("fine").reads(ids.position), noop).add_fn(descriptor, noop);
        assert_eq!(
            builder.build().unwrap_err(),
            GraphError::InvalidComponent { system: "stray".to_owned(), component_id: beyond }
        );
    }

    // The valid part of the declaration is kept.
    let descriptor = update("stray").writes(ids.position).reads(beyond);
    assert!(descriptor.access_sets().allows_write(ids.position));
    assert!(!descriptor.access_sets().allows_read(beyond));
}

#[test]
fn strict_policy_rejects_unordered_conflicts() {
    let (_, ids) = world_with_components();
    let mut builder = ScheduleBuilder::new().with_policy(ConflictPolicy::Strict);
    builder
        .add_fn(update("a").writes(ids.position).reads(ids.velocity), noop)
        .add_fn(update("b").reads(ids.position).reads(ids.velocity), noop);
    assert_eq!(
        builder.build().unwrap_err(),
        GraphError::AmbiguousConflict {
            stage: Stage::Update,
            first: "a".to_owned(),
            second: "b".to_owned(),
            components: vec![ids.position],
        }
    );

    let mut builder = ScheduleBuilder::new().with_policy(ConflictPolicy::Strict);
    builder
        .add_fn(update("a").writes(ids.position), noop)
        .add_fn(update("b").reads(ids.position).after("a"), noop);
    let schedule = build(builder);
    assert_eq!(deps(schedule.stage(Stage::Update), "b"), ["a"]);
}

#[test]
fn conflicts_implied_by_explicit_chains_add_no_edge() {
    let (_, ids) = world_with_components();
    let mut builder = ScheduleBuilder::new();
    builder
        .add_fn(update("a").writes(ids.position), noop)
        .add_fn(update("b").reads(ids.health).after("a"), noop)
        .add_fn(update("c").writes(ids.position).after("b"), noop);
    let schedule = build(builder);
    let graph = schedule.stage(Stage::Update);

    assert_eq!(names(graph), ["a", "b", "c"]);
    assert_eq!(deps(graph, "c"), ["b"]);
    assert_eq!(graph.edge_count(), 2);
}

#[test]
fn dependencies_always_precede_their_dependents() {
    let (_, ids) = world_with_components();
    let components = [ids.position, ids.velocity, ids.health, ids.frozen];
    let mut rng = Lcg(99);

    let mut builder = ScheduleBuilder::new();
    for i in 0..40 {
        let mut descriptor = update(&format!("s{i}"));
        for &component in &components {
            match rng.below(4) {
                0 => descriptor = descriptor.reads(component),
                1 => descriptor = descriptor.writes(component),
                _ => {}
            }
        }
        if i > 0 && rng.below(3) == 0 {
            descriptor = descriptor.after(format!("s{}", rng.below(i)));
        }
        builder.add_fn(descriptor, noop);
    }
    let schedule = build(builder);
    let graph = schedule.stage(Stage::Update);
    assert_eq!(graph.len(), 40);

    for (index, node) in graph.nodes().iter().enumerate() {
        let dependencies = node.dependencies();
        assert!(dependencies.iter().all(|&d| d < index), "{} depends on a later node", node.name());
        assert!(dependencies.windows(2).all(|w| w[0] < w[1]));
    }

    // Every conflicting pair is ordered one way or the other.
    let reaches = |from: usize, to: usize| {
        let mut stack = vec![to];
        let mut seen = vec![false; graph.len()];
        while let Some(node) = stack.pop() {
            if node == from {
                return true;
            }
            for &d in graph.nodes()[node].dependencies() {
                if !seen[d] {
                    seen[d] = true;
                    stack.push(d);
                }
            }
        }
        false
    };
    for i in 0..graph.len() {
        for j in (i + 1)..graph.len() {
            if graph.nodes()[i].access().conflicts_with(graph.nodes()[j].access()) {
                assert!(reaches(i, j), "{} and {} are unordered", graph.nodes()[i].name(), graph.nodes()[j].name());
            }
        }
    }
}

#[test]
fn systems_are_partitioned_by_stage() {
    let mut builder = ScheduleBuilder::new();
    builder
        .add_fn(SystemDescriptor::new("boot", Stage::Init), noop)
        .add_fn(SystemDescriptor::new("input", Stage::PreUpdate), noop)
        .add_fn(update("tick"), noop)
        .add_fn(update("tock"), noop)
        .add_fn(SystemDescriptor::new("cleanup", Stage::Shutdown), noop);
    let schedule = build(builder);

    assert_eq!(schedule.system_count(), 5);
    assert_eq!(schedule.stages().len(), Stage::ALL.len());
    assert_eq!(names(schedule.stage(Stage::Update)), ["tick", "tock"]);
    assert!(schedule.stage(Stage::PostUpdate).is_empty());
    for stage in Stage::ALL {
        let graph = schedule.stage(stage);
        assert_eq!(graph.stage(), stage);
        assert!(graph.nodes().iter().all(|node| node.stage() == stage));
    }
}
