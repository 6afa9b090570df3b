use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;

use titan_engine::{
    Bundle, ExecutionError, ExecutionType, ExecutorKind, ExecutorSettings, JobSystem, OrderedSystemsExecutor,
    ReverseSequentialSystemsExecutor, Schedule, ScheduleBuilder, SequentialSystemsExecutor, Stage, StageReport,
    SystemContext, SystemDescriptor, SystemsExecutor, World,
};

mod common;
use common::*;

type Log = Arc<Mutex<Vec<String>>>;

fn update(name: &str) -> SystemDescriptor {
    SystemDescriptor::new(name, Stage::Update)
}

fn ordered() -> OrderedSystemsExecutor {
    OrderedSystemsExecutor::new(ExecutorSettings::default())
}

fn jobs(workers: usize) -> JobSystem {
    JobSystem::new(Some(workers)).unwrap()
}

fn run_update(
    executor: &dyn SystemsExecutor,
    jobs: &JobSystem,
    world: &mut World,
    schedule: &Schedule,
) -> Result<StageReport, ExecutionError> {
    executor.run(jobs, world, schedule.stage(Stage::Update))
}

fn logging_system(
    log: &Log,
    name: &'static str,
    hold: Duration,
) -> impl Fn(&mut SystemContext<'_>) -> Result<(), ExecutionError> + Send + Sync + 'static {
    let log = Arc::clone(log);
    move |_: &mut SystemContext<'_>| {
        log.lock().unwrap().push(format!("start {name}"));
        thread::sleep(hold);
        log.lock().unwrap().push(format!("end {name}"));
        Ok(())
    }
}

fn position_of(log: &[String], event: &str) -> usize {
    log.iter().position(|e| e == event).unwrap_or_else(|| panic!("missing event `{event}` in {log:?}"))
}

#[test]
fn dependent_waits_for_its_dependency() {
    let (mut world, ids) = world_with_components();
    let log: Log = Arc::default();
    let mut builder = ScheduleBuilder::new();
    builder
        .add_fn(update("A").writes(ids.position), logging_system(&log, "A", Duration::from_millis(30)))
        .add_fn(update("B").writes(ids.position).after("A"), logging_system(&log, "B", Duration::ZERO))
        .add_fn(update("C").writes(ids.velocity), logging_system(&log, "C", Duration::ZERO));
    let schedule = builder.build().unwrap();
    let jobs = jobs(4);

    for _ in 0..3 {
        log.lock().unwrap().clear();
        let report = run_update(&ordered(), &jobs, &mut world, &schedule).unwrap();
        assert_eq!(report.executed, 3);
        assert_eq!(report.stalls, 0);

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 6);
        assert!(position_of(&log, "end A") < position_of(&log, "start B"));

        let mut names = report.completed_names(schedule.stage(Stage::Update));
        names.sort_unstable();
        assert_eq!(names, ["A", "B", "C"]);
    }
}

#[test]
fn independent_systems_run_concurrently() {
    let (mut world, ids) = world_with_components();
    let arrivals = Arc::new(AtomicUsize::new(0));
    let rendezvous = |arrivals: &Arc<AtomicUsize>| {
        let arrivals = Arc::clone(arrivals);
        move |_: &mut SystemContext<'_>| {
            arrivals.fetch_add(1, Ordering::SeqCst);
            if spin_until(Duration::from_secs(5), || arrivals.load(Ordering::SeqCst) >= 2) {
                Ok(())
            } else {
                Err(ExecutionError::Custom("peer system never started".to_owned()))
            }
        }
    };

    let mut builder = ScheduleBuilder::new();
    builder
        .add_fn(update("left").writes(ids.position), rendezvous(&arrivals))
        .add_fn(update("right").writes(ids.velocity), rendezvous(&arrivals));
    let schedule = builder.build().unwrap();

    let report = run_update(&ordered(), &jobs(2), &mut world, &schedule).unwrap();
    assert_eq!(report.executed, 2);
}

#[test]
fn inline_systems_run_on_the_driving_thread() {
    let (mut world, ids) = world_with_components();
    let threads: Arc<Mutex<Vec<(&'static str, ThreadId)>>> = Arc::default();
    let job_done = Arc::new(AtomicBool::new(false));

    let mut builder = ScheduleBuilder::new();
    {
        let threads = Arc::clone(&threads);
        let job_done = Arc::clone(&job_done);
        builder.add_fn(update("job").writes(ids.position), move |_| {
            threads.lock().unwrap().push(("job", thread::current().id()));
            job_done.store(true, Ordering::SeqCst);
            Ok(())
        });
    }
    {
        let threads = Arc::clone(&threads);
        let job_done = Arc::clone(&job_done);
        builder.add_fn(
            update("inline").reads(ids.position).execution(ExecutionType::Inline),
            move |_| {
                assert!(job_done.load(Ordering::SeqCst), "inline system started before its dependency");
                threads.lock().unwrap().push(("inline", thread::current().id()));
                Ok(())
            },
        );
    }
    let schedule = builder.build().unwrap();

    run_update(&ordered(), &jobs(2), &mut world, &schedule).unwrap();

    let caller = thread::current().id();
    let threads = threads.lock().unwrap();
    assert_eq!(threads.len(), 2);
    assert_eq!(threads[0].0, "job");
    assert_ne!(threads[0].1, caller);
    assert_eq!(threads[1], ("inline", caller));
}

#[test]
fn checked_execution_types_always_run() {
    let (mut world, _) = world_with_components();
    let runs = Arc::new(AtomicUsize::new(0));
    let mut builder = ScheduleBuilder::new();
    for (name, execution) in [("checked", ExecutionType::Check), ("inline_checked", ExecutionType::InlineCheck)] {
        let runs = Arc::clone(&runs);
        builder.add_fn(update(name).execution(execution), move |_| {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }
    let schedule = builder.build().unwrap();

    run_update(&ordered(), &jobs(2), &mut world, &schedule).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[test]
fn every_node_runs_once_after_its_dependencies() {
    let (mut world, ids) = world_with_components();
    let components = [ids.position, ids.velocity, ids.health, ids.frozen];
    let order: Arc<Mutex<Vec<String>>> = Arc::default();
    let mut rng = Lcg(2024);

    let mut builder = ScheduleBuilder::new();
    for i in 0..32u64 {
        let name = format!("s{i}");
        let mut descriptor = update(&name);
        for &component in &components {
            match rng.below(5) {
                0 => descriptor = descriptor.reads(component),
                1 => descriptor = descriptor.writes(component),
                _ => {}
            }
        }
        if i > 0 && rng.below(4) == 0 {
            descriptor = descriptor.after(format!("s{}", rng.below(i)));
        }
        if rng.below(6) == 0 {
            descriptor = descriptor.execution(ExecutionType::Inline);
        }
        let order = Arc::clone(&order);
        builder.add_fn(descriptor, move |ctx| {
            order.lock().unwrap().push(ctx.system_name().to_owned());
            Ok(())
        });
    }
    let schedule = builder.build().unwrap();
    let graph = schedule.stage(Stage::Update);
    let jobs = jobs(4);

    for _ in 0..3 {
        order.lock().unwrap().clear();
        let report = run_update(&ordered(), &jobs, &mut world, &schedule).unwrap();
        assert_eq!(report.executed, graph.len());

        let order = order.lock().unwrap();
        assert_eq!(order.len(), graph.len());
        for (index, node) in graph.nodes().iter().enumerate() {
            let at = position_of(&order, node.name());
            assert_eq!(order.iter().filter(|n| *n == node.name()).count(), 1);
            for &dependency in node.dependencies() {
                assert!(dependency < index);
                assert!(position_of(&order, graph.nodes()[dependency].name()) < at);
            }
        }
    }
}

#[test]
fn inline_only_graph_completes_in_array_order() {
    let (mut world, ids) = world_with_components();
    let mut builder = ScheduleBuilder::new();
    builder
        .add_fn(update("a").writes(ids.position).execution(ExecutionType::Inline), noop)
        .add_fn(update("b").reads(ids.position).execution(ExecutionType::Inline), noop)
        .add_fn(update("c").writes(ids.health).execution(ExecutionType::Inline), noop)
        .add_fn(update("d").writes(ids.position).execution(ExecutionType::Inline), noop);
    let schedule = builder.build().unwrap();
    let jobs = jobs(2);

    for _ in 0..3 {
        let report = run_update(&ordered(), &jobs, &mut world, &schedule).unwrap();
        assert_eq!(report.completion_order, [0, 1, 2, 3]);
        assert_eq!(report.completed_names(schedule.stage(Stage::Update)), ["a", "b", "c", "d"]);
    }
}

#[test]
fn failures_do_not_block_dependents() {
    let (mut world, ids) = world_with_components();
    let dependent_ran = Arc::new(AtomicBool::new(false));

    let mut builder = ScheduleBuilder::new();
    builder
        .add_fn(update("broken").writes(ids.position), |_| {
            Err(ExecutionError::Custom("out of fuel".to_owned()))
        })
        .add_fn(update("panicky").writes(ids.velocity), |_| panic!("boom"));
    {
        let dependent_ran = Arc::clone(&dependent_ran);
        builder.add_fn(
            update("dependent").reads(ids.position).reads(ids.velocity).after("broken").after("panicky"),
            move |_| {
                dependent_ran.store(true, Ordering::SeqCst);
                Ok(())
            },
        );
    }
    let schedule = builder.build().unwrap();

    match run_update(&ordered(), &jobs(2), &mut world, &schedule) {
        Err(ExecutionError::StageFailed { stage, failures }) => {
            assert_eq!(stage, Stage::Update);
            assert_eq!(failures.len(), 2);
            let broken = failures.iter().find(|f| f.system == "broken").unwrap();
            assert!(!broken.panicked);
            assert_eq!(broken.message, "out of fuel");
            let panicky = failures.iter().find(|f| f.system == "panicky").unwrap();
            assert!(panicky.panicked);
            assert_eq!(panicky.message, "boom");
        }
        other => panic!("expected a stage failure, got {other:?}"),
    }
    assert!(dependent_ran.load(Ordering::SeqCst));

    // The same graph runs again after a failed run.
    dependent_ran.store(false, Ordering::SeqCst);
    assert!(run_update(&ordered(), &jobs(2), &mut world, &schedule).is_err());
    assert!(dependent_ran.load(Ordering::SeqCst));
}

#[test]
fn stall_watchdog_fires_without_aborting_the_stage() {
    let (mut world, _) = world_with_components();
    let mut builder = ScheduleBuilder::new();
    builder.add_fn(update("sleepy"), |_| {
        thread::sleep(Duration::from_millis(120));
        Ok(())
    });
    let schedule = builder.build().unwrap();

    let executor = OrderedSystemsExecutor::new(ExecutorSettings {
        spin_iterations: 4,
        stall_timeout: Some(Duration::from_millis(20)),
    });
    let report = run_update(&executor, &jobs(2), &mut world, &schedule).unwrap();
    assert_eq!(report.executed, 1);
    assert!(report.stalls >= 1);

    let quiet = OrderedSystemsExecutor::new(ExecutorSettings { spin_iterations: 4, stall_timeout: None });
    let report = run_update(&quiet, &jobs(2), &mut world, &schedule).unwrap();
    assert_eq!(report.stalls, 0);
}

#[test]
fn undeclared_access_is_an_error() {
    let (mut world, ids) = world_with_components();
    let e = world.spawn(Bundle::new().with(ids.position, Position::default())).unwrap();

    let mut builder = ScheduleBuilder::new();
    builder.add_fn(update("sneaky").reads(ids.velocity), move |ctx| {
        ctx.get::<Position>(e)?;
        Ok(())
    });
    let schedule = builder.build().unwrap();

    let failures = match run_update(&ordered(), &jobs(2), &mut world, &schedule) {
        Err(ExecutionError::StageFailed { failures, .. }) => failures,
        other => panic!("expected a stage failure, got {other:?}"),
    };
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].system, "sneaky");
    assert!(failures[0].message.contains("no declared read access"), "{}", failures[0].message);
}

#[test]
fn systems_mutate_component_data() {
    let (mut world, ids) = world_with_components();
    let entities: Vec<_> = (0..100)
        .map(|i| {
            world
                .spawn(
                    Bundle::new()
                        .with(ids.position, Position { x: i as f32, y: 0.0 })
                        .with(ids.velocity, Velocity { x: 1.0, y: 2.0 }),
                )
                .unwrap()
        })
        .collect();

    let mut builder = ScheduleBuilder::new();
    builder
        .add_fn(update("integrate").reads(ids.velocity).writes(ids.position), |ctx| {
            ctx.for_each_read_write::<Velocity, Position>(None, |v, p| {
                p.x += v.x;
                p.y += v.y;
            })
        })
        .add_fn(update("tag").writes(ids.health), |_| Ok(()));
    let schedule = builder.build().unwrap();
    let jobs = jobs(2);

    for _ in 0..2 {
        run_update(&ordered(), &jobs, &mut world, &schedule).unwrap();
    }
    for (i, &e) in entities.iter().enumerate() {
        assert_eq!(world.get::<Position>(e), Some(&Position { x: i as f32 + 2.0, y: 4.0 }));
    }
}

#[test]
fn sequential_executors_run_on_the_caller_in_array_order() {
    let (mut world, _) = world_with_components();
    let log: Arc<Mutex<Vec<(String, ThreadId)>>> = Arc::default();
    let mut builder = ScheduleBuilder::new();
    for name in ["a", "b", "c"] {
        let log = Arc::clone(&log);
        builder.add_fn(update(name), move |ctx| {
            log.lock().unwrap().push((ctx.system_name().to_owned(), thread::current().id()));
            Ok(())
        });
    }
    let schedule = builder.build().unwrap();
    let jobs = jobs(2);
    let caller = thread::current().id();

    let report = run_update(&SequentialSystemsExecutor, &jobs, &mut world, &schedule).unwrap();
    assert_eq!(report.completion_order, [0, 1, 2]);
    let report = run_update(&ReverseSequentialSystemsExecutor, &jobs, &mut world, &schedule).unwrap();
    assert_eq!(report.completion_order, [2, 1, 0]);

    let log = log.lock().unwrap();
    let names: Vec<&str> = log.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, ["a", "b", "c", "c", "b", "a"]);
    assert!(log.iter().all(|&(_, thread)| thread == caller));
}

#[test]
fn executor_kinds_build_matching_executors() {
    let settings = ExecutorSettings::default();
    for kind in [ExecutorKind::Ordered, ExecutorKind::Sequential, ExecutorKind::ReverseSequential] {
        assert_eq!(kind.build(settings).kind(), kind);
    }
}
