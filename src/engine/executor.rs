//! Systems executors.
//!
//! An executor runs one [`StageGraph`] to completion. Three strategies exist:
//!
//! * [`OrderedSystemsExecutor`] drives nodes in parallel on the
//!   [`JobSystem`], starting each node only once all of its direct
//!   dependencies have completed.
//! * [`SequentialSystemsExecutor`] runs every node on the calling thread in
//!   array order.
//! * [`ReverseSequentialSystemsExecutor`] does the same in reverse order,
//!   which suits teardown stages.
//!
//! ## Per-run state
//!
//! Executors keep no state between runs. Each run allocates a fresh
//! [`SystemState`] per node, so a graph can be re-run any number of times.
//!
//! ## Failures
//!
//! A system that returns an error or panics is logged and recorded, then
//! treated as completed so its dependents still run. Once every node has
//! finished the run returns [`ExecutionError::StageFailed`] listing the
//! failures in completion order.

use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{debug, debug_span, error, warn};

use crate::engine::error::{ExecutionError, SystemFailure};
use crate::engine::graph::{StageGraph, SystemNode};
use crate::engine::jobs::{run_guarded, JobDescriptor, JobHandle, JobSystem};
use crate::engine::types::Stage;
use crate::engine::world::World;


/// Per-run state of one node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SystemState {
    /// Some direct dependency has not completed.
    Waiting,
    /// Submitted to the job system.
    Running,
    /// Finished, successfully or not.
    Completed,
}

/// Outcome of one stage run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageReport {
    /// Stage that ran.
    pub stage: Stage,
    /// Number of nodes executed.
    pub executed: usize,
    /// Node indices in the order their completion was observed.
    pub completion_order: Vec<usize>,
    /// Number of times the stall watchdog fired.
    pub stalls: u32,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
}

impl StageReport {
    fn new(stage: Stage) -> Self {
        Self {
            stage,
            executed: 0,
            completion_order: Vec::new(),
            stalls: 0,
            elapsed: Duration::ZERO,
        }
    }

    /// Names of the completed nodes, in completion order.
    pub fn completed_names<'g>(&self, graph: &'g StageGraph) -> Vec<&'g str> {
        self.completion_order
            .iter()
            .filter_map(|&index| graph.nodes().get(index).map(SystemNode::name))
            .collect()
    }
}

/// Tuning for [`OrderedSystemsExecutor`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExecutorSettings {
    /// Empty scans to spin through before blocking on the completion signal.
    pub spin_iterations: u32,
    /// Time without any completion after which the watchdog warns.
    /// `None` disables the watchdog.
    pub stall_timeout: Option<Duration>,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            spin_iterations: 64,
            stall_timeout: Some(Duration::from_millis(2000)),
        }
    }
}

/// Longest single block on the completion signal when the watchdog is off.
const MAX_WAIT: Duration = Duration::from_millis(100);

/// Strategy for running one stage graph.
pub trait SystemsExecutor: Send + Sync {
    /// Which strategy this is.
    fn kind(&self) -> ExecutorKind;

    /// Runs every node of `graph` exactly once.
    fn run(&self, jobs: &JobSystem, world: &mut World, graph: &StageGraph) -> Result<StageReport, ExecutionError>;
}

/// Selects a [`SystemsExecutor`] implementation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    /// [`OrderedSystemsExecutor`].
    Ordered,
    /// [`SequentialSystemsExecutor`].
    Sequential,
    /// [`ReverseSequentialSystemsExecutor`].
    ReverseSequential,
}

impl ExecutorKind {
    /// Instantiates the executor.
    pub fn build(self, settings: ExecutorSettings) -> Box<dyn SystemsExecutor> {
        match self {
            ExecutorKind::Ordered => Box::new(OrderedSystemsExecutor::new(settings)),
            ExecutorKind::Sequential => Box::new(SequentialSystemsExecutor),
            ExecutorKind::ReverseSequential => Box::new(ReverseSequentialSystemsExecutor),
        }
    }
}

fn record_failure(stage: Stage, failure: SystemFailure, failures: &mut Vec<SystemFailure>) {
    error!(
        stage = %stage,
        system = %failure.system,
        panicked = failure.panicked,
        "system failed: {}",
        failure.message
    );
    failures.push(failure);
}

fn finish(mut report: StageReport, started: Instant, failures: Vec<SystemFailure>) -> Result<StageReport, ExecutionError> {
    report.elapsed = started.elapsed();
    debug!(
        stage = %report.stage,
        executed = report.executed,
        failed = failures.len(),
        elapsed_us = report.elapsed.as_micros() as u64,
        "stage finished"
    );
    if failures.is_empty() {
        Ok(report)
    } else {
        Err(ExecutionError::StageFailed { stage: report.stage, failures })
    }
}

/// Runs `node` on the calling thread, catching panics.
fn execute_inline(node: &SystemNode, world: &World) -> Option<SystemFailure> {
    run_guarded(|| node.run(world)).map(|failure| failure.into_system_failure(node.name()))
}

/// Parallel, dependency-respecting executor.
///
/// Each scan of the node array
/// 1. moves `Running` nodes whose job reports completed to `Completed` and
///    releases their handles,
/// 2. starts every `Waiting` node whose direct dependencies are all
///    `Completed`: inline nodes run immediately on the calling thread,
///    others are enqueued and become `Running`.
///
/// Dependencies always have smaller indices than their dependents, so one
/// forward scan also picks up chains of inline nodes. A scan that changes
/// nothing spins briefly, then blocks until the next job completion.
#[derive(Clone, Copy, Debug, Default)]
pub struct OrderedSystemsExecutor {
    settings: ExecutorSettings,
}

impl OrderedSystemsExecutor {
    /// Creates an executor with `settings`.
    pub fn new(settings: ExecutorSettings) -> Self {
        Self { settings }
    }

    /// Current settings.
    pub fn settings(&self) -> &ExecutorSettings { &self.settings }
}

impl SystemsExecutor for OrderedSystemsExecutor {
    fn kind(&self) -> ExecutorKind { ExecutorKind::Ordered }

    fn run(&self, jobs: &JobSystem, world: &mut World, graph: &StageGraph) -> Result<StageReport, ExecutionError> {
        let stage = graph.stage();
        let _span = debug_span!("stage", stage = %stage, executor = "ordered").entered();
        let started = Instant::now();
        let mut report = StageReport::new(stage);
        let mut failures = Vec::new();

        let world: &World = world;
        let nodes = graph.nodes();
        let count = nodes.len();
        let settings = self.settings;

        jobs.scope(|scope| {
            let mut states = vec![SystemState::Waiting; count];
            let mut handles = vec![JobHandle::INVALID; count];
            let mut remaining = count;
            let mut spins = 0u32;
            let mut idle_since = Instant::now();

            while remaining > 0 {
                let observed = scope.completion_generation();
                let mut progressed = false;

                for (index, node) in nodes.iter().enumerate() {
                    if states[index] == SystemState::Running && scope.is_completed(&handles[index]) {
                        if let Some(failure) = scope.take_failure(&handles[index]) {
                            record_failure(stage, failure.into_system_failure(node.name()), &mut failures);
                        }
                        scope.reset(&mut handles[index]);
                        states[index] = SystemState::Completed;
                        remaining -= 1;
                        report.completion_order.push(index);
                        progressed = true;
                        debug!(system = node.name(), "system completed");
                    }
                }

                for (index, node) in nodes.iter().enumerate() {
                    if states[index] != SystemState::Waiting {
                        continue;
                    }
                    if !node.dependencies().iter().all(|&d| states[d] == SystemState::Completed) {
                        continue;
                    }
                    progressed = true;

                    if node.execution().is_inline() {
                        debug!(system = node.name(), "running inline system");
                        if let Some(failure) = execute_inline(node, world) {
                            record_failure(stage, failure, &mut failures);
                        }
                        states[index] = SystemState::Completed;
                        remaining -= 1;
                        report.completion_order.push(index);
                    } else {
                        debug!(system = node.name(), "enqueueing system");
                        handles[index] = scope.enqueue(JobDescriptor::new(node.name(), move || node.run(world)));
                        states[index] = SystemState::Running;
                    }
                }

                if remaining == 0 {
                    break;
                }
                if progressed {
                    spins = 0;
                    idle_since = Instant::now();
                    continue;
                }
                if spins < settings.spin_iterations {
                    spins += 1;
                    std::hint::spin_loop();
                    continue;
                }

                let wait = settings.stall_timeout.map_or(MAX_WAIT, |timeout| {
                    timeout.saturating_sub(idle_since.elapsed()).clamp(Duration::from_millis(1), MAX_WAIT)
                });
                scope.wait_for_completion(observed, wait);

                if let Some(timeout) = settings.stall_timeout {
                    let idle = idle_since.elapsed();
                    if idle >= timeout {
                        let running: Vec<&str> = nodes
                            .iter()
                            .enumerate()
                            .filter(|&(index, _)| states[index] == SystemState::Running)
                            .map(|(_, node)| node.name())
                            .collect();
                        warn!(
                            stage = %stage,
                            idle_ms = idle.as_millis() as u64,
                            running = ?running,
                            "stage stalled: no system completed within the watchdog deadline"
                        );
                        report.stalls += 1;
                        idle_since = Instant::now();
                    }
                }
            }
        });

        report.executed = report.completion_order.len();
        finish(report, started, failures)
    }
}

/// Runs every node on the calling thread, first to last.
#[derive(Clone, Copy, Debug, Default)]
pub struct SequentialSystemsExecutor;

/// Runs every node on the calling thread, last to first.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReverseSequentialSystemsExecutor;

fn run_in_place(
    graph: &StageGraph,
    world: &World,
    order: impl Iterator<Item = usize>,
    executor: &'static str,
) -> Result<StageReport, ExecutionError> {
    let stage = graph.stage();
    let _span = debug_span!("stage", stage = %stage, executor).entered();
    let started = Instant::now();
    let mut report = StageReport::new(stage);
    let mut failures = Vec::new();

    for index in order {
        let node = &graph.nodes()[index];
        debug!(system = node.name(), "running system");
        if let Some(failure) = execute_inline(node, world) {
            record_failure(stage, failure, &mut failures);
        }
        report.completion_order.push(index);
    }

    report.executed = report.completion_order.len();
    finish(report, started, failures)
}

impl SystemsExecutor for SequentialSystemsExecutor {
    fn kind(&self) -> ExecutorKind { ExecutorKind::Sequential }

    fn run(&self, _jobs: &JobSystem, world: &mut World, graph: &StageGraph) -> Result<StageReport, ExecutionError> {
        run_in_place(graph, world, 0..graph.len(), "sequential")
    }
}

impl SystemsExecutor for ReverseSequentialSystemsExecutor {
    fn kind(&self) -> ExecutorKind { ExecutorKind::ReverseSequential }

    fn run(&self, _jobs: &JobSystem, world: &mut World, graph: &StageGraph) -> Result<StageReport, ExecutionError> {
        run_in_place(graph, world, (0..graph.len()).rev(), "reverse_sequential")
    }
}
