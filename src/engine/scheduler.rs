//! Frame driver and stage pipeline.
//!
//! [`FrameDriver`] owns the built [`Schedule`], the [`JobSystem`] and one
//! executor per [`Stage`]. It runs the fixed stage sequence:
//!
//! ```text
//! startup:   Init
//! per frame: PreUpdate -> Update -> PostUpdate -> Last
//! shutdown:  Shutdown
//! ```
//!
//! ## Structural synchronization
//!
//! Deferred commands are applied before and after every stage, on the
//! driving thread, while no system holds a view of the world.
//!
//! ## Lifecycle
//!
//! `startup` must be called exactly once before any frame, and nothing may
//! run after `shutdown`. Violations return [`ExecutionError::Lifecycle`].

use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use crate::engine::config::EngineConfig;
use crate::engine::error::{ConfigError, ExecutionError};
use crate::engine::executor::{ExecutorKind, StageReport, SystemsExecutor};
use crate::engine::graph::Schedule;
use crate::engine::jobs::JobSystem;
use crate::engine::types::Stage;
use crate::engine::world::World;


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Created,
    Running,
    ShutDown,
}

/// Reports for the stages of one frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameReport {
    /// Index of the frame, starting at 0.
    pub frame_index: u64,
    /// One report per frame stage, in execution order.
    pub stages: Vec<StageReport>,
    /// Wall-clock duration of the frame.
    pub elapsed: Duration,
}

impl FrameReport {
    /// Report for `stage`, if it ran in this frame.
    pub fn stage(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|report| report.stage == stage)
    }
}

/// Runs a [`Schedule`] against a [`World`] one stage at a time.
pub struct FrameDriver {
    schedule: Schedule,
    jobs: JobSystem,
    executors: Vec<Box<dyn SystemsExecutor>>,
    phase: Phase,
    frame_index: u64,
}

impl FrameDriver {
    /// Creates a driver with a worker pool and executors taken from `config`.
    pub fn new(schedule: Schedule, config: &EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let jobs = JobSystem::new(config.worker_threads)?;
        Ok(Self::with_job_system(schedule, jobs, config))
    }

    /// Creates a driver around an existing job system.
    pub fn with_job_system(schedule: Schedule, jobs: JobSystem, config: &EngineConfig) -> Self {
        let settings = config.executor_settings();
        let executors = Stage::ALL
            .iter()
            .map(|&stage| config.stages.get(stage).build(settings))
            .collect();
        Self { schedule, jobs, executors, phase: Phase::Created, frame_index: 0 }
    }

    /// The schedule being driven.
    pub fn schedule(&self) -> &Schedule { &self.schedule }

    /// The worker pool.
    pub fn job_system(&self) -> &JobSystem { &self.jobs }

    /// Number of frames completed so far.
    pub fn frame_index(&self) -> u64 { self.frame_index }

    /// Executor strategy used for `stage`.
    pub fn executor_kind(&self, stage: Stage) -> ExecutorKind {
        self.executors[stage.index()].kind()
    }

    /// Returns `true` between `startup` and `shutdown`.
    pub fn is_running(&self) -> bool { self.phase == Phase::Running }

    fn apply_deferred(world: &mut World) -> Result<(), ExecutionError> {
        world.apply_deferred()?;
        Ok(())
    }

    /// Runs a single stage, applying deferred commands before and after.
    ///
    /// Any stage may be run this way before shutdown; no lifecycle transition
    /// takes place.
    pub fn run_stage(&mut self, stage: Stage, world: &mut World) -> Result<StageReport, ExecutionError> {
        if self.phase == Phase::ShutDown {
            return Err(ExecutionError::Lifecycle("stage run after shutdown"));
        }
        self.execute(stage, world)
    }

    fn execute(&self, stage: Stage, world: &mut World) -> Result<StageReport, ExecutionError> {
        Self::apply_deferred(world)?;
        let graph = self.schedule.stage(stage);
        let result = self.executors[stage.index()].run(&self.jobs, world, graph);
        let applied = Self::apply_deferred(world);
        match (result, applied) {
            (Ok(report), Ok(())) => Ok(report),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            // The stage failure is the primary error.
            (Err(e), Err(apply)) => {
                error!(stage = %stage, error = %apply, "deferred commands failed after a failed stage");
                Err(e)
            }
        }
    }

    /// Runs `Init` once.
    pub fn startup(&mut self, world: &mut World) -> Result<StageReport, ExecutionError> {
        match self.phase {
            Phase::Created => {}
            Phase::Running => return Err(ExecutionError::Lifecycle("startup called twice")),
            Phase::ShutDown => return Err(ExecutionError::Lifecycle("startup after shutdown")),
        }
        info!(
            systems = self.schedule.system_count(),
            workers = self.jobs.worker_count(),
            "starting up"
        );
        self.phase = Phase::Running;
        self.execute(Stage::Init, world)
    }

    /// Runs one frame: `PreUpdate`, `Update`, `PostUpdate`, `Last`.
    ///
    /// A failing stage ends the frame early with its error, and the frame is
    /// not counted.
    pub fn run_frame(&mut self, world: &mut World) -> Result<FrameReport, ExecutionError> {
        match self.phase {
            Phase::Running => {}
            Phase::Created => return Err(ExecutionError::Lifecycle("frame run before startup")),
            Phase::ShutDown => return Err(ExecutionError::Lifecycle("frame run after shutdown")),
        }

        let started = Instant::now();
        let mut stages = Vec::with_capacity(Stage::FRAME.len());
        for stage in Stage::FRAME {
            stages.push(self.execute(stage, world)?);
        }

        let report = FrameReport { frame_index: self.frame_index, stages, elapsed: started.elapsed() };
        debug!(frame = report.frame_index, elapsed_us = report.elapsed.as_micros() as u64, "frame finished");
        self.frame_index += 1;
        Ok(report)
    }

    /// Runs `Shutdown` once. The driver cannot be used afterwards, even if the
    /// stage fails.
    pub fn shutdown(&mut self, world: &mut World) -> Result<StageReport, ExecutionError> {
        match self.phase {
            Phase::Running => {}
            Phase::Created => return Err(ExecutionError::Lifecycle("shutdown before startup")),
            Phase::ShutDown => return Err(ExecutionError::Lifecycle("shutdown called twice")),
        }
        self.phase = Phase::ShutDown;
        info!(frames = self.frame_index, "shutting down");
        self.execute(Stage::Shutdown, world)
    }
}
