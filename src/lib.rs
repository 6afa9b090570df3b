//! # Titan Engine
//!
//! Entity-component-system core with a dependency-graph system scheduler.
//!
//! ## Design Goals
//! - Archetype-based storage: one contiguous block per component set
//! - Static access analysis instead of locks on component memory
//! - Deterministic schedule construction
//! - Parallel execution on a job system, with systems pinned to the driving
//!   thread where required
//!
//! ## Overview
//! 1. Register component types on a [`World`].
//! 2. Describe systems with [`SystemDescriptor`] and collect them in a
//!   [`ScheduleBuilder`]; `build` yields a [`Schedule`] or a [`GraphError`].
//! 3. Drive the schedule with a [`FrameDriver`]: `startup`, `run_frame`
//!   repeatedly, `shutdown`.

#![forbid(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![deny(dead_code)]

pub mod engine;
pub mod logging;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports (Public API)
// ─────────────────────────────────────────────────────────────────────────────

pub use engine::world::{World, EMPTY_ARCHETYPE};

pub use engine::entity::{
    Entity,
    EntityLocation,
};

pub use engine::component::{
    Bundle,
    Component,
    ComponentDesc,
    ComponentRegistry,
};

pub use engine::archetype::Archetype;

pub use engine::query::{QueryBuilder, QuerySignature};

pub use engine::commands::Command;

pub use engine::systems::{
    FnSystem,
    System,
    SystemContext,
    SystemDescriptor,
};

pub use engine::graph::{
    ConflictPolicy,
    Schedule,
    ScheduleBuilder,
    StageGraph,
    SystemNode,
};

pub use engine::jobs::{
    JobDescriptor,
    JobFailure,
    JobHandle,
    JobScope,
    JobSystem,
};

pub use engine::executor::{
    ExecutorKind,
    ExecutorSettings,
    OrderedSystemsExecutor,
    ReverseSequentialSystemsExecutor,
    SequentialSystemsExecutor,
    StageReport,
    SystemState,
    SystemsExecutor,
};

pub use engine::scheduler::{FrameDriver, FrameReport};

pub use engine::config::EngineConfig;

pub use engine::error::{
    CapacityError,
    ConfigError,
    ECSError,
    ECSResult,
    ExecutionError,
    GraphError,
    RegistryError,
    StaleEntityError,
    StructuralError,
    SystemFailure,
    TypeMismatchError,
};

pub use engine::types::{
    AccessMode,
    AccessSets,
    ArchetypeID,
    ComponentID,
    EntityID,
    ExecutionType,
    Signature,
    Stage,
    COMPONENT_CAP,
};

// ─────────────────────────────────────────────────────────────────────────────
// Prelude
// ─────────────────────────────────────────────────────────────────────────────

/// Commonly used types.
///
/// Import with:
/// ```rust
/// use titan_engine::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Bundle,
        Command,
        EngineConfig,
        Entity,
        ExecutionError,
        ExecutionType,
        FrameDriver,
        QueryBuilder,
        ScheduleBuilder,
        Stage,
        SystemContext,
        SystemDescriptor,
        World,
    };
}
