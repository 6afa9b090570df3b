//! Error types for storage, registration, graph construction and execution.
//!
//! This module declares focused, composable error types used across the
//! engine. Each error carries enough context to make failures actionable
//! while remaining cheap to pass around or convert into the aggregate
//! [`ECSError`].
//!
//! ## Typical flow
//! Low-level storage operations return small, dedicated error types (e.g.
//! [`CapacityError`], [`TypeMismatchError`]). Higher-level orchestration code
//! uses `?` to bubble failures into [`StructuralError`], [`GraphError`] or
//! [`ExecutionError`], and finally into [`ECSError`].
//!
//! ## Fatal vs. recoverable
//! * [`GraphError`] is raised while building the schedule; an application that
//!   receives one must not start.
//! * [`CapacityError`] reports allocation failure while growing storage and is
//!   always returned, never panicked on.
//! * [`ExecutionError::StageFailed`] reports systems that failed during a
//!   stage, after every other node of that stage has finished.

use crate::engine::types::{AccessMode, ComponentID, Stage};


/// Returned when storage cannot grow to hold more entities or rows.
///
/// ### Fields
/// * `requested`: Total slots the operation attempted to hold.
/// * `capacity`: The upper bound (or current allocation) that prevented it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("storage limit reached ({requested} requested; capacity {capacity})")]
pub struct CapacityError {
    /// Total slots the operation attempted to hold.
    pub requested: u64,

    /// Capacity limiting the operation.
    pub capacity: u64,
}

/// Returned when an `Entity` handle is no longer valid, typically because it
/// was despawned or its generation no longer matches live storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("stale or dead entity reference")]
pub struct StaleEntityError;

/// Returned when a component value's type does not match the column it is
/// written into.
///
/// ### Fields
/// * `component_id`: Component whose column was addressed.
/// * `expected`: Type name the registry declares for that component.
/// * `actual`: Type name of the provided value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("type mismatch for component {component_id}: expected {expected}, actual {actual}")]
pub struct TypeMismatchError {
    /// Component whose column was addressed.
    pub component_id: ComponentID,

    /// Registered element type.
    pub expected: &'static str,

    /// Provided element type.
    pub actual: &'static str,
}

/// Errors raised by the component registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Registration attempted after [`freeze`](crate::engine::component::ComponentRegistry::freeze).
    #[error("component registry is frozen; cannot register {name}")]
    Frozen {
        /// Rust type name of the rejected component.
        name: &'static str,
    },

    /// The configured component capacity was exhausted.
    #[error("component capacity ({capacity}) exceeded")]
    CapacityExceeded {
        /// Configured maximum number of component types.
        capacity: usize,
    },

    /// A type was used before being registered.
    #[error("component type not registered: {name}")]
    NotRegistered {
        /// Rust type name of the unregistered component.
        name: &'static str,
    },

    /// A numeric id does not name a registered component.
    #[error("invalid component id {0}")]
    InvalidComponentId(ComponentID),
}

/// Errors raised by structural world changes (spawn, despawn, component
/// insertion and removal, archetype migration).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StructuralError {
    /// The entity handle is stale.
    #[error(transparent)]
    StaleEntity(#[from] StaleEntityError),

    /// Storage could not grow.
    #[error("allocation failed: {0}")]
    Allocation(#[from] CapacityError),

    /// A component value did not match its registered type.
    #[error(transparent)]
    TypeMismatch(#[from] TypeMismatchError),

    /// Registry lookup failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// An iteration named the same component in two positions, which would
    /// alias a mutable reference.
    #[error("component {0} requested more than once in one iteration")]
    DuplicateComponent(ComponentID),

    /// Component columns of one archetype disagreed on row count.
    ///
    /// This indicates a serious internal invariant violation.
    #[error("component storages became misaligned in archetype {archetype}: expected {expected} rows, found {found}")]
    MisalignedStorage {
        /// Archetype whose columns disagree.
        archetype: u32,
        /// Row count of the entity list.
        expected: usize,
        /// Row count of the offending column.
        found: usize,
    },
}

/// Errors raised while turning registered systems into a schedule.
///
/// All variants are fatal: the application must refuse to start.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// Two systems share a name.
    #[error("system `{0}` registered more than once")]
    DuplicateSystem(String),

    /// An explicit ordering names a system that was never registered.
    #[error("system `{system}` is ordered relative to unknown system `{missing}`")]
    UnknownSystem {
        /// System declaring the ordering.
        system: String,
        /// Name that could not be resolved.
        missing: String,
    },

    /// An explicit ordering contradicts stage order.
    ///
    /// Raised for `after` a system in a later stage and for `before` a
    /// system in an earlier stage.
    #[error("system `{system}` ({stage}) cannot be ordered against `{other}` ({other_stage}) across stages in that direction")]
    CrossStageOrdering {
        /// System declaring the ordering.
        system: String,
        /// Its stage.
        stage: Stage,
        /// The system named by the ordering.
        other: String,
        /// Stage of `other`.
        other_stage: Stage,
    },

    /// A system declares access to a component id no signature can hold.
    #[error("system `{system}` declares access to component {component_id}, which is outside the component capacity")]
    InvalidComponent {
        /// System declaring the access.
        system: String,
        /// The rejected id.
        component_id: ComponentID,
    },

    /// Explicit orderings form a cycle.
    #[error("dependency cycle in stage {stage}: {}", .systems.join(" -> "))]
    Cycle {
        /// Stage containing the cycle.
        stage: Stage,
        /// Systems on the cycle, in edge order; the first name is repeated at the end.
        systems: Vec<String>,
    },

    /// Two systems conflict on component access and nothing orders them.
    ///
    /// Only raised under [`ConflictPolicy::Strict`](crate::engine::graph::ConflictPolicy::Strict).
    #[error("systems `{first}` and `{second}` in stage {stage} conflict on components {components:?} and are not ordered")]
    AmbiguousConflict {
        /// Stage containing both systems.
        stage: Stage,
        /// Earlier-registered system.
        first: String,
        /// Later-registered system.
        second: String,
        /// Components both touch with at least one write.
        components: Vec<ComponentID>,
    },
}

/// Why a single system failed during a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemFailure {
    /// System name.
    pub system: String,

    /// Rendered error or panic message.
    pub message: String,

    /// `true` if the system panicked rather than returning an error.
    pub panicked: bool,
}

impl std::fmt::Display for SystemFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.panicked {
            write!(f, "`{}` panicked: {}", self.system, self.message)
        } else {
            write!(f, "`{}` failed: {}", self.system, self.message)
        }
    }
}

/// Errors raised while executing systems.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    /// A system touched a component outside its declared access set.
    #[error("system `{system}` has no declared {mode} access to component {component_id}")]
    UndeclaredAccess {
        /// Offending system.
        system: String,
        /// Component it tried to access.
        component_id: ComponentID,
        /// Requested access mode.
        mode: AccessMode,
    },

    /// A component type used by a system is not registered.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A world operation issued by a system failed.
    #[error(transparent)]
    Structural(#[from] StructuralError),

    /// One or more systems failed; every other node in the stage still ran.
    #[error("{} system(s) failed in stage {stage}: {}", .failures.len(), render_failures(.failures))]
    StageFailed {
        /// Stage that was executing.
        stage: Stage,
        /// Individual failures in completion order.
        failures: Vec<SystemFailure>,
    },

    /// A driver method was called in the wrong lifecycle phase.
    #[error("invalid lifecycle transition: {0}")]
    Lifecycle(&'static str),

    /// An internal lock was poisoned by a panicking thread.
    #[error("internal lock poisoned: {0}")]
    Poisoned(&'static str),

    /// A system-reported error that is not one of the above.
    #[error("{0}")]
    Custom(String),
}

fn render_failures(failures: &[SystemFailure]) -> String {
    failures.iter().map(|f| f.to_string()).collect::<Vec<_>>().join("; ")
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The TOML document did not match the expected schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value was syntactically valid but not acceptable.
    #[error("invalid config value `{field}`: {reason}")]
    Invalid {
        /// Dotted path of the offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// The worker pool could not be created.
    #[error("failed to build worker pool: {0}")]
    ThreadPool(String),
}

/// Aggregate error for the public API.
#[derive(Debug, thiserror::Error)]
pub enum ECSError {
    /// Structural world change failed.
    #[error(transparent)]
    Structural(#[from] StructuralError),

    /// Component registry failure.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Schedule construction failed.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// System execution failed.
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// Configuration failure.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<StaleEntityError> for ECSError {
    fn from(e: StaleEntityError) -> Self { ECSError::Structural(e.into()) }
}

impl From<CapacityError> for ECSError {
    fn from(e: CapacityError) -> Self { ECSError::Structural(e.into()) }
}

impl From<TypeMismatchError> for ECSError {
    fn from(e: TypeMismatchError) -> Self { ECSError::Structural(e.into()) }
}

/// Result alias used throughout the public API.
pub type ECSResult<T> = Result<T, ECSError>;

