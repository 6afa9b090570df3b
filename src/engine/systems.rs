//! System Abstractions
//!
//! A **system** is a unit of per-stage logic. It is registered with a
//! [`SystemDescriptor`] that declares:
//! - the [`Stage`] it belongs to,
//! - its [`ExecutionType`] (worker-eligible or pinned to the driving thread),
//! - the components it reads and writes ([`AccessSets`]),
//! - optional explicit ordering relative to other systems, by name.
//!
//! The graph builder turns these declarations into per-stage dependency
//! graphs; the executors then run each system with a [`SystemContext`].
//!
//! ## Thread Safety
//!
//! Systems never receive the world directly. [`SystemContext`] checks every
//! component access against the declared access set and fails with
//! [`ExecutionError::UndeclaredAccess`] otherwise. Because the graph builder
//! orders every pair of systems whose declared sets conflict, a checked
//! access can never race with another running system, and component memory
//! needs no locks.
//!
//! Structural changes are recorded as [`Command`]s through
//! [`SystemContext::defer`] and applied by the frame driver after the stage.

use crate::engine::commands::Command;
use crate::engine::component::{Bundle, Component};
use crate::engine::entity::Entity;
use crate::engine::error::ExecutionError;
use crate::engine::query::QuerySignature;
use crate::engine::types::{AccessMode, AccessSets, ComponentID, ExecutionType, Stage, COMPONENT_CAP};
use crate::engine::world::World;


/// A unit of executable logic operating on the world.
///
/// Systems must be `Send + Sync` so they can run on worker threads.
pub trait System: Send + Sync {
    /// Executes the system once.
    fn run(&self, ctx: &mut SystemContext<'_>) -> Result<(), ExecutionError>;
}

/// A [`System`] backed by a function or closure.
pub struct FnSystem<F>
where
    F: Fn(&mut SystemContext<'_>) -> Result<(), ExecutionError> + Send + Sync + 'static,
{
    f: F,
}

impl<F> FnSystem<F>
where
    F: Fn(&mut SystemContext<'_>) -> Result<(), ExecutionError> + Send + Sync + 'static,
{
    /// Wraps `f` as a system.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> System for FnSystem<F>
where
    F: Fn(&mut SystemContext<'_>) -> Result<(), ExecutionError> + Send + Sync + 'static,
{
    fn run(&self, ctx: &mut SystemContext<'_>) -> Result<(), ExecutionError> {
        (self.f)(ctx)
    }
}

/// Registration metadata for one system.
///
/// ## Example
/// ```ignore
/// let descriptor = SystemDescriptor::new("integrate", Stage::Update)
///     .reads(velocity)
///     .writes(position)
///     .after("apply_forces");
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SystemDescriptor {
    name: String,
    stage: Stage,
    execution: ExecutionType,
    access: AccessSets,
    after: Vec<String>,
    before: Vec<String>,
    out_of_range: Vec<ComponentID>,
}

impl SystemDescriptor {
    /// Describes a worker-eligible system named `name` in `stage`.
    pub fn new(name: impl Into<String>, stage: Stage) -> Self {
        Self {
            name: name.into(),
            stage,
            execution: ExecutionType::Default,
            access: AccessSets::default(),
            after: Vec::new(),
            before: Vec::new(),
            out_of_range: Vec::new(),
        }
    }

    /// Declares read access to `component_id`.
    pub fn reads(self, component_id: ComponentID) -> Self {
        self.declare(component_id, AccessMode::Read)
    }

    /// Declares write access to `component_id`.
    pub fn writes(self, component_id: ComponentID) -> Self {
        self.declare(component_id, AccessMode::Write)
    }

    // Out-of-range ids are kept aside so `ScheduleBuilder::build` can reject them.
    fn declare(mut self, component_id: ComponentID, mode: AccessMode) -> Self {
        if component_id as usize >= COMPONENT_CAP {
            self.out_of_range.push(component_id);
        } else {
            self.access.declare(component_id, mode);
        }
        self
    }

    /// Adds every component of `access` to the declared access.
    pub fn access(mut self, access: AccessSets) -> Self {
        self.access.read = self.access.read.union(&access.read);
        self.access.write = self.access.write.union(&access.write);
        self
    }

    /// Sets where the system executes.
    pub fn execution(mut self, execution: ExecutionType) -> Self {
        self.execution = execution;
        self
    }

    /// Requires the system to start only after `other` has completed.
    pub fn after(mut self, other: impl Into<String>) -> Self {
        self.after.push(other.into());
        self
    }

    /// Requires `other` to start only after this system has completed.
    pub fn before(mut self, other: impl Into<String>) -> Self {
        self.before.push(other.into());
        self
    }

    /// System name, unique within a schedule.
    pub fn name(&self) -> &str { &self.name }

    /// Stage the system runs in.
    pub fn stage(&self) -> Stage { self.stage }

    /// Execution type.
    pub fn execution_type(&self) -> ExecutionType { self.execution }

    /// Declared component access.
    pub fn access_sets(&self) -> AccessSets { self.access }

    /// Systems this one must follow.
    pub fn after_names(&self) -> &[String] { &self.after }

    /// Systems that must follow this one.
    pub fn before_names(&self) -> &[String] { &self.before }

    /// First declared component id that no signature can hold.
    pub(crate) fn first_out_of_range(&self) -> Option<ComponentID> { self.out_of_range.first().copied() }
}

/// Access-checked view of the world handed to a running system.
///
/// Typed reads and writes copy values in and out, so they take `&self`.
/// Bulk iteration and borrowed byte access take `&mut self`: a system can
/// never hold a reference into a column while issuing another access
/// through the same context.
pub struct SystemContext<'w> {
    world: &'w World,
    name: &'w str,
    stage: Stage,
    access: AccessSets,
}

impl<'w> SystemContext<'w> {
    pub(crate) fn new(world: &'w World, name: &'w str, stage: Stage, access: AccessSets) -> Self {
        Self { world, name, stage, access }
    }

    /// Name of the running system.
    #[inline]
    pub fn system_name(&self) -> &str { self.name }

    /// Stage being executed.
    #[inline]
    pub fn stage(&self) -> Stage { self.stage }

    /// Declared access of the running system.
    #[inline]
    pub fn access_sets(&self) -> &AccessSets { &self.access }

    fn check(&self, component_id: ComponentID, mode: AccessMode) -> Result<(), ExecutionError> {
        let allowed = match mode {
            AccessMode::Read => self.access.allows_read(component_id),
            AccessMode::Write => self.access.allows_write(component_id),
        };
        if allowed {
            Ok(())
        } else {
            Err(ExecutionError::UndeclaredAccess {
                system: self.name.to_owned(),
                component_id,
                mode,
            })
        }
    }

    /// Id of component type `T`.
    pub fn component_id<T: Component>(&self) -> Result<ComponentID, ExecutionError> {
        Ok(self.world.registry().require_id_of::<T>()?)
    }

    /// Number of live entities.
    #[inline]
    pub fn entity_count(&self) -> usize { self.world.entity_count() }

    /// Returns `true` if `entity` is live.
    #[inline]
    pub fn is_alive(&self, entity: Entity) -> bool { self.world.is_alive(entity) }

    /// Returns `true` if `entity` has `component_id`.
    ///
    /// Structure cannot change during a stage, so this needs no declared access.
    #[inline]
    pub fn has_component(&self, entity: Entity, component_id: ComponentID) -> bool {
        self.world.has_component(entity, component_id)
    }

    /// Raw bytes of one component of `entity`. Requires read access.
    pub fn component_bytes(&mut self, entity: Entity, component_id: ComponentID) -> Result<Option<&[u8]>, ExecutionError> {
        self.check(component_id, AccessMode::Read)?;
        Ok(self.world.get_component(entity, component_id))
    }

    /// Copy of component `T` of `entity`. Requires read access.
    pub fn get<T: Component>(&self, entity: Entity) -> Result<Option<T>, ExecutionError> {
        let component_id = self.component_id::<T>()?;
        self.check(component_id, AccessMode::Read)?;
        // SAFETY: declared read access; the schedule orders every writer of
        // this component relative to the running system.
        Ok(unsafe { self.world.read_copy::<T>(entity, component_id) }?)
    }

    /// Overwrites component `T` of `entity`. Requires write access.
    ///
    /// Returns `false` if the entity is stale or lacks the component.
    pub fn set<T: Component>(&self, entity: Entity, value: T) -> Result<bool, ExecutionError> {
        let component_id = self.component_id::<T>()?;
        self.check(component_id, AccessMode::Write)?;
        // SAFETY: declared write access; no other running system touches this
        // component and no column borrow of this context is alive.
        Ok(unsafe { self.world.write_in_place::<T>(entity, component_id, value) }?)
    }

    /// Calls `f` for every entity with `A`. Requires read access to `A`.
    pub fn for_each_read<A: Component>(
        &mut self,
        filter: Option<&QuerySignature>,
        mut f: impl FnMut(&A),
    ) -> Result<(), ExecutionError> {
        let a = self.component_id::<A>()?;
        self.check(a, AccessMode::Read)?;
        // SAFETY: declared read access, see `get`.
        Ok(unsafe { self.world.visit_read::<A>(a, filter, |_, value| f(value)) }?)
    }

    /// Calls `f` with the entity for every entity with `A`. Requires read access to `A`.
    pub fn for_each_entity_read<A: Component>(
        &mut self,
        filter: Option<&QuerySignature>,
        f: impl FnMut(Entity, &A),
    ) -> Result<(), ExecutionError> {
        let a = self.component_id::<A>()?;
        self.check(a, AccessMode::Read)?;
        // SAFETY: declared read access, see `get`.
        Ok(unsafe { self.world.visit_read::<A>(a, filter, f) }?)
    }

    /// Calls `f` with a mutable `A` for every entity with `A`. Requires write access to `A`.
    pub fn for_each_write<A: Component>(
        &mut self,
        filter: Option<&QuerySignature>,
        mut f: impl FnMut(&mut A),
    ) -> Result<(), ExecutionError> {
        let a = self.component_id::<A>()?;
        self.check(a, AccessMode::Write)?;
        // SAFETY: declared write access and `&mut self` excludes other
        // accesses through this context.
        Ok(unsafe { self.world.visit_write::<A>(a, filter, |_, value| f(value)) }?)
    }

    /// Calls `f` for every entity with `A` and `B`, writing `B`.
    pub fn for_each_read_write<A: Component, B: Component>(
        &mut self,
        filter: Option<&QuerySignature>,
        mut f: impl FnMut(&A, &mut B),
    ) -> Result<(), ExecutionError> {
        let a = self.component_id::<A>()?;
        let b = self.component_id::<B>()?;
        self.check(a, AccessMode::Read)?;
        self.check(b, AccessMode::Write)?;
        // SAFETY: as `for_each_read` for `a` and `for_each_write` for `b`.
        Ok(unsafe { self.world.visit_read_write::<A, B>(a, b, filter, |_, x, y| f(x, y)) }?)
    }

    /// Calls `f` for every entity with `A`, `B` and `C`, writing `C`.
    pub fn for_each_read2_write1<A: Component, B: Component, C: Component>(
        &mut self,
        filter: Option<&QuerySignature>,
        mut f: impl FnMut(&A, &B, &mut C),
    ) -> Result<(), ExecutionError> {
        let ids = [self.component_id::<A>()?, self.component_id::<B>()?, self.component_id::<C>()?];
        self.check(ids[0], AccessMode::Read)?;
        self.check(ids[1], AccessMode::Read)?;
        self.check(ids[2], AccessMode::Write)?;
        // SAFETY: as `for_each_read` for the first two ids and
        // `for_each_write` for the third.
        Ok(unsafe { self.world.visit_read2_write1::<A, B, C>(ids, filter, |_, x, y, z| f(x, y, z)) }?)
    }

    /// Records a structural change for application after the stage.
    pub fn defer(&self, command: Command) -> Result<(), ExecutionError> {
        self.world.defer(command)
    }

    /// Defers spawning an entity with `bundle`.
    pub fn spawn(&self, bundle: Bundle) -> Result<(), ExecutionError> {
        self.defer(Command::Spawn { bundle })
    }

    /// Defers despawning `entity`.
    pub fn despawn(&self, entity: Entity) -> Result<(), ExecutionError> {
        self.defer(Command::Despawn { entity })
    }

    /// Defers adding or overwriting component `T` on `entity`.
    pub fn insert<T: Component>(&self, entity: Entity, value: T) -> Result<(), ExecutionError> {
        let component_id = self.component_id::<T>()?;
        self.defer(Command::Insert { entity, bundle: Bundle::new().with(component_id, value) })
    }

    /// Defers removing `component_id` from `entity`.
    pub fn remove(&self, entity: Entity, component_id: ComponentID) -> Result<(), ExecutionError> {
        self.defer(Command::Remove { entity, component_id })
    }
}
