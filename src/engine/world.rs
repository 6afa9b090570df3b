//! The world: archetype registry, entity table and deferred command queue.
//!
//! [`World`] owns every archetype and is the single place where structural
//! changes happen. It maps each distinct component [`Signature`] in use to
//! exactly one [`Archetype`], created on demand, and keeps every entity's
//! location current as rows move between archetypes.
//!
//! ## Access model
//!
//! * Structural operations (`spawn`, `despawn`, `insert`, `remove`,
//!   `apply_deferred`) take `&mut self` and therefore never overlap with a
//!   running stage: executors borrow the world mutably for the duration of a
//!   stage.
//! * During a stage, systems see the world through
//!   [`SystemContext`](crate::engine::systems::SystemContext), which hands
//!   out column data without locks. The crate-internal `visit_*` methods
//!   below are the unsafe primitives behind that view; the graph builder's
//!   conflict analysis discharges their safety obligations.
//!
//! ## Invariants
//! * Archetype `0` is the empty signature and always exists.
//! * `signature_map[archetypes[i].signature()] == i` for every archetype.
//! * Every live entity's location names a row of the archetype whose
//!   signature equals the entity's component set.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tracing::{debug, warn};

use crate::engine::archetype::Archetype;
use crate::engine::commands::Command;
use crate::engine::component::{Bundle, Component, ComponentRegistry};
use crate::engine::entity::{Entities, Entity, EntityLocation};
use crate::engine::error::{ExecutionError, RegistryError, StaleEntityError, StructuralError};
use crate::engine::query::QuerySignature;
use crate::engine::types::{ArchetypeID, ComponentID, RowID, Signature};


/// Identifier of the archetype holding entities without components.
pub const EMPTY_ARCHETYPE: ArchetypeID = 0;

/// Archetype registry and entity store.
pub struct World {
    registry: ComponentRegistry,
    archetypes: Vec<Archetype>,
    signature_map: HashMap<Signature, ArchetypeID>,
    entities: Entities,
    deferred: Mutex<Vec<Command>>,
}

impl Default for World {
    fn default() -> Self { Self::new() }
}

impl World {
    /// Creates an empty world with its own component registry.
    pub fn new() -> Self {
        let mut signature_map = HashMap::new();
        signature_map.insert(Signature::default(), EMPTY_ARCHETYPE);
        Self {
            registry: ComponentRegistry::new(),
            archetypes: vec![Archetype::empty(EMPTY_ARCHETYPE)],
            signature_map,
            entities: Entities::new(),
            deferred: Mutex::new(Vec::new()),
        }
    }

    // ── Registration ────────────────────────────────────────────────────────

    /// Registers component type `T`, returning its id. Idempotent.
    pub fn register_component<T: Component>(&mut self) -> Result<ComponentID, RegistryError> {
        self.registry.register::<T>()
    }

    /// Forbids any further component registration.
    pub fn freeze_components(&mut self) {
        self.registry.freeze();
    }

    /// Id of component type `T`, if registered.
    #[inline]
    pub fn component_id<T: Component>(&self) -> Option<ComponentID> {
        self.registry.id_of::<T>()
    }

    /// The component registry.
    #[inline]
    pub fn registry(&self) -> &ComponentRegistry { &self.registry }

    // ── Introspection ───────────────────────────────────────────────────────

    /// Number of live entities.
    #[inline]
    pub fn entity_count(&self) -> usize { self.entities.len() }

    /// Number of archetypes created so far, including the empty one.
    #[inline]
    pub fn archetype_count(&self) -> usize { self.archetypes.len() }

    /// All archetypes, indexed by [`ArchetypeID`].
    #[inline]
    pub fn archetypes(&self) -> &[Archetype] { &self.archetypes }

    /// Archetype with the given id.
    #[inline]
    pub fn archetype(&self, archetype_id: ArchetypeID) -> Option<&Archetype> {
        self.archetypes.get(archetype_id as usize)
    }

    /// Archetype id for `signature`, if one was created.
    #[inline]
    pub fn archetype_for(&self, signature: &Signature) -> Option<ArchetypeID> {
        self.signature_map.get(signature).copied()
    }

    /// Returns `true` if `entity` is live.
    #[inline]
    pub fn is_alive(&self, entity: Entity) -> bool { self.entities.is_alive(entity) }

    /// Current storage location of `entity`.
    #[inline]
    pub fn location(&self, entity: Entity) -> Option<EntityLocation> {
        self.entities.location(entity)
    }

    /// Archetype currently holding `entity`.
    #[inline]
    pub fn archetype_of(&self, entity: Entity) -> Option<ArchetypeID> {
        self.entities.location(entity).map(|location| location.archetype)
    }

    // ── Component access ────────────────────────────────────────────────────

    /// Returns `true` if `entity` is live and has `component_id`.
    ///
    /// Unknown and stale entities report `false`.
    #[inline]
    pub fn has_component(&self, entity: Entity, component_id: ComponentID) -> bool {
        self.entities
            .location(entity)
            .and_then(|location| self.archetypes.get(location.archetype as usize))
            .is_some_and(|archetype| archetype.has(component_id))
    }

    /// Raw bytes of one component of `entity`.
    ///
    /// The slice points into archetype storage and is invalidated by any
    /// structural change, which the borrow on `self` enforces.
    pub fn get_component(&self, entity: Entity, component_id: ComponentID) -> Option<&[u8]> {
        let location = self.entities.location(entity)?;
        self.archetypes
            .get(location.archetype as usize)?
            .column(component_id)?
            .row_bytes(location.row as usize)
    }

    /// Typed reference to component `T` of `entity`.
    pub fn get<T: Component>(&self, entity: Entity) -> Option<&T> {
        let component_id = self.registry.id_of::<T>()?;
        let location = self.entities.location(entity)?;
        self.archetypes
            .get(location.archetype as usize)?
            .column_typed::<T>(component_id)?
            .get(location.row as usize)
    }

    /// Typed mutable reference to component `T` of `entity`.
    pub fn get_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        let component_id = self.registry.id_of::<T>()?;
        let location = self.entities.location(entity)?;
        self.archetypes
            .get_mut(location.archetype as usize)?
            .column_typed_mut::<T>(component_id)?
            .get_mut(location.row as usize)
    }

    // ── Structural changes ──────────────────────────────────────────────────

    fn get_or_create_archetype(&mut self, signature: &Signature) -> Result<ArchetypeID, StructuralError> {
        if let Some(&archetype_id) = self.signature_map.get(signature) {
            return Ok(archetype_id);
        }

        let archetype_id = self.archetypes.len() as ArchetypeID;
        let archetype = Archetype::new(archetype_id, *signature, &self.registry)?;
        self.archetypes.push(archetype);
        self.signature_map.insert(*signature, archetype_id);
        debug!(archetype = archetype_id, components = signature.len(), "created archetype");
        Ok(archetype_id)
    }

    #[inline]
    fn archetype_pair_mut(
        archetypes: &mut [Archetype],
        a: ArchetypeID,
        b: ArchetypeID,
    ) -> (&mut Archetype, &mut Archetype) {
        debug_assert_ne!(a, b);

        let (low, high) = if a < b { (a, b) } else { (b, a) };
        let (head, tail) = archetypes.split_at_mut(high as usize);
        let low_ref = &mut head[low as usize];
        let high_ref = &mut tail[0];

        if a < b { (low_ref, high_ref) } else { (high_ref, low_ref) }
    }

    fn finish_move(&mut self, entity: Entity, destination: EntityLocation, swapped: Option<Entity>, vacated: EntityLocation) {
        self.entities.set_location(entity, destination);
        if let Some(moved) = swapped {
            self.entities.set_location(moved, vacated);
        }
    }

    /// Spawns an entity with the components in `bundle`.
    pub fn spawn(&mut self, bundle: Bundle) -> Result<Entity, StructuralError> {
        bundle.validate(&self.registry)?;
        let archetype_id = self.get_or_create_archetype(&bundle.signature())?;

        let archetype = &mut self.archetypes[archetype_id as usize];
        archetype.try_reserve(1)?;
        let row = archetype.len() as RowID;

        let entity = self.entities.spawn(EntityLocation { archetype: archetype_id, row })?;
        if let Err(e) = self.archetypes[archetype_id as usize].push_bundle(entity, &bundle) {
            self.entities.despawn(entity);
            return Err(e);
        }
        Ok(entity)
    }

    /// Spawns an entity without components.
    pub fn spawn_empty(&mut self) -> Result<Entity, StructuralError> {
        self.spawn(Bundle::new())
    }

    /// Despawns `entity`. Returns `false` for unknown or stale handles.
    pub fn despawn(&mut self, entity: Entity) -> bool {
        let Some(location) = self.entities.location(entity) else { return false };
        let Some(archetype) = self.archetypes.get_mut(location.archetype as usize) else { return false };

        if let Some(moved) = archetype.swap_remove_row(location.row) {
            self.entities.set_location(moved, location);
        }
        self.entities.despawn(entity)
    }

    /// Adds or overwrites every component in `bundle` on `entity`.
    ///
    /// If the bundle adds components the entity lacks, the entity's row moves
    /// to the archetype for the combined signature.
    pub fn insert_bundle(&mut self, entity: Entity, bundle: &Bundle) -> Result<(), StructuralError> {
        bundle.validate(&self.registry)?;
        let location = self.entities.location(entity).ok_or(StaleEntityError)?;
        let source_id = location.archetype;
        let source_signature = *self.archetypes[source_id as usize].signature();
        let destination_signature = source_signature.union(&bundle.signature());

        if destination_signature == source_signature {
            let archetype = &mut self.archetypes[source_id as usize];
            for entry in bundle.entries() {
                archetype.write_component_bytes(entry.component_id, location.row, &entry.bytes)?;
            }
            return Ok(());
        }

        let destination_id = self.get_or_create_archetype(&destination_signature)?;
        let (source, destination) = Self::archetype_pair_mut(&mut self.archetypes, source_id, destination_id);

        let moved = source.move_row_to(destination, location.row)?;
        for entry in bundle.entries() {
            if source_signature.has(entry.component_id) {
                destination.write_component_bytes(entry.component_id, moved.destination_row, &entry.bytes)?;
            } else {
                destination.push_component_bytes(entry.component_id, &entry.bytes)?;
            }
        }
        destination.check_alignment()?;

        let target = EntityLocation { archetype: destination_id, row: moved.destination_row };
        self.finish_move(entity, target, moved.swapped, location);
        Ok(())
    }

    /// Adds component `value` to `entity`, or overwrites it if present.
    pub fn insert<T: Component>(&mut self, entity: Entity, value: T) -> Result<(), StructuralError> {
        let component_id = self.registry.require_id_of::<T>()?;
        self.insert_bundle(entity, &Bundle::new().with(component_id, value))
    }

    /// Removes `component_id` from `entity`.
    ///
    /// Returns `Ok(false)` if the entity did not have the component. Removing
    /// the last component leaves the entity alive in the empty archetype.
    pub fn remove_component(&mut self, entity: Entity, component_id: ComponentID) -> Result<bool, StructuralError> {
        let location = self.entities.location(entity).ok_or(StaleEntityError)?;
        let source_id = location.archetype;
        let source_signature = *self.archetypes[source_id as usize].signature();
        if !source_signature.has(component_id) {
            return Ok(false);
        }

        let mut destination_signature = source_signature;
        destination_signature.clear(component_id);
        let destination_id = self.get_or_create_archetype(&destination_signature)?;
        let (source, destination) = Self::archetype_pair_mut(&mut self.archetypes, source_id, destination_id);

        let moved = source.move_row_to(destination, location.row)?;
        destination.check_alignment()?;

        let target = EntityLocation { archetype: destination_id, row: moved.destination_row };
        self.finish_move(entity, target, moved.swapped, location);
        Ok(true)
    }

    /// Removes component `T` from `entity`, returning its last value.
    pub fn remove<T: Component>(&mut self, entity: Entity) -> Result<Option<T>, StructuralError> {
        let component_id = self.registry.require_id_of::<T>()?;
        if !self.entities.is_alive(entity) {
            return Err(StaleEntityError.into());
        }
        let Some(value) = self.get::<T>(entity).copied() else { return Ok(None) };
        self.remove_component(entity, component_id)?;
        Ok(Some(value))
    }

    // ── Deferred commands ───────────────────────────────────────────────────

    /// Queues `command` for the next [`World::apply_deferred`].
    ///
    /// Callable through a shared reference, so systems running in parallel
    /// can record commands.
    pub fn defer(&self, command: Command) -> Result<(), ExecutionError> {
        self.deferred
            .lock()
            .map_err(|_| ExecutionError::Poisoned("deferred command queue"))?
            .push(command);
        Ok(())
    }

    /// Number of queued commands.
    pub fn pending_commands(&self) -> usize {
        self.deferred.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Applies queued commands in recording order and returns how many took
    /// effect.
    ///
    /// Commands addressing stale entities are skipped with a warning. Any
    /// other failure stops application and is returned; commands after the
    /// failing one are discarded.
    pub fn apply_deferred(&mut self) -> Result<usize, StructuralError> {
        let commands = std::mem::take(self.deferred.get_mut().unwrap_or_else(PoisonError::into_inner));
        let total = commands.len();
        let mut applied = 0;

        for command in commands {
            let kind = command.kind();
            let target = command.target();
            match self.apply_command(command) {
                Ok(()) => applied += 1,
                Err(StructuralError::StaleEntity(_)) => {
                    warn!(command = kind, entity = ?target, "skipping deferred command for stale entity");
                }
                Err(e) => return Err(e),
            }
        }

        if total > 0 {
            debug!(applied, skipped = total - applied, "applied deferred commands");
        }
        Ok(applied)
    }

    fn apply_command(&mut self, command: Command) -> Result<(), StructuralError> {
        match command {
            Command::Spawn { bundle } => self.spawn(bundle).map(|_| ()),
            Command::Despawn { entity } => {
                if self.despawn(entity) { Ok(()) } else { Err(StaleEntityError.into()) }
            }
            Command::Insert { entity, bundle } => self.insert_bundle(entity, &bundle),
            Command::Remove { entity, component_id } => self.remove_component(entity, component_id).map(|_| ()),
        }
    }

    // ── Bulk iteration ──────────────────────────────────────────────────────

    fn matching<'a>(
        &'a self,
        filter: Option<&QuerySignature>,
        components: &[ComponentID],
    ) -> impl Iterator<Item = &'a Archetype> + 'a {
        let query = filter.copied().unwrap_or_default().requiring(components);
        self.archetypes
            .iter()
            .filter(move |archetype| !archetype.is_empty() && query.matches(archetype.signature()))
    }

    fn distinct(components: &[ComponentID]) -> Result<(), StructuralError> {
        for (i, a) in components.iter().enumerate() {
            if components[i + 1..].contains(a) {
                return Err(StructuralError::DuplicateComponent(*a));
            }
        }
        Ok(())
    }

    /// Visits every entity with component `a`.
    ///
    /// # Safety
    /// No mutable slice of any `a` column may be alive during the call.
    pub(crate) unsafe fn visit_read<A: Component>(
        &self,
        a: ComponentID,
        filter: Option<&QuerySignature>,
        mut f: impl FnMut(Entity, &A),
    ) -> Result<(), StructuralError> {
        self.registry.check_type::<A>(a)?;
        for archetype in self.matching(filter, &[a]) {
            let Some(column) = archetype.column_typed::<A>(a) else { continue };
            let values = unsafe { column.slice_shared() };
            for (&entity, value) in archetype.entities().iter().zip(values) {
                f(entity, value);
            }
        }
        Ok(())
    }

    /// Visits every entity with component `a`, mutably.
    ///
    /// # Safety
    /// The caller must hold exclusive access to every `a` column.
    pub(crate) unsafe fn visit_write<A: Component>(
        &self,
        a: ComponentID,
        filter: Option<&QuerySignature>,
        mut f: impl FnMut(Entity, &mut A),
    ) -> Result<(), StructuralError> {
        self.registry.check_type::<A>(a)?;
        for archetype in self.matching(filter, &[a]) {
            let Some(column) = archetype.column_typed::<A>(a) else { continue };
            let values = unsafe { column.slice_unchecked_mut() };
            for (&entity, value) in archetype.entities().iter().zip(values) {
                f(entity, value);
            }
        }
        Ok(())
    }

    /// Visits every entity with components `a` and `b`, writing `b`.
    ///
    /// # Safety
    /// Obligations of [`World::visit_read`] for `a` and of
    /// [`World::visit_write`] for `b`.
    pub(crate) unsafe fn visit_read_write<A: Component, B: Component>(
        &self,
        a: ComponentID,
        b: ComponentID,
        filter: Option<&QuerySignature>,
        mut f: impl FnMut(Entity, &A, &mut B),
    ) -> Result<(), StructuralError> {
        Self::distinct(&[a, b])?;
        self.registry.check_type::<A>(a)?;
        self.registry.check_type::<B>(b)?;
        for archetype in self.matching(filter, &[a, b]) {
            let (Some(a_column), Some(b_column)) =
                (archetype.column_typed::<A>(a), archetype.column_typed::<B>(b)) else { continue };
            let a_values = unsafe { a_column.slice_shared() };
            let b_values = unsafe { b_column.slice_unchecked_mut() };
            for ((&entity, a_value), b_value) in archetype.entities().iter().zip(a_values).zip(b_values) {
                f(entity, a_value, b_value);
            }
        }
        Ok(())
    }

    /// Visits every entity with components `a`, `b` and `c`, writing `c`.
    ///
    /// # Safety
    /// Obligations of [`World::visit_read`] for `a` and `b`, and of
    /// [`World::visit_write`] for `c`.
    pub(crate) unsafe fn visit_read2_write1<A: Component, B: Component, C: Component>(
        &self,
        [a, b, c]: [ComponentID; 3],
        filter: Option<&QuerySignature>,
        mut f: impl FnMut(Entity, &A, &B, &mut C),
    ) -> Result<(), StructuralError> {
        Self::distinct(&[a, c])?;
        Self::distinct(&[b, c])?;
        self.registry.check_type::<A>(a)?;
        self.registry.check_type::<B>(b)?;
        self.registry.check_type::<C>(c)?;
        for archetype in self.matching(filter, &[a, b, c]) {
            let (Some(a_column), Some(b_column), Some(c_column)) = (
                archetype.column_typed::<A>(a),
                archetype.column_typed::<B>(b),
                archetype.column_typed::<C>(c),
            ) else { continue };
            let a_values = unsafe { a_column.slice_shared() };
            let b_values = unsafe { b_column.slice_shared() };
            let c_values = unsafe { c_column.slice_unchecked_mut() };
            let rows = archetype.entities().iter().zip(a_values).zip(b_values).zip(c_values);
            for (((&entity, a_value), b_value), c_value) in rows {
                f(entity, a_value, b_value, c_value);
            }
        }
        Ok(())
    }

    /// Copies component `T` of `entity` out of storage.
    ///
    /// # Safety
    /// Obligations of [`World::visit_read`] for `component_id`.
    pub(crate) unsafe fn read_copy<T: Component>(&self, entity: Entity, component_id: ComponentID) -> Result<Option<T>, StructuralError> {
        self.registry.check_type::<T>(component_id)?;
        let Some(location) = self.entities.location(entity) else { return Ok(None) };
        let value = self.archetypes
            .get(location.archetype as usize)
            .and_then(|archetype| archetype.column_typed::<T>(component_id))
            .and_then(|column| unsafe { column.slice_shared() }.get(location.row as usize).copied());
        Ok(value)
    }

    /// Overwrites component `T` of `entity` in place.
    ///
    /// Returns `Ok(false)` if the entity is stale or lacks the component.
    ///
    /// # Safety
    /// Obligations of [`World::visit_write`] for `component_id`.
    pub(crate) unsafe fn write_in_place<T: Component>(&self, entity: Entity, component_id: ComponentID, value: T) -> Result<bool, StructuralError> {
        self.registry.check_type::<T>(component_id)?;
        let Some(location) = self.entities.location(entity) else { return Ok(false) };
        let written = self.archetypes
            .get(location.archetype as usize)
            .and_then(|archetype| archetype.column_typed::<T>(component_id))
            .is_some_and(|column| unsafe { column.write_unchecked(location.row as usize, value) });
        Ok(written)
    }

    /// Calls `f` for every entity with component `A`.
    pub fn for_each_read<A: Component>(
        &self,
        filter: Option<&QuerySignature>,
        mut f: impl FnMut(&A),
    ) -> Result<(), StructuralError> {
        let a = self.registry.require_id_of::<A>()?;
        // SAFETY: a shared borrow of the world cannot coexist with a running
        // stage, so no mutable column slice is alive.
        unsafe { self.visit_read::<A>(a, filter, |_, value| f(value)) }
    }

    /// Calls `f` with the entity handle for every entity with component `A`.
    pub fn for_each_entity_read<A: Component>(
        &self,
        filter: Option<&QuerySignature>,
        f: impl FnMut(Entity, &A),
    ) -> Result<(), StructuralError> {
        let a = self.registry.require_id_of::<A>()?;
        // SAFETY: see `for_each_read`.
        unsafe { self.visit_read::<A>(a, filter, f) }
    }

    /// Calls `f` with a mutable `A` for every entity that has one.
    pub fn for_each_write<A: Component>(
        &mut self,
        filter: Option<&QuerySignature>,
        mut f: impl FnMut(&mut A),
    ) -> Result<(), StructuralError> {
        let a = self.registry.require_id_of::<A>()?;
        // SAFETY: `&mut self` is exclusive.
        unsafe { self.visit_write::<A>(a, filter, |_, value| f(value)) }
    }

    /// Calls `f` for every entity with `A` and `B`, writing `B`.
    pub fn for_each_read_write<A: Component, B: Component>(
        &mut self,
        filter: Option<&QuerySignature>,
        mut f: impl FnMut(&A, &mut B),
    ) -> Result<(), StructuralError> {
        let a = self.registry.require_id_of::<A>()?;
        let b = self.registry.require_id_of::<B>()?;
        // SAFETY: `&mut self` is exclusive; `visit_read_write` rejects `a == b`.
        unsafe { self.visit_read_write::<A, B>(a, b, filter, |_, x, y| f(x, y)) }
    }

    /// Calls `f` for every entity with `A`, `B` and `C`, writing `C`.
    pub fn for_each_read2_write1<A: Component, B: Component, C: Component>(
        &mut self,
        filter: Option<&QuerySignature>,
        mut f: impl FnMut(&A, &B, &mut C),
    ) -> Result<(), StructuralError> {
        let ids = [
            self.registry.require_id_of::<A>()?,
            self.registry.require_id_of::<B>()?,
            self.registry.require_id_of::<C>()?,
        ];
        // SAFETY: `&mut self` is exclusive; the written column is checked
        // distinct from both read columns.
        unsafe { self.visit_read2_write1::<A, B, C>(ids, filter, |_, x, y, z| f(x, y, z)) }
    }
}
