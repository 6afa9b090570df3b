//! Archetype storage: one storage block per distinct component set.
//!
//! An [`Archetype`] holds every entity whose component set equals its
//! [`Signature`]. For each component in the signature it owns one contiguous
//! column; row `i` of every column, together with `entities[i]`, describes a
//! single entity.
//!
//! ## Invariants
//! - All columns have exactly `entities.len()` rows.
//! - `columns[id].is_some()` if and only if `signature.has(id)`.
//! - Rows are dense: removal swaps the last row into the vacated slot.
//!
//! Structural methods take `&mut self` and are only reachable through
//! `&mut World`, so they can never overlap with running systems.

use crate::engine::component::{Bundle, Component, ComponentRegistry};
use crate::engine::entity::Entity;
use crate::engine::error::{CapacityError, RegistryError, StructuralError};
use crate::engine::storage::{Column, ErasedColumn};
use crate::engine::types::{ArchetypeID, ComponentID, RowID, Signature, COMPONENT_CAP};


/// Stores entities that share an identical component signature.
pub struct Archetype {
    archetype_id: ArchetypeID,
    signature: Signature,
    columns: Vec<Option<Box<dyn ErasedColumn>>>,
    entities: Vec<Entity>,
}

/// Result of moving a row out of an archetype.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RowMove {
    /// Row the entity now occupies in the destination.
    pub destination_row: RowID,
    /// Entity that was swapped into the vacated source row, if any.
    pub swapped: Option<Entity>,
}

impl Archetype {
    /// Creates an empty archetype with one empty column per component in `signature`.
    pub fn new(
        archetype_id: ArchetypeID,
        signature: Signature,
        registry: &ComponentRegistry,
    ) -> Result<Self, RegistryError> {
        let mut archetype = Self::empty(archetype_id);
        for component_id in signature.iterate_over_components() {
            archetype.columns[component_id as usize] = Some(registry.make_empty_column(component_id)?);
        }
        archetype.signature = signature;
        Ok(archetype)
    }

    /// Creates the archetype for entities without components.
    pub fn empty(archetype_id: ArchetypeID) -> Self {
        Self {
            archetype_id,
            signature: Signature::default(),
            columns: (0..COMPONENT_CAP).map(|_| None).collect(),
            entities: Vec::new(),
        }
    }

    /// Identifier, stable for the archetype's lifetime.
    #[inline]
    pub fn archetype_id(&self) -> ArchetypeID { self.archetype_id }

    /// Component set stored here.
    #[inline]
    pub fn signature(&self) -> &Signature { &self.signature }

    /// Number of entities stored.
    #[inline]
    pub fn len(&self) -> usize { self.entities.len() }

    /// Returns `true` if no entity is stored.
    #[inline]
    pub fn is_empty(&self) -> bool { self.entities.is_empty() }

    /// Entities in row order.
    #[inline]
    pub fn entities(&self) -> &[Entity] { &self.entities }

    /// Returns `true` if the archetype stores `component_id`.
    #[inline]
    pub fn has(&self, component_id: ComponentID) -> bool { self.signature.has(component_id) }

    /// Type-erased column for `component_id`.
    #[inline]
    pub fn column(&self, component_id: ComponentID) -> Option<&dyn ErasedColumn> {
        self.columns.get(component_id as usize)?.as_deref()
    }

    /// Typed column for `component_id`.
    #[inline]
    pub fn column_typed<T: Component>(&self, component_id: ComponentID) -> Option<&Column<T>> {
        self.column(component_id)?.as_any().downcast_ref::<Column<T>>()
    }

    /// Typed column for `component_id`, mutably.
    #[inline]
    pub fn column_typed_mut<T: Component>(&mut self, component_id: ComponentID) -> Option<&mut Column<T>> {
        self.columns
            .get_mut(component_id as usize)?
            .as_deref_mut()?
            .as_any_mut()
            .downcast_mut::<Column<T>>()
    }

    /// Reserves room for `additional` rows in every column.
    pub fn try_reserve(&mut self, additional: usize) -> Result<(), CapacityError> {
        self.entities.try_reserve(additional).map_err(|_| CapacityError {
            requested: (self.entities.len() + additional) as u64,
            capacity: self.entities.capacity() as u64,
        })?;
        for column in self.columns.iter_mut().flatten() {
            column.try_reserve(additional)?;
        }
        Ok(())
    }

    /// Appends `entity` with the values in `bundle`.
    ///
    /// `bundle` must hold exactly the components of this archetype and must
    /// already be validated against the registry.
    pub fn push_bundle(&mut self, entity: Entity, bundle: &Bundle) -> Result<RowID, StructuralError> {
        debug_assert_eq!(bundle.signature(), self.signature);
        self.try_reserve(1)?;

        for entry in bundle.entries() {
            let column = self.columns[entry.component_id as usize]
                .as_deref_mut()
                .ok_or(RegistryError::InvalidComponentId(entry.component_id))?;
            column.push_bytes(entry.component_id, &entry.bytes)?;
        }
        let row = self.entities.len() as RowID;
        self.entities.push(entity);
        self.check_alignment()?;
        Ok(row)
    }

    /// Appends the bytes of a component that the current last row is missing.
    ///
    /// Used after [`Archetype::move_row_to`] to fill a newly-added component.
    pub fn push_component_bytes(&mut self, component_id: ComponentID, bytes: &[u8]) -> Result<(), StructuralError> {
        let column = self.columns
            .get_mut(component_id as usize)
            .and_then(|c| c.as_deref_mut())
            .ok_or(RegistryError::InvalidComponentId(component_id))?;
        column.push_bytes(component_id, bytes)?;
        Ok(())
    }

    /// Overwrites one component of an existing row.
    pub fn write_component_bytes(&mut self, component_id: ComponentID, row: RowID, bytes: &[u8]) -> Result<(), StructuralError> {
        let column = self.columns
            .get_mut(component_id as usize)
            .and_then(|c| c.as_deref_mut())
            .ok_or(RegistryError::InvalidComponentId(component_id))?;
        column.write_bytes(component_id, row as usize, bytes)?;
        Ok(())
    }

    /// Removes `row`, compacting by swapping in the last row.
    ///
    /// Returns the entity that now occupies `row`, if one was swapped in.
    pub fn swap_remove_row(&mut self, row: RowID) -> Option<Entity> {
        let row = row as usize;
        for column in self.columns.iter_mut().flatten() {
            column.swap_remove_discard(row);
        }
        self.entities.swap_remove(row);
        self.entities.get(row).copied()
    }

    /// Moves `row` into `destination`.
    ///
    /// Components present in both archetypes are copied across; components
    /// only present here are dropped. Components only present in
    /// `destination` are left for the caller to push with
    /// [`Archetype::push_component_bytes`].
    pub fn move_row_to(&mut self, destination: &mut Archetype, row: RowID) -> Result<RowMove, StructuralError> {
        destination.try_reserve(1)?;

        let source_row = row as usize;
        for component_id in self.signature.iterate_over_components() {
            let Some(source) = self.columns[component_id as usize].as_deref_mut() else { continue };
            match destination.columns[component_id as usize].as_deref_mut() {
                Some(target) => source.swap_remove_into(component_id, source_row, target)?,
                None => source.swap_remove_discard(source_row),
            }
        }

        let entity = self.entities.swap_remove(source_row);
        let destination_row = destination.entities.len() as RowID;
        destination.entities.push(entity);

        Ok(RowMove {
            destination_row,
            swapped: self.entities.get(source_row).copied(),
        })
    }

    /// Verifies that every column has one row per entity.
    pub fn check_alignment(&self) -> Result<(), StructuralError> {
        let expected = self.entities.len();
        for column in self.columns.iter().flatten() {
            if column.len() != expected {
                return Err(StructuralError::MisalignedStorage {
                    archetype: self.archetype_id,
                    expected,
                    found: column.len(),
                });
            }
        }
        Ok(())
    }
}
