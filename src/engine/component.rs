//! # Component Registry
//!
//! This module assigns stable `ComponentID` values to Rust component types and
//! exposes type-erased column factories for archetype construction.
//!
//! ## Design
//! - Components are trivially-copyable values: [`Component`] is implemented
//!   for every `bytemuck::Pod + Send + Sync` type.
//! - Components are registered once and assigned a compact `ComponentID` in
//!   `[0, COMPONENT_CAP)`.
//! - The registry is owned by its [`World`](crate::engine::world::World);
//!   there is no process-wide table, so several worlds can coexist (tests
//!   rely on this).
//! - The registry can be frozen to prevent registrations after setup.
//!
//! ## Invariants
//! - `ComponentID` values are unique and stable for the lifetime of the registry.
//! - Every registered component has a column factory.

use std::{
    any::{TypeId, type_name},
    collections::HashMap,
    mem::{size_of, align_of},
};

use crate::engine::error::{RegistryError, StructuralError, TypeMismatchError};
use crate::engine::storage::{Column, ErasedColumn, component_bytes};
use crate::engine::types::{ComponentID, Signature, COMPONENT_CAP};


/// Marker for types that can be stored as components.
///
/// Components must have a fixed layout and be trivially copyable; they are
/// moved between archetypes with plain memory copies.
pub trait Component: bytemuck::Pod + Send + Sync {}

impl<T: bytemuck::Pod + Send + Sync> Component for T {}

/// Factory function for constructing an empty type-erased column.
type FactoryFn = fn() -> Box<dyn ErasedColumn>;

fn new_column<T: Component>() -> Box<dyn ErasedColumn> {
    Box::new(Column::<T>::default())
}

/// Describes a registered component type.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ComponentDesc {
    /// Runtime identifier assigned to this component type.
    pub component_id: ComponentID,

    /// Rust type name for diagnostics.
    pub name: &'static str,

    /// Runtime `TypeId` of the component.
    pub type_id: TypeId,

    /// Size of the component type in bytes.
    pub size: usize,

    /// Alignment of the component type in bytes.
    pub align: usize,
}

impl ComponentDesc {
    /// Constructs a descriptor for type `T` with the given id.
    #[inline]
    pub fn of<T: 'static>(component_id: ComponentID) -> Self {
        Self {
            component_id,
            name: type_name::<T>(),
            type_id: TypeId::of::<T>(),
            size: size_of::<T>(),
            align: align_of::<T>(),
        }
    }
}

impl std::fmt::Display for ComponentDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ComponentDesc {{ id: {}, name: {}, size: {}, align: {} }}",
            self.component_id, self.name, self.size, self.align
        )
    }
}

/// Mapping between Rust component types and compact `ComponentID` values.
///
/// ## Invariants
/// - Every entry in `by_type` has a matching `by_id[id]` and `factories[id]`.
/// - IDs are assigned sequentially and never reused.
#[derive(Default)]
pub struct ComponentRegistry {
    by_type: HashMap<TypeId, ComponentID>,
    by_id: Vec<ComponentDesc>,
    factories: Vec<FactoryFn>,
    frozen: bool,
}

impl ComponentRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self { Self::default() }

    /// Registers component type `T` and returns its `ComponentID`.
    ///
    /// Registering an already-known type returns its existing id, even when frozen.
    pub fn register<T: Component>(&mut self) -> Result<ComponentID, RegistryError> {
        if let Some(&existing) = self.by_type.get(&TypeId::of::<T>()) {
            return Ok(existing);
        }
        if self.frozen {
            return Err(RegistryError::Frozen { name: type_name::<T>() });
        }
        if self.by_id.len() >= COMPONENT_CAP {
            return Err(RegistryError::CapacityExceeded { capacity: COMPONENT_CAP });
        }

        let id = self.by_id.len() as ComponentID;
        self.by_type.insert(TypeId::of::<T>(), id);
        self.by_id.push(ComponentDesc::of::<T>(id));
        self.factories.push(new_column::<T>);
        Ok(id)
    }

    /// Prevents any further registration.
    pub fn freeze(&mut self) { self.frozen = true; }

    /// Returns `true` if the registry has been frozen.
    pub fn is_frozen(&self) -> bool { self.frozen }

    /// Number of registered component types.
    pub fn len(&self) -> usize { self.by_id.len() }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool { self.by_id.is_empty() }

    /// Returns the `ComponentID` for `T`, if registered.
    pub fn id_of<T: 'static>(&self) -> Option<ComponentID> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    /// Returns the `ComponentID` for `T`, or `NotRegistered`.
    pub fn require_id_of<T: 'static>(&self) -> Result<ComponentID, RegistryError> {
        self.id_of::<T>().ok_or(RegistryError::NotRegistered { name: type_name::<T>() })
    }

    /// Returns the descriptor for `component_id`, if registered.
    pub fn description(&self, component_id: ComponentID) -> Option<&ComponentDesc> {
        self.by_id.get(component_id as usize)
    }

    /// Creates an empty column for `component_id`.
    pub fn make_empty_column(&self, component_id: ComponentID) -> Result<Box<dyn ErasedColumn>, RegistryError> {
        self.factories
            .get(component_id as usize)
            .map(|factory| factory())
            .ok_or(RegistryError::InvalidComponentId(component_id))
    }

    /// Verifies that `component_id` is registered with element type `T`.
    pub(crate) fn check_type<T: 'static>(&self, component_id: ComponentID) -> Result<(), StructuralError> {
        let desc = self
            .description(component_id)
            .ok_or(RegistryError::InvalidComponentId(component_id))?;
        if desc.type_id != TypeId::of::<T>() {
            return Err(TypeMismatchError {
                component_id,
                expected: desc.name,
                actual: type_name::<T>(),
            }
            .into());
        }
        Ok(())
    }
}

/// A single type-erased component value inside a [`Bundle`].
#[derive(Clone, Debug)]
pub(crate) struct BundleEntry {
    pub(crate) component_id: ComponentID,
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
    pub(crate) bytes: Vec<u8>,
}

/// Heterogeneous set of component values used to spawn an entity or to
/// record a deferred insertion.
#[derive(Clone, Debug, Default)]
pub struct Bundle {
    signature: Signature,
    entries: Vec<BundleEntry>,
}

impl Bundle {
    /// Creates an empty bundle.
    #[inline]
    pub fn new() -> Self { Self::default() }

    /// Adds a component value. Values for a component already present replace
    /// the earlier value.
    ///
    /// Unregistered or out-of-range ids are accepted here and rejected with
    /// [`RegistryError::InvalidComponentId`] when the bundle is applied.
    pub fn insert<T: Component>(&mut self, component_id: ComponentID, value: T) -> &mut Self {
        let entry = BundleEntry {
            component_id,
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            bytes: component_bytes(std::slice::from_ref(&value)).to_vec(),
        };
        match self.entries.iter_mut().find(|e| e.component_id == component_id) {
            Some(existing) => *existing = entry,
            None => {
                self.signature.set(component_id);
                self.entries.push(entry);
            }
        }
        self
    }

    /// Builder-style variant of [`Bundle::insert`].
    pub fn with<T: Component>(mut self, component_id: ComponentID, value: T) -> Self {
        self.insert(component_id, value);
        self
    }

    /// Signature of the components held.
    #[inline]
    pub fn signature(&self) -> Signature { self.signature }

    /// Number of component values held.
    #[inline]
    pub fn len(&self) -> usize { self.entries.len() }

    /// Returns `true` if the bundle holds no values.
    #[inline]
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Checks every entry against the registry.
    pub(crate) fn validate(&self, registry: &ComponentRegistry) -> Result<(), StructuralError> {
        for entry in &self.entries {
            let desc = registry
                .description(entry.component_id)
                .ok_or(RegistryError::InvalidComponentId(entry.component_id))?;
            if desc.type_id != entry.type_id {
                return Err(TypeMismatchError {
                    component_id: entry.component_id,
                    expected: desc.name,
                    actual: entry.type_name,
                }
                .into());
            }
        }
        Ok(())
    }

    pub(crate) fn entries(&self) -> &[BundleEntry] { &self.entries }
}
