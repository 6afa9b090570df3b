//! Contiguous column storage and type-erased access for component data.
//!
//! This module implements [`Column<T>`], a dense, contiguous container holding
//! one value of component type `T` per archetype row, and the
//! [`ErasedColumn`] trait that lets archetypes own heterogeneous columns
//! behind `Box<dyn ErasedColumn>`.
//!
//! # Storage model
//!
//! Values are written densely from row 0 upward, with no gaps. Removal uses
//! swap-remove: the last row is moved into the vacated slot, so removal is
//! `O(1)` but does **not** preserve row order.
//!
//! # Type erasure
//!
//! [`ErasedColumn`] exposes the element `TypeId` and name, downcasting hooks,
//! raw row bytes (components are trivially copyable, see
//! [`Component`](crate::engine::component::Component)) and the row-move
//! primitive used during archetype migration.
//!
//! # Shared access during system execution
//!
//! Column data lives in an `UnsafeCell` so that concurrently running systems
//! can obtain slices from a shared `&World`. The engine never locks columns;
//! instead the schedule builder proves that no two systems that may run at
//! the same time touch the same column with at least one write. The `unsafe`
//! accessors below document the obligations that proof discharges.

use std::{
    any::{Any, TypeId, type_name},
    cell::UnsafeCell,
    mem::size_of,
};

use crate::engine::component::Component;
use crate::engine::error::{CapacityError, TypeMismatchError};
use crate::engine::types::ComponentID;


/// Dynamically-typed interface over a [`Column<T>`].
pub trait ErasedColumn: Any + Send + Sync {
    /// Number of rows stored.
    fn len(&self) -> usize;

    /// Returns `true` if the column holds no rows.
    fn is_empty(&self) -> bool { self.len() == 0 }

    /// Immutable downcasting hook.
    fn as_any(&self) -> &dyn Any;

    /// Mutable downcasting hook.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// `TypeId` of the element type.
    fn element_type_id(&self) -> TypeId;

    /// Human-readable element type name.
    fn element_type_name(&self) -> &'static str;

    /// Size of one element in bytes.
    fn element_size(&self) -> usize;

    /// Creates an empty column of the same element type.
    fn new_empty(&self) -> Box<dyn ErasedColumn>;

    /// Reserves room for `additional` more rows.
    fn try_reserve(&mut self, additional: usize) -> Result<(), CapacityError>;

    /// Appends one element decoded from `bytes`.
    ///
    /// `bytes.len()` must equal the element size.
    fn push_bytes(&mut self, component_id: ComponentID, bytes: &[u8]) -> Result<(), TypeMismatchError>;

    /// Overwrites the element at `row` with `bytes`.
    fn write_bytes(&mut self, component_id: ComponentID, row: usize, bytes: &[u8]) -> Result<(), TypeMismatchError>;

    /// Returns the raw bytes of the element at `row`.
    fn row_bytes(&self, row: usize) -> Option<&[u8]>;

    /// Removes `row` by swapping in the last element and appends the removed
    /// value to `destination`.
    ///
    /// `destination` must have the same element type.
    fn swap_remove_into(
        &mut self,
        component_id: ComponentID,
        row: usize,
        destination: &mut dyn ErasedColumn,
    ) -> Result<(), TypeMismatchError>;

    /// Removes `row` by swapping in the last element, discarding the value.
    fn swap_remove_discard(&mut self, row: usize);
}

/// Dense storage for a single component type.
///
/// ## Invariants
/// - Row `i` belongs to the entity at position `i` of the owning archetype.
/// - Every row is initialized.
pub struct Column<T: Component> {
    data: UnsafeCell<Vec<T>>,
}

// SAFETY: shared access to `data` from several threads only happens through
// `slice_shared`/`slice_unchecked_mut`, whose callers guarantee that no
// mutable slice coexists with any other slice of the same column. Everything
// else requires `&mut self`.
unsafe impl<T: Component> Sync for Column<T> {}

impl<T: Component> Default for Column<T> {
    fn default() -> Self {
        Self { data: UnsafeCell::new(Vec::new()) }
    }
}

impl<T: Component> Column<T> {
    /// Number of stored rows.
    #[inline]
    pub fn len(&self) -> usize {
        // SAFETY: reading the length never overlaps a resize; resizing needs `&mut self`.
        unsafe { (*self.data.get()).len() }
    }

    /// Returns `true` if no rows are stored.
    #[inline]
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Appends a value.
    #[inline]
    pub fn push(&mut self, value: T) -> Result<(), CapacityError> {
        let data = self.data.get_mut();
        data.try_reserve(1).map_err(|_| CapacityError {
            requested: data.len() as u64 + 1,
            capacity: data.capacity() as u64,
        })?;
        data.push(value);
        Ok(())
    }

    /// Returns the value at `row`.
    #[inline]
    pub fn get(&self, row: usize) -> Option<&T> {
        // SAFETY: `&self` excludes structural mutation; see `slice_shared`.
        unsafe { self.slice_shared() }.get(row)
    }

    /// Returns the value at `row` mutably.
    #[inline]
    pub fn get_mut(&mut self, row: usize) -> Option<&mut T> {
        self.data.get_mut().get_mut(row)
    }

    /// Entire column as an exclusive slice.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        self.data.get_mut().as_mut_slice()
    }

    /// Entire column as a shared slice.
    ///
    /// # Safety
    /// No mutable slice of this column (from [`Column::slice_unchecked_mut`])
    /// may be alive for the duration of the returned borrow.
    #[inline]
    pub unsafe fn slice_shared(&self) -> &[T] {
        unsafe { (*self.data.get()).as_slice() }
    }

    /// Entire column as a mutable slice obtained through a shared reference.
    ///
    /// # Safety
    /// The caller must be the only holder of any slice of this column for the
    /// duration of the returned borrow. The system scheduler guarantees this
    /// for columns in a system's declared write set.
    #[allow(clippy::mut_from_ref)]
    #[inline]
    pub unsafe fn slice_unchecked_mut(&self) -> &mut [T] {
        unsafe { (*self.data.get()).as_mut_slice() }
    }

    /// Overwrites the value at `row` through a shared reference.
    ///
    /// Returns `false` if `row` is out of range.
    ///
    /// # Safety
    /// Same obligations as [`Column::slice_unchecked_mut`].
    #[inline]
    pub unsafe fn write_unchecked(&self, row: usize, value: T) -> bool {
        match unsafe { self.slice_unchecked_mut() }.get_mut(row) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    fn swap_remove(&mut self, row: usize) -> T {
        self.data.get_mut().swap_remove(row)
    }

    fn mismatch(component_id: ComponentID, actual: &'static str) -> TypeMismatchError {
        TypeMismatchError { component_id, expected: type_name::<T>(), actual }
    }
}

/// Views a slice of components as raw bytes.
#[inline]
pub fn component_bytes<T: Component>(values: &[T]) -> &[u8] {
    if size_of::<T>() == 0 { &[] } else { bytemuck::cast_slice(values) }
}

impl<T: Component> ErasedColumn for Column<T> {
    fn len(&self) -> usize { Column::len(self) }

    fn as_any(&self) -> &dyn Any { self }
    fn as_any_mut(&mut self) -> &mut dyn Any { self }

    fn element_type_id(&self) -> TypeId { TypeId::of::<T>() }
    fn element_type_name(&self) -> &'static str { type_name::<T>() }
    fn element_size(&self) -> usize { size_of::<T>() }

    fn new_empty(&self) -> Box<dyn ErasedColumn> {
        Box::new(Column::<T>::default())
    }

    fn try_reserve(&mut self, additional: usize) -> Result<(), CapacityError> {
        let data = self.data.get_mut();
        data.try_reserve(additional).map_err(|_| CapacityError {
            requested: (data.len() + additional) as u64,
            capacity: data.capacity() as u64,
        })
    }

    fn push_bytes(&mut self, component_id: ComponentID, bytes: &[u8]) -> Result<(), TypeMismatchError> {
        if bytes.len() != size_of::<T>() {
            return Err(Self::mismatch(component_id, "<byte slice of different size>"));
        }
        self.data.get_mut().push(bytemuck::pod_read_unaligned::<T>(bytes));
        Ok(())
    }

    fn write_bytes(&mut self, component_id: ComponentID, row: usize, bytes: &[u8]) -> Result<(), TypeMismatchError> {
        if bytes.len() != size_of::<T>() {
            return Err(Self::mismatch(component_id, "<byte slice of different size>"));
        }
        if let Some(slot) = self.data.get_mut().get_mut(row) {
            *slot = bytemuck::pod_read_unaligned::<T>(bytes);
        }
        Ok(())
    }

    fn row_bytes(&self, row: usize) -> Option<&[u8]> {
        self.get(row).map(|value| component_bytes(std::slice::from_ref(value)))
    }

    fn swap_remove_into(
        &mut self,
        component_id: ComponentID,
        row: usize,
        destination: &mut dyn ErasedColumn,
    ) -> Result<(), TypeMismatchError> {
        let actual = destination.element_type_name();
        let destination = destination
            .as_any_mut()
            .downcast_mut::<Column<T>>()
            .ok_or_else(|| Self::mismatch(component_id, actual))?;
        let value = self.swap_remove(row);
        destination.data.get_mut().push(value);
        Ok(())
    }

    fn swap_remove_discard(&mut self, row: usize) {
        self.swap_remove(row);
    }
}
