//! Entity handles and the entity table.
//!
//! An [`Entity`] is an opaque 64-bit handle packing a slot index and a
//! generation. The [`Entities`] table owns the slot metadata: liveness,
//! generation, and the entity's current [`EntityLocation`] (archetype + row).
//!
//! Despawning bumps the slot generation, so handles to a despawned entity
//! become stale and every lookup through them fails quietly.

use crate::engine::error::CapacityError;
use crate::engine::types::{
    ArchetypeID, EntityID, Generation, IndexID, RowID, INDEX_BITS, INDEX_MASK,
};


/// Opaque handle to "a thing that can have components".
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entity(pub EntityID);

#[inline]
const fn make_id(index: IndexID, generation: Generation) -> EntityID {
    ((generation as EntityID) << INDEX_BITS) | (index as EntityID)
}

impl Entity {
    /// Slot index.
    #[inline]
    pub fn index(self) -> IndexID { (self.0 & INDEX_MASK) as IndexID }

    /// Slot generation at the time the handle was created.
    #[inline]
    pub fn generation(self) -> Generation { (self.0 >> INDEX_BITS) as Generation }

    /// Raw packed id.
    #[inline]
    pub fn to_bits(self) -> EntityID { self.0 }
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Entity({}v{})", self.index(), self.generation())
    }
}

/// Where an entity's component data currently lives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EntityLocation {
    /// Owning archetype.
    pub archetype: ArchetypeID,
    /// Row inside the archetype.
    pub row: RowID,
}

/// Slot table for entity allocation and location tracking.
#[derive(Default)]
pub struct Entities {
    generations: Vec<Generation>,
    alive: Vec<bool>,
    locations: Vec<EntityLocation>,
    free_store: Vec<IndexID>,
    live: usize,
}

impl Entities {
    /// Creates an empty table.
    pub fn new() -> Self { Self::default() }

    /// Number of live entities.
    #[inline]
    pub fn len(&self) -> usize { self.live }

    /// Returns `true` if no entity is alive.
    #[inline]
    pub fn is_empty(&self) -> bool { self.live == 0 }

    fn grow(&mut self) -> Result<IndexID, CapacityError> {
        let current = self.generations.len();
        if current as u64 > IndexID::MAX as u64 {
            return Err(CapacityError { requested: current as u64 + 1, capacity: IndexID::MAX as u64 + 1 });
        }
        let fail = |_| CapacityError { requested: current as u64 + 1, capacity: current as u64 };
        self.generations.try_reserve(1).map_err(fail)?;
        self.alive.try_reserve(1).map_err(fail)?;
        self.locations.try_reserve(1).map_err(fail)?;
        self.free_store.try_reserve(1).map_err(fail)?;

        self.generations.push(0);
        self.alive.push(false);
        self.locations.push(EntityLocation::default());
        Ok(current as IndexID)
    }

    /// Allocates a live entity at `location`.
    pub fn spawn(&mut self, location: EntityLocation) -> Result<Entity, CapacityError> {
        let index = match self.free_store.pop() {
            Some(index) => index,
            None => self.grow()?,
        };

        let slot = index as usize;
        self.alive[slot] = true;
        self.locations[slot] = location;
        self.live += 1;
        Ok(Entity(make_id(index, self.generations[slot])))
    }

    /// Frees `entity`'s slot. Returns `false` for stale or unknown handles.
    pub fn despawn(&mut self, entity: Entity) -> bool {
        if !self.is_alive(entity) {
            return false;
        }
        let slot = entity.index() as usize;
        self.generations[slot] = self.generations[slot].wrapping_add(1);
        self.alive[slot] = false;
        self.locations[slot] = EntityLocation::default();
        self.free_store.push(entity.index());
        self.live -= 1;
        true
    }

    /// Returns `true` if `entity` refers to a live slot of the same generation.
    #[inline]
    pub fn is_alive(&self, entity: Entity) -> bool {
        let slot = entity.index() as usize;
        slot < self.generations.len()
            && self.alive[slot]
            && self.generations[slot] == entity.generation()
    }

    /// Current location of a live entity.
    #[inline]
    pub fn location(&self, entity: Entity) -> Option<EntityLocation> {
        if self.is_alive(entity) {
            Some(self.locations[entity.index() as usize])
        } else {
            None
        }
    }

    /// Updates the location of a live entity.
    #[inline]
    pub fn set_location(&mut self, entity: Entity, location: EntityLocation) {
        debug_assert!(
            self.is_alive(entity),
            "set_location was called on a dead or stale entity. Entity: {:?}, Location: {:?}",
            entity, location
        );
        if let Some(slot) = self.locations.get_mut(entity.index() as usize) {
            *slot = location;
        }
    }
}
