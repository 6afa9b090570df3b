//! # Commands
//!
//! Deferred structural changes recorded by systems.
//!
//! Systems only see the world through a shared reference while a stage is
//! running, so they cannot move rows between archetypes. Instead they record
//! [`Command`] values through
//! [`SystemContext::defer`](crate::engine::systems::SystemContext::defer).
//! The frame driver applies the queue on the driving thread after the stage
//! finishes, when no system holds a view of the world.
//!
//! ## Invariants
//! - Commands are applied in the order they were recorded. Commands recorded
//!   concurrently by different systems are ordered by queue insertion.
//! - A command addressing an entity that is stale by the time it is applied
//!   is skipped.

use crate::engine::component::Bundle;
use crate::engine::entity::Entity;
use crate::engine::types::ComponentID;


/// A deferred world mutation.
#[derive(Clone, Debug)]
pub enum Command {
    /// Spawns a new entity with the components in `bundle`.
    Spawn {
        /// Components of the new entity.
        bundle: Bundle,
    },

    /// Despawns an entity, releasing its storage row.
    Despawn {
        /// Entity to remove.
        entity: Entity,
    },

    /// Adds or overwrites components on an entity.
    ///
    /// Components not yet present move the entity to a new archetype.
    Insert {
        /// Target entity.
        entity: Entity,
        /// Values to add or overwrite.
        bundle: Bundle,
    },

    /// Removes one component from an entity.
    ///
    /// The entity moves to the archetype without that component; removing the
    /// last component leaves it alive in the empty archetype.
    Remove {
        /// Target entity.
        entity: Entity,
        /// Component to drop.
        component_id: ComponentID,
    },
}

impl Command {
    /// Entity addressed by this command, if any.
    pub fn target(&self) -> Option<Entity> {
        match self {
            Command::Spawn { .. } => None,
            Command::Despawn { entity }
            | Command::Insert { entity, .. }
            | Command::Remove { entity, .. } => Some(*entity),
        }
    }

    /// Short name used in log output.
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Spawn { .. } => "spawn",
            Command::Despawn { .. } => "despawn",
            Command::Insert { .. } => "insert",
            Command::Remove { .. } => "remove",
        }
    }
}
