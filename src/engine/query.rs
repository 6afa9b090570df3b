//! Query signatures for bulk component iteration.
//!
//! A [`QuerySignature`] describes "all entities with components X and Y,
//! without Z". It is built with the builder-style [`QueryBuilder`] and
//! matched against archetype signatures when iterating.
//!
//! ## Semantics
//! * Every component declared with [`QueryBuilder::read`] or
//!   [`QueryBuilder::write`] must be present in a matching archetype.
//! * Every component declared with [`QueryBuilder::without`] must be absent.
//! * Ids at or above [`COMPONENT_CAP`](crate::engine::types::COMPONENT_CAP)
//!   cannot appear in any archetype and are ignored.
//! * The read/write split also yields the [`AccessSets`] a system using this
//!   query should declare, see [`QueryBuilder::access_sets`].
//!
//! The typed `for_each_*` adapters on [`World`](crate::engine::world::World)
//! and [`SystemContext`](crate::engine::systems::SystemContext) add the
//! components they iterate to the required set automatically, so a
//! signature passed to them only needs to carry the extra filters.

use crate::engine::types::{AccessSets, ComponentID, Signature};


/// Structural filter over archetype signatures.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QuerySignature {
    /// Components read by the query.
    pub read: Signature,
    /// Components written by the query.
    pub write: Signature,
    /// Components that must be absent.
    pub without: Signature,
}

impl QuerySignature {
    /// Components that must be present.
    #[inline]
    pub fn required(&self) -> Signature {
        self.read.union(&self.write)
    }

    /// Returns `true` if an archetype with `signature` matches this query.
    #[inline]
    pub fn matches(&self, signature: &Signature) -> bool {
        signature.contains_all(&self.required()) && signature.is_disjoint(&self.without)
    }

    /// Returns a copy that additionally requires `components`.
    #[inline]
    pub(crate) fn requiring(&self, components: &[ComponentID]) -> QuerySignature {
        let mut out = *self;
        for &component_id in components {
            out.read.set(component_id);
        }
        out
    }
}

/// Builder for [`QuerySignature`] values.
///
/// ## Example
/// ```ignore
/// let query = QueryBuilder::new()
///     .read(position)
///     .write(velocity)
///     .without(frozen)
///     .build();
/// ```
#[derive(Clone, Debug, Default)]
pub struct QueryBuilder {
    signature: QuerySignature,
}

impl QueryBuilder {
    /// Creates an empty query.
    pub fn new() -> Self { Self::default() }

    /// Requires `component_id` and declares read access to it.
    pub fn read(mut self, component_id: ComponentID) -> Self {
        self.signature.read.set(component_id);
        self
    }

    /// Requires `component_id` and declares write access to it.
    pub fn write(mut self, component_id: ComponentID) -> Self {
        self.signature.write.set(component_id);
        self
    }

    /// Excludes archetypes containing `component_id`.
    pub fn without(mut self, component_id: ComponentID) -> Self {
        self.signature.without.set(component_id);
        self
    }

    /// Read/write access sets implied by the query.
    ///
    /// Feed these into a [`SystemDescriptor`](crate::engine::systems::SystemDescriptor)
    /// so the graph builder can order the system correctly.
    pub fn access_sets(&self) -> AccessSets {
        AccessSets { read: self.signature.read, write: self.signature.write }
    }

    /// Finishes the query.
    pub fn build(self) -> QuerySignature {
        self.signature
    }
}
