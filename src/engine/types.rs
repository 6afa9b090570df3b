//! Core ECS Types, Identifiers, and Bit-Level Layouts
//!
//! This module defines the **fundamental identifiers, bitsets and scheduling
//! enums** shared by every other part of the engine: entity storage,
//! archetypes, queries, the system graph builder and the executors.
//!
//! ## Entity Representation
//!
//! Entities are encoded as a packed 64-bit integer:
//!
//! ```text
//! | generation (32) | index (32) |
//! ```
//!
//! - **Index** identifies the slot in the entity table.
//! - **Generation** enables stale-entity detection after despawning.
//!
//! ## Archetypes and Components
//!
//! Components are identified by compact [`ComponentID`] values. Archetypes are
//! described by [`Signature`] bitsets indicating which components they contain.
//! A signature doubles as the archetype's identity: two entities share an
//! archetype exactly when their signatures are equal.
//!
//! ## Access Declarations
//!
//! [`AccessSets`] describes how a system touches component data (read/write).
//! The graph builder uses [`AccessSets::conflicts_with`] to decide which
//! systems need an ordering edge; the executor relies on that proof instead of
//! locking component memory.
//!
//! ## Stages and Execution Types
//!
//! [`Stage`] names a phase of the frame and [`ExecutionType`] decides whether
//! a system must run on the driving thread or may be handed to a worker.

/// Globally unique entity identifier encoded as a packed 64-bit value.
pub type EntityID = u64;
/// Index within the entity table.
pub type IndexID = u32;
/// Generation counter used to detect stale entities.
pub type Generation = u32;

/// Number of bits reserved for the entity index.
pub const INDEX_BITS: u32 = 32;
/// Mask selecting the index portion of an [`EntityID`].
pub const INDEX_MASK: EntityID = (1 << INDEX_BITS) - 1;

/// Unique identifier for an archetype.
pub type ArchetypeID = u32;
/// Row index within an archetype.
pub type RowID = u32;

/// Unique identifier for a component type.
pub type ComponentID = u16;

/// Maximum number of registered component types.
pub const COMPONENT_CAP: usize = 256;
/// Number of `u64` words required to represent a full component signature.
pub const SIGNATURE_SIZE: usize = COMPONENT_CAP.div_ceil(64);

/// Bitset representing a set of components.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Signature {
    /// Packed component bitset.
    pub components: [u64; SIGNATURE_SIZE],
}

impl Signature {
    /// Builds a signature from a list of component IDs.
    pub fn from_ids(component_ids: &[ComponentID]) -> Self {
        let mut signature = Self::default();
        for &component_id in component_ids { signature.set(component_id); }
        signature
    }

    /// Sets the bit corresponding to `component_id`.
    ///
    /// Ids at or above [`COMPONENT_CAP`] have no bit and are ignored.
    #[inline]
    pub fn set(&mut self, component_id: ComponentID) {
        if component_id as usize >= COMPONENT_CAP { return; }
        let index = (component_id as usize) / 64;
        let bits = (component_id as usize) % 64;
        self.components[index] |= 1u64 << bits;
    }

    /// Clears the bit corresponding to `component_id`.
    #[inline]
    pub fn clear(&mut self, component_id: ComponentID) {
        if component_id as usize >= COMPONENT_CAP { return; }
        let index = (component_id as usize) / 64;
        let bits = (component_id as usize) % 64;
        self.components[index] &= !(1u64 << bits);
    }

    /// Returns `true` if `component_id` is present in this signature.
    #[inline]
    pub fn has(&self, component_id: ComponentID) -> bool {
        if component_id as usize >= COMPONENT_CAP { return false; }
        let index = (component_id as usize) / 64;
        let bits = (component_id as usize) % 64;
        (self.components[index] >> bits) & 1 == 1
    }

    /// Returns `true` if all components in `signature` are present.
    #[inline]
    pub fn contains_all(&self, signature: &Signature) -> bool {
        self.components
            .iter()
            .zip(signature.components.iter())
            .all(|(a, b)| (a & b) == *b)
    }

    /// Returns `true` if no component in `signature` is present.
    #[inline]
    pub fn is_disjoint(&self, signature: &Signature) -> bool {
        self.components
            .iter()
            .zip(signature.components.iter())
            .all(|(a, b)| (a & b) == 0)
    }

    /// Returns the intersection of two signatures.
    #[inline]
    pub fn intersection(&self, other: &Signature) -> Signature {
        let mut out = Signature::default();
        for (word, (a, b)) in out.components.iter_mut().zip(self.components.iter().zip(other.components.iter())) {
            *word = a & b;
        }
        out
    }

    /// Returns the union of two signatures.
    #[inline]
    pub fn union(&self, other: &Signature) -> Signature {
        let mut out = Signature::default();
        for (word, (a, b)) in out.components.iter_mut().zip(self.components.iter().zip(other.components.iter())) {
            *word = a | b;
        }
        out
    }

    /// Returns `true` if no bit is set.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.components.iter().all(|&word| word == 0)
    }

    /// Number of components in the set.
    #[inline]
    pub fn len(&self) -> usize {
        self.components.iter().map(|word| word.count_ones() as usize).sum()
    }

    /// Iterates over all component IDs set in this signature, in ascending order.
    pub fn iterate_over_components(&self) -> impl Iterator<Item = ComponentID> + '_ {
        self.components
            .iter()
            .enumerate()
            .flat_map(|(word_index, &word)| {
                let base = word_index * 64;
                let mut bits = word;
                std::iter::from_fn(move || {
                    if bits == 0 {
                        return None;
                    }
                    let tz = bits.trailing_zeros() as usize;
                    bits &= bits - 1;
                    Some((base + tz) as ComponentID)
                })
            })
    }
}

/// Access mode for a component.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccessMode {
    /// Read-only access.
    Read,
    /// Exclusive write access.
    Write,
}

impl std::fmt::Display for AccessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessMode::Read => f.write_str("read"),
            AccessMode::Write => f.write_str("write"),
        }
    }
}

/// Declares the component access set of a system.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AccessSets {
    /// Components read by the system.
    pub read: Signature,
    /// Components written by the system.
    pub write: Signature,
}

impl AccessSets {
    /// Adds a `(component, mode)` pair to the set.
    #[inline]
    pub fn declare(&mut self, component_id: ComponentID, mode: AccessMode) {
        match mode {
            AccessMode::Read => self.read.set(component_id),
            AccessMode::Write => self.write.set(component_id),
        }
    }

    /// Returns `true` if `component_id` may be read under this set.
    ///
    /// Write access implies read access.
    #[inline]
    pub fn allows_read(&self, component_id: ComponentID) -> bool {
        self.read.has(component_id) || self.write.has(component_id)
    }

    /// Returns `true` if `component_id` may be written under this set.
    #[inline]
    pub fn allows_write(&self, component_id: ComponentID) -> bool {
        self.write.has(component_id)
    }

    /// Returns `true` if this access set conflicts with another.
    #[inline]
    pub fn conflicts_with(&self, other: &AccessSets) -> bool {
        // Conflicts if: (W ∩ W) or (W ∩ R) or (R ∩ W)
        for ((a_w, a_r), (b_w, b_r)) in self.write.components.iter().zip(self.read.components.iter())
            .zip(other.write.components.iter().zip(other.read.components.iter()))
        {
            if (a_w & b_w) != 0 || (a_w & b_r) != 0 || (a_r & b_w) != 0 { return true; }
        }
        false
    }

    /// Returns the components on which two access sets conflict.
    pub fn conflicting_components(&self, other: &AccessSets) -> Signature {
        let ww = self.write.intersection(&other.write);
        let wr = self.write.intersection(&other.read);
        let rw = self.read.intersection(&other.write);
        ww.union(&wr).union(&rw)
    }
}

/// A named phase of the frame.
///
/// Stages run strictly one after another; the declaration order below is the
/// execution order. `Init` runs once at startup, `Shutdown` once at teardown,
/// the rest once per frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// One-time setup, before the first frame.
    Init,
    /// Input and platform work at the start of a frame.
    PreUpdate,
    /// Game logic.
    Update,
    /// Work that consumes the results of `Update`.
    PostUpdate,
    /// Last per-frame stage (render submission, bookkeeping).
    Last,
    /// One-time teardown.
    Shutdown,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Stage; 6] = [
        Stage::Init,
        Stage::PreUpdate,
        Stage::Update,
        Stage::PostUpdate,
        Stage::Last,
        Stage::Shutdown,
    ];

    /// Stages executed once per frame, in order.
    pub const FRAME: [Stage; 4] = [
        Stage::PreUpdate,
        Stage::Update,
        Stage::PostUpdate,
        Stage::Last,
    ];

    /// Position of this stage in [`Stage::ALL`].
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Lower-case stage name, as used in configuration files.
    pub fn name(self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::PreUpdate => "pre_update",
            Stage::Update => "update",
            Stage::PostUpdate => "post_update",
            Stage::Last => "last",
            Stage::Shutdown => "shutdown",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Policy governing where a system executes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ExecutionType {
    /// May run on any worker thread.
    #[default]
    Default,
    /// Must run synchronously on the driving thread.
    Inline,
    /// Worker-eligible system guarded by a skip predicate.
    ///
    /// The predicate is not evaluated yet; the system always executes.
    Check,
    /// Driving-thread system guarded by a skip predicate.
    ///
    /// The predicate is not evaluated yet; the system always executes.
    InlineCheck,
}

impl ExecutionType {
    /// Returns `true` if the system must execute on the driving thread.
    #[inline]
    pub fn is_inline(self) -> bool {
        matches!(self, ExecutionType::Inline | ExecutionType::InlineCheck)
    }

    /// Returns `true` if the system carries a skip predicate.
    #[inline]
    pub fn is_checked(self) -> bool {
        matches!(self, ExecutionType::Check | ExecutionType::InlineCheck)
    }
}
