//! Process-wide slot assignment.
//!
//! A [`Mapper`] hands out a dense integer [`Slot`] the first time it sees a
//! key and returns the same slot for that key forever after. Slots are never
//! reused or reassigned, so any array indexed by slot stays valid for the
//! lifetime of the mapper. Attribute tables resolve a component type to its
//! slot once and then index directly.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Slot
// ---------------------------------------------------------------------------

/// A dense index assigned by a [`Mapper`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Slot(pub(crate) u32);

impl Slot {
    /// Position in a slot-indexed array.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Slot({})", self.0)
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// SlotIndex
// ---------------------------------------------------------------------------

/// A [`Slot`] tagged with the value type stored behind it.
///
/// Obtained once (usually at system setup) and then used for direct,
/// hash-free attribute access.
pub struct SlotIndex<T> {
    slot: Slot,
    _marker: PhantomData<fn() -> T>,
}

impl<T> SlotIndex<T> {
    pub(crate) fn new(slot: Slot) -> Self {
        Self {
            slot,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn slot(self) -> Slot {
        self.slot
    }
}

impl<T> Clone for SlotIndex<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for SlotIndex<T> {}

impl<T> PartialEq for SlotIndex<T> {
    fn eq(&self, other: &Self) -> bool {
        self.slot == other.slot
    }
}

impl<T> Eq for SlotIndex<T> {}

impl<T> fmt::Debug for SlotIndex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SlotIndex<{}>({})",
            std::any::type_name::<T>(),
            self.slot.0
        )
    }
}

// ---------------------------------------------------------------------------
// ComponentKey
// ---------------------------------------------------------------------------

/// Identity of a component type. Equality and hashing use the `TypeId` only;
/// the name is kept for diagnostics.
#[derive(Clone, Copy)]
pub struct ComponentKey {
    type_id: TypeId,
    name: &'static str,
}

impl ComponentKey {
    pub fn of<T: 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for ComponentKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for ComponentKey {}

impl Hash for ComponentKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl fmt::Debug for ComponentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

// ---------------------------------------------------------------------------
// Mapper
// ---------------------------------------------------------------------------

struct MapperInner<K> {
    /// Reverse table, `keys[slot]` is the key assigned to `slot`.
    keys: Vec<K>,
    slots: HashMap<K, Slot>,
}

/// Thread-safe, append-only `key -> Slot` assignment.
///
/// Lookups of known keys take a shared lock. Assigning a new key takes the
/// exclusive lock and re-checks, so racing callers for the same key all
/// observe the slot of whichever caller won.
pub struct Mapper<K> {
    inner: RwLock<MapperInner<K>>,
}

/// The process-wide mapper for component types.
pub type ComponentMapper = Mapper<ComponentKey>;

impl<K: Eq + Hash + Clone> Mapper<K> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MapperInner {
                keys: Vec::new(),
                slots: HashMap::new(),
            }),
        }
    }

    /// Return the slot for `key`, assigning the next free one on first sight.
    pub fn slot_of(&self, key: &K) -> Slot {
        if let Some(&slot) = self.inner.read().slots.get(key) {
            return slot;
        }
        let mut inner = self.inner.write();
        if let Some(&slot) = inner.slots.get(key) {
            return slot;
        }
        let slot = Slot(inner.keys.len() as u32);
        inner.keys.push(key.clone());
        inner.slots.insert(key.clone(), slot);
        slot
    }

    /// Slot for `key` if one has been assigned. Never assigns.
    pub fn get(&self, key: &K) -> Option<Slot> {
        self.inner.read().slots.get(key).copied()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.read().slots.contains_key(key)
    }

    pub fn contains_slot(&self, slot: Slot) -> bool {
        slot.index() < self.inner.read().keys.len()
    }

    /// The key that was assigned `slot`.
    pub fn reverse_lookup(&self, slot: Slot) -> Option<K> {
        self.inner.read().keys.get(slot.index()).cloned()
    }

    /// Number of assigned slots. Also the next slot to be assigned.
    pub fn len(&self) -> usize {
        self.inner.read().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all keys in slot order.
    pub fn keys(&self) -> Vec<K> {
        self.inner.read().keys.clone()
    }

    /// Typed handle for `key`, assigning a slot if needed.
    pub fn index_of<V>(&self, key: &K) -> SlotIndex<V> {
        SlotIndex::new(self.slot_of(key))
    }
}

impl Mapper<ComponentKey> {
    /// Typed handle for component type `T`.
    pub fn index_for<T: 'static>(&self) -> SlotIndex<T> {
        self.index_of(&ComponentKey::of::<T>())
    }

    /// Human-readable name of the component stored at `slot`.
    pub fn name_of(&self, slot: Slot) -> String {
        match self.reverse_lookup(slot) {
            Some(key) => key.name().to_owned(),
            None => format!("<unassigned slot {}>", slot.0),
        }
    }
}

impl<K: Eq + Hash + Clone> Default for Mapper<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> fmt::Debug for Mapper<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mapper")
            .field("len", &self.inner.read().keys.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
