//! Sparse, slot-indexed component storage for a single entity.
//!
//! An [`AttributeTable`] is a growable array of optional boxed values,
//! indexed by the [`Slot`] the component mapper assigned to each component
//! type. Reads past the end report absence. Writes grow the array to cover
//! the written slot, or every slot the mapper has assigned so far, whichever
//! is larger.
//!
//! Every mutation that changes presence or replaces a value fires the
//! table's change listener exactly once. Removing an absent value fires
//! nothing. The owning world installs the listener so it can batch
//! `changed` events for the entity.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::mapper::{ComponentMapper, Slot, SlotIndex};
use crate::EcsError;

/// Anything that can be stored on an entity.
pub trait Component: Any + Send + Sync {}

impl<T: Any + Send + Sync> Component for T {}

/// Type-erased stored value.
pub type BoxedValue = Box<dyn Any + Send + Sync>;

/// Change callback installed by the owner of a table.
pub type ChangeListener = Arc<dyn Fn() + Send + Sync>;

// ---------------------------------------------------------------------------
// AttributeTable
// ---------------------------------------------------------------------------

pub struct AttributeTable {
    mapper: Arc<ComponentMapper>,
    data: Vec<Option<BoxedValue>>,
    on_change: Option<ChangeListener>,
}

impl AttributeTable {
    /// Create an empty table sized to the slots assigned so far.
    pub fn new(mapper: Arc<ComponentMapper>) -> Self {
        let mut data = Vec::new();
        data.resize_with(mapper.len(), || None);
        Self {
            mapper,
            data,
            on_change: None,
        }
    }

    pub fn mapper(&self) -> &Arc<ComponentMapper> {
        &self.mapper
    }

    /// Length of the backing array. Not the number of present values.
    pub fn slot_capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of present values.
    pub fn len(&self) -> usize {
        self.data.iter().filter(|v| v.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.data.iter().all(Option::is_none)
    }

    pub(crate) fn set_listener(&mut self, listener: Option<ChangeListener>) {
        self.on_change = listener;
    }

    /// Invoke the change listener, if any.
    pub fn notify_changed(&self) {
        if let Some(listener) = &self.on_change {
            listener();
        }
    }

    fn grow_to_cover(&mut self, slot: Slot) {
        let needed = (slot.index() + 1).max(self.mapper.len());
        if self.data.len() < needed {
            self.data.resize_with(needed, || None);
        }
    }

    fn component_name(&self, slot: Slot) -> String {
        self.mapper.name_of(slot)
    }

    // -- untyped slot access -------------------------------------------------

    pub fn contains_slot(&self, slot: Slot) -> bool {
        matches!(self.data.get(slot.index()), Some(Some(_)))
    }

    pub fn get_slot(&self, slot: Slot) -> Option<&(dyn Any + Send + Sync)> {
        self.data.get(slot.index())?.as_deref()
    }

    pub fn get_slot_mut(&mut self, slot: Slot) -> Option<&mut (dyn Any + Send + Sync)> {
        self.data.get_mut(slot.index())?.as_deref_mut()
    }

    /// Store `value` at `slot`, returning whatever was there.
    pub fn set_slot(&mut self, slot: Slot, value: BoxedValue) -> Option<BoxedValue> {
        self.grow_to_cover(slot);
        let previous = self.data[slot.index()].replace(value);
        self.notify_changed();
        previous
    }

    /// Store `value` at `slot` only if the slot is empty.
    pub fn set_slot_or_fail(&mut self, slot: Slot, value: BoxedValue) -> Result<(), EcsError> {
        if self.contains_slot(slot) {
            return Err(EcsError::ComponentAlreadyPresent {
                component: self.component_name(slot),
            });
        }
        self.set_slot(slot, value);
        Ok(())
    }

    pub fn remove_slot(&mut self, slot: Slot) -> Option<BoxedValue> {
        let previous = self.data.get_mut(slot.index())?.take()?;
        self.notify_changed();
        Some(previous)
    }

    /// Drop every value. Fires once if anything was present.
    pub fn clear(&mut self) {
        let mut removed = false;
        for value in &mut self.data {
            removed |= value.take().is_some();
        }
        if removed {
            self.notify_changed();
        }
    }

    /// Present values in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (Slot, &(dyn Any + Send + Sync))> + '_ {
        self.data
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.as_deref().map(|v| (Slot(i as u32), v)))
    }

    // -- typed access --------------------------------------------------------

    pub fn contains<T: Component>(&self, index: SlotIndex<T>) -> bool {
        self.contains_slot(index.slot())
    }

    pub fn get<T: Component>(&self, index: SlotIndex<T>) -> Option<&T> {
        self.get_slot(index.slot())?.downcast_ref()
    }

    /// Mutable access. Does not fire the change listener; call
    /// [`notify_changed`](Self::notify_changed) after in-place edits that
    /// groups should see.
    pub fn get_mut<T: Component>(&mut self, index: SlotIndex<T>) -> Option<&mut T> {
        self.get_slot_mut(index.slot())?.downcast_mut()
    }

    pub fn require<T: Component>(&self, index: SlotIndex<T>) -> Result<&T, EcsError> {
        self.get(index).ok_or_else(|| EcsError::ComponentMissing {
            component: self.component_name(index.slot()),
        })
    }

    /// Set or replace the value, returning the previous one.
    pub fn set<T: Component>(&mut self, index: SlotIndex<T>, value: T) -> Option<T> {
        let previous = self.set_slot(index.slot(), Box::new(value))?;
        previous.downcast::<T>().ok().map(|b| *b)
    }

    /// Set the value, failing if one is already present.
    pub fn add<T: Component>(&mut self, index: SlotIndex<T>, value: T) -> Result<(), EcsError> {
        self.set_slot_or_fail(index.slot(), Box::new(value))
    }

    pub fn remove<T: Component>(&mut self, index: SlotIndex<T>) -> Option<T> {
        let previous = self.remove_slot(index.slot())?;
        previous.downcast::<T>().ok().map(|b| *b)
    }
}

impl fmt::Debug for AttributeTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.iter().map(|(slot, _)| self.component_name(slot)))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
