//! Buffered world events.
//!
//! Entity lifecycle notifications are recorded as ids in per-kind buffers and
//! dispatched in one pass when the world flushes. Each buffer deduplicates,
//! so an entity that changes ten times between flushes produces one
//! `changed` event. Buffers are reused across flushes.
//!
//! Flush order is fixed: messages, systems added, systems removed, then the
//! entity kinds in [`EntityEventKind::FLUSH_ORDER`]. Departures go before
//! arrivals so a group never sees an entity arrive twice.

use std::any::Any;
use std::fmt;

use indexmap::IndexSet;

use crate::entity::{Entity, EntityId};

/// Payload of an inter-world message.
pub type Message = Box<dyn Any + Send>;

pub type EntityListener = Box<dyn FnMut(&Entity) + Send>;
pub type DepartureListener = Box<dyn FnMut(EntityId) + Send>;
pub type MessageListener = Box<dyn FnMut(&(dyn Any + Send)) + Send>;
pub type SystemListener = Box<dyn FnMut(&str) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityEventKind {
    Deleted,
    Left,
    Removed,
    Created,
    Received,
    Added,
    Changed,
}

impl EntityEventKind {
    pub const FLUSH_ORDER: [Self; 7] = [
        Self::Deleted,
        Self::Left,
        Self::Removed,
        Self::Created,
        Self::Received,
        Self::Added,
        Self::Changed,
    ];

    /// Kinds whose entity is no longer in the world when they fire.
    pub const DEPARTURES: [Self; 3] = [Self::Deleted, Self::Left, Self::Removed];

    /// Kinds whose entity is in the world when they fire.
    pub const ARRIVALS: [Self; 4] = [Self::Created, Self::Received, Self::Added, Self::Changed];

    pub fn is_departure(self) -> bool {
        matches!(self, Self::Deleted | Self::Left | Self::Removed)
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Handle for removing a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

// ---------------------------------------------------------------------------
// WorldEvents
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct WorldEvents {
    pending: [IndexSet<EntityId>; 7],
    arrival_listeners: [Vec<(ListenerId, EntityListener)>; 4],
    departure_listeners: [Vec<(ListenerId, DepartureListener)>; 3],
    messages: Vec<Message>,
    message_listeners: Vec<(ListenerId, MessageListener)>,
    systems_added: Vec<String>,
    systems_removed: Vec<String>,
    system_added_listeners: Vec<(ListenerId, SystemListener)>,
    system_removed_listeners: Vec<(ListenerId, SystemListener)>,
    next_listener: u64,
}

impl WorldEvents {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> ListenerId {
        self.next_listener += 1;
        ListenerId(self.next_listener)
    }

    fn arrival(&mut self, kind: EntityEventKind, listener: EntityListener) -> ListenerId {
        let id = self.next_id();
        let slot = kind.index() - EntityEventKind::Created.index();
        self.arrival_listeners[slot].push((id, listener));
        id
    }

    fn departure(&mut self, kind: EntityEventKind, listener: DepartureListener) -> ListenerId {
        let id = self.next_id();
        self.departure_listeners[kind.index()].push((id, listener));
        id
    }

    // -- registration ---------------------------------------------------------

    pub fn on_entity_created(&mut self, f: impl FnMut(&Entity) + Send + 'static) -> ListenerId {
        self.arrival(EntityEventKind::Created, Box::new(f))
    }

    pub fn on_entity_received(&mut self, f: impl FnMut(&Entity) + Send + 'static) -> ListenerId {
        self.arrival(EntityEventKind::Received, Box::new(f))
    }

    pub fn on_entity_added(&mut self, f: impl FnMut(&Entity) + Send + 'static) -> ListenerId {
        self.arrival(EntityEventKind::Added, Box::new(f))
    }

    pub fn on_entity_changed(&mut self, f: impl FnMut(&Entity) + Send + 'static) -> ListenerId {
        self.arrival(EntityEventKind::Changed, Box::new(f))
    }

    pub fn on_entity_deleted(&mut self, f: impl FnMut(EntityId) + Send + 'static) -> ListenerId {
        self.departure(EntityEventKind::Deleted, Box::new(f))
    }

    pub fn on_entity_left(&mut self, f: impl FnMut(EntityId) + Send + 'static) -> ListenerId {
        self.departure(EntityEventKind::Left, Box::new(f))
    }

    pub fn on_entity_removed(&mut self, f: impl FnMut(EntityId) + Send + 'static) -> ListenerId {
        self.departure(EntityEventKind::Removed, Box::new(f))
    }

    pub fn on_message(&mut self, f: impl FnMut(&(dyn Any + Send)) + Send + 'static) -> ListenerId {
        let id = self.next_id();
        self.message_listeners.push((id, Box::new(f)));
        id
    }

    pub fn on_system_added(&mut self, f: impl FnMut(&str) + Send + 'static) -> ListenerId {
        let id = self.next_id();
        self.system_added_listeners.push((id, Box::new(f)));
        id
    }

    pub fn on_system_removed(&mut self, f: impl FnMut(&str) + Send + 'static) -> ListenerId {
        let id = self.next_id();
        self.system_removed_listeners.push((id, Box::new(f)));
        id
    }

    /// Unregister a listener of any kind.
    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        fn strip<L>(list: &mut Vec<(ListenerId, L)>, id: ListenerId) -> bool {
            let before = list.len();
            list.retain(|(l, _)| *l != id);
            list.len() != before
        }
        let mut removed = false;
        for list in &mut self.arrival_listeners {
            removed |= strip(list, id);
        }
        for list in &mut self.departure_listeners {
            removed |= strip(list, id);
        }
        removed |= strip(&mut self.message_listeners, id);
        removed |= strip(&mut self.system_added_listeners, id);
        removed |= strip(&mut self.system_removed_listeners, id);
        removed
    }

    // -- recording --------------------------------------------------------------

    pub(crate) fn push(&mut self, kind: EntityEventKind, id: EntityId) {
        self.pending[kind.index()].insert(id);
    }

    pub(crate) fn push_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub(crate) fn push_system_added(&mut self, name: &str) {
        self.systems_added.push(name.to_owned());
    }

    pub(crate) fn push_system_removed(&mut self, name: &str) {
        self.systems_removed.push(name.to_owned());
    }

    /// Drop pending arrival events for an entity that is leaving.
    pub(crate) fn forget_arrivals(&mut self, id: EntityId) {
        for kind in EntityEventKind::ARRIVALS {
            self.pending[kind.index()].shift_remove(&id);
        }
    }

    pub fn pending(&self, kind: EntityEventKind) -> usize {
        self.pending[kind.index()].len()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.iter().any(|p| !p.is_empty())
            || !self.messages.is_empty()
            || !self.systems_added.is_empty()
            || !self.systems_removed.is_empty()
    }

    pub(crate) fn clear_entity_events(&mut self) {
        for pending in &mut self.pending {
            pending.clear();
        }
    }

    /// Drop all buffered events and all listeners.
    pub(crate) fn clear(&mut self) {
        self.clear_entity_events();
        self.messages.clear();
        self.systems_added.clear();
        self.systems_removed.clear();
        for list in &mut self.arrival_listeners {
            list.clear();
        }
        for list in &mut self.departure_listeners {
            list.clear();
        }
        self.message_listeners.clear();
        self.system_added_listeners.clear();
        self.system_removed_listeners.clear();
    }

    // -- dispatch ---------------------------------------------------------------

    /// Take a pending buffer for dispatch. Hand it back with
    /// [`restore_pending`](Self::restore_pending) to keep its allocation.
    pub(crate) fn take_pending(&mut self, kind: EntityEventKind) -> IndexSet<EntityId> {
        std::mem::take(&mut self.pending[kind.index()])
    }

    pub(crate) fn restore_pending(&mut self, kind: EntityEventKind, mut buffer: IndexSet<EntityId>) {
        buffer.clear();
        let slot = &mut self.pending[kind.index()];
        if slot.is_empty() && slot.capacity() < buffer.capacity() {
            *slot = buffer;
        }
    }

    pub(crate) fn dispatch_arrival(&mut self, kind: EntityEventKind, entity: &Entity) {
        let slot = kind.index() - EntityEventKind::Created.index();
        for (_, listener) in &mut self.arrival_listeners[slot] {
            listener(entity);
        }
    }

    pub(crate) fn dispatch_departure(&mut self, kind: EntityEventKind, id: EntityId) {
        for (_, listener) in &mut self.departure_listeners[kind.index()] {
            listener(id);
        }
    }

    pub(crate) fn fire_messages(&mut self) {
        if self.messages.is_empty() {
            return;
        }
        let mut messages = std::mem::take(&mut self.messages);
        for message in &messages {
            for (_, listener) in &mut self.message_listeners {
                listener(&**message);
            }
        }
        messages.clear();
        if self.messages.is_empty() {
            self.messages = messages;
        }
    }

    pub(crate) fn fire_system_changes(&mut self) {
        for name in self.systems_added.drain(..) {
            for (_, listener) in &mut self.system_added_listeners {
                listener(&name);
            }
        }
        for name in self.systems_removed.drain(..) {
            for (_, listener) in &mut self.system_removed_listeners {
                listener(&name);
            }
        }
    }
}

impl fmt::Debug for WorldEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for kind in EntityEventKind::FLUSH_ORDER {
            map.entry(&kind, &self.pending[kind.index()].len());
        }
        map.entry(&"messages", &self.messages.len()).finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
