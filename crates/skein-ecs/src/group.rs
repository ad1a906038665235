//! Reactive entity groups.
//!
//! An [`EntityGroup`] is a named predicate over entities plus the ordered set
//! of ids that currently satisfy it. Once attached to a world it is fed the
//! world's `added`, `removed` and `changed` events and keeps its membership
//! equal to "entities in the world for which the predicate holds".
//!
//! Membership changes are batched: the group records that it is dirty and
//! notifies its listeners once when the world flushes its events.

use std::collections::HashMap;
use std::fmt;

use crate::entity::{Entity, EntityId};
use crate::EcsError;

pub type Predicate = Box<dyn Fn(&Entity) -> bool + Send + Sync>;

/// Called once per flush in which the group's membership changed.
pub type GroupListener = Box<dyn FnMut(&EntityGroup) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    Detached,
    Attached,
    Finished,
}

// ---------------------------------------------------------------------------
// UniqueList
// ---------------------------------------------------------------------------

/// Insertion-ordered set with O(1) insert, lookup and removal.
///
/// Removal leaves a tombstone; the backing vector is compacted once
/// tombstones outnumber live entries.
#[derive(Debug, Default)]
pub(crate) struct UniqueList {
    slots: Vec<Option<EntityId>>,
    positions: HashMap<EntityId, usize>,
}

impl UniqueList {
    pub(crate) fn len(&self) -> usize {
        self.positions.len()
    }

    pub(crate) fn contains(&self, id: EntityId) -> bool {
        self.positions.contains_key(&id)
    }

    pub(crate) fn insert(&mut self, id: EntityId) -> bool {
        if self.positions.contains_key(&id) {
            return false;
        }
        self.positions.insert(id, self.slots.len());
        self.slots.push(Some(id));
        true
    }

    pub(crate) fn remove(&mut self, id: EntityId) -> bool {
        let Some(position) = self.positions.remove(&id) else {
            return false;
        };
        self.slots[position] = None;
        if self.slots.len() - self.positions.len() > self.positions.len() {
            self.compact();
        }
        true
    }

    fn compact(&mut self) {
        self.slots.retain(Option::is_some);
        for (position, id) in self.slots.iter().flatten().enumerate() {
            self.positions.insert(*id, position);
        }
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.positions.clear();
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.slots.iter().flatten().copied()
    }
}

// ---------------------------------------------------------------------------
// EntityGroup
// ---------------------------------------------------------------------------

pub struct EntityGroup {
    name: String,
    predicate: Predicate,
    members: UniqueList,
    state: GroupState,
    dirty: bool,
    version: u64,
    listeners: Vec<GroupListener>,
}

impl EntityGroup {
    pub fn new(
        name: impl Into<String>,
        predicate: impl Fn(&Entity) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self::from_boxed(name.into(), Box::new(predicate))
    }

    pub(crate) fn from_boxed(name: String, predicate: Predicate) -> Self {
        Self {
            name,
            predicate,
            members: UniqueList::default(),
            state: GroupState::Detached,
            dirty: false,
            version: 0,
            listeners: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> GroupState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.len() == 0
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.members.contains(id)
    }

    /// Members in the order they joined.
    pub fn iter(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.members.iter()
    }

    pub fn to_vec(&self) -> Vec<EntityId> {
        self.members.iter().collect()
    }

    /// Bumped once per flush in which membership changed.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Evaluate the predicate without touching membership.
    pub fn matches(&self, entity: &Entity) -> bool {
        (self.predicate)(entity)
    }

    pub fn on_change(&mut self, listener: impl FnMut(&EntityGroup) + Send + 'static) {
        if self.state != GroupState::Finished {
            self.listeners.push(Box::new(listener));
        }
    }

    /// Subscribe to a world's entity feed and seed membership from its
    /// current entities.
    pub(crate) fn attach<'a>(
        &mut self,
        entities: impl IntoIterator<Item = &'a Entity>,
    ) -> Result<(), EcsError> {
        if self.state != GroupState::Detached {
            return Err(EcsError::GroupAlreadyAttached {
                group: self.name.clone(),
            });
        }
        self.state = GroupState::Attached;
        for entity in entities {
            self.entity_added(entity);
        }
        Ok(())
    }

    pub(crate) fn entity_added(&mut self, entity: &Entity) {
        if self.state == GroupState::Attached
            && (self.predicate)(entity)
            && self.members.insert(entity.id())
        {
            self.dirty = true;
        }
    }

    pub(crate) fn entity_removed(&mut self, id: EntityId) {
        if self.members.remove(id) {
            self.dirty = true;
        }
    }

    pub(crate) fn entity_changed(&mut self, entity: &Entity) {
        if self.state != GroupState::Attached {
            return;
        }
        let changed = if (self.predicate)(entity) {
            self.members.insert(entity.id())
        } else {
            self.members.remove(entity.id())
        };
        self.dirty |= changed;
    }

    /// Drop every member, e.g. when the world clears its entities.
    pub(crate) fn clear(&mut self) {
        if self.members.len() > 0 {
            self.members.clear();
            self.dirty = true;
        }
    }

    /// Notify listeners if membership changed since the last flush.
    pub(crate) fn flush_changes(&mut self) -> bool {
        if !self.dirty {
            return false;
        }
        self.dirty = false;
        self.version += 1;
        let mut listeners = std::mem::take(&mut self.listeners);
        for listener in &mut listeners {
            listener(self);
        }
        listeners.append(&mut self.listeners);
        self.listeners = listeners;
        true
    }

    /// Detach from the world for good. Calling this more than once is a no-op.
    pub(crate) fn finish(&mut self) {
        if self.state == GroupState::Finished {
            return;
        }
        self.state = GroupState::Finished;
        self.members.clear();
        self.listeners.clear();
        self.dirty = false;
    }
}

impl fmt::Debug for EntityGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityGroup")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("len", &self.members.len())
            .field("version", &self.version)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
