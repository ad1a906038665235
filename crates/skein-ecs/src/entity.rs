//! Entities: an id, an optional name, an owning world and an attribute table.
//!
//! Entities are plain values. Only one world owns an entity at a time; the
//! owner is recorded on the entity itself and set/cleared by the world as
//! the entity is added, deleted or sent away.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::attributes::{AttributeTable, ChangeListener, Component};
use crate::mapper::{ComponentMapper, SlotIndex};
use crate::EcsError;

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// Process-unique entity identifier. Issued monotonically by the engine
/// context and never reused.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(u64);

impl EntityId {
    #[inline]
    pub fn to_raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

pub struct Entity {
    id: EntityId,
    name: Option<String>,
    /// Name of the owning world, `None` while in transit or unowned.
    world: Option<String>,
    attributes: AttributeTable,
}

impl Entity {
    /// Create an unowned entity. Ids come from
    /// [`EngineContext::new_entity`](crate::context::EngineContext::new_entity).
    pub(crate) fn new(id: EntityId, mapper: Arc<ComponentMapper>) -> Self {
        Self {
            id,
            name: None,
            world: None,
            attributes: AttributeTable::new(mapper),
        }
    }

    #[inline]
    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn has_name(&self) -> bool {
        self.name.is_some()
    }

    /// Name the entity. Only allowed while unowned; owned entities are
    /// renamed through their world so its name index stays consistent.
    pub fn set_name(&mut self, name: impl Into<String>) -> Result<(), EcsError> {
        self.ensure_unowned()?;
        self.name = Some(name.into());
        Ok(())
    }

    pub fn clear_name(&mut self) -> Result<(), EcsError> {
        self.ensure_unowned()?;
        self.name = None;
        Ok(())
    }

    pub(crate) fn replace_name(&mut self, name: Option<String>) -> Option<String> {
        std::mem::replace(&mut self.name, name)
    }

    /// Name of the owning world.
    pub fn world(&self) -> Option<&str> {
        self.world.as_deref()
    }

    pub fn is_owned(&self) -> bool {
        self.world.is_some()
    }

    fn ensure_unowned(&self) -> Result<(), EcsError> {
        match &self.world {
            Some(owner) => Err(EcsError::EntityOwned {
                entity: self.id,
                owner: owner.clone(),
            }),
            None => Ok(()),
        }
    }

    pub(crate) fn attach_to_world(
        &mut self,
        world: &str,
        listener: ChangeListener,
    ) -> Result<(), EcsError> {
        self.ensure_unowned()?;
        self.world = Some(world.to_owned());
        self.attributes.set_listener(Some(listener));
        Ok(())
    }

    pub(crate) fn detach_from_world(&mut self) {
        self.world = None;
        self.attributes.set_listener(None);
    }

    pub fn attributes(&self) -> &AttributeTable {
        &self.attributes
    }

    /// Direct table access. Mutations still report to the owning world.
    pub fn attributes_mut(&mut self) -> &mut AttributeTable {
        &mut self.attributes
    }

    /// Report an in-place edit so groups re-evaluate this entity at the next
    /// event flush.
    pub fn notify_changed(&self) {
        self.attributes.notify_changed();
    }

    fn index<T: Component>(&self) -> SlotIndex<T> {
        self.attributes.mapper().index_for::<T>()
    }

    // -- components by type -------------------------------------------------

    pub fn contains<T: Component>(&self) -> bool {
        self.attributes.contains(self.index::<T>())
    }

    pub fn get<T: Component>(&self) -> Option<&T> {
        self.attributes.get(self.index::<T>())
    }

    pub fn get_mut<T: Component>(&mut self) -> Option<&mut T> {
        let index = self.index::<T>();
        self.attributes.get_mut(index)
    }

    pub fn require<T: Component>(&self) -> Result<&T, EcsError> {
        self.attributes.require(self.index::<T>())
    }

    pub fn set<T: Component>(&mut self, value: T) -> Option<T> {
        let index = self.index::<T>();
        self.attributes.set(index, value)
    }

    pub fn add<T: Component>(&mut self, value: T) -> Result<(), EcsError> {
        let index = self.index::<T>();
        self.attributes.add(index, value)
    }

    pub fn remove<T: Component>(&mut self) -> Option<T> {
        let index = self.index::<T>();
        self.attributes.remove(index)
    }

    // -- components by pre-resolved index -----------------------------------

    pub fn contains_at<T: Component>(&self, index: SlotIndex<T>) -> bool {
        self.attributes.contains(index)
    }

    pub fn get_at<T: Component>(&self, index: SlotIndex<T>) -> Option<&T> {
        self.attributes.get(index)
    }

    pub fn get_mut_at<T: Component>(&mut self, index: SlotIndex<T>) -> Option<&mut T> {
        self.attributes.get_mut(index)
    }

    pub fn set_at<T: Component>(&mut self, index: SlotIndex<T>, value: T) -> Option<T> {
        self.attributes.set(index, value)
    }

    pub fn add_at<T: Component>(&mut self, index: SlotIndex<T>, value: T) -> Result<(), EcsError> {
        self.attributes.add(index, value)
    }

    pub fn remove_at<T: Component>(&mut self, index: SlotIndex<T>) -> Option<T> {
        self.attributes.remove(index)
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("world", &self.world)
            .field("components", &self.attributes)
            .finish()
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "Entity({}){{{}}}", self.id, name),
            None => write!(f, "Entity({})", self.id),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Tag;

    fn entity(id: u64) -> Entity {
        Entity::new(EntityId::from_raw(id), Arc::new(ComponentMapper::new()))
    }

    #[test]
    fn typed_and_indexed_access_agree() {
        let mut e = entity(1);
        e.set(Position { x: 1.0, y: 1.0 });
        let index = e.attributes().mapper().index_for::<Position>();
        assert_eq!(e.get_at(index), e.get::<Position>());
        e.get_mut_at(index).unwrap().x = 9.0;
        assert_eq!(e.get::<Position>().unwrap().x, 9.0);
        assert!(e.contains_at(index));
        assert_eq!(e.remove::<Position>(), Some(Position { x: 9.0, y: 1.0 }));
        assert!(!e.contains::<Position>());
    }

    #[test]
    fn owned_entities_cannot_be_renamed_directly() {
        let mut e = entity(2);
        e.set_name("player").unwrap();
        e.attach_to_world("arena", Arc::new(|| {})).unwrap();
        let err = e.set_name("other").unwrap_err();
        assert!(matches!(err, EcsError::EntityOwned { .. }));
        assert_eq!(e.name(), Some("player"));

        e.detach_from_world();
        e.clear_name().unwrap();
        assert!(!e.has_name());
    }

    #[test]
    fn attaching_twice_fails() {
        let mut e = entity(3);
        e.attach_to_world("a", Arc::new(|| {})).unwrap();
        let err = e.attach_to_world("b", Arc::new(|| {})).unwrap_err();
        assert!(matches!(err, EcsError::EntityOwned { ref owner, .. } if owner == "a"));
        assert_eq!(e.world(), Some("a"));
    }

    #[test]
    fn mutations_reach_the_world_listener_while_owned() {
        let mut e = entity(4);
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        e.attach_to_world(
            "arena",
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

        e.add(Tag).unwrap();
        e.notify_changed();
        assert_eq!(fired.load(Ordering::SeqCst), 2);

        e.detach_from_world();
        e.remove::<Tag>();
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn display_includes_name() {
        let mut e = entity(7);
        assert_eq!(e.to_string(), "Entity(7)");
        e.set_name("boss").unwrap();
        assert_eq!(e.to_string(), "Entity(7){boss}");
        assert!(e.require::<Tag>().is_err());
    }
}
