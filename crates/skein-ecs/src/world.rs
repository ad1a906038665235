//! Worlds: independent partitions of entities, systems and groups.
//!
//! A [`World`] is driven through three phases per frame:
//!
//! 1. [`pre_update`](World::pre_update) opens the frame window, applies
//!    staged system additions/removals and drains the inbound message and
//!    entity queues.
//! 2. [`update`](World::update) flushes buffered events, then runs every
//!    enabled system in order, flushing entity events after each one.
//! 3. [`post_update`](World::post_update) closes the window.
//!
//! While the window is open, external callers cannot reach the world's
//! [`WorldData`]; [`World::data`] fails with [`EcsError::WorldUpdating`].
//! Other worlds talk to this one only through [`World::receive_entity`] and
//! [`World::receive_message`], which queue work for the next pre-update.

use std::any::{Any, TypeId};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use indexmap::{IndexMap, IndexSet};
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::{debug, trace, warn};

use crate::builder::EntityFactory;
use crate::context::EngineContext;
use crate::entity::{Entity, EntityId};
use crate::events::{EntityEventKind, Message, WorldEvents};
use crate::group::EntityGroup;
use crate::request::WorldOptions;
use crate::system::{System, SystemEntry, SystemList};
use crate::EcsError;

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

/// Type-keyed per-world singletons.
#[derive(Default)]
pub struct Resources {
    values: HashMap<TypeId, Box<dyn Any + Send>>,
}

impl Resources {
    pub fn insert<T: Any + Send>(&mut self, value: T) -> Option<T> {
        let previous = self.values.insert(TypeId::of::<T>(), Box::new(value))?;
        previous.downcast::<T>().ok().map(|b| *b)
    }

    pub fn get<T: Any + Send>(&self) -> Option<&T> {
        self.values.get(&TypeId::of::<T>())?.downcast_ref()
    }

    pub fn get_mut<T: Any + Send>(&mut self) -> Option<&mut T> {
        self.values.get_mut(&TypeId::of::<T>())?.downcast_mut()
    }

    pub fn require<T: Any + Send>(&self) -> Result<&T, EcsError> {
        self.get::<T>().ok_or_else(|| EcsError::ResourceNotFound {
            resource: std::any::type_name::<T>().to_owned(),
        })
    }

    pub fn remove<T: Any + Send>(&mut self) -> Option<T> {
        let previous = self.values.remove(&TypeId::of::<T>())?;
        previous.downcast::<T>().ok().map(|b| *b)
    }

    pub fn contains<T: Any + Send>(&self) -> bool {
        self.values.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resources")
            .field("len", &self.values.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ChangeSink
// ---------------------------------------------------------------------------

/// Ids of entities mutated since the last flush. Entity change listeners
/// write here; the owning world turns the set into `changed` events.
#[derive(Default)]
struct ChangeSink {
    ids: Mutex<IndexSet<EntityId>>,
}

impl ChangeSink {
    fn mark(&self, id: EntityId) {
        self.ids.lock().insert(id);
    }

    fn forget(&self, id: EntityId) {
        self.ids.lock().shift_remove(&id);
    }

    fn clear(&self) {
        self.ids.lock().clear();
    }
}

// ---------------------------------------------------------------------------
// WorldData
// ---------------------------------------------------------------------------

/// Everything a world owns except its systems.
///
/// Systems receive `&mut WorldData` in their hooks. External code reaches it
/// through [`World::data`] outside the frame window.
pub struct WorldData {
    name: String,
    context: Arc<EngineContext>,
    options: WorldOptions,
    entities: IndexMap<EntityId, Entity>,
    named: HashMap<String, EntityId>,
    groups: IndexMap<String, EntityGroup>,
    events: WorldEvents,
    changes: Arc<ChangeSink>,
    resources: Resources,
    systems_to_add: VecDeque<SystemEntry>,
    systems_to_remove: VecDeque<u64>,
    /// Systems that are attached or staged, minus staged removals, with the
    /// id of the instance holding each type.
    system_keys: HashMap<TypeId, u64>,
    next_system_id: u64,
    /// Inbound entities this world refused to import.
    rejected: Vec<Entity>,
    next_group_id: u64,
    paranoid: bool,
}

impl WorldData {
    pub(crate) fn new(
        name: String,
        context: Arc<EngineContext>,
        options: WorldOptions,
        resources: Resources,
    ) -> Self {
        let paranoid = context.paranoid_world_events();
        Self {
            name,
            context,
            options,
            entities: IndexMap::new(),
            named: HashMap::new(),
            groups: IndexMap::new(),
            events: WorldEvents::new(),
            changes: Arc::new(ChangeSink::default()),
            resources,
            systems_to_add: VecDeque::new(),
            systems_to_remove: VecDeque::new(),
            system_keys: HashMap::new(),
            next_system_id: 0,
            rejected: Vec::new(),
            next_group_id: 0,
            paranoid,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.context
    }

    pub fn options(&self) -> &WorldOptions {
        &self.options
    }

    pub fn options_as<T: Any>(&self) -> Option<&T> {
        self.options.as_deref()?.downcast_ref()
    }

    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    pub fn resources_mut(&mut self) -> &mut Resources {
        &mut self.resources
    }

    pub fn events(&self) -> &WorldEvents {
        &self.events
    }

    /// Listener registration.
    pub fn events_mut(&mut self) -> &mut WorldEvents {
        &mut self.events
    }

    // -- entity queries ----------------------------------------------------------

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> + '_ {
        self.entities.values()
    }

    pub fn entities_mut(&mut self) -> impl Iterator<Item = &mut Entity> + '_ {
        self.entities.values_mut()
    }

    pub fn contains_entity(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    pub fn require_entity(&self, id: EntityId) -> Result<&Entity, EcsError> {
        self.entities
            .get(&id)
            .ok_or(EcsError::EntityNotFound { entity: id })
    }

    pub fn require_entity_mut(&mut self, id: EntityId) -> Result<&mut Entity, EcsError> {
        self.entities
            .get_mut(&id)
            .ok_or(EcsError::EntityNotFound { entity: id })
    }

    pub fn named_entity(&self, name: &str) -> Result<&Entity, EcsError> {
        self.named_entity_or_none(name)
            .ok_or_else(|| EcsError::NamedEntityNotFound {
                world: self.name.clone(),
                name: name.to_owned(),
            })
    }

    pub fn named_entity_or_none(&self, name: &str) -> Option<&Entity> {
        self.entities.get(self.named.get(name)?)
    }

    pub fn named_entity_mut(&mut self, name: &str) -> Result<&mut Entity, EcsError> {
        match self.named.get(name) {
            Some(id) => self
                .entities
                .get_mut(id)
                .ok_or(EcsError::EntityNotFound { entity: *id }),
            None => Err(EcsError::NamedEntityNotFound {
                world: self.name.clone(),
                name: name.to_owned(),
            }),
        }
    }

    // -- entity mutations -------------------------------------------------------

    /// Rename an owned entity, keeping the name index consistent. `None`
    /// removes the name.
    pub fn rename_entity(&mut self, id: EntityId, name: Option<&str>) -> Result<(), EcsError> {
        if !self.entities.contains_key(&id) {
            return Err(EcsError::EntityNotFound { entity: id });
        }
        if let Some(new_name) = name {
            match self.named.get(new_name) {
                Some(&holder) if holder == id => return Ok(()),
                Some(_) => {
                    return Err(EcsError::NamedEntityExists {
                        world: self.name.clone(),
                        name: new_name.to_owned(),
                    })
                }
                None => {}
            }
        }
        let entity = self.require_entity_mut(id)?;
        let previous = entity.replace_name(name.map(str::to_owned));
        if let Some(previous) = previous {
            self.named.remove(&previous);
        }
        if let Some(new_name) = name {
            self.named.insert(new_name.to_owned(), id);
        }
        Ok(())
    }

    /// Delete an entity from this world. The returned entity is unowned and
    /// can be imported elsewhere.
    pub fn delete_entity(&mut self, id: EntityId) -> Result<Entity, EcsError> {
        let entity = self.detach_entity(id)?;
        self.events.push(EntityEventKind::Deleted, id);
        self.events.push(EntityEventKind::Removed, id);
        Ok(entity)
    }

    /// Move an entity to another world. It arrives at the target's next
    /// pre-update.
    pub fn send_entity(&mut self, target: &str, id: EntityId) -> Result<(), EcsError> {
        if !self.entities.contains_key(&id) {
            return Err(EcsError::EntityNotFound { entity: id });
        }
        let world = self.context.world(target)?;
        if world.lifecycle() == WorldLifecycle::Destroyed {
            return Err(EcsError::WorldDestroyed {
                world: target.to_owned(),
            });
        }
        let entity = self.detach_entity(id)?;
        self.events.push(EntityEventKind::Left, id);
        self.events.push(EntityEventKind::Removed, id);
        world.receive_entity(entity)
    }

    pub fn send_message(&self, target: &str, message: impl Any + Send) -> Result<(), EcsError> {
        self.context.send_message(target, message)
    }

    /// Drop every entity without firing departure events. Groups are
    /// emptied and pending entity events are discarded.
    pub fn clear_entities(&mut self) -> Vec<Entity> {
        self.named.clear();
        self.changes.clear();
        self.events.clear_entity_events();
        for group in self.groups.values_mut() {
            group.clear();
        }
        self.entities
            .drain(..)
            .map(|(_, mut entity)| {
                entity.detach_from_world();
                entity
            })
            .collect()
    }

    /// Check that `entity` can join this world without touching it.
    fn admit(&self, entity: &Entity) -> Result<(), EcsError> {
        if let Some(owner) = entity.world() {
            return Err(EcsError::EntityOwned {
                entity: entity.id(),
                owner: owner.to_owned(),
            });
        }
        if self.entities.contains_key(&entity.id()) {
            return Err(EcsError::DuplicateEntityId {
                world: self.name.clone(),
                entity: entity.id(),
            });
        }
        if let Some(name) = entity.name() {
            if self.named.contains_key(name) {
                return Err(EcsError::NamedEntityExists {
                    world: self.name.clone(),
                    name: name.to_owned(),
                });
            }
        }
        Ok(())
    }

    fn add_entity(&mut self, mut entity: Entity) -> Result<EntityId, EcsError> {
        self.admit(&entity)?;
        let id = entity.id();
        let sink = Arc::clone(&self.changes);
        entity.attach_to_world(&self.name, Arc::new(move || sink.mark(id)))?;
        if let Some(name) = entity.name() {
            self.named.insert(name.to_owned(), id);
        }
        self.entities.insert(id, entity);
        Ok(id)
    }

    fn detach_entity(&mut self, id: EntityId) -> Result<Entity, EcsError> {
        let mut entity = self
            .entities
            .swap_remove(&id)
            .ok_or(EcsError::EntityNotFound { entity: id })?;
        if let Some(name) = entity.name() {
            if self.named.get(name) == Some(&id) {
                self.named.remove(name);
            }
        }
        entity.detach_from_world();
        self.changes.forget(id);
        self.events.forget_arrivals(id);
        Ok(entity)
    }

    /// Import an inbound entity. A refused entity is kept in the rejected
    /// list instead of being dropped.
    fn entity_received(&mut self, entity: Entity) -> Result<EntityId, EcsError> {
        if let Err(err) = self.admit(&entity) {
            warn!(world = %self.name, entity = %entity.id(), error = %err, "inbound entity rejected");
            self.rejected.push(entity);
            return Err(err);
        }
        let id = self.add_entity(entity)?;
        self.events.push(EntityEventKind::Received, id);
        self.events.push(EntityEventKind::Added, id);
        Ok(id)
    }

    /// Inbound entities that could not be imported, in arrival order. They
    /// are unowned and can be renamed, imported here or sent elsewhere.
    pub fn rejected_entities(&self) -> &[Entity] {
        &self.rejected
    }

    pub fn take_rejected_entities(&mut self) -> Vec<Entity> {
        std::mem::take(&mut self.rejected)
    }

    // -- groups -----------------------------------------------------------------

    /// Create and attach a group, seeded from the current entities. An empty
    /// name gets a generated unique one. Returns the group's name.
    pub fn create_entity_group(
        &mut self,
        name: &str,
        predicate: impl Fn(&Entity) -> bool + Send + Sync + 'static,
    ) -> Result<String, EcsError> {
        let name = if name.is_empty() {
            self.generate_group_name()
        } else {
            name.to_owned()
        };
        self.attach_group(EntityGroup::new(name.clone(), predicate))?;
        Ok(name)
    }

    fn generate_group_name(&mut self) -> String {
        loop {
            self.next_group_id += 1;
            let candidate = format!("group-{}", self.next_group_id);
            if !self.groups.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    pub(crate) fn attach_group(&mut self, mut group: EntityGroup) -> Result<(), EcsError> {
        if self.groups.contains_key(group.name()) {
            return Err(EcsError::GroupExists {
                world: self.name.clone(),
                group: group.name().to_owned(),
            });
        }
        group.attach(self.entities.values())?;
        group.flush_changes();
        self.groups.insert(group.name().to_owned(), group);
        Ok(())
    }

    pub fn entity_group(&self, name: &str) -> Result<&EntityGroup, EcsError> {
        self.groups.get(name).ok_or_else(|| EcsError::GroupNotFound {
            world: self.name.clone(),
            group: name.to_owned(),
        })
    }

    pub fn entity_group_or_none(&self, name: &str) -> Option<&EntityGroup> {
        self.groups.get(name)
    }

    /// Mutable access, for registering change listeners.
    pub fn entity_group_mut(&mut self, name: &str) -> Result<&mut EntityGroup, EcsError> {
        self.groups.get_mut(name).ok_or_else(|| EcsError::GroupNotFound {
            world: self.name.clone(),
            group: name.to_owned(),
        })
    }

    pub fn group_names(&self) -> Vec<&str> {
        self.groups.keys().map(String::as_str).collect()
    }

    /// Detach and drop a group.
    pub fn remove_entity_group(&mut self, name: &str) -> Result<(), EcsError> {
        let mut group = self
            .groups
            .shift_remove(name)
            .ok_or_else(|| EcsError::GroupNotFound {
                world: self.name.clone(),
                group: name.to_owned(),
            })?;
        group.finish();
        Ok(())
    }

    /// Visit every member of a group mutably. Membership changes caused by
    /// the visit apply at the next event flush.
    pub fn for_each_in_group(
        &mut self,
        name: &str,
        mut f: impl FnMut(&mut Entity),
    ) -> Result<(), EcsError> {
        let group = self.groups.get(name).ok_or_else(|| EcsError::GroupNotFound {
            world: self.name.clone(),
            group: name.to_owned(),
        })?;
        for id in group.iter() {
            if let Some(entity) = self.entities.get_mut(&id) {
                f(entity);
            }
        }
        Ok(())
    }

    // -- systems ----------------------------------------------------------------

    /// Stage a system. It attaches at the next pre-update.
    pub fn add_system<S: System>(&mut self, system: S) -> Result<(), EcsError> {
        self.stage_system(SystemEntry::new(system))
    }

    pub(crate) fn stage_system(&mut self, entry: SystemEntry) -> Result<(), EcsError> {
        if self.system_keys.contains_key(&entry.key) {
            return Err(EcsError::SystemExists {
                system: entry.name.to_owned(),
            });
        }
        let entry = entry.with_id(self.next_system_id);
        self.next_system_id += 1;
        self.system_keys.insert(entry.key, entry.id);
        self.systems_to_add.push_back(entry);
        Ok(())
    }

    /// Stage removal of a system. It stops running immediately and detaches
    /// at the next pre-update. A system of the same type added afterwards is
    /// a separate instance and is not affected.
    pub fn remove_system<S: System>(&mut self) -> Result<(), EcsError> {
        let id = self
            .system_keys
            .remove(&TypeId::of::<S>())
            .ok_or_else(|| EcsError::SystemNotFound {
                system: std::any::type_name::<S>().to_owned(),
            })?;
        match self.systems_to_add.iter().position(|e| e.id == id) {
            Some(position) => {
                self.systems_to_add.remove(position);
            }
            None => self.systems_to_remove.push_back(id),
        }
        Ok(())
    }

    pub fn has_system<S: System>(&self) -> bool {
        self.system_keys.contains_key(&TypeId::of::<S>())
    }

    fn is_removal_staged(&self, id: u64) -> bool {
        self.systems_to_remove.contains(&id)
    }

    // -- event flushing ---------------------------------------------------------

    /// Messages, system changes, then entity events.
    fn fire_all_events(&mut self) -> Result<(), EcsError> {
        self.events.fire_messages();
        self.events.fire_system_changes();
        self.fire_entity_events()
    }

    fn fire_entity_events(&mut self) -> Result<(), EcsError> {
        self.collect_changes();
        for kind in EntityEventKind::DEPARTURES {
            let pending = self.events.take_pending(kind);
            let result = self.dispatch_departures(kind, &pending);
            self.events.restore_pending(kind, pending);
            result?;
        }
        for kind in EntityEventKind::ARRIVALS {
            let pending = self.events.take_pending(kind);
            let result = self.dispatch_arrivals(kind, &pending);
            self.events.restore_pending(kind, pending);
            result?;
        }
        for group in self.groups.values_mut() {
            group.flush_changes();
        }
        Ok(())
    }

    fn collect_changes(&mut self) {
        let mut marked = self.changes.ids.lock();
        for id in marked.drain(..) {
            if self.entities.contains_key(&id) {
                self.events.push(EntityEventKind::Changed, id);
            }
        }
    }

    fn dispatch_departures(
        &mut self,
        kind: EntityEventKind,
        pending: &IndexSet<EntityId>,
    ) -> Result<(), EcsError> {
        for &id in pending {
            if self.paranoid && self.entities.contains_key(&id) {
                return Err(EcsError::EntityStillOwned {
                    world: self.name.clone(),
                    entity: id,
                });
            }
            self.events.dispatch_departure(kind, id);
            if kind == EntityEventKind::Removed {
                for group in self.groups.values_mut() {
                    group.entity_removed(id);
                }
            }
        }
        Ok(())
    }

    fn dispatch_arrivals(
        &mut self,
        kind: EntityEventKind,
        pending: &IndexSet<EntityId>,
    ) -> Result<(), EcsError> {
        for &id in pending {
            let entity = match self.entities.get(&id) {
                Some(entity) if !self.paranoid || entity.world() == Some(self.name.as_str()) => {
                    entity
                }
                _ if self.paranoid => {
                    return Err(EcsError::EntityNotInWorld {
                        world: self.name.clone(),
                        entity: id,
                    })
                }
                _ => continue,
            };
            self.events.dispatch_arrival(kind, entity);
            match kind {
                EntityEventKind::Added => {
                    for group in self.groups.values_mut() {
                        group.entity_added(entity);
                    }
                }
                EntityEventKind::Changed => {
                    for group in self.groups.values_mut() {
                        group.entity_changed(entity);
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn teardown(&mut self) {
        self.systems_to_add.clear();
        self.systems_to_remove.clear();
        self.system_keys.clear();
        self.rejected.clear();
        self.events.clear();
        self.clear_entities();
        for group in self.groups.values_mut() {
            group.finish();
        }
    }
}

impl EntityFactory for WorldData {
    fn context(&self) -> &Arc<EngineContext> {
        &self.context
    }

    /// Take ownership of an unowned entity immediately, firing `created`
    /// and `added` at the next flush.
    fn import_entity(&mut self, entity: Entity) -> Result<EntityId, EcsError> {
        let id = self.add_entity(entity)?;
        self.events.push(EntityEventKind::Created, id);
        self.events.push(EntityEventKind::Added, id);
        Ok(id)
    }
}

impl fmt::Debug for WorldData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorldData")
            .field("name", &self.name)
            .field("entities", &self.entities.len())
            .field("groups", &self.group_names())
            .field("events", &self.events)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// World
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorldLifecycle {
    /// Built but `on_create` has not run yet.
    Building,
    Live,
    Destroyed,
}

struct WorldState {
    data: WorldData,
    systems: SystemList,
}

pub struct World {
    name: String,
    update_group: String,
    options: WorldOptions,
    lifecycle: Mutex<WorldLifecycle>,
    updating: AtomicBool,
    update_index: AtomicU64,
    entity_inbox: (Sender<Entity>, Receiver<Entity>),
    message_inbox: (Sender<Message>, Receiver<Message>),
    state: Mutex<WorldState>,
}

impl World {
    pub(crate) fn new(
        name: String,
        update_group: String,
        options: WorldOptions,
        data: WorldData,
    ) -> Self {
        Self {
            name,
            update_group,
            options,
            lifecycle: Mutex::new(WorldLifecycle::Building),
            updating: AtomicBool::new(false),
            update_index: AtomicU64::new(0),
            entity_inbox: crossbeam_channel::unbounded(),
            message_inbox: crossbeam_channel::unbounded(),
            state: Mutex::new(WorldState {
                data,
                systems: SystemList::default(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The scheduler update group this world runs in.
    pub fn update_group(&self) -> &str {
        &self.update_group
    }

    pub fn options(&self) -> &WorldOptions {
        &self.options
    }

    pub fn options_as<T: Any>(&self) -> Option<&T> {
        self.options.as_deref()?.downcast_ref()
    }

    pub fn lifecycle(&self) -> WorldLifecycle {
        *self.lifecycle.lock()
    }

    /// True between `pre_update` and `post_update`.
    pub fn is_updating(&self) -> bool {
        self.updating.load(Ordering::Acquire)
    }

    /// Number of completed `update` calls.
    pub fn update_index(&self) -> u64 {
        self.update_index.load(Ordering::Acquire)
    }

    /// Entities and messages waiting for the next pre-update.
    pub fn pending_inbound(&self) -> usize {
        self.entity_inbox.1.len() + self.message_inbox.1.len()
    }

    // -- external access --------------------------------------------------------

    fn lock_external(&self) -> Result<MutexGuard<'_, WorldState>, EcsError> {
        if self.updating.load(Ordering::Acquire) {
            return Err(EcsError::WorldUpdating {
                world: self.name.clone(),
            });
        }
        self.state.try_lock().ok_or_else(|| EcsError::WorldBusy {
            world: self.name.clone(),
        })
    }

    /// Lock the world's data for external inspection or mutation. Fails
    /// while the frame window is open.
    pub fn data(&self) -> Result<MappedMutexGuard<'_, WorldData>, EcsError> {
        let guard = self.lock_external()?;
        Ok(MutexGuard::map(guard, |state| &mut state.data))
    }

    /// Run `f` against the attached system of type `S`.
    pub fn with_system<S: System, R>(&self, f: impl FnOnce(&mut S) -> R) -> Result<R, EcsError> {
        let mut state = self.lock_external()?;
        let system = state
            .systems
            .find_mut::<S>()
            .ok_or_else(|| EcsError::SystemNotFound {
                system: std::any::type_name::<S>().to_owned(),
            })?;
        Ok(f(system))
    }

    /// Attached systems in execution order.
    pub fn system_names(&self) -> Result<Vec<&'static str>, EcsError> {
        Ok(self.lock_external()?.systems.names())
    }

    /// Queue an unowned entity for import at the next pre-update.
    pub fn receive_entity(&self, entity: Entity) -> Result<(), EcsError> {
        if let Some(owner) = entity.world() {
            return Err(EcsError::EntityOwned {
                entity: entity.id(),
                owner: owner.to_owned(),
            });
        }
        self.entity_inbox
            .0
            .send(entity)
            .map_err(|_| self.inbox_closed())
    }

    /// Queue a message for delivery at the next pre-update.
    pub fn receive_message(&self, message: Message) -> Result<(), EcsError> {
        self.message_inbox
            .0
            .send(message)
            .map_err(|_| self.inbox_closed())
    }

    fn inbox_closed(&self) -> EcsError {
        EcsError::InboxClosed {
            world: self.name.clone(),
        }
    }

    // -- lifecycle --------------------------------------------------------------

    /// Attach the initial systems, import the initial entities and flush
    /// the resulting events. Runs once; later calls are no-ops.
    pub fn on_create(&self) -> Result<(), EcsError> {
        {
            let mut lifecycle = self.lifecycle.lock();
            match *lifecycle {
                WorldLifecycle::Building => *lifecycle = WorldLifecycle::Live,
                WorldLifecycle::Live => return Ok(()),
                WorldLifecycle::Destroyed => return Err(self.destroyed()),
            }
        }
        let mut guard = self.state.lock();
        let state = &mut *guard;
        self.prepare(state)?;
        state.data.fire_all_events()?;
        debug!(world = %self.name, entities = state.data.entity_count(), "world created");
        Ok(())
    }

    /// Detach every system, drop every entity and finish every group.
    pub fn on_destroy(&self) {
        *self.lifecycle.lock() = WorldLifecycle::Destroyed;
        let mut guard = self.state.lock();
        let state = &mut *guard;
        for mut entry in state.systems.drain() {
            entry.system.on_detach();
        }
        state.data.teardown();
        while self.entity_inbox.1.try_recv().is_ok() {}
        while self.message_inbox.1.try_recv().is_ok() {}
        self.updating.store(false, Ordering::Release);
        debug!(world = %self.name, "world destroyed");
    }

    fn destroyed(&self) -> EcsError {
        EcsError::WorldDestroyed {
            world: self.name.clone(),
        }
    }

    // -- frame phases -----------------------------------------------------------

    /// Open the frame window and apply everything queued since last frame.
    pub fn pre_update(&self) -> Result<(), EcsError> {
        if self.lifecycle() == WorldLifecycle::Destroyed {
            return Err(self.destroyed());
        }
        self.updating.store(true, Ordering::Release);
        let mut guard = self.state.lock();
        self.prepare(&mut guard)
    }

    /// Flush pending events, then run each enabled system.
    pub fn update(&self, delta: f32) -> Result<(), EcsError> {
        let index = self.update_index.fetch_add(1, Ordering::AcqRel) + 1;
        trace!(world = %self.name, index, "world update");

        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.data.fire_all_events()?;
        state.systems.refresh();
        for entry in state.systems.iter_mut() {
            if !entry.system.enabled() || state.data.is_removal_staged(entry.id) {
                continue;
            }
            entry
                .system
                .update(&mut state.data, delta)
                .map_err(|err| self.system_failed(entry.name, &err))?;
            state.data.fire_entity_events()?;
        }
        Ok(())
    }

    /// Close the frame window.
    pub fn post_update(&self) {
        self.updating.store(false, Ordering::Release);
    }

    fn system_failed(&self, system: &str, err: &anyhow::Error) -> EcsError {
        EcsError::SystemFailed {
            world: self.name.clone(),
            system: system.to_owned(),
            reason: format!("{err:#}"),
        }
    }

    /// Apply staged system removals and additions, then inbound messages,
    /// then inbound entities.
    ///
    /// Every inbound entity is processed even when some are rejected; the
    /// first rejection is returned.
    fn prepare(&self, state: &mut WorldState) -> Result<(), EcsError> {
        self.detach_removed(state);
        while let Some(mut entry) = state.data.systems_to_add.pop_front() {
            if let Err(err) = entry.system.on_attach(&mut state.data) {
                if state.data.system_keys.get(&entry.key) == Some(&entry.id) {
                    state.data.system_keys.remove(&entry.key);
                }
                return Err(self.system_failed(entry.name, &err));
            }
            state.data.events.push_system_added(entry.name);
            debug!(world = %self.name, system = entry.name, "system attached");
            state.systems.push(entry);
        }
        // Attach hooks may have staged removals, including their own.
        self.detach_removed(state);

        for message in self.message_inbox.1.try_iter() {
            state.data.events.push_message(message);
        }
        let mut first_error = None;
        for entity in self.entity_inbox.1.try_iter() {
            if let Err(err) = state.data.entity_received(entity) {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn detach_removed(&self, state: &mut WorldState) {
        while let Some(id) = state.data.systems_to_remove.pop_front() {
            if let Some(mut entry) = state.systems.remove(id) {
                entry.system.on_detach();
                state.data.events.push_system_removed(entry.name);
                debug!(world = %self.name, system = entry.name, "system detached");
            }
        }
    }
}

impl fmt::Debug for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("World")
            .field("name", &self.name)
            .field("update_group", &self.update_group)
            .field("lifecycle", &self.lifecycle())
            .field("updating", &self.is_updating())
            .field("update_index", &self.update_index())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
