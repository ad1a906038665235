//! Staged world construction.
//!
//! A [`WorldBuilder`] collects everything a new world starts with: systems,
//! groups, resources and initial entities. [`WorldBuilder::build`] turns it
//! into a [`World`] in the `Building` state. Systems are staged and entities
//! are queued in the world's inbox, so both land during the world's
//! `on_create` window like any later addition would.

use std::any::TypeId;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::context::EngineContext;
use crate::entity::{Entity, EntityId};
use crate::group::{EntityGroup, Predicate};
use crate::request::WorldOptions;
use crate::system::{InitSystem, System, SystemEntry};
use crate::world::{Resources, World, WorldData};
use crate::EcsError;

// ---------------------------------------------------------------------------
// EntityFactory
// ---------------------------------------------------------------------------

/// Anything that can mint entities and take ownership of them.
pub trait EntityFactory {
    fn context(&self) -> &Arc<EngineContext>;

    /// Take ownership of an unowned entity.
    fn import_entity(&mut self, entity: Entity) -> Result<EntityId, EcsError>;

    fn import_entities(
        &mut self,
        entities: impl IntoIterator<Item = Entity>,
    ) -> Result<Vec<EntityId>, EcsError>
    where
        Self: Sized,
    {
        entities
            .into_iter()
            .map(|entity| self.import_entity(entity))
            .collect()
    }

    /// Mint a new entity, run `init` on it, then import it.
    fn create_entity<F>(&mut self, init: F) -> Result<EntityId, EcsError>
    where
        F: FnOnce(&mut Entity) -> Result<(), EcsError>,
        Self: Sized,
    {
        let entity = self.context().create_entity(init)?;
        self.import_entity(entity)
    }

    fn create_named_entity<F>(&mut self, name: &str, init: F) -> Result<EntityId, EcsError>
    where
        F: FnOnce(&mut Entity) -> Result<(), EcsError>,
        Self: Sized,
    {
        let entity = self.context().create_entity(|entity| {
            entity.set_name(name)?;
            init(entity)
        })?;
        self.import_entity(entity)
    }
}

// ---------------------------------------------------------------------------
// WorldBuilder
// ---------------------------------------------------------------------------

pub struct WorldBuilder {
    context: Arc<EngineContext>,
    name: String,
    options: WorldOptions,
    update_group: String,
    resources: Resources,
    systems: Vec<SystemEntry>,
    system_keys: HashSet<TypeId>,
    groups: Vec<(String, Predicate)>,
    entities: Vec<Entity>,
    entity_names: HashSet<String>,
    used: bool,
}

impl WorldBuilder {
    pub fn new(
        context: Arc<EngineContext>,
        name: impl Into<String>,
        options: WorldOptions,
        update_group: impl Into<String>,
    ) -> Self {
        Self {
            context,
            name: name.into(),
            options,
            update_group: update_group.into(),
            resources: Resources::default(),
            systems: Vec::new(),
            system_keys: HashSet::new(),
            groups: Vec::new(),
            entities: Vec::new(),
            entity_names: HashSet::new(),
            used: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &WorldOptions {
        &self.options
    }

    /// Typed view of the options.
    pub fn options_as<T: std::any::Any>(&self) -> Option<&T> {
        self.options.as_deref()?.downcast_ref()
    }

    pub fn update_group(&self) -> &str {
        &self.update_group
    }

    pub fn set_update_group(&mut self, group: impl Into<String>) -> &mut Self {
        self.update_group = group.into();
        self
    }

    pub fn resources_mut(&mut self) -> &mut Resources {
        &mut self.resources
    }

    pub fn add_system<S: System>(&mut self, system: S) -> Result<&mut Self, EcsError> {
        let entry = SystemEntry::new(system);
        if !self.system_keys.insert(entry.key) {
            return Err(EcsError::SystemExists {
                system: entry.name.to_owned(),
            });
        }
        self.systems.push(entry);
        Ok(self)
    }

    /// Run `block` against the world's data once, when the world is
    /// created. Systems added after this call attach after the block ran.
    pub fn init_with(
        &mut self,
        block: impl FnOnce(&mut WorldData) -> anyhow::Result<()> + Send + 'static,
    ) -> Result<&mut Self, EcsError> {
        self.add_system(InitSystem::new(block))
    }

    pub fn has_system<S: System>(&self) -> bool {
        self.system_keys.contains(&TypeId::of::<S>())
    }

    pub fn system_count(&self) -> usize {
        self.systems.len()
    }

    /// Declare a group. Groups are attached before any entity arrives.
    pub fn entity_group(
        &mut self,
        name: impl Into<String>,
        predicate: impl Fn(&Entity) -> bool + Send + Sync + 'static,
    ) -> Result<&mut Self, EcsError> {
        let name = name.into();
        if self.groups.iter().any(|(existing, _)| *existing == name) {
            return Err(EcsError::GroupExists {
                world: self.name.clone(),
                group: name,
            });
        }
        self.groups.push((name, Box::new(predicate)));
        Ok(self)
    }

    pub fn group_names(&self) -> Vec<&str> {
        self.groups.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Produce the world. A builder can only be built once.
    pub fn build(&mut self) -> Result<Arc<World>, EcsError> {
        if self.used {
            return Err(EcsError::BuilderUsed {
                world: self.name.clone(),
            });
        }
        self.used = true;

        let mut data = WorldData::new(
            self.name.clone(),
            Arc::clone(&self.context),
            self.options.clone(),
            std::mem::take(&mut self.resources),
        );
        for (name, predicate) in self.groups.drain(..) {
            data.attach_group(EntityGroup::from_boxed(name, predicate))?;
        }
        for entry in self.systems.drain(..) {
            data.stage_system(entry)?;
        }

        let world = Arc::new(World::new(
            self.name.clone(),
            self.update_group.clone(),
            self.options.clone(),
            data,
        ));
        for entity in self.entities.drain(..) {
            world.receive_entity(entity)?;
        }
        tracing::debug!(world = %self.name, group = %self.update_group, "world built");
        Ok(world)
    }
}

impl EntityFactory for WorldBuilder {
    fn context(&self) -> &Arc<EngineContext> {
        &self.context
    }

    fn import_entity(&mut self, entity: Entity) -> Result<EntityId, EcsError> {
        if let Some(owner) = entity.world() {
            return Err(EcsError::EntityOwned {
                entity: entity.id(),
                owner: owner.to_owned(),
            });
        }
        if let Some(name) = entity.name() {
            if !self.entity_names.insert(name.to_owned()) {
                return Err(EcsError::NamedEntityExists {
                    world: self.name.clone(),
                    name: name.to_owned(),
                });
            }
        }
        let id = entity.id();
        self.entities.push(entity);
        Ok(id)
    }
}

impl fmt::Debug for WorldBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorldBuilder")
            .field("name", &self.name)
            .field("update_group", &self.update_group)
            .field("systems", &self.systems)
            .field("groups", &self.group_names())
            .field("entities", &self.entities.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
