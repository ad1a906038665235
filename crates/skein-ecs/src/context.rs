//! Engine-wide shared state.
//!
//! The [`EngineContext`] is shared by every world through an `Arc`. It owns
//! the component mapper, the entity id counter, the world registry, the
//! extension registry and the request queue. Everything here is safe to use
//! from any thread, including from inside a world's update.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::attributes::Component;
use crate::builder::WorldBuilder;
use crate::entity::{Entity, EntityId};
use crate::mapper::{ComponentMapper, SlotIndex};
use crate::request::{EngineRequest, RequestQueue, WorldOptions};
use crate::world::World;
use crate::EcsError;

// ---------------------------------------------------------------------------
// Extensions
// ---------------------------------------------------------------------------

/// An engine-wide service with optional lifecycle hooks.
pub trait Extension: Any + Send + Sync {
    /// Called once when the engine starts.
    fn init(&self, context: &EngineContext) -> anyhow::Result<()> {
        let _ = context;
        Ok(())
    }

    /// Called once when the engine shuts down.
    fn shutdown(&self) {}
}

struct ExtensionEntry {
    name: &'static str,
    value: Arc<dyn Any + Send + Sync>,
    hooks: Arc<dyn Extension>,
}

/// Type-keyed registry of [`Extension`]s.
#[derive(Default)]
pub struct Extensions {
    entries: RwLock<IndexMap<TypeId, ExtensionEntry>>,
}

impl Extensions {
    /// Register `extension`, replacing any previous one of the same type.
    pub fn insert<T: Extension>(&self, extension: T) -> Arc<T> {
        let value = Arc::new(extension);
        let entry = ExtensionEntry {
            name: std::any::type_name::<T>(),
            value: value.clone(),
            hooks: value.clone(),
        };
        self.entries.write().insert(TypeId::of::<T>(), entry);
        value
    }

    pub fn get<T: Extension>(&self) -> Option<Arc<T>> {
        let value = self.entries.read().get(&TypeId::of::<T>())?.value.clone();
        value.downcast::<T>().ok()
    }

    pub fn require<T: Extension>(&self) -> Result<Arc<T>, EcsError> {
        self.get::<T>().ok_or_else(|| EcsError::ExtensionNotFound {
            extension: std::any::type_name::<T>().to_owned(),
        })
    }

    pub fn contains<T: Extension>(&self) -> bool {
        self.entries.read().contains_key(&TypeId::of::<T>())
    }

    pub fn remove<T: Extension>(&self) -> Option<Arc<T>> {
        let entry = self.entries.write().shift_remove(&TypeId::of::<T>())?;
        entry.value.downcast::<T>().ok()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn hooks(&self) -> Vec<(&'static str, Arc<dyn Extension>)> {
        self.entries
            .read()
            .values()
            .map(|e| (e.name, Arc::clone(&e.hooks)))
            .collect()
    }

    /// Run every extension's `init` in registration order, stopping at the
    /// first failure.
    pub fn init_all(&self, context: &EngineContext) -> Result<(), EcsError> {
        for (name, hooks) in self.hooks() {
            hooks
                .init(context)
                .map_err(|err| EcsError::ExtensionFailed {
                    extension: name.to_owned(),
                    reason: format!("{err:#}"),
                })?;
            tracing::debug!(extension = name, "extension initialized");
        }
        Ok(())
    }

    /// Run every extension's `shutdown` in reverse registration order, then
    /// drop them all.
    pub fn shutdown_all(&self) {
        for (_, hooks) in self.hooks().into_iter().rev() {
            hooks.shutdown();
        }
        self.entries.write().clear();
    }
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.read().values().map(|e| e.name))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// EngineContext
// ---------------------------------------------------------------------------

pub struct EngineContext {
    components: Arc<ComponentMapper>,
    next_entity_id: AtomicU64,
    worlds: RwLock<IndexMap<String, Arc<World>>>,
    extensions: Extensions,
    requests: RequestQueue,
    paranoid_world_events: bool,
}

impl EngineContext {
    /// `paranoid_world_events` turns on ownership checks for every entity
    /// event a world fires.
    pub fn new(paranoid_world_events: bool) -> Arc<Self> {
        Arc::new(Self {
            components: Arc::new(ComponentMapper::new()),
            next_entity_id: AtomicU64::new(0),
            worlds: RwLock::new(IndexMap::new()),
            extensions: Extensions::default(),
            requests: RequestQueue::new(),
            paranoid_world_events,
        })
    }

    pub fn components(&self) -> &Arc<ComponentMapper> {
        &self.components
    }

    pub fn component_index<T: Component>(&self) -> SlotIndex<T> {
        self.components.index_for::<T>()
    }

    /// Predicate matching entities that carry a `T`, for use with groups.
    pub fn has_component<T: Component>(&self) -> impl Fn(&Entity) -> bool + Send + Sync + 'static {
        let index = self.component_index::<T>();
        move |entity: &Entity| entity.contains_at(index)
    }

    pub fn paranoid_world_events(&self) -> bool {
        self.paranoid_world_events
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn requests(&self) -> &RequestQueue {
        &self.requests
    }

    // -- entities --------------------------------------------------------------

    /// A fresh, unowned entity with the next id.
    pub fn new_entity(&self) -> Entity {
        let id = self.next_entity_id.fetch_add(1, Ordering::Relaxed) + 1;
        Entity::new(EntityId::from_raw(id), Arc::clone(&self.components))
    }

    /// A fresh entity passed through `init`.
    pub fn create_entity<F>(&self, init: F) -> Result<Entity, EcsError>
    where
        F: FnOnce(&mut Entity) -> Result<(), EcsError>,
    {
        let mut entity = self.new_entity();
        init(&mut entity)?;
        Ok(entity)
    }

    // -- worlds ----------------------------------------------------------------

    pub fn world(&self, name: &str) -> Result<Arc<World>, EcsError> {
        self.world_or_none(name).ok_or_else(|| EcsError::WorldNotFound {
            world: name.to_owned(),
        })
    }

    pub fn world_or_none(&self, name: &str) -> Option<Arc<World>> {
        self.worlds.read().get(name).cloned()
    }

    pub fn has_world(&self, name: &str) -> bool {
        self.worlds.read().contains_key(name)
    }

    /// Registered worlds in creation order.
    pub fn worlds(&self) -> Vec<Arc<World>> {
        self.worlds.read().values().cloned().collect()
    }

    pub fn world_names(&self) -> Vec<String> {
        self.worlds.read().keys().cloned().collect()
    }

    pub fn world_count(&self) -> usize {
        self.worlds.read().len()
    }

    pub fn add_world(&self, world: Arc<World>) -> Result<(), EcsError> {
        let mut worlds = self.worlds.write();
        if worlds.contains_key(world.name()) {
            return Err(EcsError::WorldExists {
                world: world.name().to_owned(),
            });
        }
        worlds.insert(world.name().to_owned(), world);
        Ok(())
    }

    pub fn remove_world(&self, name: &str) -> Result<Arc<World>, EcsError> {
        self.worlds
            .write()
            .shift_remove(name)
            .ok_or_else(|| EcsError::WorldNotFound {
                world: name.to_owned(),
            })
    }

    /// Unregister every world, returning them in creation order.
    pub fn clear_worlds(&self) -> Vec<Arc<World>> {
        self.worlds.write().drain(..).map(|(_, w)| w).collect()
    }

    /// Queue an unowned entity for import into `target` at its next frame.
    pub fn send_entity(&self, target: &str, entity: Entity) -> Result<(), EcsError> {
        self.world(target)?.receive_entity(entity)
    }

    /// Queue a message for delivery in `target` at its next frame.
    pub fn send_message(&self, target: &str, message: impl Any + Send) -> Result<(), EcsError> {
        self.world(target)?.receive_message(Box::new(message))
    }

    // -- requests --------------------------------------------------------------

    pub fn request_create_world(
        &self,
        name: impl Into<String>,
        options: WorldOptions,
        decorator: impl FnOnce(&mut WorldBuilder) -> anyhow::Result<()> + Send + 'static,
    ) {
        self.requests.push(EngineRequest::CreateWorld {
            name: name.into(),
            options,
            decorator: Box::new(decorator),
        });
    }

    pub fn request_destroy_world(&self, name: impl Into<String>) {
        self.requests
            .push(EngineRequest::DestroyWorld { name: name.into() });
    }

    pub fn request_set_scheduled(&self, name: impl Into<String>, scheduled: bool) {
        self.requests.push(EngineRequest::SetScheduled {
            name: name.into(),
            scheduled,
        });
    }

    pub fn request_deferred(
        &self,
        block: impl FnOnce(&EngineContext) -> anyhow::Result<()> + Send + 'static,
    ) {
        self.requests.push(EngineRequest::Deferred(Box::new(block)));
    }
}

impl fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineContext")
            .field("components", &self.components.len())
            .field("worlds", &self.world_names())
            .field("extensions", &self.extensions)
            .field("requests", &self.requests.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
