//! Skein ECS -- partitioned entity storage with reactive groups.
//!
//! This crate holds the data side of the Skein runtime. Entities carry a
//! sparse attribute table indexed by process-wide component slots. Entities
//! live inside a [`World`](world::World) (a partition), which owns its
//! systems, its entity groups and a buffered event log. Worlds never touch
//! each other directly: entities and messages cross partitions through an
//! inbound queue that is drained at the start of the next frame.
//!
//! The concurrent frame driver lives in `skein-engine`. This crate only
//! exposes the per-world phase methods it calls.
//!
//! # Quick Start
//!
//! ```
//! use skein_ecs::prelude::*;
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct Position { x: f32, y: f32 }
//!
//! let context = EngineContext::new(false);
//! let mut builder = WorldBuilder::new(context.clone(), "arena", None, "default");
//! builder.entity_group("positioned", context.has_component::<Position>()).unwrap();
//! builder.create_entity(|e| e.add(Position { x: 1.0, y: 2.0 })).unwrap();
//! let world = builder.build().unwrap();
//! world.on_create().unwrap();
//!
//! let data = world.data().unwrap();
//! assert_eq!(data.entity_count(), 1);
//! assert_eq!(data.entity_group("positioned").unwrap().len(), 1);
//! ```

#![deny(unsafe_code)]

pub mod attributes;
pub mod builder;
pub mod context;
pub mod entity;
pub mod events;
pub mod group;
pub mod mapper;
pub mod request;
pub mod system;
pub mod world;

use entity::EntityId;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by partition, entity and group operations.
#[derive(Debug, thiserror::Error)]
pub enum EcsError {
    /// External access to a world's data while its frame window is open.
    #[error("world '{world}' cannot be accessed while updating")]
    WorldUpdating { world: String },

    /// The world's data is locked by another caller.
    #[error("world '{world}' is busy")]
    WorldBusy { world: String },

    #[error("world '{world}' not found")]
    WorldNotFound { world: String },

    #[error("world '{world}' already exists")]
    WorldExists { world: String },

    /// The world has been destroyed and can no longer be updated.
    #[error("world '{world}' has been destroyed")]
    WorldDestroyed { world: String },

    #[error("entity {entity:?} not found")]
    EntityNotFound { entity: EntityId },

    /// The entity is already owned by a world.
    #[error("entity {entity:?} is already owned by world '{owner}'")]
    EntityOwned { entity: EntityId, owner: String },

    #[error("entity {entity:?} already exists in world '{world}'")]
    DuplicateEntityId { world: String, entity: EntityId },

    #[error("named entity '{name}' not found in world '{world}'")]
    NamedEntityNotFound { world: String, name: String },

    #[error("named entity already exists in world '{world}': {name}")]
    NamedEntityExists { world: String, name: String },

    /// Paranoid check: an arrival event references an entity this world
    /// does not own.
    #[error("entity {entity:?} is not owned by world '{world}'")]
    EntityNotInWorld { world: String, entity: EntityId },

    /// Paranoid check: a departure event references an entity that is
    /// still stored in the world.
    #[error("entity {entity:?} left world '{world}' but is still stored there")]
    EntityStillOwned { world: String, entity: EntityId },

    #[error("component '{component}' is already present")]
    ComponentAlreadyPresent { component: String },

    #[error("component '{component}' is missing")]
    ComponentMissing { component: String },

    #[error("group '{group}' already exists in world '{world}'")]
    GroupExists { world: String, group: String },

    #[error("group '{group}' not found in world '{world}'")]
    GroupNotFound { world: String, group: String },

    #[error("group '{group}' is already attached")]
    GroupAlreadyAttached { group: String },

    #[error("system '{system}' is already registered")]
    SystemExists { system: String },

    #[error("system '{system}' is not registered")]
    SystemNotFound { system: String },

    /// A system hook returned an error. The source error is flattened into
    /// `reason` so the variant stays `Send + Sync` without boxing.
    #[error("system '{system}' failed in world '{world}': {reason}")]
    SystemFailed {
        world: String,
        system: String,
        reason: String,
    },

    #[error("builder for world '{world}' was already used")]
    BuilderUsed { world: String },

    #[error("resource '{resource}' not found")]
    ResourceNotFound { resource: String },

    #[error("extension '{extension}' not found")]
    ExtensionNotFound { extension: String },

    #[error("extension '{extension}' failed: {reason}")]
    ExtensionFailed { extension: String, reason: String },

    /// The block system behind a handle has been dropped.
    #[error("block system is gone")]
    BlockSystemGone,

    /// A world's inbound queue no longer accepts work.
    #[error("inbox of world '{world}' is closed")]
    InboxClosed { world: String },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::attributes::{AttributeTable, Component};
    pub use crate::builder::{EntityFactory, WorldBuilder};
    pub use crate::context::{EngineContext, Extension, Extensions};
    pub use crate::entity::{Entity, EntityId};
    pub use crate::events::{EntityEventKind, ListenerId, Message, WorldEvents};
    pub use crate::group::{EntityGroup, GroupState};
    pub use crate::mapper::{ComponentKey, ComponentMapper, Mapper, Slot, SlotIndex};
    pub use crate::request::{EngineRequest, RequestQueue, WorldDecorator, WorldOptions};
    pub use crate::system::{BlockHandle, BlockSystem, FnSystem, InitSystem, System};
    pub use crate::world::{Resources, World, WorldData, WorldLifecycle};
    pub use crate::EcsError;
}
