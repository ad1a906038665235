//! Skein Engine -- concurrent frame driver for partitioned worlds.
//!
//! This crate builds on [`skein_ecs`] to run many worlds in parallel. The
//! [`Engine`](engine::Engine) owns a request queue for structural changes
//! and an [`UpdateStrategy`](strategy::UpdateStrategy) that drives every
//! scheduled world through its pre-update, update and post-update phases.
//! Update groups run one after another; the worlds inside a group run
//! concurrently on a [`JobPool`](pool::JobPool).
//!
//! # Quick Start
//!
//! ```
//! use skein_engine::prelude::*;
//!
//! #[derive(Debug)]
//! struct Counter(u64);
//!
//! let engine = Engine::new(EngineConfig::with_workers(2)).unwrap();
//! engine.start().unwrap();
//! engine
//!     .create_world_and_flush("arena", None, |builder| {
//!         builder.create_entity(|e| e.add(Counter(0)))?;
//!         builder.add_system(FnSystem::new(|data: &mut WorldData, _delta| {
//!             for entity in data.entities_mut() {
//!                 if let Some(counter) = entity.get_mut::<Counter>() {
//!                     counter.0 += 1;
//!                 }
//!             }
//!             Ok(())
//!         }))?;
//!         Ok(())
//!     })
//!     .unwrap();
//!
//! for _ in 0..10 {
//!     engine.update(1.0 / 60.0).unwrap();
//! }
//! let world = engine.world("arena").unwrap();
//! let data = world.data().unwrap();
//! assert_eq!(data.entities().next().unwrap().get::<Counter>().unwrap().0, 10);
//! # drop(data);
//! # engine.shutdown().unwrap();
//! ```

#![deny(unsafe_code)]

pub mod config;
pub mod engine;
pub mod latch;
pub mod pool;
pub mod strategy;
pub mod telemetry;

/// Re-export the ECS crate for convenience.
pub use skein_ecs;

use skein_ecs::EcsError;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by the engine, the scheduler and the job pools.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Ecs(#[from] EcsError),

    /// A mutating engine call was made while another one was in flight,
    /// typically from inside a deferred block or a world decorator.
    #[error("cannot call while calling another method that mutates state")]
    ReentrantCall,

    #[error("engine already started")]
    AlreadyStarted,

    #[error("engine not started")]
    NotStarted,

    #[error("engine already shut down")]
    AlreadyShutDown,

    /// `start` was called on a latch whose previous cycle is still running.
    #[error("latch already working ({remaining} signals outstanding)")]
    LatchBusy { remaining: usize },

    #[error("latch signalled more times than its count")]
    LatchOverflow,

    /// The latch was interrupted while a caller was waiting on it.
    #[error("latch interrupted")]
    LatchInterrupted,

    #[error("job pool not started")]
    PoolNotStarted,

    #[error("job pool already started")]
    PoolAlreadyStarted,

    /// Faults from an earlier frame have not been collected.
    #[error("{count} unresolved job faults; call take_faults first")]
    UnresolvedFaults { count: usize },

    #[error("{count} jobs failed this frame; first: {first}")]
    JobsFailed { count: usize, first: String },

    #[error("update group '{group}' already exists")]
    UpdateGroupExists { group: String },

    #[error("update group '{group}' not found")]
    UpdateGroupNotFound { group: String },

    #[error("failed to spawn worker thread")]
    WorkerSpawn(#[source] std::io::Error),

    #[error("worker thread '{worker}' panicked outside of a job")]
    WorkerPanicked { worker: String },

    #[error("decorator for world '{world}' failed: {reason}")]
    DecoratorFailed { world: String, reason: String },

    #[error("deferred request failed: {reason}")]
    DeferredFailed { reason: String },

    #[error("invalid engine config: {0}")]
    Config(#[from] serde_json::Error),

    #[error("failed to install tracing subscriber: {reason}")]
    Telemetry { reason: String },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common engine usage.
pub mod prelude {
    pub use skein_ecs::prelude::*;

    pub use crate::config::{EngineConfig, Threading};
    pub use crate::engine::{Engine, EngineEvent};
    pub use crate::latch::CyclicalLatch;
    pub use crate::pool::{FaultKind, InlinePool, Job, JobFault, JobPool, WorkerPool};
    pub use crate::strategy::UpdateStrategy;
    pub use crate::EngineError;
}
