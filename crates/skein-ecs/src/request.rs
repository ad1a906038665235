//! Deferred structural requests.
//!
//! World creation and destruction, scheduling changes and arbitrary
//! engine-level blocks are never applied at the call site. They are queued
//! here from any thread and applied by the engine at a safe point, before
//! and after each frame.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};

use crate::builder::WorldBuilder;
use crate::context::EngineContext;

/// Opaque per-world configuration handed to the world at creation.
pub type WorldOptions = Option<Arc<dyn Any + Send + Sync>>;

/// One-shot world setup closure.
pub type WorldDecorator = Box<dyn FnOnce(&mut WorldBuilder) -> anyhow::Result<()> + Send>;

/// Setup closure applied to every world the engine creates.
pub type SharedDecorator = Arc<dyn Fn(&mut WorldBuilder) -> anyhow::Result<()> + Send + Sync>;

/// Engine-level block run at the next drain.
pub type DeferredBlock = Box<dyn FnOnce(&EngineContext) -> anyhow::Result<()> + Send>;

pub enum EngineRequest {
    CreateWorld {
        name: String,
        options: WorldOptions,
        decorator: WorldDecorator,
    },
    DestroyWorld {
        name: String,
    },
    SetScheduled {
        name: String,
        scheduled: bool,
    },
    Deferred(DeferredBlock),
}

impl fmt::Debug for EngineRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateWorld { name, options, .. } => f
                .debug_struct("CreateWorld")
                .field("name", name)
                .field("has_options", &options.is_some())
                .finish(),
            Self::DestroyWorld { name } => {
                f.debug_struct("DestroyWorld").field("name", name).finish()
            }
            Self::SetScheduled { name, scheduled } => f
                .debug_struct("SetScheduled")
                .field("name", name)
                .field("scheduled", scheduled)
                .finish(),
            Self::Deferred(_) => f.write_str("Deferred"),
        }
    }
}

// ---------------------------------------------------------------------------
// RequestQueue
// ---------------------------------------------------------------------------

/// Multi-producer FIFO of [`EngineRequest`]s.
pub struct RequestQueue {
    sender: Sender<EngineRequest>,
    receiver: Receiver<EngineRequest>,
}

impl RequestQueue {
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self { sender, receiver }
    }

    pub fn push(&self, request: EngineRequest) {
        // Both ends live in `self`, so the channel cannot be disconnected.
        let _ = self.sender.send(request);
    }

    pub fn poll(&self) -> Option<EngineRequest> {
        self.receiver.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Drop every queued request, returning how many were dropped.
    pub fn clear(&self) -> usize {
        self.receiver.try_iter().count()
    }
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestQueue")
            .field("len", &self.len())
            .finish()
    }
}
