//! Systems: per-world update logic.
//!
//! A world keeps its systems in a [`SystemList`] ordered by
//! `(order, registration)`. Orders are re-read every frame, so a system may
//! change its order at runtime and the list re-sorts before the next pass.
//! Enabled state is also re-read every frame; transitions fire the
//! `on_enabled` / `on_disabled` hooks.

use std::any::{Any, TypeId};
use std::fmt;

use crossbeam_channel::{Receiver, Sender};

use crate::world::WorldData;
use crate::EcsError;

// ---------------------------------------------------------------------------
// System trait
// ---------------------------------------------------------------------------

/// Upcast helper so `dyn System` can be downcast to its concrete type.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

pub trait System: AsAny + Send {
    /// Lower orders run first. Ties run in registration order.
    fn order(&self) -> i32 {
        0
    }

    fn enabled(&self) -> bool {
        true
    }

    /// Called when the system joins a world, during the world's next
    /// pre-update window.
    fn on_attach(&mut self, data: &mut WorldData) -> anyhow::Result<()> {
        let _ = data;
        Ok(())
    }

    /// Called when the system leaves a world or the world is destroyed.
    fn on_detach(&mut self) {}

    fn on_enabled(&mut self) {}

    fn on_disabled(&mut self) {}

    fn update(&mut self, data: &mut WorldData, delta: f32) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// SystemList
// ---------------------------------------------------------------------------

pub(crate) struct SystemEntry {
    pub(crate) key: TypeId,
    pub(crate) name: &'static str,
    /// Per-world registration number. Breaks order ties and identifies this
    /// instance when a removal is applied.
    pub(crate) id: u64,
    order: i32,
    enabled: bool,
    pub(crate) system: Box<dyn System>,
}

impl SystemEntry {
    pub(crate) fn new<S: System>(system: S) -> Self {
        Self {
            key: TypeId::of::<S>(),
            name: std::any::type_name::<S>(),
            id: 0,
            order: system.order(),
            enabled: system.enabled(),
            system: Box::new(system),
        }
    }

    pub(crate) fn with_id(mut self, id: u64) -> Self {
        self.id = id;
        self
    }

    pub(crate) fn downcast_mut<S: System>(&mut self) -> Option<&mut S> {
        let system: &mut dyn System = self.system.as_mut();
        system.as_any_mut().downcast_mut::<S>()
    }
}

impl fmt::Debug for SystemEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemEntry")
            .field("name", &self.name)
            .field("order", &self.order)
            .field("enabled", &self.enabled)
            .finish()
    }
}

#[derive(Debug, Default)]
pub(crate) struct SystemList {
    entries: Vec<SystemEntry>,
}

impl SystemList {
    pub(crate) fn push(&mut self, entry: SystemEntry) {
        self.entries.push(entry);
        self.sort();
    }

    /// Remove the instance registered under `id`.
    pub(crate) fn remove(&mut self, id: u64) -> Option<SystemEntry> {
        let position = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(position))
    }

    pub(crate) fn find_mut<S: System>(&mut self) -> Option<&mut S> {
        let key = TypeId::of::<S>();
        self.entries
            .iter_mut()
            .find(|e| e.key == key)
            .and_then(|e| e.downcast_mut::<S>())
    }

    pub(crate) fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.name).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    fn sort(&mut self) {
        self.entries.sort_by_key(|e| (e.order, e.id));
    }

    /// Re-read orders and enabled flags, re-sorting and firing enable hooks
    /// where they changed.
    pub(crate) fn refresh(&mut self) {
        let mut resort = false;
        for entry in &mut self.entries {
            let order = entry.system.order();
            if order != entry.order {
                entry.order = order;
                resort = true;
            }
            let enabled = entry.system.enabled();
            if enabled != entry.enabled {
                entry.enabled = enabled;
                if enabled {
                    entry.system.on_enabled();
                } else {
                    entry.system.on_disabled();
                }
            }
        }
        if resort {
            self.sort();
        }
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut SystemEntry> {
        self.entries.iter_mut()
    }

    pub(crate) fn drain(&mut self) -> impl Iterator<Item = SystemEntry> + '_ {
        self.entries.drain(..)
    }
}

// ---------------------------------------------------------------------------
// FnSystem
// ---------------------------------------------------------------------------

/// A system backed by a closure.
///
/// Systems are keyed by type, so two `FnSystem`s built from the same closure
/// expression cannot be registered in the same world.
pub struct FnSystem<F> {
    order: i32,
    enabled: bool,
    func: F,
}

impl<F> FnSystem<F>
where
    F: FnMut(&mut WorldData, f32) -> anyhow::Result<()> + Send + 'static,
{
    pub fn new(func: F) -> Self {
        Self::with_order(0, func)
    }

    pub fn with_order(order: i32, func: F) -> Self {
        Self {
            order,
            enabled: true,
            func,
        }
    }

    pub fn set_order(&mut self, order: i32) {
        self.order = order;
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }
}

impl<F> System for FnSystem<F>
where
    F: FnMut(&mut WorldData, f32) -> anyhow::Result<()> + Send + 'static,
{
    fn order(&self) -> i32 {
        self.order
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn update(&mut self, data: &mut WorldData, delta: f32) -> anyhow::Result<()> {
        (self.func)(data, delta)
    }
}

// ---------------------------------------------------------------------------
// InitSystem
// ---------------------------------------------------------------------------

/// Runs a setup closure once when it attaches, then removes itself before
/// the pre-update that attached it returns.
///
/// Staged systems attach in registration order, so systems registered after
/// it see what the closure set up in their own `on_attach`. Each closure type
/// is its own system type; registering the same closure expression twice in
/// one world fails like any duplicate system.
pub struct InitSystem<F> {
    block: Option<F>,
}

impl<F> InitSystem<F>
where
    F: FnOnce(&mut WorldData) -> anyhow::Result<()> + Send + 'static,
{
    pub const ORDER: i32 = -100;

    pub fn new(block: F) -> Self {
        Self { block: Some(block) }
    }
}

impl<F> System for InitSystem<F>
where
    F: FnOnce(&mut WorldData) -> anyhow::Result<()> + Send + 'static,
{
    fn order(&self) -> i32 {
        Self::ORDER
    }

    fn on_attach(&mut self, data: &mut WorldData) -> anyhow::Result<()> {
        if let Some(block) = self.block.take() {
            block(data)?;
        }
        data.remove_system::<Self>()?;
        Ok(())
    }

    fn update(&mut self, _data: &mut WorldData, _delta: f32) -> anyhow::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// BlockSystem
// ---------------------------------------------------------------------------

/// A one-shot closure queued for execution inside a world.
pub type Block = Box<dyn FnOnce(&mut WorldData) -> anyhow::Result<()> + Send>;

/// Runs closures queued from any thread, once, inside the world's update.
///
/// Queued blocks run when the system attaches and at every update after
/// that. This is the way to mutate a world from outside its frame without
/// taking its data lock.
pub struct BlockSystem {
    order: i32,
    sender: Sender<Block>,
    receiver: Receiver<Block>,
}

impl BlockSystem {
    pub fn new() -> Self {
        Self::with_order(0)
    }

    pub fn with_order(order: i32) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self {
            order,
            sender,
            receiver,
        }
    }

    pub fn handle(&self) -> BlockHandle {
        BlockHandle {
            sender: self.sender.clone(),
        }
    }

    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    fn run_queued(&mut self, data: &mut WorldData) -> anyhow::Result<()> {
        while let Ok(block) = self.receiver.try_recv() {
            block(data)?;
        }
        Ok(())
    }
}

impl Default for BlockSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl System for BlockSystem {
    fn order(&self) -> i32 {
        self.order
    }

    fn on_attach(&mut self, data: &mut WorldData) -> anyhow::Result<()> {
        self.run_queued(data)
    }

    fn update(&mut self, data: &mut WorldData, _delta: f32) -> anyhow::Result<()> {
        self.run_queued(data)
    }
}

/// Cloneable sender side of a [`BlockSystem`].
#[derive(Clone)]
pub struct BlockHandle {
    sender: Sender<Block>,
}

impl BlockHandle {
    pub fn execute(
        &self,
        block: impl FnOnce(&mut WorldData) -> anyhow::Result<()> + Send + 'static,
    ) -> Result<(), EcsError> {
        self.sender
            .send(Box::new(block))
            .map_err(|_| EcsError::BlockSystemGone)
    }
}

impl fmt::Debug for BlockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockHandle")
            .field("queued", &self.sender.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
