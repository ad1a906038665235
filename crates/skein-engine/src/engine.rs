//! The engine: world registry, request processing and the frame loop.
//!
//! Structural changes (creating and destroying worlds, toggling their
//! scheduling, deferred blocks) go through the context's request queue
//! from any thread. The engine applies them between frames: before and
//! after every [`update`](Engine::update), and on explicit
//! [`drain_requests`](Engine::drain_requests).
//!
//! Only one mutating engine call may run at a time. A second one, from a
//! listener, a decorator or another thread, fails with
//! [`EngineError::ReentrantCall`] instead of blocking.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use skein_ecs::prelude::*;
use skein_ecs::request::{SharedDecorator, WorldDecorator};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::pool::{JobFault, JobPool};
use crate::strategy::UpdateStrategy;
use crate::EngineError;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Engine-level notifications.
///
/// `Started` and `ShuttingDown` fire immediately. World events are
/// buffered and fire at the end of the request drain that caused them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Started,
    ShuttingDown,
    WorldCreated(String),
    WorldDestroyed(String),
}

type EventListener = Box<dyn FnMut(&EngineEvent) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineLifecycle {
    Created,
    Started,
    ShutDown,
}

/// Clears the mutation flag when the call that set it returns.
struct MutationGuard<'a>(&'a AtomicBool);

impl Drop for MutationGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine {
    config: EngineConfig,
    context: Arc<EngineContext>,
    strategy: Mutex<UpdateStrategy>,
    decorators: RwLock<Vec<SharedDecorator>>,
    listeners: Mutex<Vec<EventListener>>,
    pending_events: Mutex<Vec<EngineEvent>>,
    mutating: AtomicBool,
    lifecycle: Mutex<EngineLifecycle>,
}

impl Engine {
    /// An engine whose job pool follows `config.threading`.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let pool = config.build_pool();
        Self::with_pool(config, pool)
    }

    /// An engine driving worlds on a caller-supplied pool.
    pub fn with_pool(config: EngineConfig, pool: Box<dyn JobPool>) -> Result<Self, EngineError> {
        let mut strategy = UpdateStrategy::new(pool);
        strategy.create_update_group(
            config.default_update_group.clone(),
            config.default_update_group_order,
        )?;
        Ok(Self {
            context: EngineContext::new(config.paranoid_world_events),
            config,
            strategy: Mutex::new(strategy),
            decorators: RwLock::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
            pending_events: Mutex::new(Vec::new()),
            mutating: AtomicBool::new(false),
            lifecycle: Mutex::new(EngineLifecycle::Created),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.context
    }

    pub fn is_started(&self) -> bool {
        *self.lifecycle.lock() == EngineLifecycle::Started
    }

    pub fn is_shut_down(&self) -> bool {
        *self.lifecycle.lock() == EngineLifecycle::ShutDown
    }

    fn begin_mutation(&self) -> Result<MutationGuard<'_>, EngineError> {
        self.mutating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| EngineError::ReentrantCall)?;
        Ok(MutationGuard(&self.mutating))
    }

    // -- lifecycle --------------------------------------------------------------

    /// Start the job pool, initialize extensions and apply queued requests.
    pub fn start(&self) -> Result<(), EngineError> {
        let _guard = self.begin_mutation()?;
        match *self.lifecycle.lock() {
            EngineLifecycle::Created => {}
            EngineLifecycle::Started => return Err(EngineError::AlreadyStarted),
            EngineLifecycle::ShutDown => return Err(EngineError::AlreadyShutDown),
        }

        self.strategy.lock().start()?;
        self.context.extensions().init_all(&self.context)?;
        *self.lifecycle.lock() = EngineLifecycle::Started;
        info!(
            workers = self.strategy.lock().concurrency(),
            extensions = self.context.extensions().len(),
            "engine started"
        );
        self.fire_event(EngineEvent::Started);
        self.drain()?;
        Ok(())
    }

    /// Drop queued requests, destroy every world, shut extensions down and
    /// stop the job pool.
    pub fn shutdown(&self) -> Result<(), EngineError> {
        let _guard = self.begin_mutation()?;
        let previous = {
            let mut lifecycle = self.lifecycle.lock();
            let previous = *lifecycle;
            if previous == EngineLifecycle::ShutDown {
                return Err(EngineError::AlreadyShutDown);
            }
            *lifecycle = EngineLifecycle::ShutDown;
            previous
        };

        self.fire_event(EngineEvent::ShuttingDown);
        let dropped = self.context.requests().clear();
        if dropped > 0 {
            debug!(dropped, "pending requests dropped at shutdown");
        }
        for world in self.context.clear_worlds() {
            self.strategy.lock().unregister_world(world.name());
            world.on_destroy();
            self.pending_events
                .lock()
                .push(EngineEvent::WorldDestroyed(world.name().to_owned()));
        }
        self.fire_pending_events();

        if previous == EngineLifecycle::Started {
            self.context.extensions().shutdown_all();
        }
        self.strategy.lock().shutdown()?;
        info!("engine shut down");
        Ok(())
    }

    // -- frame ------------------------------------------------------------------

    /// Apply queued requests, run one frame over every scheduled world, then
    /// apply the requests made during the frame.
    ///
    /// Unresolved faults from an earlier frame fail the call before any
    /// request is applied. A failing frame still applies the requests its
    /// systems queued; the frame error is returned ahead of any drain error.
    pub fn update(&self, delta: f32) -> Result<(), EngineError> {
        let _guard = self.begin_mutation()?;
        match *self.lifecycle.lock() {
            EngineLifecycle::Started => {}
            EngineLifecycle::Created => return Err(EngineError::NotStarted),
            EngineLifecycle::ShutDown => return Err(EngineError::AlreadyShutDown),
        }
        let unresolved = self.strategy.lock().fault_count();
        if unresolved > 0 {
            return Err(EngineError::UnresolvedFaults { count: unresolved });
        }
        self.drain()?;
        let frame = self.strategy.lock().update(delta);
        let drained = self.drain();
        frame?;
        drained?;
        Ok(())
    }

    /// Apply every queued request now. Returns how many were applied.
    pub fn drain_requests(&self) -> Result<usize, EngineError> {
        let _guard = self.begin_mutation()?;
        self.drain()
    }

    /// Captured job faults, cleared so the next frame can run.
    pub fn take_faults(&self) -> Vec<JobFault> {
        self.strategy.lock().take_faults()
    }

    pub fn has_faults(&self) -> bool {
        self.strategy.lock().has_faults()
    }

    // -- requests ---------------------------------------------------------------

    pub fn request_create_world(
        &self,
        name: impl Into<String>,
        options: WorldOptions,
        decorator: impl FnOnce(&mut WorldBuilder) -> anyhow::Result<()> + Send + 'static,
    ) {
        self.context.request_create_world(name, options, decorator);
    }

    pub fn request_destroy_world(&self, name: impl Into<String>) {
        self.context.request_destroy_world(name);
    }

    pub fn request_set_scheduled(&self, name: impl Into<String>, scheduled: bool) {
        self.context.request_set_scheduled(name, scheduled);
    }

    pub fn request_deferred(
        &self,
        block: impl FnOnce(&EngineContext) -> anyhow::Result<()> + Send + 'static,
    ) {
        self.context.request_deferred(block);
    }

    /// Queue a world and drain immediately, returning the live world.
    ///
    /// Only a failure to create this world is returned. Other requests
    /// drained alongside it are logged like any drain failure.
    pub fn create_world_and_flush(
        &self,
        name: impl Into<String>,
        options: WorldOptions,
        decorator: impl FnOnce(&mut WorldBuilder) -> anyhow::Result<()> + Send + 'static,
    ) -> Result<Arc<World>, EngineError> {
        let _guard = self.begin_mutation()?;
        let name = name.into();
        self.context
            .request_create_world(name.clone(), options, decorator);
        let (_, failures) = self.drain_all();
        let own = failures
            .into_iter()
            .find(|(created, _)| created.as_deref() == Some(name.as_str()));
        if let Some((_, err)) = own {
            return Err(err);
        }
        Ok(self.context.world(&name)?)
    }

    // -- configuration ----------------------------------------------------------

    /// Run `decorator` on every world built from now on, before the
    /// world's own decorator.
    pub fn add_world_decorator(
        &self,
        decorator: impl Fn(&mut WorldBuilder) -> anyhow::Result<()> + Send + Sync + 'static,
    ) {
        self.decorators.write().push(Arc::new(decorator));
    }

    pub fn create_update_group(
        &self,
        name: impl Into<String>,
        order: i32,
    ) -> Result<(), EngineError> {
        let _guard = self.begin_mutation()?;
        self.strategy.lock().create_update_group(name, order)
    }

    /// Listen to engine events. Listeners may not call mutating engine
    /// methods.
    pub fn on_event(&self, listener: impl FnMut(&EngineEvent) + Send + 'static) {
        self.listeners.lock().push(Box::new(listener));
    }

    // -- queries ----------------------------------------------------------------

    pub fn world(&self, name: &str) -> Result<Arc<World>, EngineError> {
        Ok(self.context.world(name)?)
    }

    pub fn world_or_none(&self, name: &str) -> Option<Arc<World>> {
        self.context.world_or_none(name)
    }

    pub fn world_names(&self) -> Vec<String> {
        self.context.world_names()
    }

    pub fn is_scheduled(&self, name: &str) -> bool {
        self.strategy.lock().is_scheduled(name)
    }

    pub fn pending_requests(&self) -> usize {
        self.context.requests().len()
    }

    // -- request processing -----------------------------------------------------

    /// Apply requests until the queue is empty, including requests queued by
    /// the ones being applied. A failing request is logged and skipped; the
    /// first failure is returned once the queue is empty.
    fn drain(&self) -> Result<usize, EngineError> {
        let (applied, failures) = self.drain_all();
        match failures.into_iter().next() {
            Some((_, err)) => Err(err),
            None => Ok(applied),
        }
    }

    /// Drain the queue, returning how many requests ran and every failure
    /// in order, each tagged with the world it tried to create, if any.
    fn drain_all(&self) -> (usize, Vec<(Option<String>, EngineError)>) {
        let mut applied = 0;
        let mut failures = Vec::new();
        while let Some(request) = self.context.requests().poll() {
            applied += 1;
            let created = match &request {
                EngineRequest::CreateWorld { name, .. } => Some(name.clone()),
                _ => None,
            };
            if let Err(err) = self.apply(request) {
                warn!(error = %err, "engine request failed");
                failures.push((created, err));
            }
        }
        self.fire_pending_events();
        (applied, failures)
    }

    fn apply(&self, request: EngineRequest) -> Result<(), EngineError> {
        debug!(request = ?request, "applying engine request");
        match request {
            EngineRequest::CreateWorld {
                name,
                options,
                decorator,
            } => self.create_world(name, options, decorator),
            EngineRequest::DestroyWorld { name } => self.destroy_world(&name),
            EngineRequest::SetScheduled { name, scheduled } => {
                let world = self.context.world(&name)?;
                let mut strategy = self.strategy.lock();
                if scheduled {
                    strategy.register_world(world)?;
                } else {
                    strategy.unregister_world(&name);
                }
                Ok(())
            }
            EngineRequest::Deferred(block) => {
                block(&self.context).map_err(|err| EngineError::DeferredFailed {
                    reason: format!("{err:#}"),
                })
            }
        }
    }

    fn create_world(
        &self,
        name: String,
        options: WorldOptions,
        decorator: WorldDecorator,
    ) -> Result<(), EngineError> {
        if self.context.has_world(&name) {
            return Err(EcsError::WorldExists { world: name }.into());
        }
        let decorator_failed = |err: anyhow::Error| EngineError::DecoratorFailed {
            world: name.clone(),
            reason: format!("{err:#}"),
        };

        let mut builder = WorldBuilder::new(
            Arc::clone(&self.context),
            name.clone(),
            options,
            self.config.default_update_group.clone(),
        );
        let shared: Vec<SharedDecorator> = self.decorators.read().clone();
        for global in &shared {
            global(&mut builder).map_err(decorator_failed)?;
        }
        decorator(&mut builder).map_err(decorator_failed)?;
        let world = builder.build()?;

        self.context.add_world(Arc::clone(&world))?;
        if self.config.auto_schedule_on_create {
            if let Err(err) = self.strategy.lock().register_world(Arc::clone(&world)) {
                let _ = self.context.remove_world(&name);
                return Err(err);
            }
        }
        if let Err(err) = world.on_create() {
            self.strategy.lock().unregister_world(&name);
            let _ = self.context.remove_world(&name);
            world.on_destroy();
            return Err(err.into());
        }

        info!(world = %name, group = %world.update_group(), "world created");
        self.pending_events
            .lock()
            .push(EngineEvent::WorldCreated(name));
        Ok(())
    }

    fn destroy_world(&self, name: &str) -> Result<(), EngineError> {
        let world = self.context.remove_world(name)?;
        self.strategy.lock().unregister_world(name);
        world.on_destroy();
        info!(world = %name, "world destroyed");
        self.pending_events
            .lock()
            .push(EngineEvent::WorldDestroyed(name.to_owned()));
        Ok(())
    }

    // -- events -----------------------------------------------------------------

    fn fire_event(&self, event: EngineEvent) {
        self.notify(&[event]);
    }

    fn fire_pending_events(&self) {
        let events = std::mem::take(&mut *self.pending_events.lock());
        if !events.is_empty() {
            self.notify(&events);
        }
    }

    fn notify(&self, events: &[EngineEvent]) {
        // Listeners run unlocked so they can register further listeners.
        let mut listeners = std::mem::take(&mut *self.listeners.lock());
        for event in events {
            for listener in listeners.iter_mut() {
                listener(event);
            }
        }
        let mut slot = self.listeners.lock();
        let added = std::mem::take(&mut *slot);
        *slot = listeners;
        slot.extend(added);
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.is_started() {
            if let Err(err) = self.shutdown() {
                warn!(error = %err, "engine shutdown on drop failed");
            }
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("lifecycle", &*self.lifecycle.lock())
            .field("worlds", &self.context.world_names())
            .field("strategy", &*self.strategy.lock())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
