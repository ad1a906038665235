//! Frame scheduling across worlds.
//!
//! The [`UpdateStrategy`] keeps one [`Job`] per scheduled world. A frame is
//! three passes:
//!
//! 1. `pre_update` on every scheduled world, sequentially on the driving
//!    thread.
//! 2. For each update group in ascending order, the group's world jobs run
//!    on the [`JobPool`] and the driver waits for all of them before moving
//!    to the next group.
//! 3. `post_update` on every world that entered pass 1.
//!
//! Worlds inside one group have no ordering between them.

use std::sync::Arc;

use indexmap::IndexMap;
use skein_ecs::world::World;
use tracing::{debug, trace};

use crate::pool::{Job, JobFault, JobPool};
use crate::EngineError;

struct ScheduledWorld {
    world: Arc<World>,
    job: Job,
}

#[derive(Debug)]
struct UpdateGroup {
    name: String,
    order: i32,
    jobs: Vec<Job>,
}

/// Drives every scheduled world through one frame at a time.
pub struct UpdateStrategy {
    pool: Box<dyn JobPool>,
    worlds: IndexMap<String, ScheduledWorld>,
    // Stable-sorted by `order`; ties keep creation order.
    groups: Vec<UpdateGroup>,
}

impl UpdateStrategy {
    pub fn new(pool: Box<dyn JobPool>) -> Self {
        Self {
            pool,
            worlds: IndexMap::new(),
            groups: Vec::new(),
        }
    }

    pub fn start(&mut self) -> Result<(), EngineError> {
        self.pool.start()
    }

    pub fn shutdown(&mut self) -> Result<(), EngineError> {
        self.worlds.clear();
        for group in &mut self.groups {
            group.jobs.clear();
        }
        self.pool.shutdown()
    }

    pub fn concurrency(&self) -> usize {
        self.pool.concurrency()
    }

    // -- update groups ----------------------------------------------------------

    pub fn create_update_group(
        &mut self,
        name: impl Into<String>,
        order: i32,
    ) -> Result<(), EngineError> {
        let name = name.into();
        if self.has_update_group(&name) {
            return Err(EngineError::UpdateGroupExists { group: name });
        }
        let at = self.groups.partition_point(|group| group.order <= order);
        debug!(group = %name, order, "update group created");
        self.groups.insert(
            at,
            UpdateGroup {
                name,
                order,
                jobs: Vec::new(),
            },
        );
        Ok(())
    }

    pub fn has_update_group(&self, name: &str) -> bool {
        self.groups.iter().any(|group| group.name == name)
    }

    /// Group names in execution order.
    pub fn update_group_names(&self) -> Vec<&str> {
        self.groups.iter().map(|group| group.name.as_str()).collect()
    }

    fn rebuild_group(&mut self, name: &str) {
        let jobs: Vec<Job> = self
            .worlds
            .values()
            .filter(|scheduled| scheduled.world.update_group() == name)
            .map(|scheduled| scheduled.job.clone())
            .collect();
        if let Some(group) = self.groups.iter_mut().find(|group| group.name == name) {
            group.jobs = jobs;
        }
    }

    // -- worlds -----------------------------------------------------------------

    /// Schedule `world` in its update group. Returns `false` if it was
    /// already scheduled.
    pub fn register_world(&mut self, world: Arc<World>) -> Result<bool, EngineError> {
        if self.worlds.contains_key(world.name()) {
            return Ok(false);
        }
        let group = world.update_group().to_owned();
        if !self.has_update_group(&group) {
            return Err(EngineError::UpdateGroupNotFound { group });
        }

        let job = {
            let world = Arc::clone(&world);
            Job::new(world.name().to_owned(), move |delta| world.update(delta))
        };
        debug!(world = %world.name(), group = %group, "world scheduled");
        self.worlds
            .insert(world.name().to_owned(), ScheduledWorld { world, job });
        self.rebuild_group(&group);
        Ok(true)
    }

    /// Stop scheduling the named world. Returns `false` if it was not
    /// scheduled.
    pub fn unregister_world(&mut self, name: &str) -> bool {
        let Some(scheduled) = self.worlds.shift_remove(name) else {
            return false;
        };
        debug!(world = %name, "world unscheduled");
        self.rebuild_group(scheduled.world.update_group());
        true
    }

    pub fn is_scheduled(&self, name: &str) -> bool {
        self.worlds.contains_key(name)
    }

    pub fn scheduled_count(&self) -> usize {
        self.worlds.len()
    }

    // -- faults -----------------------------------------------------------------

    pub fn has_faults(&self) -> bool {
        self.pool.has_faults()
    }

    pub fn fault_count(&self) -> usize {
        self.pool.fault_count()
    }

    pub fn take_faults(&mut self) -> Vec<JobFault> {
        self.pool.take_faults()
    }

    // -- frame ------------------------------------------------------------------

    /// Run one frame over every scheduled world.
    ///
    /// Faults left over from an earlier frame stop the frame before any
    /// world is touched. A world that fails `pre_update` stops the frame
    /// too; the worlds already prepared still get their `post_update`.
    pub fn update(&mut self, delta: f32) -> Result<(), EngineError> {
        let unresolved = self.fault_count();
        if unresolved > 0 {
            return Err(EngineError::UnresolvedFaults { count: unresolved });
        }

        let worlds: Vec<Arc<World>> = self
            .worlds
            .values()
            .map(|scheduled| Arc::clone(&scheduled.world))
            .collect();

        let mut entered = 0;
        let mut result = Ok(());
        for world in &worlds {
            entered += 1;
            if let Err(err) = world.pre_update() {
                result = Err(err.into());
                break;
            }
        }

        if result.is_ok() {
            for group in &self.groups {
                if group.jobs.is_empty() {
                    continue;
                }
                trace!(group = %group.name, jobs = group.jobs.len(), "update group running");
                if let Err(err) = self.pool.execute(&group.jobs, delta) {
                    result = Err(err);
                    break;
                }
            }
        }

        for world in &worlds[..entered] {
            world.post_update();
        }
        result
    }
}

impl std::fmt::Debug for UpdateStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateStrategy")
            .field("concurrency", &self.pool.concurrency())
            .field("worlds", &self.worlds.keys().collect::<Vec<_>>())
            .field("groups", &self.update_group_names())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{InlinePool, WorkerPool};
    use parking_lot::Mutex;
    use skein_ecs::prelude::*;

    fn world_in(
        context: &Arc<EngineContext>,
        name: &str,
        group: &str,
        trail: &Arc<Mutex<Vec<String>>>,
    ) -> Arc<World> {
        let mut builder = WorldBuilder::new(Arc::clone(context), name, None, group);
        let trail = Arc::clone(trail);
        let label = name.to_owned();
        builder
            .add_system(FnSystem::new(move |_data: &mut WorldData, _delta| {
                trail.lock().push(label.clone());
                Ok(())
            }))
            .unwrap();
        let world = builder.build().unwrap();
        world.on_create().unwrap();
        world
    }

    // -- update groups ----------------------------------------------------------

    #[test]
    fn groups_are_sorted_by_order_then_creation() {
        let mut strategy = UpdateStrategy::new(Box::new(InlinePool::new()));
        strategy.create_update_group("late", 10).unwrap();
        strategy.create_update_group("early", -5).unwrap();
        strategy.create_update_group("default", 0).unwrap();
        strategy.create_update_group("also-default", 0).unwrap();
        assert_eq!(
            strategy.update_group_names(),
            vec!["early", "default", "also-default", "late"]
        );
        assert!(matches!(
            strategy.create_update_group("late", 1),
            Err(EngineError::UpdateGroupExists { .. })
        ));
    }

    #[test]
    fn groups_run_in_order() {
        let context = EngineContext::new(false);
        let trail = Arc::new(Mutex::new(Vec::new()));
        let mut strategy = UpdateStrategy::new(Box::new(WorkerPool::new(2)));
        strategy.create_update_group("physics", 0).unwrap();
        strategy.create_update_group("logic", 1).unwrap();
        strategy.start().unwrap();

        // Registered logic-first; physics still runs first.
        strategy
            .register_world(world_in(&context, "l", "logic", &trail))
            .unwrap();
        strategy
            .register_world(world_in(&context, "p", "physics", &trail))
            .unwrap();

        for _ in 0..20 {
            strategy.update(0.1).unwrap();
        }
        let trail = trail.lock();
        for frame in trail.chunks(2) {
            assert_eq!(frame, ["p", "l"]);
        }
        strategy.shutdown().unwrap();
    }

    // -- worlds -----------------------------------------------------------------

    #[test]
    fn register_is_idempotent_and_checks_group() {
        let context = EngineContext::new(false);
        let trail = Arc::new(Mutex::new(Vec::new()));
        let mut strategy = UpdateStrategy::new(Box::new(InlinePool::new()));
        strategy.create_update_group("default", 0).unwrap();

        let world = world_in(&context, "w", "default", &trail);
        assert!(strategy.register_world(Arc::clone(&world)).unwrap());
        assert!(!strategy.register_world(world).unwrap());
        assert_eq!(strategy.scheduled_count(), 1);

        let stray = world_in(&context, "stray", "missing", &trail);
        assert!(matches!(
            strategy.register_world(stray),
            Err(EngineError::UpdateGroupNotFound { .. })
        ));

        assert!(strategy.unregister_world("w"));
        assert!(!strategy.unregister_world("w"));
        assert!(!strategy.is_scheduled("w"));
    }

    #[test]
    fn unscheduled_worlds_do_not_update() {
        let context = EngineContext::new(false);
        let trail = Arc::new(Mutex::new(Vec::new()));
        let mut strategy = UpdateStrategy::new(Box::new(InlinePool::new()));
        strategy.create_update_group("default", 0).unwrap();
        strategy.start().unwrap();

        let world = world_in(&context, "w", "default", &trail);
        strategy.register_world(Arc::clone(&world)).unwrap();
        strategy.update(0.1).unwrap();
        strategy.unregister_world("w");
        strategy.update(0.1).unwrap();
        assert_eq!(world.update_index(), 1);
        assert!(!world.is_updating());
    }

    // -- faults -----------------------------------------------------------------

    #[test]
    fn faults_block_until_taken() {
        struct Failing;
        impl System for Failing {
            fn update(&mut self, _data: &mut WorldData, _delta: f32) -> anyhow::Result<()> {
                anyhow::bail!("broken")
            }
        }

        let context = EngineContext::new(false);
        let mut builder = WorldBuilder::new(Arc::clone(&context), "bad", None, "default");
        builder.add_system(Failing).unwrap();
        let world = builder.build().unwrap();
        world.on_create().unwrap();

        let mut strategy = UpdateStrategy::new(Box::new(WorkerPool::new(2)));
        strategy.create_update_group("default", 0).unwrap();
        strategy.start().unwrap();
        strategy.register_world(Arc::clone(&world)).unwrap();

        assert!(matches!(
            strategy.update(0.1),
            Err(EngineError::JobsFailed { count: 1, .. })
        ));
        assert!(!world.is_updating());
        assert!(matches!(
            strategy.update(0.1),
            Err(EngineError::UnresolvedFaults { count: 1 })
        ));
        assert_eq!(world.update_index(), 1);

        let faults = strategy.take_faults();
        assert_eq!(faults[0].job, "bad");
        assert!(!strategy.has_faults());
        strategy.unregister_world("bad");
        strategy.update(0.1).unwrap();
        strategy.shutdown().unwrap();
    }

    #[test]
    fn destroyed_world_stops_the_frame_and_closes_the_window() {
        let context = EngineContext::new(false);
        let trail = Arc::new(Mutex::new(Vec::new()));
        let mut strategy = UpdateStrategy::new(Box::new(InlinePool::new()));
        strategy.create_update_group("default", 0).unwrap();
        strategy.start().unwrap();

        let first = world_in(&context, "first", "default", &trail);
        let second = world_in(&context, "second", "default", &trail);
        strategy.register_world(Arc::clone(&first)).unwrap();
        strategy.register_world(Arc::clone(&second)).unwrap();
        second.on_destroy();

        assert!(matches!(
            strategy.update(0.1),
            Err(EngineError::Ecs(EcsError::WorldDestroyed { .. }))
        ));
        assert!(!first.is_updating());
        assert!(trail.lock().is_empty());
    }
}
