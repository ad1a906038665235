//! End-to-end tests for the engine: world lifecycle, requests, events,
//! cross-world transfer, system ordering, update groups and fault handling.
//!
//! Every scenario runs on a real worker pool unless it is specifically
//! about inline execution.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use skein_engine::prelude::*;

// ---------------------------------------------------------------------------
// Test component types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
struct Counter(u64);

#[derive(Debug, Clone, PartialEq)]
struct Cargo(&'static str);

#[derive(Debug, Clone, PartialEq)]
struct Ping(u32);

fn started(workers: usize) -> Engine {
    let engine = Engine::new(EngineConfig::with_workers(workers)).unwrap();
    engine.start().unwrap();
    engine
}

fn counter_system(data: &mut WorldData, _delta: f32) -> anyhow::Result<()> {
    for entity in data.entities_mut() {
        if let Some(counter) = entity.get_mut::<Counter>() {
            counter.0 += 1;
        }
    }
    Ok(())
}

fn counter_of(world: &World, name: &str) -> u64 {
    let data = world.data().unwrap();
    data.named_entity(name).unwrap().get::<Counter>().unwrap().0
}

// ---------------------------------------------------------------------------
// Lifecycle and events
// ---------------------------------------------------------------------------

#[test]
fn events_fire_in_lifecycle_order() {
    let engine = Engine::new(EngineConfig::with_workers(2)).unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));
    {
        let events = Arc::clone(&events);
        engine.on_event(move |event| events.lock().push(event.clone()));
    }

    engine.request_create_world("a", None, |_| Ok(()));
    engine.start().unwrap();
    engine.request_create_world("b", None, |_| Ok(()));
    engine.request_destroy_world("a");
    engine.update(0.016).unwrap();
    engine.shutdown().unwrap();

    assert_eq!(
        *events.lock(),
        vec![
            EngineEvent::Started,
            EngineEvent::WorldCreated("a".into()),
            EngineEvent::WorldCreated("b".into()),
            EngineEvent::WorldDestroyed("a".into()),
            EngineEvent::ShuttingDown,
            EngineEvent::WorldDestroyed("b".into()),
        ]
    );
}

#[test]
fn shutdown_destroys_worlds_and_drops_requests() {
    let engine = started(2);
    let world = engine
        .create_world_and_flush("w", None, |builder| {
            builder.create_entity(|e| e.add(Counter(0)))?;
            Ok(())
        })
        .unwrap();
    engine.request_create_world("never", None, |_| Ok(()));
    engine.shutdown().unwrap();

    assert_eq!(world.lifecycle(), WorldLifecycle::Destroyed);
    assert!(engine.world_names().is_empty());
    assert_eq!(engine.pending_requests(), 0);
    assert_eq!(world.data().unwrap().entity_count(), 0);
}

#[test]
fn extensions_follow_engine_lifecycle() {
    #[derive(Default)]
    struct Cache {
        inits: AtomicUsize,
        shutdowns: AtomicUsize,
    }

    impl Extension for Cache {
        fn init(&self, _context: &EngineContext) -> anyhow::Result<()> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn shutdown(&self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    let engine = Engine::new(EngineConfig::inline()).unwrap();
    let cache = engine.context().extensions().insert(Cache::default());
    engine.start().unwrap();
    assert_eq!(cache.inits.load(Ordering::SeqCst), 1);
    engine.shutdown().unwrap();
    assert_eq!(cache.shutdowns.load(Ordering::SeqCst), 1);
    assert!(engine.context().extensions().is_empty());
}

#[test]
fn dropping_a_started_engine_shuts_it_down() {
    let world = {
        let engine = started(3);
        engine.create_world_and_flush("w", None, |_| Ok(())).unwrap()
    };
    assert_eq!(world.lifecycle(), WorldLifecycle::Destroyed);
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[test]
fn duplicate_world_names_are_rejected() {
    let engine = started(1);
    engine.create_world_and_flush("w", None, |_| Ok(())).unwrap();
    let err = engine
        .create_world_and_flush("w", None, |_| Ok(()))
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Ecs(EcsError::WorldExists { ref world }) if world == "w"
    ));
}

#[test]
fn destroying_an_unknown_world_fails() {
    let engine = started(1);
    engine.request_destroy_world("ghost");
    assert!(matches!(
        engine.drain_requests(),
        Err(EngineError::Ecs(EcsError::WorldNotFound { .. }))
    ));
}

#[test]
fn systems_can_queue_requests_mid_frame() {
    let engine = started(2);
    engine
        .create_world_and_flush("spawner", None, |builder| {
            let mut spawned = false;
            builder.add_system(FnSystem::new(move |data: &mut WorldData, _delta| {
                if !spawned {
                    spawned = true;
                    data.context().request_create_world("child", None, |_| Ok(()));
                }
                Ok(())
            }))?;
            Ok(())
        })
        .unwrap();

    // Applied by the drain that follows the frame.
    engine.update(0.016).unwrap();
    let child = engine.world("child").unwrap();
    assert!(engine.is_scheduled("child"));
    assert_eq!(child.update_index(), 0);
    engine.update(0.016).unwrap();
    assert_eq!(child.update_index(), 1);
}

#[test]
fn world_data_is_locked_while_updating() {
    let engine = started(2);
    let probe: Arc<Mutex<Option<EcsError>>> = Arc::new(Mutex::new(None));
    let observer = {
        let probe = Arc::clone(&probe);
        move |builder: &mut WorldBuilder| -> anyhow::Result<()> {
            builder.add_system(FnSystem::new(move |data: &mut WorldData, _delta| {
                let target = data.context().world("target")?;
                if let Err(err) = target.data() {
                    *probe.lock() = Some(err);
                }
                Ok(())
            }))?;
            Ok(())
        }
    };
    engine
        .create_world_and_flush("target", None, |_| Ok(()))
        .unwrap();
    engine
        .create_world_and_flush("observer", None, observer)
        .unwrap();

    engine.update(0.016).unwrap();
    let seen = probe.lock().take();
    assert!(matches!(seen, Some(EcsError::WorldUpdating { ref world }) if world == "target"));
    assert!(engine.world("target").unwrap().data().is_ok());
}

// ---------------------------------------------------------------------------
// Cross-world transfer
// ---------------------------------------------------------------------------

#[test]
fn entity_moves_between_worlds() {
    let engine = Engine::new(EngineConfig {
        paranoid_world_events: true,
        ..EngineConfig::with_workers(2)
    })
    .unwrap();
    engine.start().unwrap();

    let a = engine
        .create_world_and_flush("a", None, |builder| {
            builder.create_named_entity("crate", |e| e.add(Cargo("gold")))?;
            builder.add_system(FnSystem::new(|data: &mut WorldData, _delta| {
                if let Some(id) = data.named_entity_or_none("crate").map(Entity::id) {
                    data.send_entity("b", id)?;
                }
                Ok(())
            }))?;
            Ok(())
        })
        .unwrap();
    let b = engine
        .create_world_and_flush("b", None, |builder| {
            builder.create_named_entity("local", |e| e.add(Cargo("iron")))?;
            Ok(())
        })
        .unwrap();

    let received = Arc::new(AtomicUsize::new(0));
    {
        let received = Arc::clone(&received);
        b.data()
            .unwrap()
            .events_mut()
            .on_entity_received(move |_entity| {
                received.fetch_add(1, Ordering::SeqCst);
            });
    }

    // Frame 1 sends, frame 2 imports.
    engine.update(0.016).unwrap();
    assert!(a.data().unwrap().named_entity_or_none("crate").is_none());
    assert_eq!(b.pending_inbound(), 1);
    engine.update(0.016).unwrap();

    let data = b.data().unwrap();
    let moved = data.named_entity("crate").unwrap();
    assert_eq!(moved.get::<Cargo>(), Some(&Cargo("gold")));
    assert_eq!(moved.world(), Some("b"));
    assert_eq!(received.load(Ordering::SeqCst), 1);
}

#[test]
fn ownership_rules_hold_across_worlds() {
    let engine = started(1);
    let a = engine
        .create_world_and_flush("a", None, |builder| {
            builder.create_named_entity("keeper", |e| e.add(Counter(0)))?;
            Ok(())
        })
        .unwrap();
    let b = engine.create_world_and_flush("b", None, |_| Ok(())).unwrap();

    let mut a_data = a.data().unwrap();
    let id = a_data.named_entity("keeper").unwrap().id();

    // An owned entity is renamed through its world, never directly.
    let err = a_data.entity_mut(id).unwrap().set_name("rogue").unwrap_err();
    assert!(matches!(err, EcsError::EntityOwned { ref owner, .. } if owner == "a"));

    // Failed transfers leave the entity where it was.
    assert!(matches!(
        a_data.send_entity("nowhere", id),
        Err(EcsError::WorldNotFound { .. })
    ));
    assert!(a_data.contains_entity(id));
    let unknown = EntityId::from_raw(u64::MAX);
    assert!(matches!(
        a_data.send_entity("b", unknown),
        Err(EcsError::EntityNotFound { .. })
    ));

    // Deleting releases ownership; the entity may then join another world.
    let released = a_data.delete_entity(id).unwrap();
    assert!(released.world().is_none());
    drop(a_data);
    b.receive_entity(released).unwrap();
    engine.update(0.016).unwrap();

    let b_data = b.data().unwrap();
    assert_eq!(b_data.named_entity("keeper").unwrap().world(), Some("b"));
    assert!(!a.data().unwrap().contains_entity(id));
}

#[test]
fn named_entity_collision_on_import_fails_the_frame() {
    let engine = started(2);
    let target = engine
        .create_world_and_flush("target", None, |builder| {
            builder.create_named_entity("boss", |_| Ok(()))?;
            Ok(())
        })
        .unwrap();

    let mut twin = engine.context().new_entity();
    twin.set_name("boss").unwrap();
    target.receive_entity(twin).unwrap();

    let err = engine.update(0.016).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Ecs(EcsError::NamedEntityExists { ref name, .. }) if name == "boss"
    ));
    assert!(!target.is_updating());

    // The refused entity waits in the target instead of vanishing.
    let mut data = target.data().unwrap();
    let rejected = data.take_rejected_entities();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].name(), Some("boss"));
    assert_eq!(data.entity_count(), 1);
}

#[test]
fn messages_reach_the_target_world() {
    let engine = started(2);
    let inbox = Arc::new(Mutex::new(Vec::new()));
    let rx = engine.create_world_and_flush("rx", None, |_| Ok(())).unwrap();
    {
        let inbox = Arc::clone(&inbox);
        rx.data().unwrap().events_mut().on_message(move |message| {
            if let Some(ping) = message.downcast_ref::<Ping>() {
                inbox.lock().push(ping.0);
            }
        });
    }

    engine.context().send_message("rx", Ping(1)).unwrap();
    engine.context().send_message("rx", Ping(2)).unwrap();
    assert_eq!(rx.pending_inbound(), 2);
    engine.update(0.016).unwrap();
    assert_eq!(*inbox.lock(), vec![1, 2]);
    assert_eq!(rx.pending_inbound(), 0);
}

// ---------------------------------------------------------------------------
// Ordering
// ---------------------------------------------------------------------------

struct Recorder {
    label: &'static str,
    order: i32,
    trail: Arc<Mutex<Vec<&'static str>>>,
}

impl System for Recorder {
    fn order(&self) -> i32 {
        self.order
    }

    fn update(&mut self, _data: &mut WorldData, _delta: f32) -> anyhow::Result<()> {
        self.trail.lock().push(self.label);
        Ok(())
    }
}

struct Other(Recorder);

impl System for Other {
    fn order(&self) -> i32 {
        self.0.order
    }

    fn update(&mut self, data: &mut WorldData, delta: f32) -> anyhow::Result<()> {
        self.0.update(data, delta)
    }
}

#[test]
fn system_order_change_applies_next_frame() {
    let engine = started(2);
    let trail = Arc::new(Mutex::new(Vec::new()));
    let world = {
        let trail = Arc::clone(&trail);
        engine
            .create_world_and_flush("w", None, move |builder| {
                builder.add_system(Recorder {
                    label: "A",
                    order: 5,
                    trail: Arc::clone(&trail),
                })?;
                builder.add_system(Other(Recorder {
                    label: "B",
                    order: 10,
                    trail,
                }))?;
                Ok(())
            })
            .unwrap()
    };

    engine.update(0.016).unwrap();
    assert_eq!(*trail.lock(), vec!["A", "B"]);

    world.with_system::<Recorder, _>(|a| a.order = 15).unwrap();
    trail.lock().clear();
    engine.update(0.016).unwrap();
    assert_eq!(*trail.lock(), vec!["B", "A"]);
}

#[test]
fn update_groups_run_in_order() {
    let engine = started(4);
    engine.create_update_group("early", -10).unwrap();
    engine.create_update_group("late", 10).unwrap();
    assert!(matches!(
        engine.create_update_group("late", 3),
        Err(EngineError::UpdateGroupExists { .. })
    ));

    let trail = Arc::new(Mutex::new(Vec::new()));
    for (world, group) in [("w-late", "late"), ("w-default", "default"), ("w-early", "early")] {
        let trail = Arc::clone(&trail);
        engine
            .create_world_and_flush(world, None, move |builder| {
                builder.set_update_group(group);
                builder.add_system(FnSystem::new(move |_data: &mut WorldData, _delta| {
                    trail.lock().push(group);
                    Ok(())
                }))?;
                Ok(())
            })
            .unwrap();
    }

    for _ in 0..25 {
        engine.update(0.016).unwrap();
    }
    let trail = trail.lock();
    assert_eq!(trail.len(), 75);
    for frame in trail.chunks(3) {
        assert_eq!(frame, ["early", "default", "late"]);
    }
}

// ---------------------------------------------------------------------------
// Faults
// ---------------------------------------------------------------------------

#[test]
fn faults_surface_and_block_until_taken() {
    let engine = started(3);
    let healthy = engine
        .create_world_and_flush("healthy", None, |builder| {
            builder.create_named_entity("ticker", |e| e.add(Counter(0)))?;
            builder.add_system(FnSystem::new(counter_system))?;
            Ok(())
        })
        .unwrap();
    engine
        .create_world_and_flush("flaky", None, |builder| {
            builder.add_system(FnSystem::new(|_data: &mut WorldData, _delta| {
                anyhow::bail!("sensor offline")
            }))?;
            Ok(())
        })
        .unwrap();

    let err = engine.update(0.016).unwrap_err();
    assert!(matches!(err, EngineError::JobsFailed { count: 1, .. }));
    // The failure did not stop the sibling world.
    assert_eq!(counter_of(&healthy, "ticker"), 1);

    assert!(matches!(
        engine.update(0.016),
        Err(EngineError::UnresolvedFaults { count: 1 })
    ));
    assert_eq!(counter_of(&healthy, "ticker"), 1);

    let faults = engine.take_faults();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].job, "flaky");
    assert!(matches!(
        &faults[0].kind,
        FaultKind::Failed(EcsError::SystemFailed { reason, .. }) if reason.contains("sensor offline")
    ));

    engine.request_destroy_world("flaky");
    engine.update(0.016).unwrap();
    assert_eq!(counter_of(&healthy, "ticker"), 2);
}

#[test]
fn requests_from_a_faulted_frame_are_applied() {
    let engine = started(2);
    let events = Arc::new(Mutex::new(Vec::new()));
    {
        let events = Arc::clone(&events);
        engine.on_event(move |event| events.lock().push(event.clone()));
    }
    engine
        .create_world_and_flush("doomed", None, |builder| {
            builder.add_system(FnSystem::new(|data: &mut WorldData, _delta| {
                data.context().request_create_world("survivor", None, |_| Ok(()));
                panic!("reactor breach")
            }))?;
            Ok(())
        })
        .unwrap();

    assert!(matches!(
        engine.update(0.016),
        Err(EngineError::JobsFailed { count: 1, .. })
    ));
    assert!(engine.world_or_none("survivor").is_some());
    assert_eq!(engine.pending_requests(), 0);
    assert_eq!(
        events.lock().last(),
        Some(&EngineEvent::WorldCreated("survivor".into()))
    );

    // Nothing is applied while the fault is unresolved.
    engine.request_destroy_world("doomed");
    assert!(matches!(
        engine.update(0.016),
        Err(EngineError::UnresolvedFaults { count: 1 })
    ));
    assert!(engine.world_or_none("doomed").is_some());
    assert_eq!(engine.pending_requests(), 1);

    assert_eq!(engine.take_faults().len(), 1);
    engine.update(0.016).unwrap();
    assert!(engine.world_or_none("doomed").is_none());
    assert!(engine.world_or_none("survivor").is_some());
}

#[test]
fn panicking_system_is_captured() {
    let engine = started(2);
    let world = engine
        .create_world_and_flush("boom", None, |builder| {
            builder.add_system(FnSystem::new(|_data: &mut WorldData, _delta| {
                panic!("system exploded")
            }))?;
            Ok(())
        })
        .unwrap();

    assert!(engine.update(0.016).is_err());
    let faults = engine.take_faults();
    assert!(matches!(&faults[0].kind, FaultKind::Panicked(m) if m == "system exploded"));
    assert!(!world.is_updating());

    // Workers survive; the pool keeps running frames.
    engine.request_set_scheduled("boom", false);
    engine.update(0.016).unwrap();
    engine.update(0.016).unwrap();
}
