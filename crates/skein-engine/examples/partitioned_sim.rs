//! Headless multi-world simulation.
//!
//! Four "zone" worlds each hold a herd of wanderers. Every frame a wanderer
//! moves; one that walks off the east edge of its zone is sent to the next
//! zone over. A "census" world in a later update group receives per-zone
//! population reports as messages and logs them.
//!
//! Run with: `RUST_LOG=info cargo run --example partitioned_sim`

use std::sync::Arc;

use parking_lot::Mutex;
use skein_engine::prelude::*;
use skein_engine::telemetry::init_tracing;
use tracing::info;

const ZONES: usize = 4;
const PER_ZONE: usize = 250;
const ZONE_WIDTH: f32 = 100.0;
const FRAMES: u32 = 600;

#[derive(Debug, Clone)]
struct Position(f32);

#[derive(Debug, Clone)]
struct Speed(f32);

#[derive(Debug)]
struct Report {
    zone: String,
    population: usize,
}

/// Per-world resource naming the neighbour that receives leavers.
struct Neighbour(String);

/// Display label every world gets from the global decorator.
struct ZoneLabel(String);

fn wander(data: &mut WorldData, delta: f32) -> anyhow::Result<()> {
    let mut leavers = Vec::new();
    for entity in data.entities_mut() {
        let Some(speed) = entity.get::<Speed>().map(|s| s.0) else {
            continue;
        };
        if let Some(position) = entity.get_mut::<Position>() {
            position.0 += speed * delta;
            if position.0 > ZONE_WIDTH {
                position.0 -= ZONE_WIDTH;
                leavers.push(entity.id());
            }
        }
    }

    let neighbour = data.resources().require::<Neighbour>()?.0.clone();
    for id in leavers {
        data.send_entity(&neighbour, id)?;
    }
    Ok(())
}

fn report(data: &mut WorldData, _delta: f32) -> anyhow::Result<()> {
    let population = data.entity_group("wanderers")?.len();
    data.send_message(
        "census",
        Report {
            zone: data.resources().require::<ZoneLabel>()?.0.clone(),
            population,
        },
    )?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    init_tracing("info")?;

    let engine = Engine::new(EngineConfig::with_workers(ZONES))?;
    engine.create_update_group("census", 10)?;
    engine.add_world_decorator(|builder| {
        let label = ZoneLabel(builder.name().to_uppercase());
        builder.resources_mut().insert(label);
        Ok(())
    });
    engine.on_event(|event| info!(?event, "engine event"));
    engine.start()?;

    let census: Arc<Mutex<Vec<(String, usize)>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let census = Arc::clone(&census);
        let world = engine.create_world_and_flush("census", None, |builder| {
            builder.set_update_group("census");
            Ok(())
        })?;
        world.data()?.events_mut().on_message(move |message| {
            if let Some(report) = message.downcast_ref::<Report>() {
                census.lock().push((report.zone.clone(), report.population));
            }
        });
    }

    for zone in 0..ZONES {
        let neighbour = format!("zone-{}", (zone + 1) % ZONES);
        let speed_bias = zone as f32;
        engine.create_world_and_flush(format!("zone-{zone}"), None, move |builder| {
            builder.resources_mut().insert(Neighbour(neighbour));
            builder.entity_group("wanderers", |e: &Entity| e.contains::<Speed>())?;
            for i in 0..PER_ZONE {
                builder.create_entity(|e| {
                    e.add(Position((i % 100) as f32))?;
                    e.add(Speed(10.0 + speed_bias + (i % 7) as f32))
                })?;
            }
            builder.add_system(FnSystem::with_order(0, wander))?;
            builder.add_system(FnSystem::with_order(10, report))?;
            Ok(())
        })?;
    }

    for frame in 1..=FRAMES {
        engine.update(1.0 / 60.0)?;
        if frame % 120 == 0 {
            let mut reports = std::mem::take(&mut *census.lock());
            reports.sort();
            reports.dedup_by(|a, b| a.0 == b.0);
            let total: usize = reports.iter().map(|(_, n)| n).sum();
            info!(frame, ?reports, total, "census");
        }
    }

    engine.shutdown()?;
    Ok(())
}
