//! Property tests for entity storage and reactive groups.
//!
//! These tests drive worlds through random operation sequences and check
//! that attribute tables behave like a map and that every group's
//! membership equals its filter over the world's entities.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use proptest::prelude::*;
use skein_ecs::prelude::*;

#[derive(Debug, Clone, PartialEq)]
struct Health(u32);

#[derive(Debug, Clone, PartialEq)]
struct Poisoned;

#[derive(Debug, Clone, PartialEq)]
struct Label(String);

// ---------------------------------------------------------------------------
// Mapper
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn mapper_slots_are_dense_and_stable(keys in prop::collection::vec(0u16..64, 1..200)) {
        let mapper: Mapper<u16> = Mapper::new();
        let mut first_seen: HashMap<u16, Slot> = HashMap::new();
        for key in &keys {
            let slot = mapper.slot_of(key);
            let expected = *first_seen.entry(*key).or_insert(slot);
            prop_assert_eq!(slot, expected);
        }
        prop_assert_eq!(mapper.len(), first_seen.len());
        for (key, slot) in &first_seen {
            prop_assert!(slot.index() < mapper.len());
            prop_assert_eq!(mapper.reverse_lookup(*slot), Some(*key));
        }
    }
}

// ---------------------------------------------------------------------------
// Attribute table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum AttrOp {
    SetHealth(u32),
    AddHealth(u32),
    RemoveHealth,
    SetLabel(String),
    RemoveLabel,
    SetPoisoned,
    RemovePoisoned,
}

fn attr_op_strategy() -> impl Strategy<Value = AttrOp> {
    prop_oneof![
        (0u32..1000).prop_map(AttrOp::SetHealth),
        (0u32..1000).prop_map(AttrOp::AddHealth),
        Just(AttrOp::RemoveHealth),
        "[a-z]{1,8}".prop_map(AttrOp::SetLabel),
        Just(AttrOp::RemoveLabel),
        Just(AttrOp::SetPoisoned),
        Just(AttrOp::RemovePoisoned),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1_000))]

    #[test]
    fn attribute_table_behaves_like_a_map(ops in prop::collection::vec(attr_op_strategy(), 1..60)) {
        let context = EngineContext::new(false);
        let mut entity = context.new_entity();
        let mut health: Option<u32> = None;
        let mut label: Option<String> = None;
        let mut poisoned = false;

        for op in ops {
            match op {
                AttrOp::SetHealth(v) => {
                    let previous = entity.set(Health(v)).map(|h| h.0);
                    prop_assert_eq!(previous, health.replace(v));
                }
                AttrOp::AddHealth(v) => {
                    let result = entity.add(Health(v));
                    if health.is_some() {
                        prop_assert!(result.is_err());
                    } else {
                        prop_assert!(result.is_ok());
                        health = Some(v);
                    }
                }
                AttrOp::RemoveHealth => {
                    prop_assert_eq!(entity.remove::<Health>().map(|h| h.0), health.take());
                }
                AttrOp::SetLabel(s) => {
                    entity.set(Label(s.clone()));
                    label = Some(s);
                }
                AttrOp::RemoveLabel => {
                    prop_assert_eq!(entity.remove::<Label>().map(|l| l.0), label.take());
                }
                AttrOp::SetPoisoned => {
                    entity.set(Poisoned);
                    poisoned = true;
                }
                AttrOp::RemovePoisoned => {
                    entity.remove::<Poisoned>();
                    poisoned = false;
                }
            }
            prop_assert_eq!(entity.get::<Health>().map(|h| h.0), health);
            prop_assert_eq!(entity.get::<Label>().map(|l| l.0.clone()), label.clone());
            prop_assert_eq!(entity.contains::<Poisoned>(), poisoned);
            let expected_len = health.is_some() as usize + label.is_some() as usize + poisoned as usize;
            prop_assert_eq!(entity.attributes().len(), expected_len);
        }
    }
}

// ---------------------------------------------------------------------------
// Groups
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum WorldOp {
    Create { hp: u32, poisoned: bool },
    Delete(usize),
    Poison(usize),
    Cure(usize),
    SetHealth(usize, u32),
    Frame,
}

fn world_op_strategy() -> impl Strategy<Value = WorldOp> {
    prop_oneof![
        3 => (0u32..100, any::<bool>()).prop_map(|(hp, poisoned)| WorldOp::Create { hp, poisoned }),
        1 => (0..64usize).prop_map(WorldOp::Delete),
        2 => (0..64usize).prop_map(WorldOp::Poison),
        2 => (0..64usize).prop_map(WorldOp::Cure),
        2 => (0..64usize, 0u32..100).prop_map(|(i, hp)| WorldOp::SetHealth(i, hp)),
        1 => Just(WorldOp::Frame),
    ]
}

fn healthy(entity: &Entity) -> bool {
    entity.get::<Health>().map_or(false, |h| h.0 >= 50)
}

fn frame(world: &World) {
    world.pre_update().unwrap();
    world.update(0.016).unwrap();
    world.post_update();
}

fn assert_group_matches(
    data: &WorldData,
    group: &str,
    filter: impl Fn(&Entity) -> bool,
) -> Result<(), TestCaseError> {
    let members: BTreeSet<EntityId> = data.entity_group(group).unwrap().iter().collect();
    let expected: BTreeSet<EntityId> = data.entities().filter(|e| filter(*e)).map(Entity::id).collect();
    prop_assert_eq!(members, expected, "group {} diverged from its filter", group);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    #[test]
    fn groups_equal_their_filter_after_each_flush(
        ops in prop::collection::vec(world_op_strategy(), 1..80),
        paranoid in any::<bool>(),
    ) {
        let context = EngineContext::new(paranoid);
        let mut builder = WorldBuilder::new(Arc::clone(&context), "arena", None, "default");
        builder.entity_group("poisoned", context.has_component::<Poisoned>()).unwrap();
        builder.entity_group("healthy", healthy).unwrap();
        let world = builder.build().unwrap();
        world.on_create().unwrap();

        let mut alive: Vec<EntityId> = Vec::new();
        for op in ops {
            match op {
                WorldOp::Create { hp, poisoned } => {
                    let id = world.data().unwrap().create_entity(|e| {
                        e.add(Health(hp))?;
                        if poisoned {
                            e.add(Poisoned)?;
                        }
                        Ok(())
                    }).unwrap();
                    alive.push(id);
                }
                WorldOp::Delete(i) if !alive.is_empty() => {
                    let id = alive.swap_remove(i % alive.len());
                    world.data().unwrap().delete_entity(id).unwrap();
                }
                WorldOp::Poison(i) if !alive.is_empty() => {
                    let id = alive[i % alive.len()];
                    world.data().unwrap().entity_mut(id).unwrap().set(Poisoned);
                }
                WorldOp::Cure(i) if !alive.is_empty() => {
                    let id = alive[i % alive.len()];
                    world.data().unwrap().entity_mut(id).unwrap().remove::<Poisoned>();
                }
                WorldOp::SetHealth(i, hp) if !alive.is_empty() => {
                    let id = alive[i % alive.len()];
                    let mut data = world.data().unwrap();
                    let entity = data.entity_mut(id).unwrap();
                    entity.get_mut::<Health>().unwrap().0 = hp;
                    entity.notify_changed();
                }
                WorldOp::Frame => {
                    frame(&world);
                    let data = world.data().unwrap();
                    assert_group_matches(&data, "poisoned", |e| e.contains::<Poisoned>())?;
                    assert_group_matches(&data, "healthy", healthy)?;
                }
                _ => {}
            }
        }

        frame(&world);
        let data = world.data().unwrap();
        prop_assert_eq!(data.entity_count(), alive.len());
        assert_group_matches(&data, "poisoned", |e| e.contains::<Poisoned>())?;
        assert_group_matches(&data, "healthy", healthy)?;
    }
}
