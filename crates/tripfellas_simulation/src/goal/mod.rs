//! GoalEventBus: sensor → typed событие
//!
//! Rapier отдаёт `CollisionEvent::Started(a, b, flags)` по коллайдерам.
//! Здесь мы:
//! - находим какая из сторон: goal sensor
//! - поднимаемся от коллайдера к телу (коллайдер может быть child entity)
//! - пишем `GoalEntered { body, metadata }`
//!
//! Реагировать или нет решает listener (CharacterRig фильтрует по metadata).
//! Ровно одно событие на каждый enter; stopped события игнорируются.

use bevy::prelude::*;
use bevy_rapier3d::prelude::*;

use crate::components::BodyMetadata;
use crate::SimulationSet;

/// Marker: тело-сенсор финиша
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct GoalSensor;

#[derive(Event, Debug, Clone, Copy, PartialEq, Eq)]
pub struct GoalEntered {
    /// Тело которое вошло в sensor
    pub body: Entity,
    pub metadata: BodyMetadata,
}

/// Коллайдер → (тело, metadata). Без metadata → default (не персонаж).
fn resolve_body(
    collider: Entity,
    metadata: &Query<&BodyMetadata>,
    parents: &Query<&ChildOf>,
) -> (Entity, BodyMetadata) {
    if let Ok(found) = metadata.get(collider) {
        return (collider, *found);
    }
    if let Ok(child_of) = parents.get(collider) {
        let parent = child_of.parent();
        return (parent, metadata.get(parent).copied().unwrap_or_default());
    }
    (collider, BodyMetadata::default())
}

/// Система: CollisionEvent::Started с участием GoalSensor → GoalEntered
///
/// Schedule: PostUpdate, SimulationSet::PostStep (после Writeback).
pub fn emit_goal_events(
    mut collisions: EventReader<CollisionEvent>,
    sensors: Query<(), With<GoalSensor>>,
    metadata: Query<&BodyMetadata>,
    parents: Query<&ChildOf>,
    mut goal_events: EventWriter<GoalEntered>,
) {
    for collision in collisions.read() {
        let (a, b) = match collision {
            CollisionEvent::Started(a, b, _) => (*a, *b),
            CollisionEvent::Stopped(..) => continue,
        };

        let other = if sensors.contains(a) {
            b
        } else if sensors.contains(b) {
            a
        } else {
            continue;
        };

        let (body, metadata) = resolve_body(other, &metadata, &parents);
        goal_events.write(GoalEntered { body, metadata });
    }
}

pub struct GoalPlugin;

impl Plugin for GoalPlugin {
    fn build(&self, app: &mut App) {
        // add_event идемпотентен: с RapierPhysicsPlugin событие уже зарегистрировано
        app.add_event::<CollisionEvent>()
            .add_event::<GoalEntered>()
            .add_systems(PostUpdate, emit_goal_events.in_set(SimulationSet::PostStep));
    }
}
