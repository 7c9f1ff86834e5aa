//! ObstacleAnimator: процедурная анимация препятствий
//!
//! Каждое препятствие = descriptor entity (`ObstacleDescriptor`) + physics body entity.
//! Связь двухфазная (как visual attach в клиенте):
//! 1. Map спавнит descriptor
//! 2. `attach_obstacle_bodies` создаёт body и вешает `ObstacleBody` link
//!
//! Пока link нет: препятствие "не смонтировано", tick его молча пропускает.
//!
//! Анимация: чистая функция от wall-clock времени (ms) и phase seed:
//! - swing:  rotation.z = sin((now + seed) / 1000)
//! - slider: x = sin((now + seed) / 700) * 6 (y/z остаются от spawn)
//! - revolver: ничего не задаём, крутит физика (revolute joint по Y)
//!
//! Phase seed локальный на каждом клиенте (не реплицируется): препятствия
//! у разных игроков НЕ синхронизированы.

use bevy::prelude::*;
use bevy::time::Real;
use bevy_rapier3d::prelude::*;
use serde::{Deserialize, Serialize};

use crate::components::BodyMetadata;
use crate::config::{GameConfig, ObstacleConfig};
use crate::error::SimulationError;
use crate::goal::GoalSensor;
use crate::map::{MapShape, PhysicsHint};
use crate::logger;
use crate::SimulationSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Reflect)]
pub enum ObstacleKind {
    /// Kinematic маятник вокруг Z
    Swing,
    /// Kinematic ползун по X
    Slider,
    /// Dynamic тело на revolute joint
    Revolver,
    /// Статичная геометрия уровня
    Static,
    /// Goal sensor
    Sensor,
}

/// Descriptor препятствия (immutable после создания)
#[derive(Component, Debug, Clone, Copy, PartialEq, Reflect)]
#[reflect(Component)]
pub struct ObstacleDescriptor {
    pub kind: ObstacleKind,
    pub base_position: Vec3,
    pub base_rotation: Quat,
    /// ms, выбирается один раз при спавне
    pub phase_seed_ms: f64,
}

impl ObstacleDescriptor {
    pub fn new(kind: ObstacleKind, base_position: Vec3, base_rotation: Quat, phase_seed_ms: f64) -> Self {
        Self {
            kind,
            base_position,
            base_rotation,
            phase_seed_ms,
        }
    }

    /// Целевая поза на момент `now_ms`. None: позу задаёт не аниматор.
    pub fn target_at(&self, now_ms: f64, config: &ObstacleConfig) -> Option<ObstacleTarget> {
        match self.kind {
            ObstacleKind::Swing => Some(ObstacleTarget::Rotation(swing_rotation(
                now_ms,
                self.phase_seed_ms,
                config,
            ))),
            ObstacleKind::Slider => Some(ObstacleTarget::Translation(slider_translation(
                now_ms,
                self.phase_seed_ms,
                self.base_position,
                config,
            ))),
            ObstacleKind::Revolver | ObstacleKind::Static | ObstacleKind::Sensor => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ObstacleTarget {
    Rotation(Quat),
    Translation(Vec3),
}

/// Угол маятника (радианы), в пределах [-1, 1]
pub fn swing_angle(now_ms: f64, phase_seed_ms: f64, config: &ObstacleConfig) -> f32 {
    ((now_ms + phase_seed_ms) / config.swing_period_ms).sin() as f32
}

pub fn swing_rotation(now_ms: f64, phase_seed_ms: f64, config: &ObstacleConfig) -> Quat {
    Quat::from_rotation_z(swing_angle(now_ms, phase_seed_ms, config))
}

/// X абсолютный (не относительно base), Y/Z: от base
pub fn slider_translation(now_ms: f64, phase_seed_ms: f64, base: Vec3, config: &ObstacleConfig) -> Vec3 {
    let x = ((now_ms + phase_seed_ms) / config.slider_period_ms).sin() as f32 * config.slider_amplitude;
    Vec3::new(x, base.y, base.z)
}

/// Link: descriptor → physics body
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObstacleBody(pub Entity);

/// Reverse link: physics body → descriptor
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObstacleOf(pub Entity);

/// Marker: fixed anchor для revolute joint
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct RevolverAnchor;

/// Система: создать physics body для descriptor'ов без `ObstacleBody`
///
/// Schedule: Update. Тело появится в rapier на ближайшем SyncBackend,
/// до этого аниматор пишет только в Transform.
pub fn attach_obstacle_bodies(
    mut commands: Commands,
    pending: Query<
        (Entity, &ObstacleDescriptor, Option<&MapShape>, Option<&PhysicsHint>, Option<&Name>),
        Without<ObstacleBody>,
    >,
) {
    for (descriptor_entity, descriptor, shape, hint, name) in pending.iter() {
        let Some(shape) = shape.copied() else {
            logger::log_warning(&format!(
                "⚠️ Obstacle {:?} has no shape, skipping body",
                descriptor_entity
            ));
            continue;
        };

        let transform =
            Transform::from_translation(descriptor.base_position).with_rotation(descriptor.base_rotation);
        let name = name.map_or_else(|| "obstacle".to_string(), |n| n.as_str().to_string());

        let mut body = commands.spawn((
            Name::new(format!("{} body", name)),
            transform,
            shape.shape.to_collider(),
            shape,
            BodyMetadata::default(),
            ObstacleOf(descriptor_entity),
        ));

        match descriptor.kind {
            ObstacleKind::Swing | ObstacleKind::Slider => {
                body.insert(RigidBody::KinematicPositionBased);
            }
            ObstacleKind::Revolver => {
                body.insert((RigidBody::Dynamic, Velocity::zero()));
            }
            ObstacleKind::Static => {
                body.insert(hint.copied().unwrap_or_default().body.to_rigid_body());
            }
            ObstacleKind::Sensor => {
                body.insert((
                    RigidBody::Fixed,
                    Sensor,
                    ActiveEvents::COLLISION_EVENTS,
                    GoalSensor,
                ));
            }
        }
        let body_entity = body.id();

        if descriptor.kind == ObstacleKind::Revolver {
            // Anchor в мировой точке spawn, тело вращается вокруг Y
            let anchor = commands
                .spawn((
                    Name::new(format!("{} anchor", name)),
                    Transform::from_translation(descriptor.base_position),
                    RigidBody::Fixed,
                    RevolverAnchor,
                    ObstacleOf(descriptor_entity),
                ))
                .id();
            let joint = RevoluteJointBuilder::new(Vec3::Y)
                .local_anchor1(Vec3::ZERO)
                .local_anchor2(Vec3::ZERO);
            commands
                .entity(body_entity)
                .insert(ImpulseJoint::new(anchor, joint));
        }

        commands
            .entity(descriptor_entity)
            .insert(ObstacleBody(body_entity));

        logger::log(&format!(
            "obstacle '{}' ({:?}) mounted as {:?}",
            name, descriptor.kind, body_entity
        ));
    }
}

type ObstacleBodies<'w, 's> = Query<'w, 's, &'static mut Transform, With<ObstacleOf>>;

/// Body transform по link'у. Нет link'а или body ещё не заспавнен → TransientNotReady.
fn mounted_transform<'a>(
    link: Option<&ObstacleBody>,
    bodies: &'a mut ObstacleBodies<'_, '_>,
) -> Result<Mut<'a, Transform>, SimulationError> {
    let link = link.ok_or(SimulationError::TransientNotReady)?;
    bodies
        .get_mut(link.0)
        .map_err(|_| SimulationError::TransientNotReady)
}

/// Система: выставить kinematic цели на текущий wall-clock
///
/// Schedule: PostUpdate, SimulationSet::PreStep (до PhysicsSet::SyncBackend),
/// чтобы цели попали в ближайший physics step.
pub fn animate_obstacles(
    time: Res<Time<Real>>,
    config: Res<GameConfig>,
    descriptors: Query<(&ObstacleDescriptor, Option<&ObstacleBody>)>,
    mut bodies: ObstacleBodies,
) {
    let now_ms = time.elapsed().as_secs_f64() * 1000.0;

    for (descriptor, link) in descriptors.iter() {
        let Some(target) = descriptor.target_at(now_ms, &config.obstacles) else {
            continue;
        };
        // Не смонтировано: пропуск без ошибки, попробуем на следующем tick
        let Ok(mut transform) = mounted_transform(link, &mut bodies) else {
            continue;
        };

        match target {
            ObstacleTarget::Rotation(rotation) => transform.rotation = rotation,
            ObstacleTarget::Translation(translation) => transform.translation = translation,
        }
    }
}

/// Система: descriptor удалён → удалить его body (и anchor)
pub fn cleanup_orphan_bodies(
    mut commands: Commands,
    bodies: Query<(Entity, &ObstacleOf)>,
    descriptors: Query<(), With<ObstacleDescriptor>>,
) {
    for (entity, owner) in bodies.iter() {
        if !descriptors.contains(owner.0) {
            commands.entity(entity).despawn();
        }
    }
}

pub struct ObstaclePlugin;

impl Plugin for ObstaclePlugin {
    fn build(&self, app: &mut App) {
        app.register_type::<ObstacleDescriptor>()
            .add_systems(Update, (attach_obstacle_bodies, cleanup_orphan_bodies).chain())
            .add_systems(PostUpdate, animate_obstacles.in_set(SimulationSet::PreStep));
    }
}
