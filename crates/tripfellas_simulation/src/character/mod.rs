//! CharacterRig: локальный персонаж + follow камера + shadow light
//!
//! Dynamic rapier тело (rotation locked), движение через velocity.
//! Каждый frame:
//! 1. Update: `apply_movement_input` (MovementInput → Velocity)
//! 2. PostUpdate (после physics step):
//!    reset на падение / goal → motion sync → камера → свет
//!
//! Reset: телепорт в spawn point, velocity = 0. Spawn point берётся из
//! `x_player_spawn` node карты, иначе из `GameConfig`.
//!
//! Core не знает про рендер: камера и свет: просто entities с
//! `FollowCamera` / `ShadowLight`, клиент вешает на них Camera3d/DirectionalLight.

use bevy::prelude::*;
use bevy_rapier3d::prelude::*;

use crate::components::{BodyMetadata, CharacterMotion, LocalCharacter, MovementInput};
use crate::config::{CameraConfig, CharacterConfig, GameConfig};
use crate::goal::GoalEntered;
use crate::logger;
use crate::map::{spawn_current_map, SpawnPoint};
use crate::SimulationSet;

/// Порог |vy| ниже которого считаем персонажа стоящим (можно прыгать)
const GROUNDED_VERTICAL_SPEED: f32 = 0.05;

/// Rig локального персонажа
#[derive(Component, Debug, Clone, Copy, PartialEq, Reflect)]
#[reflect(Component)]
pub struct CharacterRig {
    /// Куда телепортировать при reset
    pub spawn: Vec3,
}

/// Follow камера (per-tick exponential smoothing)
#[derive(Component, Debug, Clone, Copy, Default, PartialEq, Reflect)]
#[reflect(Component)]
pub struct FollowCamera {
    /// Сглаженная точка взгляда
    pub look_target: Vec3,
}

/// Направленный свет с тенями, едет за персонажем (тени не "уезжают")
#[derive(Component, Debug, Clone, Copy, Default, Reflect)]
#[reflect(Component)]
pub struct ShadowLight;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Reflect)]
pub enum ResetReason {
    Fell,
    Goal,
}

#[derive(Event, Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacterReset {
    pub body: Entity,
    pub reason: ResetReason,
}

/// Спавн локального персонажа (dynamic body + collider capsule над origin)
pub fn spawn_local_character(commands: &mut Commands, spawn: Vec3, config: &CharacterConfig) -> Entity {
    let capsule_offset = Vec3::Y * (config.capsule_half_height + config.capsule_radius);

    commands
        .spawn((
            Name::new("Local Character"),
            Transform::from_translation(spawn),
            CharacterRig { spawn },
            LocalCharacter,
            BodyMetadata::CHARACTER,
            MovementInput::default(),
            CharacterMotion::default(),
            // Rapier physics
            RigidBody::Dynamic,
            LockedAxes::ROTATION_LOCKED,
            Collider::compound(vec![(
                capsule_offset,
                Quat::IDENTITY,
                Collider::capsule_y(config.capsule_half_height, config.capsule_radius),
            )]),
            Velocity::zero(),
        ))
        .id()
}

/// Система: Startup: спавн персонажа в `SpawnPoint` (если карта загружена)
pub fn spawn_character_at_spawn_point(
    mut commands: Commands,
    spawn: Option<Res<SpawnPoint>>,
    config: Res<GameConfig>,
    existing: Query<(), With<LocalCharacter>>,
) {
    let Some(spawn) = spawn else {
        return;
    };
    if !existing.is_empty() {
        return;
    }

    let entity = spawn_local_character(&mut commands, spawn.0, &config.character);
    logger::log_info(&format!("🧍 Local character {:?} spawned at {:?}", entity, spawn.0));
}

/// Горизонтальная скорость из input, вертикаль: физике (кроме прыжка)
pub fn movement_velocity(current: Vec3, input: &MovementInput, config: &CharacterConfig) -> Vec3 {
    let planar = Vec3::new(input.direction.x, 0.0, input.direction.z);
    let direction = planar.normalize_or_zero();

    let mut velocity = Vec3::new(
        direction.x * config.move_speed,
        current.y,
        direction.z * config.move_speed,
    );
    if input.jump && current.y.abs() < GROUNDED_VERTICAL_SPEED {
        velocity.y = config.jump_speed;
    }
    velocity
}

/// Система: MovementInput → rapier Velocity
///
/// Schedule: Update
pub fn apply_movement_input(
    config: Res<GameConfig>,
    mut query: Query<(&MovementInput, &mut Velocity, &mut CharacterMotion), With<LocalCharacter>>,
) {
    for (input, mut velocity, mut motion) in query.iter_mut() {
        velocity.linvel = movement_velocity(velocity.linvel, input, &config.character);
        motion.moving = Vec3::new(input.direction.x, 0.0, input.direction.z).length_squared() > 0.0;
    }
}

fn reset_body(transform: &mut Transform, velocity: &mut Velocity, spawn: Vec3) {
    transform.translation = spawn;
    velocity.linvel = Vec3::ZERO;
    velocity.angvel = Vec3::ZERO;
}

/// Система: reset при падении ниже порога или входе в goal
///
/// Один reset на каждый `GoalEntered` с character metadata, адресованный этому телу.
pub fn reset_characters(
    config: Res<GameConfig>,
    mut goal_events: EventReader<GoalEntered>,
    mut resets: EventWriter<CharacterReset>,
    mut characters: Query<(Entity, &CharacterRig, &mut Transform, &mut Velocity), With<LocalCharacter>>,
) {
    for event in goal_events.read() {
        if !event.metadata.character {
            continue;
        }
        let Ok((entity, rig, mut transform, mut velocity)) = characters.get_mut(event.body) else {
            continue;
        };
        reset_body(&mut transform, &mut velocity, rig.spawn);
        resets.write(CharacterReset {
            body: entity,
            reason: ResetReason::Goal,
        });
        logger::log_info("🏁 Goal reached, back to spawn");
    }

    for (entity, rig, mut transform, mut velocity) in characters.iter_mut() {
        if transform.translation.y < config.character.fall_threshold {
            reset_body(&mut transform, &mut velocity, rig.spawn);
            resets.write(CharacterReset {
                body: entity,
                reason: ResetReason::Fell,
            });
            logger::log("character fell off the map, reset");
        }
    }
}

/// Система: rapier velocity → CharacterMotion (для snapshot'а)
pub fn sync_character_motion(mut query: Query<(&Velocity, &mut CharacterMotion), With<LocalCharacter>>) {
    for (velocity, mut motion) in query.iter_mut() {
        motion.velocity = velocity.linvel;
    }
}

/// Один шаг follow камеры: (новая позиция, новая точка взгляда)
pub fn step_follow_camera(camera: Vec3, look_target: Vec3, subject: Vec3, config: &CameraConfig) -> (Vec3, Vec3) {
    (
        camera.lerp(subject + config.offset(), config.position_lerp),
        look_target.lerp(subject, config.look_lerp),
    )
}

pub fn follow_camera(
    config: Res<GameConfig>,
    character: Query<&Transform, With<LocalCharacter>>,
    mut cameras: Query<(&mut Transform, &mut FollowCamera), Without<LocalCharacter>>,
) {
    let Ok(subject) = character.single() else {
        return;
    };

    for (mut transform, mut camera) in cameras.iter_mut() {
        let (position, look_target) = step_follow_camera(
            transform.translation,
            camera.look_target,
            subject.translation,
            &config.camera,
        );
        transform.translation = position;
        camera.look_target = look_target;
        transform.look_at(look_target, Vec3::Y);
    }
}

pub fn follow_shadow_light(
    config: Res<GameConfig>,
    character: Query<&Transform, With<LocalCharacter>>,
    mut lights: Query<&mut Transform, (With<ShadowLight>, Without<LocalCharacter>)>,
) {
    let Ok(subject) = character.single() else {
        return;
    };

    for mut transform in lights.iter_mut() {
        transform.translation = subject.translation + config.light.offset();
        transform.look_at(subject.translation, Vec3::Y);
    }
}

pub struct CharacterPlugin;

impl Plugin for CharacterPlugin {
    fn build(&self, app: &mut App) {
        app.register_type::<CharacterRig>()
            .register_type::<FollowCamera>()
            .add_event::<GoalEntered>()
            .add_event::<CharacterReset>()
            .add_systems(Startup, spawn_character_at_spawn_point.after(spawn_current_map))
            .add_systems(Update, apply_movement_input)
            .add_systems(
                PostUpdate,
                (
                    reset_characters,
                    sync_character_motion,
                    follow_camera,
                    follow_shadow_light,
                )
                    .chain()
                    .in_set(SimulationSet::PostStep)
                    .after(crate::goal::emit_goal_events),
            );
    }
}
