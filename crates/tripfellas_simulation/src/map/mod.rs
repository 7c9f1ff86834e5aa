//! Map: описание уровня (scene/model provider seam)
//!
//! Карта = плоский список named nodes (как в glTF после парсинга):
//! - `obstacle` metadata → swing / slider / revolver
//! - `physics` metadata → статичное (или dynamic) тело с коллайдером
//! - `x_goal` → goal sensor
//! - `x_player_spawn` → точка spawn/reset персонажа
//! - `Scene` и всё с `x_` в имени: не рисуется
//! - остальное: декорации (только визуал)
//!
//! Приоритет классификации: obstacle > physics > goal > hidden > decoration.

use std::path::Path;

use bevy::prelude::*;
use bevy_rapier3d::prelude::*;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, GameConfig};
use crate::logger;
use crate::obstacles::{ObstacleDescriptor, ObstacleKind};
use crate::DeterministicRng;

pub const GOAL_NODE: &str = "x_goal";
pub const SPAWN_NODE: &str = "x_player_spawn";
const SCENE_ROOT_NODE: &str = "Scene";
const MARKER_PREFIX: &str = "x_";

/// Форма коллайдера/меша (вместо trimesh из glTF)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Reflect)]
pub enum ShapeHint {
    Cuboid { half_extents: [f32; 3] },
    Ball { radius: f32 },
    Cylinder { half_height: f32, radius: f32 },
    Capsule { half_height: f32, radius: f32 },
}

impl ShapeHint {
    pub fn to_collider(&self) -> Collider {
        match *self {
            ShapeHint::Cuboid { half_extents: [x, y, z] } => Collider::cuboid(x, y, z),
            ShapeHint::Ball { radius } => Collider::ball(radius),
            ShapeHint::Cylinder { half_height, radius } => Collider::cylinder(half_height, radius),
            ShapeHint::Capsule { half_height, radius } => Collider::capsule_y(half_height, radius),
        }
    }
}

/// Тип тела для nodes с `physics` metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Reflect)]
pub enum BodyHint {
    #[default]
    Fixed,
    Dynamic,
    KinematicPosition,
}

impl BodyHint {
    pub fn to_rigid_body(self) -> RigidBody {
        match self {
            BodyHint::Fixed => RigidBody::Fixed,
            BodyHint::Dynamic => RigidBody::Dynamic,
            BodyHint::KinematicPosition => RigidBody::KinematicPositionBased,
        }
    }
}

#[derive(Component, Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, Reflect)]
#[reflect(Component)]
pub struct PhysicsHint {
    #[serde(default)]
    pub body: BodyHint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapNodeDesc {
    pub name: String,
    pub translation: [f32; 3],
    /// Euler XYZ, радианы
    #[serde(default)]
    pub rotation: [f32; 3],
    pub shape: ShapeHint,
    #[serde(default)]
    pub obstacle: Option<ObstacleKind>,
    #[serde(default)]
    pub physics: Option<PhysicsHint>,
    #[serde(default)]
    pub color: Option<[f32; 3]>,
}

impl MapNodeDesc {
    pub fn translation(&self) -> Vec3 {
        Vec3::from_array(self.translation)
    }

    pub fn rotation(&self) -> Quat {
        let [x, y, z] = self.rotation;
        Quat::from_euler(EulerRot::XYZ, x, y, z)
    }

    pub fn role(&self) -> NodeRole {
        match self.obstacle {
            Some(kind @ (ObstacleKind::Swing | ObstacleKind::Slider | ObstacleKind::Revolver)) => {
                return NodeRole::Obstacle(kind);
            }
            _ => {}
        }
        if let Some(hint) = self.physics {
            return NodeRole::Physics(hint);
        }
        if self.name == GOAL_NODE {
            return NodeRole::Goal;
        }
        if self.name == SCENE_ROOT_NODE || self.name.contains(MARKER_PREFIX) {
            return NodeRole::Hidden;
        }
        NodeRole::Decoration
    }
}

/// Во что превращается node при загрузке
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NodeRole {
    Obstacle(ObstacleKind),
    Physics(PhysicsHint),
    Goal,
    Hidden,
    Decoration,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MapDescription {
    pub nodes: Vec<MapNodeDesc>,
}

impl MapDescription {
    pub fn from_ron_str(source: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(source)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_ron_str(&data)
    }

    pub fn node(&self, name: &str) -> Option<&MapNodeDesc> {
        self.nodes.iter().find(|node| node.name == name)
    }

    pub fn spawn_point(&self) -> Option<Vec3> {
        self.node(SPAWN_NODE).map(MapNodeDesc::translation)
    }
}

/// Resource: карта которую надо заспавнить на Startup
#[derive(Resource, Debug, Clone)]
pub struct CurrentMap(pub MapDescription);

/// Resource: authored spawn coordinate персонажа
#[derive(Resource, Debug, Clone, Copy, PartialEq)]
pub struct SpawnPoint(pub Vec3);

/// Визуальная форма node (клиент вешает меш на Added<MapShape>)
#[derive(Component, Debug, Clone, Copy, PartialEq, Reflect)]
#[reflect(Component)]
pub struct MapShape {
    pub shape: ShapeHint,
    pub color: Option<[f32; 3]>,
    pub visible: bool,
}

/// Marker: декорация без физики
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct MapDecoration;

/// Итог загрузки карты (для логов и тестов)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MapSummary {
    pub obstacles: usize,
    pub static_bodies: usize,
    pub goals: usize,
    pub decorations: usize,
    pub hidden: usize,
}

/// Спавнит descriptor'ы и декорации. Тела препятствий подключаются позже
/// (`attach_obstacle_bodies`).
pub fn spawn_map(
    commands: &mut Commands,
    map: &MapDescription,
    rng: &mut DeterministicRng,
    config: &GameConfig,
) -> MapSummary {
    let mut summary = MapSummary::default();

    for node in &map.nodes {
        let shape = MapShape {
            shape: node.shape,
            color: node.color,
            visible: true,
        };

        match node.role() {
            NodeRole::Obstacle(kind) => {
                let phase_seed = random_phase_seed(kind, rng, config);
                commands.spawn((
                    Name::new(node.name.clone()),
                    ObstacleDescriptor::new(kind, node.translation(), node.rotation(), phase_seed),
                    shape,
                ));
                summary.obstacles += 1;
            }
            NodeRole::Physics(hint) => {
                commands.spawn((
                    Name::new(node.name.clone()),
                    ObstacleDescriptor::new(ObstacleKind::Static, node.translation(), node.rotation(), 0.0),
                    hint,
                    shape,
                ));
                summary.static_bodies += 1;
            }
            NodeRole::Goal => {
                commands.spawn((
                    Name::new(node.name.clone()),
                    ObstacleDescriptor::new(ObstacleKind::Sensor, node.translation(), node.rotation(), 0.0),
                    MapShape {
                        visible: false,
                        ..shape
                    },
                ));
                summary.goals += 1;
            }
            NodeRole::Decoration => {
                commands.spawn((
                    Name::new(node.name.clone()),
                    Transform::from_translation(node.translation()).with_rotation(node.rotation()),
                    shape,
                    MapDecoration,
                ));
                summary.decorations += 1;
            }
            NodeRole::Hidden => summary.hidden += 1,
        }
    }

    summary
}

/// Phase seed (ms): случайный один раз на создание, дальше не меняется
fn random_phase_seed(kind: ObstacleKind, rng: &mut DeterministicRng, config: &GameConfig) -> f64 {
    let range = match kind {
        ObstacleKind::Swing => config.obstacles.swing_phase_range_ms,
        ObstacleKind::Slider => config.obstacles.slider_phase_range_ms,
        _ => return 0.0,
    };
    rng.rng.gen::<f64>() * range
}

/// Система: Startup: спавн `CurrentMap` + `SpawnPoint`
pub fn spawn_current_map(
    mut commands: Commands,
    map: Option<Res<CurrentMap>>,
    mut rng: ResMut<DeterministicRng>,
    config: Res<GameConfig>,
) {
    let Some(map) = map else {
        return;
    };

    let spawn = map
        .0
        .spawn_point()
        .unwrap_or_else(|| Vec3::from_array(config.character.fallback_spawn));
    commands.insert_resource(SpawnPoint(spawn));

    let summary = spawn_map(&mut commands, &map.0, &mut rng, &config);
    logger::log_info(&format!(
        "🗺️ Map loaded: {} obstacles, {} static, {} goals, {} decorations ({} hidden)",
        summary.obstacles, summary.static_bodies, summary.goals, summary.decorations, summary.hidden
    ));
}

pub struct MapPlugin;

impl Plugin for MapPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(Startup, spawn_current_map);
    }
}
