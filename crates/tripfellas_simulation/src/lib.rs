//! Trip Fellas Simulation Core
//!
//! Headless ECS-ядро мультиплеерного 3D платформера на Bevy 0.16 + Rapier.
//! Рендер, input и окно живут в `tripfellas_client`; здесь: только
//! gameplay state, физические тела и peer replication.
//!
//! Порядок внутри frame (PostUpdate):
//! 1. `SimulationSet::PreStep`: kinematic цели препятствий
//! 2. rapier: SyncBackend → StepSimulation → Writeback
//! 3. `SimulationSet::PostStep`: goal события, reset, камера, свет
//! 4. TransformPropagate

use bevy::prelude::*;
use bevy::transform::TransformSystem;
use bevy_rapier3d::plugin::PhysicsSet;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

// Публичные модули
pub mod character;
pub mod components;
pub mod config;
pub mod error;
pub mod goal;
pub mod logger;
pub mod map;
pub mod net;
pub mod obstacles;
pub mod remote;

// Re-export для клиента и тестов
pub use character::{
    spawn_local_character, CharacterPlugin, CharacterReset, CharacterRig, FollowCamera, ResetReason, ShadowLight,
};
pub use components::*;
pub use config::{ConfigError, GameConfig};
pub use error::SimulationError;
pub use goal::{GoalEntered, GoalPlugin, GoalSensor};
pub use logger::init_logger;
pub use map::{CurrentMap, MapDescription, MapPlugin, MapShape, ShapeHint, SpawnPoint};
pub use net::{
    leave_session, LoopbackHub, MembershipChanged, PeerId, PeerSession, PlayerSnapshot, PlayerStateChannel,
    SessionPlugin, TransportConfig, UdpConfig,
};
pub use obstacles::{ObstacleBody, ObstacleDescriptor, ObstacleKind, ObstaclePlugin};
pub use remote::{RemoteCharacterProxy, RemotePlugin};

/// Фазы вокруг rapier physics step (PostUpdate)
#[derive(SystemSet, Debug, Clone, PartialEq, Eq, Hash)]
pub enum SimulationSet {
    /// До SyncBackend: цели kinematic тел
    PreStep,
    /// После Writeback: читаем результат step
    PostStep,
}

/// Главный plugin симуляции (объединяет все подсистемы)
///
/// RapierPhysicsPlugin добавляет клиент/headless binary: тесты гоняют
/// системы без физики.
pub struct SimulationPlugin;

impl Plugin for SimulationPlugin {
    fn build(&self, app: &mut App) {
        // Config/RNG до sub-plugins: SessionPlugin читает интервал публикации в build
        if !app.world().contains_resource::<GameConfig>() {
            app.init_resource::<GameConfig>();
        }
        if !app.world().contains_resource::<DeterministicRng>() {
            app.insert_resource(DeterministicRng::new(42));
        }

        app.configure_sets(
            PostUpdate,
            (
                SimulationSet::PreStep.before(PhysicsSet::SyncBackend),
                SimulationSet::PostStep
                    .after(PhysicsSet::Writeback)
                    .before(TransformSystem::TransformPropagate),
            ),
        )
        .add_plugins((
            SessionPlugin,
            MapPlugin,
            ObstaclePlugin,
            GoalPlugin,
            CharacterPlugin,
            RemotePlugin,
        ));
    }
}

/// Детерминистичный RNG resource (seeded)
///
/// Только для локальных решений (phase seeds препятствий). Peer id берутся
/// из системного RNG.
#[derive(Resource)]
pub struct DeterministicRng {
    pub rng: ChaCha8Rng,
    pub seed: u64,
}

impl DeterministicRng {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            seed,
        }
    }
}

/// Создаёт minimal Bevy App для headless симуляции
pub fn create_headless_app(seed: u64) -> App {
    let mut app = App::new();
    init_logger();
    app.add_plugins(MinimalPlugins)
        .insert_resource(DeterministicRng::new(seed));

    app
}

/// Snapshot компонентов для сравнения детерминизма
pub fn world_snapshot<T: Component>(world: &mut World) -> Vec<u8>
where
    T: std::fmt::Debug,
{
    let mut snapshot = Vec::new();

    let mut query = world.query::<(Entity, &T)>();
    let mut entities: Vec<_> = query.iter(world).collect();

    // Сортируем по Entity ID для детерминизма
    entities.sort_by_key(|(entity, _)| entity.index());

    for (entity, component) in entities {
        snapshot.extend_from_slice(&entity.index().to_le_bytes());
        snapshot.extend_from_slice(format!("{:?}", component).as_bytes());
    }

    snapshot
}
