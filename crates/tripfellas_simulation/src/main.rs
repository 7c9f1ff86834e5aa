//! Headless симуляция Trip Fellas
//!
//! Два инстанса в одном процессе, общая комната через LoopbackHub.
//! Игрок A бежит вперёд, игрок B видит его proxy.

use std::time::Duration;

use bevy::prelude::*;
use bevy::time::TimeUpdateStrategy;
use bevy::transform::TransformPlugin;
use bevy_rapier3d::prelude::*;
use tripfellas_simulation::{
    create_headless_app, logger, CurrentMap, GameConfig, LocalCharacter, LoopbackHub, MapDescription,
    MovementInput, PeerSession, RemoteCharacterProxy, SimulationPlugin, TransportConfig,
};

const DEMO_MAP: &str = include_str!("../../../assets/maps/trip_fellas.ron");
const TICKS: usize = 600;

fn build_instance(seed: u64, map: &MapDescription, hub: &LoopbackHub, config: &GameConfig) -> App {
    let mut app = create_headless_app(seed);
    app.add_plugins(TransformPlugin)
        .add_plugins(RapierPhysicsPlugin::<NoUserData>::default())
        .insert_resource(TimeUpdateStrategy::ManualDuration(Duration::from_secs_f64(1.0 / 60.0)))
        .insert_resource(config.clone())
        .insert_resource(CurrentMap(map.clone()))
        .insert_resource(PeerSession::join(&config.network.room, TransportConfig::Hub(hub.clone())))
        .add_plugins(SimulationPlugin);
    app
}

fn main() {
    let seed = 42;
    logger::init_logger();
    logger::log_info(&format!("Starting Trip Fellas headless simulation (seed: {})", seed));

    let map = match MapDescription::from_ron_str(DEMO_MAP) {
        Ok(map) => map,
        Err(err) => {
            logger::log_error(&format!("❌ Demo map is broken: {}", err));
            return;
        }
    };
    let config = GameConfig::default();
    let hub = LoopbackHub::new();

    let mut runner = build_instance(seed, &map, &hub, &config);
    let mut watcher = build_instance(seed + 1, &map, &hub, &config);

    for tick in 0..TICKS {
        // Игрок A всё время бежит к финишу (-Z)
        let world = runner.world_mut();
        let mut inputs = world.query_filtered::<&mut MovementInput, With<LocalCharacter>>();
        for mut input in inputs.iter_mut(world) {
            input.direction = Vec3::NEG_Z;
        }

        runner.update();
        watcher.update();

        if tick % 100 == 0 {
            let world = watcher.world_mut();
            let mut proxies = world.query::<(&RemoteCharacterProxy, &Transform)>();
            for (proxy, transform) in proxies.iter(world) {
                logger::log_info(&format!(
                    "Tick {}: {} seen at {:.2?}",
                    tick, proxy.peer, transform.translation
                ));
            }
        }
    }

    logger::log_info("Simulation complete!");
}
