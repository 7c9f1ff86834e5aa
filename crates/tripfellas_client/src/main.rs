use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use bevy::prelude::*;
use bevy_rapier3d::prelude::*;
use clap::{Parser, ValueEnum};
use tripfellas_simulation::{
    logger, CurrentMap, DeterministicRng, GameConfig, MapDescription, PeerSession, SimulationPlugin,
    TransportConfig, UdpConfig,
};

mod camera;
mod input;
mod logging;
mod rendering;

use camera::CameraPlugin;
use input::KeyboardInputPlugin;
use rendering::RenderingSyncPlugin;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TransportKind {
    /// Без сети
    Solo,
    /// LAN UDP awareness
    Udp,
}

#[derive(Debug, Parser)]
#[command(name = "tripfellas", about = "Trip Fellas: multiplayer obstacle course")]
struct Cli {
    /// Комната (по умолчанию из конфига)
    #[arg(long)]
    room: Option<String>,

    #[arg(long, value_enum, default_value_t = TransportKind::Udp)]
    transport: TransportKind,

    /// Локальный UDP адрес
    #[arg(long, default_value = "0.0.0.0:47800")]
    bind: SocketAddr,

    /// Адреса peers (можно повторять, можно broadcast адрес)
    #[arg(long = "peer")]
    peers: Vec<SocketAddr>,

    /// Разрешить broadcast на сокете
    #[arg(long)]
    broadcast: bool,

    #[arg(long, default_value = "assets/config/game.ron")]
    config: PathBuf,

    #[arg(long, default_value = "assets/maps/trip_fellas.ron")]
    map: PathBuf,

    /// Seed для phase seeds препятствий (по умолчанию случайный)
    #[arg(long)]
    seed: Option<u64>,
}

impl Cli {
    fn transport_config(&self, config: &GameConfig) -> TransportConfig {
        match self.transport {
            TransportKind::Solo => TransportConfig::Solo,
            TransportKind::Udp => TransportConfig::Udp(UdpConfig {
                bind: self.bind,
                peers: self.peers.clone(),
                broadcast: self.broadcast,
                heartbeat: Duration::from_millis(config.network.heartbeat_interval_ms),
                peer_timeout: Duration::from_millis(config.network.peer_timeout_ms),
            }),
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init();

    let config = GameConfig::load_or_default(&cli.config);
    let map = MapDescription::load(&cli.map)
        .with_context(|| format!("loading map {}", cli.map.display()))?;
    let room = cli.room.clone().unwrap_or_else(|| config.network.room.clone());
    let seed = cli.seed.unwrap_or_else(rand_seed);

    // join никогда не падает: нет сети → solo
    let session = PeerSession::join(&room, cli.transport_config(&config));

    App::new()
        .add_plugins(DefaultPlugins.set(WindowPlugin {
            primary_window: Some(Window {
                title: "Trip Fellas".to_string(),
                resolution: (1280., 720.).into(),
                ..default()
            }),
            ..default()
        }))
        .add_plugins(RapierPhysicsPlugin::<NoUserData>::default())
        .insert_resource(config)
        .insert_resource(DeterministicRng::new(seed))
        .insert_resource(CurrentMap(map))
        .insert_resource(session)
        // Simulation (headless ECS logic)
        .add_plugins(SimulationPlugin)
        // Rendering sync (simulation → visuals)
        .add_plugins(RenderingSyncPlugin)
        .add_plugins(CameraPlugin)
        .add_plugins(KeyboardInputPlugin)
        .insert_resource(LaunchInfo { seed })
        .add_systems(Startup, announce_session)
        .run();

    Ok(())
}

#[derive(Resource)]
struct LaunchInfo {
    seed: u64,
}

/// После старта LogPlugin: иначе tracing subscriber ещё не поднят
fn announce_session(session: Res<PeerSession>, launch: Res<LaunchInfo>) {
    let mode = if session.is_degraded() { " (solo fallback)" } else { "" };
    logger::log_info(&format!(
        "🎮 Trip Fellas: room '{}' as {}{}, seed {}",
        session.room(),
        session.local_id(),
        mode,
        launch.seed
    ));
}

fn rand_seed() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_nanos() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults_to_udp() {
        let cli = Cli::parse_from(["tripfellas"]);
        assert_eq!(cli.transport, TransportKind::Udp);
        assert!(cli.peers.is_empty());
        assert!(matches!(
            cli.transport_config(&GameConfig::default()),
            TransportConfig::Udp(UdpConfig { broadcast: false, .. })
        ));
    }

    #[test]
    fn test_cli_peers_and_room() {
        let cli = Cli::parse_from([
            "tripfellas",
            "--room",
            "lan",
            "--peer",
            "192.168.1.10:47800",
            "--peer",
            "192.168.1.11:47800",
            "--transport",
            "solo",
        ]);
        assert_eq!(cli.room.as_deref(), Some("lan"));
        assert_eq!(cli.peers.len(), 2);
        assert!(matches!(
            cli.transport_config(&GameConfig::default()),
            TransportConfig::Solo
        ));
    }
}
