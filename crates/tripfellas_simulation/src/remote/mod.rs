//! RemoteCharacterProxy: визуальный двойник чужого игрока
//!
//! Proxy НЕ имеет physics тела: только Transform + CharacterMotion.
//! - membership added → spawn proxy (один на peer)
//! - membership removed / сессия закрыта → despawn
//! - каждый frame: position += (target - position) * 0.2
//!
//! Velocity из snapshot используется только для выбора анимации,
//! экстраполяции позиции нет.

use bevy::prelude::*;

use crate::components::CharacterMotion;
use crate::config::GameConfig;
use crate::logger;
use crate::net::{MembershipChanged, PeerId, PeerSession, PlayerStateChannel};

/// Proxy remote peer'а
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteCharacterProxy {
    pub peer: PeerId,
}

/// Один шаг exponential smoothing (frame-rate dependent, как задумано)
pub fn interpolate_position(current: Vec3, target: Vec3, factor: f32) -> Vec3 {
    current + (target - current) * factor
}

pub fn spawn_remote_proxy(commands: &mut Commands, peer: PeerId) -> Entity {
    commands
        .spawn((
            Name::new(format!("Remote {}", peer)),
            RemoteCharacterProxy { peer },
            Transform::default(),
            CharacterMotion::default(),
        ))
        .id()
}

/// Система: MembershipChanged → spawn/despawn proxies
///
/// Schedule: Update (до interpolation)
pub fn sync_remote_roster(
    mut commands: Commands,
    mut changes: EventReader<MembershipChanged>,
    proxies: Query<(Entity, &RemoteCharacterProxy)>,
) {
    let mut known: Vec<(Entity, PeerId)> = proxies.iter().map(|(e, p)| (e, p.peer)).collect();

    for change in changes.read() {
        for &peer in &change.added {
            if known.iter().any(|(_, existing)| *existing == peer) {
                continue;
            }
            let entity = spawn_remote_proxy(&mut commands, peer);
            known.push((entity, peer));
            logger::log_info(&format!("👋 {} joined", peer));
        }

        for &peer in &change.removed {
            known.retain(|&(entity, existing)| {
                if existing != peer {
                    return true;
                }
                commands.entity(entity).despawn();
                false
            });
            logger::log_info(&format!("👋 {} left", peer));
        }
    }
}

/// Система: сессии нет (leave/dispose) → убрать всех proxies
pub fn despawn_orphan_proxies(
    mut commands: Commands,
    session: Option<Res<PeerSession>>,
    proxies: Query<Entity, With<RemoteCharacterProxy>>,
) {
    let active = session.is_some_and(|session| !session.is_disposed());
    if active {
        return;
    }
    for entity in proxies.iter() {
        commands.entity(entity).despawn();
    }
}

/// Система: подтянуть proxies к последнему snapshot
///
/// Нет snapshot'а (peer ещё не публиковал) → proxy стоит на месте.
pub fn interpolate_remote_proxies(
    config: Res<GameConfig>,
    session: Option<Res<PeerSession>>,
    mut proxies: Query<(&RemoteCharacterProxy, &mut Transform, &mut CharacterMotion)>,
) {
    let Some(session) = session else {
        return;
    };

    for (proxy, mut transform, mut motion) in proxies.iter_mut() {
        let Some(snapshot) = PlayerStateChannel::get(&session, proxy.peer) else {
            continue;
        };
        transform.translation = interpolate_position(
            transform.translation,
            snapshot.position,
            config.remote.position_lerp,
        );
        motion.velocity = snapshot.velocity;
        motion.moving = snapshot.moving;
    }
}

pub struct RemotePlugin;

impl Plugin for RemotePlugin {
    fn build(&self, app: &mut App) {
        app.add_event::<MembershipChanged>().add_systems(
            Update,
            (
                sync_remote_roster,
                despawn_orphan_proxies,
                interpolate_remote_proxies,
            )
                .chain(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{LoopbackHub, PlayerSnapshot, TransportConfig};

    fn proxies(app: &mut App) -> Vec<(PeerId, Vec3)> {
        let world = app.world_mut();
        let mut query = world.query::<(&RemoteCharacterProxy, &Transform)>();
        let mut found: Vec<_> = query.iter(world).map(|(p, t)| (p.peer, t.translation)).collect();
        found.sort_by_key(|(peer, _)| *peer);
        found
    }

    fn proxy_motion(app: &mut App) -> CharacterMotion {
        let world = app.world_mut();
        let mut query = world.query_filtered::<&CharacterMotion, With<RemoteCharacterProxy>>();
        *query.single(world).unwrap()
    }

    fn test_app() -> App {
        let mut app = crate::create_headless_app(9);
        app.init_resource::<GameConfig>().add_plugins(RemotePlugin);
        app
    }

    #[test]
    fn test_interpolation_step_is_fifth_of_gap() {
        let next = interpolate_position(Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0), 0.2);
        assert_eq!(next, Vec3::new(2.0, 0.0, 0.0));
    }

    #[test]
    fn test_gap_decays_geometrically() {
        let target = Vec3::new(10.0, 0.0, 0.0);
        let mut position = Vec3::ZERO;
        for _ in 0..3 {
            position = interpolate_position(position, target, 0.2);
        }
        // 10 * 0.8^3
        assert!(((target - position).x - 5.12).abs() < 1e-4);
    }

    #[test]
    fn test_duplicate_added_spawns_single_proxy() {
        let mut app = test_app();
        app.insert_resource(PeerSession::join("room", TransportConfig::Solo));

        for _ in 0..2 {
            app.world_mut().send_event(MembershipChanged {
                added: vec![PeerId(7)],
                removed: vec![],
            });
            app.update();
        }

        assert_eq!(proxies(&mut app).len(), 1);

        app.world_mut().send_event(MembershipChanged {
            added: vec![],
            removed: vec![PeerId(7)],
        });
        app.update();
        assert!(proxies(&mut app).is_empty());
    }

    #[test]
    fn test_proxy_moves_toward_published_snapshot() {
        let hub = LoopbackHub::new();
        let mut remote = PeerSession::join("room", TransportConfig::Hub(hub.clone()));
        let mut app = test_app();
        app.insert_resource(PeerSession::join("room", TransportConfig::Hub(hub)));

        let remote_id = remote.local_id();
        app.world_mut().send_event(MembershipChanged {
            added: vec![remote_id],
            removed: vec![],
        });
        app.update();

        // Proxy в origin, snapshot ещё нет: стоит на месте
        assert_eq!(proxies(&mut app), vec![(remote_id, Vec3::ZERO)]);

        PlayerStateChannel::publish(
            &mut remote,
            &PlayerSnapshot {
                position: Vec3::new(10.0, 0.0, 0.0),
                velocity: Vec3::X,
                moving: true,
            },
        )
        .unwrap();
        app.update();

        assert_eq!(proxies(&mut app), vec![(remote_id, Vec3::new(2.0, 0.0, 0.0))]);
        assert_eq!(
            proxy_motion(&mut app),
            CharacterMotion {
                velocity: Vec3::X,
                moving: true,
            }
        );
    }

    #[test]
    fn test_snapshot_closes_fifth_of_distance_and_copies_motion() {
        let hub = LoopbackHub::new();
        let mut remote = PeerSession::join("room", TransportConfig::Hub(hub.clone()));
        let mut app = test_app();
        app.insert_resource(PeerSession::join("room", TransportConfig::Hub(hub)));

        let remote_id = remote.local_id();
        app.world_mut().send_event(MembershipChanged {
            added: vec![remote_id],
            removed: vec![],
        });
        app.update();

        // Proxy в 10 единицах от цели
        let target = Vec3::new(1.0, 2.0, 3.0);
        let start = target + Vec3::new(0.0, 0.0, 10.0);
        {
            let world = app.world_mut();
            let mut query = world.query::<&mut Transform>();
            for mut transform in query.iter_mut(world) {
                transform.translation = start;
            }
        }

        PlayerStateChannel::publish(
            &mut remote,
            &PlayerSnapshot {
                position: target,
                velocity: Vec3::new(0.0, 0.0, 1.0),
                moving: true,
            },
        )
        .unwrap();
        app.update();

        let (_, position) = proxies(&mut app)[0];
        assert!((position.distance(target) - 8.0).abs() < 1e-5, "{position:?}");
        assert_eq!(
            proxy_motion(&mut app),
            CharacterMotion {
                velocity: Vec3::new(0.0, 0.0, 1.0),
                moving: true,
            }
        );
    }

    #[test]
    fn test_leaving_session_removes_proxies() {
        let mut app = test_app();
        app.insert_resource(PeerSession::join("room", TransportConfig::Solo));
        app.world_mut().send_event(MembershipChanged {
            added: vec![PeerId(1), PeerId(2)],
            removed: vec![],
        });
        app.update();
        assert_eq!(proxies(&mut app).len(), 2);

        app.world_mut().remove_resource::<PeerSession>();
        app.update();
        assert!(proxies(&mut app).is_empty());
    }
}
