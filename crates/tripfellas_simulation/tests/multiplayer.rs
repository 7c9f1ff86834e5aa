//! Интеграционные тесты: два клиента в одной комнате
//!
//! Без rapier: тела не двигаются сами, позиции задаём руками: проверяем
//! replication, roster и reset-цепочку.

use std::time::Duration;

use bevy::prelude::*;
use bevy::time::TimeUpdateStrategy;
use bevy_rapier3d::prelude::{CollisionEvent, Velocity};
use bevy_rapier3d::rapier::geometry::CollisionEventFlags;
use tripfellas_simulation::{
    create_headless_app, leave_session, CharacterMotion, CharacterReset, CurrentMap, GoalSensor, LocalCharacter, LoopbackHub,
    MapDescription, MovementInput, ObstacleBody, ObstacleDescriptor, ObstacleKind, PeerSession, RemoteCharacterProxy,
    ResetReason, SimulationPlugin, TransportConfig,
};

const MAP: &str = include_str!("../../../assets/maps/trip_fellas.ron");

#[derive(Resource, Default)]
struct Resets(Vec<CharacterReset>);

fn record_resets(mut events: EventReader<CharacterReset>, mut seen: ResMut<Resets>) {
    seen.0.extend(events.read().copied());
}

fn client(hub: &LoopbackHub, seed: u64) -> App {
    let map = MapDescription::from_ron_str(MAP).expect("demo map parses");
    let mut app = create_headless_app(seed);
    app.insert_resource(TimeUpdateStrategy::ManualDuration(Duration::from_millis(50)))
        .insert_resource(CurrentMap(map))
        .insert_resource(PeerSession::join("trip-fellas-1", TransportConfig::Hub(hub.clone())))
        .init_resource::<Resets>()
        .add_plugins(SimulationPlugin)
        .add_systems(Last, record_resets);
    app
}

fn local_character(app: &mut App) -> Entity {
    let world = app.world_mut();
    let mut query = world.query_filtered::<Entity, With<LocalCharacter>>();
    query.single(world).expect("one local character")
}

fn proxy_positions(app: &mut App) -> Vec<Vec3> {
    let world = app.world_mut();
    let mut query = world.query::<(&RemoteCharacterProxy, &Transform)>();
    query.iter(world).map(|(_, transform)| transform.translation).collect()
}

fn proxy_motion(app: &mut App) -> CharacterMotion {
    let world = app.world_mut();
    let mut query = world.query_filtered::<&CharacterMotion, With<RemoteCharacterProxy>>();
    *query.single(world).expect("one proxy")
}

fn goal_body(app: &mut App) -> Entity {
    let world = app.world_mut();
    let mut query = world.query::<(&ObstacleDescriptor, &ObstacleBody)>();
    query
        .iter(world)
        .find(|(descriptor, _)| descriptor.kind == ObstacleKind::Sensor)
        .map(|(_, body)| body.0)
        .expect("goal sensor mounted")
}

#[test]
fn test_peers_see_each_other_and_interpolate() {
    let hub = LoopbackHub::new();
    let mut a = client(&hub, 1);
    let mut b = client(&hub, 2);

    // Startup + первый poll на обеих сторонах
    a.update();
    b.update();
    a.update();

    assert_eq!(proxy_positions(&mut a).len(), 1);
    assert_eq!(proxy_positions(&mut b).len(), 1);

    // A стоит в (1,2,3) и жмёт вперёд; ждём публикацию (100ms timer, 3 frame по 50ms)
    let character = local_character(&mut a);
    a.world_mut().get_mut::<Transform>(character).unwrap().translation = Vec3::new(1.0, 2.0, 3.0);
    a.world_mut().get_mut::<MovementInput>(character).unwrap().direction = Vec3::NEG_Z;
    a.update();
    a.update();
    a.update();

    let sent = *a.world().get::<CharacterMotion>(character).unwrap();
    assert!(sent.moving);
    assert!(sent.velocity.z < 0.0);

    let before = proxy_positions(&mut b)[0];
    b.update();
    let after = proxy_positions(&mut b)[0];

    let target = Vec3::new(1.0, 2.0, 3.0);
    let expected = before + (target - before) * 0.2;
    assert!(after.abs_diff_eq(expected, 1e-4), "{after:?} != {expected:?}");
    assert_eq!(proxy_motion(&mut b), sent);

    for _ in 0..100 {
        b.update();
    }
    assert!(proxy_positions(&mut b)[0].abs_diff_eq(target, 1e-3));
}

#[test]
fn test_leaving_peer_disappears_for_others() {
    let hub = LoopbackHub::new();
    let mut a = client(&hub, 1);
    let mut b = client(&hub, 2);
    a.update();
    b.update();
    a.update();
    assert_eq!(proxy_positions(&mut a).len(), 1);

    {
        let world = b.world_mut();
        leave_session(&mut world.commands());
        world.flush();
    }
    b.update();
    a.update();

    assert!(proxy_positions(&mut a).is_empty());
    assert!(proxy_positions(&mut b).is_empty());
    assert_eq!(hub.room_size("trip-fellas-1"), 1);
}

#[test]
fn test_goal_contact_resets_exactly_once() {
    let hub = LoopbackHub::new();
    let mut app = client(&hub, 3);
    app.update();

    let character = local_character(&mut app);
    let sensor = goal_body(&mut app);
    assert!(app.world().get::<GoalSensor>(sensor).is_some());

    {
        let mut entity = app.world_mut().entity_mut(character);
        entity.get_mut::<Transform>().unwrap().translation = Vec3::new(0.0, 1.0, -60.0);
        entity.get_mut::<Velocity>().unwrap().linvel = Vec3::new(0.0, 0.0, -6.0);
    }
    app.world_mut().send_event(CollisionEvent::Started(
        character,
        sensor,
        CollisionEventFlags::SENSOR,
    ));
    app.update();
    app.update();

    let resets = &app.world().resource::<Resets>().0;
    assert_eq!(resets.len(), 1);
    assert_eq!(resets[0].reason, ResetReason::Goal);
    assert_eq!(
        app.world().get::<Transform>(character).unwrap().translation,
        Vec3::new(0.0, 3.0, 0.0)
    );
    assert_eq!(app.world().get::<Velocity>(character).unwrap().linvel, Vec3::ZERO);
}

#[test]
fn test_falling_off_course_returns_to_spawn() {
    let hub = LoopbackHub::new();
    let mut app = client(&hub, 4);
    app.update();

    let character = local_character(&mut app);
    app.world_mut().get_mut::<Transform>(character).unwrap().translation = Vec3::new(12.0, -8.0, -30.0);
    app.update();

    let resets = &app.world().resource::<Resets>().0;
    assert_eq!(resets.len(), 1);
    assert_eq!(resets[0].reason, ResetReason::Fell);
    assert_eq!(
        app.world().get::<Transform>(character).unwrap().translation,
        Vec3::new(0.0, 3.0, 0.0)
    );
}

#[test]
fn test_unreachable_transport_plays_solo() {
    let hub = LoopbackHub::new();
    hub.set_online(false);
    let mut app = client(&hub, 5);

    for _ in 0..5 {
        app.update();
    }

    let session = app.world().resource::<PeerSession>();
    assert!(session.is_degraded());
    assert!(proxy_positions(&mut app).is_empty());
    // Персонаж всё равно есть и управляется
    local_character(&mut app);
}
