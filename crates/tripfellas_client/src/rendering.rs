use bevy::prelude::*;
use tripfellas_simulation::{
    CharacterMotion, GameConfig, LocalCharacter, MapShape, ObstacleDescriptor, RemoteCharacterProxy, ShapeHint,
};

pub struct RenderingSyncPlugin;

impl Plugin for RenderingSyncPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(Startup, init_character_materials)
            .add_systems(
                Update,
                (
                    attach_map_meshes,
                    spawn_character_visuals,
                    despawn_orphan_visuals,
                )
                    .chain(),
            )
            // После PostStep: reset/interpolation этого кадра уже применены
            .add_systems(
                PostUpdate,
                (sync_transforms, tint_by_motion)
                    .after(tripfellas_simulation::SimulationSet::PostStep)
                    .before(bevy::transform::TransformSystem::TransformPropagate),
            );
    }
}

/// Link: visual entity → simulation entity
#[derive(Component)]
pub struct VisualOf(pub Entity);

/// Link: simulation entity → visual entity
#[derive(Component)]
pub struct HasVisual(pub Entity);

#[derive(Resource)]
struct CharacterMaterials {
    local_idle: Handle<StandardMaterial>,
    local_running: Handle<StandardMaterial>,
    remote_idle: Handle<StandardMaterial>,
    remote_running: Handle<StandardMaterial>,
}

fn init_character_materials(mut commands: Commands, mut materials: ResMut<Assets<StandardMaterial>>) {
    commands.insert_resource(CharacterMaterials {
        local_idle: materials.add(Color::srgb(0.95, 0.75, 0.2)),
        local_running: materials.add(Color::srgb(1.0, 0.55, 0.1)),
        remote_idle: materials.add(Color::srgb(0.4, 0.6, 0.95)),
        remote_running: materials.add(Color::srgb(0.2, 0.35, 1.0)),
    });
}

fn shape_mesh(shape: &ShapeHint) -> Mesh {
    match *shape {
        ShapeHint::Cuboid { half_extents: [x, y, z] } => Cuboid::new(x * 2.0, y * 2.0, z * 2.0).into(),
        ShapeHint::Ball { radius } => Sphere::new(radius).into(),
        ShapeHint::Cylinder { half_height, radius } => Cylinder::new(radius, half_height * 2.0).into(),
        ShapeHint::Capsule { half_height, radius } => Capsule3d::new(radius, half_height * 2.0).into(),
    }
}

/// Меши прямо на entities карты (тела препятствий и декорации).
/// Descriptor'ы пропускаем: у них нет Transform, рисуется их body.
fn attach_map_meshes(
    mut commands: Commands,
    query: Query<(Entity, &MapShape), (Added<MapShape>, Without<ObstacleDescriptor>)>,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
) {
    for (entity, shape) in query.iter() {
        if !shape.visible {
            continue;
        }
        let [r, g, b] = shape.color.unwrap_or([0.8, 0.8, 0.8]);
        commands.entity(entity).insert((
            Mesh3d(meshes.add(shape_mesh(&shape.shape))),
            MeshMaterial3d(materials.add(StandardMaterial {
                base_color: Color::srgb(r, g, b),
                perceptual_roughness: 0.8,
                ..default()
            })),
        ));
    }
}

/// Capsule для local персонажа и remote proxies
fn spawn_character_visuals(
    mut commands: Commands,
    config: Res<GameConfig>,
    characters: Query<
        (Entity, &Transform, Has<LocalCharacter>),
        (
            Without<HasVisual>,
            Or<(With<LocalCharacter>, With<RemoteCharacterProxy>)>,
        ),
    >,
    materials: Res<CharacterMaterials>,
    mut meshes: ResMut<Assets<Mesh>>,
) {
    let capsule = &config.character;
    for (sim_entity, sim_transform, is_local) in characters.iter() {
        let material = if is_local {
            materials.local_idle.clone()
        } else {
            materials.remote_idle.clone()
        };

        let visual_entity = commands
            .spawn((
                Mesh3d(meshes.add(Capsule3d::new(
                    capsule.capsule_radius,
                    capsule.capsule_half_height * 2.0,
                ))),
                MeshMaterial3d(material),
                visual_transform(sim_transform, capsule.capsule_half_height + capsule.capsule_radius),
                VisualOf(sim_entity),
            ))
            .id();

        commands.entity(sim_entity).insert(HasVisual(visual_entity));
    }
}

/// Origin персонажа: у ног, меш центрирован
fn visual_transform(sim: &Transform, lift: f32) -> Transform {
    Transform::from_translation(sim.translation + Vec3::Y * lift).with_rotation(sim.rotation)
}

fn sync_transforms(
    config: Res<GameConfig>,
    sim_query: Query<(&Transform, &HasVisual), Changed<Transform>>,
    mut visual_query: Query<&mut Transform, (With<VisualOf>, Without<HasVisual>)>,
) {
    let lift = config.character.capsule_half_height + config.character.capsule_radius;
    for (sim_transform, has_visual) in sim_query.iter() {
        if let Ok(mut transform) = visual_query.get_mut(has_visual.0) {
            *transform = visual_transform(sim_transform, lift);
        }
    }
}

/// "Анимация": idle / running по CharacterMotion.moving
fn tint_by_motion(
    materials: Res<CharacterMaterials>,
    sim_query: Query<(&CharacterMotion, &HasVisual, Has<LocalCharacter>), Changed<CharacterMotion>>,
    mut visual_query: Query<&mut MeshMaterial3d<StandardMaterial>, With<VisualOf>>,
) {
    for (motion, has_visual, is_local) in sim_query.iter() {
        let Ok(mut material) = visual_query.get_mut(has_visual.0) else {
            continue;
        };
        let handle = match (is_local, motion.moving) {
            (true, true) => &materials.local_running,
            (true, false) => &materials.local_idle,
            (false, true) => &materials.remote_running,
            (false, false) => &materials.remote_idle,
        };
        if material.0 != *handle {
            material.0 = handle.clone();
        }
    }
}

/// Peer ушёл → proxy удалён simulation'ом → убираем его меш
fn despawn_orphan_visuals(
    mut commands: Commands,
    visuals: Query<(Entity, &VisualOf)>,
    sims: Query<(), With<HasVisual>>,
) {
    for (visual_entity, visual_of) in visuals.iter() {
        if !sims.contains(visual_of.0) {
            commands.entity(visual_entity).despawn();
        }
    }
}
