use bevy::prelude::*;
use tripfellas_simulation::map::spawn_current_map;
use tripfellas_simulation::{FollowCamera, GameConfig, ShadowLight, SpawnPoint};

/// Камера и свет: сами Camera3d/DirectionalLight живут здесь,
/// позиции каждый frame пишет simulation (FollowCamera / ShadowLight).
pub struct CameraPlugin;

impl Plugin for CameraPlugin {
    fn build(&self, app: &mut App) {
        app.insert_resource(ClearColor(Color::srgb(0.62, 0.8, 0.95)))
            .add_systems(Startup, spawn_camera_and_light.after(spawn_current_map));
    }
}

/// Точка старта камеры: spawn карты, без карты: fallback из конфига
fn camera_start(spawn: Option<&SpawnPoint>, config: &GameConfig) -> Vec3 {
    spawn.map_or_else(|| Vec3::from_array(config.character.fallback_spawn), |point| point.0)
}

fn spawn_camera_and_light(mut commands: Commands, config: Res<GameConfig>, spawn: Option<Res<SpawnPoint>>) {
    let start = camera_start(spawn.as_deref(), &config);

    // Стартуем сразу на offset, чтобы первые кадры не "прилетали" из origin
    commands.spawn((
        Camera3d::default(),
        Transform::from_translation(start + config.camera.offset()).looking_at(start, Vec3::Y),
        FollowCamera { look_target: start },
    ));

    // Тени считаются в ограниченном объёме вокруг источника: свет едет за игроком
    commands.spawn((
        DirectionalLight {
            illuminance: 10000.0,
            shadows_enabled: true,
            ..default()
        },
        Transform::from_translation(start + config.light.offset()).looking_at(start, Vec3::Y),
        ShadowLight,
    ));

    commands.insert_resource(AmbientLight {
        color: Color::WHITE,
        brightness: 300.0,
        affects_lightmapped_meshes: false,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_starts_at_map_spawn() {
        let config = GameConfig::default();
        let spawn = SpawnPoint(Vec3::new(40.0, 6.0, -12.0));

        assert_eq!(camera_start(Some(&spawn), &config), spawn.0);
        assert_eq!(
            camera_start(None, &config),
            Vec3::from_array(config.character.fallback_spawn)
        );
    }
}
