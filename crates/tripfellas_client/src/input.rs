use bevy::prelude::*;
use tripfellas_simulation::{LocalCharacter, MovementInput};

/// WASD / стрелки + Space → MovementInput локального персонажа
pub struct KeyboardInputPlugin;

impl Plugin for KeyboardInputPlugin {
    fn build(&self, app: &mut App) {
        // До apply_movement_input (Update): input этого же кадра
        app.add_systems(PreUpdate, read_keyboard.after(bevy::input::InputSystem));
    }
}

/// Направление в плоскости XZ (камера смотрит в -Z, поэтому "вперёд" = -Z)
fn keyboard_direction(keys: &ButtonInput<KeyCode>) -> Vec3 {
    let mut direction = Vec3::ZERO;
    if keys.any_pressed([KeyCode::KeyW, KeyCode::ArrowUp]) {
        direction.z -= 1.0;
    }
    if keys.any_pressed([KeyCode::KeyS, KeyCode::ArrowDown]) {
        direction.z += 1.0;
    }
    if keys.any_pressed([KeyCode::KeyA, KeyCode::ArrowLeft]) {
        direction.x -= 1.0;
    }
    if keys.any_pressed([KeyCode::KeyD, KeyCode::ArrowRight]) {
        direction.x += 1.0;
    }
    direction
}

fn read_keyboard(keys: Res<ButtonInput<KeyCode>>, mut query: Query<&mut MovementInput, With<LocalCharacter>>) {
    for mut input in query.iter_mut() {
        input.direction = keyboard_direction(&keys);
        input.jump = keys.pressed(KeyCode::Space);
    }
}
