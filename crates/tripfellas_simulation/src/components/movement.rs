//! Movement компоненты: input intent + фактическое движение персонажа

use bevy::prelude::*;

/// Входные данные для движения (WASD + Space)
///
/// Для headless тестов: mock input через этот компонент.
/// Для игры: заполняется клиентом из `ButtonInput<KeyCode>`.
#[derive(Component, Debug, Clone, Copy, Default, Reflect)]
#[reflect(Component)]
pub struct MovementInput {
    /// Направление движения в плоскости XZ (не обязательно normalized)
    pub direction: Vec3,
    pub jump: bool,
}

/// Фактическое движение персонажа после physics step
///
/// Local: пишется CharacterRig, уходит в PlayerSnapshot.
/// Remote: копируется из snapshot, используется ТОЛЬКО для выбора анимации
/// (позицию никогда не экстраполируем по velocity).
#[derive(Component, Debug, Clone, Copy, Default, PartialEq, Reflect)]
#[reflect(Component)]
pub struct CharacterMotion {
    pub velocity: Vec3,
    pub moving: bool,
}
