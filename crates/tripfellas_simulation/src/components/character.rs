//! Character компоненты: LocalCharacter, BodyMetadata

use bevy::prelude::*;

/// Marker: персонаж которым управляет ЭТОТ инстанс
///
/// Ровно один на клиент. Remote peers представлены `RemoteCharacterProxy`,
/// у них этого маркера нет.
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct LocalCharacter;

/// Метаданные физического тела
///
/// Передаются в `GoalEntered`: listener фильтрует по `character`
/// прежде чем реагировать.
#[derive(Component, Debug, Clone, Copy, Default, PartialEq, Eq, Reflect)]
#[reflect(Component)]
pub struct BodyMetadata {
    pub character: bool,
}

impl BodyMetadata {
    pub const CHARACTER: Self = Self { character: true };
}
