//! ECS Components общие для нескольких доменов
//!
//! - character: LocalCharacter marker, BodyMetadata (метаданные тела для sensor событий)
//! - movement: MovementInput (intent), CharacterMotion (результат для snapshot/анимации)

pub mod character;
pub mod movement;

pub use character::*;
pub use movement::*;
