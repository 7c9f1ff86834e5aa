//! GameConfig: все тюнингованные константы в одном месте
//!
//! Грузится из RON (`assets/config/game.ron`), любое поле можно опустить:
//! `#[serde(default)]` подставит значения ниже.
//!
//! Коэффициенты интерполяции (0.03 / 0.1 / 0.2): gameplay feel, не менять
//! без плейтеста.

use std::path::Path;

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::logger;

/// Ошибки загрузки конфигов и карт
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse RON: {0}")]
    Parse(#[from] ron::error::SpannedError),
}

#[derive(Resource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub camera: CameraConfig,
    pub light: LightConfig,
    pub character: CharacterConfig,
    pub remote: RemoteConfig,
    pub network: NetworkConfig,
    pub obstacles: ObstacleConfig,
}

impl GameConfig {
    pub fn from_ron_str(source: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(source)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_ron_str(&data)
    }

    /// Битый/отсутствующий конфиг → defaults + warning (игра должна стартовать)
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path.as_ref()) {
            Ok(config) => config,
            Err(err) => {
                logger::log_warning(&format!(
                    "⚠️ GameConfig {} not loaded ({}), using defaults",
                    path.as_ref().display(),
                    err
                ));
                Self::default()
            }
        }
    }
}

/// Follow-камера: offset от персонажа + exponential smoothing per tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub offset: [f32; 3],
    pub position_lerp: f32,
    pub look_lerp: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            offset: [0.0, 4.0, 6.0],
            position_lerp: 0.03,
            look_lerp: 0.1,
        }
    }
}

impl CameraConfig {
    pub fn offset(&self) -> Vec3 {
        Vec3::from_array(self.offset)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightConfig {
    pub offset: [f32; 3],
}

impl Default for LightConfig {
    fn default() -> Self {
        Self {
            offset: [-20.0, 20.0, -20.0],
        }
    }
}

impl LightConfig {
    pub fn offset(&self) -> Vec3 {
        Vec3::from_array(self.offset)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CharacterConfig {
    /// Ниже этой высоты персонаж считается упавшим с карты
    pub fall_threshold: f32,
    /// Spawn если в карте нет `x_player_spawn`
    pub fallback_spawn: [f32; 3],
    /// m/s
    pub move_speed: f32,
    /// m/s (вертикальная скорость на старте прыжка)
    pub jump_speed: f32,
    pub capsule_half_height: f32,
    pub capsule_radius: f32,
}

impl Default for CharacterConfig {
    fn default() -> Self {
        Self {
            fall_threshold: -5.0,
            fallback_spawn: [0.0, 3.0, 0.0],
            move_speed: 6.0,
            jump_speed: 6.5,
            capsule_half_height: 0.5,
            capsule_radius: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub position_lerp: f32,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self { position_lerp: 0.2 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub room: String,
    /// Bandwidth throttle для snapshot'ов (не связан с physics)
    pub publish_interval_ms: u64,
    /// UDP awareness: как часто переотправлять своё состояние без изменений
    pub heartbeat_interval_ms: u64,
    /// UDP awareness: peer без сообщений дольше этого: удаляется из membership
    pub peer_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            room: "trip-fellas-1".to_string(),
            publish_interval_ms: 100,
            heartbeat_interval_ms: 15_000,
            peer_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObstacleConfig {
    pub swing_period_ms: f64,
    pub slider_period_ms: f64,
    pub slider_amplitude: f32,
    /// Диапазон случайного phase seed (ms)
    pub swing_phase_range_ms: f64,
    pub slider_phase_range_ms: f64,
}

impl Default for ObstacleConfig {
    fn default() -> Self {
        Self {
            swing_period_ms: 1000.0,
            slider_period_ms: 700.0,
            slider_amplitude: 6.0,
            swing_phase_range_ms: 2000.0,
            slider_phase_range_ms: 800.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_tuned_constants() {
        let config = GameConfig::default();

        assert_eq!(config.camera.offset(), Vec3::new(0.0, 4.0, 6.0));
        assert_eq!(config.camera.position_lerp, 0.03);
        assert_eq!(config.camera.look_lerp, 0.1);
        assert_eq!(config.light.offset(), Vec3::new(-20.0, 20.0, -20.0));
        assert_eq!(config.remote.position_lerp, 0.2);
        assert_eq!(config.character.fall_threshold, -5.0);
        assert_eq!(config.network.publish_interval_ms, 100);
    }

    #[test]
    fn test_partial_ron_override() {
        let config = GameConfig::from_ron_str(
            r#"(
                network: (room: "lan-party"),
                character: (move_speed: 8.0),
            )"#,
        )
        .expect("valid RON");

        assert_eq!(config.network.room, "lan-party");
        assert_eq!(config.network.publish_interval_ms, 100);
        assert_eq!(config.character.move_speed, 8.0);
        assert_eq!(config.character.fall_threshold, -5.0);
        assert_eq!(config.camera, CameraConfig::default());
    }

    #[test]
    fn test_invalid_ron_is_error() {
        assert!(matches!(
            GameConfig::from_ron_str("(camera: [oops"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = GameConfig::load_or_default("/definitely/not/here/game.ron");
        assert_eq!(config, GameConfig::default());
    }
}
