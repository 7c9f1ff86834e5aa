//! PlayerStateChannel: ephemeral snapshot локального игрока
//!
//! - публикуется под ключом `"player"` раз в 100ms (real time, не physics/render clock)
//! - last-write-wins, история не хранится
//! - `get(peer)` для peer который ещё не публиковал → None (не ошибка)

use std::time::Duration;

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use super::session::PeerSession;
use super::transport::PeerId;
use crate::components::{CharacterMotion, LocalCharacter};
use crate::error::SimulationError;
use crate::logger;

pub const PLAYER_STATE_KEY: &str = "player";

/// Текущее состояние персонажа (present-state, не лог)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlayerSnapshot {
    pub position: Vec3,
    pub velocity: Vec3,
    pub moving: bool,
}

/// JSON форма: `{ position: {x,y,z}, velocity: {x,y,z}, moving }`
#[derive(Serialize, Deserialize)]
struct WireVec {
    x: f32,
    y: f32,
    z: f32,
}

impl From<Vec3> for WireVec {
    fn from(v: Vec3) -> Self {
        Self { x: v.x, y: v.y, z: v.z }
    }
}

impl From<WireVec> for Vec3 {
    fn from(v: WireVec) -> Self {
        Vec3::new(v.x, v.y, v.z)
    }
}

#[derive(Serialize, Deserialize)]
struct WireSnapshot {
    position: WireVec,
    velocity: WireVec,
    moving: bool,
}

impl PlayerSnapshot {
    pub fn to_value(&self) -> Result<serde_json::Value, SimulationError> {
        let wire = WireSnapshot {
            position: self.position.into(),
            velocity: self.velocity.into(),
            moving: self.moving,
        };
        Ok(serde_json::to_value(wire)?)
    }

    pub fn from_value(value: &serde_json::Value) -> Result<Self, SimulationError> {
        let wire: WireSnapshot = serde_json::from_value(value.clone())?;
        Ok(Self {
            position: wire.position.into(),
            velocity: wire.velocity.into(),
            moving: wire.moving,
        })
    }
}

pub struct PlayerStateChannel;

impl PlayerStateChannel {
    pub fn publish(session: &mut PeerSession, snapshot: &PlayerSnapshot) -> Result<(), SimulationError> {
        session.publish(PLAYER_STATE_KEY, snapshot.to_value()?)
    }

    /// `PeerUnavailable` если peer ничего не публиковал (или прислал мусор)
    pub fn try_get(session: &PeerSession, peer: PeerId) -> Result<PlayerSnapshot, SimulationError> {
        let state = session
            .read_peer_state(peer)
            .ok_or(SimulationError::PeerUnavailable(peer))?;
        let value = state
            .get(PLAYER_STATE_KEY)
            .ok_or(SimulationError::PeerUnavailable(peer))?;
        PlayerSnapshot::from_value(value).map_err(|_| SimulationError::PeerUnavailable(peer))
    }

    pub fn get(session: &PeerSession, peer: PeerId) -> Option<PlayerSnapshot> {
        Self::try_get(session, peer).ok()
    }
}

/// Таймер публикации (bandwidth throttle)
#[derive(Resource, Debug, Clone)]
pub struct SnapshotPublisher {
    timer: Timer,
}

impl SnapshotPublisher {
    pub fn new(interval: Duration) -> Self {
        Self {
            timer: Timer::new(interval, TimerMode::Repeating),
        }
    }

    /// true если пора публиковать
    ///
    /// Даже если за tick прошло несколько периодов: одна публикация.
    pub fn tick(&mut self, delta: Duration) -> bool {
        self.timer.tick(delta).just_finished()
    }
}

impl Default for SnapshotPublisher {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

/// Система: опубликовать snapshot локального персонажа
///
/// Schedule: Update, после CharacterRig (читает результат прошлого physics step).
pub fn publish_local_snapshot(
    time: Res<Time<Real>>,
    mut publisher: ResMut<SnapshotPublisher>,
    session: Option<ResMut<PeerSession>>,
    character: Query<(&Transform, &CharacterMotion), With<LocalCharacter>>,
) {
    if !publisher.tick(time.delta()) {
        return;
    }
    let Some(mut session) = session else {
        return;
    };
    // Персонаж ещё не заспавнен: пропускаем tick
    let Ok((transform, motion)) = character.single() else {
        return;
    };

    let snapshot = PlayerSnapshot {
        position: transform.translation,
        velocity: motion.velocity,
        moving: motion.moving,
    };
    if let Err(err) = PlayerStateChannel::publish(&mut session, &snapshot) {
        logger::log(&format!("snapshot publish skipped: {}", err));
    }
}
