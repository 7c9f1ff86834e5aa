//! Peer transport abstraction
//!
//! Транспорт = awareness-подобный broadcast:
//! - у каждого peer своё состояние (`PeerState`: key → JSON value)
//! - peer пишет ТОЛЬКО свой ключ (single-writer, без merge/conflicts)
//! - чужое состояние читается как "последнее увиденное" (eventually consistent)
//! - membership изменения приходят пачкой из `poll`
//!
//! Реализации: `SoloTransport` (degraded), `HubTransport` (in-process),
//! `UdpTransport` (LAN).

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SimulationError;

/// Opaque id, выдаётся транспортом при join (уникален на инстанс)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// Состояние одного peer (awareness local state)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeerState {
    pub fields: HashMap<String, serde_json::Value>,
}

impl PeerState {
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.fields.get(key)
    }

    pub fn set(&mut self, key: &str, value: serde_json::Value) {
        self.fields.insert(key.to_string(), value);
    }
}

/// Пачка изменений membership за один poll
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipChange {
    pub added: Vec<PeerId>,
    pub removed: Vec<PeerId>,
}

impl MembershipChange {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Broadcast транспорт
///
/// Все методы non-blocking: вызываются из ECS систем внутри tick.
pub trait PeerTransport: Send + Sync + 'static {
    fn local_id(&self) -> PeerId;

    /// Записать поле своего состояния (last-write-wins)
    fn publish(&mut self, key: &str, value: serde_json::Value) -> Result<(), SimulationError>;

    /// Последнее увиденное состояние peer (включая себя)
    fn peer_state(&self, peer: PeerId) -> Option<PeerState>;

    /// Забрать входящие сообщения, вернуть membership изменения с прошлого poll
    ///
    /// `now`: real time с начала сессии (для heartbeat/timeout).
    fn poll(&mut self, now: Duration) -> Result<MembershipChange, SimulationError>;

    /// Live membership (включая local peer)
    fn members(&self) -> Vec<PeerId>;

    /// Освободить ресурсы синхронно. Повторный вызов: no-op.
    fn close(&mut self);
}

/// Degraded транспорт: только local peer, никакой сети
pub struct SoloTransport {
    local_id: PeerId,
    state: PeerState,
}

impl SoloTransport {
    pub fn new(local_id: PeerId) -> Self {
        Self {
            local_id,
            state: PeerState::default(),
        }
    }
}

impl PeerTransport for SoloTransport {
    fn local_id(&self) -> PeerId {
        self.local_id
    }

    fn publish(&mut self, key: &str, value: serde_json::Value) -> Result<(), SimulationError> {
        self.state.set(key, value);
        Ok(())
    }

    fn peer_state(&self, peer: PeerId) -> Option<PeerState> {
        (peer == self.local_id).then(|| self.state.clone())
    }

    fn poll(&mut self, _now: Duration) -> Result<MembershipChange, SimulationError> {
        Ok(MembershipChange::default())
    }

    fn members(&self) -> Vec<PeerId> {
        vec![self.local_id]
    }

    fn close(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solo_transport_only_knows_itself() {
        let mut solo = SoloTransport::new(PeerId(7));
        solo.publish("player", serde_json::json!({"moving": true})).unwrap();

        assert_eq!(solo.members(), vec![PeerId(7)]);
        assert!(solo.peer_state(PeerId(7)).is_some());
        assert!(solo.peer_state(PeerId(8)).is_none());
        assert!(solo.poll(Duration::ZERO).unwrap().is_empty());
    }
}
