//! In-process loopback hub
//!
//! Несколько сессий в одном процессе делят один `LoopbackHub`:
//! headless прогоны, integration тесты, split-screen.
//! Семантика та же что у сетевого транспорта: состояние пишется только
//! своим peer, membership изменения копятся в inbox и забираются в poll.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::transport::{MembershipChange, PeerId, PeerState, PeerTransport};
use crate::error::SimulationError;

#[derive(Default)]
struct Room {
    states: BTreeMap<PeerId, PeerState>,
    inboxes: HashMap<PeerId, MembershipChange>,
}

struct HubInner {
    rooms: HashMap<String, Room>,
    next_id: u64,
    online: bool,
}

/// Shared "сеть" для HubTransport'ов
#[derive(Clone)]
pub struct LoopbackHub {
    inner: Arc<Mutex<HubInner>>,
}

impl Default for LoopbackHub {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HubInner {
                rooms: HashMap::new(),
                next_id: 1,
                online: true,
            })),
        }
    }

    /// Offline hub отказывает в connect (эмуляция недоступной сети)
    pub fn set_online(&self, online: bool) {
        self.inner.lock().online = online;
    }

    pub fn connect(&self, room: &str) -> Result<HubTransport, SimulationError> {
        let mut inner = self.inner.lock();
        if !inner.online {
            return Err(SimulationError::TransportFailure(format!(
                "loopback hub offline, room '{}'",
                room
            )));
        }

        let local_id = PeerId(inner.next_id);
        inner.next_id += 1;

        let room_state = inner.rooms.entry(room.to_string()).or_default();

        // Новичок узнаёт обо всех, все узнают о новичке
        let existing: Vec<PeerId> = room_state.states.keys().copied().collect();
        for peer in &existing {
            room_state.inboxes.entry(*peer).or_default().added.push(local_id);
        }
        room_state.inboxes.insert(
            local_id,
            MembershipChange {
                added: existing,
                removed: Vec::new(),
            },
        );
        room_state.states.insert(local_id, PeerState::default());

        Ok(HubTransport {
            hub: self.clone(),
            room: room.to_string(),
            local_id,
            closed: false,
        })
    }

    /// Кол-во live peers в комнате
    pub fn room_size(&self, room: &str) -> usize {
        self.inner
            .lock()
            .rooms
            .get(room)
            .map_or(0, |room| room.states.len())
    }
}

pub struct HubTransport {
    hub: LoopbackHub,
    room: String,
    local_id: PeerId,
    closed: bool,
}

impl PeerTransport for HubTransport {
    fn local_id(&self) -> PeerId {
        self.local_id
    }

    fn publish(&mut self, key: &str, value: serde_json::Value) -> Result<(), SimulationError> {
        if self.closed {
            return Err(SimulationError::TransportFailure("transport closed".into()));
        }
        let mut inner = self.hub.inner.lock();
        let state = inner
            .rooms
            .get_mut(&self.room)
            .and_then(|room| room.states.get_mut(&self.local_id))
            .ok_or_else(|| SimulationError::TransportFailure("peer left the room".into()))?;
        state.set(key, value);
        Ok(())
    }

    fn peer_state(&self, peer: PeerId) -> Option<PeerState> {
        let inner = self.hub.inner.lock();
        inner.rooms.get(&self.room)?.states.get(&peer).cloned()
    }

    fn poll(&mut self, _now: Duration) -> Result<MembershipChange, SimulationError> {
        if self.closed {
            return Ok(MembershipChange::default());
        }
        let mut inner = self.hub.inner.lock();
        let change = inner
            .rooms
            .get_mut(&self.room)
            .and_then(|room| room.inboxes.get_mut(&self.local_id))
            .map(std::mem::take)
            .unwrap_or_default();
        Ok(change)
    }

    fn members(&self) -> Vec<PeerId> {
        let inner = self.hub.inner.lock();
        inner
            .rooms
            .get(&self.room)
            .map(|room| room.states.keys().copied().collect())
            .unwrap_or_default()
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let mut inner = self.hub.inner.lock();
        if let Some(room) = inner.rooms.get_mut(&self.room) {
            room.states.remove(&self.local_id);
            room.inboxes.remove(&self.local_id);
            for inbox in room.inboxes.values_mut() {
                inbox.removed.push(self.local_id);
            }
        }
    }
}

impl Drop for HubTransport {
    fn drop(&mut self) {
        self.close();
    }
}
