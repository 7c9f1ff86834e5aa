//! PeerSession: владелец membership и broadcast канала
//!
//! Контракт:
//! - `join(room, config)` НИКОГДА не падает: нет сети → solo play
//!   (membership = только local peer)
//! - membership изменения отдаются пачкой (`MembershipChanged`), без дублей
//! - `dispose()` освобождает транспорт синхронно (и вызывается из Drop)
//!
//! Создаётся на старте сессии, уничтожается удалением resource
//! (`leave_session`) или на `AppExit`.

use std::collections::BTreeSet;
use std::time::Duration;

use bevy::prelude::*;

use super::hub::LoopbackHub;
use super::transport::{MembershipChange, PeerId, PeerState, PeerTransport, SoloTransport};
use super::udp::{UdpConfig, UdpTransport};
use crate::error::SimulationError;
use crate::logger;

/// Какой транспорт поднимать при join
#[derive(Clone)]
pub enum TransportConfig {
    Solo,
    Hub(LoopbackHub),
    Udp(UdpConfig),
}

/// Событие: пачка изменений membership (только remote peers)
#[derive(Event, Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipChanged {
    pub added: Vec<PeerId>,
    pub removed: Vec<PeerId>,
}

#[derive(Resource)]
pub struct PeerSession {
    room: String,
    transport: Box<dyn PeerTransport>,
    /// Remote peers (local peer сюда не попадает)
    members: BTreeSet<PeerId>,
    /// Peers которые транспорт уже знал на join: уйдут в первый poll
    pending: MembershipChange,
    degraded: bool,
    disposed: bool,
}

impl PeerSession {
    pub fn join(room: &str, config: TransportConfig) -> Self {
        let connected: Result<Box<dyn PeerTransport>, SimulationError> = match config {
            TransportConfig::Solo => Ok(Box::new(SoloTransport::new(random_peer_id()))),
            TransportConfig::Hub(hub) => hub
                .connect(room)
                .map(|transport| Box::new(transport) as Box<dyn PeerTransport>),
            TransportConfig::Udp(udp) => UdpTransport::bind(udp, room, random_peer_id())
                .map(|transport| Box::new(transport) as Box<dyn PeerTransport>),
        };

        match connected {
            Ok(transport) => {
                logger::log_info(&format!(
                    "🌐 Joined room '{}' as {}",
                    room,
                    transport.local_id()
                ));
                Self::with_transport(room, transport)
            }
            Err(err) => {
                logger::log_warning(&format!(
                    "⚠️ Transport unavailable for room '{}' ({}), continuing solo",
                    room, err
                ));
                let mut session =
                    Self::with_transport(room, Box::new(SoloTransport::new(random_peer_id())));
                session.degraded = true;
                session
            }
        }
    }

    /// Сессия поверх готового транспорта (тесты, кастомные транспорты)
    pub fn with_transport(room: &str, transport: Box<dyn PeerTransport>) -> Self {
        let pending = MembershipChange {
            added: transport.members(),
            removed: Vec::new(),
        };

        Self {
            room: room.to_string(),
            transport,
            members: BTreeSet::new(),
            pending,
            degraded: false,
            disposed: false,
        }
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn local_id(&self) -> PeerId {
        self.transport.local_id()
    }

    /// true если join не смог поднять транспорт и мы играем solo
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Remote peers в live membership
    pub fn remote_peers(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.members.iter().copied()
    }

    pub fn is_present(&self, peer: PeerId) -> bool {
        peer == self.local_id() || self.members.contains(&peer)
    }

    /// Записать свой ключ (single-writer: чужие ключи не трогаем никогда)
    pub fn publish(&mut self, key: &str, value: serde_json::Value) -> Result<(), SimulationError> {
        if self.disposed {
            return Err(SimulationError::TransportFailure("session disposed".into()));
        }
        self.transport.publish(key, value)
    }

    pub fn read_peer_state(&self, peer: PeerId) -> Option<PeerState> {
        if self.disposed {
            return None;
        }
        self.transport.peer_state(peer)
    }

    /// Применить пачку к membership set, вернуть фактические изменения
    ///
    /// Повторный added/removed одного peer: no-op, local peer игнорируется.
    pub fn apply_membership_change(&mut self, change: MembershipChange) -> MembershipChanged {
        let local_id = self.local_id();
        let mut effective = MembershipChanged::default();

        for peer in change.added {
            if peer != local_id && self.members.insert(peer) {
                effective.added.push(peer);
            }
        }
        for peer in change.removed {
            if self.members.remove(&peer) {
                effective.removed.push(peer);
            }
        }

        effective
    }

    /// Забрать изменения у транспорта. Ошибки транспорта не выходят наружу.
    pub fn poll(&mut self, now: Duration) -> MembershipChanged {
        if self.disposed {
            return MembershipChanged::default();
        }
        let mut change = std::mem::take(&mut self.pending);
        match self.transport.poll(now) {
            Ok(polled) => {
                change.added.extend(polled.added);
                change.removed.extend(polled.removed);
            }
            Err(err) => logger::log(&format!("session poll failed: {}", err)),
        }
        self.apply_membership_change(change)
    }

    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.transport.close();
        self.members.clear();
        self.disposed = true;
        logger::log_info(&format!("🔌 Left room '{}'", self.room));
    }
}

impl Drop for PeerSession {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn random_peer_id() -> PeerId {
    // Как awareness client id: случайный u32, не из DeterministicRng
    // (одинаковый seed на разных машинах дал бы одинаковые id)
    PeerId(u64::from(rand::random::<u32>()))
}

/// Система: poll транспорта → MembershipChanged
///
/// Schedule: PreUpdate (до roster/interpolation систем)
pub fn poll_session(
    session: Option<ResMut<PeerSession>>,
    time: Res<Time<Real>>,
    mut events: EventWriter<MembershipChanged>,
) {
    let Some(mut session) = session else {
        return;
    };

    let change = session.poll(time.elapsed());
    if !change.added.is_empty() || !change.removed.is_empty() {
        logger::log(&format!(
            "membership: +{:?} -{:?}",
            change.added, change.removed
        ));
        events.write(change);
    }
}

/// Закрыть сессию: resource удаляется → Drop → transport.close()
pub fn leave_session(commands: &mut Commands) {
    commands.remove_resource::<PeerSession>();
}

/// Система: синхронный dispose на AppExit
pub fn dispose_session_on_exit(
    mut exit: EventReader<AppExit>,
    session: Option<ResMut<PeerSession>>,
) {
    if exit.read().next().is_none() {
        return;
    }
    if let Some(mut session) = session {
        session.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_added_twice_is_present_once() {
        let mut session = PeerSession::join("room", TransportConfig::Solo);

        let first = session.apply_membership_change(MembershipChange {
            added: vec![PeerId(5)],
            removed: vec![],
        });
        let second = session.apply_membership_change(MembershipChange {
            added: vec![PeerId(5)],
            removed: vec![],
        });

        assert_eq!(first.added, vec![PeerId(5)]);
        assert!(second.added.is_empty());
        assert_eq!(session.remote_peers().collect::<Vec<_>>(), vec![PeerId(5)]);
    }

    #[test]
    fn test_local_peer_never_listed_as_remote() {
        let mut session = PeerSession::join("room", TransportConfig::Solo);
        let local = session.local_id();

        let change = session.apply_membership_change(MembershipChange {
            added: vec![local, PeerId(9)],
            removed: vec![],
        });

        assert_eq!(change.added, vec![PeerId(9)]);
        assert!(session.is_present(local));
    }

    #[test]
    fn test_removing_unknown_peer_is_noop() {
        let mut session = PeerSession::join("room", TransportConfig::Solo);
        let change = session.apply_membership_change(MembershipChange {
            added: vec![],
            removed: vec![PeerId(42)],
        });
        assert!(change.removed.is_empty());
    }

    #[test]
    fn test_transport_failure_degrades_to_solo() {
        let hub = LoopbackHub::new();
        hub.set_online(false);

        let mut session = PeerSession::join("room", TransportConfig::Hub(hub));

        assert!(session.is_degraded());
        assert_eq!(session.remote_peers().count(), 0);
        assert!(session.is_present(session.local_id()));
        assert!(session.publish("player", serde_json::json!(1)).is_ok());
        assert!(session.poll(Duration::ZERO).added.is_empty());
    }

    #[test]
    fn test_dispose_releases_transport() {
        let hub = LoopbackHub::new();
        let mut a = PeerSession::join("room", TransportConfig::Hub(hub.clone()));
        let b = PeerSession::join("room", TransportConfig::Hub(hub.clone()));
        assert_eq!(hub.room_size("room"), 2);

        a.dispose();
        assert_eq!(hub.room_size("room"), 1);
        assert!(a.publish("player", serde_json::json!(1)).is_err());
        assert!(a.read_peer_state(b.local_id()).is_none());

        // Повторный dispose: no-op
        a.dispose();
        drop(b);
        assert_eq!(hub.room_size("room"), 0);
    }
}
