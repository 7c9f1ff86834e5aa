//! LAN UDP awareness транспорт
//!
//! Протокол (JSON datagram на сообщение):
//! - `AwarenessMessage { room, peer, clock, state }`
//! - `state: None` = peer уходит (отправляется в close)
//! - clock монотонный на peer: старые/переупорядоченные сообщения игнорируем
//!
//! Membership:
//! - peer добавляется при первом сообщении из нашей комнаты
//! - heartbeat: своё состояние переотправляется раз в `heartbeat` даже без изменений
//! - peer без сообщений дольше `peer_timeout` удаляется (stale cleanup: забота транспорта)
//! - ушедший peer оставляет tombstone с clock leave: опоздавший heartbeat его не воскрешает
//!
//! Сокет живёт в tokio tasks (свой runtime на транспорт): recv task отдаёт
//! decoded сообщения в игру через mpsc, send task забирает исходящие datagram'ы
//! из второго канала. poll только дренирует канал и никогда не ждёт.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use super::transport::{MembershipChange, PeerId, PeerState, PeerTransport};
use crate::error::SimulationError;
use crate::logger;

/// Максимальный размер datagram который читаем
const MAX_DATAGRAM: usize = 64 * 1024;
/// Пауза после ошибки recv (ICMP unreachable и т.п.)
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(200);
/// Сколько ждём отправки leave и завершения tasks в close
const SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct UdpConfig {
    pub bind: SocketAddr,
    /// Явный список адресов peers (может включать broadcast адрес)
    pub peers: Vec<SocketAddr>,
    pub broadcast: bool,
    pub heartbeat: Duration,
    pub peer_timeout: Duration,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 47_800)),
            peers: Vec::new(),
            broadcast: false,
            heartbeat: Duration::from_secs(15),
            peer_timeout: Duration::from_secs(30),
        }
    }
}

/// Wire формат одного awareness update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwarenessMessage {
    pub room: String,
    pub peer: PeerId,
    pub clock: u64,
    pub state: Option<PeerState>,
}

impl AwarenessMessage {
    pub fn encode(&self) -> Result<Vec<u8>, SimulationError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, SimulationError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

struct RemotePeer {
    state: PeerState,
    clock: u64,
    last_seen: Duration,
}

/// Clock leave-сообщения ушедшего peer
struct Departed {
    clock: u64,
    at: Duration,
}

/// Один исходящий datagram на список адресов
struct Outbound {
    bytes: Vec<u8>,
    targets: Vec<SocketAddr>,
}

/// Сеть транспорта: runtime + socket + recv/send tasks
struct AwarenessLink {
    runtime: Runtime,
    socket: Arc<UdpSocket>,
    receiver: JoinHandle<()>,
    sender: JoinHandle<()>,
    inbound: UnboundedReceiver<AwarenessMessage>,
    outbound: UnboundedSender<Outbound>,
}

impl AwarenessLink {
    fn open(config: &UdpConfig) -> Result<Self, SimulationError> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("awareness-net")
            .enable_all()
            .build()
            .map_err(|err| SimulationError::TransportFailure(format!("tokio runtime: {}", err)))?;

        let std_socket = std::net::UdpSocket::bind(config.bind).map_err(|err| {
            SimulationError::TransportFailure(format!("bind {}: {}", config.bind, err))
        })?;
        std_socket.set_nonblocking(true)?;
        if config.broadcast {
            std_socket.set_broadcast(true)?;
        }

        // from_std регистрирует сокет в reactor: нужен контекст runtime
        let socket = {
            let _guard = runtime.enter();
            Arc::new(UdpSocket::from_std(std_socket)?)
        };

        let (events, inbound) = mpsc::unbounded_channel();
        let (outbound, queued) = mpsc::unbounded_channel();
        let receiver = runtime.spawn(receive_loop(socket.clone(), events));
        let sender = runtime.spawn(send_loop(socket.clone(), queued));

        Ok(Self {
            runtime,
            socket,
            receiver,
            sender,
            inbound,
            outbound,
        })
    }

    fn send(&self, datagram: Outbound) {
        if self.outbound.send(datagram).is_err() {
            logger::log_warning("⚠️ awareness sender stopped, datagram dropped");
        }
    }

    fn shutdown(self) {
        let Self {
            runtime,
            socket,
            receiver,
            sender,
            outbound,
            ..
        } = self;

        // Закрытый канал завершает send task после очереди (включая leave)
        drop(outbound);
        if runtime
            .block_on(tokio::time::timeout(SHUTDOWN_TIMEOUT, sender))
            .is_err()
        {
            logger::log_warning("⚠️ awareness send queue not flushed before close");
        }

        receiver.abort();
        drop(socket);
        // Tasks держат свои Arc на сокет: ждём их drop, чтобы порт освободился сейчас
        runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);
    }
}

/// Recv task: datagram → AwarenessMessage → канал игры
async fn receive_loop(socket: Arc<UdpSocket>, events: UnboundedSender<AwarenessMessage>) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, from)) => match AwarenessMessage::decode(&buf[..len]) {
                Ok(message) => {
                    if events.send(message).is_err() {
                        // Транспорт закрыт
                        return;
                    }
                }
                Err(err) => logger::log(&format!("malformed datagram from {}: {}", from, err)),
            },
            // ICMP port unreachable на некоторых ОС приходит как ошибка recv: не фатально
            Err(err) => {
                logger::log(&format!("awareness recv error: {}", err));
                tokio::time::sleep(RECV_ERROR_BACKOFF).await;
            }
        }
    }
}

/// Send task: очередь → send_to каждому адресу
async fn send_loop(socket: Arc<UdpSocket>, mut queued: UnboundedReceiver<Outbound>) {
    while let Some(datagram) = queued.recv().await {
        // Best effort: недоступный peer не мешает остальным
        for addr in &datagram.targets {
            if let Err(err) = socket.send_to(&datagram.bytes, *addr).await {
                logger::log(&format!("awareness send to {} failed: {}", addr, err));
            }
        }
    }
}

pub struct UdpTransport {
    link: Option<AwarenessLink>,
    config: UdpConfig,
    room: String,
    local_id: PeerId,
    clock: u64,
    local_state: PeerState,
    remote: HashMap<PeerId, RemotePeer>,
    departed: HashMap<PeerId, Departed>,
    last_broadcast: Option<Duration>,
    /// Увидели нового peer → переотправить своё состояние сразу, не ждать heartbeat
    announce_pending: bool,
}

impl UdpTransport {
    pub fn bind(config: UdpConfig, room: &str, local_id: PeerId) -> Result<Self, SimulationError> {
        let link = AwarenessLink::open(&config)?;

        logger::log_info(&format!(
            "📡 UDP transport bound on {:?} (room '{}', {} peers, local {})",
            link.socket.local_addr().ok(),
            room,
            config.peers.len(),
            local_id
        ));

        Ok(Self {
            link: Some(link),
            config,
            room: room.to_string(),
            local_id,
            clock: 0,
            local_state: PeerState::default(),
            remote: HashMap::new(),
            departed: HashMap::new(),
            last_broadcast: None,
            announce_pending: true,
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.link.as_ref()?.socket.local_addr().ok()
    }

    pub fn add_peer(&mut self, addr: SocketAddr) {
        if !self.config.peers.contains(&addr) {
            self.config.peers.push(addr);
            self.announce_pending = true;
        }
    }

    fn broadcast(&self, state: Option<PeerState>) {
        let Some(link) = self.link.as_ref() else {
            return;
        };

        let message = AwarenessMessage {
            room: self.room.clone(),
            peer: self.local_id,
            clock: self.clock,
            state,
        };
        let bytes = match message.encode() {
            Ok(bytes) => bytes,
            Err(err) => {
                logger::log_error(&format!("❌ awareness encode failed: {}", err));
                return;
            }
        };

        link.send(Outbound {
            bytes,
            targets: self.config.peers.clone(),
        });
    }

    fn receive(&mut self, now: Duration, change: &mut MembershipChange) {
        let mut messages = Vec::new();
        if let Some(link) = self.link.as_mut() {
            loop {
                match link.inbound.try_recv() {
                    Ok(message) => messages.push(message),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        logger::log_warning("⚠️ awareness receiver stopped");
                        break;
                    }
                }
            }
        }

        for message in messages {
            self.apply_message(message, now, change);
        }
    }

    fn apply_message(&mut self, message: AwarenessMessage, now: Duration, change: &mut MembershipChange) {
        if message.room != self.room || message.peer == self.local_id {
            return;
        }

        // Всё что отправлено до leave (или сам повтор leave) опоздало
        if let Some(departed) = self.departed.get(&message.peer) {
            if message.clock <= departed.clock {
                return;
            }
            self.departed.remove(&message.peer);
        }

        match message.state {
            None => {
                let stale = self
                    .remote
                    .get(&message.peer)
                    .is_some_and(|known| message.clock < known.clock);
                if stale {
                    return;
                }
                self.departed.insert(
                    message.peer,
                    Departed {
                        clock: message.clock,
                        at: now,
                    },
                );
                if self.remote.remove(&message.peer).is_some() {
                    record_removed(change, message.peer);
                }
            }
            Some(state) => match self.remote.get_mut(&message.peer) {
                Some(known) => {
                    known.last_seen = now;
                    if message.clock >= known.clock {
                        known.clock = message.clock;
                        known.state = state;
                    }
                }
                None => {
                    self.remote.insert(
                        message.peer,
                        RemotePeer {
                            state,
                            clock: message.clock,
                            last_seen: now,
                        },
                    );
                    change.added.push(message.peer);
                    self.announce_pending = true;
                }
            },
        }
    }

    fn expire_stale(&mut self, now: Duration, change: &mut MembershipChange) {
        let timeout = self.config.peer_timeout;
        let stale: Vec<PeerId> = self
            .remote
            .iter()
            .filter(|(_, peer)| now.saturating_sub(peer.last_seen) > timeout)
            .map(|(id, _)| *id)
            .collect();

        for peer in stale {
            self.remote.remove(&peer);
            record_removed(change, peer);
            logger::log_info(&format!("👋 {} timed out", peer));
        }

        // Переупорядочивание дольше timeout уже не ждём
        self.departed
            .retain(|_, departed| now.saturating_sub(departed.at) <= timeout);
    }
}

/// Peer который появился и исчез в одном poll не попадает ни в added, ни в removed
fn record_removed(change: &mut MembershipChange, peer: PeerId) {
    if let Some(index) = change.added.iter().position(|id| *id == peer) {
        change.added.remove(index);
    } else {
        change.removed.push(peer);
    }
}

impl PeerTransport for UdpTransport {
    fn local_id(&self) -> PeerId {
        self.local_id
    }

    fn publish(&mut self, key: &str, value: serde_json::Value) -> Result<(), SimulationError> {
        if self.link.is_none() {
            return Err(SimulationError::TransportFailure("transport closed".into()));
        }
        self.local_state.set(key, value);
        self.clock += 1;
        self.broadcast(Some(self.local_state.clone()));
        Ok(())
    }

    fn peer_state(&self, peer: PeerId) -> Option<PeerState> {
        if peer == self.local_id {
            return Some(self.local_state.clone());
        }
        self.remote.get(&peer).map(|remote| remote.state.clone())
    }

    fn poll(&mut self, now: Duration) -> Result<MembershipChange, SimulationError> {
        let mut change = MembershipChange::default();
        if self.link.is_none() {
            return Ok(change);
        }

        self.receive(now, &mut change);
        self.expire_stale(now, &mut change);

        let heartbeat_due = self
            .last_broadcast
            .map_or(true, |last| now.saturating_sub(last) >= self.config.heartbeat);
        if heartbeat_due || self.announce_pending {
            self.broadcast(Some(self.local_state.clone()));
            self.last_broadcast = Some(now);
            self.announce_pending = false;
        }

        Ok(change)
    }

    fn members(&self) -> Vec<PeerId> {
        let mut members: Vec<PeerId> = self.remote.keys().copied().collect();
        members.push(self.local_id);
        members.sort();
        members
    }

    fn close(&mut self) {
        if self.link.is_none() {
            return;
        }
        self.clock += 1;
        self.broadcast(None);
        if let Some(link) = self.link.take() {
            link.shutdown();
        }
        self.remote.clear();
        self.departed.clear();
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback_config() -> UdpConfig {
        UdpConfig {
            bind: SocketAddr::from(([127, 0, 0, 1], 0)),
            ..Default::default()
        }
    }

    /// Localhost UDP почти мгновенный, но не синхронный: даём несколько попыток
    fn poll_until<F>(transport: &mut UdpTransport, mut done: F) -> MembershipChange
    where
        F: FnMut(&MembershipChange) -> bool,
    {
        let mut merged = MembershipChange::default();
        for _ in 0..100 {
            let change = transport.poll(Duration::from_millis(1)).unwrap();
            merged.added.extend(change.added);
            merged.removed.extend(change.removed);
            if done(&merged) {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        merged
    }

    #[test]
    fn test_message_codec_keeps_state() {
        let mut state = PeerState::default();
        state.set("player", serde_json::json!({"moving": false}));
        let message = AwarenessMessage {
            room: "trip-fellas-1".into(),
            peer: PeerId(3),
            clock: 9,
            state: Some(state),
        };

        let decoded = AwarenessMessage::decode(&message.encode().unwrap()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_foreign_room_and_own_echo_ignored() {
        let mut transport = UdpTransport::bind(loopback_config(), "room", PeerId(1)).unwrap();
        let mut change = MembershipChange::default();

        for (room, peer) in [("other", PeerId(2)), ("room", PeerId(1))] {
            transport.apply_message(
                AwarenessMessage {
                    room: room.into(),
                    peer,
                    clock: 1,
                    state: Some(PeerState::default()),
                },
                Duration::ZERO,
                &mut change,
            );
        }

        assert!(change.is_empty());
        assert_eq!(transport.members(), vec![PeerId(1)]);
    }

    #[test]
    fn test_stale_clock_does_not_overwrite_state() {
        let mut transport = UdpTransport::bind(loopback_config(), "room", PeerId(1)).unwrap();
        let mut change = MembershipChange::default();

        let mut fresh = PeerState::default();
        fresh.set("player", serde_json::json!("fresh"));
        let mut stale = PeerState::default();
        stale.set("player", serde_json::json!("stale"));

        for (clock, state) in [(5, fresh), (4, stale)] {
            transport.apply_message(
                AwarenessMessage {
                    room: "room".into(),
                    peer: PeerId(2),
                    clock,
                    state: Some(state),
                },
                Duration::ZERO,
                &mut change,
            );
        }

        assert_eq!(change.added, vec![PeerId(2)]);
        let state = transport.peer_state(PeerId(2)).unwrap();
        assert_eq!(state.get("player"), Some(&serde_json::json!("fresh")));
    }

    fn awareness(peer: u64, clock: u64, state: Option<PeerState>) -> AwarenessMessage {
        AwarenessMessage {
            room: "room".into(),
            peer: PeerId(peer),
            clock,
            state,
        }
    }

    #[test]
    fn test_late_heartbeat_after_leave_does_not_resurrect_peer() {
        let mut transport = UdpTransport::bind(loopback_config(), "room", PeerId(1)).unwrap();
        let mut change = MembershipChange::default();

        transport.apply_message(awareness(2, 5, Some(PeerState::default())), Duration::ZERO, &mut change);
        transport.apply_message(awareness(2, 7, None), Duration::ZERO, &mut change);
        // Heartbeat отправлен до leave, доставлен после
        transport.apply_message(
            awareness(2, 6, Some(PeerState::default())),
            Duration::from_millis(10),
            &mut change,
        );

        assert!(change.is_empty(), "{change:?}");
        assert_eq!(transport.members(), vec![PeerId(1)]);
        assert!(transport.peer_state(PeerId(2)).is_none());

        // Повтор leave тоже ничего не меняет
        let mut change = MembershipChange::default();
        transport.apply_message(awareness(2, 7, None), Duration::from_millis(20), &mut change);
        assert!(change.is_empty());
    }

    #[test]
    fn test_newer_clock_after_leave_rejoins() {
        let mut transport = UdpTransport::bind(loopback_config(), "room", PeerId(1)).unwrap();
        let mut change = MembershipChange::default();
        transport.apply_message(awareness(2, 3, Some(PeerState::default())), Duration::ZERO, &mut change);
        transport.apply_message(awareness(2, 4, None), Duration::ZERO, &mut change);
        assert!(change.is_empty());

        let mut change = MembershipChange::default();
        transport.apply_message(awareness(2, 9, Some(PeerState::default())), Duration::ZERO, &mut change);
        assert_eq!(change.added, vec![PeerId(2)]);
        assert_eq!(transport.members(), vec![PeerId(1), PeerId(2)]);
    }

    #[test]
    fn test_departed_marks_expire_with_peer_timeout() {
        let mut transport = UdpTransport::bind(loopback_config(), "room", PeerId(1)).unwrap();
        let mut change = MembershipChange::default();
        transport.apply_message(awareness(2, 1, Some(PeerState::default())), Duration::ZERO, &mut change);
        transport.apply_message(awareness(2, 2, None), Duration::ZERO, &mut change);
        assert_eq!(transport.departed.len(), 1);

        transport.poll(Duration::from_secs(40)).unwrap();
        assert!(transport.departed.is_empty());
    }

    #[test]
    fn test_silent_peer_expires() {
        let mut transport = UdpTransport::bind(loopback_config(), "room", PeerId(1)).unwrap();
        let mut change = MembershipChange::default();
        transport.apply_message(
            AwarenessMessage {
                room: "room".into(),
                peer: PeerId(2),
                clock: 1,
                state: Some(PeerState::default()),
            },
            Duration::from_secs(1),
            &mut change,
        );

        let change = transport.poll(Duration::from_secs(40)).unwrap();
        assert_eq!(change.removed, vec![PeerId(2)]);
        assert_eq!(transport.members(), vec![PeerId(1)]);
    }

    #[test]
    fn test_two_transports_discover_and_share_state() {
        let mut a = UdpTransport::bind(loopback_config(), "room", PeerId(1)).unwrap();
        let mut b = UdpTransport::bind(loopback_config(), "room", PeerId(2)).unwrap();
        a.add_peer(b.local_addr().unwrap());
        b.add_peer(a.local_addr().unwrap());

        a.publish("player", serde_json::json!({"x": 1})).unwrap();
        let change = poll_until(&mut b, |change| change.added.contains(&PeerId(1)));
        assert_eq!(change.added, vec![PeerId(1)]);
        assert_eq!(
            b.peer_state(PeerId(1)).unwrap().get("player"),
            Some(&serde_json::json!({"x": 1}))
        );

        a.close();
        let change = poll_until(&mut b, |change| change.removed.contains(&PeerId(1)));
        assert_eq!(change.removed, vec![PeerId(1)]);
    }
}
