//! Peer replication module
//!
//! - transport: PeerTransport trait + SoloTransport (degraded)
//! - hub: in-process LoopbackHub
//! - udp: LAN awareness транспорт
//! - session: PeerSession (membership + broadcast канал)
//! - channel: PlayerStateChannel (snapshot'ы локального игрока)

use std::time::Duration;

use bevy::prelude::*;

pub mod channel;
pub mod hub;
pub mod session;
pub mod transport;
pub mod udp;


pub use channel::{PlayerSnapshot, PlayerStateChannel, SnapshotPublisher, PLAYER_STATE_KEY};
pub use hub::{HubTransport, LoopbackHub};
pub use session::{leave_session, MembershipChanged, PeerSession, TransportConfig};
pub use transport::{MembershipChange, PeerId, PeerState, PeerTransport, SoloTransport};
pub use udp::{AwarenessMessage, UdpConfig, UdpTransport};

use crate::config::GameConfig;

/// Session Plugin
///
/// Сам `PeerSession` сюда не вставляется: его создаёт клиент/тест через
/// `PeerSession::join`. Без сессии все системы: no-op.
///
/// Порядок:
/// 1. PreUpdate: poll_session → MembershipChanged
/// 2. Update: publish_local_snapshot (100ms real time)
/// 3. Last: dispose на AppExit
pub struct SessionPlugin;

impl Plugin for SessionPlugin {
    fn build(&self, app: &mut App) {
        let interval = app
            .world()
            .get_resource::<GameConfig>()
            .map_or(100, |config| config.network.publish_interval_ms);

        app.add_event::<MembershipChanged>()
            .insert_resource(SnapshotPublisher::new(Duration::from_millis(interval)))
            .add_systems(PreUpdate, session::poll_session)
            .add_systems(Update, channel::publish_local_snapshot)
            .add_systems(Last, session::dispose_session_on_exit);
    }
}
