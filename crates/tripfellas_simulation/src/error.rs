//! Таксономия ошибок ядра
//!
//! Ни один вариант не фатален: каждый имеет degraded поведение,
//! scheduled tick никогда не прерывается.

use crate::net::PeerId;

#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    /// Объект/тело ещё не смонтировано в этом tick: retry в следующем
    #[error("referenced object is not mounted yet")]
    TransientNotReady,

    /// Peer в membership, но ещё ничего не опубликовал
    #[error("peer {0} has not published state yet")]
    PeerUnavailable(PeerId),

    /// Соединение не установлено → solo play
    #[error("transport failure: {0}")]
    TransportFailure(String),

    #[error("transport io: {0}")]
    Io(#[from] std::io::Error),

    #[error("state codec: {0}")]
    Codec(#[from] serde_json::Error),
}
