//! Error taxonomy for the secure session subsystem (spec §7).

use thiserror::Error;

/// Fatal or retryable conditions surfaced by the core to the Supervisor.
#[derive(Debug, Error)]
pub enum NettalkError {
    #[error("failed to decrypt config")]
    ConfigInvalid,

    #[error("failed to resolve relay hostname: {0}")]
    ResolveFailed(#[source] std::io::Error),

    #[error("failed to connect: {0}")]
    ConnectFailed(#[source] std::io::Error),

    #[error("socks5 proxy rejected the connection (rep={0:#x})")]
    ProxyRejected(u8),

    #[error("relay paired us with a peer on a different channel")]
    WrongChannel,

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("remote peer unauthorized")]
    PeerUnauthorized,

    #[error("cipher transform fault")]
    CipherFault,

    #[error("watchdog timeout")]
    Timeout,

    #[error("peer connection closed")]
    PeerClosed,

    #[error("random source used before init")]
    UnseededSource,

    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, NettalkError>;
