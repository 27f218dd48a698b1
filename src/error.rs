use thiserror::Error;

/// Fixed, enumerable error taxonomy surfaced to callers on the event bus.
///
/// Internal plumbing uses `anyhow::Result` throughout; this enum exists only at the
/// boundary where a caller needs to `match` on a stable set of kinds (RPC responses,
/// `RelayError`/`PeerDataConnError`/`PeerMediaConnError` payloads).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RelayErrorKind {
    #[error("requested peer id is unavailable")]
    UnavailableId,
    #[error("network error")]
    Network,
    #[error("invalid peer id")]
    InvalidId,
    #[error("invalid api key")]
    InvalidKey,
    #[error("browser incompatible")]
    BrowserIncompatible,
    #[error("webrtc error")]
    Webrtc,
    #[error("signaling server error")]
    ServerError,
    #[error("ssl unavailable")]
    SslUnavailable,
    #[error("socket error")]
    SocketError,
    #[error("socket closed")]
    SocketClosed,
    #[error("connection closed")]
    ConnectionClosed,
    #[error("connection not open")]
    ConnectionNotOpen,
    #[error("relay peer number {0} not found")]
    UnknownRelayPeer(u32),
    #[error("track {0} not found")]
    UnknownTrack(String),
    #[error("relay peer number {0} already in use")]
    DuplicateRelayPeer(u32),
    #[error("track name {0} already in use")]
    NameInUse(String),
    #[error("malformed rtp url: {0}")]
    BadUrl(String),
    #[error("failed to bind udp socket: {0}")]
    BindError(String),
    #[error("unknown error: {0}")]
    Unknown(String),
}

impl RelayErrorKind {
    /// Matches §4.6's enumerated set of fatal signaling error types: these drive a
    /// RelayPeer straight to `Destroyed` rather than attempting a transient reconnect.
    pub fn is_fatal_signaling(&self) -> bool {
        matches!(
            self,
            RelayErrorKind::Network
                | RelayErrorKind::InvalidId
                | RelayErrorKind::InvalidKey
                | RelayErrorKind::BrowserIncompatible
                | RelayErrorKind::Webrtc
                | RelayErrorKind::ServerError
                | RelayErrorKind::SslUnavailable
                | RelayErrorKind::SocketError
                | RelayErrorKind::SocketClosed
        )
    }

    /// The wire-format string used on the legacy metadata channel and in log lines,
    /// mirroring the short lowercase-hyphenated names the signaling library itself uses.
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            RelayErrorKind::UnavailableId => "unavailable-id",
            RelayErrorKind::Network => "network",
            RelayErrorKind::InvalidId => "invalid-id",
            RelayErrorKind::InvalidKey => "invalid-key",
            RelayErrorKind::BrowserIncompatible => "browser-incompatible",
            RelayErrorKind::Webrtc => "webrtc",
            RelayErrorKind::ServerError => "server-error",
            RelayErrorKind::SslUnavailable => "ssl-unavailable",
            RelayErrorKind::SocketError => "socket-error",
            RelayErrorKind::SocketClosed => "socket-closed",
            RelayErrorKind::ConnectionClosed => "CONNECTION_CLOSED",
            RelayErrorKind::ConnectionNotOpen => "CONNECTION_NOT_OPEN",
            RelayErrorKind::UnknownRelayPeer(_) => "UNKNOWN_RELAY_PEER",
            RelayErrorKind::UnknownTrack(_) => "UNKNOWN_TRACK",
            RelayErrorKind::DuplicateRelayPeer(_) => "DUPLICATE_RELAY_PEER",
            RelayErrorKind::NameInUse(_) => "NAME_IN_USE",
            RelayErrorKind::BadUrl(_) => "BAD_URL",
            RelayErrorKind::BindError(_) => "BIND_ERROR",
            RelayErrorKind::Unknown(_) => "UNKNOWN_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_set_matches_section_4_6() {
        assert!(RelayErrorKind::Network.is_fatal_signaling());
        assert!(RelayErrorKind::SocketClosed.is_fatal_signaling());
        assert!(!RelayErrorKind::UnavailableId.is_fatal_signaling());
        assert!(!RelayErrorKind::ConnectionClosed.is_fatal_signaling());
    }
}
