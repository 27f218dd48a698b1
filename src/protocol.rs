//! The `Command`/`Event` tagged unions that cross every boundary in the kernel: the
//! gRPC adapter, the legacy metadata shim, and `ConnectionCtrl`'s internal dispatch all
//! speak these types rather than anything wire-specific.

use crate::error::RelayErrorKind;

pub type ExchangeId = u32;
pub type RelayPeerNumber = u32;

/// A remote peer-id, as assigned by the signaling server. Opaque to the kernel.
pub type PeerId = String;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    pub track_name: String,
    pub kind: TrackKind,
    pub mime_type: String,
}

/// Options needed to stand up one `RelayPeer`'s signaling session.
#[derive(Debug, Clone)]
pub struct RelayPeerOpts {
    pub relay_peer_number: RelayPeerNumber,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub secure: bool,
    pub api_key: Option<String>,
    pub ice_servers: Vec<String>,
    pub debug: bool,
    pub ping_interval_secs: u64,
    pub base_peer_id: String,
    pub memorable_peer_id: bool,
    pub peer_id_offset: u64,
    /// When set, a local signaling server subprocess is spawned for this relay.
    pub local_server_command: Option<Vec<String>>,
}

/// Inbound commands, pushed by the RPC adapter or the legacy metadata shim onto the
/// kernel's command bus and drained by `RelayKernel`'s pump task.
#[derive(Debug, Clone)]
pub enum Command {
    Connect {
        peer_id: PeerId,
        relay_peer_number: RelayPeerNumber,
        exchange_id: ExchangeId,
    },
    Disconnect {
        peer_id: PeerId,
        relay_peer_number: RelayPeerNumber,
        exchange_id: ExchangeId,
    },
    Call {
        peer_ids: Vec<PeerId>,
        relay_peer_number: RelayPeerNumber,
        track_names: Vec<String>,
        exchange_id: ExchangeId,
    },
    Hangup {
        peer_id: PeerId,
        relay_peer_number: RelayPeerNumber,
        exchange_id: ExchangeId,
    },
    SendMsg {
        peer_ids: Vec<PeerId>,
        relay_peer_number: RelayPeerNumber,
        payload: Vec<u8>,
        exchange_id: ExchangeId,
    },
    AddRelay {
        opts: Box<RelayPeerOpts>,
        exchange_id: ExchangeId,
    },
    CloseRelay {
        relay_peer_number: RelayPeerNumber,
        exchange_id: ExchangeId,
    },
}

/// Outbound events, fanned out on `EventSub<Event>` to the RPC adapter, the legacy
/// metadata shim, and internal subscribers (auto-call-on-connect, the debug observer).
#[derive(Debug, Clone)]
pub enum Event {
    MsgReceived {
        relay_peer_number: RelayPeerNumber,
        src_peer_id: PeerId,
        payload: Vec<u8>,
        exchange_id: ExchangeId,
    },
    PeerConnected {
        relay_peer_number: RelayPeerNumber,
        peer_id: PeerId,
        exchange_id: ExchangeId,
    },
    PeerDisconnected {
        relay_peer_number: RelayPeerNumber,
        peer_id: PeerId,
        exchange_id: ExchangeId,
    },
    PeerCalled {
        relay_peer_number: RelayPeerNumber,
        peer_id: PeerId,
        tracks: Vec<TrackInfo>,
        exchange_id: ExchangeId,
    },
    PeerHungup {
        relay_peer_number: RelayPeerNumber,
        peer_id: PeerId,
        exchange_id: ExchangeId,
    },
    PeerDataConnError {
        relay_peer_number: RelayPeerNumber,
        peer_id: PeerId,
        kind: RelayErrorKind,
        message: String,
        exchange_id: ExchangeId,
    },
    PeerMediaConnError {
        relay_peer_number: RelayPeerNumber,
        peer_id: PeerId,
        kind: RelayErrorKind,
        message: String,
        exchange_id: ExchangeId,
    },
    RelayConnected {
        relay_peer_number: RelayPeerNumber,
        peer_id: PeerId,
        exchange_id: ExchangeId,
    },
    RelayDisconnected {
        relay_peer_number: RelayPeerNumber,
        exchange_id: ExchangeId,
    },
    RelayError {
        relay_peer_number: RelayPeerNumber,
        kind: RelayErrorKind,
        message: String,
        exchange_id: ExchangeId,
    },
}

impl Event {
    pub fn relay_peer_number(&self) -> RelayPeerNumber {
        match self {
            Event::MsgReceived { relay_peer_number, .. }
            | Event::PeerConnected { relay_peer_number, .. }
            | Event::PeerDisconnected { relay_peer_number, .. }
            | Event::PeerCalled { relay_peer_number, .. }
            | Event::PeerHungup { relay_peer_number, .. }
            | Event::PeerDataConnError { relay_peer_number, .. }
            | Event::PeerMediaConnError { relay_peer_number, .. }
            | Event::RelayConnected { relay_peer_number, .. }
            | Event::RelayDisconnected { relay_peer_number, .. }
            | Event::RelayError { relay_peer_number, .. } => *relay_peer_number,
        }
    }

    pub fn exchange_id(&self) -> ExchangeId {
        match self {
            Event::MsgReceived { exchange_id, .. }
            | Event::PeerConnected { exchange_id, .. }
            | Event::PeerDisconnected { exchange_id, .. }
            | Event::PeerCalled { exchange_id, .. }
            | Event::PeerHungup { exchange_id, .. }
            | Event::PeerDataConnError { exchange_id, .. }
            | Event::PeerMediaConnError { exchange_id, .. }
            | Event::RelayConnected { exchange_id, .. }
            | Event::RelayDisconnected { exchange_id, .. }
            | Event::RelayError { exchange_id, .. } => *exchange_id,
        }
    }
}
