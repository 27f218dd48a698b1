//! Conversions between the generated protobuf types and the kernel's own
//! `Command`/`Event`/`RelayErrorKind` types.

use super::pb;
use crate::config::Config;
use crate::error::RelayErrorKind;
use crate::protocol::{Event, RelayPeerOpts, TrackInfo, TrackKind};

pub fn track_info_to_pb(t: TrackInfo) -> pb::TrackInfo {
    pb::TrackInfo {
        track_name: t.track_name,
        kind: match t.kind {
            TrackKind::Video => "video".to_string(),
            TrackKind::Audio => "audio".to_string(),
        },
        mime_type: t.mime_type,
    }
}

fn conn_error(peer_id: String, kind: RelayErrorKind, message: String) -> pb::ConnError {
    pb::ConnError {
        peer_id,
        kind: kind.as_wire_str().to_string(),
        message,
    }
}

pub fn event_to_pb(event: Event) -> pb::RelayEvent {
    let relay_peer_number = event.relay_peer_number();
    let exchange_id = event.exchange_id();
    let payload = match event {
        Event::MsgReceived { src_peer_id, payload, .. } => {
            pb::relay_event::Payload::MsgReceived(pb::MsgReceived {
                src_peer_id,
                payload: payload.into(),
            })
        }
        Event::PeerConnected { peer_id, .. } => {
            pb::relay_event::Payload::PeerConnected(pb::PeerConnected { peer_id })
        }
        Event::PeerDisconnected { peer_id, .. } => {
            pb::relay_event::Payload::PeerDisconnected(pb::PeerDisconnected { peer_id })
        }
        Event::PeerCalled { peer_id, tracks, .. } => {
            pb::relay_event::Payload::PeerCalled(pb::PeerCalled {
                peer_id,
                tracks: tracks.into_iter().map(track_info_to_pb).collect(),
            })
        }
        Event::PeerHungup { peer_id, .. } => {
            pb::relay_event::Payload::PeerHungup(pb::PeerHungup { peer_id })
        }
        Event::PeerDataConnError {
            peer_id, kind, message, ..
        } => pb::relay_event::Payload::PeerDataConnError(conn_error(peer_id, kind, message)),
        Event::PeerMediaConnError {
            peer_id, kind, message, ..
        } => pb::relay_event::Payload::PeerMediaConnError(conn_error(peer_id, kind, message)),
        Event::RelayConnected { peer_id, .. } => {
            pb::relay_event::Payload::RelayConnected(pb::RelayConnected { peer_id })
        }
        Event::RelayDisconnected { .. } => {
            pb::relay_event::Payload::RelayDisconnected(pb::RelayDisconnected {})
        }
        Event::RelayError { kind, message, .. } => {
            pb::relay_event::Payload::RelayError(conn_error(String::new(), kind, message))
        }
    };
    pb::RelayEvent {
        relay_peer_number,
        exchange_id,
        payload: Some(payload),
    }
}

/// Builds `RelayPeerOpts` from an `AddRelayPeer` request, falling back to the running
/// config's peer-identity and retry defaults for fields the wire request doesn't carry.
pub fn opts_from_request(req: pb::AddRelayRequest, defaults: &Config) -> RelayPeerOpts {
    RelayPeerOpts {
        relay_peer_number: req.relay_peer_number,
        host: req.host,
        port: req.port as u16,
        path: req.path,
        secure: req.secure,
        api_key: if req.key.is_empty() { None } else { Some(req.key) },
        ice_servers: req.ice_servers,
        debug: req.debug,
        ping_interval_secs: 5000,
        base_peer_id: defaults.base_peer_id.clone(),
        memorable_peer_id: defaults.memorable_peer_id,
        peer_id_offset: defaults.peer_id_offset,
        local_server_command: None,
    }
}

pub fn opts_to_relay_config(opts: RelayPeerOpts) -> pb::RelayConfig {
    pb::RelayConfig {
        relay_peer_number: opts.relay_peer_number,
        host: opts.host,
        port: opts.port as u32,
        path: opts.path,
        secure: opts.secure,
    }
}
