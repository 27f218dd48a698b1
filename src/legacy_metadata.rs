//! The optional named-pipe side-channel: an alternative encoding of the same
//! `Command`/`Event` types the gRPC edge speaks, kept for embedders that still talk the
//! origin program's named-pipe protocol instead of gRPC.
//!
//! Wire format per message: a 4-byte big-endian length prefix, followed by
//! `<json-metadata><SEP><payload>` where `SEP` (default `|"|`) is chosen to be invalid
//! JSON so it can never appear inside the metadata object itself.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::config::LegacyMetadataConfig;
use crate::protocol::{Command, Event};
use crate::util::{EventSub, UnblockSignal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LegacyAction {
    #[serde(rename = "Media_Call_Peer")]
    MediaCallPeer,
    #[serde(rename = "Stop_Media_Call")]
    StopMediaCall,
    Connect,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LegacyMetadata {
    #[serde(default)]
    pub src_peer_id: String,
    #[serde(default)]
    pub peer_event: Option<String>,
    #[serde(default)]
    pub err: Option<String>,
    #[serde(default)]
    pub target_peer_ids: Vec<String>,
    #[serde(default)]
    pub action: Option<LegacyAction>,
    #[serde(default)]
    pub params: Vec<String>,
}

/// Spawns the inbound reader and outbound writer tasks. Both exit cooperatively when
/// `stop` fires or their pipe closes.
pub fn spawn(
    config: LegacyMetadataConfig,
    commands: Arc<EventSub<Command>>,
    events: Arc<EventSub<Event>>,
    stop: UnblockSignal,
) {
    spawn_reader(config.clone(), commands, stop.clone());
    spawn_writer(config, events, stop);
}

fn spawn_reader(config: LegacyMetadataConfig, commands: Arc<EventSub<Command>>, stop: UnblockSignal) {
    tokio::spawn(async move {
        let mut file = match tokio::fs::File::open(&config.inbound_pipe).await {
            Ok(f) => f,
            Err(e) => {
                log::error!("legacy metadata: failed to open inbound pipe {:?}: {e}", config.inbound_pipe);
                return;
            }
        };
        loop {
            tokio::select! {
                _ = stop.wait() => {
                    log::info!("legacy metadata reader exiting on stop signal");
                    return;
                }
                frame = read_frame(&mut file) => {
                    let Some(bytes) = frame else {
                        log::warn!("legacy metadata: inbound pipe closed");
                        return;
                    };
                    match decode_message(&bytes, &config.separator) {
                        Ok((meta, payload)) => match meta_to_command(meta, payload) {
                            Some(cmd) => commands.push(cmd).await,
                            None => log::warn!("legacy metadata: message did not map to a command"),
                        },
                        Err(e) => log::warn!("legacy metadata: malformed message: {e}"),
                    }
                }
            }
        }
    });
}

fn spawn_writer(config: LegacyMetadataConfig, events: Arc<EventSub<Event>>, stop: UnblockSignal) {
    tokio::spawn(async move {
        let mut file = match tokio::fs::OpenOptions::new().write(true).open(&config.outbound_pipe).await {
            Ok(f) => f,
            Err(e) => {
                log::error!("legacy metadata: failed to open outbound pipe {:?}: {e}", config.outbound_pipe);
                return;
            }
        };
        let mut sub = events.subscribe().await;
        loop {
            tokio::select! {
                _ = stop.wait() => {
                    log::info!("legacy metadata writer exiting on stop signal");
                    return;
                }
                maybe_evt = sub.recv() => {
                    let Some(evt) = maybe_evt else { return; };
                    let (meta, payload) = event_to_meta(evt);
                    match encode_message(&meta, &payload, &config.separator) {
                        Ok(frame) => {
                            if let Err(e) = write_frame(&mut file, &frame).await {
                                log::warn!("legacy metadata: write failed: {e}");
                                return;
                            }
                        }
                        Err(e) => log::warn!("legacy metadata: failed to encode event: {e}"),
                    }
                }
            }
        }
    });
}

async fn read_frame(file: &mut tokio::fs::File) -> Option<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    file.read_exact(&mut len_buf).await.ok()?;
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    file.read_exact(&mut buf).await.ok()?;
    Some(buf)
}

async fn write_frame(file: &mut tokio::fs::File, frame: &[u8]) -> std::io::Result<()> {
    file.write_all(&(frame.len() as u32).to_be_bytes()).await?;
    file.write_all(frame).await?;
    file.flush().await
}

fn decode_message(bytes: &[u8], separator: &str) -> anyhow::Result<(LegacyMetadata, Vec<u8>)> {
    let sep = separator.as_bytes();
    let pos = bytes
        .windows(sep.len())
        .position(|w| w == sep)
        .ok_or_else(|| anyhow::anyhow!("separator {separator:?} not found"))?;
    let meta: LegacyMetadata = serde_json::from_slice(&bytes[..pos])?;
    let payload = bytes[pos + sep.len()..].to_vec();
    Ok((meta, payload))
}

fn encode_message(meta: &LegacyMetadata, payload: &[u8], separator: &str) -> anyhow::Result<Vec<u8>> {
    let mut out = serde_json::to_vec(meta)?;
    out.extend_from_slice(separator.as_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

fn meta_to_command(meta: LegacyMetadata, payload: Vec<u8>) -> Option<Command> {
    match meta.action? {
        LegacyAction::Connect => Some(Command::Connect {
            peer_id: meta.target_peer_ids.into_iter().next().unwrap_or_default(),
            relay_peer_number: 0,
            exchange_id: 0,
        }),
        LegacyAction::MediaCallPeer => Some(Command::Call {
            peer_ids: meta.target_peer_ids,
            relay_peer_number: 0,
            track_names: meta.params,
            exchange_id: 0,
        }),
        LegacyAction::StopMediaCall => Some(Command::Hangup {
            peer_id: meta.target_peer_ids.into_iter().next().unwrap_or_default(),
            relay_peer_number: 0,
            exchange_id: 0,
        }),
    }
    .or({
        if !payload.is_empty() {
            Some(Command::SendMsg {
                peer_ids: meta.target_peer_ids,
                relay_peer_number: 0,
                payload,
                exchange_id: 0,
            })
        } else {
            None
        }
    })
}

fn event_to_meta(event: Event) -> (LegacyMetadata, Vec<u8>) {
    match event {
        Event::MsgReceived {
            src_peer_id, payload, ..
        } => (
            LegacyMetadata {
                src_peer_id,
                peer_event: Some("MsgReceived".to_string()),
                ..Default::default()
            },
            payload,
        ),
        Event::PeerConnected { peer_id, .. } => (
            LegacyMetadata {
                src_peer_id: peer_id,
                peer_event: Some("PeerConnected".to_string()),
                ..Default::default()
            },
            Vec::new(),
        ),
        Event::PeerDisconnected { peer_id, .. } => (
            LegacyMetadata {
                src_peer_id: peer_id,
                peer_event: Some("PeerDisconnected".to_string()),
                ..Default::default()
            },
            Vec::new(),
        ),
        Event::PeerCalled { peer_id, tracks, .. } => (
            LegacyMetadata {
                src_peer_id: peer_id,
                peer_event: Some("PeerCalled".to_string()),
                params: tracks.into_iter().map(|t| t.track_name).collect(),
                ..Default::default()
            },
            Vec::new(),
        ),
        Event::PeerHungup { peer_id, .. } => (
            LegacyMetadata {
                src_peer_id: peer_id,
                peer_event: Some("PeerHungup".to_string()),
                ..Default::default()
            },
            Vec::new(),
        ),
        Event::PeerDataConnError {
            peer_id, kind, message, ..
        }
        | Event::PeerMediaConnError {
            peer_id, kind, message, ..
        } => (
            LegacyMetadata {
                src_peer_id: peer_id,
                err: Some(kind.as_wire_str().to_string()),
                peer_event: Some(message),
                ..Default::default()
            },
            Vec::new(),
        ),
        Event::RelayConnected { peer_id, .. } => (
            LegacyMetadata {
                src_peer_id: peer_id,
                peer_event: Some("RelayConnected".to_string()),
                ..Default::default()
            },
            Vec::new(),
        ),
        Event::RelayDisconnected { .. } => (
            LegacyMetadata {
                peer_event: Some("RelayDisconnected".to_string()),
                ..Default::default()
            },
            Vec::new(),
        ),
        Event::RelayError { kind, message, .. } => (
            LegacyMetadata {
                err: Some(kind.as_wire_str().to_string()),
                peer_event: Some(message),
                ..Default::default()
            },
            Vec::new(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_connect_action() {
        let meta = LegacyMetadata {
            src_peer_id: "a".to_string(),
            action: Some(LegacyAction::Connect),
            target_peer_ids: vec!["b".to_string()],
            ..Default::default()
        };
        let encoded = encode_message(&meta, b"", "|\"|").unwrap();
        let (decoded, payload) = decode_message(&encoded, "|\"|").unwrap();
        assert!(payload.is_empty());
        assert_eq!(decoded.target_peer_ids, vec!["b".to_string()]);
        let cmd = meta_to_command(decoded, payload).unwrap();
        matches!(cmd, Command::Connect { peer_id, .. } if peer_id == "b");
    }

    #[test]
    fn separator_must_be_present() {
        let err = decode_message(b"{}nosep", "|\"|").unwrap_err();
        assert!(err.to_string().contains("separator"));
    }

    #[test]
    fn frame_round_trips_binary_payload() {
        let meta = LegacyMetadata::default();
        let payload = vec![0u8, 1, 2, 255];
        let encoded = encode_message(&meta, &payload, "|\"|").unwrap();
        let (_, decoded_payload) = decode_message(&encoded, "|\"|").unwrap();
        assert_eq!(decoded_payload, payload);
    }
}
