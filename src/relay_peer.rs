//! `RelayPeer`: the lifecycle of one signaling identity and its peer sessions.
//!
//! Runs as its own task (grounded on the teacher's `internal::background_thread::run`
//! command-pump pattern): the task owns all mutable state — the signaling session, the
//! data/media connection maps — and external callers only ever reach it through
//! [`RelayPeerHandle`], a cheap `mpsc` mailbox. Signaling callbacks are flattened into
//! a stream of `SignalingEvent`s rather than captured in closures, so there is no
//! back-reference from a connection to its owning peer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::error::RelayErrorKind;
use crate::identity;
use crate::protocol::{Event, ExchangeId, PeerId, RelayPeerNumber, RelayPeerOpts};
use crate::signaling::{LocalTrack, SignalingConnection, SignalingEvent, SignalingFactory, SignalingSession};
use crate::token_store::TokenStore;
use crate::util::EventSub;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayPeerState {
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
    Destroyed,
}

struct DataConnSlot {
    conn: Box<dyn SignalingConnection>,
    exchange_id: ExchangeId,
}

struct MediaConnSlot {
    conn: Box<dyn SignalingConnection>,
    exchange_id: ExchangeId,
    track_names: Vec<String>,
}

enum RelayPeerCommand {
    ConnectTo {
        remote_peer_id: PeerId,
        exchange_id: ExchangeId,
    },
    DisconnectFrom {
        remote_peer_id: PeerId,
    },
    CallPeer {
        remote_peer_id: PeerId,
        track: Arc<dyn LocalTrack>,
        exchange_id: ExchangeId,
    },
    AddTrackToCall {
        remote_peer_id: PeerId,
        track: Arc<dyn LocalTrack>,
    },
    SendMessage {
        peer_ids: Vec<PeerId>,
        payload: Vec<u8>,
        exchange_id: ExchangeId,
    },
    StopMediaStream {
        remote_peer_id: PeerId,
        exchange_id: ExchangeId,
    },
    HasMediaConn {
        remote_peer_id: PeerId,
    },
    GetOpts,
    Stop,
}

enum RelayPeerResponse {
    Unit(anyhow::Result<()>),
    Bool(bool),
    Opts(Box<RelayPeerOpts>),
}

type Reply = oneshot::Sender<RelayPeerResponse>;

/// A cheap, cloneable handle to a running `RelayPeer` task.
#[derive(Clone)]
pub struct RelayPeerHandle {
    pub relay_peer_number: RelayPeerNumber,
    cmd_tx: mpsc::UnboundedSender<(RelayPeerCommand, Reply)>,
}

impl RelayPeerHandle {
    async fn call(&self, cmd: RelayPeerCommand) -> anyhow::Result<RelayPeerResponse> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send((cmd, tx))
            .map_err(|_| anyhow::anyhow!("relay peer {} task is gone", self.relay_peer_number))?;
        rx.await
            .map_err(|_| anyhow::anyhow!("relay peer {} dropped the response", self.relay_peer_number))
    }

    async fn call_unit(&self, cmd: RelayPeerCommand) -> anyhow::Result<()> {
        match self.call(cmd).await? {
            RelayPeerResponse::Unit(r) => r,
            _ => unreachable!("unit command answered with something else"),
        }
    }

    async fn call_bool(&self, cmd: RelayPeerCommand) -> anyhow::Result<bool> {
        match self.call(cmd).await? {
            RelayPeerResponse::Bool(b) => Ok(b),
            _ => unreachable!("bool query answered with something else"),
        }
    }

    async fn call_opts(&self, cmd: RelayPeerCommand) -> anyhow::Result<RelayPeerOpts> {
        match self.call(cmd).await? {
            RelayPeerResponse::Opts(opts) => Ok(*opts),
            _ => unreachable!("opts query answered with something else"),
        }
    }

    pub async fn connect_to(&self, remote_peer_id: PeerId, exchange_id: ExchangeId) -> anyhow::Result<()> {
        self.call_unit(RelayPeerCommand::ConnectTo {
            remote_peer_id,
            exchange_id,
        })
        .await
    }

    pub async fn disconnect_from(&self, remote_peer_id: PeerId) -> anyhow::Result<()> {
        self.call_unit(RelayPeerCommand::DisconnectFrom { remote_peer_id }).await
    }

    pub async fn call_peer(
        &self,
        remote_peer_id: PeerId,
        track: Arc<dyn LocalTrack>,
        exchange_id: ExchangeId,
    ) -> anyhow::Result<()> {
        self.call_unit(RelayPeerCommand::CallPeer {
            remote_peer_id,
            track,
            exchange_id,
        })
        .await
    }

    pub async fn add_track_to_call(&self, remote_peer_id: PeerId, track: Arc<dyn LocalTrack>) -> anyhow::Result<()> {
        self.call_unit(RelayPeerCommand::AddTrackToCall { remote_peer_id, track })
            .await
    }

    pub async fn send_message(&self, peer_ids: Vec<PeerId>, payload: Vec<u8>, exchange_id: ExchangeId) -> anyhow::Result<()> {
        self.call_unit(RelayPeerCommand::SendMessage {
            peer_ids,
            payload,
            exchange_id,
        })
        .await
    }

    pub async fn stop_media_stream(&self, remote_peer_id: PeerId, exchange_id: ExchangeId) -> anyhow::Result<()> {
        self.call_unit(RelayPeerCommand::StopMediaStream {
            remote_peer_id,
            exchange_id,
        })
        .await
    }

    pub async fn has_media_conn(&self, remote_peer_id: PeerId) -> anyhow::Result<bool> {
        self.call_bool(RelayPeerCommand::HasMediaConn { remote_peer_id }).await
    }

    pub async fn opts(&self) -> anyhow::Result<RelayPeerOpts> {
        self.call_opts(RelayPeerCommand::GetOpts).await
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        self.call_unit(RelayPeerCommand::Stop).await
    }
}

/// Spawns a `RelayPeer` task and returns a handle to it.
pub fn spawn(
    opts: RelayPeerOpts,
    factory: Arc<dyn SignalingFactory>,
    token_store: Arc<TokenStore>,
    events: Arc<EventSub<Event>>,
    saved_exchange_id: ExchangeId,
) -> RelayPeerHandle {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let relay_peer_number = opts.relay_peer_number;
    tokio::spawn(run(opts, factory, token_store, events, saved_exchange_id, cmd_rx));
    RelayPeerHandle {
        relay_peer_number,
        cmd_tx,
    }
}

struct Inner {
    opts: RelayPeerOpts,
    state: RelayPeerState,
    peer_id: String,
    ending_num: u64,
    backoff_count: u32,
    data_conns: HashMap<PeerId, DataConnSlot>,
    media_conns: HashMap<PeerId, MediaConnSlot>,
    saved_exchange_id: ExchangeId,
    events: Arc<EventSub<Event>>,
}

impl Inner {
    fn exchange_id_for(&self, remote_peer_id: &PeerId) -> ExchangeId {
        self.data_conns
            .get(remote_peer_id)
            .map(|s| s.exchange_id)
            .or_else(|| self.media_conns.get(remote_peer_id).map(|s| s.exchange_id))
            .unwrap_or(self.saved_exchange_id)
    }

    async fn emit(&self, event: Event) {
        self.events.push(event).await;
    }

    fn recompute_peer_id(&mut self) {
        self.peer_id = identity::peer_id(
            &self.opts.base_peer_id,
            self.ending_num,
            self.opts.memorable_peer_id,
            self.opts.peer_id_offset,
        );
    }
}

async fn run(
    opts: RelayPeerOpts,
    factory: Arc<dyn SignalingFactory>,
    token_store: Arc<TokenStore>,
    events: Arc<EventSub<Event>>,
    saved_exchange_id: ExchangeId,
    mut cmd_rx: mpsc::UnboundedReceiver<(RelayPeerCommand, Reply)>,
) {
    let relay_peer_number = opts.relay_peer_number;
    let mut inner = Inner {
        peer_id: String::new(),
        state: RelayPeerState::Connecting,
        ending_num: 0,
        backoff_count: 0,
        data_conns: HashMap::new(),
        media_conns: HashMap::new(),
        saved_exchange_id,
        events,
        opts,
    };
    inner.recompute_peer_id();

    'reconnect: loop {
        inner.state = RelayPeerState::Connecting;
        let token = token_store.get_token(&inner.peer_id, &inner.opts.host).await;
        let (session, mut session_events) = match factory.create_session(&inner.opts, &inner.peer_id, &token).await {
            Ok(s) => s,
            Err(e) => {
                log::warn!("relay peer {relay_peer_number} failed to create signaling session: {e}");
                inner.backoff_count += 1;
                sleep_backoff(inner.backoff_count).await;
                continue 'reconnect;
            }
        };

        let open_timeout = Duration::from_secs(8 + inner.backoff_count as u64);
        let mut opened = false;
        let open_deadline = tokio::time::sleep(open_timeout);
        tokio::pin!(open_deadline);

        loop {
            tokio::select! {
                _ = &mut open_deadline, if !opened => {
                    log::warn!("relay peer {relay_peer_number} open-timeout expired");
                    let _ = session.destroy().await;
                    inner.backoff_count += 1;
                    continue 'reconnect;
                }
                maybe_evt = session_events.recv() => {
                    let Some(evt) = maybe_evt else {
                        inner.backoff_count += 1;
                        continue 'reconnect;
                    };
                    match evt {
                        SignalingEvent::Open { assigned_peer_id } => {
                            opened = true;
                            inner.peer_id = assigned_peer_id.clone();
                            inner.backoff_count = 0;
                            inner.state = RelayPeerState::Connected;
                            inner.emit(Event::RelayConnected {
                                relay_peer_number,
                                peer_id: assigned_peer_id,
                                exchange_id: inner.saved_exchange_id,
                            }).await;
                        }
                        SignalingEvent::Connection { remote_peer_id, conn } => {
                            let exchange_id = inner.exchange_id_for(&remote_peer_id);
                            if let Some(existing) = inner.data_conns.remove(&remote_peer_id) {
                                let _ = existing.conn.close().await;
                            }
                            inner.data_conns.insert(remote_peer_id.clone(), DataConnSlot { conn, exchange_id });
                            inner.emit(Event::PeerConnected {
                                relay_peer_number,
                                peer_id: remote_peer_id,
                                exchange_id,
                            }).await;
                        }
                        SignalingEvent::Call { remote_peer_id, tracks, conn } => {
                            let exchange_id = inner.exchange_id_for(&remote_peer_id);
                            if let Some(existing) = inner.media_conns.remove(&remote_peer_id) {
                                let _ = existing.conn.close().await;
                            }
                            let track_names: Vec<String> = tracks.iter().map(|t| t.track_name.clone()).collect();
                            inner.media_conns.insert(remote_peer_id.clone(), MediaConnSlot { conn, exchange_id, track_names });
                            inner.emit(Event::PeerCalled {
                                relay_peer_number,
                                peer_id: remote_peer_id,
                                tracks,
                                exchange_id,
                            }).await;
                        }
                        SignalingEvent::Data { remote_peer_id, payload } => {
                            let exchange_id = inner.exchange_id_for(&remote_peer_id);
                            inner.emit(Event::MsgReceived {
                                relay_peer_number,
                                src_peer_id: remote_peer_id,
                                payload,
                                exchange_id,
                            }).await;
                        }
                        SignalingEvent::ConnectionClosed { remote_peer_id } => {
                            let exchange_id = inner.exchange_id_for(&remote_peer_id);
                            let had_data = inner.data_conns.remove(&remote_peer_id).is_some();
                            let had_media = inner.media_conns.remove(&remote_peer_id).is_some();
                            if had_data {
                                inner.emit(Event::PeerDisconnected {
                                    relay_peer_number,
                                    peer_id: remote_peer_id.clone(),
                                    exchange_id,
                                }).await;
                            }
                            if had_media {
                                inner.emit(Event::PeerHungup {
                                    relay_peer_number,
                                    peer_id: remote_peer_id,
                                    exchange_id,
                                }).await;
                            }
                        }
                        SignalingEvent::Disconnected => {
                            inner.state = RelayPeerState::Reconnecting;
                            inner.emit(Event::RelayDisconnected {
                                relay_peer_number,
                                exchange_id: inner.saved_exchange_id,
                            }).await;
                            if session.reconnect().await.is_err() {
                                inner.backoff_count += 1;
                                continue 'reconnect;
                            }
                        }
                        SignalingEvent::Destroyed => {
                            inner.backoff_count += 1;
                            continue 'reconnect;
                        }
                        SignalingEvent::Error { kind, message } => {
                            inner.emit(Event::RelayError {
                                relay_peer_number,
                                kind: kind.clone(),
                                message: message.clone(),
                                exchange_id: inner.saved_exchange_id,
                            }).await;
                            if kind == RelayErrorKind::UnavailableId {
                                token_store.discard_token(&inner.peer_id, &inner.opts.host).await;
                                inner.ending_num += 1;
                                inner.recompute_peer_id();
                                let _ = session.destroy().await;
                                continue 'reconnect;
                            } else if kind.is_fatal_signaling() {
                                inner.state = RelayPeerState::Destroyed;
                                let _ = session.destroy().await;
                                inner.backoff_count += 1;
                                continue 'reconnect;
                            }
                        }
                    }
                }
                maybe_cmd = cmd_rx.recv() => {
                    let Some((cmd, reply)) = maybe_cmd else {
                        inner.state = RelayPeerState::Destroyed;
                        let _ = session.destroy().await;
                        return;
                    };
                    match cmd {
                        RelayPeerCommand::Stop => {
                            inner.state = RelayPeerState::Destroyed;
                            let data_conns: Vec<_> = inner.data_conns.drain().collect();
                            for (peer_id, slot) in data_conns {
                                let _ = slot.conn.close().await;
                                inner.emit(Event::PeerDisconnected {
                                    relay_peer_number,
                                    peer_id,
                                    exchange_id: slot.exchange_id,
                                }).await;
                            }
                            let media_conns: Vec<_> = inner.media_conns.drain().collect();
                            for (peer_id, slot) in media_conns {
                                let _ = slot.conn.close().await;
                                inner.emit(Event::PeerHungup {
                                    relay_peer_number,
                                    peer_id,
                                    exchange_id: slot.exchange_id,
                                }).await;
                            }
                            let _ = session.destroy().await;
                            let _ = reply.send(RelayPeerResponse::Unit(Ok(())));
                            return;
                        }
                        RelayPeerCommand::ConnectTo { remote_peer_id, exchange_id } => {
                            let result = do_connect_to(&mut inner, session.as_ref(), remote_peer_id, exchange_id, relay_peer_number).await;
                            let _ = reply.send(RelayPeerResponse::Unit(result));
                        }
                        RelayPeerCommand::DisconnectFrom { remote_peer_id } => {
                            let result = do_disconnect_from(&mut inner, remote_peer_id, relay_peer_number).await;
                            let _ = reply.send(RelayPeerResponse::Unit(result));
                        }
                        RelayPeerCommand::CallPeer { remote_peer_id, track, exchange_id } => {
                            let result = do_call_peer(&mut inner, session.as_ref(), remote_peer_id, track, exchange_id).await;
                            let _ = reply.send(RelayPeerResponse::Unit(result));
                        }
                        RelayPeerCommand::AddTrackToCall { remote_peer_id, track } => {
                            let result = do_add_track_to_call(&mut inner, remote_peer_id, track);
                            let _ = reply.send(RelayPeerResponse::Unit(result));
                        }
                        RelayPeerCommand::SendMessage { peer_ids, payload, exchange_id } => {
                            do_send_message(&mut inner, peer_ids, payload, exchange_id, relay_peer_number).await;
                            let _ = reply.send(RelayPeerResponse::Unit(Ok(())));
                        }
                        RelayPeerCommand::StopMediaStream { remote_peer_id, exchange_id } => {
                            let result = do_stop_media_stream(&mut inner, remote_peer_id, exchange_id, relay_peer_number).await;
                            let _ = reply.send(RelayPeerResponse::Unit(result));
                        }
                        RelayPeerCommand::HasMediaConn { remote_peer_id } => {
                            let has = inner.media_conns.contains_key(&remote_peer_id);
                            let _ = reply.send(RelayPeerResponse::Bool(has));
                        }
                        RelayPeerCommand::GetOpts => {
                            let _ = reply.send(RelayPeerResponse::Opts(Box::new(inner.opts.clone())));
                        }
                    }
                }
            }

            if inner.state == RelayPeerState::Destroyed {
                continue 'reconnect;
            }
        }
    }
}

/// `connect_to` command: replace-on-duplicate policy (I1) — an existing open data
/// connection to the same remote is closed before the new one is opened.
async fn do_connect_to(
    inner: &mut Inner,
    session: &dyn SignalingSession,
    remote_peer_id: PeerId,
    exchange_id: ExchangeId,
    relay_peer_number: RelayPeerNumber,
) -> anyhow::Result<()> {
    if let Some(existing) = inner.data_conns.remove(&remote_peer_id) {
        let _ = existing.conn.close().await;
        inner
            .emit(Event::PeerDisconnected {
                relay_peer_number,
                peer_id: remote_peer_id.clone(),
                exchange_id: existing.exchange_id,
            })
            .await;
    }
    let conn = session.connect_to(&remote_peer_id).await?;
    inner
        .data_conns
        .insert(remote_peer_id, DataConnSlot { conn, exchange_id });
    Ok(())
}

async fn do_disconnect_from(
    inner: &mut Inner,
    remote_peer_id: PeerId,
    relay_peer_number: RelayPeerNumber,
) -> anyhow::Result<()> {
    let exchange_id = inner.exchange_id_for(&remote_peer_id);
    if let Some(slot) = inner.data_conns.remove(&remote_peer_id) {
        if let Err(e) = slot.conn.close().await {
            inner
                .emit(Event::PeerDataConnError {
                    relay_peer_number,
                    peer_id: remote_peer_id.clone(),
                    kind: RelayErrorKind::Unknown(e.to_string()),
                    message: e.to_string(),
                    exchange_id,
                })
                .await;
        }
    }
    if let Some(slot) = inner.media_conns.remove(&remote_peer_id) {
        if let Err(e) = slot.conn.close().await {
            inner
                .emit(Event::PeerMediaConnError {
                    relay_peer_number,
                    peer_id: remote_peer_id,
                    kind: RelayErrorKind::Unknown(e.to_string()),
                    message: e.to_string(),
                    exchange_id,
                })
                .await;
        }
    }
    Ok(())
}

/// `call_peer` command: same replace-if-exists policy as `connect_to`.
async fn do_call_peer(
    inner: &mut Inner,
    session: &dyn SignalingSession,
    remote_peer_id: PeerId,
    track: Arc<dyn LocalTrack>,
    exchange_id: ExchangeId,
) -> anyhow::Result<()> {
    if let Some(existing) = inner.media_conns.remove(&remote_peer_id) {
        let _ = existing.conn.close().await;
    }
    let conn = session.call(&remote_peer_id, track.as_ref()).await?;
    inner.media_conns.insert(
        remote_peer_id,
        MediaConnSlot {
            conn,
            exchange_id,
            track_names: vec![track.track_id().to_string()],
        },
    );
    Ok(())
}

/// `add_track_to_call`: no-op if a track with the same id is already on the stream.
fn do_add_track_to_call(inner: &mut Inner, remote_peer_id: PeerId, track: Arc<dyn LocalTrack>) -> anyhow::Result<()> {
    let Some(slot) = inner.media_conns.get_mut(&remote_peer_id) else {
        anyhow::bail!("no media connection to {remote_peer_id}");
    };
    let track_id = track.track_id().to_string();
    if !slot.track_names.contains(&track_id) {
        slot.track_names.push(track_id);
    }
    Ok(())
}

/// `send_message`: `peer_ids == ["*"]` expands to every currently open data-conn.
/// Per target: not open → `PeerDataConnError(CONNECTION_NOT_OPEN)`; send failure →
/// disconnect the peer in addition to the error event.
async fn do_send_message(
    inner: &mut Inner,
    peer_ids: Vec<PeerId>,
    payload: Vec<u8>,
    exchange_id: ExchangeId,
    relay_peer_number: RelayPeerNumber,
) {
    let targets: Vec<PeerId> = if peer_ids.iter().any(|p| p == "*") {
        inner.data_conns.keys().cloned().collect()
    } else {
        peer_ids
    };

    for peer_id in targets {
        let is_open = inner.data_conns.get(&peer_id).map(|s| s.conn.is_open()).unwrap_or(false);
        if !is_open {
            inner
                .emit(Event::PeerDataConnError {
                    relay_peer_number,
                    peer_id,
                    kind: RelayErrorKind::ConnectionNotOpen,
                    message: "no open data connection".to_string(),
                    exchange_id,
                })
                .await;
            continue;
        }

        let send_result = inner.data_conns[&peer_id].conn.send(&payload).await;
        if let Err(e) = send_result {
            inner
                .emit(Event::PeerDataConnError {
                    relay_peer_number,
                    peer_id: peer_id.clone(),
                    kind: RelayErrorKind::Unknown(e.to_string()),
                    message: e.to_string(),
                    exchange_id,
                })
                .await;
            let _ = do_disconnect_from(inner, peer_id, relay_peer_number).await;
        }
    }
}

/// Closes the media-conn only; the data-conn (if any) is left untouched.
async fn do_stop_media_stream(
    inner: &mut Inner,
    remote_peer_id: PeerId,
    exchange_id: ExchangeId,
    relay_peer_number: RelayPeerNumber,
) -> anyhow::Result<()> {
    if let Some(slot) = inner.media_conns.remove(&remote_peer_id) {
        if let Err(e) = slot.conn.close().await {
            inner
                .emit(Event::PeerMediaConnError {
                    relay_peer_number,
                    peer_id: remote_peer_id,
                    kind: RelayErrorKind::Unknown(e.to_string()),
                    message: e.to_string(),
                    exchange_id,
                })
                .await;
        }
    }
    Ok(())
}

async fn sleep_backoff(backoff_count: u32) {
    tokio::time::sleep(Duration::from_secs(backoff_count as u64)).await;
}
