//! `RelayKernel`: the top-level façade that wires config to components and pumps the
//! inbound command bus.

use std::sync::Arc;

use tokio::process::Child;

use crate::config::{Config, MediaSourceKind};
use crate::connection_ctrl::ConnectionCtrl;
use crate::media::{MediaTrackRegistry, RtpSourceSpec};
use crate::protocol::{Command, Event, RelayPeerOpts, TrackKind};
use crate::signaling::SignalingFactory;
use crate::token_store::TokenStore;
use crate::util::{EventSub, UnblockSignal};

pub struct RelayKernel {
    ctrl: Arc<ConnectionCtrl>,
    commands: Arc<EventSub<Command>>,
    stop_signal: UnblockSignal,
    local_servers: tokio::sync::Mutex<Vec<Child>>,
}

impl RelayKernel {
    pub fn new(factory: Arc<dyn SignalingFactory>, token_file: Option<std::path::PathBuf>) -> Self {
        let events = Arc::new(EventSub::new(256));
        let tracks = Arc::new(MediaTrackRegistry::new());
        let token_store = Arc::new(TokenStore::new(token_file));
        let ctrl = Arc::new(ConnectionCtrl::new(events, factory, token_store, tracks));
        Self {
            ctrl,
            commands: Arc::new(EventSub::new(256)),
            stop_signal: UnblockSignal::new(),
            local_servers: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn connection_ctrl(&self) -> Arc<ConnectionCtrl> {
        self.ctrl.clone()
    }

    pub fn event_bus(&self) -> Arc<EventSub<Event>> {
        self.ctrl.event_bus()
    }

    pub fn command_bus(&self) -> Arc<EventSub<Command>> {
        self.commands.clone()
    }

    pub fn stop_signal(&self) -> UnblockSignal {
        self.stop_signal.get_signal()
    }

    /// Starts every initial relay from `config`, then spawns the command pump and
    /// the debug-verbosity observer task. Returns once both are running; does not
    /// block for the lifetime of the kernel (callers `select!` on `stop_signal`).
    pub async fn start(self: Arc<Self>, config: &Config) -> anyhow::Result<()> {
        for (i, peer) in config.peers.iter().enumerate() {
            let opts = RelayPeerOpts {
                relay_peer_number: peer.relay_peer_number,
                host: peer.host.clone(),
                port: peer.port,
                path: peer.path.clone(),
                secure: peer.secure,
                api_key: peer.key.clone(),
                ice_servers: peer.ice_servers.clone(),
                debug: peer.debug,
                ping_interval_secs: peer.ping_interval_secs,
                base_peer_id: config.base_peer_id.clone(),
                memorable_peer_id: config.memorable_peer_id,
                peer_id_offset: config.peer_id_offset,
                local_server_command: peer.local_server_command.clone(),
            };
            if let Some(command) = &opts.local_server_command {
                self.spawn_local_server(command).await?;
            }
            self.ctrl.add_relay(opts, 0).await.map_err(|e| {
                anyhow::anyhow!("failed to start initial relay #{i} ({}): {e}", peer.relay_peer_number)
            })?;
        }

        for source in &config.media_sources {
            let spec = RtpSourceSpec {
                track_name: source.track_name.clone(),
                kind: match source.kind {
                    MediaSourceKind::Video => TrackKind::Video,
                    MediaSourceKind::Audio => TrackKind::Audio,
                },
                mime_type: source.mime_type.clone(),
                rtp_url: source.rtp_url.clone(),
                read_buffer_size: source.read_buffer_size,
            };
            self.ctrl.media_registry().add_rtp_source(spec).await.map_err(|e| {
                anyhow::anyhow!("failed to start media source {}: {e}", source.track_name)
            })?;
        }

        Self::spawn_command_pump(self.clone());
        Self::spawn_debug_observer(self.clone());
        Ok(())
    }

    async fn spawn_local_server(&self, command: &[String]) -> anyhow::Result<()> {
        let Some((program, args)) = command.split_first() else {
            anyhow::bail!("local_server_command is empty");
        };
        let child = tokio::process::Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| anyhow::anyhow!("failed to spawn local signaling server {program}: {e}"))?;
        self.local_servers.lock().await.push(child);
        Ok(())
    }

    fn spawn_command_pump(this: Arc<Self>) {
        tokio::spawn(async move {
            let mut sub = this.commands.subscribe().await;
            let stop = this.stop_signal.get_signal();
            loop {
                tokio::select! {
                    _ = stop.wait() => {
                        log::info!("command pump exiting on stop signal");
                        break;
                    }
                    maybe_cmd = sub.recv() => {
                        let Some(cmd) = maybe_cmd else { break; };
                        this.dispatch(cmd).await;
                    }
                }
            }
        });
    }

    fn spawn_debug_observer(this: Arc<Self>) {
        let events = this.event_bus();
        let stop = this.stop_signal.get_signal();
        tokio::spawn(async move {
            let mut sub = events.subscribe().await;
            loop {
                tokio::select! {
                    _ = stop.wait() => break,
                    maybe_evt = sub.recv() => {
                        let Some(evt) = maybe_evt else { break; };
                        log::debug!(
                            "event on relay {}: exchange_id={}",
                            evt.relay_peer_number(),
                            evt.exchange_id()
                        );
                    }
                }
            }
        });
    }

    /// Dispatches one drained `Command` to `ConnectionCtrl`. Handler errors are
    /// logged and never crash the pump (§7 propagation policy).
    async fn dispatch(&self, cmd: Command) {
        match cmd {
            Command::Connect {
                peer_id,
                relay_peer_number,
                exchange_id,
            } => {
                self.ctrl.connect_to_peer(peer_id, relay_peer_number, exchange_id).await;
            }
            Command::Disconnect {
                peer_id,
                relay_peer_number,
                exchange_id,
            } => {
                self.ctrl
                    .disconnect_from_peer(peer_id, relay_peer_number, exchange_id)
                    .await;
            }
            Command::Call {
                peer_ids,
                relay_peer_number,
                track_names,
                exchange_id,
            } => {
                self.ctrl
                    .stream_tracks_to_peers(peer_ids, relay_peer_number, track_names, exchange_id)
                    .await;
            }
            Command::Hangup {
                peer_id,
                relay_peer_number,
                exchange_id,
            } => {
                self.ctrl.stop_media_stream(relay_peer_number, peer_id, exchange_id).await;
            }
            Command::SendMsg {
                peer_ids,
                relay_peer_number,
                payload,
                exchange_id,
            } => {
                self.ctrl.send_message(peer_ids, relay_peer_number, payload, exchange_id).await;
            }
            Command::AddRelay { opts, exchange_id } => {
                if let Err(e) = self.ctrl.add_relay(*opts, exchange_id).await {
                    log::error!("add_relay failed: {e}");
                }
            }
            Command::CloseRelay {
                relay_peer_number,
                exchange_id: _,
            } => {
                if let Err(e) = self.ctrl.stop_relay(relay_peer_number).await {
                    log::error!("close_relay failed: {e}");
                }
            }
        }
    }

    /// Triggers the kernel's stop signal, stops every `RelayPeer` (closing its
    /// signaling session and emitting terminating events for open conns), closes
    /// every media source's UDP listener, and kills local signaling-server children.
    /// Every sub-task exits cooperatively within the outer process's grace period.
    pub async fn stop(&self) {
        self.stop_signal.trigger();
        self.ctrl.stop_all().await;
        let mut servers = self.local_servers.lock().await;
        for child in servers.iter_mut() {
            let _ = child.start_kill();
        }
        self.ctrl.event_bus().close().await;
    }
}
