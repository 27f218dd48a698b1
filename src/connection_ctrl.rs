//! `ConnectionCtrl`: owns the map of live `RelayPeer`s and is the sole mutator of it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::RelayErrorKind;
use crate::media::MediaTrackRegistry;
use crate::protocol::{Event, ExchangeId, PeerId, RelayPeerNumber, RelayPeerOpts};
use crate::relay_peer::{self, RelayPeerHandle};
use crate::signaling::SignalingFactory;
use crate::token_store::TokenStore;
use crate::util::EventSub;

pub struct ConnectionCtrl {
    relays: RwLock<HashMap<RelayPeerNumber, RelayPeerHandle>>,
    events: Arc<EventSub<Event>>,
    factory: Arc<dyn SignalingFactory>,
    token_store: Arc<TokenStore>,
    tracks: Arc<MediaTrackRegistry>,
}

impl ConnectionCtrl {
    pub fn new(
        events: Arc<EventSub<Event>>,
        factory: Arc<dyn SignalingFactory>,
        token_store: Arc<TokenStore>,
        tracks: Arc<MediaTrackRegistry>,
    ) -> Self {
        Self {
            relays: RwLock::new(HashMap::new()),
            events,
            factory,
            token_store,
            tracks,
        }
    }

    pub fn event_bus(&self) -> Arc<EventSub<Event>> {
        self.events.clone()
    }

    pub fn media_registry(&self) -> Arc<MediaTrackRegistry> {
        self.tracks.clone()
    }

    async fn emit(&self, event: Event) {
        self.events.push(event).await;
    }

    /// Validates `relay_peer_number >= 1` and uniqueness, then spawns a `RelayPeer`.
    pub async fn add_relay(&self, opts: RelayPeerOpts, exchange_id: ExchangeId) -> anyhow::Result<()> {
        let rpn = opts.relay_peer_number;
        if rpn == 0 {
            anyhow::bail!("relay_peer_number must be >= 1");
        }
        {
            let relays = self.relays.read().await;
            if relays.contains_key(&rpn) {
                self.emit(Event::RelayError {
                    relay_peer_number: rpn,
                    kind: RelayErrorKind::DuplicateRelayPeer(rpn),
                    message: format!("relay peer {rpn} already exists"),
                    exchange_id,
                })
                .await;
                anyhow::bail!(RelayErrorKind::DuplicateRelayPeer(rpn));
            }
        }

        let handle = relay_peer::spawn(
            opts,
            self.factory.clone(),
            self.token_store.clone(),
            self.events.clone(),
            exchange_id,
        );
        self.relays.write().await.insert(rpn, handle);
        Ok(())
    }

    pub async fn get_relay_opts(&self, relay_peer_number: RelayPeerNumber) -> anyhow::Result<RelayPeerOpts> {
        let handle = self
            .relays
            .read()
            .await
            .get(&relay_peer_number)
            .cloned()
            .ok_or(RelayErrorKind::UnknownRelayPeer(relay_peer_number))?;
        handle.opts().await
    }

    pub async fn stop_relay(&self, relay_peer_number: RelayPeerNumber) -> anyhow::Result<()> {
        let handle = self.relays.write().await.remove(&relay_peer_number);
        match handle {
            Some(handle) => handle.stop().await,
            None => anyhow::bail!(RelayErrorKind::UnknownRelayPeer(relay_peer_number)),
        }
    }

    /// Stops and drops every live `RelayPeer`, then closes every registered media
    /// source so no UDP reader task or signaling session outlives kernel shutdown.
    pub async fn stop_all(&self) {
        let handles: Vec<_> = self.relays.write().await.drain().map(|(_, h)| h).collect();
        for handle in handles {
            if let Err(e) = handle.stop().await {
                log::error!("relay peer {} failed to stop cleanly: {e}", handle.relay_peer_number);
            }
        }
        self.tracks.close_all().await;
    }

    /// Selects the relays addressed by `rpn`: `0` means "every live relay".
    async fn selected_relays(&self, rpn: RelayPeerNumber) -> Vec<RelayPeerHandle> {
        let relays = self.relays.read().await;
        if rpn == 0 {
            relays.values().cloned().collect()
        } else {
            relays.get(&rpn).cloned().into_iter().collect()
        }
    }

    pub async fn connect_to_peer(&self, peer_id: PeerId, rpn: RelayPeerNumber, exchange_id: ExchangeId) {
        let selected = self.selected_relays(rpn).await;
        if selected.is_empty() {
            self.emit(Event::PeerDataConnError {
                relay_peer_number: rpn,
                peer_id: peer_id.clone(),
                kind: RelayErrorKind::UnknownRelayPeer(rpn),
                message: format!("relay peer {rpn} not found"),
                exchange_id,
            })
            .await;
            return;
        }
        for relay in selected {
            if let Err(e) = relay.connect_to(peer_id.clone(), exchange_id).await {
                self.emit(Event::PeerDataConnError {
                    relay_peer_number: relay.relay_peer_number,
                    peer_id: peer_id.clone(),
                    kind: RelayErrorKind::Unknown(e.to_string()),
                    message: e.to_string(),
                    exchange_id,
                })
                .await;
            }
        }
    }

    pub async fn disconnect_from_peer(&self, peer_id: PeerId, rpn: RelayPeerNumber, exchange_id: ExchangeId) {
        let selected = self.selected_relays(rpn).await;
        for relay in selected {
            if let Err(e) = relay.disconnect_from(peer_id.clone()).await {
                self.emit(Event::PeerDataConnError {
                    relay_peer_number: relay.relay_peer_number,
                    peer_id: peer_id.clone(),
                    kind: RelayErrorKind::Unknown(e.to_string()),
                    message: e.to_string(),
                    exchange_id,
                })
                .await;
            }
        }
    }

    /// `peer_ids == ["*"]` broadcasts to all open data-conns across the selected
    /// relays; each `RelayPeer` resolves the wildcard against its own data-conn map,
    /// since that map is the only place connection state actually lives (I4).
    pub async fn send_message(
        &self,
        peer_ids: Vec<PeerId>,
        rpn: RelayPeerNumber,
        payload: Vec<u8>,
        exchange_id: ExchangeId,
    ) {
        let selected = self.selected_relays(rpn).await;
        for relay in selected {
            if let Err(e) = relay.send_message(peer_ids.clone(), payload.clone(), exchange_id).await {
                log::error!("relay peer {} send_message failed: {e}", relay.relay_peer_number);
            }
        }
    }

    /// For each `(relay, peer)` and each named track: place a new call if none exists,
    /// else attach the track to the existing local stream (idempotent by track name).
    pub async fn stream_tracks_to_peers(
        &self,
        peer_ids: Vec<PeerId>,
        rpn: RelayPeerNumber,
        track_names: Vec<String>,
        exchange_id: ExchangeId,
    ) {
        let mut tracks = Vec::new();
        for name in &track_names {
            match self.tracks.get(name).await {
                Some(source) => tracks.push(source),
                None => {
                    self.emit(Event::RelayError {
                        relay_peer_number: rpn,
                        kind: RelayErrorKind::UnknownTrack(name.clone()),
                        message: format!("track {name} not found"),
                        exchange_id,
                    })
                    .await;
                }
            }
        }
        if tracks.is_empty() {
            return;
        }

        let selected = self.selected_relays(rpn).await;
        for relay in selected {
            for peer_id in &peer_ids {
                let has_media_conn = relay.has_media_conn(peer_id.clone()).await.unwrap_or(false);
                let mut iter = tracks.iter();
                if !has_media_conn {
                    if let Some(first) = iter.next() {
                        let track = first.local_track.clone() as Arc<dyn crate::signaling::LocalTrack>;
                        if let Err(e) = relay.call_peer(peer_id.clone(), track, exchange_id).await {
                            self.emit(Event::PeerMediaConnError {
                                relay_peer_number: relay.relay_peer_number,
                                peer_id: peer_id.clone(),
                                kind: RelayErrorKind::Unknown(e.to_string()),
                                message: e.to_string(),
                                exchange_id,
                            })
                            .await;
                            continue;
                        }
                        first.add_consumer(peer_id.clone()).await;
                    }
                }
                for source in iter {
                    let track = source.local_track.clone() as Arc<dyn crate::signaling::LocalTrack>;
                    if let Err(e) = relay.add_track_to_call(peer_id.clone(), track).await {
                        self.emit(Event::PeerMediaConnError {
                            relay_peer_number: relay.relay_peer_number,
                            peer_id: peer_id.clone(),
                            kind: RelayErrorKind::Unknown(e.to_string()),
                            message: e.to_string(),
                            exchange_id,
                        })
                        .await;
                        continue;
                    }
                    source.add_consumer(peer_id.clone()).await;
                }
            }
        }
    }

    pub async fn stop_media_stream(&self, relay_peer_number: RelayPeerNumber, peer_id: PeerId, exchange_id: ExchangeId) {
        let selected = self.selected_relays(relay_peer_number).await;
        for relay in selected {
            if let Err(e) = relay.stop_media_stream(peer_id.clone(), exchange_id).await {
                log::error!("relay peer {} stop_media_stream failed: {e}", relay.relay_peer_number);
            }
        }
        self.tracks.remove_consumer_everywhere(&peer_id).await;
    }
}
