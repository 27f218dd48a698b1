use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;

use crate::error::RelayErrorKind;
use crate::signaling::LocalTrack;
use crate::util::UnblockSignal;

use super::RtpSourceSpec;

/// The local-track side of one RTP ingress: every received packet is broadcast to
/// whichever signaling sessions have negotiated this track. `write_rtp` never blocks
/// on a slow consumer — `broadcast::Sender::send` drops for receivers that lag rather
/// than stalling the reader task.
pub struct RtpLocalTrack {
    track_id: String,
    tx: broadcast::Sender<Bytes>,
}

impl RtpLocalTrack {
    fn new(track_id: String) -> Self {
        let (tx, _rx) = broadcast::channel(256);
        Self { track_id, tx }
    }

    /// Subscribed to by the (out-of-scope) signaling implementation that actually
    /// encapsulates packets for a negotiated peer connection.
    pub fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.tx.subscribe()
    }
}

impl LocalTrack for RtpLocalTrack {
    fn track_id(&self) -> &str {
        &self.track_id
    }

    fn write_rtp(&self, packet: &[u8]) -> anyhow::Result<()> {
        // send() only errors when there are zero receivers, which is a normal and
        // harmless state (no consumer has called in yet).
        let _ = self.tx.send(Bytes::copy_from_slice(packet));
        Ok(())
    }
}

/// One named RTP ingress source and the local track it feeds. A single `MediaSource`
/// supplies one local track; many `PeerSession`s may reference it as consumers.
pub struct MediaSource {
    pub track_name: String,
    pub kind: crate::protocol::TrackKind,
    pub mime_type: String,
    pub rtp_bind_addr: SocketAddr,
    pub local_track: Arc<RtpLocalTrack>,
    consumers: RwLock<HashSet<String>>,
    exit_signal: UnblockSignal,
    reader_handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl MediaSource {
    pub async fn add_consumer(&self, peer_id: impl Into<String>) {
        self.consumers.write().await.insert(peer_id.into());
    }

    pub async fn remove_consumer(&self, peer_id: &str) {
        self.consumers.write().await.remove(peer_id);
    }

    pub async fn consumer_peer_ids(&self) -> Vec<String> {
        self.consumers.read().await.iter().cloned().collect()
    }

    /// Closes the UDP listener and signals the reader task to stop.
    async fn close(&self) {
        self.exit_signal.trigger();
        if let Some(handle) = self.reader_handle.lock().await.take() {
            handle.abort();
        }
    }
}

/// A mapping `track_name -> MediaSource`.
#[derive(Default)]
pub struct MediaTrackRegistry {
    sources: RwLock<HashMap<String, Arc<MediaSource>>>,
}

impl MediaTrackRegistry {
    pub fn new() -> Self {
        Self {
            sources: RwLock::new(HashMap::new()),
        }
    }

    /// Parses `rtp_url` (`[rtp://]host:port`), binds a UDP listener, creates a local
    /// track and spawns a reader task that copies every received packet onto it.
    pub async fn add_rtp_source(
        &self,
        spec: RtpSourceSpec,
    ) -> Result<Arc<MediaSource>, RelayErrorKind> {
        {
            let sources = self.sources.read().await;
            if sources.contains_key(&spec.track_name) {
                return Err(RelayErrorKind::NameInUse(spec.track_name));
            }
        }

        let stripped = spec.rtp_url.strip_prefix("rtp://").unwrap_or(&spec.rtp_url);
        let bind_addr: SocketAddr = stripped
            .parse()
            .map_err(|_| RelayErrorKind::BadUrl(spec.rtp_url.clone()))?;

        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| RelayErrorKind::BindError(e.to_string()))?;

        let local_track = Arc::new(RtpLocalTrack::new(spec.track_name.clone()));
        let exit_signal = UnblockSignal::new();
        let read_buffer_size = spec.read_buffer_size.max(1);

        let reader_track = local_track.clone();
        let reader_exit = exit_signal.get_signal();
        let reader_name = spec.track_name.clone();
        let handle = tokio::spawn(async move {
            let mut buf = vec![0u8; read_buffer_size];
            loop {
                tokio::select! {
                    _ = reader_exit.wait() => {
                        log::debug!("rtp media source {reader_name} reader exiting");
                        break;
                    }
                    result = socket.recv(&mut buf) => {
                        match result {
                            Ok(n) => {
                                if let Err(e) = reader_track.write_rtp(&buf[..n]) {
                                    log::warn!("rtp media source {reader_name} write_rtp failed: {e}");
                                }
                            }
                            Err(e) => {
                                log::error!("rtp media source {reader_name} recv error: {e}");
                                break;
                            }
                        }
                    }
                }
            }
        });

        let source = Arc::new(MediaSource {
            track_name: spec.track_name.clone(),
            kind: spec.kind,
            mime_type: spec.mime_type,
            rtp_bind_addr: bind_addr,
            local_track,
            consumers: RwLock::new(HashSet::new()),
            exit_signal,
            reader_handle: tokio::sync::Mutex::new(Some(handle)),
        });

        self.sources
            .write()
            .await
            .insert(spec.track_name, source.clone());
        Ok(source)
    }

    pub async fn get(&self, name: &str) -> Option<Arc<MediaSource>> {
        self.sources.read().await.get(name).cloned()
    }

    /// Detaches `peer_id` from every registered source's consumer set. Used when a
    /// peer's media conn closes and the caller no longer knows which track names it
    /// was attached to (that detail lives inside `RelayPeer`'s own session map, I4).
    pub async fn remove_consumer_everywhere(&self, peer_id: &str) {
        for source in self.sources.read().await.values() {
            source.remove_consumer(peer_id).await;
        }
    }

    /// Detaches `name` from the registry, optionally closing its UDP socket and
    /// terminating the reader task.
    pub async fn remove(&self, name: &str, close: bool) -> Option<Arc<MediaSource>> {
        let removed = self.sources.write().await.remove(name);
        if close {
            if let Some(source) = &removed {
                source.close().await;
            }
        }
        removed
    }

    /// Closes every registered source's UDP listener and reader task, then empties
    /// the registry. Called on kernel shutdown so no reader task outlives the process.
    pub async fn close_all(&self) {
        let sources: Vec<_> = self.sources.write().await.drain().map(|(_, s)| s).collect();
        for source in sources {
            source.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TrackKind;

    #[tokio::test]
    async fn add_then_get_round_trips() {
        let registry = MediaTrackRegistry::new();
        let spec = RtpSourceSpec {
            track_name: "cam0".into(),
            kind: TrackKind::Video,
            mime_type: "video/h264".into(),
            rtp_url: "127.0.0.1:0".into(),
            read_buffer_size: super::super::DEFAULT_READ_BUFFER_SIZE,
        };
        let source = registry.add_rtp_source(spec).await.unwrap();
        assert_eq!(source.track_name, "cam0");
        assert!(registry.get("cam0").await.is_some());
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected() {
        let registry = MediaTrackRegistry::new();
        let spec = |port: u16| RtpSourceSpec {
            track_name: "cam0".into(),
            kind: TrackKind::Video,
            mime_type: "video/h264".into(),
            rtp_url: format!("127.0.0.1:{port}"),
            read_buffer_size: 1600,
        };
        registry.add_rtp_source(spec(0)).await.unwrap();
        let err = registry.add_rtp_source(spec(0)).await.unwrap_err();
        assert_eq!(err, RelayErrorKind::NameInUse("cam0".into()));
    }

    #[tokio::test]
    async fn bad_url_is_rejected() {
        let registry = MediaTrackRegistry::new();
        let spec = RtpSourceSpec {
            track_name: "cam1".into(),
            kind: TrackKind::Audio,
            mime_type: "audio/ogg".into(),
            rtp_url: "not-a-url".into(),
            read_buffer_size: 1600,
        };
        assert!(matches!(
            registry.add_rtp_source(spec).await,
            Err(RelayErrorKind::BadUrl(_))
        ));
    }

    #[tokio::test]
    async fn remove_without_close_keeps_reader_alive() {
        let registry = MediaTrackRegistry::new();
        let spec = RtpSourceSpec {
            track_name: "cam2".into(),
            kind: TrackKind::Video,
            mime_type: "video/h264".into(),
            rtp_url: "127.0.0.1:0".into(),
            read_buffer_size: 1600,
        };
        registry.add_rtp_source(spec).await.unwrap();
        let removed = registry.remove("cam2", false).await;
        assert!(removed.is_some());
        assert!(registry.get("cam2").await.is_none());
    }

    #[tokio::test]
    async fn consumers_can_be_tracked() {
        let registry = MediaTrackRegistry::new();
        let spec = RtpSourceSpec {
            track_name: "cam3".into(),
            kind: TrackKind::Video,
            mime_type: "video/h264".into(),
            rtp_url: "127.0.0.1:0".into(),
            read_buffer_size: 1600,
        };
        let source = registry.add_rtp_source(spec).await.unwrap();
        source.add_consumer("peer-a").await;
        source.add_consumer("peer-b").await;
        assert_eq!(source.consumer_peer_ids().await.len(), 2);
        source.remove_consumer("peer-a").await;
        assert_eq!(source.consumer_peer_ids().await, vec!["peer-b".to_string()]);
    }
}
