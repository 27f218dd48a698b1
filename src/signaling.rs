//! Trait abstraction over the external PeerJS-compatible signaling/ICE/DTLS/SCTP
//! engine. `RelayPeer` drives this trait and never touches ICE/DTLS/SCTP itself; a
//! concrete implementation (not part of this crate) wraps whatever library actually
//! speaks the PeerJS wire protocol and terminates media.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::RelayErrorKind;
use crate::protocol::{PeerId, RelayPeerOpts, TrackInfo};

/// A handle to a locally-sourced media track, as produced by
/// [`crate::media::MediaTrackRegistry`] and handed to `call_peer`/`add_track_to_call`.
pub trait LocalTrack: Send + Sync {
    fn track_id(&self) -> &str;
    /// Forwards one already-encoded RTP packet to every signaling session carrying
    /// this track. Implementations are expected to be cheap and non-blocking.
    fn write_rtp(&self, packet: &[u8]) -> anyhow::Result<()>;
}

/// A single data or media connection to one remote peer, owned by a `SignalingSession`.
#[async_trait]
pub trait SignalingConnection: Send + Sync {
    fn remote_peer_id(&self) -> &PeerId;
    fn is_open(&self) -> bool;
    async fn send(&self, payload: &[u8]) -> anyhow::Result<()>;
    async fn close(&self) -> anyhow::Result<()>;
}

/// Events a `SignalingSession` emits; `RelayPeer`'s main loop consumes a stream of
/// these and drives its state machine from them. Mirrors the `on(event, cb)` pattern
/// of the underlying signaling library, flattened into a channel of discrete events.
pub enum SignalingEvent {
    /// The session opened, possibly under a different id than requested (collision
    /// resolution by the signaling server).
    Open { assigned_peer_id: PeerId },
    /// A remote peer opened a data connection to us.
    Connection {
        remote_peer_id: PeerId,
        conn: Box<dyn SignalingConnection>,
    },
    /// A remote peer placed a call (media connection) to us.
    Call {
        remote_peer_id: PeerId,
        tracks: Vec<TrackInfo>,
        conn: Box<dyn SignalingConnection>,
    },
    /// Bytes arrived on an open data connection.
    Data {
        remote_peer_id: PeerId,
        payload: Vec<u8>,
    },
    /// A data or media connection to a remote peer closed.
    ConnectionClosed { remote_peer_id: PeerId },
    /// The signaling session reported a transient disconnect (will auto-reconnect).
    Disconnected,
    /// The signaling session was torn down server-side or by the transport.
    Destroyed,
    /// An out-of-band error, fatal or not per [`RelayErrorKind::is_fatal_signaling`].
    Error { kind: RelayErrorKind, message: String },
}

/// One signaling identity's live session against a signaling server.
#[async_trait]
pub trait SignalingSession: Send + Sync {
    /// Initiates a data connection to `remote_peer_id`.
    async fn connect_to(
        &self,
        remote_peer_id: &PeerId,
    ) -> anyhow::Result<Box<dyn SignalingConnection>>;

    /// Places a call carrying `track` to `remote_peer_id`.
    async fn call(
        &self,
        remote_peer_id: &PeerId,
        track: &dyn LocalTrack,
    ) -> anyhow::Result<Box<dyn SignalingConnection>>;

    /// Tears down the entire session: all data/media connections and the underlying
    /// transport.
    async fn destroy(&self) -> anyhow::Result<()>;

    /// Attempts to re-establish the underlying transport without changing peer-id.
    async fn reconnect(&self) -> anyhow::Result<()>;
}

/// Creates a fresh `SignalingSession` plus the event stream it will push to. Kept as
/// a separate trait from `SignalingSession` because session construction is where
/// the concrete library binds its own event callbacks onto the returned channel.
#[async_trait]
pub trait SignalingFactory: Send + Sync {
    async fn create_session(
        &self,
        opts: &RelayPeerOpts,
        peer_id: &str,
        token: &str,
    ) -> anyhow::Result<(Box<dyn SignalingSession>, mpsc::UnboundedReceiver<SignalingEvent>)>;
}

/// Placeholder `SignalingFactory` wired into the binary by default. The actual PeerJS
/// wire codec and ICE/DTLS/SCTP engine are an external collaborator outside this
/// crate's scope; a deployment links a real implementation of this trait in its place.
pub struct UnimplementedSignalingFactory;

#[async_trait]
impl SignalingFactory for UnimplementedSignalingFactory {
    async fn create_session(
        &self,
        opts: &RelayPeerOpts,
        _peer_id: &str,
        _token: &str,
    ) -> anyhow::Result<(Box<dyn SignalingSession>, mpsc::UnboundedReceiver<SignalingEvent>)> {
        anyhow::bail!(
            "no signaling engine configured for relay peer {} ({}); link a SignalingFactory implementation",
            opts.relay_peer_number,
            opts.host
        )
    }
}
