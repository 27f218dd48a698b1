//! Implements the `WebrtcRelay` gRPC service: unary verbs push a `Command` onto the
//! kernel's command bus and reply immediately, while `GetEventStream` subscribes to the
//! kernel's outbound event bus and forwards items until the client cancels.

use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};

use super::convert;
use super::pb;
use crate::config::Config;
use crate::kernel::RelayKernel;
use crate::protocol::Command;

pub struct RelayRpcService {
    kernel: Arc<RelayKernel>,
    defaults: Config,
}

impl RelayRpcService {
    pub fn new(kernel: Arc<RelayKernel>, defaults: Config) -> Self {
        Self { kernel, defaults }
    }

    async fn push(&self, cmd: Command) {
        self.kernel.command_bus().push(cmd).await;
    }
}

type EventStream = Pin<Box<dyn Stream<Item = Result<pb::RelayEvent, Status>> + Send + 'static>>;

#[tonic::async_trait]
impl pb::webrtc_relay_server::WebrtcRelay for RelayRpcService {
    type GetEventStreamStream = EventStream;

    async fn get_event_stream(
        &self,
        _request: Request<pb::Empty>,
    ) -> Result<Response<Self::GetEventStreamStream>, Status> {
        let sub = self.kernel.event_bus().subscribe().await;
        let stream = ReceiverStream::new(sub.into_inner()).map(|evt| Ok(convert::event_to_pb(evt)));
        Ok(Response::new(Box::pin(stream)))
    }

    async fn connect_to_peer(&self, request: Request<pb::PeerRequest>) -> Result<Response<pb::Ack>, Status> {
        let req = request.into_inner();
        self.push(Command::Connect {
            peer_id: req.peer_id,
            relay_peer_number: req.relay_peer_number,
            exchange_id: req.exchange_id,
        })
        .await;
        Ok(Response::new(pb::Ack { ok: true }))
    }

    async fn disconnect_from_peer(&self, request: Request<pb::PeerRequest>) -> Result<Response<pb::Ack>, Status> {
        let req = request.into_inner();
        self.push(Command::Disconnect {
            peer_id: req.peer_id,
            relay_peer_number: req.relay_peer_number,
            exchange_id: req.exchange_id,
        })
        .await;
        Ok(Response::new(pb::Ack { ok: true }))
    }

    async fn call_peer(&self, request: Request<pb::CallRequest>) -> Result<Response<pb::Ack>, Status> {
        let req = request.into_inner();
        self.push(Command::Call {
            peer_ids: req.peer_ids,
            relay_peer_number: req.relay_peer_number,
            track_names: req.tracks,
            exchange_id: req.exchange_id,
        })
        .await;
        Ok(Response::new(pb::Ack { ok: true }))
    }

    async fn hangup_peer(&self, request: Request<pb::PeerRequest>) -> Result<Response<pb::Ack>, Status> {
        let req = request.into_inner();
        self.push(Command::Hangup {
            peer_id: req.peer_id,
            relay_peer_number: req.relay_peer_number,
            exchange_id: req.exchange_id,
        })
        .await;
        Ok(Response::new(pb::Ack { ok: true }))
    }

    async fn send_msg_stream(&self, request: Request<Streaming<pb::SendMsgRequest>>) -> Result<Response<pb::Ack>, Status> {
        let mut stream = request.into_inner();
        while let Some(msg) = stream.message().await? {
            self.push(Command::SendMsg {
                peer_ids: msg.target_peer_ids,
                relay_peer_number: msg.relay_peer_number,
                payload: msg.payload.to_vec(),
                exchange_id: msg.exchange_id,
            })
            .await;
        }
        Ok(Response::new(pb::Ack { ok: true }))
    }

    /// Unlike the fire-and-forget verbs above, relay lifecycle changes reply with the
    /// outcome directly rather than through the event stream, since a caller adding or
    /// removing a relay needs to know synchronously whether it took effect.
    async fn add_relay_peer(&self, request: Request<pb::AddRelayRequest>) -> Result<Response<pb::RelayError>, Status> {
        let req = request.into_inner();
        let relay_peer_number = req.relay_peer_number;
        let exchange_id = req.exchange_id;
        let opts = convert::opts_from_request(req, &self.defaults);
        match self.kernel.connection_ctrl().add_relay(opts, exchange_id).await {
            Ok(()) => Ok(Response::new(pb::RelayError {
                kind: String::new(),
                message: String::new(),
                relay_peer_number,
            })),
            Err(e) => Ok(Response::new(pb::RelayError {
                kind: "UNKNOWN_ERROR".to_string(),
                message: e.to_string(),
                relay_peer_number,
            })),
        }
    }

    async fn close_relay_peer(&self, request: Request<pb::RelayPeerNumber>) -> Result<Response<pb::RelayError>, Status> {
        let rpn = request.into_inner().relay_peer_number;
        match self.kernel.connection_ctrl().stop_relay(rpn).await {
            Ok(()) => Ok(Response::new(pb::RelayError {
                kind: String::new(),
                message: String::new(),
                relay_peer_number: rpn,
            })),
            Err(e) => Ok(Response::new(pb::RelayError {
                kind: "UNKNOWN_ERROR".to_string(),
                message: e.to_string(),
                relay_peer_number: rpn,
            })),
        }
    }

    async fn get_relay_peer_config(
        &self,
        request: Request<pb::RelayPeerNumber>,
    ) -> Result<Response<pb::RelayConfig>, Status> {
        let rpn = request.into_inner().relay_peer_number;
        match self.kernel.connection_ctrl().get_relay_opts(rpn).await {
            Ok(opts) => Ok(Response::new(convert::opts_to_relay_config(opts))),
            Err(e) => Err(Status::not_found(e.to_string())),
        }
    }
}
