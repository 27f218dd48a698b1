//! The gRPC adapter: generated types live under `pb` and are converted to/from the
//! kernel's own `Command`/`Event` enums here, so the kernel itself has zero dependency
//! on the wire format.

pub mod pb {
    tonic::include_proto!("webrtc_relay");
}

mod convert;
mod server;

pub use server::RelayRpcService;
