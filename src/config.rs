//! Typed configuration: JSON file, defaults, and a `clap`-derived CLI overlay,
//! mirroring the origin program's `flag.StringVar("configFile", ...)` entrypoint.

use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

/// `webrtc-relay --config-file <path> --log-level <level>`
#[derive(Parser, Debug)]
#[command(name = "webrtc-relay", about = "Headless WebRTC relay kernel")]
pub struct Cli {
    #[arg(long, value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerInitSpec {
    pub relay_peer_number: u32,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default = "default_true")]
    pub secure: bool,
    #[serde(default)]
    pub ice_servers: Vec<String>,
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
    #[serde(default)]
    pub local_server_command: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub peers: Vec<PeerInitSpec>,
    #[serde(default = "default_base_peer_id")]
    pub base_peer_id: String,
    #[serde(default)]
    pub memorable_peer_id: bool,
    #[serde(default = "default_one")]
    pub peer_id_offset: u64,
    #[serde(default = "default_token_file")]
    pub token_file: PathBuf,
    #[serde(default = "default_rpc_address")]
    pub rpc_address: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub legacy_metadata_channel: Option<LegacyMetadataConfig>,
    #[serde(default)]
    pub media_sources: Vec<MediaSourceSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyMetadataConfig {
    pub inbound_pipe: PathBuf,
    pub outbound_pipe: PathBuf,
    #[serde(default = "default_separator")]
    pub separator: String,
}

/// One named RTP ingress to register with the `MediaTrackRegistry` at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaSourceSpec {
    pub track_name: String,
    pub kind: MediaSourceKind,
    pub mime_type: String,
    /// `[rtp://]host:port` to bind a UDP listener on.
    pub rtp_url: String,
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaSourceKind {
    Video,
    Audio,
}

fn default_read_buffer_size() -> usize {
    crate::media::DEFAULT_READ_BUFFER_SIZE
}

fn default_host() -> String {
    "0.peerjs.com".to_string()
}
fn default_port() -> u16 {
    443
}
fn default_path() -> String {
    "/".to_string()
}
fn default_true() -> bool {
    true
}
fn default_ping_interval() -> u64 {
    5000
}
fn default_base_peer_id() -> String {
    "relay-".to_string()
}
fn default_one() -> u64 {
    1
}
fn default_token_file() -> PathBuf {
    PathBuf::from("tokens.json")
}
fn default_rpc_address() -> String {
    "http://0.0.0.0:50051".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_separator() -> String {
    "|\"|".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            peers: Vec::new(),
            base_peer_id: default_base_peer_id(),
            memorable_peer_id: false,
            peer_id_offset: default_one(),
            token_file: default_token_file(),
            rpc_address: default_rpc_address(),
            log_level: default_log_level(),
            legacy_metadata_channel: None,
            media_sources: Vec::new(),
        }
    }
}

impl Config {
    /// Loads defaults, overlays the JSON config file (if given), then overlays CLI
    /// flags — the layering order the origin program's flag parsing implies.
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let mut config = match &cli.config_file {
            Some(path) => {
                let bytes = std::fs::read(path)
                    .map_err(|e| anyhow::anyhow!("failed to read config file {path:?}: {e}"))?;
                serde_json::from_slice(&bytes)
                    .map_err(|e| anyhow::anyhow!("failed to parse config file {path:?}: {e}"))?
            }
            None => Config::default(),
        };

        if let Some(level) = &cli.log_level {
            config.log_level = level.clone();
        }

        Ok(config)
    }

    /// Transport scheme for the RPC bind address: the literal first seven characters,
    /// either `http://` (TCP) or `unix://` (local socket).
    pub fn rpc_scheme(&self) -> &str {
        let addr = &self.rpc_address;
        if addr.len() >= 7 {
            &addr[..7]
        } else {
            addr
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.peer_id_offset, 1);
        assert!(config.peers.is_empty());
    }

    #[test]
    fn scheme_is_first_seven_chars() {
        let mut config = Config::default();
        config.rpc_address = "unix:///tmp/relay.sock".to_string();
        assert_eq!(config.rpc_scheme(), "unix://");

        config.rpc_address = "http://0.0.0.0:9000".to_string();
        assert_eq!(config.rpc_scheme(), "http://");
    }

    #[test]
    fn parses_minimal_json_with_field_defaults() {
        let json = r#"{"peers": [{"relay_peer_number": 1}]}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.peers.len(), 1);
        assert_eq!(config.peers[0].host, "0.peerjs.com");
        assert_eq!(config.peers[0].port, 443);
    }

    #[test]
    fn parses_media_sources_with_defaulted_buffer_size() {
        let json = r#"{"media_sources": [
            {"track_name": "cam0", "kind": "video", "mime_type": "video/h264", "rtp_url": "127.0.0.1:5000"}
        ]}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.media_sources.len(), 1);
        assert_eq!(config.media_sources[0].kind, MediaSourceKind::Video);
        assert_eq!(config.media_sources[0].read_buffer_size, crate::media::DEFAULT_READ_BUFFER_SIZE);
    }
}
