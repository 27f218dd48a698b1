mod source;

pub use source::{MediaSource, MediaTrackRegistry};

use crate::protocol::TrackKind;

/// Typical MTU-sized receive buffer for RTP ingress, matching the teacher's origin
/// implementation's fixed read buffer size.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1600;

#[derive(Debug, Clone)]
pub struct RtpSourceSpec {
    pub track_name: String,
    pub kind: TrackKind,
    pub mime_type: String,
    pub rtp_url: String,
    pub read_buffer_size: usize,
}
