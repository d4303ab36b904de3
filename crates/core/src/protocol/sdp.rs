//! SDP (Session Description Protocol) generation (RFC 4566 / RFC 8866).
//!
//! Produces the SDP body returned by DESCRIBE responses:
//!
//! ```text
//! v=0                                          ← protocol version
//! o=- <unix-time> 1 IN IP4 <addr>              ← origin
//! s=<session-name>                             ← session name
//! i=Weight Display Stream                      ← session information
//! c=IN IP4 <addr>                              ← connection address
//! t=0 0                                        ← timing (live stream)
//! a=tool:ScaleStreamer                         ← server software
//! a=type:broadcast
//! a=range:npt=now-
//! m=video 0 RTP/AVP 26                         ← media description
//! a=rtpmap:26 JPEG/90000                       ← packetizer attributes
//! a=framerate:30
//! a=framesize:26 1920-1080
//! a=control:trackID=0
//! a=sendonly                                   ← direction
//! ```

use crate::media::Packetizer;

pub const SESSION_INFO: &str = "Weight Display Stream";
pub const TOOL: &str = "ScaleStreamer";

/// Generate an SDP session description for one video track.
pub fn generate_sdp(
    packetizer: &dyn Packetizer,
    host: &str,
    origin_session_id: u64,
    session_name: &str,
) -> String {
    let mut sdp: Vec<String> = Vec::new();

    sdp.push("v=0".to_string());
    sdp.push(format!("o=- {} 1 IN IP4 {}", origin_session_id, host));
    sdp.push(format!("s={}", session_name));
    sdp.push(format!("i={}", SESSION_INFO));
    sdp.push(format!("c=IN IP4 {}", host));
    sdp.push("t=0 0".to_string());
    sdp.push(format!("a=tool:{}", TOOL));
    sdp.push("a=type:broadcast".to_string());
    sdp.push("a=range:npt=now-".to_string());
    sdp.push(format!("m=video 0 RTP/AVP {}", packetizer.payload_type()));
    sdp.extend(packetizer.sdp_attributes());
    sdp.push("a=sendonly".to_string());

    tracing::debug!("SDP: {}", sdp.join("\r\n"));

    format!("{}\r\n", sdp.join("\r\n"))
}
