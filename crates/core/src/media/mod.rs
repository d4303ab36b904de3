//! Media production and packetization.
//!
//! Two kinds of [`MediaFeed`] share this module:
//!
//! - **Rendered JPEG**: a still of the current weight is rendered per frame
//!   and split into RFC 2435 RTP packets by [`jpeg::JpegPacketizer`].
//! - **Encoded H.264**: an external encoder's Annex B stream is split into
//!   NAL units ([`h264`]) and fanned out to every attached client
//!   ([`fanout`]) by a single [`framer`] thread. RTSP clients get RFC 6184
//!   packets from [`h264::H264Packetizer`]; the vendor protocol wraps each
//!   access unit in a [`container::ContainerFrame`].
//!
//! Pixel generation lives behind the [`encoder::FrameRenderer`] and
//! [`encoder::StreamSource`] traits.

use std::sync::Arc;

use crate::weight::WeightBoard;

pub mod container;
pub mod encoder;
pub mod fanout;
pub mod framer;
pub mod h264;
pub mod jpeg;
pub mod rtp;

/// Where an RTSP session's frames come from.
#[derive(Clone)]
pub enum MediaFeed {
    /// A JPEG of the current weight, rendered for every frame.
    Jpeg {
        renderer: Arc<dyn encoder::FrameRenderer>,
        board: WeightBoard,
    },
    /// Access units from a running H.264 encoder.
    H264(fanout::NalFanout),
}

/// Codec-specific RTP packetizer.
///
/// Each implementation provides:
/// - **Packetization**: splitting one encoded frame into RTP packets
/// - **SDP attributes**: codec parameters for the DESCRIBE response
/// - **RTP metadata**: payload type, clock rate, sequence/timestamp state
///
/// The generic RTP header is handled by [`rtp::RtpHeader`]; packetizers
/// compose it rather than reimplementing header serialization.
pub trait Packetizer: Send {
    /// Packetize one encoded frame into RTP packets.
    ///
    /// Each returned `Vec<u8>` is a complete RTP packet: 12-byte header
    /// (RFC 3550 §5.1) followed by the codec-specific payload.
    ///
    /// `timestamp_increment` advances the RTP timestamp after this frame,
    /// typically `clock_rate / fps` (e.g. 3000 for 30 fps at 90 kHz).
    fn packetize(&mut self, encoded_data: &[u8], timestamp_increment: u32) -> Vec<Vec<u8>>;

    /// Codec name for the SDP `a=rtpmap` attribute (e.g. `"JPEG"`).
    fn codec_name(&self) -> &'static str;

    /// RTP clock rate in Hz.
    fn clock_rate(&self) -> u32;

    /// RTP payload type number (RFC 3551).
    fn payload_type(&self) -> u8;

    /// SDP media-level attribute lines, each with the `a=` prefix.
    fn sdp_attributes(&self) -> Vec<String>;

    /// Sequence number of the next packet (for the `RTP-Info` header).
    fn next_sequence(&self) -> u16;

    /// RTP timestamp of the next frame (for the `RTP-Info` header).
    fn next_rtp_timestamp(&self) -> u32;
}
