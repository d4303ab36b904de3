//! JPEG RTP packetizer (RFC 2435).
//!
//! Each rendered JPEG frame is split into RTP packets carrying:
//!
//! ```text
//! RTP header          12 bytes (PT 26, marker on the last fragment)
//! JPEG header          8 bytes
//!   type-specific (0) | fragment offset (24-bit BE)
//!   type (1)          | Q (255) | width/8 | height/8
//! Quantization header  4 bytes + tables, first fragment only
//!   MBZ (0) | precision | length (16-bit BE)
//! Scan data           <= 1400 bytes
//! ```
//!
//! Q = 255 means the quantization tables travel in-band, so the receiver
//! never has to guess the encoder's quality setting. Tables are read from
//! the frame's own DQT segments every time because the renderer may change
//! them between frames.

use super::Packetizer;
use super::rtp::RtpHeader;

/// Static RTP payload type for JPEG (RFC 3551 §6).
pub const JPEG_PAYLOAD_TYPE: u8 = 26;

const CLOCK_RATE: u32 = 90_000;
const MAX_FRAGMENT: usize = 1400;
/// RFC 2435 type 1: 4:2:0 chroma subsampling.
const JPEG_TYPE: u8 = 1;
const Q_TABLES_INLINE: u8 = 255;

const MARKER_SOI: u8 = 0xD8;
const MARKER_DQT: u8 = 0xDB;
const MARKER_SOS: u8 = 0xDA;

/// Quantization tables concatenated in the order they appear in the frame,
/// with the per-table precision/id byte stripped.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct QuantizationTables {
    pub data: Vec<u8>,
    /// Bit `i` is set when table `i` uses 16-bit coefficients.
    pub precision: u8,
}

/// Header layout of one JPEG frame: where the scan starts and which tables
/// precede it.
#[derive(Debug)]
pub struct JpegLayout {
    pub scan_offset: usize,
    pub tables: QuantizationTables,
}

impl JpegLayout {
    /// Walk the marker segments up to and including SOS.
    ///
    /// Returns `None` if the data is not a baseline JPEG or is truncated
    /// before the scan.
    pub fn parse(jpeg: &[u8]) -> Option<Self> {
        if jpeg.len() < 4 || jpeg[0] != 0xFF || jpeg[1] != MARKER_SOI {
            return None;
        }

        let mut tables = QuantizationTables::default();
        let mut table_count = 0u32;
        let mut pos = 2;

        while pos + 4 <= jpeg.len() {
            if jpeg[pos] != 0xFF {
                return None;
            }
            let marker = jpeg[pos + 1];
            // Fill bytes and standalone markers carry no length field.
            if marker == 0xFF {
                pos += 1;
                continue;
            }
            if marker == 0x01 || (0xD0..=0xD7).contains(&marker) {
                pos += 2;
                continue;
            }

            let length = u16::from_be_bytes([jpeg[pos + 2], jpeg[pos + 3]]) as usize;
            let segment_end = pos + 2 + length;
            if length < 2 || segment_end > jpeg.len() {
                return None;
            }

            match marker {
                MARKER_DQT => {
                    let mut table_pos = pos + 4;
                    while table_pos < segment_end {
                        let sixteen_bit = jpeg[table_pos] >> 4 != 0;
                        let size = if sixteen_bit { 128 } else { 64 };
                        let start = table_pos + 1;
                        if start + size > segment_end {
                            return None;
                        }
                        tables.data.extend_from_slice(&jpeg[start..start + size]);
                        if sixteen_bit && table_count < 8 {
                            tables.precision |= 1 << table_count;
                        }
                        table_count += 1;
                        table_pos = start + size;
                    }
                }
                MARKER_SOS => {
                    return Some(Self {
                        scan_offset: segment_end,
                        tables,
                    });
                }
                _ => {}
            }

            pos = segment_end;
        }

        None
    }
}

/// RFC 2435 packetizer holding one client's RTP state.
#[derive(Debug)]
pub struct JpegPacketizer {
    header: RtpHeader,
    width: u16,
    height: u16,
    frame_rate: u32,
    max_fragment: usize,
}

impl JpegPacketizer {
    pub fn new(header: RtpHeader, width: u16, height: u16, frame_rate: u32) -> Self {
        Self {
            header,
            width,
            height,
            frame_rate,
            max_fragment: MAX_FRAGMENT,
        }
    }

    /// Packetizer with random SSRC, sequence and timestamp origin.
    pub fn with_random_state(width: u16, height: u16, frame_rate: u32) -> Self {
        Self::new(
            RtpHeader::with_random_state(JPEG_PAYLOAD_TYPE),
            width,
            height,
            frame_rate,
        )
    }

    fn blocks(pixels: u16) -> u8 {
        (pixels / 8).min(255) as u8
    }
}

impl Packetizer for JpegPacketizer {
    fn packetize(&mut self, encoded_data: &[u8], timestamp_increment: u32) -> Vec<Vec<u8>> {
        let Some(layout) = JpegLayout::parse(encoded_data) else {
            tracing::warn!(len = encoded_data.len(), "frame is not a baseline JPEG, dropped");
            return Vec::new();
        };

        let scan = &encoded_data[layout.scan_offset..];
        let tables = &layout.tables;
        let mut packets = Vec::with_capacity(scan.len().div_ceil(self.max_fragment));
        let mut offset = 0usize;

        while offset < scan.len() {
            let chunk = (scan.len() - offset).min(self.max_fragment);
            let last = offset + chunk == scan.len();
            let first = offset == 0;

            let mut packet = Vec::with_capacity(12 + 8 + 4 + tables.data.len() + chunk);
            packet.extend_from_slice(&self.header.write(last));

            packet.push(0);
            packet.extend_from_slice(&(offset as u32).to_be_bytes()[1..4]);
            packet.push(JPEG_TYPE);
            packet.push(Q_TABLES_INLINE);
            packet.push(Self::blocks(self.width));
            packet.push(Self::blocks(self.height));

            if first && !tables.data.is_empty() {
                packet.push(0);
                packet.push(tables.precision);
                packet.extend_from_slice(&(tables.data.len() as u16).to_be_bytes());
                packet.extend_from_slice(&tables.data);
            }

            packet.extend_from_slice(&scan[offset..offset + chunk]);
            packets.push(packet);
            offset += chunk;
        }

        self.header.advance_timestamp(timestamp_increment);
        packets
    }

    fn codec_name(&self) -> &'static str {
        "JPEG"
    }

    fn clock_rate(&self) -> u32 {
        CLOCK_RATE
    }

    fn payload_type(&self) -> u8 {
        JPEG_PAYLOAD_TYPE
    }

    fn sdp_attributes(&self) -> Vec<String> {
        vec![
            format!("a=rtpmap:{} {}/{}", JPEG_PAYLOAD_TYPE, self.codec_name(), CLOCK_RATE),
            format!("a=framerate:{}", self.frame_rate),
            format!("a=framesize:{} {}-{}", JPEG_PAYLOAD_TYPE, self.width, self.height),
            "a=control:trackID=0".to_string(),
        ]
    }

    fn next_sequence(&self) -> u16 {
        self.header.sequence()
    }

    fn next_rtp_timestamp(&self) -> u32 {
        self.header.timestamp()
    }
}
