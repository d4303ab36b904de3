//! Segmented H.264 container used on the vendor binary transport.
//!
//! One frame per access unit:
//!
//! ```text
//! offset  size  field
//!  0      4     magic "DHAV"
//!  4      1     frame type (0xFD key, 0xFC delta)
//!  5      1     subtype (0)
//!  6      1     channel
//!  7      1     frame sub-number (0)
//!  8      4     frame number (LE)
//! 12      4     payload length (LE): extension tags + NAL data
//! 16      4     packed local time (LE)
//! 20      2     milliseconds (LE)
//! 22      1     extension length (12)
//! 23      1     checksum: sum of bytes 0..23 mod 256
//! 24      6     0x82 0x04 width(LE16) height(LE16)
//! 30      6     0x81 0x04 codec(0x02) fps 0x00 0x00
//! 36      n     NAL units, each prefixed with 00 00 00 01
//! 36+n    4     footer "dhav"
//! ```

use chrono::{Datelike, NaiveDateTime, Timelike};

use super::h264::{NalUnit, to_annex_b};

pub const FRAME_MAGIC: &[u8; 4] = b"DHAV";
pub const FRAME_FOOTER: &[u8; 4] = b"dhav";
pub const KEY_FRAME_TYPE: u8 = 0xFD;
pub const DELTA_FRAME_TYPE: u8 = 0xFC;

const HEADER_LEN: usize = 24;
const EXTENSION_LEN: u8 = 12;
const TAG_RESOLUTION: u8 = 0x82;
const TAG_CODEC: u8 = 0x81;
const CODEC_H264: u8 = 0x02;

/// Pack a wall-clock time into the 32-bit container timestamp:
/// seconds (6 bits), minutes (6), hours (5), day (5), month (4),
/// years since 2000 (6).
pub fn pack_timestamp(time: &NaiveDateTime) -> u32 {
    let year = (time.year() - 2000).clamp(0, 63) as u32;
    time.second()
        | (time.minute() << 6)
        | (time.hour() << 12)
        | (time.day() << 17)
        | (time.month() << 22)
        | (year << 26)
}

#[derive(Debug, Clone)]
pub struct ContainerFrame {
    pub frame_number: u32,
    pub channel: u8,
    pub is_key_frame: bool,
    pub timestamp: NaiveDateTime,
    pub width: u16,
    pub height: u16,
    pub frame_rate: u8,
    payload: Vec<u8>,
}

impl ContainerFrame {
    /// Build a frame from one access unit. The key flag is set when any unit
    /// is an IDR slice or SPS.
    pub fn from_access_unit(
        units: &[NalUnit],
        frame_number: u32,
        channel: u8,
        timestamp: NaiveDateTime,
        width: u16,
        height: u16,
        frame_rate: u8,
    ) -> Self {
        let payload = to_annex_b(units);

        Self {
            frame_number,
            channel,
            is_key_frame: units.iter().any(NalUnit::is_key_frame),
            timestamp,
            width,
            height,
            frame_rate,
            payload,
        }
    }

    /// Annex B payload carried by this frame.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Declared payload length: extension tags plus NAL data.
    pub fn payload_len(&self) -> u32 {
        (usize::from(EXTENSION_LEN) + self.payload.len()) as u32
    }

    fn header(&self) -> [u8; HEADER_LEN] {
        let mut header = [0u8; HEADER_LEN];
        header[0..4].copy_from_slice(FRAME_MAGIC);
        header[4] = if self.is_key_frame {
            KEY_FRAME_TYPE
        } else {
            DELTA_FRAME_TYPE
        };
        header[6] = self.channel;
        header[8..12].copy_from_slice(&self.frame_number.to_le_bytes());
        header[12..16].copy_from_slice(&self.payload_len().to_le_bytes());
        header[16..20].copy_from_slice(&pack_timestamp(&self.timestamp).to_le_bytes());
        let millis = (self.timestamp.nanosecond() / 1_000_000).min(999) as u16;
        header[20..22].copy_from_slice(&millis.to_le_bytes());
        header[22] = EXTENSION_LEN;
        header[23] = header[..23].iter().fold(0u8, |sum, b| sum.wrapping_add(*b));
        header
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload_len() as usize + 4);
        out.extend_from_slice(&self.header());

        out.push(TAG_RESOLUTION);
        out.push(4);
        out.extend_from_slice(&self.width.to_le_bytes());
        out.extend_from_slice(&self.height.to_le_bytes());

        out.extend_from_slice(&[TAG_CODEC, 4, CODEC_H264, self.frame_rate, 0, 0]);

        out.extend_from_slice(&self.payload);
        out.extend_from_slice(FRAME_FOOTER);
        out
    }
}
