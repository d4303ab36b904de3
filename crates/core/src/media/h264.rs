//! H.264 Annex B parsing and RTP packetization (RFC 6184).
//!
//! Annex B bitstreams delimit NAL units with start codes:
//! - 4-byte: `0x00 0x00 0x00 0x01`
//! - 3-byte: `0x00 0x00 0x01`
//!
//! The encoder pipe delivers the stream in arbitrary chunks, so
//! [`AnnexBScanner`] only emits a unit once the next start code has been
//! seen and keeps the trailing partial unit for the following read.
//! [`AccessUnitAssembler`] regroups the units into pictures for RTP, where
//! every packet of one picture shares a timestamp.

use std::mem;
use std::sync::Arc;

use base64::prelude::{BASE64_STANDARD, Engine as _};

use super::Packetizer;
use super::rtp::RtpHeader;

/// NAL unit type 5: coded slice of an IDR picture.
pub const NAL_IDR: u8 = 5;
/// NAL unit type 7: sequence parameter set.
pub const NAL_SPS: u8 = 7;
/// NAL unit type 8: picture parameter set.
pub const NAL_PPS: u8 = 8;
/// FU-A fragmentation unit (RFC 6184 §5.8).
const NAL_FU_A: u8 = 28;

/// Dynamic RTP payload type used for H.264.
pub const H264_PAYLOAD_TYPE: u8 = 96;
const CLOCK_RATE: u32 = 90_000;
const DEFAULT_MTU: usize = 1400;
/// Constrained baseline, level 3.1; advertised until an SPS is seen.
const DEFAULT_PROFILE_LEVEL_ID: &str = "42C01F";
const START_CODE: [u8; 4] = [0, 0, 0, 1];
/// An access unit that never sees a slice is dropped past this size.
const MAX_PENDING_UNITS: usize = 256;

/// One NAL unit without its start code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NalUnit {
    data: Arc<[u8]>,
}

impl NalUnit {
    pub fn new(data: &[u8]) -> Self {
        Self {
            data: Arc::from(data),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// `nal_unit_type` from the low five bits of the header byte.
    pub fn nal_type(&self) -> u8 {
        self.data.first().map_or(0, |b| b & 0x1f)
    }

    /// IDR slices and SPS mark the start of an independently decodable frame.
    pub fn is_key_frame(&self) -> bool {
        matches!(self.nal_type(), NAL_IDR | NAL_SPS)
    }

    /// Coded slice of a picture (types 1 to 5).
    pub fn is_slice(&self) -> bool {
        matches!(self.nal_type(), 1..=5)
    }

    /// Whether this unit can only belong to a new access unit once the
    /// current one holds a slice (ISO/IEC 14496-10 §7.4.1.2.3). A slice
    /// starts a picture when `first_mb_in_slice` is 0, whose Exp-Golomb
    /// code is a single set bit.
    fn opens_access_unit(&self) -> bool {
        match self.nal_type() {
            6..=9 => true,
            1..=5 => self.data.get(1).is_some_and(|b| b & 0x80 != 0),
            _ => false,
        }
    }
}

/// Serialize units back to Annex B with 4-byte start codes.
pub fn to_annex_b(units: &[NalUnit]) -> Vec<u8> {
    let size: usize = units.iter().map(|u| START_CODE.len() + u.len()).sum();
    let mut out = Vec::with_capacity(size);
    for unit in units {
        out.extend_from_slice(&START_CODE);
        out.extend_from_slice(unit.data());
    }
    out
}

/// Positions of every start code as `(offset, start_code_len)`.
fn start_codes(data: &[u8]) -> Vec<(usize, usize)> {
    let mut found = Vec::new();
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 {
            if data[i + 2] == 1 {
                found.push((i, 3));
                i += 3;
                continue;
            }
            if i + 4 <= data.len() && data[i + 2] == 0 && data[i + 3] == 1 {
                found.push((i, 4));
                i += 4;
                continue;
            }
        }
        i += 1;
    }
    found
}

/// Split a complete Annex B buffer into NAL units.
pub fn extract_nal_units(data: &[u8]) -> Vec<NalUnit> {
    let codes = start_codes(data);
    codes
        .iter()
        .enumerate()
        .filter_map(|(idx, &(pos, len))| {
            let start = pos + len;
            let end = codes.get(idx + 1).map_or(data.len(), |&(next, _)| next);
            (start < end).then(|| NalUnit::new(&data[start..end]))
        })
        .collect()
}

/// Streaming Annex B splitter.
#[derive(Debug, Default)]
pub struct AnnexBScanner {
    buffer: Vec<u8>,
}

impl AnnexBScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every unit that is now complete.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<NalUnit> {
        self.buffer.extend_from_slice(chunk);

        let codes = start_codes(&self.buffer);
        let Some(&(last_pos, _)) = codes.last() else {
            // Keep just enough to recognise a start code split across reads.
            let keep = self.buffer.len().min(3);
            self.buffer.drain(..self.buffer.len() - keep);
            return Vec::new();
        };

        let units = codes
            .windows(2)
            .filter_map(|pair| {
                let (pos, len) = pair[0];
                let (next, _) = pair[1];
                let start = pos + len;
                (start < next).then(|| NalUnit::new(&self.buffer[start..next]))
            })
            .collect();

        self.buffer.drain(..last_pos);
        units
    }

    /// Bytes held back waiting for the next start code.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partial unit, e.g. after the producer restarted.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

/// Regroups a unit stream into access units.
///
/// A picture is only known to be complete when the first unit of the next
/// one arrives, so output lags the input by one access unit.
#[derive(Debug, Default)]
pub struct AccessUnitAssembler {
    pending: Vec<NalUnit>,
    has_slice: bool,
}

impl AccessUnitAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one unit. Returns the previous access unit if `unit` opens a
    /// new one.
    pub fn push(&mut self, unit: NalUnit) -> Option<Vec<NalUnit>> {
        let complete = if self.has_slice && unit.opens_access_unit() {
            self.has_slice = false;
            Some(mem::take(&mut self.pending))
        } else {
            None
        };

        if !self.has_slice && self.pending.len() >= MAX_PENDING_UNITS {
            tracing::warn!(units = self.pending.len(), "no slice data in stream, units dropped");
            self.pending.clear();
        }
        self.has_slice |= unit.is_slice();
        self.pending.push(unit);
        complete
    }
}

/// H.264 RTP packetizer (RFC 6184).
///
/// - **Single NAL Unit** (§5.6): a unit that fits within the MTU is sent
///   as-is after the 12-byte RTP header.
/// - **FU-A** (§5.8): larger units are split. Each fragment starts with
///   `[F|NRI|28]` and `[S|E|R|type]` before up to `MTU - 2` payload bytes.
///
/// The marker bit is set on the last packet of an access unit. SPS and PPS
/// are taken from the constructor or captured from the first frame that
/// carries them; they feed `profile-level-id` and `sprop-parameter-sets`.
#[derive(Debug)]
pub struct H264Packetizer {
    header: RtpHeader,
    mtu: usize,
    frame_rate: u32,
    sps: Option<NalUnit>,
    pps: Option<NalUnit>,
}

impl H264Packetizer {
    pub fn new(header: RtpHeader, frame_rate: u32) -> Self {
        Self {
            header,
            mtu: DEFAULT_MTU,
            frame_rate,
            sps: None,
            pps: None,
        }
    }

    /// Packetizer with random SSRC, sequence and timestamp origin.
    pub fn with_random_state(frame_rate: u32) -> Self {
        Self::new(RtpHeader::with_random_state(H264_PAYLOAD_TYPE), frame_rate)
    }

    pub fn set_parameter_sets(&mut self, sps: NalUnit, pps: NalUnit) {
        self.sps = Some(sps);
        self.pps = Some(pps);
    }

    /// Bytes 1 to 3 of the SPS: profile_idc, constraint flags, level_idc.
    fn profile_level_id(&self) -> String {
        match self.sps.as_ref().map(NalUnit::data) {
            Some(sps) if sps.len() >= 4 => format!("{:02X}{:02X}{:02X}", sps[1], sps[2], sps[3]),
            _ => DEFAULT_PROFILE_LEVEL_ID.to_string(),
        }
    }

    fn sprop_parameter_sets(&self) -> Option<String> {
        let sps = self.sps.as_ref()?;
        let pps = self.pps.as_ref()?;
        Some(format!(
            "{},{}",
            BASE64_STANDARD.encode(sps.data()),
            BASE64_STANDARD.encode(pps.data())
        ))
    }

    fn capture_parameter_sets(&mut self, units: &[NalUnit]) {
        for unit in units {
            match unit.nal_type() {
                NAL_SPS if self.sps.is_none() => {
                    tracing::debug!(len = unit.len(), "SPS captured from bitstream");
                    self.sps = Some(unit.clone());
                }
                NAL_PPS if self.pps.is_none() => {
                    tracing::debug!(len = unit.len(), "PPS captured from bitstream");
                    self.pps = Some(unit.clone());
                }
                _ => {}
            }
        }
    }

    fn packetize_nal(&mut self, nal: &[u8], last_in_frame: bool) -> Vec<Vec<u8>> {
        let Some((&nal_header, body)) = nal.split_first() else {
            return Vec::new();
        };

        if nal.len() <= self.mtu {
            let mut packet = Vec::with_capacity(12 + nal.len());
            packet.extend_from_slice(&self.header.write(last_in_frame));
            packet.extend_from_slice(nal);
            return vec![packet];
        }

        let fu_indicator = (nal_header & 0xE0) | NAL_FU_A;
        let nal_type = nal_header & 0x1F;
        let max_fragment = self.mtu - 2;
        let fragments = body.len().div_ceil(max_fragment);

        let packets: Vec<Vec<u8>> = body
            .chunks(max_fragment)
            .enumerate()
            .map(|(i, chunk)| {
                let first = i == 0;
                let last = i + 1 == fragments;
                let fu_header = (u8::from(first) << 7) | (u8::from(last) << 6) | nal_type;

                let mut packet = Vec::with_capacity(14 + chunk.len());
                packet.extend_from_slice(&self.header.write(last_in_frame && last));
                packet.push(fu_indicator);
                packet.push(fu_header);
                packet.extend_from_slice(chunk);
                packet
            })
            .collect();

        tracing::trace!(nal_type, nal_size = nal.len(), fragments, "FU-A fragmented NAL unit");
        packets
    }
}

impl Packetizer for H264Packetizer {
    /// `encoded_data` is one access unit in Annex B form.
    fn packetize(&mut self, encoded_data: &[u8], timestamp_increment: u32) -> Vec<Vec<u8>> {
        let units = extract_nal_units(encoded_data);
        if self.sps.is_none() || self.pps.is_none() {
            self.capture_parameter_sets(&units);
        }

        let mut packets = Vec::new();
        for (i, unit) in units.iter().enumerate() {
            packets.extend(self.packetize_nal(unit.data(), i + 1 == units.len()));
        }
        self.header.advance_timestamp(timestamp_increment);

        tracing::trace!(
            nal_count = units.len(),
            rtp_packets = packets.len(),
            seq = self.header.sequence(),
            ts = self.header.timestamp(),
            "access unit packetized"
        );
        packets
    }

    fn codec_name(&self) -> &'static str {
        "H264"
    }

    fn clock_rate(&self) -> u32 {
        CLOCK_RATE
    }

    fn payload_type(&self) -> u8 {
        self.header.pt
    }

    /// `a=rtpmap` must precede the `a=fmtp` line that refers to it.
    fn sdp_attributes(&self) -> Vec<String> {
        let pt = self.payload_type();
        let mut fmtp = format!(
            "a=fmtp:{pt} packetization-mode=1;profile-level-id={}",
            self.profile_level_id()
        );
        if let Some(sprop) = self.sprop_parameter_sets() {
            fmtp.push_str(&format!(";sprop-parameter-sets={sprop}"));
        }
        vec![
            format!("a=rtpmap:{pt} {}/{}", self.codec_name(), self.clock_rate()),
            fmtp,
            format!("a=framerate:{}", self.frame_rate),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_4byte_start_codes() {
        let data = [
            0x00, 0x00, 0x00, 0x01, 0x67, 0x42, // SPS
            0x00, 0x00, 0x00, 0x01, 0x68, 0xCE, // PPS
            0x00, 0x00, 0x00, 0x01, 0x65, 0x88, // IDR
        ];
        let nals = extract_nal_units(&data);
        assert_eq!(nals.len(), 3);
        assert_eq!(nals[0].data(), &[0x67, 0x42]);
        assert_eq!(nals[1].data(), &[0x68, 0xCE]);
        assert_eq!(nals[2].data(), &[0x65, 0x88]);
    }

    #[test]
    fn extract_3byte_start_codes() {
        let data = [0x00, 0x00, 0x01, 0x67, 0x42, 0x00, 0x00, 0x01, 0x68, 0xCE];
        let nals = extract_nal_units(&data);
        assert_eq!(nals.len(), 2);
        assert_eq!(nals[0].data(), &[0x67, 0x42]);
        assert_eq!(nals[1].data(), &[0x68, 0xCE]);
    }

    #[test]
    fn extract_empty_input() {
        assert!(extract_nal_units(&[]).is_empty());
    }

    #[test]
    fn key_frame_types() {
        assert!(NalUnit::new(&[0x65, 0x00]).is_key_frame());
        assert!(NalUnit::new(&[0x67, 0x00]).is_key_frame());
        assert!(!NalUnit::new(&[0x68, 0x00]).is_key_frame());
        assert!(!NalUnit::new(&[0x41, 0x00]).is_key_frame());
        assert_eq!(NalUnit::new(&[0x41]).nal_type(), 1);
    }

    #[test]
    fn scanner_retains_trailing_partial_unit() {
        let mut scanner = AnnexBScanner::new();
        let units = scanner.push(&[0, 0, 0, 1, 0x67, 0x42, 0, 0, 0, 1, 0x68]);
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].data(), &[0x67, 0x42]);
        assert_eq!(scanner.pending(), 5);

        let units = scanner.push(&[0xCE, 0, 0, 1, 0x65]);
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].data(), &[0x68, 0xCE]);
    }

    #[test]
    fn scanner_handles_start_code_split_across_chunks() {
        let mut scanner = AnnexBScanner::new();
        assert!(scanner.push(&[0, 0, 0, 1, 0x65, 0xAA, 0x00]).is_empty());
        assert!(scanner.push(&[0x00]).is_empty());
        let units = scanner.push(&[0x01, 0x41, 0xBB]);
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].data(), &[0x65, 0xAA]);
    }

    #[test]
    fn scanner_discards_leading_garbage() {
        let mut scanner = AnnexBScanner::new();
        assert!(scanner.push(&[9, 9, 9, 9, 9, 9]).is_empty());
        assert_eq!(scanner.pending(), 3);
        let units = scanner.push(&[0, 0, 1, 0x41, 0x01, 0, 0, 1, 0x41]);
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].data(), &[0x41, 0x01]);
    }

    #[test]
    fn scanner_reset_drops_partial() {
        let mut scanner = AnnexBScanner::new();
        scanner.push(&[0, 0, 1, 0x65, 0x01, 0x02]);
        assert!(scanner.pending() > 0);
        scanner.reset();
        assert_eq!(scanner.pending(), 0);
    }

    fn packetizer() -> H264Packetizer {
        H264Packetizer::new(RtpHeader::new(H264_PAYLOAD_TYPE, 0xAABBCCDD, 100, 0), 15)
    }

    fn unit(bytes: &[u8]) -> NalUnit {
        NalUnit::new(bytes)
    }

    #[test]
    fn small_units_are_single_packets_with_marker_on_last() {
        let mut p = packetizer();
        let frame = to_annex_b(&[unit(&[0x67, 0x42, 0xC0, 0x1F]), unit(&[0x65, 0x88, 0x84])]);
        let packets = p.packetize(&frame, 6000);
        assert_eq!(packets.len(), 2);
        assert_eq!(&packets[0][12..], &[0x67, 0x42, 0xC0, 0x1F]);
        assert_eq!(packets[0][1] & 0x80, 0);
        assert_eq!(packets[1][1], 0x80 | H264_PAYLOAD_TYPE);
        assert_eq!(u16::from_be_bytes([packets[1][2], packets[1][3]]), 101);
        assert_eq!(p.next_rtp_timestamp(), 6000);
    }

    #[test]
    fn large_unit_is_split_into_fu_a() {
        let mut p = packetizer();
        let mut nal = vec![0x65];
        nal.extend(std::iter::repeat_n(0xAA, DEFAULT_MTU + 500));
        let packets = p.packetize(&to_annex_b(&[unit(&nal)]), 6000);
        assert_eq!(packets.len(), 2);

        assert_eq!(packets[0][12], 0x60 | NAL_FU_A, "NRI kept, type 28");
        assert_eq!(packets[0][13], 0x80 | NAL_IDR, "start bit");
        assert_eq!(packets[0].len(), 12 + DEFAULT_MTU);
        assert_eq!(packets[0][1] & 0x80, 0);

        assert_eq!(packets[1][13], 0x40 | NAL_IDR, "end bit");
        assert_eq!(packets[1][1] & 0x80, 0x80, "marker on last fragment");
        let carried: usize = packets.iter().map(|p| p.len() - 14).sum();
        assert_eq!(carried, nal.len() - 1);
    }

    #[test]
    fn sdp_defaults_until_parameter_sets_are_known() {
        let p = packetizer();
        let attrs = p.sdp_attributes();
        assert_eq!(attrs[0], "a=rtpmap:96 H264/90000");
        assert_eq!(attrs[1], "a=fmtp:96 packetization-mode=1;profile-level-id=42C01F");
        assert_eq!(attrs[2], "a=framerate:15");
        assert_eq!(attrs[3], "a=control:trackID=0");
    }

    #[test]
    fn sdp_carries_captured_parameter_sets() {
        let mut p = packetizer();
        let frame = to_annex_b(&[
            unit(&[0x67, 0x4D, 0x40, 0x28]),
            unit(&[0x68, 0xEE, 0x3C, 0x80]),
            unit(&[0x65, 0x88]),
        ]);
        p.packetize(&frame, 6000);
        let fmtp = &p.sdp_attributes()[1];
        assert!(fmtp.contains("profile-level-id=4D4028"), "{fmtp}");
        assert!(fmtp.contains("sprop-parameter-sets=Z01AKA==,aO48gA=="), "{fmtp}");
    }

    #[test]
    fn assembler_splits_on_new_picture() {
        let mut assembler = AccessUnitAssembler::new();
        assert!(assembler.push(unit(&[0x67, 0x42])).is_none());
        assert!(assembler.push(unit(&[0x68, 0xCE])).is_none());
        assert!(assembler.push(unit(&[0x65, 0x88])).is_none());
        // Second slice of the same picture: first_mb_in_slice != 0.
        assert!(assembler.push(unit(&[0x65, 0x40])).is_none());

        let first = assembler.push(unit(&[0x67, 0x42])).expect("picture complete");
        assert_eq!(first.len(), 4);
        assert_eq!(first[0].nal_type(), NAL_SPS);

        assert!(assembler.push(unit(&[0x68, 0xCE])).is_none());
        assert!(assembler.push(unit(&[0x65, 0x88])).is_none());
        let second = assembler.push(unit(&[0x41, 0x9A])).expect("picture complete");
        assert_eq!(second.len(), 3);
    }
}
