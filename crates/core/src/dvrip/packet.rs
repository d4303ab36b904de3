//! 32-byte response headers for every reply layout on the vendor port.
//!
//! All multi-byte fields are little-endian. The common acknowledgement:
//!
//! ```text
//!  0  code | sub | 00 | 68
//!  4  payload length
//!  8  00 08 01 00          status: success
//! 12  00 00 00 00
//! 16  session id
//! 20  01 00 00 00
//! 24  06 00 F9 00 00 07 00 02
//! ```

use super::demux::{DHIP_MARKER, DHIP_TAG, HEADER_LEN, JSON_COMMAND};

const STATUS_OK: [u8; 4] = [0x00, 0x08, 0x01, 0x00];
const STATUS_CHALLENGE: [u8; 4] = [0x01, 0x0E, 0x01, 0x00];
const TRAILER_OK: [u8; 8] = [0x06, 0x00, 0xF9, 0x00, 0x00, 0x07, 0x00, 0x02];
const TRAILER_CHALLENGE: [u8; 8] = [0x06, 0x00, 0xF9, 0x00, 0x00, 0x00, 0x00, 0x02];

pub const LOGIN_REPLY: u8 = 0xB0;
pub const PROBE_REPLY: u8 = 0xB1;
pub const SYSINFO_REPLY: u8 = 0xB4;
pub const CHANNEL_INFO_REPLY: u8 = 0xB8;
pub const STREAM_REPLY: u8 = 0x69;
pub const TEXT_REPLY: u8 = 0xF5;

/// Builder over a zeroed 32-byte header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header([u8; HEADER_LEN]);

impl Header {
    pub fn new(code: u8, sub: u8) -> Self {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[0] = code;
        bytes[1] = sub;
        Self(bytes)
    }

    pub fn byte(mut self, index: usize, value: u8) -> Self {
        self.0[index] = value;
        self
    }

    pub fn bytes(mut self, index: usize, value: &[u8]) -> Self {
        self.0[index..index + value.len()].copy_from_slice(value);
        self
    }

    pub fn u32_le(self, index: usize, value: u32) -> Self {
        self.bytes(index, &value.to_le_bytes())
    }

    /// Header followed by `payload`.
    pub fn with_payload(self, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
        out.extend_from_slice(&self.0);
        out.extend_from_slice(payload);
        out
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0.to_vec()
    }
}

/// Success acknowledgement carrying the session id.
pub fn ack(code: u8, sub: u8, session: u32, payload_len: usize) -> Header {
    Header::new(code, sub)
        .byte(3, 0x68)
        .u32_le(4, payload_len as u32)
        .bytes(8, &STATUS_OK)
        .u32_le(16, session)
        .byte(20, 0x01)
        .bytes(24, &TRAILER_OK)
}

/// Reply to a stream-start request. A rejected request gets the bare
/// acknowledgement without the session flag and trailer.
pub fn stream_reply(session: u32, accepted: bool) -> Header {
    if accepted {
        ack(STREAM_REPLY, 0, session, 0)
    } else {
        Header::new(STREAM_REPLY, 0)
            .byte(3, 0x68)
            .bytes(8, &STATUS_OK)
            .u32_le(16, session)
    }
}

/// First login reply: realm and random as text, status "challenge required".
pub fn login_challenge(payload_len: usize) -> Header {
    Header::new(LOGIN_REPLY, 0)
        .byte(3, 0x68)
        .u32_le(4, payload_len as u32)
        .bytes(8, &STATUS_CHALLENGE)
        .byte(20, 0x01)
        .bytes(24, &TRAILER_CHALLENGE)
}

pub fn login_accepted(session: u32) -> Header {
    ack(LOGIN_REPLY, 0, session, 0)
}

/// Reply to an explicit realm request; the JSON length sits at byte 12.
pub fn realm_reply(payload_len: usize) -> Header {
    Header::new(LOGIN_REPLY, 0x01)
        .bytes(8, &[0x01, 0x00, 0x00, 0x10])
        .u32_le(12, payload_len as u32)
        .bytes(28, &[0x05, 0x02, 0x01, 0x01])
}

pub fn probe_reply() -> Header {
    Header::new(PROBE_REPLY, 0).byte(3, 0x58)
}

/// System info reply: the sub-command is echoed where the status would be.
pub fn sysinfo_reply(subcommand: u8, payload_len: usize) -> Header {
    let header = Header::new(SYSINFO_REPLY, 0)
        .byte(3, 0x68)
        .u32_le(4, payload_len as u32)
        .byte(8, subcommand);
    if subcommand == 0x02 {
        header.byte(18, 0x01)
    } else {
        header
    }
}

pub fn text_reply(session: u32, payload_len: usize) -> Header {
    Header::new(TEXT_REPLY, 0)
        .u32_le(4, payload_len as u32)
        .u32_le(24, session)
}

/// JSON reply in the binary-framed dialect.
pub fn json_reply(request_id: u32, session: u32, payload_len: usize) -> Header {
    Header::new(JSON_COMMAND, 0)
        .u32_le(4, payload_len as u32)
        .u32_le(8, request_id)
        .u32_le(16, payload_len as u32)
        .u32_le(24, session)
}

/// JSON reply in the `DHIP`-tagged dialect.
pub fn dhip_reply(session: u32, request_id: u32, payload_len: usize) -> Header {
    Header::new(DHIP_MARKER, 0)
        .bytes(4, DHIP_TAG)
        .u32_le(8, session)
        .u32_le(12, request_id)
        .u32_le(16, payload_len as u32)
        .u32_le(24, payload_len as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SESSION: u32 = 0x0012_3456;

    #[test]
    fn ack_layout() {
        let bytes = ack(0x25, 0x00, SESSION, 0).into_bytes();
        assert_eq!(
            bytes,
            vec![
                0x25, 0x00, 0x00, 0x68, 0, 0, 0, 0, //
                0x00, 0x08, 0x01, 0x00, 0, 0, 0, 0, //
                0x56, 0x34, 0x12, 0x00, 0x01, 0, 0, 0, //
                0x06, 0x00, 0xF9, 0x00, 0x00, 0x07, 0x00, 0x02,
            ]
        );
    }

    #[test]
    fn challenge_layout_has_no_session() {
        let bytes = login_challenge(40).into_bytes();
        assert_eq!(&bytes[0..4], &[0xB0, 0x00, 0x00, 0x68]);
        assert_eq!(&bytes[4..8], &[40, 0, 0, 0]);
        assert_eq!(&bytes[8..12], &[0x01, 0x0E, 0x01, 0x00]);
        assert_eq!(&bytes[16..20], &[0, 0, 0, 0]);
        assert_eq!(&bytes[24..32], &[0x06, 0x00, 0xF9, 0x00, 0x00, 0x00, 0x00, 0x02]);
    }

    #[test]
    fn rejected_stream_reply_has_no_trailer() {
        let bytes = stream_reply(SESSION, false).into_bytes();
        assert_eq!(bytes[0], 0x69);
        assert_eq!(&bytes[16..20], &SESSION.to_le_bytes());
        assert_eq!(bytes[20], 0);
        assert!(bytes[24..32].iter().all(|b| *b == 0));
        assert_eq!(stream_reply(SESSION, true).into_bytes()[20], 1);
    }

    #[test]
    fn sysinfo_flag_for_capability_struct() {
        assert_eq!(sysinfo_reply(0x02, 288).into_bytes()[18], 1);
        assert_eq!(sysinfo_reply(0x07, 16).into_bytes()[18], 0);
        assert_eq!(sysinfo_reply(0x07, 16).into_bytes()[8], 0x07);
    }

    #[test]
    fn dhip_layout() {
        let bytes = dhip_reply(SESSION, 9, 100).with_payload(&[b'x'; 100]);
        assert_eq!(bytes.len(), 132);
        assert_eq!(&bytes[4..8], b"DHIP");
        assert_eq!(&bytes[8..12], &SESSION.to_le_bytes());
        assert_eq!(&bytes[12..16], &[9, 0, 0, 0]);
        assert_eq!(&bytes[16..20], &[100, 0, 0, 0]);
        assert_eq!(&bytes[24..28], &[100, 0, 0, 0]);
    }

    #[test]
    fn json_reply_layout() {
        let bytes = json_reply(7, SESSION, 20).into_bytes();
        assert_eq!(bytes[0], 0xF6);
        assert_eq!(&bytes[4..8], &[20, 0, 0, 0]);
        assert_eq!(&bytes[8..12], &[7, 0, 0, 0]);
        assert_eq!(&bytes[16..20], &[20, 0, 0, 0]);
        assert_eq!(&bytes[24..28], &SESSION.to_le_bytes());
    }
}
