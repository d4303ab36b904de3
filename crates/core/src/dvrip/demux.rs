//! Message framing for the vendor port.
//!
//! Several dialects share one TCP port and are told apart by their prefix:
//!
//! | Prefix | Kind | Length |
//! |--------|------|--------|
//! | plausible LE payload length at bytes 4..8 | [`MessageKind::Binary`] (0xF6 → [`MessageKind::BinaryJson`], 0xF4 → [`MessageKind::TextCommand`]) | 32 + declared |
//! | `0x20` or `"DHIP"` at byte 4 | [`MessageKind::DhipJson`] | whole buffered run |
//! | `{` anywhere | [`MessageKind::BareJson`] | whole buffered run |
//!
//! [`next_message`] extracts at most one message per call.

use serde_json::Value;

pub const HEADER_LEN: usize = 32;
pub const DHIP_TAG: &[u8; 4] = b"DHIP";
pub const DHIP_MARKER: u8 = 0x20;
pub const JSON_COMMAND: u8 = 0xF6;
pub const TEXT_COMMAND: u8 = 0xF4;

const MAX_PAYLOAD: i32 = 10 * 1024 * 1024;
/// An unterminated JSON document larger than this is treated as garbage.
const MAX_PENDING_JSON: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Fixed 32-byte header plus declared payload.
    Binary,
    /// 32-byte header with a JSON request as payload.
    BinaryJson,
    /// 32-byte header with `Key:Value` text lines as payload.
    TextCommand,
    /// `DHIP`-tagged header with a JSON request as payload.
    DhipJson,
    /// A JSON document with no header.
    BareJson,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolMessage {
    pub kind: MessageKind,
    /// Complete message bytes, header included.
    raw: Vec<u8>,
    payload_start: usize,
    payload_end: usize,
}

impl ProtocolMessage {
    fn new(kind: MessageKind, raw: &[u8], payload_start: usize, payload_end: usize) -> Self {
        let payload_end = payload_end.min(raw.len());
        Self {
            kind,
            raw: raw.to_vec(),
            payload_start: payload_start.min(payload_end),
            payload_end,
        }
    }

    pub fn type_byte(&self) -> u8 {
        self.byte(0)
    }

    pub fn sub_type(&self) -> u8 {
        self.byte(1)
    }

    /// Header byte at `index`, or 0 past the end of the message.
    pub fn byte(&self, index: usize) -> u8 {
        self.byte_or(index, 0)
    }

    pub fn byte_or(&self, index: usize, default: u8) -> u8 {
        self.raw.get(index).copied().unwrap_or(default)
    }

    /// Little-endian u32 at `offset`, or 0 if the message is too short.
    pub fn u32_le(&self, offset: usize) -> u32 {
        self.raw
            .get(offset..offset + 4)
            .map_or(0, |b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn payload(&self) -> &[u8] {
        &self.raw[self.payload_start..self.payload_end]
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Demuxed {
    /// The buffer holds an incomplete message.
    NeedMore,
    Message {
        message: ProtocolMessage,
        consumed: usize,
    },
    /// Unrecognised bytes that should be dropped from the buffer.
    Discard(usize),
}

fn declared_len(buf: &[u8]) -> i32 {
    i32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]])
}

/// Classify the front of `buf` and extract one message if it is complete.
pub fn next_message(buf: &[u8]) -> Demuxed {
    // A headerless document can be shorter than any binary header.
    if buf.first() == Some(&b'{') {
        return bare_json(buf, 0).unwrap_or_else(|| discard(buf));
    }
    if buf.len() < 8 {
        return Demuxed::NeedMore;
    }

    let tagged = &buf[4..8] == DHIP_TAG;
    let first = buf[0];
    let declared = declared_len(buf);

    if !tagged && first != b'{' && first != b'<' && (0..MAX_PAYLOAD).contains(&declared) {
        let total = HEADER_LEN + declared as usize;
        if buf.len() < total {
            return Demuxed::NeedMore;
        }
        let kind = match first {
            JSON_COMMAND => MessageKind::BinaryJson,
            TEXT_COMMAND => MessageKind::TextCommand,
            _ => MessageKind::Binary,
        };
        return Demuxed::Message {
            message: ProtocolMessage::new(kind, &buf[..total], HEADER_LEN, total),
            consumed: total,
        };
    }

    if first == DHIP_MARKER || tagged {
        if buf.len() < HEADER_LEN {
            return Demuxed::NeedMore;
        }
        let body_len = u32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]) as usize;
        if body_len < MAX_PAYLOAD as usize && buf.len() < HEADER_LEN + body_len {
            return Demuxed::NeedMore;
        }
        return Demuxed::Message {
            message: ProtocolMessage::new(
                MessageKind::DhipJson,
                buf,
                HEADER_LEN,
                HEADER_LEN + body_len,
            ),
            consumed: buf.len(),
        };
    }

    buf.iter()
        .position(|b| *b == b'{')
        .and_then(|start| bare_json(buf, start))
        .unwrap_or_else(|| discard(buf))
}

/// Parse the JSON document starting at `start`. `None` if it is malformed.
fn bare_json(buf: &[u8], start: usize) -> Option<Demuxed> {
    let mut documents = serde_json::Deserializer::from_slice(&buf[start..]).into_iter::<Value>();
    match documents.next() {
        Some(Ok(_)) => {
            let end = start + documents.byte_offset();
            Some(Demuxed::Message {
                message: ProtocolMessage::new(MessageKind::BareJson, buf, start, end),
                consumed: buf.len(),
            })
        }
        Some(Err(e)) if e.is_eof() && buf.len() < MAX_PENDING_JSON => Some(Demuxed::NeedMore),
        _ => None,
    }
}

fn discard(buf: &[u8]) -> Demuxed {
    tracing::warn!(
        len = buf.len(),
        head = format_args!("{:02X?}", &buf[..buf.len().min(16)]),
        "unrecognized data discarded"
    );
    Demuxed::Discard(buf.len())
}
