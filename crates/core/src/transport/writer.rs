use std::io::{self, Write};
use std::net::TcpStream;
use std::sync::Arc;

use parking_lot::Mutex;

/// Write half of an RTSP connection shared by the response path and the
/// delivery thread.
///
/// Every call writes under one lock, so a response never lands between the
/// packets of a frame.
#[derive(Debug, Clone)]
pub struct SocketWriter {
    stream: Arc<Mutex<TcpStream>>,
}

impl SocketWriter {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream: Arc::new(Mutex::new(stream)),
        }
    }

    pub fn write_all(&self, bytes: &[u8]) -> io::Result<()> {
        self.stream.lock().write_all(bytes)
    }

    /// Write `packets` as `$`-framed interleaved blocks (RFC 2326 §10.12).
    pub fn write_interleaved(&self, channel: u8, packets: &[Vec<u8>]) -> io::Result<()> {
        let total: usize = packets.iter().map(|p| 4 + p.len()).sum();
        let mut out = Vec::with_capacity(total);
        for packet in packets {
            out.extend_from_slice(&interleaved_prefix(channel, packet.len()));
            out.extend_from_slice(packet);
        }
        self.write_all(&out)
    }
}

/// `$`, channel, big-endian 16-bit length.
pub fn interleaved_prefix(channel: u8, len: usize) -> [u8; 4] {
    let len = u16::try_from(len).unwrap_or(u16::MAX).to_be_bytes();
    [b'$', channel, len[0], len[1]]
}
