use std::io::{self, Read};

/// Largest request head accepted before the buffer is treated as garbage.
pub(crate) const MAX_HEAD: usize = 64 * 1024;
/// Largest declared `Content-Length` accepted. RTSP requests carry at most a
/// short parameter body and SOAP requests a single small envelope.
pub(crate) const MAX_BODY: usize = 64 * 1024;

/// One unit read from the RTSP connection.
#[derive(Debug, PartialEq, Eq)]
pub enum Inbound {
    /// Request line and headers, body already dropped.
    Request(String),
    /// A client `$` block (usually RTCP receiver reports), skipped.
    Interleaved { channel: u8, len: usize },
}

/// Buffers bytes from the RTSP socket and splits them into requests and
/// interleaved binary blocks.
///
/// Survives read timeouts: a partially received request stays buffered until
/// the rest arrives.
#[derive(Debug, Default)]
pub struct RequestReader {
    buf: Vec<u8>,
}

impl RequestReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes from one `read` on `source`. Returns the count read;
    /// 0 means the peer closed the connection.
    pub fn fill(&mut self, source: &mut impl Read) -> io::Result<usize> {
        let mut chunk = [0u8; 4096];
        let n = source.read(&mut chunk)?;
        self.buf.extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    /// Extract the next complete unit, if one is buffered.
    pub fn next_inbound(&mut self) -> Option<Inbound> {
        loop {
            // Stray line endings between requests.
            let skip = self
                .buf
                .iter()
                .take_while(|b| **b == b'\r' || **b == b'\n')
                .count();
            self.buf.drain(..skip);

            let first = *self.buf.first()?;
            if first == b'$' {
                if self.buf.len() < 4 {
                    return None;
                }
                let channel = self.buf[1];
                let len = u16::from_be_bytes([self.buf[2], self.buf[3]]) as usize;
                if self.buf.len() < 4 + len {
                    return None;
                }
                self.buf.drain(..4 + len);
                return Some(Inbound::Interleaved { channel, len });
            }

            let Some(head_end) = find_head_end(&self.buf) else {
                if self.buf.len() > MAX_HEAD {
                    tracing::warn!(len = self.buf.len(), "oversized request head discarded");
                    self.buf.clear();
                }
                return None;
            };

            let head = String::from_utf8_lossy(&self.buf[..head_end]).into_owned();
            let body_len = content_length(&head);
            if body_len > MAX_BODY {
                tracing::warn!(body_len, "oversized request body, buffer discarded");
                self.buf.clear();
                return None;
            }
            if self.buf.len() < head_end + body_len {
                return None;
            }
            self.buf.drain(..head_end + body_len);

            if head.trim().is_empty() {
                continue;
            }
            return Some(Inbound::Request(head));
        }
    }
}

/// Index just past the blank line ending the request head.
pub(crate) fn find_head_end(buf: &[u8]) -> Option<usize> {
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4);
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|i| i + 2);
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

pub(crate) fn content_length(head: &str) -> usize {
    head.lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("Content-Length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0)
}
