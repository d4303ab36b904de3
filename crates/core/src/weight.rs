//! Weight input: last-known reading store and the scale line feed.
//!
//! Both servers only ever ask "what should the display show right now".
//! [`WeightBoard`] answers that without blocking; when nothing has been
//! received yet it returns a "no data" placeholder.

use std::fmt;
use std::io::{BufRead, BufReader, ErrorKind};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::cancel::CancelToken;

const FEED_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const FEED_READ_TIMEOUT: Duration = Duration::from_millis(500);
const FEED_MIN_BACKOFF: Duration = Duration::from_secs(1);
const FEED_MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScaleStatus {
    #[default]
    Unknown,
    Stable,
    Motion,
    Overload,
    Underload,
    Error,
}

impl fmt::Display for ScaleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Unknown => "UNKNOWN",
            Self::Stable => "STABLE",
            Self::Motion => "MOTION",
            Self::Overload => "OVERLOAD",
            Self::Underload => "UNDERLOAD",
            Self::Error => "ERROR",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeightReading {
    pub weight: f64,
    pub unit: String,
    pub status: ScaleStatus,
    pub received_at: Instant,
}

impl WeightReading {
    pub fn new(weight: f64, unit: &str, status: ScaleStatus) -> Self {
        Self {
            weight,
            unit: unit.to_string(),
            status,
            received_at: Instant::now(),
        }
    }
}

/// Text shown on the rendered video frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WeightDisplay {
    pub value_text: String,
    pub status_text: String,
}

impl fmt::Display for WeightDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}  {}", self.value_text, self.status_text)
    }
}

/// Shared last-known weight value.
#[derive(Debug, Clone)]
pub struct WeightBoard {
    latest: Arc<RwLock<Option<WeightReading>>>,
    unit: Arc<str>,
}

impl WeightBoard {
    /// `unit` is shown in the placeholder before the first reading arrives.
    pub fn new(unit: &str) -> Self {
        Self {
            latest: Arc::new(RwLock::new(None)),
            unit: Arc::from(unit),
        }
    }

    pub fn update(&self, reading: WeightReading) {
        tracing::trace!(weight = reading.weight, unit = %reading.unit, status = %reading.status, "weight update");
        *self.latest.write() = Some(reading);
    }

    pub fn latest(&self) -> Option<WeightReading> {
        self.latest.read().clone()
    }

    pub fn display(&self) -> WeightDisplay {
        match &*self.latest.read() {
            Some(reading) => WeightDisplay {
                value_text: format!("{:.2} {}", reading.weight, reading.unit),
                status_text: reading.status.to_string(),
            },
            None => WeightDisplay {
                value_text: format!("----.-- {}", self.unit),
                status_text: "NO DATA".to_string(),
            },
        }
    }
}

/// Parse one line from a scale indicator.
///
/// Accepts the Fairbanks 6011 continuous format `STATUS WEIGHT TARE`
/// (optionally wrapped in STX/ETX, with a `1"` status meaning negative
/// weight) as well as plain `WEIGHT [UNIT]` lines.
pub fn parse_scale_line(line: &str, default_unit: &str) -> Option<WeightReading> {
    let cleaned: String = line.chars().filter(|c| *c != '\x02' && *c != '\x03').collect();
    let parts: Vec<&str> = cleaned.split_whitespace().collect();
    let first = *parts.first()?;

    if parts.len() >= 2 && matches!(first, "0" | "1" | "0\"" | "1\"") {
        if let Ok(value) = parts[1].parse::<f64>() {
            let weight = if first == "1\"" { -value.abs() } else { value };
            let status = if first.starts_with('0') {
                ScaleStatus::Stable
            } else {
                ScaleStatus::Motion
            };
            return Some(WeightReading::new(weight, default_unit, status));
        }
    }

    let weight = first.parse::<f64>().ok()?;
    let unit = parts
        .get(1)
        .filter(|u| u.chars().all(|c| c.is_ascii_alphabetic()))
        .copied()
        .unwrap_or(default_unit);
    Some(WeightReading::new(weight, unit, ScaleStatus::Unknown))
}

/// Background reader for a TCP scale endpoint.
///
/// Reconnects with doubling backoff while the token is live.
pub struct ScaleFeed {
    handle: Option<JoinHandle<()>>,
    cancel: CancelToken,
}

impl ScaleFeed {
    pub fn spawn(address: &str, board: WeightBoard, unit: &str, cancel: CancelToken) -> Self {
        let address = address.to_string();
        let unit = unit.to_string();
        let token = cancel.clone();
        let handle = thread::spawn(move || run_feed(&address, &board, &unit, &token));
        Self {
            handle: Some(handle),
            cancel,
        }
    }

    pub fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run_feed(address: &str, board: &WeightBoard, unit: &str, cancel: &CancelToken) {
    let mut backoff = FEED_MIN_BACKOFF;
    while !cancel.is_cancelled() {
        match connect(address) {
            Ok(stream) => {
                tracing::info!(address, "scale feed connected");
                backoff = FEED_MIN_BACKOFF;
                let reason = read_lines(stream, board, unit, cancel);
                tracing::warn!(address, reason, "scale feed disconnected");
            }
            Err(e) => {
                tracing::warn!(address, error = %e, retry_in = ?backoff, "scale feed connect failed");
            }
        }
        if !cancel.sleep(backoff) {
            break;
        }
        backoff = (backoff * 2).min(FEED_MAX_BACKOFF);
    }
    tracing::debug!(address, "scale feed stopped");
}

fn connect(address: &str) -> std::io::Result<TcpStream> {
    let addr = address
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| std::io::Error::new(ErrorKind::InvalidInput, "no address resolved"))?;
    let stream = TcpStream::connect_timeout(&addr, FEED_CONNECT_TIMEOUT)?;
    stream.set_read_timeout(Some(FEED_READ_TIMEOUT))?;
    Ok(stream)
}

fn read_lines(stream: TcpStream, board: &WeightBoard, unit: &str, cancel: &CancelToken) -> &'static str {
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();
    while !cancel.is_cancelled() {
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => return "closed by peer",
            Ok(_) => {
                let text = String::from_utf8_lossy(&line);
                match parse_scale_line(text.trim_end(), unit) {
                    Some(reading) => board.update(reading),
                    None => tracing::debug!(line = %text.trim_end(), "unparsed scale line"),
                }
                line.clear();
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => continue,
            Err(_) => return "read error",
        }
    }
    "cancelled"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_before_first_reading() {
        let board = WeightBoard::new("kg");
        let display = board.display();
        assert_eq!(display.value_text, "----.-- kg");
        assert_eq!(display.status_text, "NO DATA");
        assert!(board.latest().is_none());
    }

    #[test]
    fn display_formats_latest_reading() {
        let board = WeightBoard::new("lb");
        board.update(WeightReading::new(44140.0, "lb", ScaleStatus::Stable));
        board.update(WeightReading::new(12.345, "lb", ScaleStatus::Motion));
        let display = board.display();
        assert_eq!(display.value_text, "12.35 lb");
        assert_eq!(display.status_text, "MOTION");
    }

    #[test]
    fn parses_fairbanks_line() {
        let reading = parse_scale_line("\x020   44140    00\x03", "lb").unwrap();
        assert_eq!(reading.weight, 44140.0);
        assert_eq!(reading.status, ScaleStatus::Stable);
        assert_eq!(reading.unit, "lb");
    }

    #[test]
    fn fairbanks_negative_prefix() {
        let reading = parse_scale_line("1\"  250  00", "lb").unwrap();
        assert_eq!(reading.weight, -250.0);
        assert_eq!(reading.status, ScaleStatus::Motion);
    }

    #[test]
    fn parses_plain_value_with_unit() {
        let reading = parse_scale_line("12.5 kg", "lb").unwrap();
        assert_eq!(reading.weight, 12.5);
        assert_eq!(reading.unit, "kg");
        assert_eq!(reading.status, ScaleStatus::Unknown);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_scale_line("", "lb").is_none());
        assert!(parse_scale_line("\x02\x03", "lb").is_none());
        assert!(parse_scale_line("hello world", "lb").is_none());
    }
}
