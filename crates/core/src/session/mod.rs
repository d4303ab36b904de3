//! RTSP session state (RFC 2326 §3, §12.37).
//!
//! Each RTSP connection carries at most one session. It tracks:
//!
//! - A numeric session ID from a server-wide counter, returned in the
//!   `Session` header.
//! - The playback state.
//! - The transport negotiated during SETUP, fixed for the session.
//! - The RTP packetizer, which moves to the delivery thread on PLAY.
//!
//! ## Session lifecycle (RFC 2326 §A.1)
//!
//! ```text
//! (new)          -> Init
//! SETUP          -> Ready
//! PLAY           -> Playing   (also from Init: PLAY without SETUP is served)
//! TEARDOWN       -> TornDown
//! TCP disconnect -> (dropped with the connection)
//! ```

pub mod transport;

use std::sync::atomic::{AtomicU32, Ordering};

use crate::media::Packetizer;
pub use transport::{Transport, TransportHeader};

/// Default session timeout in seconds (RFC 2326 §12.37).
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 60;

/// Counter value before the first session; the first id issued is 1001.
const FIRST_SESSION_BASE: u32 = 1000;

/// RTSP session state machine (RFC 2326 §A.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    /// Transport negotiated, not yet playing.
    Ready,
    /// Frames are being delivered.
    Playing,
    TornDown,
}

/// Server-wide source of session ids.
#[derive(Debug)]
pub struct SessionIds(AtomicU32);

impl Default for SessionIds {
    fn default() -> Self {
        Self(AtomicU32::new(FIRST_SESSION_BASE))
    }
}

impl SessionIds {
    pub fn next_id(&self) -> String {
        (self.0.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }
}

pub struct RtspSession {
    pub id: String,
    /// The RTSP URI of the request that created this session.
    pub uri: String,
    pub transport: Transport,
    state: SessionState,
    packetizer: Option<Box<dyn Packetizer>>,
    pub timeout_secs: u64,
}

impl RtspSession {
    pub fn new(id: String, uri: &str, transport: Transport, packetizer: Box<dyn Packetizer>) -> Self {
        Self {
            id,
            uri: uri.to_string(),
            transport,
            state: SessionState::Init,
            packetizer: Some(packetizer),
            timeout_secs: DEFAULT_SESSION_TIMEOUT_SECS,
        }
    }

    /// Transition to a new playback state.
    pub fn set_state(&mut self, state: SessionState) {
        tracing::debug!(session_id = %self.id, old_state = ?self.state, new_state = ?state, "state transition");
        self.state = state;
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == SessionState::Playing
    }

    /// Packetizer for the delivery loop. `None` once delivery has started.
    pub fn take_packetizer(&mut self) -> Option<Box<dyn Packetizer>> {
        self.packetizer.take()
    }

    pub fn packetizer(&self) -> Option<&dyn Packetizer> {
        self.packetizer.as_deref()
    }

    /// Format the `Session` response header value per RFC 2326 §12.37.
    ///
    /// Example: `"1001;timeout=60"`
    pub fn session_header_value(&self) -> String {
        format!("{};timeout={}", self.id, self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::jpeg::JpegPacketizer;

    fn session(id: &str) -> RtspSession {
        RtspSession::new(
            id.to_string(),
            "rtsp://localhost/scale",
            Transport::default(),
            Box::new(JpegPacketizer::with_random_state(320, 240, 10)),
        )
    }

    #[test]
    fn ids_start_after_base() {
        let ids = SessionIds::default();
        assert_eq!(ids.next_id(), "1001");
        assert_eq!(ids.next_id(), "1002");
    }

    #[test]
    fn header_value_carries_timeout() {
        assert_eq!(session("1001").session_header_value(), "1001;timeout=60");
    }

    #[test]
    fn state_transitions() {
        let mut s = session("7");
        assert_eq!(s.state(), SessionState::Init);
        s.set_state(SessionState::Playing);
        assert!(s.is_playing());
        s.set_state(SessionState::TornDown);
        assert!(!s.is_playing());
    }

    #[test]
    fn packetizer_is_handed_over_once() {
        let mut s = session("8");
        assert!(s.packetizer().is_some());
        assert!(s.take_packetizer().is_some());
        assert!(s.take_packetizer().is_none());
        assert!(s.packetizer().is_none());
    }
}
