//! Network transport layer for RTSP signaling and RTP media delivery.
//!
//! - **TCP** ([`tcp`]): RTSP request/response signaling, one thread per
//!   connection. [`reader`] splits the inbound byte stream into requests and
//!   skips client `$` blocks.
//! - **Interleaved RTP** ([`writer`]): RTP multiplexed onto the RTSP
//!   connection with `$` framing (RFC 2326 §10.12).
//! - **UDP** ([`udp`]): one ephemeral socket per UDP session.
//! - **Delivery** ([`delivery`]): the paced render/packetize/send loop of a
//!   playing session.

pub mod delivery;
pub mod reader;
pub mod tcp;
pub mod udp;
pub mod writer;

pub use udp::UdpTransport;
pub use writer::SocketWriter;
