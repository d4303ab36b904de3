//! Vendor DVR/IP protocol emulation.
//!
//! One TCP port carries several dialects: fixed-header binary commands,
//! binary-framed JSON, `DHIP`-tagged JSON, bare JSON and legacy text
//! commands. [`demux`] splits the byte stream into messages, the dialect
//! handlers build the replies, and [`connection`] writes them back and runs
//! the container-frame stream once a client attaches.

pub mod auth;
pub mod binary;
pub mod connection;
pub mod demux;
pub mod device;
pub mod dispatch;
pub mod packet;
pub mod server;
pub mod text;

pub use auth::{AuthOutcome, AuthState};
pub use connection::ConnectionState;
pub use demux::{Demuxed, MessageKind, ProtocolMessage, next_message};
pub use device::DeviceIdentity;
pub use dispatch::{MethodTable, RpcReply, RpcRequest};
pub use server::DvripServer;

/// Bytes to write back for one message, and whether the connection should
/// begin streaming afterwards.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Reply {
    pub bytes: Vec<u8>,
    pub start_stream: bool,
}

impl Reply {
    pub fn send(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            start_stream: false,
        }
    }

    pub fn start(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            start_stream: true,
        }
    }
}
