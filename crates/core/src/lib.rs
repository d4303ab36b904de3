//! Scale-weight display that presents itself to an NVR as an IP camera.
//!
//! Three independent servers make up the camera, and the two media servers
//! render from one shared [`WeightBoard`]:
//!
//! - [`RtspServer`] streams the weight as RTP/JPEG (RFC 2435) or as RTP/H.264
//!   (RFC 6184) from an external encoder.
//! - [`DvripServer`] speaks the Dahua-style DVR/IP protocol and forwards
//!   H.264 from an external encoder inside DHAV frames.
//! - [`OnvifServer`] answers ONVIF device and media queries and WS-Discovery
//!   probes, pointing recorders at the RTSP stream.

pub mod cancel;
pub mod config;
pub mod dvrip;
pub mod error;
pub mod media;
pub mod onvif;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transport;
pub mod weight;

pub use cancel::CancelToken;
pub use config::BridgeConfig;
pub use dvrip::DvripServer;
pub use error::{BridgeError, Result};
pub use media::Packetizer;
pub use onvif::OnvifServer;
pub use server::{RtspServer, ServerContext};
pub use weight::WeightBoard;
