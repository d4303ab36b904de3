//! ONVIF Profile S surface for recorders that add cameras by discovery.
//!
//! [`server`] answers SOAP 1.2 over HTTP on `/onvif/device_service` and
//! `/onvif/media_service`, plus the VAPIX queries in [`axis`]. [`discovery`]
//! answers WS-Discovery probes on the multicast group. Envelopes are read
//! with the small scanner in [`xml`]; the action is the local name of the
//! first element inside `Body`.

pub mod axis;
pub mod discovery;
pub mod http;
pub mod security;
pub mod server;
pub mod services;
pub mod soap;
pub mod xml;

pub use discovery::{Advertisement, DiscoveryResponder};
pub use server::OnvifServer;
pub use services::OnvifDevice;
pub use soap::SoapFault;
