//! WS-Discovery (2005/04) responder.
//!
//! Listens on UDP 3702, answers `Probe` messages for
//! `dn:NetworkVideoTransmitter` or `tds:Device` (or with no type filter)
//! with a unicast `ProbeMatches`, and announces `Hello`/`Bye` on the
//! multicast group when it joined one.

use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::services::{DEVICE_PATH, SCOPES};
use super::xml;
use crate::cancel::CancelToken;

pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
pub const DISCOVERY_PORT: u16 = 3702;

const NS_ADDRESSING: &str = "http://schemas.xmlsoap.org/ws/2004/08/addressing";
const NS_DISCOVERY: &str = "http://schemas.xmlsoap.org/ws/2005/04/discovery";
const ANONYMOUS: &str = "http://schemas.xmlsoap.org/ws/2004/08/addressing/role/anonymous";
const DISCOVERY_TO: &str = "urn:schemas-xmlsoap-org:ws:2005:04:discovery";
const TYPES: &str = "dn:NetworkVideoTransmitter tds:Device";
const MATCHED_TYPES: &[&str] = &["NetworkVideoTransmitter", "Device"];

const RECV_TIMEOUT: Duration = Duration::from_millis(200);
const DATAGRAM: usize = 8192;

/// Identity a responder advertises.
#[derive(Debug, Clone)]
pub struct Advertisement {
    /// `urn:uuid:` endpoint reference, stable for one run.
    pub endpoint: String,
    /// Port of the SOAP service, combined with the local address that
    /// reaches each prober to form the XAddr.
    pub http_port: u16,
}

impl Advertisement {
    pub fn new(http_port: u16) -> Self {
        Self {
            endpoint: format!("urn:uuid:{}", uuid::Uuid::new_v4()),
            http_port,
        }
    }

    fn xaddr(&self, ip: IpAddr) -> String {
        format!("http://{}{}", SocketAddr::new(ip, self.http_port), DEVICE_PATH)
    }
}

fn message_id() -> String {
    format!("urn:uuid:{}", uuid::Uuid::new_v4())
}

fn discovery_envelope(header: &str, body: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <s:Envelope xmlns:s=\"http://www.w3.org/2003/05/soap-envelope\" \
         xmlns:a=\"{NS_ADDRESSING}\" xmlns:d=\"{NS_DISCOVERY}\" \
         xmlns:dn=\"http://www.onvif.org/ver10/network/wsdl\" \
         xmlns:tds=\"http://www.onvif.org/ver10/device/wsdl\">\
         <s:Header>{header}</s:Header><s:Body>{body}</s:Body></s:Envelope>"
    )
}

fn endpoint_block(ad: &Advertisement, xaddr: &str) -> String {
    format!(
        "<a:EndpointReference><a:Address>{}</a:Address></a:EndpointReference>\
         <d:Types>{TYPES}</d:Types><d:Scopes>{}</d:Scopes>\
         <d:XAddrs>{}</d:XAddrs><d:MetadataVersion>1</d:MetadataVersion>",
        ad.endpoint,
        SCOPES.join(" "),
        xml::escape(xaddr)
    )
}

/// Whether a probe's `Types` filter includes this device.
fn types_match(request: &str) -> bool {
    match xml::element_text(request, "Types") {
        None => true,
        Some(types) if types.is_empty() => true,
        Some(types) => types
            .split_whitespace()
            .any(|t| MATCHED_TYPES.contains(&xml::local_name(t))),
    }
}

/// `ProbeMatches` answering `request`, or `None` when it is not a probe for
/// this kind of device.
pub fn probe_matches(request: &str, ad: &Advertisement, xaddr: &str) -> Option<String> {
    if xml::body_action(request)? != "Probe" || !types_match(request) {
        return None;
    }
    let relates_to = xml::element_text(request, "MessageID").unwrap_or_default();
    let header = format!(
        "<a:MessageID>{}</a:MessageID><a:RelatesTo>{}</a:RelatesTo>\
         <a:To>{ANONYMOUS}</a:To><a:Action>{NS_DISCOVERY}/ProbeMatches</a:Action>",
        message_id(),
        xml::escape(&relates_to)
    );
    let body = format!(
        "<d:ProbeMatches><d:ProbeMatch>{}</d:ProbeMatch></d:ProbeMatches>",
        endpoint_block(ad, xaddr)
    );
    Some(discovery_envelope(&header, &body))
}

pub fn hello(ad: &Advertisement, xaddr: &str) -> String {
    let header = format!(
        "<a:MessageID>{}</a:MessageID><a:To>{DISCOVERY_TO}</a:To>\
         <a:Action>{NS_DISCOVERY}/Hello</a:Action>",
        message_id()
    );
    discovery_envelope(&header, &format!("<d:Hello>{}</d:Hello>", endpoint_block(ad, xaddr)))
}

pub fn bye(ad: &Advertisement) -> String {
    let header = format!(
        "<a:MessageID>{}</a:MessageID><a:To>{DISCOVERY_TO}</a:To>\
         <a:Action>{NS_DISCOVERY}/Bye</a:Action>",
        message_id()
    );
    discovery_envelope(
        &header,
        &format!(
            "<d:Bye><a:EndpointReference><a:Address>{}</a:Address></a:EndpointReference></d:Bye>",
            ad.endpoint
        ),
    )
}

/// Local address the host would use to reach `peer`.
fn local_ip_toward(peer: SocketAddr, fallback: IpAddr) -> IpAddr {
    UdpSocket::bind(SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0))
        .and_then(|socket| {
            socket.connect(peer)?;
            socket.local_addr()
        })
        .map(|addr| addr.ip())
        .ok()
        .filter(|ip| !ip.is_unspecified())
        .unwrap_or(fallback)
}

/// Background UDP responder.
pub struct DiscoveryResponder {
    cancel: CancelToken,
    local_addr: SocketAddr,
    handle: Option<JoinHandle<()>>,
}

impl DiscoveryResponder {
    /// Bind `bind` and start answering probes. With `join_group` the socket
    /// joins [`MULTICAST_GROUP`] and announces itself.
    pub fn spawn(
        bind: SocketAddr,
        join_group: bool,
        ad: Advertisement,
        cancel: CancelToken,
    ) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(bind)?;
        if join_group {
            socket.join_multicast_v4(&MULTICAST_GROUP, &Ipv4Addr::UNSPECIFIED)?;
        }
        socket.set_read_timeout(Some(RECV_TIMEOUT))?;
        let local_addr = socket.local_addr()?;

        let token = cancel.clone();
        let handle = thread::spawn(move || respond_loop(socket, join_group, ad, token));
        tracing::info!(addr = %local_addr, join_group, "discovery responder listening");

        Ok(Self {
            cancel,
            local_addr,
            handle: Some(handle),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DiscoveryResponder {
    fn drop(&mut self) {
        self.stop();
    }
}

fn respond_loop(socket: UdpSocket, announce: bool, ad: Advertisement, cancel: CancelToken) {
    let group = SocketAddr::V4(SocketAddrV4::new(MULTICAST_GROUP, DISCOVERY_PORT));
    let fallback = socket
        .local_addr()
        .map(|a| a.ip())
        .unwrap_or(Ipv4Addr::LOCALHOST.into());

    if announce {
        let xaddr = ad.xaddr(local_ip_toward(group, fallback));
        if let Err(e) = socket.send_to(hello(&ad, &xaddr).as_bytes(), group) {
            tracing::debug!(error = %e, "hello announcement failed");
        }
    }

    let mut buf = vec![0u8; DATAGRAM];
    while !cancel.is_cancelled() {
        let (n, peer) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "discovery receive failed");
                if !cancel.sleep(RECV_TIMEOUT) {
                    break;
                }
                continue;
            }
        };

        let request = String::from_utf8_lossy(&buf[..n]);
        let xaddr = ad.xaddr(local_ip_toward(peer, fallback));
        if let Some(reply) = probe_matches(&request, &ad, &xaddr) {
            tracing::debug!(%peer, %xaddr, "answering discovery probe");
            if let Err(e) = socket.send_to(reply.as_bytes(), peer) {
                tracing::debug!(%peer, error = %e, "probe match send failed");
            }
        }
    }

    if announce {
        let _ = socket.send_to(bye(&ad).as_bytes(), group);
    }
    tracing::debug!("discovery responder exited");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe(types: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<Envelope xmlns="http://www.w3.org/2003/05/soap-envelope" xmlns:w="{NS_ADDRESSING}" xmlns:d="{NS_DISCOVERY}">
<Header><w:MessageID>uuid:1c852a4d-b800-1f08-abcd-4ccc6a0e2f01</w:MessageID>
<w:To>{DISCOVERY_TO}</w:To><w:Action>{NS_DISCOVERY}/Probe</w:Action></Header>
<Body><d:Probe><d:Types>{types}</d:Types></d:Probe></Body></Envelope>"#
        )
    }

    fn ad() -> Advertisement {
        Advertisement::new(8080)
    }

    #[test]
    fn probe_is_answered_with_relates_to() {
        let ad = ad();
        let reply = probe_matches(
            &probe("dn:NetworkVideoTransmitter"),
            &ad,
            "http://10.0.0.5:8080/onvif/device_service",
        )
        .unwrap();
        assert_eq!(xml::body_action(&reply), Some("ProbeMatches"));
        assert_eq!(
            xml::element_text(&reply, "RelatesTo").as_deref(),
            Some("uuid:1c852a4d-b800-1f08-abcd-4ccc6a0e2f01")
        );
        assert_eq!(
            xml::element_text(&reply, "XAddrs").as_deref(),
            Some("http://10.0.0.5:8080/onvif/device_service")
        );
        assert_eq!(xml::element_text(&reply, "Address"), Some(ad.endpoint.clone()));
        assert!(reply.contains("onvif://www.onvif.org/Profile/Streaming"));
    }

    #[test]
    fn type_filter() {
        let ad = ad();
        assert!(probe_matches(&probe(""), &ad, "x").is_some());
        assert!(probe_matches(&probe("tds:Device"), &ad, "x").is_some());
        assert!(probe_matches(&probe("p:Printer"), &ad, "x").is_none());

        let resolve = probe("").replace("d:Probe>", "d:Resolve>");
        assert!(probe_matches(&resolve, &ad, "x").is_none());
    }

    #[test]
    fn hello_and_bye_carry_the_endpoint() {
        let ad = ad();
        let text = hello(&ad, "http://10.0.0.5:8080/onvif/device_service");
        assert_eq!(xml::body_action(&text), Some("Hello"));
        assert!(text.contains(&ad.endpoint));
        let text = bye(&ad);
        assert_eq!(xml::body_action(&text), Some("Bye"));
        assert!(text.contains(&ad.endpoint));
    }

    #[test]
    fn responder_answers_unicast_probe() {
        let mut responder = DiscoveryResponder::spawn(
            "127.0.0.1:0".parse().unwrap(),
            false,
            ad(),
            CancelToken::new(),
        )
        .unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client.set_read_timeout(Some(Duration::from_secs(3))).unwrap();
        client
            .send_to(probe("dn:NetworkVideoTransmitter").as_bytes(), responder.local_addr())
            .unwrap();

        let mut buf = vec![0u8; DATAGRAM];
        let (n, from) = client.recv_from(&mut buf).unwrap();
        assert_eq!(from, responder.local_addr());
        let reply = String::from_utf8_lossy(&buf[..n]);
        assert_eq!(
            xml::element_text(&reply, "XAddrs").as_deref(),
            Some("http://127.0.0.1:8080/onvif/device_service")
        );
        responder.stop();
    }
}
