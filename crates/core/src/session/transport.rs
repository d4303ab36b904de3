use std::net::SocketAddr;

use crate::transport::UdpTransport;

/// Interleaved channel pair used when the client's request is unusable.
pub const DEFAULT_INTERLEAVED: (u8, u8) = (0, 1);

/// Client-side transport request from the SETUP `Transport` header
/// (RFC 2326 §12.39).
///
/// ## Wire format examples
///
/// ```text
/// Transport: RTP/AVP/TCP;unicast;interleaved=0-1
/// Transport: RTP/AVP;unicast;client_port=8000-8001
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportHeader {
    /// RTP carried on the RTSP connection in `$`-framed blocks (§10.12).
    Interleaved { rtp_channel: u8, rtcp_channel: u8 },
    /// RTP sent as UDP datagrams to the client's ports.
    Udp {
        client_rtp_port: u16,
        client_rtcp_port: u16,
    },
}

impl Default for TransportHeader {
    fn default() -> Self {
        Self::Interleaved {
            rtp_channel: DEFAULT_INTERLEAVED.0,
            rtcp_channel: DEFAULT_INTERLEAVED.1,
        }
    }
}

impl TransportHeader {
    /// Parse the `Transport` header value.
    ///
    /// Never fails: anything that is neither a TCP request nor a UDP request
    /// with `client_port` falls back to interleaved channels 0-1.
    ///
    /// ## Examples
    ///
    /// ```
    /// use scalecam::session::transport::TransportHeader;
    ///
    /// let th = TransportHeader::parse("RTP/AVP;unicast;client_port=8000-8001");
    /// assert_eq!(th, TransportHeader::Udp { client_rtp_port: 8000, client_rtcp_port: 8001 });
    ///
    /// assert_eq!(TransportHeader::parse("garbage"), TransportHeader::default());
    /// ```
    pub fn parse(header: &str) -> Self {
        let param = |name: &str| {
            header
                .split(';')
                .map(str::trim)
                .find_map(|part| part.strip_prefix(name))
        };

        if header.contains("RTP/AVP/TCP") || header.contains("interleaved") {
            let (rtp_channel, rtcp_channel) = param("interleaved=")
                .and_then(parse_channels)
                .unwrap_or(DEFAULT_INTERLEAVED);
            return Self::Interleaved {
                rtp_channel,
                rtcp_channel,
            };
        }

        if header.contains("RTP/AVP")
            && let Some((client_rtp_port, client_rtcp_port)) =
                param("client_port=").and_then(parse_pair)
        {
            return Self::Udp {
                client_rtp_port,
                client_rtcp_port,
            };
        }

        tracing::warn!(transport = header, "unusable Transport header, using interleaved 0-1");
        Self::default()
    }
}

/// `a-b`, or a lone `a` meaning `a-(a+1)`.
fn parse_pair(value: &str) -> Option<(u16, u16)> {
    match value.split_once('-') {
        Some((first, second)) => Some((first.trim().parse().ok()?, second.trim().parse().ok()?)),
        None => {
            let first: u16 = value.trim().parse().ok()?;
            Some((first, first.wrapping_add(1)))
        }
    }
}

fn parse_channels(value: &str) -> Option<(u8, u8)> {
    let (rtp, rtcp) = parse_pair(value)?;
    Some((u8::try_from(rtp).ok()?, u8::try_from(rtcp).ok()?))
}

/// Transport negotiated at SETUP and fixed for the session.
#[derive(Debug, Clone)]
pub enum Transport {
    Interleaved {
        rtp_channel: u8,
        rtcp_channel: u8,
    },
    Udp {
        socket: UdpTransport,
        /// Client RTP destination (`client_ip:client_rtp_port`).
        client_addr: SocketAddr,
        client_rtcp_port: u16,
        server_port: u16,
    },
}

impl Default for Transport {
    fn default() -> Self {
        Self::Interleaved {
            rtp_channel: DEFAULT_INTERLEAVED.0,
            rtcp_channel: DEFAULT_INTERLEAVED.1,
        }
    }
}

impl Transport {
    /// `Transport` header value for the SETUP response.
    pub fn response_header(&self) -> String {
        match self {
            Self::Interleaved {
                rtp_channel,
                rtcp_channel,
            } => format!("RTP/AVP/TCP;unicast;interleaved={rtp_channel}-{rtcp_channel}"),
            Self::Udp {
                client_addr,
                client_rtcp_port,
                server_port,
                ..
            } => format!(
                "RTP/AVP;unicast;client_port={}-{};server_port={}-{}",
                client_addr.port(),
                client_rtcp_port,
                server_port,
                server_port.wrapping_add(1)
            ),
        }
    }
}
