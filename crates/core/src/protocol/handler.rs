use std::net::SocketAddr;
use std::sync::Arc;

use crate::protocol::auth::Credentials;
use crate::protocol::request::RtspRequest;
use crate::protocol::response::RtspResponse;
use crate::protocol::sdp;
use crate::server::ServerContext;
use crate::session::{RtspSession, SessionState, Transport, TransportHeader};
use crate::transport::UdpTransport;

const PUBLIC_METHODS: &str = "OPTIONS, DESCRIBE, SETUP, PLAY, TEARDOWN, GET_PARAMETER";

/// Handles RTSP method requests for a single TCP connection.
///
/// Owns the connection's session, if one was created. The connection reads
/// the session state after each request to start or stop delivery.
pub struct MethodHandler {
    context: Arc<ServerContext>,
    client_addr: SocketAddr,
    credentials: Option<Credentials>,
    session: Option<RtspSession>,
}

impl MethodHandler {
    pub fn new(context: Arc<ServerContext>, client_addr: SocketAddr) -> Self {
        let credentials = context
            .config
            .require_auth
            .then(|| Credentials::new(&context.config.username, &context.config.password));
        MethodHandler {
            context,
            client_addr,
            credentials,
            session: None,
        }
    }

    pub fn session(&self) -> Option<&RtspSession> {
        self.session.as_ref()
    }

    pub fn session_mut(&mut self) -> Option<&mut RtspSession> {
        self.session.as_mut()
    }

    pub fn handle(&mut self, request: &RtspRequest) -> RtspResponse {
        let cseq = request.cseq();

        if request.method != "OPTIONS"
            && let Some(credentials) = &self.credentials
            && !credentials.authorize(request)
        {
            tracing::warn!(method = %request.method, %cseq, peer = %self.client_addr, "authorization required");
            return credentials.challenge(cseq);
        }

        match request.method.as_str() {
            "OPTIONS" => self.handle_options(cseq),
            "DESCRIBE" => self.handle_describe(cseq, &request.uri),
            "SETUP" => self.handle_setup(cseq, request),
            "PLAY" => self.handle_play(cseq, request),
            "TEARDOWN" => self.handle_teardown(cseq),
            "GET_PARAMETER" => self.handle_get_parameter(cseq),
            _ => {
                tracing::warn!(method = %request.method, %cseq, "unsupported RTSP method");
                RtspResponse::not_implemented().add_header("CSeq", cseq)
            }
        }
    }

    fn handle_options(&self, cseq: &str) -> RtspResponse {
        tracing::debug!(%cseq, "OPTIONS");
        RtspResponse::ok()
            .add_header("CSeq", cseq)
            .add_header("Public", PUBLIC_METHODS)
    }

    /// Parses host from an RTSP URI (e.g. rtsp://host:8554/path -> host). Falls back to client IP if invalid.
    fn host_from_uri_or_client(&self, uri: &str) -> String {
        if let Some(host) = &self.context.config.public_host {
            return host.clone();
        }

        if let Some(after_scheme) = uri
            .strip_prefix("rtsp://")
            .or_else(|| uri.strip_prefix("rtsps://"))
        {
            let host = after_scheme
                .split('/')
                .next()
                .map(|authority| authority.rsplit('@').next().unwrap_or(authority))
                .and_then(|host_port| host_port.split(':').next())
                .unwrap_or("")
                .trim();
            if !host.is_empty() {
                return host.to_string();
            }
        }
        self.client_addr.ip().to_string()
    }

    fn handle_describe(&self, cseq: &str, uri: &str) -> RtspResponse {
        tracing::debug!(%cseq, uri, "DESCRIBE");

        let host = self.host_from_uri_or_client(uri);
        let packetizer = self.context.new_packetizer();
        let origin = chrono::Utc::now().timestamp().max(0) as u64;
        let sdp = sdp::generate_sdp(
            packetizer.as_ref(),
            &host,
            origin,
            &self.context.config.session_name,
        );

        let content_base = if uri.ends_with('/') {
            uri.to_string()
        } else {
            format!("{uri}/")
        };

        RtspResponse::ok()
            .add_header("CSeq", cseq)
            .add_header("Content-Type", "application/sdp")
            .add_header("Content-Base", &content_base)
            .with_body(sdp)
    }

    fn negotiate(&self, requested: TransportHeader) -> crate::error::Result<Transport> {
        Ok(match requested {
            TransportHeader::Interleaved {
                rtp_channel,
                rtcp_channel,
            } => Transport::Interleaved {
                rtp_channel,
                rtcp_channel,
            },
            TransportHeader::Udp {
                client_rtp_port,
                client_rtcp_port,
            } => {
                let socket = UdpTransport::bind()?;
                let server_port = socket.local_port()?;
                Transport::Udp {
                    socket,
                    client_addr: SocketAddr::new(self.client_addr.ip(), client_rtp_port),
                    client_rtcp_port,
                    server_port,
                }
            }
        })
    }

    fn handle_setup(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        let requested = request
            .get_header("Transport")
            .map(TransportHeader::parse)
            .unwrap_or_default();

        let transport = match self.negotiate(requested) {
            Ok(transport) => transport,
            Err(e) => {
                tracing::error!(error = %e, "failed to bind RTP socket");
                return RtspResponse::new(500, "Internal Server Error").add_header("CSeq", cseq);
            }
        };

        let session = match self.session.take() {
            Some(mut existing) if existing.state() != SessionState::TornDown => {
                if existing.is_playing() {
                    tracing::warn!(session_id = %existing.id, "SETUP while playing, transport kept");
                } else {
                    existing.transport = transport;
                    existing.set_state(SessionState::Ready);
                }
                existing
            }
            _ => {
                let mut session = RtspSession::new(
                    self.context.sessions.next_id(),
                    &request.uri,
                    transport,
                    self.context.new_packetizer(),
                );
                session.set_state(SessionState::Ready);
                session
            }
        };

        tracing::info!(
            session_id = %session.id,
            uri = %request.uri,
            peer = %self.client_addr,
            transport = %session.transport.response_header(),
            "session configured via SETUP"
        );

        let response = RtspResponse::ok()
            .add_header("CSeq", cseq)
            .add_header("Transport", &session.transport.response_header())
            .add_header("Session", &session.session_header_value());
        self.session = Some(session);
        response
    }

    fn handle_play(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        let mut session = match self.session.take() {
            Some(session) if session.state() != SessionState::TornDown => session,
            _ => {
                tracing::info!(%cseq, "PLAY without SETUP, using interleaved 0-1");
                RtspSession::new(
                    self.context.sessions.next_id(),
                    &request.uri,
                    Transport::default(),
                    self.context.new_packetizer(),
                )
            }
        };
        session.set_state(SessionState::Playing);
        tracing::info!(session_id = %session.id, "session started playing");

        let mut resp = RtspResponse::ok()
            .add_header("CSeq", cseq)
            .add_header("Session", &session.session_header_value())
            .add_header("Range", "npt=now-");

        if let Some(packetizer) = session.packetizer() {
            let rtp_info = format!(
                "url={};seq={};rtptime={}",
                session.uri,
                packetizer.next_sequence(),
                packetizer.next_rtp_timestamp()
            );
            resp = resp.add_header("RTP-Info", &rtp_info);
        }

        self.session = Some(session);
        resp
    }

    fn handle_teardown(&mut self, cseq: &str) -> RtspResponse {
        let mut resp = RtspResponse::ok().add_header("CSeq", cseq);
        if let Some(session) = self.session.as_mut() {
            session.set_state(SessionState::TornDown);
            tracing::info!(session_id = %session.id, "session terminated via TEARDOWN");
            resp = resp.add_header("Session", &session.id);
        }
        resp
    }

    /// GET_PARAMETER is used by clients (e.g. VLC) as a keepalive (RFC 2326 §10.8).
    fn handle_get_parameter(&self, cseq: &str) -> RtspResponse {
        tracing::trace!(%cseq, "GET_PARAMETER keepalive");

        let mut resp = RtspResponse::ok().add_header("CSeq", cseq);
        if let Some(session) = &self.session {
            resp = resp.add_header("Session", &session.session_header_value());
        }
        resp
    }
}
