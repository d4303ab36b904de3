use std::io::{ErrorKind, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::discovery::{Advertisement, DISCOVERY_PORT, DiscoveryResponder};
use super::http::{self, HttpRequest};
use super::services::{CallSite, OnvifDevice};
use super::soap::SoapFault;
use super::{axis, security, xml};
use crate::cancel::CancelToken;
use crate::config::OnvifConfig;
use crate::error::{BridgeError, Result};
use crate::protocol::auth::Credentials;

const IO_TIMEOUT: Duration = Duration::from_secs(5);
const SOAP_CONTENT_TYPE: &str = "application/soap+xml; charset=utf-8";

struct Shared {
    device: OnvifDevice,
    /// WS-Security credentials, when the stream itself requires them.
    credentials: Option<Credentials>,
}

/// ONVIF SOAP listener plus the optional discovery responder.
pub struct OnvifServer {
    config: OnvifConfig,
    device: OnvifDevice,
    running: Option<Running>,
}

struct Running {
    cancel: CancelToken,
    local_addr: SocketAddr,
    accept: JoinHandle<()>,
    discovery: Option<DiscoveryResponder>,
}

impl OnvifServer {
    pub fn new(config: OnvifConfig, device: OnvifDevice) -> Self {
        Self {
            config,
            device,
            running: None,
        }
    }

    pub fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Err(BridgeError::AlreadyRunning);
        }

        let listener = TcpListener::bind(&self.config.bind)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let credentials = self
            .device
            .rtsp
            .require_auth
            .then(|| Credentials::new(&self.device.rtsp.username, &self.device.rtsp.password));
        let shared = Arc::new(Shared {
            device: self.device.clone(),
            credentials,
        });

        let cancel = CancelToken::new();
        let accept = {
            let token = cancel.clone();
            thread::spawn(move || accept_loop(listener, shared, token))
        };

        // Discovery is best effort: another responder may own the port.
        let discovery = if self.config.discovery {
            let bind = SocketAddr::from((Ipv4Addr::UNSPECIFIED, DISCOVERY_PORT));
            let ad = Advertisement::new(local_addr.port());
            match DiscoveryResponder::spawn(bind, true, ad, cancel.child()) {
                Ok(responder) => Some(responder),
                Err(e) => {
                    tracing::warn!(error = %e, "WS-Discovery unavailable");
                    None
                }
            }
        } else {
            None
        };

        tracing::info!(addr = %local_addr, discovery = discovery.is_some(), "ONVIF service listening");

        self.running = Some(Running {
            cancel,
            local_addr,
            accept,
            discovery,
        });
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(mut running) = self.running.take() {
            running.cancel.cancel();
            if let Some(discovery) = running.discovery.as_mut() {
                discovery.stop();
            }
            let _ = running.accept.join();
            tracing::info!("ONVIF service stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.running
            .as_ref()
            .map(|r| r.local_addr)
            .ok_or(BridgeError::NotStarted)
    }
}

impl Drop for OnvifServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(listener: TcpListener, shared: Arc<Shared>, cancel: CancelToken) {
    while !cancel.is_cancelled() {
        match listener.accept() {
            Ok((stream, _)) => {
                if stream.set_nonblocking(false).is_err() {
                    continue;
                }
                let shared = shared.clone();
                thread::spawn(move || handle(stream, &shared));
            }
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                if !cancel.is_cancelled() {
                    tracing::warn!(error = %e, "ONVIF accept error");
                }
            }
        }
    }
    tracing::debug!("ONVIF accept loop exited");
}

fn handle(mut stream: TcpStream, shared: &Shared) {
    let (Ok(peer), Ok(local)) = (stream.peer_addr(), stream.local_addr()) else {
        return;
    };
    if stream.set_read_timeout(Some(IO_TIMEOUT)).is_err()
        || stream.set_write_timeout(Some(IO_TIMEOUT)).is_err()
    {
        return;
    }

    let request = match http::read_request(&mut stream) {
        Ok(Some(request)) => request,
        Ok(None) => return,
        Err(e) => {
            tracing::debug!(%peer, error = %e, "ONVIF request read failed");
            return;
        }
    };

    let reply = serve(&request, shared, local);
    if let Err(e) = stream.write_all(&reply) {
        tracing::debug!(%peer, error = %e, "ONVIF reply write failed");
    }
}

/// Complete HTTP response for one request.
fn serve(request: &HttpRequest, shared: &Shared, local: SocketAddr) -> Vec<u8> {
    if request.method == "GET" && request.path.starts_with(axis::CGI_PREFIX) {
        let action = request.query_param("action").unwrap_or_default();
        let group = request.query_param("group").unwrap_or_default();
        tracing::info!(action, group, "Axis CGI request");
        let body = axis::param_response(&shared.device, action, group);
        return http::response(200, "text/plain", &body);
    }
    if request.method != "POST" {
        return http::response(405, "text/plain", "");
    }

    let fallback = local.to_string();
    let site = CallSite {
        authority: request.header("Host").unwrap_or(fallback.as_str()),
        local_ip: local.ip(),
    };
    match soap_call(request, shared, &site) {
        Ok(body) => http::response(200, SOAP_CONTENT_TYPE, &body),
        Err(fault) => {
            tracing::warn!(path = %request.path, error = %fault, "SOAP fault");
            http::response(fault.http_status(), SOAP_CONTENT_TYPE, &fault.to_envelope())
        }
    }
}

fn soap_call(
    request: &HttpRequest,
    shared: &Shared,
    site: &CallSite<'_>,
) -> std::result::Result<String, SoapFault> {
    let envelope = request.body.as_str();
    let action = xml::body_action(envelope).ok_or(SoapFault::MissingAction)?;
    tracing::info!(path = %request.path, action, "ONVIF request");

    if let Some(credentials) = &shared.credentials {
        if !security::is_pre_auth(action) && !security::authorize(credentials, envelope) {
            return Err(SoapFault::NotAuthorized);
        }
    }
    shared.device.respond(&request.path, action, envelope, site)
}
