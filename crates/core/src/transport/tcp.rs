use std::io::ErrorKind;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::protocol::{MethodHandler, RtspRequest};
use crate::server::ServerContext;
use crate::session::SessionState;
use crate::transport::delivery::Delivery;
use crate::transport::reader::{Inbound, RequestReader};
use crate::transport::writer::SocketWriter;

const READ_TIMEOUT: Duration = Duration::from_millis(200);
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Non-blocking TCP accept loop.
///
/// Checks `cancel` between accepts with a 50ms poll interval so that
/// [`crate::server::RtspServer::stop`] can terminate it promptly.
pub fn accept_loop(listener: TcpListener, context: Arc<ServerContext>, cancel: CancelToken) {
    while !cancel.is_cancelled() {
        match listener.accept() {
            Ok((stream, _)) => {
                if stream.set_nonblocking(false).is_err() {
                    continue;
                }
                let c = context.clone();
                let token = cancel.child();
                thread::spawn(move || {
                    Connection::handle(stream, c, token);
                });
            }
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                if !cancel.is_cancelled() {
                    tracing::warn!(error = %e, "TCP accept error");
                }
            }
        }
    }
    tracing::debug!("accept loop exited");
}

/// A running delivery thread and the token that stops it.
struct Streamer {
    cancel: CancelToken,
    handle: JoinHandle<()>,
}

impl Streamer {
    fn stop(self) {
        self.cancel.cancel();
        let _ = self.handle.join();
    }
}

/// A single RTSP client connection with its own lifecycle.
struct Connection {
    stream: TcpStream,
    reader: RequestReader,
    writer: SocketWriter,
    handler: MethodHandler,
    context: Arc<ServerContext>,
    peer_addr: SocketAddr,
    cancel: CancelToken,
    streamer: Option<Streamer>,
}

impl Connection {
    /// Entry point: set up a connection and run its request loop.
    pub fn handle(stream: TcpStream, context: Arc<ServerContext>, cancel: CancelToken) {
        let peer_addr = match stream.peer_addr() {
            Ok(addr) => addr,
            Err(_) => return,
        };

        tracing::info!(%peer_addr, "client connected");

        let _ = stream.set_nodelay(true);
        if stream.set_read_timeout(Some(READ_TIMEOUT)).is_err()
            || stream.set_write_timeout(Some(WRITE_TIMEOUT)).is_err()
        {
            return;
        }
        let writer_stream = match stream.try_clone() {
            Ok(s) => s,
            Err(_) => return,
        };

        let handler = MethodHandler::new(context.clone(), peer_addr);

        let mut conn = Connection {
            stream,
            reader: RequestReader::new(),
            writer: SocketWriter::new(writer_stream),
            handler,
            context,
            peer_addr,
            cancel,
            streamer: None,
        };

        let reason = conn.run();
        conn.cleanup();

        tracing::info!(%peer_addr, reason, "client disconnected");
    }

    /// RTSP request/response loop. Returns the reason for exiting.
    fn run(&mut self) -> &'static str {
        while !self.cancel.is_cancelled() {
            match self.reader.fill(&mut self.stream) {
                Ok(0) => return "connection closed by client",
                Ok(_) => {}
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                    ) =>
                {
                    continue;
                }
                Err(_) => return "read error",
            }

            while let Some(inbound) = self.reader.next_inbound() {
                match inbound {
                    Inbound::Interleaved { channel, len } => {
                        tracing::trace!(peer = %self.peer_addr, channel, len, "client interleaved data skipped");
                    }
                    Inbound::Request(text) => {
                        if !self.respond(&text) {
                            return "write error";
                        }
                    }
                }
            }
        }

        "server shutting down"
    }

    /// Handle one request. Returns `false` if the response could not be written.
    fn respond(&mut self, text: &str) -> bool {
        let request = match RtspRequest::parse(text) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(peer = %self.peer_addr, error = %e, "parse error");
                return true;
            }
        };

        tracing::debug!(
            peer = %self.peer_addr,
            method = %request.method,
            uri = %request.uri,
            cseq = request.cseq(),
            session = request.session_id().unwrap_or("-"),
            "request"
        );

        let response = self.handler.handle(&request);

        tracing::debug!(
            peer = %self.peer_addr,
            status = response.status_code,
            "response"
        );

        if self
            .writer
            .write_all(response.serialize().as_bytes())
            .is_err()
        {
            return false;
        }

        self.sync_delivery();
        true
    }

    /// Start delivery when the session begins playing, stop it on teardown.
    fn sync_delivery(&mut self) {
        let Some(session) = self.handler.session_mut() else {
            return;
        };

        match session.state() {
            SessionState::Playing if self.streamer.is_none() => {
                let Some(packetizer) = session.take_packetizer() else {
                    tracing::warn!(session_id = %session.id, "no packetizer left for session");
                    return;
                };
                let delivery = Delivery {
                    session_id: session.id.clone(),
                    transport: session.transport.clone(),
                    packetizer,
                    writer: self.writer.clone(),
                    feed: self.context.feed.clone(),
                    video: self.context.video.clone(),
                };
                let cancel = self.cancel.child();
                let handle = delivery.spawn(cancel.clone());
                self.streamer = Some(Streamer { cancel, handle });
            }
            SessionState::TornDown => {
                if let Some(streamer) = self.streamer.take() {
                    streamer.stop();
                }
            }
            _ => {}
        }
    }

    fn cleanup(&mut self) {
        if let Some(streamer) = self.streamer.take() {
            streamer.stop();
        }
        if let Some(session) = self.handler.session() {
            tracing::info!(peer = %self.peer_addr, session_id = %session.id, "session dropped on disconnect");
        }
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}
