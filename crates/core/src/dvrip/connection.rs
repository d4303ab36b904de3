use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::Reply;
use super::auth::AuthState;
use super::demux::{self, Demuxed, MessageKind, ProtocolMessage};
use super::device::DeviceIdentity;
use super::dispatch::{CallContext, DEFAULT_CHANNEL, MethodTable, ObjectIds, RpcRequest};
use super::{binary, packet, text};
use crate::cancel::CancelToken;
use crate::config::VideoConfig;
use crate::media::container::ContainerFrame;
use crate::media::fanout::NalFanout;

const READ_CHUNK: usize = 8192;
const READ_TIMEOUT: Duration = Duration::from_millis(200);
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Server-lifetime values every connection reads.
pub(crate) struct Shared {
    pub identity: DeviceIdentity,
    pub video: VideoConfig,
    pub methods: MethodTable,
    pub fanout: NalFanout,
    /// Last container frame number handed out on this server.
    pub frames: AtomicU32,
}

/// Per-connection protocol state, owned by the connection's read loop.
#[derive(Debug)]
pub struct ConnectionState {
    /// Received bytes not yet consumed by the demultiplexer.
    pub pending: Vec<u8>,
    pub auth: AuthState,
    /// Channel byte for container frames, set by the last stream request.
    pub requested_channel: u8,
    pub objects: ObjectIds,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            pending: Vec::new(),
            auth: AuthState::default(),
            requested_channel: DEFAULT_CHANNEL,
            objects: ObjectIds::default(),
        }
    }
}

type SharedWriter = Arc<Mutex<TcpStream>>;

/// Non-blocking accept loop, polled every 50ms until `cancel` fires.
pub(crate) fn accept_loop(listener: TcpListener, shared: Arc<Shared>, cancel: CancelToken) {
    while !cancel.is_cancelled() {
        match listener.accept() {
            Ok((stream, _)) => {
                if stream.set_nonblocking(false).is_err() {
                    continue;
                }
                let shared = shared.clone();
                let token = cancel.child();
                thread::spawn(move || Connection::handle(stream, shared, token));
            }
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                if !cancel.is_cancelled() {
                    tracing::warn!(error = %e, "vendor accept error");
                }
            }
        }
    }
    tracing::debug!("vendor accept loop exited");
}

struct Connection {
    reader: TcpStream,
    writer: SharedWriter,
    state: ConnectionState,
    shared: Arc<Shared>,
    peer_addr: SocketAddr,
    cancel: CancelToken,
    streamer: Option<JoinHandle<()>>,
}

impl Connection {
    fn handle(stream: TcpStream, shared: Arc<Shared>, cancel: CancelToken) {
        let peer_addr = match stream.peer_addr() {
            Ok(addr) => addr,
            Err(_) => return,
        };
        tracing::info!(%peer_addr, "vendor client connected");

        let _ = stream.set_nodelay(true);
        if stream.set_read_timeout(Some(READ_TIMEOUT)).is_err()
            || stream.set_write_timeout(Some(WRITE_TIMEOUT)).is_err()
        {
            return;
        }
        let writer = match stream.try_clone() {
            Ok(s) => Arc::new(Mutex::new(s)),
            Err(_) => return,
        };

        let mut conn = Connection {
            reader: stream,
            writer,
            state: ConnectionState::default(),
            shared,
            peer_addr,
            cancel,
            streamer: None,
        };

        let reason = conn.run();
        conn.cleanup();

        tracing::info!(%peer_addr, reason, "vendor client disconnected");
    }

    /// Read loop. Returns the reason for exiting.
    fn run(&mut self) -> &'static str {
        let mut chunk = [0u8; READ_CHUNK];
        while !self.cancel.is_cancelled() {
            match self.reader.read(&mut chunk) {
                Ok(0) => return "connection closed by client",
                Ok(n) => {
                    self.state.pending.extend_from_slice(&chunk[..n]);
                    if let Err(e) = self.process_pending() {
                        tracing::debug!(peer = %self.peer_addr, error = %e, "reply write failed");
                        return "write error";
                    }
                }
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
        }
        "connection cancelled"
    }

    fn process_pending(&mut self) -> std::io::Result<()> {
        loop {
            match demux::next_message(&self.state.pending) {
                Demuxed::NeedMore => return Ok(()),
                Demuxed::Discard(n) => {
                    self.state.pending.drain(..n);
                }
                Demuxed::Message { message, consumed } => {
                    self.state.pending.drain(..consumed);
                    tracing::debug!(
                        peer = %self.peer_addr,
                        kind = ?message.kind,
                        code = format_args!("{:#04X}", message.type_byte()),
                        len = message.len(),
                        "message"
                    );

                    let reply = self.dispatch(&message);
                    if !reply.bytes.is_empty() {
                        self.writer.lock().write_all(&reply.bytes)?;
                    }
                    if reply.start_stream {
                        self.start_streaming();
                    }
                }
            }
        }
    }

    fn dispatch(&mut self, message: &ProtocolMessage) -> Reply {
        let shared = &*self.shared;
        match message.kind {
            MessageKind::Binary => {
                binary::handle(message, &shared.identity, &shared.video, &mut self.state)
            }
            MessageKind::TextCommand => text::handle(
                message.payload(),
                shared.identity.session_id,
                &mut self.state.objects,
            ),
            MessageKind::BinaryJson | MessageKind::DhipJson | MessageKind::BareJson => {
                self.dispatch_json(message)
            }
        }
    }

    fn dispatch_json(&mut self, message: &ProtocolMessage) -> Reply {
        let Some(request) = RpcRequest::parse(message.payload()) else {
            tracing::warn!(peer = %self.peer_addr, kind = ?message.kind, "malformed json request");
            return Reply::default();
        };
        tracing::debug!(peer = %self.peer_addr, method = %request.method, id = request.id(), "json request");

        let shared = &*self.shared;
        let mut ctx = CallContext {
            identity: &shared.identity,
            video: &shared.video,
            auth: &mut self.state.auth,
            objects: &mut self.state.objects,
            channel: &mut self.state.requested_channel,
        };
        let rpc = shared.methods.dispatch(&request, &mut ctx);
        let body = rpc.to_bytes();
        let session = shared.identity.session_id;

        let header = match message.kind {
            MessageKind::DhipJson => packet::dhip_reply(session, message.u32_le(12), body.len()),
            kind => {
                let framed_id = if kind == MessageKind::BinaryJson {
                    message.u32_le(8)
                } else {
                    0
                };
                let request_id = if framed_id != 0 {
                    framed_id
                } else {
                    request.id() as u32
                };
                packet::json_reply(request_id, session, body.len())
            }
        };

        Reply {
            bytes: header.with_payload(&body),
            start_stream: rpc.start_stream,
        }
    }

    fn start_streaming(&mut self) {
        if self.streamer.is_some() {
            tracing::debug!(peer = %self.peer_addr, "stream already running");
            return;
        }

        let writer = self.writer.clone();
        let shared = self.shared.clone();
        let channel = self.state.requested_channel;
        let cancel = self.cancel.clone();
        let peer_addr = self.peer_addr;
        tracing::info!(%peer_addr, channel, "stream started");

        self.streamer = Some(thread::spawn(move || {
            stream_frames(&writer, &shared, channel, &cancel, peer_addr);
        }));
    }

    fn cleanup(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.streamer.take() {
            let _ = handle.join();
        }
        let _ = self.reader.shutdown(Shutdown::Both);
    }
}

/// Wrap each drained access unit in a container frame and write it, paced
/// to the configured frame interval. A failed write ends the connection.
fn stream_frames(
    writer: &SharedWriter,
    shared: &Shared,
    channel: u8,
    cancel: &CancelToken,
    peer_addr: SocketAddr,
) {
    let subscription = shared.fanout.subscribe();
    let video = &shared.video;
    let interval = video.frame_interval();
    let frame_rate = u8::try_from(video.frame_rate).unwrap_or(u8::MAX);
    let mut next_frame = Instant::now();
    let mut sent = 0u64;

    while !cancel.is_cancelled() {
        let units = subscription.drain(DRAIN_TIMEOUT);
        if units.is_empty() {
            continue;
        }

        let number = shared.frames.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        let frame = ContainerFrame::from_access_unit(
            &units,
            number,
            channel,
            chrono::Local::now().naive_local(),
            video.width,
            video.height,
            frame_rate,
        );

        if let Err(e) = writer.lock().write_all(&frame.to_bytes()) {
            tracing::debug!(%peer_addr, error = %e, sent, "frame write failed");
            cancel.cancel();
            break;
        }
        sent += 1;

        next_frame += interval;
        let now = Instant::now();
        if next_frame > now {
            if !cancel.sleep(next_frame - now) {
                break;
            }
        } else {
            next_frame = now;
        }
    }

    tracing::debug!(%peer_addr, sent, "stream stopped");
}
