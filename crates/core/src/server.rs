use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::config::{RtspConfig, VideoConfig};
use crate::error::{BridgeError, Result};
use crate::media::encoder::{FrameRenderer, StreamSource};
use crate::media::fanout::NalFanout;
use crate::media::framer::{ElementaryStreamFramer, RestartPolicy};
use crate::media::h264::H264Packetizer;
use crate::media::jpeg::JpegPacketizer;
use crate::media::{MediaFeed, Packetizer};
use crate::session::SessionIds;
use crate::transport::tcp;
use crate::weight::WeightBoard;

/// How long DESCRIBE waits for the encoder's first SPS and PPS.
const PARAMETER_SET_WAIT: Duration = Duration::from_secs(2);

/// Server-lifetime values shared by every RTSP connection.
pub struct ServerContext {
    pub config: RtspConfig,
    pub video: VideoConfig,
    pub feed: MediaFeed,
    pub sessions: SessionIds,
}

impl ServerContext {
    pub fn new(config: RtspConfig, video: VideoConfig, feed: MediaFeed) -> Self {
        Self {
            config,
            video,
            feed,
            sessions: SessionIds::default(),
        }
    }

    /// Fresh RTP state for one client, matching the feed's codec.
    pub fn new_packetizer(&self) -> Box<dyn Packetizer> {
        let video = &self.video;
        match &self.feed {
            MediaFeed::Jpeg { .. } => Box::new(JpegPacketizer::with_random_state(
                video.width,
                video.height,
                video.frame_rate,
            )),
            MediaFeed::H264(fanout) => {
                let mut packetizer = H264Packetizer::with_random_state(video.frame_rate);
                match fanout.wait_for_parameter_sets(PARAMETER_SET_WAIT) {
                    Some((sps, pps)) => packetizer.set_parameter_sets(sps, pps),
                    None => tracing::warn!("encoder parameter sets not yet known, SDP omits them"),
                }
                Box::new(packetizer)
            }
        }
    }
}

/// Encoder feeding an H.264 server, started and stopped with it.
struct EncoderFeed {
    source: Arc<dyn StreamSource>,
    fanout: NalFanout,
    restart: RestartPolicy,
}

/// RTSP server orchestrator.
///
/// Owns the shared context, the accept thread and, for an H.264 feed, the
/// framer reading the encoder. Connection handling lives in
/// [`crate::transport::tcp`], frame delivery in
/// [`crate::transport::delivery`].
pub struct RtspServer {
    context: Arc<ServerContext>,
    encoder: Option<EncoderFeed>,
    running: Option<Running>,
}

struct Running {
    cancel: CancelToken,
    local_addr: SocketAddr,
    accept: JoinHandle<()>,
    framer: Option<ElementaryStreamFramer>,
}

impl RtspServer {
    /// Server streaming a rendered JPEG of the weight.
    pub fn new(
        config: RtspConfig,
        video: VideoConfig,
        renderer: Arc<dyn FrameRenderer>,
        board: WeightBoard,
    ) -> Self {
        let feed = MediaFeed::Jpeg { renderer, board };
        Self {
            context: Arc::new(ServerContext::new(config, video, feed)),
            encoder: None,
            running: None,
        }
    }

    /// Server streaming H.264 from `source`.
    pub fn with_h264(
        config: RtspConfig,
        video: VideoConfig,
        source: Arc<dyn StreamSource>,
        restart: RestartPolicy,
    ) -> Self {
        let fanout = NalFanout::new();
        Self {
            context: Arc::new(ServerContext::new(config, video, MediaFeed::H264(fanout.clone()))),
            encoder: Some(EncoderFeed {
                source,
                fanout,
                restart,
            }),
            running: None,
        }
    }

    pub fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Err(BridgeError::AlreadyRunning);
        }

        let listener = TcpListener::bind(&self.context.config.bind)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let cancel = CancelToken::new();
        let framer = self.encoder.as_ref().map(|encoder| {
            ElementaryStreamFramer::spawn(
                encoder.source.clone(),
                encoder.fanout.clone(),
                encoder.restart,
                cancel.child(),
            )
        });
        let accept = {
            let context = self.context.clone();
            let token = cancel.clone();
            thread::spawn(move || tcp::accept_loop(listener, context, token))
        };

        tracing::info!(
            addr = %local_addr,
            stream = %self.context.config.stream_name,
            h264 = framer.is_some(),
            "RTSP server listening"
        );

        self.running = Some(Running {
            cancel,
            local_addr,
            accept,
            framer,
        });
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(mut running) = self.running.take() {
            running.cancel.cancel();
            if let Some(framer) = running.framer.as_mut() {
                framer.stop();
            }
            let _ = running.accept.join();
            tracing::info!("RTSP server stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Bound address; useful when binding port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.running
            .as_ref()
            .map(|r| r.local_addr)
            .ok_or(BridgeError::NotStarted)
    }

    /// URL clients should open, e.g. `rtsp://192.168.1.20:8554/scale`.
    pub fn stream_url(&self, host: &str) -> Result<String> {
        let port = self.local_addr()?.port();
        let host = self.context.config.public_host.as_deref().unwrap_or(host);
        Ok(format!(
            "rtsp://{}:{}/{}",
            host, port, self.context.config.stream_name
        ))
    }
}

impl Drop for RtspServer {
    fn drop(&mut self) {
        self.stop();
    }
}
