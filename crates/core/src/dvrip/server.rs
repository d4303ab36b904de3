use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::AtomicU32;
use std::thread::{self, JoinHandle};

use super::connection::{self, Shared};
use super::device::DeviceIdentity;
use super::dispatch::MethodTable;
use crate::cancel::CancelToken;
use crate::config::{DvripConfig, EncoderConfig, VideoConfig};
use crate::error::{BridgeError, Result};
use crate::media::encoder::{FfmpegEncoder, StreamSource};
use crate::media::fanout::NalFanout;
use crate::media::framer::{ElementaryStreamFramer, RestartPolicy};

/// Vendor protocol listener.
///
/// Owns the device identity for its run, the elementary-stream framer that
/// feeds every attached client, and the accept loop.
pub struct DvripServer {
    config: DvripConfig,
    video: VideoConfig,
    source: Arc<dyn StreamSource>,
    restart: RestartPolicy,
    running: Option<Running>,
}

struct Running {
    cancel: CancelToken,
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    framer: ElementaryStreamFramer,
    accept: JoinHandle<()>,
}

impl DvripServer {
    /// Server fed by an ffmpeg encoder built from `encoder`.
    pub fn new(config: DvripConfig, video: VideoConfig, encoder: &EncoderConfig) -> Self {
        let source = Arc::new(FfmpegEncoder::new(encoder, &video));
        let restart = encoder.restart_policy();
        Self::with_source(config, video, source, restart)
    }

    pub fn with_source(
        config: DvripConfig,
        video: VideoConfig,
        source: Arc<dyn StreamSource>,
        restart: RestartPolicy,
    ) -> Self {
        Self {
            config,
            video,
            source,
            restart,
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

        let cancel = CancelToken::new();
        let fanout = NalFanout::new();
        let shared = Arc::new(Shared {
            identity: DeviceIdentity::generate(&self.config),
            video: self.video.clone(),
            methods: MethodTable::standard(),
            fanout: fanout.clone(),
            frames: AtomicU32::new(0),
        });

        let framer =
            ElementaryStreamFramer::spawn(self.source.clone(), fanout, self.restart, cancel.child());

        let accept = {
            let shared = shared.clone();
            let token = cancel.clone();
            thread::spawn(move || connection::accept_loop(listener, shared, token))
        };

        tracing::info!(addr = %local_addr, "vendor protocol server listening");

        self.running = Some(Running {
            cancel,
            local_addr,
            shared,
            framer,
            accept,
        });
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(mut running) = self.running.take() {
            running.cancel.cancel();
            running.framer.stop();
            let _ = running.accept.join();
            tracing::info!("vendor protocol server stopped");
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

    /// Identity presented for the current run.
    pub fn identity(&self) -> Result<&DeviceIdentity> {
        self.running
            .as_ref()
            .map(|r| &r.shared.identity)
            .ok_or(BridgeError::NotStarted)
    }
}

impl Drop for DvripServer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::encoder::EncoderStream;
    use std::io;

    struct Silent;

    impl StreamSource for Silent {
        fn open(&self) -> io::Result<EncoderStream> {
            Ok(EncoderStream::from_reader(io::empty()))
        }
    }

    fn server() -> DvripServer {
        let config = DvripConfig {
            bind: "127.0.0.1:0".to_string(),
            ..DvripConfig::default()
        };
        DvripServer::with_source(
            config,
            VideoConfig::default(),
            Arc::new(Silent),
            RestartPolicy::default(),
        )
    }

    #[test]
    fn lifecycle() {
        let mut server = server();
        assert!(matches!(server.local_addr(), Err(BridgeError::NotStarted)));
        server.start().unwrap();
        assert!(server.is_running());
        assert_ne!(server.local_addr().unwrap().port(), 0);
        assert!(matches!(server.start(), Err(BridgeError::AlreadyRunning)));
        server.stop();
        assert!(!server.is_running());
    }

    #[test]
    fn identity_is_fixed_for_a_run() {
        let mut server = server();
        server.start().unwrap();
        let first = server.identity().unwrap().session_id;
        assert_eq!(server.identity().unwrap().session_id, first);
        server.stop();
    }
}
