use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use scalecam::config::{BridgeConfig, RtspCodec};
use scalecam::media::encoder::{CachedRenderer, FfmpegEncoder, FfmpegStillRenderer, OverlayWriter};
use scalecam::weight::ScaleFeed;
use scalecam::onvif::OnvifDevice;
use scalecam::{CancelToken, DvripServer, OnvifServer, RtspServer, WeightBoard};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "scalecam",
    about = "Presents a weighing scale to an NVR as an IP camera"
)]
struct Args {
    /// TOML configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// RTSP bind address (host:port)
    #[arg(long)]
    rtsp_bind: Option<String>,

    /// DVR/IP bind address (host:port)
    #[arg(long)]
    dvrip_bind: Option<String>,

    /// Scale feed address (host:port)
    #[arg(long)]
    scale_addr: Option<String>,

    /// Serve H.264 instead of JPEG on the RTSP port
    #[arg(long)]
    h264: bool,

    #[arg(long)]
    no_rtsp: bool,

    #[arg(long)]
    no_dvrip: bool,

    /// Disable the ONVIF service and WS-Discovery
    #[arg(long)]
    no_onvif: bool,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short)]
    verbose: bool,
}

impl Args {
    fn apply(&self, config: &mut BridgeConfig) {
        if let Some(bind) = &self.rtsp_bind {
            config.rtsp.bind = bind.clone();
        }
        if let Some(bind) = &self.dvrip_bind {
            config.dvrip.bind = bind.clone();
        }
        if let Some(addr) = &self.scale_addr {
            config.scale.address = Some(addr.clone());
        }
        if self.h264 {
            config.rtsp.codec = RtspCodec::H264;
        }
        if self.no_rtsp {
            config.rtsp.enabled = false;
        }
        if self.no_dvrip {
            config.dvrip.enabled = false;
        }
        if self.no_onvif {
            config.onvif.enabled = false;
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let mut config = match &args.config {
        Some(path) => BridgeConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => BridgeConfig::default(),
    };
    args.apply(&mut config);
    config.validate().context("invalid configuration")?;

    if !config.rtsp.enabled && !config.dvrip.enabled {
        anyhow::bail!("both servers are disabled");
    }

    let board = WeightBoard::new(&config.scale.unit);
    let cancel = CancelToken::new();

    let mut feed = config
        .scale
        .address
        .as_deref()
        .map(|addr| ScaleFeed::spawn(addr, board.clone(), &config.scale.unit, cancel.child()));
    if feed.is_none() {
        tracing::warn!("no scale address configured, display shows NO DATA");
    }

    let rtsp_h264 = config.rtsp.enabled && config.rtsp.codec == RtspCodec::H264;
    let mut overlay = (rtsp_h264 || config.dvrip.enabled).then(|| {
        OverlayWriter::spawn(
            config.encoder.overlay_file.clone(),
            board.clone(),
            cancel.child(),
        )
    });

    let mut rtsp = None;
    if config.rtsp.enabled {
        let mut server = match config.rtsp.codec {
            RtspCodec::Jpeg => {
                let renderer = CachedRenderer::new(FfmpegStillRenderer::new(
                    &config.encoder.ffmpeg_path,
                    &config.video,
                ));
                RtspServer::new(
                    config.rtsp.clone(),
                    config.video.clone(),
                    Arc::new(renderer),
                    board.clone(),
                )
            }
            RtspCodec::H264 => RtspServer::with_h264(
                config.rtsp.clone(),
                config.video.clone(),
                Arc::new(FfmpegEncoder::new(&config.encoder, &config.video)),
                config.encoder.restart_policy(),
            ),
        };
        server.start().context("starting RTSP server")?;
        rtsp = Some(server);
    }

    // ONVIF only points recorders at the RTSP stream.
    let mut onvif = None;
    if config.onvif.enabled && config.rtsp.enabled {
        let mut device = OnvifDevice::from_config(&config);
        if let Some(server) = &rtsp {
            device = device.with_rtsp_port(server.local_addr()?.port());
        }
        let mut server = OnvifServer::new(config.onvif.clone(), device);
        server.start().context("starting ONVIF service")?;
        onvif = Some(server);
    }

    let mut dvrip = None;
    if config.dvrip.enabled {
        let mut server = DvripServer::new(
            config.dvrip.clone(),
            config.video.clone(),
            &config.encoder,
        );
        server.start().context("starting DVR/IP server")?;
        dvrip = Some(server);
    }

    if let Some(server) = &rtsp {
        let ip = server.local_addr()?.ip();
        let host = if ip.is_unspecified() {
            "localhost".to_string()
        } else {
            ip.to_string()
        };
        println!("RTSP stream: {}", server.stream_url(&host)?);
    }
    if let Some(server) = &dvrip {
        println!("DVR/IP device on port {}", server.local_addr()?.port());
    }
    if let Some(server) = &onvif {
        println!("ONVIF service on port {}", server.local_addr()?.port());
    }
    println!("press Enter to stop");

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    if let Some(mut server) = dvrip {
        server.stop();
    }
    if let Some(mut server) = onvif {
        server.stop();
    }
    if let Some(mut server) = rtsp {
        server.stop();
    }
    if let Some(overlay) = overlay.as_mut() {
        overlay.stop();
    }
    if let Some(feed) = feed.as_mut() {
        feed.stop();
    }
    cancel.cancel();

    Ok(())
}
