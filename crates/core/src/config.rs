//! Bridge configuration.
//!
//! Loaded from an optional TOML file. Every section and field has a default,
//! so an empty file (or no file at all) yields a working 1080p/30 setup:
//!
//! ```toml
//! [video]
//! width = 1280
//! height = 720
//! frame_rate = 15
//!
//! [rtsp]
//! require_auth = true
//! password = "secret"
//!
//! [dvrip]
//! serial_number = "3G012345PAF67890"
//!
//! [onvif]
//! discovery = false
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{BridgeError, Result};
use crate::media::framer::RestartPolicy;

/// Top-level configuration for both servers and their media collaborators.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub video: VideoConfig,
    pub rtsp: RtspConfig,
    pub dvrip: DvripConfig,
    pub onvif: OnvifConfig,
    pub encoder: EncoderConfig,
    pub scale: ScaleConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub width: u16,
    pub height: u16,
    pub frame_rate: u32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            frame_rate: 30,
        }
    }
}

impl VideoConfig {
    /// Time between two delivered frames.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.frame_rate.max(1)))
    }

    /// RTP timestamp increment per frame at the 90 kHz video clock.
    pub fn rtp_timestamp_increment(&self) -> u32 {
        90_000 / self.frame_rate.max(1)
    }
}

/// Codec served on the RTSP port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RtspCodec {
    /// RFC 2435 JPEG stills rendered per frame.
    #[default]
    Jpeg,
    /// RFC 6184 H.264 from a continuously running encoder.
    H264,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RtspConfig {
    pub enabled: bool,
    pub bind: String,
    pub stream_name: String,
    pub codec: RtspCodec,
    pub require_auth: bool,
    pub username: String,
    pub password: String,
    /// Host advertised in SDP `o=`/`c=` lines. Inferred from the request URI
    /// when unset.
    pub public_host: Option<String>,
    pub session_name: String,
}

impl Default for RtspConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "0.0.0.0:8554".to_string(),
            stream_name: "scale".to_string(),
            codec: RtspCodec::Jpeg,
            require_auth: false,
            username: "admin".to_string(),
            password: "scale123".to_string(),
            public_host: None,
            session_name: "Scale Streamer".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DvripConfig {
    pub enabled: bool,
    pub bind: String,
    /// Serial reported to clients. Generated once per run when unset.
    pub serial_number: Option<String>,
    pub device_type: String,
    pub channel_name: String,
}

impl Default for DvripConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "0.0.0.0:37777".to_string(),
            serial_number: None,
            device_type: "IPC-HFW2431T-ZS".to_string(),
            channel_name: "Scale Camera".to_string(),
        }
    }
}

/// ONVIF device and media services plus WS-Discovery.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OnvifConfig {
    pub enabled: bool,
    pub bind: String,
    /// Answer WS-Discovery probes on the multicast group.
    pub discovery: bool,
    pub hostname: String,
}

impl Default for OnvifConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: "0.0.0.0:8080".to_string(),
            discovery: true,
            hostname: "scalecam".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub ffmpeg_path: String,
    pub bitrate: String,
    pub restart_delay_ms: u64,
    pub max_restart_delay_ms: u64,
    /// The encoder is restarted after producing nothing for this long.
    pub stall_timeout_ms: u64,
    /// Text file the encoder overlay reloads every frame.
    pub overlay_file: PathBuf,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            bitrate: "1024k".to_string(),
            restart_delay_ms: 1000,
            max_restart_delay_ms: 10_000,
            stall_timeout_ms: 5000,
            overlay_file: std::env::temp_dir().join("scalecam-overlay.txt"),
        }
    }
}

impl EncoderConfig {
    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    pub fn max_restart_delay(&self) -> Duration {
        Duration::from_millis(self.max_restart_delay_ms.max(self.restart_delay_ms))
    }

    pub fn restart_policy(&self) -> RestartPolicy {
        RestartPolicy {
            initial: self.restart_delay(),
            max: self.max_restart_delay(),
            stall: Duration::from_millis(self.stall_timeout_ms.max(1)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScaleConfig {
    /// `host:port` of a line-oriented scale feed. No feed when unset.
    pub address: Option<String>,
    pub unit: String,
    pub scale_id: Option<String>,
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self {
            address: None,
            unit: "lb".to_string(),
            scale_id: None,
        }
    }
}

impl BridgeConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        tracing::info!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let video = &self.video;
        if video.width == 0 || video.height == 0 {
            return Err(BridgeError::Config("video dimensions must be non-zero".into()));
        }
        // RFC 2435 carries width/height as one byte of 8-pixel blocks.
        if video.width > 2040 || video.height > 2040 {
            return Err(BridgeError::Config(format!(
                "{}x{} exceeds the 2040 pixel JPEG/RTP limit",
                video.width, video.height
            )));
        }
        if !(1..=60).contains(&video.frame_rate) {
            return Err(BridgeError::Config(format!(
                "frame_rate {} outside 1..=60",
                video.frame_rate
            )));
        }
        if self.rtsp.stream_name.is_empty() {
            return Err(BridgeError::Config("rtsp.stream_name must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = BridgeConfig::from_toml_str("").unwrap();
        assert_eq!(config.video.width, 1920);
        assert_eq!(config.video.height, 1080);
        assert_eq!(config.video.frame_rate, 30);
        assert_eq!(config.rtsp.bind, "0.0.0.0:8554");
        assert_eq!(config.rtsp.codec, RtspCodec::Jpeg);
        assert_eq!(config.rtsp.username, "admin");
        assert!(!config.rtsp.require_auth);
        assert_eq!(config.dvrip.bind, "0.0.0.0:37777");
        assert_eq!(config.onvif.bind, "0.0.0.0:8080");
        assert!(config.onvif.enabled && config.onvif.discovery);
        assert_eq!(config.scale.unit, "lb");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = BridgeConfig::from_toml_str(
            "[video]\nframe_rate = 15\n\n[rtsp]\nrequire_auth = true\n",
        )
        .unwrap();
        assert_eq!(config.video.frame_rate, 15);
        assert_eq!(config.video.width, 1920);
        assert!(config.rtsp.require_auth);
        assert_eq!(config.rtsp.password, "scale123");
    }

    #[test]
    fn codec_and_stall_timeout_are_configurable() {
        let config = BridgeConfig::from_toml_str(
            "[rtsp]\ncodec = \"h264\"\n\n[encoder]\nstall_timeout_ms = 2500\n",
        )
        .unwrap();
        assert_eq!(config.rtsp.codec, RtspCodec::H264);
        let policy = config.encoder.restart_policy();
        assert_eq!(policy.stall, Duration::from_millis(2500));
        assert_eq!(policy.initial, Duration::from_secs(1));

        assert!(BridgeConfig::from_toml_str("[rtsp]\ncodec = \"vp8\"\n").is_err());
    }

    #[test]
    fn onvif_section_overrides() {
        let config = BridgeConfig::from_toml_str(
            "[onvif]\nbind = \"127.0.0.1:8999\"\ndiscovery = false\n",
        )
        .unwrap();
        assert_eq!(config.onvif.bind, "127.0.0.1:8999");
        assert!(config.onvif.enabled);
        assert!(!config.onvif.discovery);
    }

    #[test]
    fn rejects_out_of_range_frame_rate() {
        let err = BridgeConfig::from_toml_str("[video]\nframe_rate = 0\n").unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
        assert!(BridgeConfig::from_toml_str("[video]\nframe_rate = 120\n").is_err());
    }

    #[test]
    fn rejects_oversized_frame() {
        assert!(BridgeConfig::from_toml_str("[video]\nwidth = 4096\n").is_err());
    }

    #[test]
    fn malformed_toml_is_decode_error() {
        let err = BridgeConfig::from_toml_str("[video\n").unwrap_err();
        assert!(matches!(err, BridgeError::ConfigDecode(_)));
    }

    #[test]
    fn timing_helpers() {
        let video = VideoConfig {
            frame_rate: 25,
            ..VideoConfig::default()
        };
        assert_eq!(video.rtp_timestamp_increment(), 3600);
        assert_eq!(video.frame_interval(), Duration::from_millis(40));
    }
}
