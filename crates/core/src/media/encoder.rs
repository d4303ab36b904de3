//! External encoder collaborators.
//!
//! The bridge never draws pixels itself. It asks a [`StreamSource`] for a
//! continuous Annex B byte stream and a [`FrameRenderer`] for a JPEG still of
//! the current weight; the ffmpeg-backed implementations below are what the
//! CLI wires in.

use std::fs;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::cancel::CancelToken;
use crate::config::{EncoderConfig, VideoConfig};
use crate::error::{BridgeError, Result};
use crate::weight::{WeightBoard, WeightDisplay};

const RENDER_TIMEOUT: Duration = Duration::from_secs(5);
const OVERLAY_POLL: Duration = Duration::from_millis(100);

/// A readable H.264 Annex B stream. Dropping it stops the producer.
pub struct EncoderStream {
    reader: Box<dyn Read + Send>,
    process: EncoderProcess,
}

impl EncoderStream {
    /// Wrap an in-process reader with no child process attached.
    pub fn from_reader(reader: impl Read + Send + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            process: EncoderProcess::default(),
        }
    }

    fn from_child(mut child: Child) -> io::Result<Self> {
        let stdout: ChildStdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("encoder stdout not captured"))?;
        Ok(Self {
            reader: Box::new(stdout),
            process: EncoderProcess {
                child: Arc::new(Mutex::new(Some(child))),
            },
        })
    }

    /// Handle that can stop the producer while another thread is blocked
    /// reading this stream.
    pub fn process(&self) -> EncoderProcess {
        self.process.clone()
    }
}

impl Read for EncoderStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl Drop for EncoderStream {
    fn drop(&mut self) {
        self.process.kill();
    }
}

/// Shared handle to the child process behind an [`EncoderStream`].
///
/// Killing closes the child's stdout, so a blocked read on the stream
/// returns. Killing twice, or killing an in-process stream, does nothing.
#[derive(Debug, Clone, Default)]
pub struct EncoderProcess {
    child: Arc<Mutex<Option<Child>>>,
}

impl EncoderProcess {
    pub fn kill(&self) {
        let Some(mut child) = self.child.lock().take() else {
            return;
        };
        let _ = child.kill();
        match child.wait() {
            Ok(status) => tracing::debug!(%status, "encoder process reaped"),
            Err(e) => tracing::warn!(error = %e, "failed to reap encoder process"),
        }
    }
}

/// Producer of a continuous H.264 elementary stream.
pub trait StreamSource: Send + Sync {
    fn open(&self) -> io::Result<EncoderStream>;
}

/// Producer of one JPEG still for the given display text.
pub trait FrameRenderer: Send + Sync {
    fn render(&self, display: &WeightDisplay) -> Result<Vec<u8>>;
}

/// Escape text for use inside a single-quoted ffmpeg filter option.
fn escape_drawtext(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\'' => out.push_str("'\\''"),
            ':' | '\\' | '%' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

/// Continuous all-intra H.264 from ffmpeg's lavfi source with the weight
/// text read from a file that is reloaded every frame.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    ffmpeg_path: String,
    bitrate: String,
    overlay_file: PathBuf,
    video: VideoConfig,
}

impl FfmpegEncoder {
    pub fn new(encoder: &EncoderConfig, video: &VideoConfig) -> Self {
        Self {
            ffmpeg_path: encoder.ffmpeg_path.clone(),
            bitrate: encoder.bitrate.clone(),
            overlay_file: encoder.overlay_file.clone(),
            video: video.clone(),
        }
    }

    fn args(&self) -> Vec<String> {
        let VideoConfig {
            width,
            height,
            frame_rate,
        } = self.video;
        let overlay = escape_drawtext(&self.overlay_file.to_string_lossy());

        let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-re", "-f", "lavfi"]
            .map(String::from)
            .to_vec();
        args.push("-i".into());
        args.push(format!("color=black:s={width}x{height}:r={frame_rate}:d=86400"));
        args.push("-vf".into());
        args.push(format!(
            "drawtext=textfile='{overlay}':reload=1:fontsize={size}:fontcolor=white:\
             x=(w-text_w)/2:y=(h-text_h)/2",
            size = u32::from(height) / 8,
        ));
        args.extend(
            [
                "-c:v", "libx264", "-preset", "ultrafast", "-tune", "zerolatency",
                "-profile:v", "baseline", "-level", "3.1",
            ]
            .map(String::from),
        );
        for flag in ["-b:v", "-maxrate", "-bufsize"] {
            args.push(flag.into());
            args.push(self.bitrate.clone());
        }
        // Every frame is an IDR carrying its own SPS and PPS, so a client can
        // start decoding immediately.
        args.extend(
            [
                "-g", "1", "-keyint_min", "1", "-pix_fmt", "yuv420p", "-bsf:v", "dump_extra",
                "-f", "h264", "pipe:1",
            ]
            .map(String::from),
        );
        args
    }
}

impl StreamSource for FfmpegEncoder {
    fn open(&self) -> io::Result<EncoderStream> {
        let mut child = Command::new(&self.ffmpeg_path)
            .args(self.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        tracing::info!(pid = child.id(), "encoder process started");

        if let Some(stderr) = child.stderr.take() {
            thread::spawn(move || {
                for line in BufReader::new(stderr).lines().map_while(|l| l.ok()) {
                    tracing::debug!(target: "scalecam::encoder", "{line}");
                }
            });
        }

        EncoderStream::from_child(child)
    }
}

/// Single-frame JPEG renderer backed by ffmpeg.
#[derive(Debug, Clone)]
pub struct FfmpegStillRenderer {
    ffmpeg_path: String,
    width: u16,
    height: u16,
}

impl FfmpegStillRenderer {
    pub fn new(ffmpeg_path: &str, video: &VideoConfig) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.to_string(),
            width: video.width,
            height: video.height,
        }
    }

    fn filter(&self, display: &WeightDisplay) -> String {
        let big = u32::from(self.height) / 6;
        let small = u32::from(self.height) / 16;
        format!(
            "drawtext=text='{value}':fontsize={big}:fontcolor=white:\
             x=(w-text_w)/2:y=(h-text_h)/2,\
             drawtext=text='{status}':fontsize={small}:fontcolor=yellow:\
             x=(w-text_w)/2:y=(h/2)+{offset}",
            value = escape_drawtext(&display.value_text),
            status = escape_drawtext(&display.status_text),
            offset = big,
        )
    }
}

impl FrameRenderer for FfmpegStillRenderer {
    fn render(&self, display: &WeightDisplay) -> Result<Vec<u8>> {
        let mut child = Command::new(&self.ffmpeg_path)
            .args(["-hide_banner", "-loglevel", "error", "-f", "lavfi", "-i"])
            .arg(format!("color=black:s={}x{}:d=1", self.width, self.height))
            .arg("-vf")
            .arg(self.filter(display))
            .args(["-frames:v", "1", "-q:v", "3", "-pix_fmt", "yuvj420p"])
            .args(["-f", "mjpeg", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::Render("stdout not captured".into()))?;
        let reader = thread::spawn(move || {
            let mut jpeg = Vec::new();
            stdout.read_to_end(&mut jpeg).map(|_| jpeg)
        });

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if started.elapsed() > RENDER_TIMEOUT {
                let _ = child.kill();
                let _ = child.wait();
                return Err(BridgeError::Render("ffmpeg still render timed out".into()));
            }
            thread::sleep(Duration::from_millis(10));
        };

        let jpeg = reader
            .join()
            .map_err(|_| BridgeError::Render("reader thread panicked".into()))??;
        if !status.success() || jpeg.is_empty() {
            return Err(BridgeError::Render(format!("ffmpeg exited with {status}")));
        }
        Ok(jpeg)
    }
}

/// Re-renders only when the display text changes.
pub struct CachedRenderer<R> {
    inner: R,
    last: Mutex<Option<(WeightDisplay, Vec<u8>)>>,
}

impl<R: FrameRenderer> CachedRenderer<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            last: Mutex::new(None),
        }
    }
}

impl<R: FrameRenderer> FrameRenderer for CachedRenderer<R> {
    fn render(&self, display: &WeightDisplay) -> Result<Vec<u8>> {
        let mut last = self.last.lock();
        if let Some((cached_for, jpeg)) = &*last
            && cached_for == display
        {
            return Ok(jpeg.clone());
        }
        let jpeg = self.inner.render(display)?;
        let shown = display;
        tracing::debug!(display = %shown, len = jpeg.len(), "rendered new frame");
        *last = Some((display.clone(), jpeg.clone()));
        Ok(jpeg)
    }
}

/// Serves the same JPEG regardless of the weight.
#[derive(Debug, Clone)]
pub struct StaticFrame {
    jpeg: Vec<u8>,
}

impl StaticFrame {
    pub fn new(jpeg: Vec<u8>) -> Self {
        Self { jpeg }
    }
}

impl FrameRenderer for StaticFrame {
    fn render(&self, _display: &WeightDisplay) -> Result<Vec<u8>> {
        Ok(self.jpeg.clone())
    }
}

/// Keeps the encoder's overlay text file in step with the weight board.
pub struct OverlayWriter {
    handle: Option<JoinHandle<()>>,
    cancel: CancelToken,
}

impl OverlayWriter {
    pub fn spawn(path: PathBuf, board: WeightBoard, cancel: CancelToken) -> Self {
        let token = cancel.clone();
        let handle = thread::spawn(move || {
            let mut shown: Option<WeightDisplay> = None;
            loop {
                let display = board.display();
                if shown.as_ref() != Some(&display) {
                    match write_atomically(&path, &display.to_string()) {
                        Ok(()) => shown = Some(display),
                        Err(e) => {
                            tracing::warn!(path = %path.display(), error = %e, "overlay write failed")
                        }
                    }
                }
                if !token.sleep(OVERLAY_POLL) {
                    break;
                }
            }
        });
        Self {
            handle: Some(handle),
            cancel,
        }
    }

    pub fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Write via a sibling temp file and rename so a reader never sees a
/// half-written file.
pub fn write_atomically(path: &Path, text: &str) -> io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, text)?;
    fs::rename(&tmp, path)
}
