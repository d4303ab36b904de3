//! Elementary-stream framer: one reader of the encoder per server.
//!
//! The framer thread opens the [`StreamSource`], splits the byte stream into
//! NAL units and publishes them to a [`NalFanout`]. When the encoder exits,
//! the pipe fails or no bytes arrive within the stall timeout, the encoder
//! is killed, the partial unit is discarded and the source is reopened after
//! a delay that doubles on consecutive failures up to a cap. Clients see a
//! gap in the stream, never a disconnect.
//!
//! Reads happen on a helper thread that hands chunks over a bounded channel,
//! so the framer itself never blocks on the pipe and [`stop`] returns within
//! one poll interval even when the encoder hangs.
//!
//! [`stop`]: ElementaryStreamFramer::stop

use std::io::{self, ErrorKind, Read};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::encoder::{EncoderStream, StreamSource};
use super::fanout::NalFanout;
use super::h264::AnnexBScanner;
use crate::cancel::CancelToken;

const READ_CHUNK: usize = 64 * 1024;
/// Chunks buffered between the reader thread and the framer.
const CHUNK_QUEUE: usize = 16;
const POLL: Duration = Duration::from_millis(100);

/// Restart policy for the encoder.
#[derive(Debug, Clone, Copy)]
pub struct RestartPolicy {
    pub initial: Duration,
    pub max: Duration,
    /// Restart when the encoder produces nothing for this long.
    pub stall: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(10),
            stall: Duration::from_secs(5),
        }
    }
}

pub struct ElementaryStreamFramer {
    handle: Option<JoinHandle<()>>,
    cancel: CancelToken,
}

impl ElementaryStreamFramer {
    pub fn spawn(
        source: Arc<dyn StreamSource>,
        fanout: NalFanout,
        policy: RestartPolicy,
        cancel: CancelToken,
    ) -> Self {
        let token = cancel.clone();
        let handle = thread::spawn(move || run(source.as_ref(), &fanout, policy, &token));
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

impl Drop for ElementaryStreamFramer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(source: &dyn StreamSource, fanout: &NalFanout, policy: RestartPolicy, cancel: &CancelToken) {
    let mut scanner = AnnexBScanner::new();
    let mut delay = policy.initial;

    while !cancel.is_cancelled() {
        match source.open() {
            Ok(stream) => {
                let (published, reason) = pump(stream, &mut scanner, fanout, policy.stall, cancel);
                scanner.reset();
                if cancel.is_cancelled() {
                    break;
                }
                if published > 0 {
                    delay = policy.initial;
                }
                tracing::warn!(published, reason, restart_in = ?delay, "encoder stream ended");
            }
            Err(e) => {
                tracing::error!(error = %e, restart_in = ?delay, "failed to start encoder");
            }
        }

        if !cancel.sleep(delay) {
            break;
        }
        delay = (delay * 2).min(policy.max);
    }

    tracing::debug!("framer stopped");
}

/// Move blocking reads onto their own thread. The thread ends at EOF, on a
/// read error, or once the receiver is dropped and the next read returns.
fn spawn_reader(mut stream: EncoderStream) -> Receiver<io::Result<Vec<u8>>> {
    let (tx, rx) = mpsc::sync_channel(CHUNK_QUEUE);
    thread::spawn(move || {
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(Ok(chunk[..n].to_vec())).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    let _ = tx.send(Err(e));
                    break;
                }
            }
        }
    });
    rx
}

/// Publish units until EOF, error, stall or cancellation, then kill the
/// encoder. Returns the number of units published and why reading stopped.
fn pump(
    stream: EncoderStream,
    scanner: &mut AnnexBScanner,
    fanout: &NalFanout,
    stall: Duration,
    cancel: &CancelToken,
) -> (usize, &'static str) {
    let process = stream.process();
    let chunks = spawn_reader(stream);
    let mut published = 0usize;
    let mut last_data = Instant::now();

    let reason = loop {
        if cancel.is_cancelled() {
            break "cancelled";
        }
        match chunks.recv_timeout(POLL) {
            Ok(Ok(chunk)) => {
                last_data = Instant::now();
                let units = scanner.push(&chunk);
                published += units.len();
                fanout.publish(&units);
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "encoder read failed");
                break "read error";
            }
            Err(RecvTimeoutError::Timeout) => {
                if last_data.elapsed() >= stall {
                    tracing::warn!(silent_for = ?last_data.elapsed(), "encoder stalled");
                    break "stalled";
                }
            }
            Err(RecvTimeoutError::Disconnected) => break "end of stream",
        }
    };

    process.kill();
    (published, reason)
}
