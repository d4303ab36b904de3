//! Per-client RTP delivery loop.
//!
//! One thread per playing session sends the session's frames over its
//! transport:
//!
//! - A rendered feed produces a JPEG of the current weight per frame. Frames
//!   are paced against a running deadline (`next += interval`), so a slow
//!   render shortens the following sleep instead of accumulating drift.
//! - An encoded feed forwards access units as the encoder produces them,
//!   starting at the first key frame, with the stored SPS and PPS sent ahead
//!   of it when the key frame does not carry its own.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::config::VideoConfig;
use crate::media::encoder::FrameRenderer;
use crate::media::fanout::NalFanout;
use crate::media::h264::{AccessUnitAssembler, NAL_SPS, NalUnit, to_annex_b};
use crate::media::{MediaFeed, Packetizer};
use crate::session::Transport;
use crate::transport::writer::SocketWriter;
use crate::weight::WeightBoard;

const DRAIN_TIMEOUT: Duration = Duration::from_millis(200);

pub struct Delivery {
    pub session_id: String,
    pub transport: Transport,
    pub packetizer: Box<dyn Packetizer>,
    pub writer: SocketWriter,
    pub feed: MediaFeed,
    pub video: VideoConfig,
}

impl Delivery {
    pub fn spawn(self, cancel: CancelToken) -> JoinHandle<()> {
        thread::spawn(move || self.run(&cancel))
    }

    fn run(mut self, cancel: &CancelToken) {
        let frames = match self.feed.clone() {
            MediaFeed::Jpeg { renderer, board } => {
                self.run_rendered(renderer.as_ref(), &board, cancel)
            }
            MediaFeed::H264(fanout) => self.run_encoded(&fanout, cancel),
        };
        tracing::info!(session_id = %self.session_id, frames, "delivery stopped");
    }

    fn run_rendered(
        &mut self,
        renderer: &dyn FrameRenderer,
        board: &WeightBoard,
        cancel: &CancelToken,
    ) -> u64 {
        let interval = self.video.frame_interval();
        let increment = self.video.rtp_timestamp_increment();
        let mut last_frame: Option<Vec<u8>> = None;
        let mut next_frame = Instant::now();
        let mut frames = 0u64;

        tracing::info!(session_id = %self.session_id, ?interval, "JPEG delivery started");

        while !cancel.is_cancelled() {
            let display = board.display();
            match renderer.render(&display) {
                Ok(jpeg) => last_frame = Some(jpeg),
                Err(e) => {
                    tracing::warn!(session_id = %self.session_id, error = %e, "render failed");
                }
            }

            if let Some(jpeg) = &last_frame {
                let packets = self.packetizer.packetize(jpeg, increment);
                if !self.send(&packets) {
                    cancel.cancel();
                    break;
                }
                frames += 1;
            }

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
        frames
    }

    fn run_encoded(&mut self, fanout: &NalFanout, cancel: &CancelToken) -> u64 {
        let subscription = fanout.subscribe();
        let increment = self.video.rtp_timestamp_increment();
        let mut assembler = AccessUnitAssembler::new();
        let mut started = false;
        let mut frames = 0u64;

        tracing::info!(session_id = %self.session_id, "H.264 delivery started");

        while !cancel.is_cancelled() {
            for unit in subscription.drain(DRAIN_TIMEOUT) {
                let Some(mut access_unit) = assembler.push(unit) else {
                    continue;
                };
                if !started {
                    if !access_unit.iter().any(NalUnit::is_key_frame) {
                        continue;
                    }
                    started = true;
                    prepend_parameter_sets(&mut access_unit, fanout);
                    tracing::debug!(session_id = %self.session_id, "first key frame sent");
                }

                let packets = self.packetizer.packetize(&to_annex_b(&access_unit), increment);
                if !self.send(&packets) {
                    cancel.cancel();
                    return frames;
                }
                frames += 1;
            }
        }
        frames
    }

    /// Returns `false` when the connection is gone.
    fn send(&self, packets: &[Vec<u8>]) -> bool {
        match &self.transport {
            Transport::Interleaved { rtp_channel, .. } => {
                match self.writer.write_interleaved(*rtp_channel, packets) {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::debug!(session_id = %self.session_id, error = %e, "interleaved write failed");
                        false
                    }
                }
            }
            Transport::Udp {
                socket,
                client_addr,
                ..
            } => {
                for packet in packets {
                    if let Err(e) = socket.send_to(packet, *client_addr) {
                        tracing::debug!(session_id = %self.session_id, error = %e, "udp send failed");
                        break;
                    }
                }
                true
            }
        }
    }
}

/// Make sure a decoder joining at `access_unit` sees SPS and PPS first.
fn prepend_parameter_sets(access_unit: &mut Vec<NalUnit>, fanout: &NalFanout) {
    if access_unit.iter().any(|u| u.nal_type() == NAL_SPS) {
        return;
    }
    if let Some((sps, pps)) = fanout.parameter_sets() {
        access_unit.splice(0..0, [sps, pps]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::encoder::StaticFrame;
    use crate::media::jpeg::JpegPacketizer;
    use crate::media::jpeg::tests::synthetic_jpeg;
    use crate::media::h264::H264Packetizer;
    use crate::transport::UdpTransport;
    use std::net::UdpSocket;

    #[test]
    fn udp_delivery_sends_marked_frames() {
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let _peer = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (stream, _) = listener.accept().unwrap();

        let video = VideoConfig {
            width: 320,
            height: 240,
            frame_rate: 20,
        };
        let delivery = Delivery {
            session_id: "1001".to_string(),
            transport: Transport::Udp {
                socket: UdpTransport::bind().unwrap(),
                client_addr: client.local_addr().unwrap(),
                client_rtcp_port: client.local_addr().unwrap().port() + 1,
                server_port: 0,
            },
            packetizer: Box::new(JpegPacketizer::with_random_state(320, 240, 20)),
            writer: SocketWriter::new(stream),
            feed: MediaFeed::Jpeg {
                renderer: Arc::new(StaticFrame::new(synthetic_jpeg(3000))),
                board: WeightBoard::new("lb"),
            },
            video,
        };

        let cancel = CancelToken::new();
        let handle = delivery.spawn(cancel.clone());

        let mut buf = [0u8; 2048];
        let mut marked = 0;
        for _ in 0..6 {
            let (n, _) = client.recv_from(&mut buf).unwrap();
            assert!(n > 20);
            assert_eq!(buf[1] & 0x7F, 26);
            if buf[1] & 0x80 != 0 {
                marked += 1;
            }
        }
        cancel.cancel();
        handle.join().unwrap();

        // 3000 bytes of scan data make three packets per frame.
        assert_eq!(marked, 2);
    }

    #[test]
    fn frames_are_paced_to_the_frame_interval() {
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let _peer = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (stream, _) = listener.accept().unwrap();

        let delivery = Delivery {
            session_id: "1002".to_string(),
            transport: Transport::Udp {
                socket: UdpTransport::bind().unwrap(),
                client_addr: client.local_addr().unwrap(),
                client_rtcp_port: client.local_addr().unwrap().port() + 1,
                server_port: 0,
            },
            packetizer: Box::new(JpegPacketizer::with_random_state(320, 240, 20)),
            writer: SocketWriter::new(stream),
            feed: MediaFeed::Jpeg {
                renderer: Arc::new(StaticFrame::new(synthetic_jpeg(500))),
                board: WeightBoard::new("lb"),
            },
            video: VideoConfig {
                width: 320,
                height: 240,
                frame_rate: 20,
            },
        };

        let cancel = CancelToken::new();
        let handle = delivery.spawn(cancel.clone());

        let mut buf = [0u8; 2048];
        let mut frame_ends = Vec::new();
        while frame_ends.len() < 6 {
            client.recv_from(&mut buf).unwrap();
            if buf[1] & 0x80 != 0 {
                frame_ends.push(Instant::now());
            }
        }
        cancel.cancel();
        handle.join().unwrap();

        // Five 50ms intervals between the first and sixth frame.
        let span = frame_ends[5] - frame_ends[0];
        assert!(span >= Duration::from_millis(200), "frames too fast: {span:?}");
        assert!(span <= Duration::from_millis(750), "frames too slow: {span:?}");
    }

    #[test]
    fn encoded_delivery_starts_at_key_frame_with_parameter_sets() {
        let client = UdpSocket::bind("127.0.0.1:0").unwrap();
        client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let _peer = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (stream, _) = listener.accept().unwrap();

        let fanout = NalFanout::new();
        let delivery = Delivery {
            session_id: "1003".to_string(),
            transport: Transport::Udp {
                socket: UdpTransport::bind().unwrap(),
                client_addr: client.local_addr().unwrap(),
                client_rtcp_port: client.local_addr().unwrap().port() + 1,
                server_port: 0,
            },
            packetizer: Box::new(H264Packetizer::with_random_state(20)),
            writer: SocketWriter::new(stream),
            feed: MediaFeed::H264(fanout.clone()),
            video: VideoConfig {
                width: 320,
                height: 240,
                frame_rate: 20,
            },
        };

        let cancel = CancelToken::new();
        let handle = delivery.spawn(cancel.clone());
        while fanout.subscriber_count() == 0 {
            thread::sleep(Duration::from_millis(5));
        }

        let unit = |bytes: &[u8]| NalUnit::new(bytes);
        // Parameter sets arrive once, ahead of the client.
        fanout.publish(&[unit(&[0x67, 0x42, 0xC0, 0x1F]), unit(&[0x68, 0xCE, 0x3C, 0x80])]);
        // A delta picture, then an IDR picture without its own SPS, then a
        // delta picture that completes the IDR.
        fanout.publish(&[unit(&[0x41, 0x9A, 0x01])]);
        fanout.publish(&[unit(&[0x65, 0x88, 0x02])]);
        fanout.publish(&[unit(&[0x41, 0x9A, 0x03])]);

        let mut buf = [0u8; 2048];
        let mut payload_types = Vec::new();
        loop {
            let (n, _) = client.recv_from(&mut buf).unwrap();
            assert!(n > 12);
            payload_types.push(buf[12] & 0x1F);
            assert_eq!(buf[1] & 0x7F, 96);
            if buf[1] & 0x80 != 0 {
                break;
            }
        }
        cancel.cancel();
        handle.join().unwrap();

        assert_eq!(payload_types, vec![7, 8, 5]);
    }
}
