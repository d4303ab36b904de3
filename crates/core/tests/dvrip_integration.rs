//! Integration test: vendor DVR/IP port.
//!
//! Drives the listener over a plain `TcpStream`: the two-step binary login,
//! a binary stream request and a JSON attach, each followed by container
//! frames built from an in-memory H.264 elementary stream.

use std::io::{self, Cursor, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::{Duration, Instant};

use scalecam::DvripServer;
use scalecam::config::{DvripConfig, VideoConfig};
use scalecam::media::encoder::{EncoderStream, StreamSource};
use scalecam::media::framer::RestartPolicy;

/// SPS, PPS and an IDR slice, followed by a start code so the last unit is
/// complete when the stream ends.
const ACCESS_UNIT: &[u8] = &[
    0, 0, 0, 1, 0x67, 0x42, 0x00, 0x1F, //
    0, 0, 0, 1, 0x68, 0xCE, 0x3C, 0x80, //
    0, 0, 0, 1, 0x65, 0x88, 0x84, 0x00, 0x33, //
    0, 0, 0, 1,
];

/// Replays the same bytes every time the framer (re)opens it.
struct Replay;

impl StreamSource for Replay {
    fn open(&self) -> io::Result<EncoderStream> {
        Ok(EncoderStream::from_reader(Cursor::new(ACCESS_UNIT.to_vec())))
    }
}

fn start_server(frame_rate: u32) -> DvripServer {
    let config = DvripConfig {
        bind: "127.0.0.1:0".to_string(),
        ..DvripConfig::default()
    };
    let video = VideoConfig {
        width: 1280,
        height: 720,
        frame_rate,
    };
    let restart = RestartPolicy {
        initial: Duration::from_millis(20),
        max: Duration::from_millis(40),
        ..RestartPolicy::default()
    };
    let mut server = DvripServer::with_source(config, video, Arc::new(Replay), restart);
    server.start().expect("server start");
    server
}

fn connect(server: &DvripServer) -> TcpStream {
    let addr = server.local_addr().unwrap();
    let stream = TcpStream::connect_timeout(&addr, Duration::from_secs(2)).expect("connect");
    stream.set_read_timeout(Some(Duration::from_secs(3))).unwrap();
    stream
}

fn binary_command(code: u8, sub: u8) -> [u8; 32] {
    let mut header = [0u8; 32];
    header[0] = code;
    header[1] = sub;
    header
}

/// Read a 32-byte header and the payload length it declares at bytes 4..8.
fn read_reply(stream: &mut TcpStream) -> ([u8; 32], Vec<u8>) {
    let mut header = [0u8; 32];
    stream.read_exact(&mut header).unwrap();
    let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).unwrap();
    (header, payload)
}

/// Read one container frame: 24-byte header, the length it declares at
/// bytes 12..16, then the 4-byte footer.
fn read_frame(stream: &mut TcpStream) -> Vec<u8> {
    let mut frame = vec![0u8; 24];
    stream.read_exact(&mut frame).unwrap();
    assert_eq!(&frame[..4], b"DHAV");
    let len = u32::from_le_bytes([frame[12], frame[13], frame[14], frame[15]]) as usize;
    frame.resize(24 + len + 4, 0);
    stream.read_exact(&mut frame[24..]).unwrap();
    assert_eq!(&frame[frame.len() - 4..], b"dhav");
    frame
}

#[test]
fn binary_login_challenges_then_accepts() {
    let server = start_server(25);
    let identity = server.identity().unwrap().clone();
    let mut stream = connect(&server);

    stream.write_all(&binary_command(0xA0, 0)).unwrap();
    let (header, payload) = read_reply(&mut stream);
    assert_eq!(header[0], 0xB0);
    assert_eq!(header[8], 0x01, "challenge status");
    let text = String::from_utf8(payload).unwrap();
    assert!(text.contains(&format!("Realm:{}", identity.realm)));
    assert!(text.contains(&format!("Random:{}", identity.random)));

    stream.write_all(&binary_command(0xA0, 0)).unwrap();
    let (header, payload) = read_reply(&mut stream);
    assert_eq!(header[0], 0xB0);
    assert_eq!(header[8], 0x00, "success status");
    assert_eq!(
        u32::from_le_bytes([header[16], header[17], header[18], header[19]]),
        identity.session_id
    );
    assert!(payload.is_empty());

    stream.write_all(&binary_command(0x24, 0)).unwrap();
    let (header, _) = read_reply(&mut stream);
    assert_eq!(header[0], 0x25, "keep-alive acknowledged");
}

#[test]
fn json_attach_streams_container_frames() {
    let server = start_server(25);
    let mut stream = connect(&server);

    stream
        .write_all(br#"{"method":"mediaStream.attach","id":6,"params":{"channel":0}}"#)
        .unwrap();
    let (header, payload) = read_reply(&mut stream);
    assert_eq!(header[0], 0xF6);
    assert_eq!(u32::from_le_bytes([header[8], header[9], header[10], header[11]]), 6);
    let reply: serde_json::Value = serde_json::from_slice(&payload).unwrap();
    assert_eq!(reply["id"], 6);
    assert_eq!(reply["result"], true);

    // Frames follow the reply on the same socket.
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut received = Vec::new();
    let mut chunk = [0u8; 4096];
    let frame_start = loop {
        assert!(Instant::now() < deadline, "no container frame received");
        let n = stream.read(&mut chunk).unwrap();
        assert!(n > 0, "server closed the connection");
        received.extend_from_slice(&chunk[..n]);
        if let Some(pos) = received.windows(4).position(|w| w == b"DHAV") {
            if received.len() >= pos + 36 {
                break pos;
            }
        }
    };

    let frame = &received[frame_start..];
    assert_eq!(frame[4], 0xFD, "key frame type");
    assert_eq!(frame[22], 12, "extension length");
    let checksum = frame[..23].iter().fold(0u8, |sum, b| sum.wrapping_add(*b));
    assert_eq!(frame[23], checksum);
    assert_eq!(frame[24], 0x82);
    assert_eq!(u16::from_le_bytes([frame[26], frame[27]]), 1280);
    assert_eq!(u16::from_le_bytes([frame[28], frame[29]]), 720);
    assert_eq!(&frame[30..33], &[0x81, 4, 0x02]);
    assert_eq!(frame[33], 25);
}

#[test]
fn binary_stream_request_delivers_paced_frames() {
    let server = start_server(10);
    let mut stream = connect(&server);

    for _ in 0..2 {
        stream.write_all(&binary_command(0xA0, 0)).unwrap();
        read_reply(&mut stream);
    }

    let mut request = binary_command(0x68, 0);
    request[8] = 2;
    request[12] = 1;
    stream.write_all(&request).unwrap();
    let (header, _) = read_reply(&mut stream);
    assert_eq!(header[0], 0x69);

    let mut arrivals = Vec::new();
    let mut numbers = Vec::new();
    for _ in 0..5 {
        let frame = read_frame(&mut stream);
        arrivals.push(Instant::now());
        assert_eq!(frame[6], 0, "channel 1 maps to container channel 0");
        numbers.push(u32::from_le_bytes([frame[8], frame[9], frame[10], frame[11]]));
    }

    assert!(numbers.windows(2).all(|w| w[1] > w[0]), "{numbers:?}");

    // Four intervals of 100ms between the first and fifth frame.
    let span = arrivals[4] - arrivals[0];
    assert!(span >= Duration::from_millis(320), "frames too fast: {span:?}");
    assert!(span <= Duration::from_millis(1500), "frames too slow: {span:?}");
}
