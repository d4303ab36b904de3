//! Handlers for fixed-header binary commands.

use serde_json::json;

use super::Reply;
use super::auth::AuthOutcome;
use super::connection::ConnectionState;
use super::demux::ProtocolMessage;
use super::device::{DeviceIdentity, FIRMWARE_VERSION};
use super::packet::{self, CHANNEL_INFO_REPLY};
use crate::config::VideoConfig;

pub const STREAM_REQUEST: u8 = 0x68;
pub const KEEP_ALIVE: u8 = 0x24;
const KEEP_ALIVE_REPLY: u8 = 0x25;
pub const LOGIN: u8 = 0xA0;
pub const PROBE: u8 = 0xA1;
pub const SYSTEM_INFO: u8 = 0xA4;
pub const CHANNEL_INFO: u8 = 0xA8;

const MAIN_STREAM: u8 = 2;

const CAPABILITIES: &str = "FTP:1:Record,Snap&&NTP:2:AdjustSysTime&&VideoCover:1:MutiCover\
&&AutoRegister:1:Login&&AutoMaintain:1:Reboot,DeleteFiles,ShutDown&&UPNP:1:SearchDevice\
&&DHCP:1:RequestIP&&DefaultQuery:1:DQuery&&DavinciModule:1:WorkSheetCFGApart,StandardGOP\
&&Dahua.a4.9:1:Login&&Log:1:PageForPageLog&&QueryURL:1:CONFIG&&SearchRecord:1:V3\
&&BackupVideoExtFormat:1:DAV,ASF&&Dahua_Config:1:Json,V3,MotionDetect_F6\
&&ProtocolFramework:1:V3_1";

pub fn handle(
    message: &ProtocolMessage,
    identity: &DeviceIdentity,
    video: &VideoConfig,
    state: &mut ConnectionState,
) -> Reply {
    let session = identity.session_id;
    let code = message.type_byte();
    let sub = message.sub_type();

    match (code, sub) {
        (STREAM_REQUEST, _) => stream_request(message, session, state),
        (KEEP_ALIVE, _) => Reply::send(packet::ack(KEEP_ALIVE_REPLY, 0, session, 0).into_bytes()),
        (code, _) if code <= 0x0F => Reply::send(packet::ack(code + 0x10, 0, session, 0).into_bytes()),
        (PROBE, 0) => Reply::send(packet::probe_reply().into_bytes()),
        (LOGIN, 1) => {
            let body = json!({
                "encryption": "Default",
                "mac": "",
                "random": identity.random,
                "realm": identity.realm,
            })
            .to_string();
            Reply::send(packet::realm_reply(body.len()).with_payload(body.as_bytes()))
        }
        (LOGIN, 0 | 5) => login(identity, state),
        (SYSTEM_INFO, _) => {
            let subcommand = message.byte(8);
            let payload = system_info(subcommand, identity);
            tracing::debug!(subcommand, len = payload.len(), "system info");
            Reply::send(packet::sysinfo_reply(subcommand, payload.len()).with_payload(&payload))
        }
        (CHANNEL_INFO, _) => {
            let body = channel_info(identity, video);
            Reply::send(packet::ack(CHANNEL_INFO_REPLY, sub, session, body.len()).with_payload(&body))
        }
        _ => {
            tracing::debug!(code = format_args!("{code:#04X}"), sub, "unknown command acknowledged");
            Reply::send(packet::ack(code.wrapping_add(0x10), sub, session, 0).into_bytes())
        }
    }
}

fn stream_request(message: &ProtocolMessage, session: u32, state: &mut ConnectionState) -> Reply {
    let stream_type = message.byte_or(8, MAIN_STREAM);
    let channel = message.byte_or(12, 1);
    state.requested_channel = channel.saturating_sub(1);

    let accepted = stream_type == MAIN_STREAM && channel == 1;
    tracing::info!(stream_type, channel, accepted, "stream requested");

    let bytes = packet::stream_reply(session, accepted).into_bytes();
    if accepted {
        Reply::start(bytes)
    } else {
        Reply::send(bytes)
    }
}

fn login(identity: &DeviceIdentity, state: &mut ConnectionState) -> Reply {
    match state.auth.on_login() {
        AuthOutcome::Challenge => {
            let body = format!(
                "Realm:{}\r\nRandom:{}\r\n\r\n",
                identity.realm, identity.random
            );
            tracing::debug!("login challenge sent");
            Reply::send(packet::login_challenge(body.len()).with_payload(body.as_bytes()))
        }
        AuthOutcome::Accepted => {
            tracing::info!("binary login accepted");
            Reply::send(packet::login_accepted(identity.session_id).into_bytes())
        }
    }
}

fn padded(text: &str, len: usize) -> Vec<u8> {
    let mut out = text.as_bytes().to_vec();
    out.resize(len.max(out.len()), 0);
    out
}

/// Payload for a system info sub-command; unknown ones get an empty body.
fn system_info(subcommand: u8, identity: &DeviceIdentity) -> Vec<u8> {
    match subcommand {
        0x01 => {
            let mut info = vec![0u8; 32];
            info[0..10].copy_from_slice(&[0x02, 0x2A, 0x01, 0x00, 0x00, 0x00, 0x02, 0x01, 0x02, 0x01]);
            info[12..16].copy_from_slice(&[0xE8, 0x07, 0x01, 0x0F]);
            info[18..22].copy_from_slice(b"2.8.");
            info[26] = 0x01;
            info
        }
        0x02 => {
            let mut caps = vec![0u8; 288];
            caps[8] = 0xFF;
            caps
        }
        0x07 => identity.serial.as_bytes().to_vec(),
        0x08 => padded(FIRMWARE_VERSION, 16),
        0x0B => identity.device_type.as_bytes().to_vec(),
        0x1A => CAPABILITIES.as_bytes().to_vec(),
        _ => Vec::new(),
    }
}

fn channel_info(identity: &DeviceIdentity, video: &VideoConfig) -> Vec<u8> {
    json!({
        "id": 1,
        "params": {
            "table": [{
                "ChannelName": identity.channel_name,
                "Detail": {
                    "Compression": "H.264",
                    "Height": video.height,
                    "Width": video.width,
                    "FPS": video.frame_rate,
                },
            }],
        },
        "result": true,
        "session": identity.session_hex(),
    })
    .to_string()
    .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DvripConfig;
    use crate::dvrip::demux::{Demuxed, HEADER_LEN, next_message};

    fn message(code: u8, sub: u8, extra: &[(usize, u8)]) -> ProtocolMessage {
        let mut raw = vec![0u8; HEADER_LEN];
        raw[0] = code;
        raw[1] = sub;
        for (index, value) in extra {
            raw[*index] = *value;
        }
        match next_message(&raw) {
            Demuxed::Message { message, .. } => message,
            other => panic!("unexpected {other:?}"),
        }
    }

    fn run(msg: &ProtocolMessage, state: &mut ConnectionState) -> (DeviceIdentity, Reply) {
        let identity = DeviceIdentity::generate(&DvripConfig::default());
        let reply = handle(msg, &identity, &VideoConfig::default(), state);
        (identity, reply)
    }

    #[test]
    fn login_is_challenged_then_accepted() {
        let mut state = ConnectionState::default();
        let identity = DeviceIdentity::generate(&DvripConfig::default());
        let video = VideoConfig::default();
        let login = message(LOGIN, 0x05, &[]);

        let first = handle(&login, &identity, &video, &mut state);
        assert_eq!(first.bytes[0], 0xB0);
        assert_eq!(&first.bytes[8..12], &[0x01, 0x0E, 0x01, 0x00]);
        let text = String::from_utf8_lossy(&first.bytes[HEADER_LEN..]).into_owned();
        assert_eq!(
            text,
            format!("Realm:{}\r\nRandom:{}\r\n\r\n", identity.realm, identity.random)
        );

        let second = handle(&login, &identity, &video, &mut state);
        assert_eq!(second.bytes.len(), HEADER_LEN);
        assert_eq!(&second.bytes[16..20], &identity.session_id.to_le_bytes());
        assert!(state.auth.is_authenticated());
    }

    #[test]
    fn main_stream_on_channel_one_starts_streaming() {
        let mut state = ConnectionState::default();
        let (_, reply) = run(&message(STREAM_REQUEST, 0, &[(8, 2), (12, 1)]), &mut state);
        assert!(reply.start_stream);
        assert_eq!(reply.bytes[0], 0x69);
        assert_eq!(reply.bytes[20], 0x01);
        assert_eq!(state.requested_channel, 0);
    }

    #[test]
    fn sub_stream_is_refused() {
        let mut state = ConnectionState::default();
        let (_, reply) = run(&message(STREAM_REQUEST, 0, &[(8, 1), (12, 1)]), &mut state);
        assert!(!reply.start_stream);
        assert_eq!(reply.bytes[20], 0);

        let (_, reply) = run(&message(STREAM_REQUEST, 0, &[(8, 2), (12, 3)]), &mut state);
        assert!(!reply.start_stream);
        assert_eq!(state.requested_channel, 2);
    }

    #[test]
    fn keep_alive_and_low_codes_are_acknowledged() {
        let mut state = ConnectionState::default();
        let (_, reply) = run(&message(KEEP_ALIVE, 0, &[]), &mut state);
        assert_eq!(reply.bytes[0], 0x25);
        let (_, reply) = run(&message(0x03, 0x07, &[]), &mut state);
        assert_eq!(reply.bytes[0], 0x13);
        assert_eq!(reply.bytes[1], 0);
    }

    #[test]
    fn unknown_command_echoes_sub_type() {
        let mut state = ConnectionState::default();
        let (_, reply) = run(&message(0xC3, 0x02, &[]), &mut state);
        assert_eq!(&reply.bytes[0..2], &[0xD3, 0x02]);
        let (_, reply) = run(&message(0xF0, 0x00, &[]), &mut state);
        assert_eq!(reply.bytes[0], 0x00);
    }

    #[test]
    fn system_info_serial_and_version() {
        let mut state = ConnectionState::default();
        let (identity, reply) = run(&message(SYSTEM_INFO, 0, &[(8, 0x07)]), &mut state);
        assert_eq!(&reply.bytes[HEADER_LEN..], identity.serial.as_bytes());

        let (_, reply) = run(&message(SYSTEM_INFO, 0, &[(8, 0x08)]), &mut state);
        assert_eq!(reply.bytes.len(), HEADER_LEN + 16);
        assert!(reply.bytes[HEADER_LEN..].starts_with(FIRMWARE_VERSION.as_bytes()));

        let (_, reply) = run(&message(SYSTEM_INFO, 0, &[(8, 0x1A)]), &mut state);
        assert!(String::from_utf8_lossy(&reply.bytes[HEADER_LEN..]).ends_with("ProtocolFramework:1:V3_1"));

        let (_, reply) = run(&message(SYSTEM_INFO, 0, &[(8, 0x55)]), &mut state);
        assert_eq!(reply.bytes.len(), HEADER_LEN);
    }

    #[test]
    fn channel_info_describes_video() {
        let mut state = ConnectionState::default();
        let (identity, reply) = run(&message(CHANNEL_INFO, 0, &[]), &mut state);
        assert_eq!(reply.bytes[0], 0xB8);
        let body: serde_json::Value = serde_json::from_slice(&reply.bytes[HEADER_LEN..]).unwrap();
        let row = &body["params"]["table"][0];
        assert_eq!(row["ChannelName"], identity.channel_name.as_str());
        assert_eq!(row["Detail"]["Width"], VideoConfig::default().width);
    }

    #[test]
    fn realm_request_returns_json() {
        let mut state = ConnectionState::default();
        let (identity, reply) = run(&message(LOGIN, 0x01, &[]), &mut state);
        let body: serde_json::Value = serde_json::from_slice(&reply.bytes[HEADER_LEN..]).unwrap();
        assert_eq!(body["realm"], identity.realm.as_str());
        assert_eq!(
            u32::from_le_bytes(reply.bytes[12..16].try_into().unwrap()) as usize,
            reply.bytes.len() - HEADER_LEN
        );
        assert!(!state.auth.challenge_sent());
    }
}
