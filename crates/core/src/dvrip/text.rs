//! Legacy `Key:Value` text commands carried in a 0xF4 frame.

use super::Reply;
use super::dispatch::ObjectIds;
use super::packet;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct TextCommand<'a> {
    pub transaction_id: &'a str,
    pub method: &'a str,
    pub parameter: &'a str,
}

impl<'a> TextCommand<'a> {
    pub fn parse(payload: &'a str) -> Self {
        let mut command = Self::default();
        for line in payload.trim_matches('\0').lines() {
            let line = line.trim_end_matches('\r');
            if let Some(value) = line.strip_prefix("TransactionID:") {
                command.transaction_id = value;
            } else if let Some(value) = line.strip_prefix("Method:") {
                command.method = value;
            } else if let Some(value) = line.strip_prefix("ParameterName:") {
                command.parameter = value;
            }
        }
        command
    }
}

pub fn handle(payload: &[u8], session: u32, objects: &mut ObjectIds) -> Reply {
    let text = String::from_utf8_lossy(payload);
    let command = TextCommand::parse(&text);
    tracing::debug!(
        transaction = command.transaction_id,
        method = command.method,
        parameter = command.parameter,
        "text command"
    );

    let mut body = format!(
        "TransactionID:{}\r\nAction:Response\r\nCode:200\r\nDescription:OK\r\n",
        command.transaction_id
    );
    match command.method {
        "AddObject" => body.push_str(&format!("ObjectID:{}\r\n", objects.next_id())),
        "QueryDevState" => body.push_str("State:Online\r\n"),
        _ => {}
    }
    body.push_str("\r\n");

    Reply::send(packet::text_reply(session, body.len()).with_payload(body.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dvrip::demux::HEADER_LEN;

    fn body(reply: &Reply) -> &str {
        std::str::from_utf8(&reply.bytes[HEADER_LEN..]).unwrap()
    }

    #[test]
    fn parses_known_fields() {
        let command = TextCommand::parse(
            "TransactionID:1042\r\nMethod:GetParameterNames\r\nParameterName:Dahua.Device.Network\r\n\r\n\0\0",
        );
        assert_eq!(command.transaction_id, "1042");
        assert_eq!(command.method, "GetParameterNames");
        assert_eq!(command.parameter, "Dahua.Device.Network");
    }

    #[test]
    fn add_object_issues_ids() {
        let mut objects = ObjectIds::default();
        let reply = handle(b"TransactionID:7\r\nMethod:AddObject\r\n\r\n", 0x1234, &mut objects);
        assert_eq!(reply.bytes[0], 0xF5);
        assert_eq!(
            body(&reply),
            "TransactionID:7\r\nAction:Response\r\nCode:200\r\nDescription:OK\r\nObjectID:1\r\n\r\n"
        );
        let reply = handle(b"TransactionID:8\r\nMethod:AddObject\r\n\r\n", 0x1234, &mut objects);
        assert!(body(&reply).contains("ObjectID:2\r\n"));
        assert_eq!(&reply.bytes[24..28], &0x1234u32.to_le_bytes());
    }

    #[test]
    fn device_state_is_online() {
        let mut objects = ObjectIds::default();
        let reply = handle(b"TransactionID:9\r\nMethod:QueryDevState\r\n\r\n", 1, &mut objects);
        assert!(body(&reply).ends_with("State:Online\r\n\r\n"));
        let declared = u32::from_le_bytes(reply.bytes[4..8].try_into().unwrap()) as usize;
        assert_eq!(declared, reply.bytes.len() - HEADER_LEN);
    }

    #[test]
    fn other_methods_get_plain_ok() {
        let mut objects = ObjectIds::default();
        let reply = handle(b"TransactionID:3\r\nMethod:DeleteObject\r\n", 1, &mut objects);
        assert_eq!(
            body(&reply),
            "TransactionID:3\r\nAction:Response\r\nCode:200\r\nDescription:OK\r\n\r\n"
        );
    }
}
