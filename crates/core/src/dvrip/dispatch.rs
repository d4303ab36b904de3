//! JSON-RPC method table for the vendor port.
//!
//! Every request is answered; methods the table does not know get a bare
//! success envelope so that probing clients keep going.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{Value, json};

use super::auth::{AuthOutcome, AuthState};
use super::device::{BUILD_DATE, DeviceIdentity, PROCESSOR, SOFTWARE_VERSION};
use crate::config::VideoConfig;

/// Error code clients expect alongside a login challenge.
const LOGIN_CHALLENGE_CODE: u32 = 268_632_079;
const KEEP_ALIVE_INTERVAL: u32 = 60;
const KEEP_ALIVE_TIMEOUT: u32 = 300;

const ADVERTISED_METHODS: &[&str] = &[
    "configManager.getConfig",
    "configManager.getDefault",
    "magicBox.getSystemInfo",
    "magicBox.getSoftwareVersion",
    "magicBox.getDeviceType",
    "magicBox.getSerialNo",
    "magicBox.getDeviceClass",
    "magicBox.getProductDefinition",
    "magicBox.getMarketArea",
    "magicBox.listMethod",
    "system.listMethod",
    "global.login",
    "global.keepAlive",
    "mediaStream.factory.instance",
    "mediaStream.attach",
    "mediaStream.detach",
    "mediaStream.destroy",
    "mediaStream.factory.close",
    "devVideoInput.factory.instance",
    "devVideoInput.factory.getCollect",
    "alarm.getAllInSlots",
    "alarm.getAllOutSlots",
];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    id: Value,
    #[serde(default)]
    pub params: Value,
}

impl RpcRequest {
    /// Parse a request body, ignoring trailing NUL padding.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let end = payload
            .iter()
            .rposition(|b| *b != 0 && !b.is_ascii_whitespace())
            .map_or(0, |i| i + 1);
        serde_json::from_slice(&payload[..end]).ok()
    }

    /// Request id, defaulting to 1 when absent or not numeric.
    pub fn id(&self) -> u64 {
        self.id.as_u64().unwrap_or(1)
    }

    fn param_str(&self, name: &str) -> &str {
        self.params.get(name).and_then(Value::as_str).unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RpcReply {
    pub body: Value,
    /// The method asked for the media stream to start on this connection.
    pub start_stream: bool,
}

impl RpcReply {
    fn new(body: Value) -> Self {
        Self {
            body,
            start_stream: false,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.body.to_string().into_bytes()
    }
}

/// Channel streamed when the client never names one.
pub const DEFAULT_CHANNEL: u8 = 1;

/// Monotonic object ids for one connection; the first id issued is 1.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ObjectIds(u32);

impl ObjectIds {
    pub fn next_id(&mut self) -> u32 {
        self.0 = self.0.wrapping_add(1);
        self.0
    }
}

/// Connection state a handler may read or advance.
pub struct CallContext<'a> {
    pub identity: &'a DeviceIdentity,
    pub video: &'a VideoConfig,
    pub auth: &'a mut AuthState,
    pub objects: &'a mut ObjectIds,
    /// Channel written into container frames once streaming starts.
    pub channel: &'a mut u8,
}

pub type Handler = fn(&RpcRequest, &mut CallContext<'_>) -> RpcReply;

pub struct MethodTable {
    handlers: HashMap<&'static str, Handler>,
}

impl Default for MethodTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl MethodTable {
    /// Every method the emulated camera answers with real content.
    pub fn standard() -> Self {
        let mut table = Self {
            handlers: HashMap::new(),
        };
        table.register("global.login", login);
        table.register("global.keepAlive", keep_alive);

        table.register("magicBox.getSystemInfo", system_info);
        table.register("magicBox.getSoftwareVersion", software_version);
        table.register("magicBox.getDeviceType", device_type);
        table.register("magicBox.getSerialNo", serial_no);
        table.register("magicBox.getDeviceClass", device_class);
        table.register("magicBox.getProductDefinition", product_definition);
        table.register("magicBox.getMarketArea", market_area);
        table.register("magicBox.getHardwareVersion", hardware_version);
        table.register("magicBox.factory.instance", magic_box_instance);

        table.register("configManager.getConfig", config);
        table.register("configManager.getDefault", config);

        table.register("mediaStream.factory.instance", new_object);
        table.register("mediaStream.attach", attach);
        table.register("mediaStream.detach", plain_success);
        table.register("mediaStream.destroy", plain_success);
        table.register("mediaStream.factory.close", plain_success);

        table.register("system.listMethod", list_methods);
        table.register("magicBox.listMethod", list_methods);

        for name in [
            "devVideoInput.factory.instance",
            "devVideoEncode.factory.instance",
            "devAudioEncode.factory.instance",
            "devAudioInput.factory.instance",
        ] {
            table.register(name, new_object);
        }
        table.register("devVideoInput.factory.getCollect", video_collect);
        table.register("devVideoEncode.factory.getCollect", video_collect);
        table.register("devAudioEncode.factory.getCollect", audio_collect);
        table.register("devAudioInput.factory.getCollect", audio_collect);

        table.register("MediaEncrypt.getCaps", encrypt_caps);
        table.register("MediaEncrypt.listMethod", encrypt_caps);
        table.register("alarm.getAllInSlots", alarm_slots);
        table.register("alarm.getAllOutSlots", alarm_slots);
        table.register("ChannelManager.getVirtualChannels", virtual_channels);
        table
    }

    pub fn register(&mut self, method: &'static str, handler: Handler) {
        self.handlers.insert(method, handler);
    }

    pub fn dispatch(&self, request: &RpcRequest, ctx: &mut CallContext<'_>) -> RpcReply {
        match self.handlers.get(request.method.as_str()) {
            Some(handler) => handler(request, ctx),
            None => {
                tracing::debug!(method = %request.method, "unhandled method, replying success");
                plain_success(request, ctx)
            }
        }
    }
}

fn envelope(request: &RpcRequest, ctx: &CallContext<'_>, result: Value, params: Option<Value>) -> Value {
    let mut body = json!({
        "id": request.id(),
        "result": result,
        "session": ctx.identity.session_hex(),
    });
    if let Some(params) = params {
        body["params"] = params;
    }
    body
}

fn success(request: &RpcRequest, ctx: &CallContext<'_>, params: Value) -> RpcReply {
    RpcReply::new(envelope(request, ctx, json!(true), Some(params)))
}

fn plain_success(request: &RpcRequest, ctx: &mut CallContext<'_>) -> RpcReply {
    RpcReply::new(envelope(request, ctx, json!(true), None))
}

fn login(request: &RpcRequest, ctx: &mut CallContext<'_>) -> RpcReply {
    let password = request.param_str("password");
    match ctx.auth.on_password_login(password) {
        AuthOutcome::Challenge => {
            let mut body = envelope(
                request,
                ctx,
                json!(false),
                Some(json!({
                    "encryption": "Default",
                    "mac": "00:00:00:00:00:00",
                    "random": ctx.identity.random,
                    "realm": ctx.identity.realm,
                })),
            );
            body["error"] = json!({
                "code": LOGIN_CHALLENGE_CODE,
                "message": "Component error: login challenge",
            });
            RpcReply::new(body)
        }
        AuthOutcome::Accepted => {
            tracing::info!(user = request.param_str("userName"), "json login accepted");
            success(request, ctx, json!({ "keepAliveInterval": KEEP_ALIVE_INTERVAL }))
        }
    }
}

fn keep_alive(request: &RpcRequest, ctx: &mut CallContext<'_>) -> RpcReply {
    success(request, ctx, json!({ "timeout": KEEP_ALIVE_TIMEOUT }))
}

fn system_info(request: &RpcRequest, ctx: &mut CallContext<'_>) -> RpcReply {
    let identity = ctx.identity;
    success(
        request,
        ctx,
        json!({
            "deviceType": identity.device_type,
            "hardwareVersion": "1.00",
            "processor": PROCESSOR,
            "serialNumber": identity.serial,
            "updateSerial": { "Builtin": "Unknown", "Serial": identity.serial },
        }),
    )
}

fn software_version(request: &RpcRequest, ctx: &mut CallContext<'_>) -> RpcReply {
    success(
        request,
        ctx,
        json!({
            "version": {
                "BuildDate": BUILD_DATE,
                "SecurityBaseLineVersion": "2.0",
                "Version": SOFTWARE_VERSION,
                "WebVersion": "3.2.1",
            }
        }),
    )
}

fn device_type(request: &RpcRequest, ctx: &mut CallContext<'_>) -> RpcReply {
    success(request, ctx, json!({ "type": ctx.identity.device_type }))
}

fn serial_no(request: &RpcRequest, ctx: &mut CallContext<'_>) -> RpcReply {
    success(request, ctx, json!({ "sn": ctx.identity.serial }))
}

fn device_class(request: &RpcRequest, ctx: &mut CallContext<'_>) -> RpcReply {
    success(request, ctx, json!({ "type": "IPC" }))
}

fn product_definition(request: &RpcRequest, ctx: &mut CallContext<'_>) -> RpcReply {
    success(request, ctx, json!({ "definition": ctx.identity.device_type }))
}

fn market_area(request: &RpcRequest, ctx: &mut CallContext<'_>) -> RpcReply {
    success(request, ctx, json!({ "area": "International" }))
}

fn hardware_version(request: &RpcRequest, ctx: &mut CallContext<'_>) -> RpcReply {
    success(request, ctx, json!({ "version": "1.0" }))
}

fn magic_box_instance(request: &RpcRequest, ctx: &mut CallContext<'_>) -> RpcReply {
    RpcReply::new(envelope(request, ctx, json!(1), None))
}

fn encode_format(video: &VideoConfig, bit_rate: u32) -> Value {
    json!([{
        "Audio": { "AudioEnable": false },
        "Video": {
            "BitRate": bit_rate,
            "BitRateControl": "CBR",
            "Compression": "H.264",
            "FPS": video.frame_rate,
            "GOP": video.frame_rate,
            "Height": video.height,
            "Width": video.width,
            "Quality": 4,
            "Profile": "Baseline",
        },
        "VideoEnable": true,
    }])
}

fn config(request: &RpcRequest, ctx: &mut CallContext<'_>) -> RpcReply {
    let table = match request.param_str("name") {
        "Encode" => json!([{
            "MainFormat": encode_format(ctx.video, 512),
            "ExtraFormat": encode_format(ctx.video, 256),
        }]),
        "ChannelTitle" => json!([{ "Name": ctx.identity.channel_name }]),
        "VideoColor" => json!([{
            "Brightness": 50,
            "Contrast": 50,
            "Hue": 50,
            "Saturation": 50,
            "Gain": 50,
            "GainBlue": 50,
            "GainGreen": 50,
            "GainRed": 50,
        }]),
        _ => json!([]),
    };
    success(request, ctx, json!({ "table": table }))
}

fn new_object(request: &RpcRequest, ctx: &mut CallContext<'_>) -> RpcReply {
    let object = ctx.objects.next_id();
    RpcReply::new(envelope(request, ctx, json!(object), None))
}

fn attach(request: &RpcRequest, ctx: &mut CallContext<'_>) -> RpcReply {
    if let Some(channel) = request
        .params
        .get("channel")
        .and_then(Value::as_u64)
        .and_then(|c| u8::try_from(c).ok())
    {
        *ctx.channel = channel;
    }
    let mut reply = plain_success(request, ctx);
    reply.start_stream = true;
    reply
}

fn list_methods(request: &RpcRequest, ctx: &mut CallContext<'_>) -> RpcReply {
    success(request, ctx, json!({ "method": ADVERTISED_METHODS }))
}

fn video_collect(request: &RpcRequest, ctx: &mut CallContext<'_>) -> RpcReply {
    success(
        request,
        ctx,
        json!({ "videoInputChannels": 1, "videoOutputChannels": 0 }),
    )
}

fn audio_collect(request: &RpcRequest, ctx: &mut CallContext<'_>) -> RpcReply {
    success(
        request,
        ctx,
        json!({ "audioInputChannels": 0, "audioOutputChannels": 0 }),
    )
}

fn encrypt_caps(request: &RpcRequest, ctx: &mut CallContext<'_>) -> RpcReply {
    success(
        request,
        ctx,
        json!({ "caps": { "encrypt": false, "encryptVersion": "None" } }),
    )
}

fn alarm_slots(request: &RpcRequest, ctx: &mut CallContext<'_>) -> RpcReply {
    success(request, ctx, json!({ "slots": [] }))
}

fn virtual_channels(request: &RpcRequest, ctx: &mut CallContext<'_>) -> RpcReply {
    success(request, ctx, json!({ "channels": [] }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DvripConfig;

    struct Fixture {
        identity: DeviceIdentity,
        video: VideoConfig,
        auth: AuthState,
        objects: ObjectIds,
        channel: u8,
        table: MethodTable,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                identity: DeviceIdentity::generate(&DvripConfig::default()),
                video: VideoConfig::default(),
                auth: AuthState::default(),
                objects: ObjectIds::default(),
                channel: DEFAULT_CHANNEL,
                table: MethodTable::standard(),
            }
        }

        fn call(&mut self, json: &str) -> RpcReply {
            let request = RpcRequest::parse(json.as_bytes()).expect("valid request");
            let mut ctx = CallContext {
                identity: &self.identity,
                video: &self.video,
                auth: &mut self.auth,
                objects: &mut self.objects,
                channel: &mut self.channel,
            };
            self.table.dispatch(&request, &mut ctx)
        }
    }

    #[test]
    fn parse_tolerates_nul_padding_and_missing_id() {
        let request = RpcRequest::parse(b"{\"method\":\"global.keepAlive\"}\0\0\0").unwrap();
        assert_eq!(request.method, "global.keepAlive");
        assert_eq!(request.id(), 1);
        assert!(RpcRequest::parse(b"not json").is_none());
    }

    #[test]
    fn login_without_password_is_challenged() {
        let mut fx = Fixture::new();
        let reply = fx.call(r#"{"method":"global.login","id":2,"params":{"userName":"admin","password":""}}"#);
        let body = &reply.body;
        assert_eq!(body["id"], 2);
        assert_eq!(body["result"], false);
        assert_eq!(body["error"]["code"], LOGIN_CHALLENGE_CODE);
        assert_eq!(body["params"]["realm"], fx.identity.realm.as_str());
        assert_eq!(body["params"]["random"], fx.identity.random.as_str());
        assert_eq!(body["session"], fx.identity.session_hex().as_str());
        assert_eq!(fx.auth, AuthState::ChallengeSent);
    }

    #[test]
    fn login_with_password_is_accepted() {
        let mut fx = Fixture::new();
        let reply = fx.call(r#"{"method":"global.login","id":3,"params":{"userName":"admin","password":"ABCDEF"}}"#);
        assert_eq!(reply.body["result"], true);
        assert_eq!(reply.body["params"]["keepAliveInterval"], 60);
        assert!(reply.body.get("error").is_none());
        assert!(fx.auth.is_authenticated());
    }

    #[test]
    fn object_ids_are_shared_across_factories() {
        let mut fx = Fixture::new();
        let first = fx.call(r#"{"method":"mediaStream.factory.instance","id":4}"#);
        let second = fx.call(r#"{"method":"devVideoInput.factory.instance","id":5}"#);
        assert_eq!(first.body["result"], 1);
        assert_eq!(second.body["result"], 2);
        assert_eq!(
            fx.call(r#"{"method":"magicBox.factory.instance"}"#).body["result"],
            1
        );
    }

    #[test]
    fn attach_requests_stream_start() {
        let mut fx = Fixture::new();
        let reply = fx.call(r#"{"method":"mediaStream.attach","id":6,"params":{"channel":0}}"#);
        assert!(reply.start_stream);
        assert_eq!(reply.body["result"], true);
        assert_eq!(fx.channel, 0);
        assert!(!fx.call(r#"{"method":"mediaStream.detach"}"#).start_stream);
    }

    #[test]
    fn attach_without_channel_keeps_default() {
        let mut fx = Fixture::new();
        let reply = fx.call(r#"{"method":"mediaStream.attach","id":7,"params":{}}"#);
        assert!(reply.start_stream);
        assert_eq!(fx.channel, DEFAULT_CHANNEL);

        fx.call(r#"{"method":"mediaStream.attach","params":{"channel":999}}"#);
        assert_eq!(fx.channel, DEFAULT_CHANNEL, "out-of-range channel ignored");
    }

    #[test]
    fn object_ids_wrap_instead_of_overflowing() {
        let mut ids = ObjectIds(u32::MAX - 1);
        assert_eq!(ids.next_id(), u32::MAX);
        assert_eq!(ids.next_id(), 0);
        assert_eq!(ids.next_id(), 1);
    }

    #[test]
    fn encode_config_reflects_video_settings() {
        let mut fx = Fixture::new();
        let reply = fx.call(r#"{"method":"configManager.getConfig","params":{"name":"Encode"}}"#);
        let main = &reply.body["params"]["table"][0]["MainFormat"][0]["Video"];
        assert_eq!(main["Width"], fx.video.width);
        assert_eq!(main["Height"], fx.video.height);
        assert_eq!(main["FPS"], fx.video.frame_rate);
        assert_eq!(main["BitRate"], 512);
        let extra = &reply.body["params"]["table"][0]["ExtraFormat"][0]["Video"];
        assert_eq!(extra["BitRate"], 256);
    }

    #[test]
    fn unknown_config_name_yields_empty_table() {
        let mut fx = Fixture::new();
        let reply = fx.call(r#"{"method":"configManager.getDefault","params":{"name":"Snap"}}"#);
        assert_eq!(reply.body["params"]["table"], json!([]));
    }

    #[test]
    fn unknown_method_gets_bare_success() {
        let mut fx = Fixture::new();
        let reply = fx.call(r#"{"method":"userManager.getActiveUserInfoAll","id":9}"#);
        assert_eq!(
            reply.body,
            json!({ "id": 9, "result": true, "session": fx.identity.session_hex() })
        );
    }

    #[test]
    fn method_list_is_advertised() {
        let mut fx = Fixture::new();
        let reply = fx.call(r#"{"method":"system.listMethod"}"#);
        let methods = reply.body["params"]["method"].as_array().unwrap();
        assert_eq!(methods.len(), ADVERTISED_METHODS.len());
        for name in ADVERTISED_METHODS {
            assert!(fx.table.handlers.contains_key(name), "{name} advertised but unhandled");
        }
    }
}
