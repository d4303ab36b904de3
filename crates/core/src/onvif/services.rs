//! Device management and media service actions.
//!
//! The bridge presents itself as a single-profile Profile S camera. Every
//! answer is built from configuration; `Set*`/`Add*` actions are accepted
//! and ignored so recorders that push settings during setup carry on.

use std::net::IpAddr;

use chrono::{DateTime, Datelike, Timelike, Utc};

use super::soap::{self, SoapFault};
use super::xml;
use crate::config::{BridgeConfig, RtspCodec, RtspConfig, VideoConfig};

pub const DEVICE_PATH: &str = "/onvif/device_service";
pub const MEDIA_PATH: &str = "/onvif/media_service";

pub const MANUFACTURER: &str = "AXIS";
pub const MODEL: &str = "AXIS M1065-LW";
pub const FIRMWARE_VERSION: &str = "9.80.3.1";
const HARDWARE_ID: &str = "7D2";

pub const PROFILE_TOKEN: &str = "ScaleStream";
const PROFILE_NAME: &str = "Weight Display Stream";
const VIDEO_SOURCE_TOKEN: &str = "VideoSource_1";
const VIDEO_ENCODER_TOKEN: &str = "VideoEncoder_1";
const BITRATE_LIMIT: u32 = 8192;

const NS_DEVICE: &str = "http://www.onvif.org/ver10/device/wsdl";
const NS_MEDIA: &str = "http://www.onvif.org/ver10/media/wsdl";

/// Scope URIs advertised by GetScopes and WS-Discovery.
pub const SCOPES: &[&str] = &[
    "onvif://www.onvif.org/type/video_encoder",
    "onvif://www.onvif.org/type/Network_Video_Transmitter",
    "onvif://www.onvif.org/Profile/Streaming",
    "onvif://www.onvif.org/name/AXIS%20M1065-LW",
    "onvif://www.onvif.org/hardware/AXIS%20M1065-LW",
];

/// Where a request came in, used to build the addresses written back.
#[derive(Debug, Clone)]
pub struct CallSite<'a> {
    /// `host[:port]` the client addressed, from the `Host` header.
    pub authority: &'a str,
    /// Local address of the accepted connection.
    pub local_ip: IpAddr,
}

impl CallSite<'_> {
    fn service_url(&self, path: &str) -> String {
        format!("http://{}{}", self.authority, path)
    }

    /// Host part of the authority, without port or IPv6 brackets.
    fn host(&self) -> String {
        let authority = self.authority;
        if let Some(rest) = authority.strip_prefix('[') {
            return rest.split(']').next().unwrap_or(rest).to_string();
        }
        match authority.rsplit_once(':') {
            Some((host, port)) if port.parse::<u16>().is_ok() => host.to_string(),
            _ => authority.to_string(),
        }
    }
}

/// Answers device and media service actions for one bridge.
#[derive(Debug, Clone)]
pub struct OnvifDevice {
    pub rtsp: RtspConfig,
    /// Port advertised in stream URIs and GetNetworkProtocols.
    pub rtsp_port: u16,
    pub video: VideoConfig,
    pub serial_number: String,
    pub hostname: String,
}

impl OnvifDevice {
    pub fn from_config(config: &BridgeConfig) -> Self {
        let rtsp_port = config
            .rtsp
            .bind
            .rsplit(':')
            .next()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8554);
        let serial_number = config.scale.scale_id.clone().unwrap_or_else(|| {
            let id = uuid::Uuid::new_v4().simple().to_string();
            id[..12].to_ascii_uppercase()
        });
        Self {
            rtsp: config.rtsp.clone(),
            rtsp_port,
            video: config.video.clone(),
            serial_number,
            hostname: config.onvif.hostname.clone(),
        }
    }

    /// Use the port an already started RTSP listener is bound to.
    pub fn with_rtsp_port(mut self, port: u16) -> Self {
        self.rtsp_port = port;
        self
    }

    /// Response body for `action` posted to `path`, or the fault to return.
    pub fn respond(
        &self,
        path: &str,
        action: &str,
        envelope: &str,
        site: &CallSite<'_>,
    ) -> Result<String, SoapFault> {
        match path.trim_end_matches('/') {
            DEVICE_PATH => self.device_action(action, site),
            MEDIA_PATH => self.media_action(action, envelope, site),
            other => Err(SoapFault::UnknownService(other.to_string())),
        }
    }

    fn device_action(&self, action: &str, site: &CallSite<'_>) -> Result<String, SoapFault> {
        let inner = match action {
            "GetDeviceInformation" => format!(
                "<tds:Manufacturer>{MANUFACTURER}</tds:Manufacturer>\
                 <tds:Model>{MODEL}</tds:Model>\
                 <tds:FirmwareVersion>{FIRMWARE_VERSION}</tds:FirmwareVersion>\
                 <tds:SerialNumber>{}</tds:SerialNumber>\
                 <tds:HardwareId>{HARDWARE_ID}</tds:HardwareId>",
                xml::escape(&self.serial_number)
            ),
            "GetCapabilities" => self.capabilities(site),
            "GetServices" => [(NS_DEVICE, DEVICE_PATH), (NS_MEDIA, MEDIA_PATH)]
                .iter()
                .map(|(ns, path)| {
                    format!(
                        "<tds:Service><tds:Namespace>{ns}</tds:Namespace>\
                         <tds:XAddr>{}</tds:XAddr>\
                         <tds:Version><tt:Major>17</tt:Major><tt:Minor>12</tt:Minor></tds:Version>\
                         </tds:Service>",
                        site.service_url(path)
                    )
                })
                .collect::<String>(),
            "GetServiceCapabilities" => "<tds:Capabilities/>".to_string(),
            "GetScopes" => SCOPES
                .iter()
                .map(|scope| {
                    format!(
                        "<tds:Scopes><tt:ScopeDef>Fixed</tt:ScopeDef>\
                         <tt:ScopeItem>{scope}</tt:ScopeItem></tds:Scopes>"
                    )
                })
                .collect::<String>(),
            "GetSystemDateAndTime" => system_date_and_time(Utc::now()),
            "GetHostname" => format!(
                "<tds:HostnameInformation><tt:FromDHCP>false</tt:FromDHCP>\
                 <tt:Name>{}</tt:Name></tds:HostnameInformation>",
                xml::escape(&self.hostname)
            ),
            "GetNetworkProtocols" => format!(
                "<tds:NetworkProtocols><tt:Name>RTSP</tt:Name><tt:Enabled>true</tt:Enabled>\
                 <tt:Port>{}</tt:Port></tds:NetworkProtocols>",
                self.rtsp_port
            ),
            "GetNetworkInterfaces" => format!(
                "<tds:NetworkInterfaces token=\"eth0\"><tt:Enabled>true</tt:Enabled>\
                 <tt:Info><tt:Name>eth0</tt:Name><tt:HwAddress>00:00:00:00:00:00</tt:HwAddress></tt:Info>\
                 <tt:IPv4><tt:Enabled>true</tt:Enabled><tt:Config>\
                 <tt:Manual><tt:Address>{}</tt:Address><tt:PrefixLength>24</tt:PrefixLength></tt:Manual>\
                 <tt:DHCP>false</tt:DHCP></tt:Config></tt:IPv4></tds:NetworkInterfaces>",
                site.local_ip
            ),
            "GetDiscoveryMode" => "<tds:DiscoveryMode>Discoverable</tds:DiscoveryMode>".to_string(),
            "GetUsers" => format!(
                "<tds:User><tt:Username>{}</tt:Username>\
                 <tt:UserLevel>Administrator</tt:UserLevel></tds:User>",
                xml::escape(&self.rtsp.username)
            ),
            "SystemReboot" => "<tds:Message>Reboot not supported</tds:Message>".to_string(),
            "SetSystemFactoryDefault" | "SetSystemDateAndTime" => {
                tracing::info!(action, "ignoring device setting change");
                String::new()
            }
            _ => return Err(SoapFault::ActionNotSupported(action.to_string())),
        };
        Ok(soap::wrap_response("tds", action, &inner))
    }

    fn capabilities(&self, site: &CallSite<'_>) -> String {
        format!(
            "<tds:Capabilities>\
             <tt:Device><tt:XAddr>{device}</tt:XAddr>\
             <tt:Network><tt:IPFilter>false</tt:IPFilter><tt:ZeroConfiguration>false</tt:ZeroConfiguration>\
             <tt:IPVersion6>false</tt:IPVersion6><tt:DynDNS>false</tt:DynDNS></tt:Network>\
             <tt:System><tt:DiscoveryResolve>false</tt:DiscoveryResolve><tt:DiscoveryBye>true</tt:DiscoveryBye>\
             <tt:RemoteDiscovery>false</tt:RemoteDiscovery><tt:SystemBackup>false</tt:SystemBackup>\
             <tt:SystemLogging>false</tt:SystemLogging><tt:FirmwareUpgrade>false</tt:FirmwareUpgrade>\
             <tt:SupportedVersions><tt:Major>16</tt:Major><tt:Minor>12</tt:Minor></tt:SupportedVersions>\
             </tt:System>\
             <tt:IO><tt:InputConnectors>0</tt:InputConnectors><tt:RelayOutputs>0</tt:RelayOutputs></tt:IO>\
             <tt:Security><tt:TLS1.1>false</tt:TLS1.1><tt:TLS1.2>false</tt:TLS1.2>\
             <tt:OnboardKeyGeneration>false</tt:OnboardKeyGeneration><tt:AccessPolicyConfig>false</tt:AccessPolicyConfig>\
             <tt:X.509Token>false</tt:X.509Token><tt:SAMLToken>false</tt:SAMLToken>\
             <tt:KerberosToken>false</tt:KerberosToken><tt:RELToken>false</tt:RELToken></tt:Security>\
             </tt:Device>\
             <tt:Media><tt:XAddr>{media}</tt:XAddr>\
             <tt:StreamingCapabilities><tt:RTPMulticast>false</tt:RTPMulticast>\
             <tt:RTP_TCP>true</tt:RTP_TCP><tt:RTP_RTSP_TCP>true</tt:RTP_RTSP_TCP>\
             </tt:StreamingCapabilities></tt:Media>\
             </tds:Capabilities>",
            device = site.service_url(DEVICE_PATH),
            media = site.service_url(MEDIA_PATH),
        )
    }

    fn media_action(
        &self,
        action: &str,
        envelope: &str,
        site: &CallSite<'_>,
    ) -> Result<String, SoapFault> {
        let inner = match action {
            "GetProfiles" => format!("<trt:Profiles token=\"{PROFILE_TOKEN}\" fixed=\"true\">{}</trt:Profiles>", self.profile_body()),
            "GetProfile" => {
                check_profile_token(envelope)?;
                format!("<trt:Profile token=\"{PROFILE_TOKEN}\" fixed=\"true\">{}</trt:Profile>", self.profile_body())
            }
            "GetStreamUri" => {
                check_profile_token(envelope)?;
                media_uri(&self.stream_uri(site))
            }
            "GetSnapshotUri" => media_uri(""),
            "GetVideoSources" => format!(
                "<trt:VideoSources token=\"{VIDEO_SOURCE_TOKEN}\">\
                 <tt:Framerate>{}</tt:Framerate>\
                 <tt:Resolution><tt:Width>{}</tt:Width><tt:Height>{}</tt:Height></tt:Resolution>\
                 <tt:Imaging><tt:Brightness>100</tt:Brightness></tt:Imaging>\
                 </trt:VideoSources>",
                self.video.frame_rate, self.video.width, self.video.height
            ),
            "GetVideoSourceConfiguration" => self.source_configuration("trt:Configuration"),
            "GetVideoSourceConfigurations" => self.source_configuration("trt:Configurations"),
            "GetVideoEncoderConfiguration" => self.encoder_configuration("trt:Configuration"),
            "GetVideoEncoderConfigurations" | "GetCompatibleVideoEncoderConfigurations" => {
                self.encoder_configuration("trt:Configurations")
            }
            "GetVideoEncoderConfigurationOptions" => self.encoder_options(),
            "GetVideoSourceConfigurationOptions" => {
                let VideoConfig { width, height, .. } = self.video;
                format!(
                    "<trt:Options><tt:BoundsRange>\
                     <tt:XRange><tt:Min>0</tt:Min><tt:Max>{width}</tt:Max></tt:XRange>\
                     <tt:YRange><tt:Min>0</tt:Min><tt:Max>{height}</tt:Max></tt:YRange>\
                     <tt:WidthRange><tt:Min>0</tt:Min><tt:Max>{width}</tt:Max></tt:WidthRange>\
                     <tt:HeightRange><tt:Min>0</tt:Min><tt:Max>{height}</tt:Max></tt:HeightRange>\
                     </tt:BoundsRange>\
                     <tt:VideoSourceTokensAvailable>{VIDEO_SOURCE_TOKEN}</tt:VideoSourceTokensAvailable>\
                     </trt:Options>"
                )
            }
            "GetServiceCapabilities" => "<trt:Capabilities SnapshotUri=\"false\" Rotation=\"false\">\
                 <trt:ProfileCapabilities MaximumNumberOfProfiles=\"1\"/>\
                 <trt:StreamingCapabilities RTPMulticast=\"false\" RTP_TCP=\"true\" RTP_RTSP_TCP=\"true\"/>\
                 </trt:Capabilities>"
                .to_string(),
            "GetAudioSources"
            | "GetAudioSourceConfigurations"
            | "GetAudioEncoderConfigurations"
            | "GetAudioOutputConfigurations"
            | "GetCompatibleAudioDecoderConfigurations" => String::new(),
            "GetAudioEncoderConfigurationOptions" => "<trt:Options/>".to_string(),
            "SetVideoEncoderConfiguration"
            | "AddPTZConfiguration"
            | "AddAudioOutputConfiguration"
            | "AddAudioDecoderConfiguration" => {
                tracing::info!(action, "ignoring media setting change");
                String::new()
            }
            _ => return Err(SoapFault::ActionNotSupported(action.to_string())),
        };
        Ok(soap::wrap_response("trt", action, &inner))
    }

    /// `rtsp://[user:pass@]host:port/stream`. The host is the configured
    /// public host, else the address the client used to reach this service.
    pub fn stream_uri(&self, site: &CallSite<'_>) -> String {
        let host = self.rtsp.public_host.clone().unwrap_or_else(|| site.host());
        let credentials = if self.rtsp.require_auth {
            format!("{}:{}@", self.rtsp.username, self.rtsp.password)
        } else {
            String::new()
        };
        format!(
            "rtsp://{credentials}{host}:{}/{}",
            self.rtsp_port, self.rtsp.stream_name
        )
    }

    fn encoding(&self) -> &'static str {
        match self.rtsp.codec {
            RtspCodec::Jpeg => "JPEG",
            RtspCodec::H264 => "H264",
        }
    }

    fn profile_body(&self) -> String {
        format!(
            "<tt:Name>{PROFILE_NAME}</tt:Name>{}{}",
            self.source_configuration("tt:VideoSourceConfiguration"),
            self.encoder_configuration("tt:VideoEncoderConfiguration"),
        )
    }

    fn source_configuration(&self, element: &str) -> String {
        format!(
            "<{element} token=\"{VIDEO_SOURCE_TOKEN}\">\
             <tt:Name>{VIDEO_SOURCE_TOKEN}</tt:Name><tt:UseCount>1</tt:UseCount>\
             <tt:SourceToken>{VIDEO_SOURCE_TOKEN}</tt:SourceToken>\
             <tt:Bounds x=\"0\" y=\"0\" width=\"{}\" height=\"{}\"/>\
             </{element}>",
            self.video.width, self.video.height
        )
    }

    fn encoder_configuration(&self, element: &str) -> String {
        let h264 = match self.rtsp.codec {
            RtspCodec::Jpeg => String::new(),
            RtspCodec::H264 => "<tt:H264><tt:GovLength>1</tt:GovLength>\
                                <tt:H264Profile>Baseline</tt:H264Profile></tt:H264>"
                .to_string(),
        };
        format!(
            "<{element} token=\"{VIDEO_ENCODER_TOKEN}\">\
             <tt:Name>{VIDEO_ENCODER_TOKEN}</tt:Name><tt:UseCount>1</tt:UseCount>\
             <tt:Encoding>{encoding}</tt:Encoding>\
             <tt:Resolution><tt:Width>{width}</tt:Width><tt:Height>{height}</tt:Height></tt:Resolution>\
             <tt:Quality>100</tt:Quality>\
             <tt:RateControl><tt:FrameRateLimit>{fps}</tt:FrameRateLimit>\
             <tt:EncodingInterval>1</tt:EncodingInterval>\
             <tt:BitrateLimit>{BITRATE_LIMIT}</tt:BitrateLimit></tt:RateControl>\
             {h264}<tt:SessionTimeout>PT60S</tt:SessionTimeout>\
             </{element}>",
            encoding = self.encoding(),
            width = self.video.width,
            height = self.video.height,
            fps = self.video.frame_rate,
        )
    }

    fn encoder_options(&self) -> String {
        let resolution = format!(
            "<tt:ResolutionsAvailable><tt:Width>{}</tt:Width><tt:Height>{}</tt:Height></tt:ResolutionsAvailable>",
            self.video.width, self.video.height
        );
        let ranges = "<tt:FrameRateRange><tt:Min>1</tt:Min><tt:Max>30</tt:Max></tt:FrameRateRange>\
                      <tt:EncodingIntervalRange><tt:Min>1</tt:Min><tt:Max>100</tt:Max></tt:EncodingIntervalRange>";
        let codec = match self.rtsp.codec {
            RtspCodec::Jpeg => format!("<tt:JPEG>{resolution}{ranges}</tt:JPEG>"),
            RtspCodec::H264 => format!(
                "<tt:H264>{resolution}\
                 <tt:GovLengthRange><tt:Min>1</tt:Min><tt:Max>1</tt:Max></tt:GovLengthRange>\
                 {ranges}<tt:H264ProfilesSupported>Baseline</tt:H264ProfilesSupported></tt:H264>"
            ),
        };
        format!(
            "<trt:Options><tt:QualityRange><tt:Min>1</tt:Min><tt:Max>100</tt:Max></tt:QualityRange>\
             {codec}</trt:Options>"
        )
    }
}

fn check_profile_token(envelope: &str) -> Result<(), SoapFault> {
    match xml::element_text(envelope, "ProfileToken") {
        Some(token) if token == PROFILE_TOKEN => Ok(()),
        other => Err(SoapFault::NoProfile(other.unwrap_or_default())),
    }
}

fn media_uri(uri: &str) -> String {
    format!(
        "<trt:MediaUri><tt:Uri>{}</tt:Uri>\
         <tt:InvalidAfterConnect>false</tt:InvalidAfterConnect>\
         <tt:InvalidAfterReboot>false</tt:InvalidAfterReboot>\
         <tt:Timeout>PT0S</tt:Timeout></trt:MediaUri>",
        xml::escape(uri)
    )
}

fn system_date_and_time(now: DateTime<Utc>) -> String {
    format!(
        "<tds:SystemDateAndTime><tt:DateTimeType>Manual</tt:DateTimeType>\
         <tt:DaylightSavings>false</tt:DaylightSavings>\
         <tt:TimeZone><tt:TZ>UTC0</tt:TZ></tt:TimeZone>\
         <tt:UTCDateTime>\
         <tt:Time><tt:Hour>{}</tt:Hour><tt:Minute>{}</tt:Minute><tt:Second>{}</tt:Second></tt:Time>\
         <tt:Date><tt:Year>{}</tt:Year><tt:Month>{}</tt:Month><tt:Day>{}</tt:Day></tt:Date>\
         </tt:UTCDateTime></tds:SystemDateAndTime>",
        now.hour(),
        now.minute(),
        now.second(),
        now.year(),
        now.month(),
        now.day()
    )
}
