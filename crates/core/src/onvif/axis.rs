//! VAPIX `param.cgi` answers. Recorders that see the AXIS manufacturer in
//! GetDeviceInformation follow up with these plain-text queries.

use super::services::{FIRMWARE_VERSION, OnvifDevice};

pub const CGI_PREFIX: &str = "/axis-cgi/";

/// Body for a `/axis-cgi/` GET with `action` and `group` query values.
pub fn param_response(device: &OnvifDevice, action: &str, group: &str) -> String {
    if action != "list" {
        return "OK".to_string();
    }
    let group = group.to_ascii_lowercase();
    let lines: Vec<String> = if group.starts_with("root.brand") {
        [
            "root.Brand.Brand=AXIS",
            "root.Brand.ProdFullName=AXIS M1065-LW Network Camera",
            "root.Brand.ProdNbr=M1065-LW",
            "root.Brand.ProdShortName=AXIS M1065-LW",
            "root.Brand.ProdType=Network Camera",
            "root.Brand.ProdVariant=",
            "root.Brand.WebURL=http://www.axis.com",
        ]
        .map(String::from)
        .to_vec()
    } else if group.starts_with("root.properties") {
        vec![
            "root.Properties.API.HTTP.Version=3".to_string(),
            "root.Properties.API.Metadata.Metadata=yes".to_string(),
            "root.Properties.API.RTSP.Version=2.01".to_string(),
            "root.Properties.EmbeddedDevelopment.Version=2.16".to_string(),
            "root.Properties.Firmware.BuildDate=Dec 2023".to_string(),
            "root.Properties.Firmware.BuildNumber=1".to_string(),
            format!("root.Properties.Firmware.Version={FIRMWARE_VERSION}"),
            "root.Properties.Image.Format=jpeg,mjpeg,h264".to_string(),
            "root.Properties.Image.NbrOfViews=2".to_string(),
            format!(
                "root.Properties.Image.Resolution={}x{}",
                device.video.width, device.video.height
            ),
            "root.Properties.Image.Rotation=0,180".to_string(),
            format!("root.Properties.System.SerialNumber={}", device.serial_number),
        ]
    } else if group.starts_with("root.streamprofile") {
        [
            "root.StreamProfile.MaxGroups=26",
            "root.StreamProfile.S0.Description=profile_1_h264",
            "root.StreamProfile.S0.Name=profile_1_h264",
            "root.StreamProfile.S0.Parameters=videocodec=h264",
        ]
        .map(String::from)
        .to_vec()
    } else {
        return "OK".to_string();
    };

    lines.iter().map(|line| format!("{line}\r\n")).collect()
}
