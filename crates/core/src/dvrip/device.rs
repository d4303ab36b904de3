//! Identity the emulated camera presents for the lifetime of one server.

use crate::config::DvripConfig;

/// Lowest session id handed out; keeps ids clear of small sentinel values.
const SESSION_ID_MIN: u32 = 0x10000;
const SESSION_ID_MAX: u32 = i32::MAX as u32;

pub const FIRMWARE_VERSION: &str = "2.800.0000.0.R";
pub const SOFTWARE_VERSION: &str = "2.800.0000000.1";
pub const BUILD_DATE: &str = "2024-01-15";
pub const PROCESSOR: &str = "SSC337DE";

/// Fixed per-server values echoed by every response on the vendor port.
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    pub session_id: u32,
    pub random: String,
    pub realm: String,
    pub serial: String,
    pub device_type: String,
    pub channel_name: String,
}

impl DeviceIdentity {
    pub fn generate(config: &DvripConfig) -> Self {
        let serial = config
            .serial_number
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(generate_serial);
        let session_id = SESSION_ID_MIN + rand::random::<u32>() % (SESSION_ID_MAX - SESSION_ID_MIN);
        let random = (100_000_000 + rand::random::<u32>() % 900_000_000).to_string();

        tracing::info!(
            serial = %serial,
            session = format_args!("{:#010X}", session_id),
            "device identity generated"
        );

        Self {
            session_id,
            random,
            realm: format!("Login to {serial}"),
            serial,
            device_type: config.device_type.clone(),
            channel_name: config.channel_name.clone(),
        }
    }

    /// Session in the `0x%08X` form used by JSON responses.
    pub fn session_hex(&self) -> String {
        format!("0x{:08X}", self.session_id)
    }
}

fn generate_serial() -> String {
    format!(
        "3G0{:05}PAF{:05}",
        rand::random::<u32>() % 100_000,
        rand::random::<u32>() % 100_000
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_values_have_expected_shape() {
        let identity = DeviceIdentity::generate(&DvripConfig::default());
        assert!(identity.session_id >= SESSION_ID_MIN);
        assert!(identity.session_id < SESSION_ID_MAX);
        assert_eq!(identity.random.len(), 9);
        assert!(identity.random.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(identity.serial.len(), 16);
        assert!(identity.serial.starts_with("3G0"));
        assert_eq!(&identity.serial[8..11], "PAF");
        assert_eq!(identity.realm, format!("Login to {}", identity.serial));
    }

    #[test]
    fn configured_serial_wins() {
        let config = DvripConfig {
            serial_number: Some("SCALE-001".to_string()),
            ..DvripConfig::default()
        };
        let identity = DeviceIdentity::generate(&config);
        assert_eq!(identity.serial, "SCALE-001");
        assert_eq!(identity.realm, "Login to SCALE-001");
    }

    #[test]
    fn session_hex_format() {
        let mut identity = DeviceIdentity::generate(&DvripConfig::default());
        identity.session_id = 0x1A2B3;
        assert_eq!(identity.session_hex(), "0x0001A2B3");
    }
}
