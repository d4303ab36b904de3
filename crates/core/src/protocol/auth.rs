//! RTSP client authorization (RFC 2617 schemes over RFC 2326).
//!
//! Basic credentials are decoded and compared. Digest responses are accepted
//! when they name the configured user; the hash is not verified, so this is a
//! compatibility shim for NVRs that insist on Digest, not a security boundary.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use super::request::RtspRequest;
use super::response::RtspResponse;

pub const REALM: &str = "Scale Streamer";

#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    /// Whether the request's `Authorization` header is acceptable.
    pub fn authorize(&self, request: &RtspRequest) -> bool {
        let Some(header) = request.get_header("Authorization") else {
            return false;
        };

        if let Some(encoded) = header.strip_prefix("Basic ") {
            let Ok(decoded) = STANDARD.decode(encoded.trim()) else {
                return false;
            };
            let expected = format!("{}:{}", self.username, self.password);
            return decoded == expected.as_bytes();
        }

        if let Some(params) = header.strip_prefix("Digest ") {
            return params.contains(&format!("username=\"{}\"", self.username));
        }

        false
    }

    /// 401 offering both schemes with a fresh nonce.
    pub fn challenge(&self, cseq: &str) -> RtspResponse {
        let nonce = format!("{:016x}", rand::random::<u64>());
        RtspResponse::unauthorized()
            .add_header("CSeq", cseq)
            .add_header("WWW-Authenticate", &format!("Basic realm=\"{REALM}\""))
            .add_header(
                "WWW-Authenticate",
                &format!("Digest realm=\"{REALM}\", nonce=\"{nonce}\""),
            )
    }
}
