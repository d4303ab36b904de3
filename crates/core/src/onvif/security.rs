//! WS-Security `UsernameToken` check for SOAP requests.
//!
//! `PasswordDigest` tokens are verified as
//! `Base64(SHA1(nonce + created + password))`; `PasswordText` tokens are
//! compared directly. The username match is case-insensitive.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha1::{Digest, Sha1};

use super::xml;
use crate::protocol::auth::Credentials;

/// Actions a client may call before it has credentials.
const PRE_AUTH: &[&str] = &[
    "GetSystemDateAndTime",
    "GetCapabilities",
    "GetServices",
    "GetServiceCapabilities",
];

pub fn is_pre_auth(action: &str) -> bool {
    PRE_AUTH.contains(&action)
}

/// Whether the envelope's security header carries a token for `credentials`.
pub fn authorize(credentials: &Credentials, envelope: &str) -> bool {
    let Some(username) = xml::element_text(envelope, "Username") else {
        return false;
    };
    if !username.eq_ignore_ascii_case(&credentials.username) {
        return false;
    }
    let Some((attrs, password)) = xml::element_with_attrs(envelope, "Password") else {
        return false;
    };

    let digest = xml::attribute(attrs, "Type").is_some_and(|t| t.ends_with("#PasswordDigest"));
    if !digest {
        return password == credentials.password;
    }

    let Some(nonce) = xml::element_text(envelope, "Nonce") else {
        return false;
    };
    let Ok(nonce) = STANDARD.decode(nonce) else {
        return false;
    };
    let created = xml::element_text(envelope, "Created").unwrap_or_default();
    password_digest(&nonce, &created, &credentials.password) == password
}

pub fn password_digest(nonce: &[u8], created: &str, password: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(nonce);
    hasher.update(created.as_bytes());
    hasher.update(password.as_bytes());
    STANDARD.encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(username: &str, password_type: &str, password: &str) -> String {
        format!(
            r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope">
<s:Header><wsse:Security><wsse:UsernameToken>
<wsse:Username>{username}</wsse:Username>
<wsse:Password Type="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-username-token-profile-1.0#{password_type}">{password}</wsse:Password>
<wsse:Nonce EncodingType="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-soap-message-security-1.0#Base64Binary">MDEyMzQ1Njc4OWFiY2RlZg==</wsse:Nonce>
<wsu:Created>2026-01-01T00:00:00Z</wsu:Created>
</wsse:UsernameToken></wsse:Security></s:Header>
<s:Body><tds:GetDeviceInformation/></s:Body></s:Envelope>"#
        )
    }

    fn creds() -> Credentials {
        Credentials::new("admin", "scale123")
    }

    #[test]
    fn digest_token_is_verified() {
        assert_eq!(
            password_digest(b"0123456789abcdef", "2026-01-01T00:00:00Z", "scale123"),
            "+PoRqX3k/yVYUX88c1lzH2vGwyo="
        );
        let good = envelope("Admin", "PasswordDigest", "+PoRqX3k/yVYUX88c1lzH2vGwyo=");
        assert!(authorize(&creds(), &good));

        let wrong = envelope("admin", "PasswordDigest", "AAAAAAAAAAAAAAAAAAAAAAAAAAA=");
        assert!(!authorize(&creds(), &wrong));
    }

    #[test]
    fn text_token_is_compared() {
        assert!(authorize(&creds(), &envelope("admin", "PasswordText", "scale123")));
        assert!(!authorize(&creds(), &envelope("admin", "PasswordText", "nope")));
        assert!(!authorize(&creds(), &envelope("guest", "PasswordText", "scale123")));
    }

    #[test]
    fn missing_token_is_rejected() {
        let bare = "<Envelope><Body><GetProfiles/></Body></Envelope>";
        assert!(!authorize(&creds(), bare));
        assert!(is_pre_auth("GetSystemDateAndTime"));
        assert!(!is_pre_auth("GetStreamUri"));
    }
}
