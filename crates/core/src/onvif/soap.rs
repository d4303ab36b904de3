//! SOAP 1.2 envelopes and faults.

use super::xml;

pub const NS_ENVELOPE: &str = "http://www.w3.org/2003/05/soap-envelope";

const NAMESPACES: &str = concat!(
    "xmlns:s=\"http://www.w3.org/2003/05/soap-envelope\" ",
    "xmlns:tds=\"http://www.onvif.org/ver10/device/wsdl\" ",
    "xmlns:trt=\"http://www.onvif.org/ver10/media/wsdl\" ",
    "xmlns:tt=\"http://www.onvif.org/ver10/schema\" ",
    "xmlns:ter=\"http://www.onvif.org/ver10/error\"",
);

/// A request the services refuse.
///
/// Sender faults map to HTTP 400, receiver faults to HTTP 500 (SOAP 1.2
/// HTTP binding).
#[derive(Debug, thiserror::Error)]
pub enum SoapFault {
    /// The body has no element to dispatch on.
    #[error("no SOAP action in request body")]
    MissingAction,

    #[error("action {0} not supported")]
    ActionNotSupported(String),

    #[error("no service at {0}")]
    UnknownService(String),

    #[error("profile token {0:?} does not exist")]
    NoProfile(String),

    #[error("sender not authorized")]
    NotAuthorized,
}

impl SoapFault {
    fn is_sender(&self) -> bool {
        !matches!(self, Self::ActionNotSupported(_) | Self::UnknownService(_))
    }

    pub fn http_status(&self) -> u16 {
        if self.is_sender() { 400 } else { 500 }
    }

    /// `ter:` subcodes from the ONVIF core error list.
    fn subcodes(&self) -> &'static [&'static str] {
        match self {
            Self::MissingAction => &["ter:InvalidArgs"],
            Self::ActionNotSupported(_) | Self::UnknownService(_) => &["ter:ActionNotSupported"],
            Self::NoProfile(_) => &["ter:InvalidArgVal", "ter:NoProfile"],
            Self::NotAuthorized => &["ter:NotAuthorized"],
        }
    }

    /// Complete fault envelope.
    pub fn to_envelope(&self) -> String {
        let code = if self.is_sender() { "s:Sender" } else { "s:Receiver" };
        let subcodes = self.subcodes();
        let mut nested = String::new();
        for subcode in subcodes {
            nested.push_str(&format!("<s:Subcode><s:Value>{subcode}</s:Value>"));
        }
        nested.push_str(&"</s:Subcode>".repeat(subcodes.len()));
        envelope(&format!(
            "<s:Fault><s:Code><s:Value>{code}</s:Value>{nested}</s:Code>\
             <s:Reason><s:Text xml:lang=\"en\">{}</s:Text></s:Reason></s:Fault>",
            xml::escape(&self.to_string())
        ))
    }
}

/// Wrap body content in an envelope declaring the ONVIF namespaces.
pub fn envelope(body: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <s:Envelope {NAMESPACES}><s:Body>{body}</s:Body></s:Envelope>"
    )
}

/// Envelope holding `<prefix:ActionResponse>inner</prefix:ActionResponse>`.
pub fn wrap_response(prefix: &str, action: &str, inner: &str) -> String {
    envelope(&format!(
        "<{prefix}:{action}Response>{inner}</{prefix}:{action}Response>"
    ))
}
