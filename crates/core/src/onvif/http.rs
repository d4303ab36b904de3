//! Minimal HTTP/1.1 framing for the SOAP endpoints.
//!
//! One request per connection: the response always carries
//! `Connection: close`.

use std::io::{self, Read};

use crate::transport::reader::{MAX_BODY, MAX_HEAD, content_length, find_head_end};

#[derive(Debug)]
pub struct HttpRequest {
    pub method: String,
    /// Path without the query string.
    pub path: String,
    pub query: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Value of `key` in the query string.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
    }
}

/// Read one request from `source`. `Ok(None)` when the peer closed before
/// sending a complete request or the request was too large.
pub fn read_request(source: &mut impl Read) -> io::Result<Option<HttpRequest>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        if let Some(head_end) = find_head_end(&buf) {
            let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
            let body_len = content_length(&head);
            if body_len > MAX_BODY {
                tracing::warn!(body_len, "oversized SOAP request refused");
                return Ok(None);
            }
            if buf.len() >= head_end + body_len {
                let body = String::from_utf8_lossy(&buf[head_end..head_end + body_len]);
                return Ok(parse(&head, body.into_owned()));
            }
        } else if buf.len() > MAX_HEAD {
            tracing::warn!(len = buf.len(), "oversized HTTP head refused");
            return Ok(None);
        }

        let n = source.read(&mut chunk)?;
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn parse(head: &str, body: String) -> Option<HttpRequest> {
    let mut lines = head.lines();
    let mut parts = lines.next()?.split_whitespace();
    let method = parts.next()?.to_string();
    let target = parts.next()?;
    let (path, query) = target.split_once('?').unwrap_or((target, ""));

    let headers = lines
        .take_while(|line| !line.is_empty())
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .collect();

    Some(HttpRequest {
        method,
        path: path.to_string(),
        query: query.to_string(),
        headers,
        body,
    })
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        _ => "Internal Server Error",
    }
}

pub fn response(status: u16, content_type: &str, body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 {status} {}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\n\
         Connection: close\r\n\r\n{body}",
        reason(status),
        body.len()
    )
    .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_head_and_body() {
        let raw = "POST /onvif/device_service HTTP/1.1\r\nHost: 10.0.0.5:8080\r\n\
                   Content-Type: application/soap+xml\r\nContent-Length: 6\r\n\r\n<a/>\r\n";
        let request = read_request(&mut Cursor::new(raw.as_bytes().to_vec()))
            .unwrap()
            .unwrap();
        assert_eq!(request.method, "POST");
        assert_eq!(request.path, "/onvif/device_service");
        assert_eq!(request.header("host"), Some("10.0.0.5:8080"));
        assert_eq!(request.body, "<a/>\r\n");
    }

    #[test]
    fn splits_query_string() {
        let raw = "GET /axis-cgi/param.cgi?action=list&group=root.Brand HTTP/1.1\r\n\r\n";
        let request = read_request(&mut Cursor::new(raw.as_bytes().to_vec()))
            .unwrap()
            .unwrap();
        assert_eq!(request.path, "/axis-cgi/param.cgi");
        assert_eq!(request.query_param("action"), Some("list"));
        assert_eq!(request.query_param("group"), Some("root.Brand"));
        assert_eq!(request.query_param("missing"), None);
    }

    #[test]
    fn truncated_or_oversized_requests_are_dropped() {
        let truncated = "POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc";
        assert!(read_request(&mut Cursor::new(truncated.as_bytes().to_vec()))
            .unwrap()
            .is_none());

        let oversized = "POST / HTTP/1.1\r\nContent-Length: 18446744073709551615\r\n\r\nabc";
        assert!(read_request(&mut Cursor::new(oversized.as_bytes().to_vec()))
            .unwrap()
            .is_none());
    }

    #[test]
    fn response_declares_length() {
        let bytes = response(200, "text/plain", "OK");
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 2\r\n"));
        assert!(text.ends_with("\r\n\r\nOK"));
    }
}
