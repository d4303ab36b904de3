//! Just enough XML for SOAP envelopes: a tag scanner, element text lookup
//! by local name, and escaping for values written back.
//!
//! Namespace prefixes are ignored. ONVIF clients disagree on prefixes
//! (`s:`, `soap:`, `SOAP-ENV:`, none at all) but agree on local names.

/// One start, end or empty-element tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag<'a> {
    /// Local name, prefix stripped.
    pub name: &'a str,
    /// Raw attribute text between the name and the closing `>`.
    pub attrs: &'a str,
    pub closing: bool,
    pub empty: bool,
    /// Offset just past the `>`.
    pub end: usize,
}

/// Scan forward from `from` to the next element tag, skipping the prolog,
/// comments, CDATA and doctype.
pub fn next_tag(xml: &str, from: usize) -> Option<Tag<'_>> {
    let mut pos = from;
    loop {
        let start = pos + xml.get(pos..)?.find('<')?;
        let rest = &xml[start..];
        if rest.starts_with("<?") {
            pos = start + rest.find("?>")? + 2;
            continue;
        }
        if rest.starts_with("<!--") {
            pos = start + rest.find("-->")? + 3;
            continue;
        }
        if rest.starts_with("<![CDATA[") {
            pos = start + rest.find("]]>")? + 3;
            continue;
        }
        if rest.starts_with("<!") {
            pos = start + rest.find('>')? + 1;
            continue;
        }

        let close = rest.find('>')?;
        let inner = &rest[1..close];
        let closing = inner.starts_with('/');
        let empty = inner.ends_with('/');
        let inner = inner.trim_start_matches('/').trim_end_matches('/');
        let name_end = inner
            .find(|c: char| c.is_ascii_whitespace())
            .unwrap_or(inner.len());
        let qualified = &inner[..name_end];
        return Some(Tag {
            name: local_name(qualified),
            attrs: inner[name_end..].trim(),
            closing,
            empty,
            end: start + close + 1,
        });
    }
}

pub fn local_name(qualified: &str) -> &str {
    qualified.rsplit(':').next().unwrap_or(qualified)
}

/// First start tag named `name` at or after `from`.
pub fn find_start<'a>(xml: &'a str, name: &str, from: usize) -> Option<Tag<'a>> {
    let mut pos = from;
    loop {
        let tag = next_tag(xml, pos)?;
        if !tag.closing && tag.name == name {
            return Some(tag);
        }
        pos = tag.end;
    }
}

/// Trimmed, unescaped text content of the first element named `name`.
///
/// Empty elements yield `Some("")`. Only the text before the first child
/// tag is returned.
pub fn element_text(xml: &str, name: &str) -> Option<String> {
    let tag = find_start(xml, name, 0)?;
    Some(text_after(xml, &tag))
}

/// Text content and raw attributes of the first element named `name`.
pub fn element_with_attrs<'a>(xml: &'a str, name: &str) -> Option<(&'a str, String)> {
    let tag = find_start(xml, name, 0)?;
    Some((tag.attrs, text_after(xml, &tag)))
}

fn text_after(xml: &str, tag: &Tag<'_>) -> String {
    if tag.empty {
        return String::new();
    }
    let rest = &xml[tag.end..];
    let text = rest.find('<').map_or(rest, |end| &rest[..end]);
    unescape(text.trim())
}

/// Value of attribute `name` (prefix ignored) in raw attribute text.
pub fn attribute<'a>(attrs: &'a str, name: &str) -> Option<&'a str> {
    let mut rest = attrs;
    while let Some(eq) = rest.find('=') {
        let key = rest[..eq].trim();
        let after = rest[eq + 1..].trim_start();
        let quote = after.chars().next()?;
        if quote != '"' && quote != '\'' {
            return None;
        }
        let value_end = after[1..].find(quote)? + 1;
        if local_name(key) == name {
            return Some(&after[1..value_end]);
        }
        rest = &after[value_end + 1..];
    }
    None
}

/// Local name of the first element inside `Body`: the SOAP action.
pub fn body_action(envelope: &str) -> Option<&str> {
    let body = find_start(envelope, "Body", 0)?;
    if body.empty {
        return None;
    }
    let first = next_tag(envelope, body.end)?;
    (!first.closing).then_some(first.name)
}

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn unescape(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    const GET_PROFILE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope">
  <s:Header/>
  <s:Body xmlns:trt="http://www.onvif.org/ver10/media/wsdl">
    <!-- requested by the recorder -->
    <trt:GetProfile><trt:ProfileToken>ScaleStream</trt:ProfileToken></trt:GetProfile>
  </s:Body>
</s:Envelope>"#;

    #[test]
    fn action_is_first_body_child() {
        assert_eq!(body_action(GET_PROFILE), Some("GetProfile"));

        let unprefixed = "<Envelope><Body><GetScopes/></Body></Envelope>";
        assert_eq!(body_action(unprefixed), Some("GetScopes"));

        assert_eq!(body_action("<Envelope><Body/></Envelope>"), None);
        assert_eq!(body_action("<Envelope><Body></Body></Envelope>"), None);
        assert_eq!(body_action("not xml"), None);
    }

    #[test]
    fn text_by_local_name() {
        assert_eq!(
            element_text(GET_PROFILE, "ProfileToken").as_deref(),
            Some("ScaleStream")
        );
        assert_eq!(element_text(GET_PROFILE, "Header").as_deref(), Some(""));
        assert_eq!(element_text(GET_PROFILE, "Missing"), None);
        assert_eq!(
            element_text("<a:Name>x &amp; y</a:Name>", "Name").as_deref(),
            Some("x & y")
        );
    }

    #[test]
    fn attributes_by_local_name() {
        let xml = r#"<wsse:Password Type="http://docs#PasswordDigest" wsu:Id='p1'>abc</wsse:Password>"#;
        let (attrs, text) = element_with_attrs(xml, "Password").unwrap();
        assert_eq!(text, "abc");
        assert_eq!(attribute(attrs, "Type"), Some("http://docs#PasswordDigest"));
        assert_eq!(attribute(attrs, "Id"), Some("p1"));
        assert_eq!(attribute(attrs, "Missing"), None);
    }

    #[test]
    fn escaping() {
        let raw = r#"a<b>&"c"'d'"#;
        let escaped = escape(raw);
        assert_eq!(escaped, "a&lt;b&gt;&amp;&quot;c&quot;&apos;d&apos;");
        assert_eq!(unescape(&escaped), raw);
        assert_eq!(unescape("&amp;lt;"), "&lt;");
    }
}
