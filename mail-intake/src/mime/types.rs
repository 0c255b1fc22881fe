use super::decode::{self, TransferEncoding};
use super::MimeError;

/// Header fields in arrival order. Lookups ignore case; repeated fields are kept.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// First value for `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value for `name`, in order
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A structured header value such as `attachment; filename="a.txt"`.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderValue {
    /// Leading token, lowercased (`attachment`, `multipart/mixed`, ...)
    pub value: String,
    /// Parameters with lowercased names, unquoted values
    pub params: Vec<(String, String)>,
}

impl HeaderValue {
    pub fn parse(raw: &str) -> Self {
        let mut segments = split_unquoted(raw, ';').into_iter();
        let value = segments
            .next()
            .map(|s| s.trim().to_ascii_lowercase())
            .unwrap_or_default();

        let params = segments
            .filter_map(|segment| {
                let (name, val) = segment.split_once('=')?;
                let name = name.trim().to_ascii_lowercase();
                if name.is_empty() {
                    return None;
                }
                Some((name, unquote(val.trim())))
            })
            .collect();

        Self { value, params }
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Resolve a possibly RFC 2231 extended or continued parameter, falling
    /// back to the plain form with RFC 2047 encoded words decoded.
    pub fn decoded_param(&self, name: &str) -> Option<String> {
        if let Some(extended) = self.param(&format!("{}*", name)) {
            return Some(decode::rfc2231_value(extended, true));
        }

        let mut sections: Vec<(u32, bool, &str)> = self
            .params
            .iter()
            .filter_map(|(n, v)| {
                let rest = n.strip_prefix(name)?.strip_prefix('*')?;
                let (index, extended) = match rest.strip_suffix('*') {
                    Some(index) => (index, true),
                    None => (rest, false),
                };
                Some((index.parse().ok()?, extended, v.as_str()))
            })
            .collect();

        if !sections.is_empty() {
            sections.sort_by_key(|(index, _, _)| *index);
            let first_extended = sections[0].1;
            let mut joined = String::new();
            for (i, (_, extended, value)) in sections.iter().enumerate() {
                if *extended {
                    joined.push_str(&decode::rfc2231_value(value, i == 0 && first_extended));
                } else {
                    joined.push_str(value);
                }
            }
            return Some(joined);
        }

        self.param(name).map(decode::rfc2047_words)
    }
}

/// Split on `sep` outside double-quoted strings.
fn split_unquoted(raw: &str, sep: char) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;

    for (i, ch) in raw.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            c if c == sep && !in_quotes => {
                segments.push(&raw[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    segments.push(&raw[start..]);
    segments
}

fn unquote(value: &str) -> String {
    let Some(inner) = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
    else {
        return value.to_string();
    };

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(ch);
        }
    }
    out
}

/// One MIME entity. Multipart entities carry their sub-parts in `children`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BodyPart {
    pub headers: HeaderMap,
    /// Payload exactly as received, still transfer-encoded
    pub body: Vec<u8>,
    pub children: Vec<BodyPart>,
}

impl BodyPart {
    /// Lowercased media type, `text/plain` when the header is absent
    pub fn content_type(&self) -> String {
        self.headers
            .get("content-type")
            .map(|v| HeaderValue::parse(v).value)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "text/plain".to_string())
    }

    pub fn is_multipart(&self) -> bool {
        self.content_type().starts_with("multipart/")
    }

    pub fn disposition(&self) -> Option<HeaderValue> {
        self.headers.get("content-disposition").map(HeaderValue::parse)
    }

    pub fn transfer_encoding(&self) -> TransferEncoding {
        self.headers
            .get("content-transfer-encoding")
            .map(TransferEncoding::parse)
            .unwrap_or(TransferEncoding::Identity)
    }

    /// Declared filename: disposition `filename` first, then content-type `name`
    pub fn filename(&self) -> Option<String> {
        let from_disposition = self
            .disposition()
            .and_then(|d| d.decoded_param("filename"));
        let name = from_disposition.or_else(|| {
            self.headers
                .get("content-type")
                .map(HeaderValue::parse)
                .and_then(|ct| ct.decoded_param("name"))
        })?;

        let name = name.trim().to_string();
        (!name.is_empty()).then_some(name)
    }

    /// Disposition mentions `attachment` and a non-empty filename is declared.
    pub fn is_attachment(&self) -> bool {
        let Some(raw) = self.headers.get("content-disposition") else {
            return false;
        };
        raw.to_ascii_lowercase().contains("attachment") && self.filename().is_some()
    }

    /// Payload with the transfer encoding removed
    pub fn decoded(&self) -> Result<Vec<u8>, MimeError> {
        self.transfer_encoding().decode(&self.body)
    }

    /// Non-multipart descendants in document order (self if this is a leaf)
    pub fn leaves(&self) -> Vec<&BodyPart> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a BodyPart>) {
        if self.children.is_empty() {
            out.push(self);
        } else {
            for child in &self.children {
                child.collect_leaves(out);
            }
        }
    }
}

/// Read-only view of a received message
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedMessage {
    pub root: BodyPart,
}

impl ParsedMessage {
    pub fn headers(&self) -> &HeaderMap {
        &self.root.headers
    }

    pub fn is_multipart(&self) -> bool {
        !self.root.children.is_empty()
    }

    /// Top-level parts; empty for a single-part message
    pub fn parts(&self) -> &[BodyPart] {
        &self.root.children
    }

    /// Leaf parts that qualify as attachments. A single-part message has none.
    pub fn attachment_parts(&self) -> Vec<&BodyPart> {
        if !self.is_multipart() {
            return Vec::new();
        }
        self.root
            .leaves()
            .into_iter()
            .filter(|part| part.is_attachment())
            .collect()
    }
}

/// A decoded attachment as found in the message
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    /// Filename as declared by the sender, not yet sanitized
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_map_case_insensitive_and_repeated() {
        let mut headers = HeaderMap::new();
        headers.push("Received", "from a");
        headers.push("Subject", "Report");
        headers.push("RECEIVED", "from b");

        assert_eq!(headers.get("subject"), Some("Report"));
        assert_eq!(
            headers.get_all("received").collect::<Vec<_>>(),
            vec!["from a", "from b"]
        );
        assert_eq!(headers.len(), 3);
    }

    #[test]
    fn test_header_map_get_outlives_lookup_key() {
        let mut headers = HeaderMap::new();
        headers.push("Content-Type", "text/plain");

        let value = {
            let key = String::from("content-type");
            headers.get(&key)
        };
        assert_eq!(value, Some("text/plain"));
    }

    #[test]
    fn test_header_value_quoted_semicolon() {
        let value = HeaderValue::parse(r#"attachment; filename="a;b \"c\".txt"; size=10"#);
        assert_eq!(value.value, "attachment");
        assert_eq!(value.param("filename"), Some(r#"a;b "c".txt"#));
        assert_eq!(value.param("size"), Some("10"));
    }

    #[test]
    fn test_header_value_unquoted_and_case() {
        let value = HeaderValue::parse("Multipart/Mixed; BOUNDARY=simple_boundary");
        assert_eq!(value.value, "multipart/mixed");
        assert_eq!(value.param("boundary"), Some("simple_boundary"));
    }

    #[test]
    fn test_rfc2231_extended_filename() {
        let value = HeaderValue::parse("attachment; filename*=UTF-8''na%C3%AFve%20plan.txt");
        assert_eq!(value.decoded_param("filename").as_deref(), Some("naïve plan.txt"));
    }

    #[test]
    fn test_rfc2231_continuations() {
        let value = HeaderValue::parse(
            "attachment; filename*0*=UTF-8''quarterly%20; filename*1=\"report\"; filename*2=.csv",
        );
        assert_eq!(
            value.decoded_param("filename").as_deref(),
            Some("quarterly report.csv")
        );
    }

    #[test]
    fn test_rfc2047_filename() {
        let value = HeaderValue::parse("attachment; filename=\"=?UTF-8?B?w6l0w6kucGRm?=\"");
        assert_eq!(value.decoded_param("filename").as_deref(), Some("été.pdf"));
    }

    fn part(headers: &[(&str, &str)]) -> BodyPart {
        let mut map = HeaderMap::new();
        for (n, v) in headers {
            map.push(*n, *v);
        }
        BodyPart {
            headers: map,
            ..Default::default()
        }
    }

    #[test]
    fn test_attachment_requires_disposition_and_filename() {
        let p = part(&[("Content-Disposition", "attachment; filename=\"a.txt\"")]);
        assert!(p.is_attachment());

        let inline = part(&[("Content-Disposition", "inline; filename=\"a.txt\"")]);
        assert!(!inline.is_attachment());

        let unnamed = part(&[("Content-Disposition", "attachment")]);
        assert!(!unnamed.is_attachment());

        let blank = part(&[("Content-Disposition", "attachment; filename=\"  \"")]);
        assert!(!blank.is_attachment());

        let no_disposition = part(&[("Content-Type", "application/pdf; name=\"a.pdf\"")]);
        assert!(!no_disposition.is_attachment());
    }

    #[test]
    fn test_filename_falls_back_to_content_type_name() {
        let p = part(&[
            ("Content-Type", "application/pdf; name=\"scan.pdf\""),
            ("Content-Disposition", "attachment"),
        ]);
        assert_eq!(p.filename().as_deref(), Some("scan.pdf"));
        assert!(p.is_attachment());
    }

    #[test]
    fn test_content_type_default() {
        let p = part(&[]);
        assert_eq!(p.content_type(), "text/plain");
        assert!(!p.is_multipart());
        assert_eq!(p.transfer_encoding(), TransferEncoding::Identity);
    }
}
