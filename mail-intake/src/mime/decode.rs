//! Transfer and header-word decoders
//!
//! - Content-Transfer-Encoding: base64, quoted-printable, identity
//! - RFC 2231 extended parameter values (`UTF-8''na%C3%AFve.txt`)
//! - RFC 2047 encoded words (`=?UTF-8?B?...?=`)

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;

use super::MimeError;

/// Senders in the wild omit or mangle padding and leave stray bits in the
/// final symbol; accept both.
const BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    Base64,
    QuotedPrintable,
    /// 7bit, 8bit, binary, absent or unrecognised
    Identity,
}

impl TransferEncoding {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "base64" => TransferEncoding::Base64,
            "quoted-printable" => TransferEncoding::QuotedPrintable,
            _ => TransferEncoding::Identity,
        }
    }

    pub fn decode(&self, body: &[u8]) -> Result<Vec<u8>, MimeError> {
        match self {
            TransferEncoding::Base64 => decode_base64(body),
            TransferEncoding::QuotedPrintable => Ok(decode_quoted_printable(body)),
            TransferEncoding::Identity => Ok(body.to_vec()),
        }
    }
}

pub fn decode_base64(content: &[u8]) -> Result<Vec<u8>, MimeError> {
    let cleaned: Vec<u8> = content
        .iter()
        .filter(|b| !b.is_ascii_whitespace())
        .copied()
        .collect();

    BASE64
        .decode(&cleaned)
        .map_err(|e| MimeError::Decode(format!("base64: {}", e)))
}

/// Lenient quoted-printable: malformed escapes are kept literally.
pub fn decode_quoted_printable(content: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(content.len());

    for line in content.split_inclusive(|&b| b == b'\n') {
        let (text, ending): (&[u8], &[u8]) = if let Some(t) = line.strip_suffix(b"\r\n") {
            (t, &b"\r\n"[..])
        } else if let Some(t) = line.strip_suffix(b"\n") {
            (t, &b"\n"[..])
        } else {
            (line, &[][..])
        };

        // Trailing whitespace is transport padding (RFC 2045 6.7 rule 3)
        let end = text
            .iter()
            .rposition(|b| *b != b' ' && *b != b'\t')
            .map_or(0, |p| p + 1);
        let text = &text[..end];

        let (text, soft_break) = match text.strip_suffix(b"=") {
            Some(t) => (t, true),
            None => (text, false),
        };

        unescape_into(text, b'=', &mut out);

        if !soft_break {
            out.extend_from_slice(ending);
        }
    }

    out
}

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// Replace `<escape>XX` hex pairs with the byte they name.
fn unescape_into(text: &[u8], escape: u8, out: &mut Vec<u8>) {
    let mut i = 0;
    while i < text.len() {
        if text[i] == escape {
            if let (Some(hi), Some(lo)) = (
                text.get(i + 1).and_then(|c| hex_value(*c)),
                text.get(i + 2).and_then(|c| hex_value(*c)),
            ) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(text[i]);
        i += 1;
    }
}

fn percent_decode(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    unescape_into(value.as_bytes(), b'%', &mut out);
    out
}

/// Bytes to text for the charsets senders actually use; anything else is
/// read as UTF-8 with replacement.
fn charset_to_string(charset: &str, bytes: &[u8]) -> String {
    match charset.trim().to_ascii_lowercase().as_str() {
        "iso-8859-1" | "latin1" | "latin-1" => bytes.iter().map(|&b| b as char).collect(),
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// Decode an RFC 2231 extended value. Only the first section of a value
/// carries the `charset'language'` prefix.
pub fn rfc2231_value(value: &str, has_prefix: bool) -> String {
    if has_prefix {
        let mut pieces = value.splitn(3, '\'');
        if let (Some(charset), Some(_lang), Some(text)) = (pieces.next(), pieces.next(), pieces.next())
        {
            return charset_to_string(charset, &percent_decode(text));
        }
    }
    String::from_utf8_lossy(&percent_decode(value)).into_owned()
}

/// Decode every `=?charset?B|Q?text?=` word in `input`. Whitespace between
/// adjacent encoded words is dropped; malformed words are left as they are.
pub fn rfc2047_words(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    let mut pending_space = String::new();
    let mut last_was_word = false;

    while !rest.is_empty() {
        let Some(start) = rest.find("=?") else {
            out.push_str(&pending_space);
            out.push_str(rest);
            return out;
        };

        let (before, candidate) = rest.split_at(start);
        match decode_encoded_word(candidate) {
            Some((decoded, consumed)) => {
                let gap_is_space = before.chars().all(char::is_whitespace);
                if !(last_was_word && gap_is_space) {
                    out.push_str(&pending_space);
                    out.push_str(before);
                }
                pending_space.clear();
                out.push_str(&decoded);
                last_was_word = true;
                rest = &candidate[consumed..];

                let spaces = rest.len() - rest.trim_start().len();
                pending_space.push_str(&rest[..spaces]);
                rest = &rest[spaces..];
            }
            None => {
                out.push_str(&pending_space);
                pending_space.clear();
                out.push_str(before);
                out.push_str("=?");
                last_was_word = false;
                rest = &candidate[2..];
            }
        }
    }

    out.push_str(&pending_space);
    out
}

/// Returns the decoded text and the number of bytes of `input` consumed.
fn decode_encoded_word(input: &str) -> Option<(String, usize)> {
    let body = input.strip_prefix("=?")?;
    let mut fields = body.splitn(3, '?');
    let charset = fields.next()?;
    let encoding = fields.next()?;
    let tail = fields.next()?;
    let text_end = tail.find("?=")?;
    let text = &tail[..text_end];

    if charset.is_empty() || text.contains(char::is_whitespace) {
        return None;
    }
    // RFC 2231 language suffix: =?utf-8*en?Q?...?=
    let charset = charset.split('*').next().unwrap_or(charset);

    let bytes = match encoding {
        "B" | "b" => decode_base64(text.as_bytes()).ok()?,
        "Q" | "q" => {
            let mut bytes = Vec::with_capacity(text.len());
            unescape_into(text.replace('_', " ").as_bytes(), b'=', &mut bytes);
            bytes
        }
        _ => return None,
    };

    let consumed = 2 + charset_len(body) + 1 + encoding.len() + 1 + text_end + 2;
    Some((charset_to_string(charset, &bytes), consumed))
}

fn charset_len(body: &str) -> usize {
    body.find('?').unwrap_or(body.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_transfer_encoding() {
        assert_eq!(TransferEncoding::parse("BASE64"), TransferEncoding::Base64);
        assert_eq!(
            TransferEncoding::parse(" Quoted-Printable "),
            TransferEncoding::QuotedPrintable
        );
        assert_eq!(TransferEncoding::parse("7bit"), TransferEncoding::Identity);
        assert_eq!(TransferEncoding::parse("8bit"), TransferEncoding::Identity);
    }

    #[test]
    fn test_decode_base64() {
        assert_eq!(decode_base64(b"SGVsbG8=").unwrap(), b"Hello");
    }

    #[test]
    fn test_decode_base64_with_whitespace() {
        let encoded = b"SGVs bG8g\r\nV29y bGQ=";
        assert_eq!(decode_base64(encoded).unwrap(), b"Hello World");
    }

    #[test]
    fn test_decode_base64_missing_padding() {
        assert_eq!(decode_base64(b"SGVsbG8").unwrap(), b"Hello");
    }

    #[test]
    fn test_decode_base64_trailing_bits() {
        assert_eq!(decode_base64(b"SGVsbG9=").unwrap(), b"Hello");
    }

    #[test]
    fn test_decode_base64_garbage() {
        assert!(matches!(decode_base64(b"!!!not base64!!!"), Err(MimeError::Decode(_))));
    }

    #[test]
    fn test_decode_quoted_printable() {
        assert_eq!(decode_quoted_printable(b"Hello=20World=21"), b"Hello World!");
    }

    #[test]
    fn test_decode_quoted_printable_soft_linebreak() {
        assert_eq!(decode_quoted_printable(b"Hello=\r\nWorld"), b"HelloWorld");
        assert_eq!(decode_quoted_printable(b"Hello=\nWorld"), b"HelloWorld");
    }

    #[test]
    fn test_decode_quoted_printable_binary_bytes() {
        assert_eq!(decode_quoted_printable(b"=00=FF=e9"), vec![0x00, 0xff, 0xe9]);
    }

    #[test]
    fn test_decode_quoted_printable_keeps_hard_breaks_and_strips_padding() {
        assert_eq!(decode_quoted_printable(b"one  \r\ntwo"), b"one\r\ntwo");
    }

    #[test]
    fn test_decode_quoted_printable_malformed_escape() {
        assert_eq!(decode_quoted_printable(b"a=ZZb="), b"a=ZZb");
    }

    #[test]
    fn test_rfc2231_value() {
        assert_eq!(rfc2231_value("utf-8'en'r%C3%A9sum%C3%A9.doc", true), "résumé.doc");
        assert_eq!(rfc2231_value("iso-8859-1''caf%E9.txt", true), "café.txt");
        assert_eq!(rfc2231_value("part%202", false), "part 2");
    }

    #[test]
    fn test_rfc2047_words() {
        assert_eq!(rfc2047_words("=?utf-8?Q?caf=C3=A9_menu.txt?="), "café menu.txt");
        assert_eq!(rfc2047_words("=?UTF-8?B?SGVs?= =?UTF-8?B?bG8=?=.txt"), "Hello.txt");
        assert_eq!(rfc2047_words("plain name.txt"), "plain name.txt");
        assert_eq!(rfc2047_words("broken =?x.txt"), "broken =?x.txt");
    }
}
