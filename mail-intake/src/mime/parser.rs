use thiserror::Error;
use tracing::warn;

use super::types::{Attachment, BodyPart, HeaderMap, HeaderValue, ParsedMessage};

/// Deepest multipart nesting followed before giving up
const MAX_DEPTH: usize = 32;

/// The message could not be taken apart as declared.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MimeError {
    #[error("multipart entity has no boundary parameter")]
    MissingBoundary,

    #[error("opening boundary {0:?} not found")]
    MissingOpeningBoundary(String),

    #[error("closing boundary {0:?} not found")]
    UnterminatedMultipart(String),

    #[error("multipart nesting deeper than {0} levels")]
    NestingTooDeep(usize),

    #[error("cannot decode payload: {0}")]
    Decode(String),
}

/// MIME message parser
pub struct MimeParser;

impl MimeParser {
    /// Parse a raw message into its header block and part tree.
    pub fn parse(message: &[u8]) -> Result<ParsedMessage, MimeError> {
        Ok(ParsedMessage {
            root: Self::parse_entity(message, 0)?,
        })
    }

    /// Parse `message` and decode every attachment part.
    ///
    /// A message without attachment parts yields `Ok(vec![])`. A part whose
    /// payload cannot be decoded is logged and skipped; its siblings are
    /// still returned. Only a broken structure fails the whole message.
    pub fn extract_attachments(message: &[u8]) -> Result<Vec<Attachment>, MimeError> {
        let parsed = Self::parse(message)?;

        Ok(parsed
            .attachment_parts()
            .into_iter()
            .filter_map(|part| {
                let filename = part.filename().unwrap_or_default();
                match part.decoded() {
                    Ok(data) => Some(Attachment {
                        content_type: part.content_type(),
                        filename,
                        data,
                    }),
                    Err(e) => {
                        warn!(filename = %filename, "Skipping undecodable attachment: {}", e);
                        None
                    }
                }
            })
            .collect())
    }

    fn parse_entity(entity: &[u8], depth: usize) -> Result<BodyPart, MimeError> {
        let (header_block, body) = Self::split_headers_body(entity);
        let headers = Self::parse_headers(header_block);

        let mut part = BodyPart {
            headers,
            body: body.to_vec(),
            children: Vec::new(),
        };

        if part.is_multipart() {
            if depth >= MAX_DEPTH {
                return Err(MimeError::NestingTooDeep(MAX_DEPTH));
            }

            let boundary = part
                .headers
                .get("content-type")
                .map(HeaderValue::parse)
                .and_then(|ct| ct.param("boundary").map(str::to_string))
                .filter(|b| !b.is_empty())
                .ok_or(MimeError::MissingBoundary)?;

            for section in Self::split_multipart(&boundary, body)? {
                part.children.push(Self::parse_entity(section, depth + 1)?);
            }
        }

        Ok(part)
    }

    /// Split an entity at the first empty line. Without one, everything is header.
    fn split_headers_body(entity: &[u8]) -> (&[u8], &[u8]) {
        let mut offset = 0;
        for line in entity.split_inclusive(|&b| b == b'\n') {
            if line == b"\r\n" || line == b"\n" {
                return (&entity[..offset], &entity[offset + line.len()..]);
            }
            offset += line.len();
        }
        (entity, &entity[entity.len()..])
    }

    /// Parse a header block, unfolding continuation lines.
    fn parse_headers(block: &[u8]) -> HeaderMap {
        let text = String::from_utf8_lossy(block);
        let mut headers = HeaderMap::new();
        let mut current: Option<(String, String)> = None;

        for line in text.lines() {
            if line.starts_with(' ') || line.starts_with('\t') {
                if let Some((_, ref mut value)) = current {
                    value.push(' ');
                    value.push_str(line.trim());
                }
            } else if let Some((name, value)) = line.split_once(':') {
                if let Some((name, value)) = current.take() {
                    headers.push(name, value);
                }
                current = Some((name.trim().to_string(), value.trim().to_string()));
            }
        }

        if let Some((name, value)) = current {
            headers.push(name, value);
        }

        headers
    }

    /// Cut a multipart body into its encapsulated sections.
    ///
    /// Delimiters must occupy a whole line (trailing whitespace allowed). The
    /// line break before a delimiter belongs to the delimiter, not the part.
    /// Preamble and epilogue are discarded.
    fn split_multipart<'a>(boundary: &str, body: &'a [u8]) -> Result<Vec<&'a [u8]>, MimeError> {
        let delimiter = format!("--{}", boundary);
        let close = format!("--{}--", boundary);

        let mut sections = Vec::new();
        let mut section_start: Option<usize> = None;
        let mut offset = 0;

        for line in body.split_inclusive(|&b| b == b'\n') {
            let trimmed = trim_line_end(line);

            if trimmed == delimiter.as_bytes() || trimmed == close.as_bytes() {
                if let Some(start) = section_start {
                    sections.push(strip_line_break(&body[start..offset]));
                }
                if trimmed == close.as_bytes() {
                    return Ok(sections);
                }
                section_start = Some(offset + line.len());
            }

            offset += line.len();
        }

        if section_start.is_none() {
            Err(MimeError::MissingOpeningBoundary(boundary.to_string()))
        } else {
            Err(MimeError::UnterminatedMultipart(boundary.to_string()))
        }
    }
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let end = line
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(0, |p| p + 1);
    &line[..end]
}

fn strip_line_break(section: &[u8]) -> &[u8] {
    section
        .strip_suffix(b"\r\n")
        .or_else(|| section.strip_suffix(b"\n"))
        .unwrap_or(section)
}
