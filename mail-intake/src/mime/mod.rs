//! MIME message parsing and attachment extraction
//!
//! [`MimeParser::parse`] turns a received message into a [`ParsedMessage`]
//! (RFC 2045/2046 structure, multipart walked to any reasonable depth).
//! [`extract`] goes one step further and returns the decoded attachments.
//!
//! An empty result means "no attachments"; structural problems are reported
//! as [`MimeError`] so callers can tell the two apart.

pub mod decode;
pub mod parser;
pub mod types;

pub use decode::TransferEncoding;
pub use parser::{MimeError, MimeParser};
pub use types::{Attachment, BodyPart, HeaderMap, HeaderValue, ParsedMessage};

/// Decoded attachments of `message`, in document order.
pub fn extract(message: &[u8]) -> Result<Vec<Attachment>, MimeError> {
    MimeParser::extract_attachments(message)
}
