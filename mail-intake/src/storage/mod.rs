//! Attachment storage
//!
//! Provides the on-disk backend for extracted attachments:
//! - [`attachments`]: flat directory store with filename sanitizing and an
//!   explicit collision policy

pub mod attachments;

pub use attachments::{sanitize_filename, AttachmentRecord, AttachmentStore};
