//! mail-intake: receive-only SMTP drop box for attachments
//!
//! Accepts mail from a fixed set of peer addresses, takes each message
//! apart and writes its attachments into one directory. Nothing is relayed,
//! queued or stored besides the attachment files.
//!
//! # Example
//!
//! ```no_run
//! use mail_intake::config::Config;
//! use mail_intake::smtp::SmtpServer;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Arc::new(Config::default());
//!     let handle = SmtpServer::new(config).start().await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     handle.stop().await;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`error`]: Error types
//! - [`security`]: Peer whitelist and session cap
//! - [`mime`]: Message parsing and attachment extraction
//! - [`storage`]: Attachment files on disk
//! - [`smtp`]: Server and session

pub mod config;
pub mod error;
pub mod mime;
pub mod security;
pub mod smtp;
pub mod storage;

// Re-export commonly used types
pub use config::Config;
pub use error::{IntakeError, Result};
