use thiserror::Error;

use crate::mime::MimeError;

#[derive(Error, Debug)]
pub enum IntakeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SMTP protocol error: {0}")]
    SmtpProtocol(String),

    #[error("MIME error: {0}")]
    Mime(#[from] MimeError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid attachment filename: {0:?}")]
    InvalidFilename(String),

    #[error("Attachment already exists: {0}")]
    AttachmentExists(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, IntakeError>;
