//! SMTP intake (RFC 5321 subset)
//!
//! - [`server`]: listener, accept loop and lifecycle
//! - [`session`]: per-connection state machine
//! - [`commands`]: command line parsing

pub mod commands;
pub mod server;
pub mod session;

pub use commands::SmtpCommand;
pub use server::{ServerHandle, SmtpServer};
pub use session::{SessionContext, SessionState, SmtpSession};
