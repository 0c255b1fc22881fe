//! Security module
//!
//! Coarse perimeter controls for the intake listener:
//! - [`access`]: peer address whitelist checked before any mail is accepted
//! - [`limiter`]: cap on concurrently running SMTP sessions

pub mod access;
pub mod limiter;

pub use access::AccessFilter;
pub use limiter::{ConnectionLimiter, SessionPermit};
