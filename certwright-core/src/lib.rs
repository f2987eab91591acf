//! Certwright Core Library
//!
//! Shared configuration types, the configuration loader and the common
//! error type used by the Certwright binary.

pub mod config;
pub mod error;

pub use error::{Error, Result};

/// Certwright version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
