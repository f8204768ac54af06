//! Errors raised while setting up capture
//!
//! Capture itself never fails a call; these only surface from configuration
//! loading and instrumentor construction.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Configuration could not be read or parsed, or names an unusable sink
    #[error("Invalid capture configuration: {0}")]
    Config(String),

    #[error("Capture configuration rejected: {0}")]
    ConfigValidation(String),

    /// Instrumentor setup failed for a reason unrelated to configuration
    #[error("Instrumentor setup failed: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
