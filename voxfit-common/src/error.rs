//! Common error types for voxfit

use thiserror::Error;

/// Common result type for voxfit operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across voxfit crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML syntax or schema error
    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
