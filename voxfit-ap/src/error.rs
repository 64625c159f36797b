//! Error types for voxfit-ap
//!
//! Rate rejections seen while probing are recorded as data
//! ([`RateSupport`](crate::audio::probe::RateSupport)) and never surface here.
//! Every variant below terminates the operation that raised it and carries
//! enough context to diagnose without re-running. Nothing is retried.

use crate::audio::types::AudioFormat;
use thiserror::Error;

/// Main error type for voxfit-ap
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation errors
    #[error("Configuration error: {0}")]
    Config(#[from] voxfit_common::Error),

    /// Engine format cannot be adapted to the device (channels or representation)
    #[error("Negotiation failed for device {device_index}: {reason}")]
    Negotiation { device_index: usize, reason: String },

    /// Malformed or empty input buffer, fatal to that buffer only
    #[error("Resample error: {0}")]
    Resample(String),

    /// Device rejected the format at open time
    #[error("Failed to open device {device_index} with {format}: {message}")]
    StreamOpen {
        device_index: usize,
        format: AudioFormat,
        message: String,
    },

    /// Buffer handed to a session bound to a different format
    #[error("Format mismatch: session expects {expected}, buffer is {actual}")]
    FormatMismatch {
        expected: AudioFormat,
        actual: AudioFormat,
    },

    /// Device enumeration or stream runtime errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Service never became ready
    #[error("Service not ready after {waited_secs:.1}s")]
    ServiceUnready { waited_secs: f64 },

    /// Diagnostic output or an I/O error matched a device-format signature
    #[error("Device format error detected: {0}")]
    FormatErrorDetected(String),

    /// Non-success status or pre-first-chunk stream failure
    #[error("Request failed after {chunks} chunks: {message}")]
    Request {
        /// HTTP status, when a response arrived
        status: Option<u16>,
        chunks: usize,
        message: String,
    },

    /// File / process I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type using voxfit-ap Error
pub type Result<T> = std::result::Result<T, Error>;
