//! Error types for the RFB server library.

use std::io;
use thiserror::Error;

/// Result type for RFB operations.
pub type Result<T> = std::result::Result<T, RfbError>;

/// Errors that can occur in RFB server operations.
#[derive(Debug, Error)]
pub enum RfbError {
    /// I/O failure, peer closed, or any other transport-level error.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    /// A malformed message, unsupported version, or unsupported security type.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The client offered no protocol version this server understands.
    #[error("unsupported protocol version")]
    UnsupportedVersion,

    /// The client chose a security type the server did not offer.
    #[error("unsupported security type")]
    UnsupportedSecurity,

    /// A `SetPixelFormat` request named an invalid or unsupported pixel layout.
    #[error("invalid pixel format")]
    InvalidPixelFormat,

    /// A `ClientCutText` message declared a length over the configured bound.
    #[error("cut text too large")]
    OversizedCutText,

    /// Allocation or conversion failure while resizing or converting a framebuffer.
    #[error("resource error: {0}")]
    Resource(String),

    /// Host misuse: double-start, unlock without lock, and similar state violations.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The peer closed the connection (clean or otherwise).
    #[error("connection closed")]
    ConnectionClosed,
}
