//! Error types for frame and control-packet parsing.

use thiserror::Error;

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors that can occur while parsing link frames.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame is shorter than the link header
    #[error("frame too short: {len} bytes, need at least {min}")]
    ShortFrame {
        /// Bytes actually received
        len: usize,
        /// Minimum length required
        min: usize,
    },

    /// Frame exceeds the largest receive unit we accept
    #[error("frame too large: {len} bytes (max {max})")]
    FrameTooLarge {
        /// Frame length
        len: usize,
        /// Configured maximum
        max: usize,
    },

    /// Control packet length field disagrees with the bytes present
    #[error("control packet length {declared} invalid for {available} available bytes")]
    BadControlLength {
        /// Value of the length field
        declared: usize,
        /// Bytes actually present
        available: usize,
    },
}
