//! Core error types.

use thiserror::Error;

/// Errors raised while assembling or configuring session components.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Protocol table was built without a link-control protocol
    #[error("protocol table has no link-control protocol")]
    MissingLinkControl,

    /// Two table entries claim the same protocol number
    #[error("protocol 0x{protocol:04x} registered twice")]
    DuplicateProtocol {
        /// Protocol number registered twice
        protocol: u16,
    },

    /// A protocol rejected its configured options
    #[error("{protocol}: {reason}")]
    InvalidOptions {
        /// Protocol name
        protocol: String,
        /// Why the options were rejected
        reason: String,
    },

    /// Status store write failed
    #[error("status store: {0}")]
    StatusStore(String),
}
