//! Link-layer framing for the linkd session orchestrator.
//!
//! Every packet that crosses the link starts with a fixed 4-byte header
//! (address, control, 16-bit protocol number) followed by the protocol's own
//! payload. The orchestrator only ever looks at the header to pick a handler;
//! payload interpretation belongs to the protocol collaborators.
//!
//! ```text
//! ┌─────────┬─────────┬──────────────────┬──────────────────────┐
//! │ address │ control │ protocol (BE u16)│ payload ...          │
//! │  0xff   │  0x03   │                  │                      │
//! └─────────┴─────────┴──────────────────┴──────────────────────┘
//! ```
//!
//! Control packets (link control, network control) share a second 4-byte
//! header of code, identifier, and length. [`ControlPacket`] handles that
//! layer, including the Protocol-Reject message the orchestrator emits for
//! protocols nobody claims.
//!
//! # Security
//!
//! All header parsing goes through `zerocopy` layouts. Frames shorter than the
//! header are rejected with [`ProtocolError::ShortFrame`] before any field is
//! read.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod control;
pub mod errors;
pub mod frame;
pub mod header;
pub mod protocols;

pub use control::{ControlCode, ControlPacket};
pub use errors::{ProtocolError, Result};
pub use frame::Frame;
pub use header::FrameHeader;
pub use protocols::protocol_name;
