//! Control-packet layer shared by link and network control protocols.
//!
//! ```text
//! ┌──────┬────────────┬───────────────┬────────────┐
//! │ code │ identifier │ length (BE)   │ data ...   │
//! └──────┴────────────┴───────────────┴────────────┘
//! ```
//!
//! `length` covers the 4-byte control header plus data. Bytes past `length`
//! are padding and are ignored on decode.

use bytes::{BufMut, Bytes, BytesMut};
use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
    byteorder::{BigEndian, U16},
};

use crate::{
    errors::{ProtocolError, Result},
    frame::Frame,
};

#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct ControlHeader {
    code: u8,
    identifier: u8,
    length: U16<BigEndian>,
}

/// Control packet codes understood by every control protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ControlCode {
    /// Configure-Request
    ConfigureRequest = 1,
    /// Configure-Ack
    ConfigureAck = 2,
    /// Configure-Nak
    ConfigureNak = 3,
    /// Configure-Reject
    ConfigureReject = 4,
    /// Terminate-Request
    TerminateRequest = 5,
    /// Terminate-Ack
    TerminateAck = 6,
    /// Code-Reject
    CodeReject = 7,
    /// Protocol-Reject (link control only)
    ProtocolReject = 8,
    /// Echo-Request (link control only)
    EchoRequest = 9,
    /// Echo-Reply (link control only)
    EchoReply = 10,
    /// Discard-Request (link control only)
    DiscardRequest = 11,
}

impl ControlCode {
    /// Map a raw code byte to a known code.
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            1 => Self::ConfigureRequest,
            2 => Self::ConfigureAck,
            3 => Self::ConfigureNak,
            4 => Self::ConfigureReject,
            5 => Self::TerminateRequest,
            6 => Self::TerminateAck,
            7 => Self::CodeReject,
            8 => Self::ProtocolReject,
            9 => Self::EchoRequest,
            10 => Self::EchoReply,
            11 => Self::DiscardRequest,
            _ => return None,
        })
    }

    /// Raw code byte.
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// A decoded control packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPacket {
    /// Raw code byte (see [`ControlCode`])
    pub code: u8,
    /// Identifier used to match requests and replies
    pub identifier: u8,
    /// Packet data after the control header
    pub data: Bytes,
}

impl ControlPacket {
    /// Size of the control header in bytes
    pub const HEADER_SIZE: usize = 4;

    /// Create a packet with a known code.
    pub fn new(code: ControlCode, identifier: u8, data: impl Into<Bytes>) -> Self {
        Self { code: code.to_u8(), identifier, data: data.into() }
    }

    /// Build a Protocol-Reject for `rejected`.
    ///
    /// The rejected packet is carried starting at its protocol field and is
    /// truncated so the whole control packet fits in `max_len` bytes.
    pub fn protocol_reject(identifier: u8, rejected: &Frame, max_len: usize) -> Self {
        let mut data = rejected.protocol_and_payload();
        let room = max_len.saturating_sub(Self::HEADER_SIZE);
        if data.len() > room {
            data.truncate(room);
        }
        Self::new(ControlCode::ProtocolReject, identifier, data)
    }

    /// Known code, if the raw byte maps to one.
    pub fn code(&self) -> Option<ControlCode> {
        ControlCode::from_u8(self.code)
    }

    /// Protocol number named by a Protocol-Reject.
    pub fn rejected_protocol(&self) -> Option<u16> {
        if self.code() != Some(ControlCode::ProtocolReject) || self.data.len() < 2 {
            return None;
        }
        Some(u16::from_be_bytes([self.data[0], self.data[1]]))
    }

    /// Decode a control packet from a frame payload.
    ///
    /// # Errors
    /// - `ShortFrame` if the payload cannot hold a control header
    /// - `BadControlLength` if the length field is smaller than the header or
    ///   larger than the payload
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let (header, _) = ControlHeader::ref_from_prefix(payload)
            .map_err(|_| ProtocolError::ShortFrame { len: payload.len(), min: Self::HEADER_SIZE })?;

        let declared = usize::from(header.length.get());
        if declared < Self::HEADER_SIZE || declared > payload.len() {
            return Err(ProtocolError::BadControlLength { declared, available: payload.len() });
        }

        Ok(Self {
            code: header.code,
            identifier: header.identifier,
            data: Bytes::copy_from_slice(&payload[Self::HEADER_SIZE..declared]),
        })
    }

    /// Encoded length including the control header.
    pub fn len(&self) -> usize {
        Self::HEADER_SIZE + self.data.len()
    }

    /// A control packet always carries its header.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Wrap the packet in a link frame for `protocol`.
    pub fn into_frame(self, protocol: u16) -> Frame {
        let header = ControlHeader {
            code: self.code,
            identifier: self.identifier,
            length: U16::new(self.len() as u16),
        };
        let mut buf = BytesMut::with_capacity(self.len());
        buf.put_slice(header.as_bytes());
        buf.put_slice(&self.data);
        Frame::new(protocol, buf.freeze())
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;
    use crate::protocols::LCP;

    #[test]
    fn protocol_reject_carries_rejected_protocol_and_info() {
        let rejected = Frame::new(0x1234, Bytes::from_static(&hex!("deadbeef")));
        let frame = ControlPacket::protocol_reject(7, &rejected, 1500).into_frame(LCP);

        assert_eq!(frame.protocol(), LCP);
        assert_eq!(frame.payload.as_ref(), &hex!("08070008 1234deadbeef"));
    }

    #[test]
    fn protocol_reject_truncates_to_max_len() {
        let rejected = Frame::new(0x1234, Bytes::from(vec![0xaa; 100]));
        let packet = ControlPacket::protocol_reject(1, &rejected, 10);

        assert_eq!(packet.len(), 10);
        assert_eq!(packet.rejected_protocol(), Some(0x1234));
    }

    #[test]
    fn decode_ignores_padding_after_length() {
        let packet = ControlPacket::decode(&hex!("09010006 abcd 0000")).unwrap();

        assert_eq!(packet.code(), Some(ControlCode::EchoRequest));
        assert_eq!(packet.identifier, 1);
        assert_eq!(packet.data.as_ref(), &hex!("abcd"));
    }

    #[test]
    fn decode_rejects_length_beyond_payload() {
        let err = ControlPacket::decode(&hex!("0901000a abcd")).unwrap_err();
        assert_eq!(err, ProtocolError::BadControlLength { declared: 10, available: 6 });
    }

    #[test]
    fn decode_rejects_length_below_header() {
        assert!(ControlPacket::decode(&hex!("09010002")).is_err());
    }

    #[test]
    fn decoded_reject_round_trips_through_frame() {
        let rejected = Frame::new(0x8057, Bytes::from_static(&hex!("01")));
        let frame = ControlPacket::protocol_reject(3, &rejected, 1500).into_frame(LCP);
        let packet = ControlPacket::decode(&frame.payload).unwrap();

        assert_eq!(packet.rejected_protocol(), Some(0x8057));
        assert_eq!(packet.identifier, 3);
    }
}
