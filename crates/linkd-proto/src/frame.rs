//! Link frames: header plus opaque payload.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    errors::{ProtocolError, Result},
    header::FrameHeader,
};

/// A complete link frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Link header
    pub header: FrameHeader,
    /// Everything after the header
    pub payload: Bytes,
}

impl Frame {
    /// Largest frame we will decode (header included).
    pub const MAX_SIZE: usize = 65_535;

    /// Create a frame for `protocol` carrying `payload`.
    pub fn new(protocol: u16, payload: impl Into<Bytes>) -> Self {
        Self { header: FrameHeader::new(protocol), payload: payload.into() }
    }

    /// Decode a frame from a received buffer.
    ///
    /// # Errors
    /// - `ShortFrame` if the buffer cannot hold a header
    /// - `FrameTooLarge` if the buffer exceeds [`Self::MAX_SIZE`]
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > Self::MAX_SIZE {
            return Err(ProtocolError::FrameTooLarge { len: bytes.len(), max: Self::MAX_SIZE });
        }

        let header = *FrameHeader::from_bytes(bytes)?;
        let payload = Bytes::copy_from_slice(&bytes[FrameHeader::SIZE..]);
        Ok(Self { header, payload })
    }

    /// Protocol number from the header.
    pub fn protocol(&self) -> u16 {
        self.header.protocol()
    }

    /// Total encoded length.
    pub fn len(&self) -> usize {
        FrameHeader::SIZE + self.payload.len()
    }

    /// A frame always carries a header, so it is never empty.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Append the wire encoding to `dst`.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_slice(&self.header.to_bytes());
        dst.put_slice(&self.payload);
    }

    /// Encode into a freshly allocated buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.len());
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Bytes from the protocol field onward, as carried in a
    /// Protocol-Reject.
    pub fn protocol_and_payload(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.len() - 2);
        buf.put_u16(self.protocol());
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Short hex preview of the payload for debug logging.
    pub fn payload_preview(&self, max: usize) -> String {
        let end = self.payload.len().min(max);
        hex::encode(&self.payload[..end])
    }
}
