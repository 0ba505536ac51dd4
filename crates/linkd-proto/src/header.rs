//! Fixed 4-byte link header.

use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned,
    byteorder::{BigEndian, U16},
};

use crate::errors::{ProtocolError, Result};

/// Link frame header.
///
/// Layout matches the wire exactly, so it can be viewed in place over a
/// received buffer without copying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct FrameHeader {
    address: u8,
    control: u8,
    protocol: U16<BigEndian>,
}

impl FrameHeader {
    /// Size of the header in bytes
    pub const SIZE: usize = 4;

    /// All-stations address
    pub const ALL_STATIONS: u8 = 0xff;

    /// Unnumbered-information control value
    pub const UI: u8 = 0x03;

    /// Create a header for the given protocol with the standard address and
    /// control bytes.
    pub fn new(protocol: u16) -> Self {
        Self { address: Self::ALL_STATIONS, control: Self::UI, protocol: U16::new(protocol) }
    }

    /// View a header over the front of `bytes`.
    ///
    /// # Errors
    /// Returns `ShortFrame` if fewer than [`Self::SIZE`] bytes are present.
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        Self::ref_from_prefix(bytes)
            .map(|(header, _)| header)
            .map_err(|_| ProtocolError::ShortFrame { len: bytes.len(), min: Self::SIZE })
    }

    /// Protocol number carried in bytes 2..4.
    pub fn protocol(&self) -> u16 {
        self.protocol.get()
    }

    /// Address byte.
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Control byte.
    pub fn control(&self) -> u8 {
        self.control
    }

    /// Serialize to wire bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out.copy_from_slice(self.as_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;

    #[test]
    fn header_reads_protocol_big_endian() {
        let bytes = hex!("ff03c021");
        let header = FrameHeader::from_bytes(&bytes).unwrap();

        assert_eq!(header.address(), 0xff);
        assert_eq!(header.control(), 0x03);
        assert_eq!(header.protocol(), 0xc021);
    }

    #[test]
    fn header_rejects_short_input() {
        let err = FrameHeader::from_bytes(&hex!("ff03c0")).unwrap_err();
        assert_eq!(err, ProtocolError::ShortFrame { len: 3, min: 4 });
    }

    #[test]
    fn new_header_uses_standard_address_and_control() {
        let header = FrameHeader::new(0x8021);
        assert_eq!(header.to_bytes(), hex!("ff038021"));
    }
}
