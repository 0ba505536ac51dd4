//! Control packet decoding must never panic, and a Protocol-Reject built
//! from any frame must respect the length limit.

#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use linkd_proto::{ControlPacket, Frame};

fuzz_target!(|data: &[u8]| {
    let _ = ControlPacket::decode(data);

    if data.len() >= 3 {
        let max_len = usize::from(data[0]) * 4;
        let protocol = u16::from_be_bytes([data[1], data[2]]);
        let frame = Frame::new(protocol, Bytes::copy_from_slice(&data[3..]));
        let reject = ControlPacket::protocol_reject(1, &frame, max_len);
        assert!(reject.len() <= max_len.max(ControlPacket::HEADER_SIZE));
    }
});
