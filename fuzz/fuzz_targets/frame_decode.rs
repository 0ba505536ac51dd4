//! Frame decoding must never panic, and a decoded frame must re-encode to
//! the bytes it came from.

#![no_main]

use libfuzzer_sys::fuzz_target;
use linkd_proto::Frame;

fuzz_target!(|data: &[u8]| {
    if let Ok(frame) = Frame::decode(data) {
        assert_eq!(frame.len(), data.len());
        assert_eq!(frame.to_bytes().as_ref(), data);
    }
});
