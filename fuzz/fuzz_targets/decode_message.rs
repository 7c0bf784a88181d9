//! Fuzz target for message decoding
//!
//! The decoder must reject malformed input with an error, never a panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use tether_core::codec;

fuzz_target!(|data: &[u8]| {
    if let Ok(message) = codec::decode_message(data) {
        // Anything accepted must re-encode to the same bytes
        assert_eq!(message.encode(), data);
    }

    if let Some(&tag) = data.first() {
        let _ = codec::size_for_type(tag);
    }
});
