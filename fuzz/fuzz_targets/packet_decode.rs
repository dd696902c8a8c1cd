//! Decoding arbitrary bytes never panics, and whatever decodes survives an
//! encode/decode round trip unchanged. The bytes themselves may differ: the
//! decoder accepts wider integer and bin encodings than `encode` emits.

#![no_main]

use libfuzzer_sys::fuzz_target;
use upp_proto::Packet;

fuzz_target!(|data: &[u8]| {
    let Ok(packet) = Packet::decode(data) else {
        return;
    };

    let encoded = packet.encode();
    let again = Packet::decode(&encoded).expect("re-encoded packet must decode");
    assert_eq!(packet, again);
});
