//! Verification of arbitrary bytes returns a result instead of panicking.

#![no_main]

use std::sync::{Arc, LazyLock};

use libfuzzer_sys::fuzz_target;
use upp_core::Protocol;
use upp_crypto::{Crypto, MemoryKeystore, SoftwareBackend};
use uuid::Uuid;

const NAME: &str = "fuzz";

static PROTOCOL: LazyLock<Protocol> = LazyLock::new(|| {
    let backend = SoftwareBackend::new(MemoryKeystore::default());
    let id = Uuid::from_u128(0x5eed);
    backend.set_key(id, &[0x11; 32]).expect("fixed scalar is valid");
    let protocol = Protocol::new(Arc::new(backend));
    protocol.register_identity(NAME, id);
    protocol
});

fuzz_target!(|data: &[u8]| {
    let _ = PROTOCOL.verify(NAME, data);
    let _ = PROTOCOL.verify_and_decode(NAME, data);
});
