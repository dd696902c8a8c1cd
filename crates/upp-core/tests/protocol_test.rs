//! End-to-end signing, chaining and verification with the software backend.

use std::{collections::HashSet, sync::Arc};

use proptest::prelude::*;
use sha2::{Digest, Sha256};
use upp_core::{EngineError, GENESIS_PREV_SIGNATURE, Protocol, check_chain_link};
use upp_crypto::{Crypto, CryptoError, MemoryKeystore, SoftwareBackend};
use upp_proto::{
    ChainedPacket, Hint, Packet, ProtocolVersion, SIGNATURE_FRAME_LEN, Signature, decode_chained,
    decode_signed,
};
use uuid::Uuid;

const NAME: &str = "sensor";

fn engine() -> (Protocol, Uuid) {
    let backend = SoftwareBackend::new(MemoryKeystore::default());
    let id = Uuid::new_v4();
    backend.generate_key(id).unwrap();
    let protocol = Protocol::new(Arc::new(backend));
    protocol.register_identity(NAME, id);
    (protocol, id)
}

fn hash(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

#[test]
fn signed_packet_round_trip() {
    let (protocol, id) = engine();
    let digest = hash(b"reading 1");

    let bytes = protocol.sign_hash(NAME, &digest, ProtocolVersion::Signed).unwrap();
    assert_eq!(bytes[1], 0x22);

    let packet = decode_signed(&bytes).unwrap();
    assert_eq!(packet.uuid, id);
    assert_eq!(packet.hint, Hint::BINARY);
    assert_eq!(packet.payload, digest);
    assert!(packet.signature.is_some());

    assert!(protocol.verify(NAME, &bytes).unwrap());
    // Signed packets leave the chain alone
    assert_eq!(protocol.last_signature(id), None);
}

#[test]
fn chained_packets_link() {
    let (protocol, id) = engine();

    let first = protocol.sign_hash(NAME, &hash(b"a"), ProtocolVersion::Chained).unwrap();
    let second = protocol.sign_hash(NAME, &hash(b"b"), ProtocolVersion::Chained).unwrap();
    let third = protocol.sign_hash(NAME, &hash(b"c"), ProtocolVersion::Chained).unwrap();

    let first = decode_chained(&first).unwrap();
    let second_packet = decode_chained(&second).unwrap();
    let third = decode_chained(&third).unwrap();

    assert_eq!(first.prev_signature, GENESIS_PREV_SIGNATURE);
    assert_eq!(Some(second_packet.prev_signature), first.signature);
    assert_eq!(Some(third.prev_signature), second_packet.signature);
    assert_eq!(protocol.last_signature(id), third.signature);

    let first = Packet::from(first);
    let second_packet = Packet::from(second_packet);
    assert_eq!(check_chain_link(&first, &second_packet), Ok(true));
    assert_eq!(check_chain_link(&second_packet, &first), Ok(false));

    assert!(protocol.verify(NAME, &second).unwrap());
}

#[test]
fn extended_hint_is_encoded() {
    let (protocol, _) = engine();
    let bytes = protocol
        .sign_hash_extended(NAME, &hash(b"x"), ProtocolVersion::Signed, Hint::DISABLE)
        .unwrap();

    assert_eq!(decode_signed(&bytes).unwrap().hint, Hint::DISABLE);
    assert!(protocol.verify(NAME, &bytes).unwrap());
}

#[test]
fn sign_data_hashes_first() {
    let (protocol, _) = engine();
    let bytes = protocol.sign_data(NAME, b"raw measurement", ProtocolVersion::Signed).unwrap();
    assert_eq!(decode_signed(&bytes).unwrap().payload, hash(b"raw measurement"));

    assert!(matches!(
        protocol.sign_data(NAME, b"", ProtocolVersion::Signed),
        Err(EngineError::EmptyInput)
    ));
}

#[test]
fn identities_resolve_by_uuid_string() {
    let (protocol, id) = engine();
    let bytes = protocol.sign_hash(&id.to_string(), &hash(b"x"), ProtocolVersion::Signed).unwrap();
    assert!(protocol.verify(NAME, &bytes).unwrap());
}

#[test]
fn input_validation() {
    let (protocol, _) = engine();

    assert!(matches!(
        protocol.sign_hash(NAME, &[0u8; 31], ProtocolVersion::Signed),
        Err(EngineError::InvalidHashLength(31))
    ));
    assert!(matches!(
        protocol.sign_hash("nobody", &hash(b"x"), ProtocolVersion::Signed),
        Err(EngineError::UnknownIdentity(_))
    ));
    assert!(matches!(
        protocol.verify(NAME, &[0u8; SIGNATURE_FRAME_LEN]),
        Err(EngineError::TooShort { len: 66 })
    ));
    assert!(matches!(
        protocol.verify("nobody", &[0u8; 100]),
        Err(EngineError::UnknownIdentity(_))
    ));
}

#[test]
fn identity_without_key_fails_to_sign() {
    let (protocol, _) = engine();
    let stranger = Uuid::new_v4();
    protocol.register_identity("stranger", stranger);

    let result = protocol.sign_hash("stranger", &hash(b"x"), ProtocolVersion::Chained);
    assert!(matches!(result, Err(EngineError::Crypto(CryptoError::KeyNotFound { .. }))));
    // The failed attempt did not advance the chain
    assert_eq!(protocol.last_signature(stranger), None);
}

#[test]
fn verify_and_decode() {
    let (protocol, id) = engine();
    let bytes = protocol.sign_hash(NAME, &hash(b"x"), ProtocolVersion::Chained).unwrap();

    let packet = protocol.verify_and_decode(NAME, &bytes).unwrap();
    assert_eq!(packet.uuid(), id);
    assert_eq!(packet.version(), ProtocolVersion::Chained);

    let mut tampered = bytes.clone();
    tampered[25] ^= 0x01;
    assert!(matches!(
        protocol.verify_and_decode(NAME, &tampered),
        Err(EngineError::InvalidSignature)
    ));
}

#[test]
fn caller_built_chained_packet_updates_chain() {
    let (protocol, id) = engine();
    let packet: Packet = ChainedPacket {
        uuid: id,
        prev_signature: [9; 64],
        hint: Hint::ENABLE,
        payload: b"custom".to_vec(),
        signature: None,
    }
    .into();

    let bytes = protocol.sign(&packet).unwrap();
    let decoded = decode_chained(&bytes).unwrap();
    assert_eq!(decoded.prev_signature, [9; 64]);
    assert_eq!(protocol.last_signature(id), decoded.signature);
    assert!(protocol.verify(NAME, &bytes).unwrap());
}

#[test]
fn restored_chain_continues() {
    let (protocol, id) = engine();
    let persisted: Signature = [0x5a; 64];

    assert!(matches!(
        protocol.restore_last_signature(id, &persisted[..10]),
        Err(EngineError::Chain(_))
    ));
    protocol.restore_last_signature(id, &persisted).unwrap();
    assert_eq!(protocol.chain_snapshot().get(&id), Some(&persisted));

    let bytes = protocol.sign_hash(NAME, &hash(b"next"), ProtocolVersion::Chained).unwrap();
    assert_eq!(decode_chained(&bytes).unwrap().prev_signature, persisted);
}

#[test]
fn concurrent_chained_signing_forms_one_chain() {
    let (protocol, _) = engine();
    let threads = 8;
    let per_thread = 10;

    let packets: Vec<Vec<u8>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let protocol = &protocol;
                scope.spawn(move || {
                    (0..per_thread)
                        .map(|i| {
                            let digest = hash(format!("{t}-{i}").as_bytes());
                            protocol.sign_hash(NAME, &digest, ProtocolVersion::Chained).unwrap()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles.into_iter().flat_map(|handle| handle.join().unwrap()).collect()
    });

    let decoded: Vec<_> = packets.iter().map(|bytes| decode_chained(bytes).unwrap()).collect();
    let prevs: HashSet<Signature> = decoded.iter().map(|p| p.prev_signature).collect();
    let signatures: HashSet<Signature> = decoded.iter().filter_map(|p| p.signature).collect();

    // Every packet has a distinct predecessor
    assert_eq!(prevs.len(), threads * per_thread);
    // Exactly one starts the chain, and every other predecessor is a signed packet
    assert!(prevs.contains(&GENESIS_PREV_SIGNATURE));
    assert_eq!(prevs.difference(&signatures).count(), 1);
    // Exactly one signature (the newest) has no successor
    assert_eq!(signatures.difference(&prevs).count(), 1);
}

#[test]
fn independent_engines_over_one_key_verify_each_other() {
    let backend = Arc::new(SoftwareBackend::new(MemoryKeystore::default()));
    let id = Uuid::new_v4();
    backend.generate_key(id).unwrap();

    let signer = Protocol::new(backend.clone());
    let verifier_backend = SoftwareBackend::new(MemoryKeystore::default());
    verifier_backend.set_public_key(id, &backend.get_public_key(id).unwrap()).unwrap();
    let verifier = Protocol::new(Arc::new(verifier_backend));

    let bytes = signer.sign_hash(&id.to_string(), &hash(b"x"), ProtocolVersion::Signed).unwrap();
    assert!(verifier.verify(&id.to_string(), &bytes).unwrap());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn any_flipped_byte_fails_verification(
        payload in any::<[u8; 32]>(),
        chained in any::<bool>(),
        index in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let (protocol, _) = engine();
        let version = if chained { ProtocolVersion::Chained } else { ProtocolVersion::Signed };
        let bytes = protocol.sign_hash(NAME, &payload, version).unwrap();
        prop_assert!(protocol.verify(NAME, &bytes).unwrap());

        // Skip the two framing bytes in front of the signature; they are not
        // covered by it.
        let frame = bytes.len() - SIGNATURE_FRAME_LEN;
        let covered: Vec<usize> = (0..bytes.len()).filter(|i| *i != frame && *i != frame + 1).collect();
        let target = covered[index.index(covered.len())];

        let mut tampered = bytes.clone();
        tampered[target] ^= 1 << bit;
        prop_assert!(!protocol.verify(NAME, &tampered).unwrap());
    }
}
