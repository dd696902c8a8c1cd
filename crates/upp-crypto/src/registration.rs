//! Self-signed key registration documents.
//!
//! A registration announces an identity's public key to a backend service.
//! The `pubKeyInfo` object is serialized to JSON and signed with the
//! identity's own key; the signature travels base64-encoded next to it.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{backend::Crypto, error::CryptoError, keycodec};

/// Algorithm name announced for P-256 keys.
pub const ALGORITHM: &str = "ecdsa-p256v1";

/// How long a registered key stays valid.
pub const VALIDITY_DAYS: i64 = 10 * 365;

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Public key announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRegistration {
    /// Always [`ALGORITHM`]
    pub algorithm: String,
    /// Creation time
    pub created: String,
    /// Identity the key belongs to
    pub hw_device_id: String,
    /// Base64 raw public key
    pub pub_key: String,
    /// Base64 raw public key, doubling as the key's id
    pub pub_key_id: String,
    /// End of validity
    pub valid_not_after: String,
    /// Start of validity
    pub valid_not_before: String,
}

/// A [`KeyRegistration`] with the identity's signature over its JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedKeyRegistration {
    /// The signed document
    pub pub_key_info: KeyRegistration,
    /// Base64 raw signature over the JSON of `pub_key_info`
    pub signature: String,
}

/// Describe `public_key` (raw `X ‖ Y`) for identity `id` as of `now`.
pub fn key_registration(
    id: Uuid,
    public_key: &[u8],
    now: DateTime<Utc>,
) -> Result<KeyRegistration, CryptoError> {
    keycodec::public_key_from_raw(public_key)?;
    let encoded = STANDARD.encode(public_key);
    let not_after = now + TimeDelta::days(VALIDITY_DAYS);

    Ok(KeyRegistration {
        algorithm: ALGORITHM.to_owned(),
        created: now.format(TIME_FORMAT).to_string(),
        hw_device_id: id.to_string(),
        pub_key: encoded.clone(),
        pub_key_id: encoded,
        valid_not_after: not_after.format(TIME_FORMAT).to_string(),
        valid_not_before: now.format(TIME_FORMAT).to_string(),
    })
}

/// Build and sign the registration for `id`, returning its JSON.
pub fn signed_key_registration(
    crypto: &dyn Crypto,
    id: Uuid,
    now: DateTime<Utc>,
) -> Result<Vec<u8>, CryptoError> {
    let public_key = crypto.get_public_key(id)?;
    let info = key_registration(id, &public_key, now)?;
    let signature = crypto.sign(id, &serde_json::to_vec(&info)?)?;

    let signed = SignedKeyRegistration { pub_key_info: info, signature: STANDARD.encode(signature) };
    Ok(serde_json::to_vec(&signed)?)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::software::{MemoryKeystore, SoftwareBackend};

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 45).unwrap() + TimeDelta::milliseconds(7)
    }

    #[test]
    fn registration_fields() {
        let id = Uuid::from_u128(0x1234);
        let public_key = [0u8; 64];
        // All-zero is not a point
        assert!(key_registration(id, &public_key, fixed_now()).is_err());

        let backend = SoftwareBackend::new(MemoryKeystore::default());
        backend.generate_key(id).unwrap();
        let public_key = backend.get_public_key(id).unwrap();

        let info = key_registration(id, &public_key, fixed_now()).unwrap();
        assert_eq!(info.algorithm, "ecdsa-p256v1");
        assert_eq!(info.created, "2024-03-01T12:30:45.007Z");
        assert_eq!(info.valid_not_before, info.created);
        assert_eq!(info.valid_not_after, "2034-02-27T12:30:45.007Z");
        assert_eq!(info.hw_device_id, id.to_string());
        assert_eq!(info.pub_key, info.pub_key_id);
        assert_eq!(STANDARD.decode(&info.pub_key).unwrap(), public_key);
    }

    #[test]
    fn json_uses_camel_case() {
        let id = Uuid::from_u128(7);
        let backend = SoftwareBackend::new(MemoryKeystore::default());
        backend.generate_key(id).unwrap();

        let json = signed_key_registration(&backend, id, fixed_now()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&json).unwrap();

        let info = &value["pubKeyInfo"];
        for field in
            ["algorithm", "created", "hwDeviceId", "pubKey", "pubKeyId", "validNotAfter", "validNotBefore"]
        {
            assert!(info.get(field).is_some(), "missing {field}");
        }
        assert!(value["signature"].is_string());
    }

    #[test]
    fn signature_covers_info_json() {
        let id = Uuid::from_u128(99);
        let backend = SoftwareBackend::new(MemoryKeystore::default());
        backend.generate_key(id).unwrap();

        let json = signed_key_registration(&backend, id, fixed_now()).unwrap();
        let signed: SignedKeyRegistration = serde_json::from_slice(&json).unwrap();

        let info_json = serde_json::to_vec(&signed.pub_key_info).unwrap();
        let signature = STANDARD.decode(&signed.signature).unwrap();
        assert!(backend.verify(id, &info_json, &signature).unwrap());
    }

    #[test]
    fn unknown_identity_fails() {
        let backend = SoftwareBackend::new(MemoryKeystore::default());
        assert!(matches!(
            signed_key_registration(&backend, Uuid::from_u128(5), fixed_now()),
            Err(CryptoError::KeyNotFound { .. })
        ));
    }
}
