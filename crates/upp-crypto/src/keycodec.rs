//! Raw byte layouts for P-256 keys and signatures.
//!
//! Three layouts cross the crate boundary:
//!
//! - raw public keys: `X ‖ Y`, 32 big-endian bytes each (64 bytes)
//! - device public keys: the `CKA_EC_POINT` attribute, a DER octet string
//!   wrapping an uncompressed SEC1 point (`04 41 04 ‖ X ‖ Y`, 67 bytes)
//! - signatures: `r ‖ s`, 32 big-endian bytes each (64 bytes)
//!
//! Everything here is pure. Malformed input fails instead of producing a
//! zero-valued key or signature.

use p256::{
    FieldBytes, PublicKey, SecretKey,
    ecdsa::{
        Signature, SigningKey, VerifyingKey,
        signature::hazmat::{PrehashSigner, PrehashVerifier},
    },
    elliptic_curve::sec1::ToEncodedPoint,
};
use thiserror::Error;

/// Length of a private scalar `d`.
pub const PRIVATE_KEY_LEN: usize = 32;

/// Length of one affine coordinate.
pub const COORDINATE_LEN: usize = 32;

/// Length of a raw `X ‖ Y` public key.
pub const PUBLIC_KEY_LEN: usize = 2 * COORDINATE_LEN;

/// Length of a raw `r ‖ s` signature.
pub const SIGNATURE_LEN: usize = 64;

/// Length of a SHA-256 digest.
pub const HASH_LEN: usize = 32;

/// DER octet string tag, content length, SEC1 "uncompressed" tag.
pub const DEVICE_PUBLIC_KEY_HEADER: [u8; 3] = [0x04, (PUBLIC_KEY_LEN + 1) as u8, 0x04];

/// Length of a device-encoded public key.
pub const DEVICE_PUBLIC_KEY_LEN: usize = DEVICE_PUBLIC_KEY_HEADER.len() + PUBLIC_KEY_LEN;

/// Malformed key or signature bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyCodecError {
    /// Device public key is not 67 bytes.
    #[error("unexpected length of public key data returned from device: expected 67, got {0}")]
    DevicePublicKeyLength(usize),

    /// Device public key does not start with `04 41 04`.
    #[error("unexpected public key data header: expected 044104, got {}", hex_header(.0))]
    DevicePublicKeyHeader([u8; 3]),

    /// Raw public key is not 64 bytes.
    #[error("invalid public key length: expected 64, got {0}")]
    PublicKeyLength(usize),

    /// Coordinates do not describe a point on P-256.
    #[error("invalid public key value: point not on curve")]
    NotOnCurve,

    /// Private scalar is not 32 bytes.
    #[error("invalid private key length: expected 32, got {0}")]
    PrivateKeyLength(usize),

    /// Private scalar is zero or not below the curve order.
    #[error("invalid private key value: zero or greater or equal curve order")]
    PrivateKeyRange,

    /// Signature is not 64 bytes.
    #[error("invalid signature length: expected 64, got {0}")]
    InvalidSignatureLength(usize),
}

fn hex_header(header: &[u8; 3]) -> String {
    header.iter().map(|b| format!("{b:02x}")).collect()
}

/// Encode coordinates the way a token stores `CKA_EC_POINT`.
pub fn encode_device_public_key(
    x: &[u8; COORDINATE_LEN],
    y: &[u8; COORDINATE_LEN],
) -> [u8; DEVICE_PUBLIC_KEY_LEN] {
    let mut out = [0u8; DEVICE_PUBLIC_KEY_LEN];
    let (header, point) = out.split_at_mut(DEVICE_PUBLIC_KEY_HEADER.len());
    header.copy_from_slice(&DEVICE_PUBLIC_KEY_HEADER);
    point[..COORDINATE_LEN].copy_from_slice(x);
    point[COORDINATE_LEN..].copy_from_slice(y);
    out
}

/// Device encoding of an already validated public key.
pub fn device_public_key(key: &PublicKey) -> [u8; DEVICE_PUBLIC_KEY_LEN] {
    let raw = public_key_to_raw(key);
    let (x, y) = raw.split_at(COORDINATE_LEN);
    let mut xs = [0u8; COORDINATE_LEN];
    let mut ys = [0u8; COORDINATE_LEN];
    xs.copy_from_slice(x);
    ys.copy_from_slice(y);
    encode_device_public_key(&xs, &ys)
}

/// Parse and validate a device-encoded public key.
pub fn decode_device_public_key(bytes: &[u8]) -> Result<PublicKey, KeyCodecError> {
    if bytes.len() != DEVICE_PUBLIC_KEY_LEN {
        return Err(KeyCodecError::DevicePublicKeyLength(bytes.len()));
    }
    let (header, point) = bytes.split_at(DEVICE_PUBLIC_KEY_HEADER.len());
    if header != DEVICE_PUBLIC_KEY_HEADER {
        let mut found = [0u8; 3];
        found.copy_from_slice(header);
        return Err(KeyCodecError::DevicePublicKeyHeader(found));
    }
    public_key_from_raw(point)
}

/// Build a public key from raw `X ‖ Y`, rejecting points off the curve.
pub fn public_key_from_raw(raw: &[u8]) -> Result<PublicKey, KeyCodecError> {
    if raw.len() != PUBLIC_KEY_LEN {
        return Err(KeyCodecError::PublicKeyLength(raw.len()));
    }
    let mut sec1 = [0u8; PUBLIC_KEY_LEN + 1];
    sec1[0] = 0x04;
    sec1[1..].copy_from_slice(raw);
    PublicKey::from_sec1_bytes(&sec1).map_err(|_| KeyCodecError::NotOnCurve)
}

/// Raw `X ‖ Y` of a public key.
pub fn public_key_to_raw(key: &PublicKey) -> [u8; PUBLIC_KEY_LEN] {
    let point = key.to_encoded_point(false);
    let mut raw = [0u8; PUBLIC_KEY_LEN];
    // Uncompressed SEC1: one tag byte, then X and Y
    raw.copy_from_slice(&point.as_bytes()[1..]);
    raw
}

/// Parse a 32-byte private scalar, rejecting zero and values `>= n`.
pub fn secret_key_from_bytes(bytes: &[u8]) -> Result<SecretKey, KeyCodecError> {
    if bytes.len() != PRIVATE_KEY_LEN {
        return Err(KeyCodecError::PrivateKeyLength(bytes.len()));
    }
    SecretKey::from_slice(bytes).map_err(|_| KeyCodecError::PrivateKeyRange)
}

/// Split a raw signature into big-endian `r` and `s`.
pub fn decode_signature(
    signature: &[u8],
) -> Result<([u8; COORDINATE_LEN], [u8; COORDINATE_LEN]), KeyCodecError> {
    if signature.len() != SIGNATURE_LEN {
        return Err(KeyCodecError::InvalidSignatureLength(signature.len()));
    }
    let mut r = [0u8; COORDINATE_LEN];
    let mut s = [0u8; COORDINATE_LEN];
    r.copy_from_slice(&signature[..COORDINATE_LEN]);
    s.copy_from_slice(&signature[COORDINATE_LEN..]);
    Ok((r, s))
}

/// Sign a SHA-256 digest with a software key (RFC 6979 nonces).
pub fn sign_prehash(
    key: &SecretKey,
    hash: &[u8],
) -> Result<[u8; SIGNATURE_LEN], p256::ecdsa::Error> {
    let signature: Signature = SigningKey::from(key).sign_prehash(hash)?;
    let mut raw = [0u8; SIGNATURE_LEN];
    raw.copy_from_slice(&signature.to_bytes());
    Ok(raw)
}

/// Verify a raw signature over a SHA-256 digest.
///
/// A signature with the right length that does not verify, including one
/// whose `r` or `s` is out of range, is `Ok(false)`.
pub fn verify_prehash(
    key: &PublicKey,
    hash: &[u8],
    signature: &[u8],
) -> Result<bool, KeyCodecError> {
    let (r, s) = decode_signature(signature)?;
    let Ok(signature) = Signature::from_scalars(FieldBytes::from(r), FieldBytes::from(s)) else {
        return Ok(false);
    };
    Ok(VerifyingKey::from(key).verify_prehash(hash, &signature).is_ok())
}
