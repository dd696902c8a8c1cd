//! Signed and chained packets.

use bytes::BufMut;
use uuid::Uuid;

use crate::{
    errors::{ProtocolError, Result},
    msgpack::{self, Reader},
    version::{Hint, ProtocolVersion},
};

/// Length of an identity (UUID bytes).
pub const IDENTITY_LEN: usize = 16;

/// Length of a raw P-256 signature (`r ‖ s`).
pub const SIGNATURE_LEN: usize = 64;

/// Length of the trailing signature element: `0xC4`, length byte, signature.
pub const SIGNATURE_FRAME_LEN: usize = 2 + SIGNATURE_LEN;

/// Byte offset of the version tag in every encoded packet.
pub const VERSION_OFFSET: usize = 1;

/// Raw `r ‖ s` signature.
pub type Signature = [u8; SIGNATURE_LEN];

/// Packet signed by its identity's key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedPacket {
    /// Identity that signed the packet
    pub uuid: Uuid,
    /// Payload semantics
    pub hint: Hint,
    /// Payload, usually a SHA-256 hash
    pub payload: Vec<u8>,
    /// `None` only while the packet is being built
    pub signature: Option<Signature>,
}

/// Packet that also links to the previous packet of the same identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainedPacket {
    /// Identity that signed the packet
    pub uuid: Uuid,
    /// Signature of the identity's previous chained packet (zeros for the
    /// first packet of a chain)
    pub prev_signature: Signature,
    /// Payload semantics
    pub hint: Hint,
    /// Payload, usually a SHA-256 hash
    pub payload: Vec<u8>,
    /// `None` only while the packet is being built
    pub signature: Option<Signature>,
}

/// A decoded packet of either variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// Version 0x22
    Signed(SignedPacket),
    /// Version 0x23
    Chained(ChainedPacket),
}

impl From<SignedPacket> for Packet {
    fn from(packet: SignedPacket) -> Self {
        Self::Signed(packet)
    }
}

impl From<ChainedPacket> for Packet {
    fn from(packet: ChainedPacket) -> Self {
        Self::Chained(packet)
    }
}

impl Packet {
    /// Version tag of this packet.
    pub fn version(&self) -> ProtocolVersion {
        match self {
            Self::Signed(_) => ProtocolVersion::Signed,
            Self::Chained(_) => ProtocolVersion::Chained,
        }
    }

    /// Identity of the signer.
    pub fn uuid(&self) -> Uuid {
        match self {
            Self::Signed(p) => p.uuid,
            Self::Chained(p) => p.uuid,
        }
    }

    /// Previous signature; signed packets have none.
    pub fn prev_signature(&self) -> Option<&Signature> {
        match self {
            Self::Signed(_) => None,
            Self::Chained(p) => Some(&p.prev_signature),
        }
    }

    /// Payload semantics.
    pub fn hint(&self) -> Hint {
        match self {
            Self::Signed(p) => p.hint,
            Self::Chained(p) => p.hint,
        }
    }

    /// Payload bytes.
    pub fn payload(&self) -> &[u8] {
        match self {
            Self::Signed(p) => &p.payload,
            Self::Chained(p) => &p.payload,
        }
    }

    /// Trailing signature, if the packet has been signed.
    pub fn signature(&self) -> Option<&Signature> {
        match self {
            Self::Signed(p) => p.signature.as_ref(),
            Self::Chained(p) => p.signature.as_ref(),
        }
    }

    /// Replace the trailing signature.
    pub fn set_signature(&mut self, signature: Signature) {
        match self {
            Self::Signed(p) => p.signature = Some(signature),
            Self::Chained(p) => p.signature = Some(signature),
        }
    }

    /// Encode the packet, including the signature if present.
    pub fn encode(&self) -> Vec<u8> {
        self.encode_with(self.signature())
    }

    /// Encode the packet with an absent signature.
    ///
    /// The result always ends in a single `nil` byte standing in for the
    /// signature element.
    pub fn encode_unsigned(&self) -> Vec<u8> {
        self.encode_with(None)
    }

    /// Bytes covered by the signature: the unsigned encoding without its
    /// trailing `nil`. [`append_signature`] turns them into the signed
    /// packet.
    pub fn signable_bytes(&self) -> Vec<u8> {
        let mut body = self.encode_unsigned();
        body.pop();
        body
    }

    fn encode_with(&self, signature: Option<&Signature>) -> Vec<u8> {
        let version = self.version();
        let payload = self.payload();
        let mut buf = Vec::with_capacity(
            2 + 2 + IDENTITY_LEN + 2 * SIGNATURE_FRAME_LEN + 2 + 5 + payload.len(),
        );

        msgpack::put_fixarray(&mut buf, version.element_count());
        msgpack::put_u8(&mut buf, version.to_u8());
        msgpack::put_bin(&mut buf, self.uuid().as_bytes());
        if let Some(prev) = self.prev_signature() {
            msgpack::put_bin(&mut buf, prev);
        }
        msgpack::put_u8(&mut buf, self.hint().0);
        msgpack::put_bin(&mut buf, payload);
        match signature {
            Some(signature) => msgpack::put_bin(&mut buf, signature),
            None => msgpack::put_nil(&mut buf),
        }

        buf
    }

    /// Decode a packet, dispatching on the version tag at
    /// [`VERSION_OFFSET`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() <= VERSION_OFFSET {
            return Err(ProtocolError::TooShort { len: bytes.len() });
        }
        let version = ProtocolVersion::try_from(bytes[VERSION_OFFSET])?;

        let mut reader = Reader::new(bytes);
        let elements = reader.fixarray()?;
        if elements != version.element_count() {
            return Err(ProtocolError::ElementCount {
                expected: version.element_count(),
                actual: elements,
            });
        }
        // Already validated through the offset check above
        reader.fixint("version")?;

        let uuid = Uuid::from_bytes(reader.bin_exact::<IDENTITY_LEN>("identity")?);
        let packet = match version {
            ProtocolVersion::Signed => {
                let hint = Hint(reader.uint8("hint")?);
                let payload = reader.bin("payload")?.to_vec();
                let signature = reader.nil_or_bin_exact::<SIGNATURE_LEN>("signature")?;
                Self::Signed(SignedPacket { uuid, hint, payload, signature })
            },
            ProtocolVersion::Chained => {
                let prev_signature = reader.bin_exact::<SIGNATURE_LEN>("previous signature")?;
                let hint = Hint(reader.uint8("hint")?);
                let payload = reader.bin("payload")?.to_vec();
                let signature = reader.nil_or_bin_exact::<SIGNATURE_LEN>("signature")?;
                Self::Chained(ChainedPacket { uuid, prev_signature, hint, payload, signature })
            },
        };
        reader.finish()?;

        Ok(packet)
    }
}

/// Decode a packet that must be [`ProtocolVersion::Signed`].
pub fn decode_signed(bytes: &[u8]) -> Result<SignedPacket> {
    match Packet::decode(bytes)? {
        Packet::Signed(packet) => Ok(packet),
        other => Err(ProtocolError::WrongVariant {
            expected: ProtocolVersion::Signed,
            actual: other.version(),
        }),
    }
}

/// Decode a packet that must be [`ProtocolVersion::Chained`].
pub fn decode_chained(bytes: &[u8]) -> Result<ChainedPacket> {
    match Packet::decode(bytes)? {
        Packet::Chained(packet) => Ok(packet),
        other => Err(ProtocolError::WrongVariant {
            expected: ProtocolVersion::Chained,
            actual: other.version(),
        }),
    }
}

/// Append `signature` as the final `bin8` element of a signable body.
pub fn append_signature(body: &mut Vec<u8>, signature: &Signature) {
    body.reserve(SIGNATURE_FRAME_LEN);
    body.put_u8(msgpack::BIN8);
    body.put_u8(SIGNATURE_LEN as u8);
    body.put_slice(signature);
}
