use crate::key::Key;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Multihash code for sha2-256.
pub const SHA2_256: u64 = 0x12;
/// Content codec code for raw bytes.
pub const RAW_CODEC: u64 = 0x55;
/// Content codec code for dag-protobuf.
pub const DAG_PB_CODEC: u64 = 0x70;

const SHA2_256_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("key segment is not a valid encoding: {0}")]
    Segment(String),
    #[error("invalid identifier: {0}")]
    Identifier(String),
    #[error("invalid multihash: {0}")]
    Multihash(String),
}

/// A versioned content identifier wrapping a multihash.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentId {
    version: u64,
    codec: u64,
    hash: Vec<u8>,
}

impl ContentId {
    /// Version 0 identifiers are bare sha2-256 multihashes.
    pub fn v0(hash: Vec<u8>) -> Result<Self, CodecError> {
        if !is_v0_multihash(&hash) {
            return Err(CodecError::Identifier(
                "version 0 requires a sha2-256 multihash".into(),
            ));
        }
        Ok(Self {
            version: 0,
            codec: DAG_PB_CODEC,
            hash,
        })
    }

    pub fn v1(codec: u64, hash: Vec<u8>) -> Result<Self, CodecError> {
        validate_multihash(&hash)?;
        Ok(Self {
            version: 1,
            codec,
            hash,
        })
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn codec(&self) -> u64 {
        self.codec
    }

    /// The raw multihash this identifier wraps.
    pub fn hash(&self) -> &[u8] {
        &self.hash
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        if self.version == 0 {
            return self.hash.clone();
        }
        let mut out = Vec::with_capacity(self.hash.len() + 4);
        write_uvarint(&mut out, self.version);
        write_uvarint(&mut out, self.codec);
        out.extend_from_slice(&self.hash);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        if is_v0_multihash(bytes) {
            return Self::v0(bytes.to_vec());
        }
        let (version, used) = read_uvarint(bytes)
            .ok_or_else(|| CodecError::Identifier("truncated version".into()))?;
        if version != 1 {
            return Err(CodecError::Identifier(format!(
                "unsupported version {version}"
            )));
        }
        let rest = &bytes[used..];
        let (codec, used) = read_uvarint(rest)
            .ok_or_else(|| CodecError::Identifier("truncated codec".into()))?;
        Self::v1(codec, rest[used..].to_vec())
    }
}

/// Converts between datastore key segments and content identifiers.
///
/// The migration engine only ever decodes keys and encodes multihashes; how
/// identifiers are laid out on disk is up to the implementation.
pub trait KeyCodec: Send + Sync {
    /// Decodes a single-segment key (no namespace) into an identifier.
    fn decode_key(&self, key: &Key) -> Result<ContentId, CodecError>;

    /// Encodes a raw multihash as a single-segment key.
    fn hash_to_key(&self, hash: &[u8]) -> Key;
}

/// Reference codec: a key segment is the uppercase hex of the binary
/// identifier (or of the bare multihash).
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryKeyCodec;

impl BinaryKeyCodec {
    pub fn cid_to_key(&self, cid: &ContentId) -> Key {
        Key::new(&hex::encode_upper(cid.to_bytes()))
    }
}

impl KeyCodec for BinaryKeyCodec {
    fn decode_key(&self, key: &Key) -> Result<ContentId, CodecError> {
        let segment = key.base_namespace();
        if segment.is_empty() {
            return Err(CodecError::Segment("empty key".into()));
        }
        let bytes = hex::decode(segment).map_err(|e| CodecError::Segment(e.to_string()))?;
        ContentId::from_bytes(&bytes)
    }

    fn hash_to_key(&self, hash: &[u8]) -> Key {
        Key::new(&hex::encode_upper(hash))
    }
}

pub fn multihash_sha2_256(data: &[u8]) -> Vec<u8> {
    let digest = Sha256::digest(data);
    let mut out = Vec::with_capacity(SHA2_256_LEN + 2);
    write_uvarint(&mut out, SHA2_256);
    write_uvarint(&mut out, SHA2_256_LEN as u64);
    out.extend_from_slice(&digest);
    out
}

fn is_v0_multihash(bytes: &[u8]) -> bool {
    bytes.len() == SHA2_256_LEN + 2 && bytes[0] == SHA2_256 as u8 && bytes[1] == SHA2_256_LEN as u8
}

fn validate_multihash(bytes: &[u8]) -> Result<(), CodecError> {
    let (_code, used) =
        read_uvarint(bytes).ok_or_else(|| CodecError::Multihash("truncated code".into()))?;
    let rest = &bytes[used..];
    let (len, used) =
        read_uvarint(rest).ok_or_else(|| CodecError::Multihash("truncated length".into()))?;
    let digest = &rest[used..];
    if digest.len() as u64 != len {
        return Err(CodecError::Multihash(format!(
            "digest length {} does not match declared {len}",
            digest.len()
        )));
    }
    Ok(())
}

fn write_uvarint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

// Unsigned LEB128, at most 9 bytes like the multiformats varint.
fn read_uvarint(buf: &[u8]) -> Option<(u64, usize)> {
    let mut value = 0u64;
    for (i, byte) in buf.iter().take(9).enumerate() {
        value |= u64::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}
