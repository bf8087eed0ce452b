//! Self-describing content hashes.
//!
//! A `ContentHash` identifies an immutable block of bytes by digest, tagged
//! with the algorithm that produced it. The canonical encoding
//! `[algo][digest_len][digest]` is what travels on the wire (as the PUT/GET
//! key) and inside trie nodes, so it must never change shape.
//!
//! Integrity contract: anyone retrieving a block by hash re-hashes the
//! returned bytes and compares before trusting them.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ring::NodeId;
use crate::wire::{codec, WireError};

/// Digest size shared by both supported algorithms.
pub const DIGEST_SIZE: usize = 32;

/// Size of the canonical encoding: 2 header bytes + digest.
pub const ENCODED_SIZE: usize = 2 + DIGEST_SIZE;

/// Supported digest algorithms, tagged with their multicodec code so the
/// encoding stays self-describing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum HashAlgorithm {
    Sha2_256 = 0x12,
    Blake3 = 0x1e,
}

impl HashAlgorithm {
    pub fn from_tag(tag: u8) -> Result<Self, WireError> {
        match tag {
            0x12 => Ok(HashAlgorithm::Sha2_256),
            0x1e => Ok(HashAlgorithm::Blake3),
            other => Err(WireError::UnknownHashAlgorithm(other)),
        }
    }

    pub fn digest_size(&self) -> usize {
        DIGEST_SIZE
    }
}

/// A content block identifier: digest plus the algorithm that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash {
    algorithm: HashAlgorithm,
    digest: [u8; DIGEST_SIZE],
}

impl ContentHash {
    pub fn new(algorithm: HashAlgorithm, digest: [u8; DIGEST_SIZE]) -> Self {
        Self { algorithm, digest }
    }

    /// Hash `bytes` with the default algorithm (sha2-256).
    pub fn of(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        Self {
            algorithm: HashAlgorithm::Sha2_256,
            digest: digest.into(),
        }
    }

    /// Hash `bytes` with blake3. Used for key-derived addressing.
    pub fn blake3_of(bytes: &[u8]) -> Self {
        Self {
            algorithm: HashAlgorithm::Blake3,
            digest: *blake3::hash(bytes).as_bytes(),
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn digest(&self) -> &[u8; DIGEST_SIZE] {
        &self.digest
    }

    /// The ring id this hash is addressed to: the first 8 digest bytes.
    pub fn ring_id(&self) -> NodeId {
        let mut id = [0u8; 8];
        id.copy_from_slice(&self.digest[..8]);
        NodeId(u64::from_be_bytes(id))
    }

    /// Canonical `[algo][digest_len][digest]` encoding.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(ENCODED_SIZE);
        self.write(&mut buf);
        buf.freeze()
    }

    pub(crate) fn write(&self, buf: &mut BytesMut) {
        buf.put_u8(self.algorithm as u8);
        buf.put_u8(DIGEST_SIZE as u8);
        buf.put_slice(&self.digest);
    }

    /// Decode from the front of `buf`, advancing it.
    pub(crate) fn read(buf: &mut impl Buf) -> Result<Self, WireError> {
        if buf.remaining() < 2 {
            return Err(WireError::Truncated { field: "content hash header" });
        }
        let algorithm = HashAlgorithm::from_tag(buf.get_u8())?;
        let len = buf.get_u8() as usize;
        if len != algorithm.digest_size() {
            return Err(WireError::FieldLengthMismatch {
                field: "content hash digest",
                expected: algorithm.digest_size(),
                actual: len,
            });
        }
        let mut digest = [0u8; DIGEST_SIZE];
        codec::read_exact(buf, &mut digest, "content hash digest")?;
        Ok(Self { algorithm, digest })
    }

    /// Decode a full encoding, rejecting trailing bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut buf = bytes;
        let hash = Self::read(&mut buf)?;
        if buf.has_remaining() {
            return Err(WireError::TrailingBytes {
                count: buf.remaining(),
            });
        }
        Ok(hash)
    }

    /// Verify that `bytes` hash to this value under this hash's algorithm.
    pub fn verifies(&self, bytes: &[u8]) -> bool {
        let recomputed = match self.algorithm {
            HashAlgorithm::Sha2_256 => ContentHash::of(bytes),
            HashAlgorithm::Blake3 => ContentHash::blake3_of(bytes),
        };
        recomputed == *self
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.encode())
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
