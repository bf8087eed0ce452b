//! Authenticated content-addressed storage.
//!
//! The `ContentStore` trait is the seam everything else hangs off: the trie
//! publishes and fetches its nodes through it, and a routing node consults
//! it when it is authoritative for a target. Writes carry an ownership
//! proof; a store verifies the proof before accepting bytes.
//!
//! A proof signs `map_key || canonical content-hash encoding`, which binds
//! the write to both the trie key it files under and the exact bytes. The
//! DHT admission path (`admit`) can check it against the PUT key alone;
//! the write path (`put`) recomputes the hash from the bytes.

mod memory;

use async_trait::async_trait;
use bytes::Bytes;

use crate::block::ContentHash;
use crate::crypto::{Proof, PublicKey, Signer};
use crate::ring::NodeId;
use crate::wire::{Put, WireError, MAP_KEY_SIZE};

pub use memory::{MemoryStore, MAX_PENDING_CLAIMS};

/// Hard cap on a stored block. Larger data must be split by the writer.
pub const MAX_BLOCK_SIZE: usize = 128 * 1024;

/// Errors surfaced by a content store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Recoverable: the block may be absent or not yet replicated here.
    #[error("block not found: {0}")]
    NotFound(ContentHash),

    #[error("ownership proof rejected for owner {owner}")]
    Unauthorized { owner: String },

    #[error("malformed write claim: {0}")]
    MalformedClaim(String),

    #[error("block length {actual} disagrees with declared size {declared}")]
    SizeMismatch { declared: u32, actual: u32 },

    #[error("block length {len} exceeds cap {max}")]
    BlockTooLarge { len: usize, max: usize },

    #[error("framing error: {0}")]
    Framing(#[from] WireError),
}

/// The payload an ownership proof signs.
pub fn proof_payload(map_key: &[u8; MAP_KEY_SIZE], hash: &ContentHash) -> Vec<u8> {
    let mut payload = Vec::with_capacity(MAP_KEY_SIZE + crate::block::ENCODED_SIZE);
    payload.extend_from_slice(map_key);
    payload.extend_from_slice(&hash.encode());
    payload
}

/// Ring address of a public key's own records.
pub fn hash_key(key: &PublicKey) -> ContentHash {
    ContentHash::blake3_of(&key.to_bytes())
}

/// Ring id a public key's records live under.
pub fn key_ring_id(key: &PublicKey) -> NodeId {
    hash_key(key).ring_id()
}

/// A write announced over the DHT, parsed from a PUT message for admission
/// checking before any block bytes move.
#[derive(Debug, Clone)]
pub struct PutClaim {
    pub owner: PublicKey,
    pub proof: Proof,
    pub hash: ContentHash,
    pub map_key: [u8; MAP_KEY_SIZE],
    pub size: u32,
}

impl PutClaim {
    pub fn from_put(put: &Put) -> Result<Self, StoreError> {
        let owner = PublicKey::try_from(put.owner().as_ref())
            .map_err(|e| StoreError::MalformedClaim(e.to_string()))?;
        let proof = Proof::try_from(put.proof().as_ref())
            .map_err(|e| StoreError::MalformedClaim(e.to_string()))?;
        let hash = ContentHash::decode(put.key())?;
        Ok(Self {
            owner,
            proof,
            hash,
            map_key: *put.map_key(),
            size: put.size(),
        })
    }

    /// Check the proof authorizes `owner` to file `hash` under `map_key`.
    pub fn verify(&self) -> Result<(), StoreError> {
        let payload = proof_payload(&self.map_key, &self.hash);
        if !self.owner.verify_proof(&self.proof, &payload) {
            return Err(StoreError::Unauthorized {
                owner: self.owner.to_hex(),
            });
        }
        Ok(())
    }
}

/// Async content-addressed block storage with proof-gated writes.
///
/// `get` misses are a normal outcome (`NotFound`), not corruption; callers
/// re-verify `hash(block) == requested hash` on every fetch.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Fetch a block by hash.
    async fn get(&self, hash: &ContentHash) -> Result<Bytes, StoreError>;

    /// Store a block after verifying the ownership proof. Idempotent:
    /// re-putting identical bytes yields the same hash with no side effect.
    async fn put(
        &self,
        owner: &PublicKey,
        proof: &Proof,
        map_key: &[u8; MAP_KEY_SIZE],
        block: Bytes,
    ) -> Result<ContentHash, StoreError>;

    /// Admission check for a DHT-announced write: verify the claim and pin
    /// its declared size before any bytes move.
    async fn admit(&self, claim: &PutClaim) -> Result<(), StoreError>;

    /// Stored size of a block, if present.
    async fn size_of(&self, hash: &ContentHash) -> Result<Option<u32>, StoreError>;
}

/// A signing identity plus the map key its blocks file under.
///
/// This is the capability handed to the trie: `put_block` hashes, signs,
/// and publishes in one step, so a node's hash only ever escapes after the
/// node is resolvable from the store.
#[derive(Clone)]
pub struct SignedWriter {
    signer: std::sync::Arc<dyn Signer>,
    map_key: [u8; MAP_KEY_SIZE],
}

impl SignedWriter {
    pub fn new(signer: std::sync::Arc<dyn Signer>, map_key: [u8; MAP_KEY_SIZE]) -> Self {
        Self { signer, map_key }
    }

    pub fn public(&self) -> PublicKey {
        self.signer.public()
    }

    pub fn map_key(&self) -> &[u8; MAP_KEY_SIZE] {
        &self.map_key
    }

    /// Sign the write of a block with this hash under this writer's map key.
    pub fn proof_for(&self, hash: &ContentHash) -> Proof {
        self.signer.sign(&proof_payload(&self.map_key, hash))
    }

    /// Hash, sign, and publish `block`.
    pub async fn put_block<S: ContentStore + ?Sized>(
        &self,
        store: &S,
        block: Bytes,
    ) -> Result<ContentHash, StoreError> {
        let hash = ContentHash::of(&block);
        let proof = self.proof_for(&hash);
        store
            .put(&self.public(), &proof, &self.map_key, block)
            .await
    }
}

impl std::fmt::Debug for SignedWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedWriter")
            .field("owner", &self.public().to_hex())
            .field("map_key", &hex::encode(self.map_key))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SecretKey;

    #[test]
    fn hash_key_is_deterministic_per_key() {
        let a = SecretKey::from_seed([1u8; 32]).public();
        let b = SecretKey::from_seed([2u8; 32]).public();
        assert_eq!(hash_key(&a), hash_key(&a));
        assert_ne!(hash_key(&a), hash_key(&b));
        assert_eq!(key_ring_id(&a), hash_key(&a).ring_id());
    }

    #[test]
    fn claim_verify_binds_map_key() {
        let secret = SecretKey::from_seed([3u8; 32]);
        let hash = ContentHash::of(b"block");
        let map_key = [7u8; MAP_KEY_SIZE];
        let proof = secret.sign(&proof_payload(&map_key, &hash));

        let claim = PutClaim {
            owner: secret.public(),
            proof,
            hash,
            map_key,
            size: 5,
        };
        assert!(claim.verify().is_ok());

        let mut moved = claim.clone();
        moved.map_key = [8u8; MAP_KEY_SIZE];
        assert!(matches!(
            moved.verify(),
            Err(StoreError::Unauthorized { .. })
        ));
    }
}
