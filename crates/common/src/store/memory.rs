use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use crate::block::ContentHash;
use crate::crypto::{Proof, PublicKey};
use crate::wire::MAP_KEY_SIZE;

use super::{proof_payload, ContentStore, PutClaim, StoreError, MAX_BLOCK_SIZE};

/// Most admitted-but-unfilled claims kept at once. Writers that announce
/// blocks and never send them would otherwise grow the table forever.
pub const MAX_PENDING_CLAIMS: usize = 1024;

/// In-memory reference store.
///
/// Blocks live in a hash map keyed by content hash; admitted-but-unfilled
/// claims are tracked separately so a later `put` can be checked against
/// the size the writer declared over the wire. The claim table is bounded
/// at [`MAX_PENDING_CLAIMS`]; an evicted claim only loses its size pin,
/// the proof check on `put` still stands.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blocks: RwLock<HashMap<ContentHash, Bytes>>,
    pending: RwLock<HashMap<ContentHash, u32>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blocks.
    pub async fn len(&self) -> usize {
        self.blocks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blocks.read().await.is_empty()
    }

    /// Number of admitted claims still waiting for their block.
    pub async fn pending_claims(&self) -> usize {
        self.pending.read().await.len()
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn get(&self, hash: &ContentHash) -> Result<Bytes, StoreError> {
        self.blocks
            .read()
            .await
            .get(hash)
            .cloned()
            .ok_or(StoreError::NotFound(*hash))
    }

    async fn put(
        &self,
        owner: &PublicKey,
        proof: &Proof,
        map_key: &[u8; MAP_KEY_SIZE],
        block: Bytes,
    ) -> Result<ContentHash, StoreError> {
        if block.len() > MAX_BLOCK_SIZE {
            return Err(StoreError::BlockTooLarge {
                len: block.len(),
                max: MAX_BLOCK_SIZE,
            });
        }

        let hash = ContentHash::of(&block);

        if let Some(&declared) = self.pending.read().await.get(&hash) {
            if declared as usize != block.len() {
                return Err(StoreError::SizeMismatch {
                    declared,
                    actual: block.len() as u32,
                });
            }
        }

        let payload = proof_payload(map_key, &hash);
        if !owner.verify_proof(proof, &payload) {
            return Err(StoreError::Unauthorized {
                owner: owner.to_hex(),
            });
        }

        let mut blocks = self.blocks.write().await;
        if blocks.contains_key(&hash) {
            // identical bytes hash identically; nothing to do
            tracing::trace!(%hash, "put of existing block, no-op");
        } else {
            tracing::debug!(%hash, len = block.len(), "stored block");
            blocks.insert(hash, block);
        }
        drop(blocks);
        self.pending.write().await.remove(&hash);

        Ok(hash)
    }

    async fn admit(&self, claim: &PutClaim) -> Result<(), StoreError> {
        if claim.size as usize > MAX_BLOCK_SIZE {
            return Err(StoreError::BlockTooLarge {
                len: claim.size as usize,
                max: MAX_BLOCK_SIZE,
            });
        }
        claim.verify()?;
        tracing::debug!(hash = %claim.hash, size = claim.size, "admitted write claim");
        let mut pending = self.pending.write().await;
        if pending.len() >= MAX_PENDING_CLAIMS && !pending.contains_key(&claim.hash) {
            if let Some(stale) = pending.keys().next().copied() {
                pending.remove(&stale);
                tracing::debug!(hash = %stale, "evicted pending claim to stay within bound");
            }
        }
        pending.insert(claim.hash, claim.size);
        Ok(())
    }

    async fn size_of(&self, hash: &ContentHash) -> Result<Option<u32>, StoreError> {
        Ok(self
            .blocks
            .read()
            .await
            .get(hash)
            .map(|b| b.len() as u32))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::crypto::{SecretKey, Signer};
    use crate::store::SignedWriter;

    fn writer(seed: u8) -> SignedWriter {
        SignedWriter::new(
            Arc::new(SecretKey::from_seed([seed; 32])),
            [seed; MAP_KEY_SIZE],
        )
    }

    #[tokio::test]
    async fn put_and_get() {
        let store = MemoryStore::new();
        let writer = writer(1);

        let data = Bytes::from_static(b"Hello, MemoryStore!");
        let hash = writer.put_block(&store, data.clone()).await.unwrap();
        assert_eq!(hash, ContentHash::of(&data));

        let retrieved = store.get(&hash).await.unwrap();
        assert_eq!(retrieved, data);
        assert!(hash.verifies(&retrieved));
        assert_eq!(store.size_of(&hash).await.unwrap(), Some(data.len() as u32));
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let store = MemoryStore::new();
        let hash = ContentHash::of(b"never stored");
        assert!(matches!(
            store.get(&hash).await,
            Err(StoreError::NotFound(h)) if h == hash
        ));
        assert_eq!(store.size_of(&hash).await.unwrap(), None);
    }

    #[tokio::test]
    async fn put_is_idempotent() {
        let store = MemoryStore::new();
        let writer = writer(2);

        let data = Bytes::from_static(b"same bytes");
        let first = writer.put_block(&store, data.clone()).await.unwrap();
        let second = writer.put_block(&store, data).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn put_rejects_bad_proof() {
        let store = MemoryStore::new();
        let signer = SecretKey::from_seed([3u8; 32]);
        let data = Bytes::from_static(b"block");
        let hash = ContentHash::of(&data);
        let map_key = [0u8; MAP_KEY_SIZE];

        // proof signed over a different map key
        let proof = signer.sign(&proof_payload(&[9u8; MAP_KEY_SIZE], &hash));
        let err = store
            .put(&signer.public(), &proof, &map_key, data)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unauthorized { .. }));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn put_rejects_oversized_block() {
        let store = MemoryStore::new();
        let writer = writer(4);
        let data = Bytes::from(vec![0u8; MAX_BLOCK_SIZE + 1]);
        assert!(matches!(
            writer.put_block(&store, data).await,
            Err(StoreError::BlockTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn admitted_claim_pins_declared_size() {
        let store = MemoryStore::new();
        let signer = SecretKey::from_seed([5u8; 32]);
        let map_key = [1u8; MAP_KEY_SIZE];
        let data = Bytes::from_static(b"declared wrong");
        let hash = ContentHash::of(&data);
        let proof = signer.sign(&proof_payload(&map_key, &hash));

        let claim = PutClaim {
            owner: signer.public(),
            proof,
            hash,
            map_key,
            size: data.len() as u32 + 1,
        };
        store.admit(&claim).await.unwrap();

        let err = store
            .put(&signer.public(), &proof, &map_key, data.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::SizeMismatch { .. }));

        // a correct claim clears the way
        let claim = PutClaim {
            size: data.len() as u32,
            ..claim
        };
        store.admit(&claim).await.unwrap();
        store
            .put(&signer.public(), &proof, &map_key, data)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn admit_rejects_unauthorized_claim() {
        let store = MemoryStore::new();
        let signer = SecretKey::from_seed([6u8; 32]);
        let other = SecretKey::from_seed([7u8; 32]);
        let hash = ContentHash::of(b"block");
        let map_key = [0u8; MAP_KEY_SIZE];

        let claim = PutClaim {
            owner: other.public(), // proof was not made by this owner
            proof: signer.sign(&proof_payload(&map_key, &hash)),
            hash,
            map_key,
            size: 5,
        };
        assert!(matches!(
            store.admit(&claim).await,
            Err(StoreError::Unauthorized { .. })
        ));
    }

    #[tokio::test]
    async fn abandoned_claims_are_bounded() {
        let store = MemoryStore::new();
        let signer = SecretKey::from_seed([8u8; 32]);
        let map_key = [8u8; MAP_KEY_SIZE];

        for i in 0..(MAX_PENDING_CLAIMS + 10) as u64 {
            let hash = ContentHash::of(&i.to_be_bytes());
            let claim = PutClaim {
                owner: signer.public(),
                proof: signer.sign(&proof_payload(&map_key, &hash)),
                hash,
                map_key,
                size: 1,
            };
            store.admit(&claim).await.unwrap();
        }
        assert_eq!(store.pending_claims().await, MAX_PENDING_CLAIMS);

        // further admissions at the bound keep the table at the bound
        let hash = ContentHash::of(&(MAX_PENDING_CLAIMS as u64).to_be_bytes());
        let claim = PutClaim {
            owner: signer.public(),
            proof: signer.sign(&proof_payload(&map_key, &hash)),
            hash,
            map_key,
            size: 1,
        };
        store.admit(&claim).await.unwrap();
        assert_eq!(store.pending_claims().await, MAX_PENDING_CLAIMS);
    }
}
