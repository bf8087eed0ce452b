//! Persistent hash-array-mapped prefix trie over content-addressed blocks.
//!
//! Every node is an immutable block in a `ContentStore`, addressed by its
//! content hash, so a root hash names an entire map snapshot. Mutation is
//! copy-on-write: the path from the changed slot up to the root is rebuilt
//! and republished, and everything off-path is shared with the previous
//! snapshot. Serialization is canonical (ascending slot order, single-leaf
//! children inlined on delete), which makes structural equality a byte and
//! hash comparison.
//!
//! Keys are consumed 4 bits at a time, high nibble first, so a node has at
//! most 16 slots and a key of `n` bytes supports `2n` levels.

mod node;

use crate::block::ContentHash;
use crate::store::{ContentStore, SignedWriter, StoreError};
use crate::wire::WireError;

pub use node::{Champ, Slot, BIT_WIDTH, RADIX};

/// Longest key the trie accepts, matching the wire cap on PUT/GET keys.
pub const MAX_KEY_SIZE: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrieError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("malformed trie node: {0}")]
    Framing(#[from] WireError),

    #[error("integrity failure: fetched block does not hash to {hash}")]
    Integrity { hash: ContentHash },

    #[error("compare-and-swap conflict")]
    ConcurrentModification { current: Option<ContentHash> },

    #[error("invalid key: {0}")]
    InvalidKey(&'static str),
}

/// Outcome of a compare-and-swap update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cas<T> {
    /// The precondition held; here is the new state.
    Applied(T),
    /// Someone got there first; `current` is the value found under the key.
    Conflict { current: Option<ContentHash> },
}

impl<T> Cas<T> {
    pub fn applied(self) -> Option<T> {
        match self {
            Cas::Applied(value) => Some(value),
            Cas::Conflict { .. } => None,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Cas::Conflict { .. })
    }

    /// Treat a conflict as an error.
    pub fn into_result(self) -> Result<T, TrieError> {
        match self {
            Cas::Applied(value) => Ok(value),
            Cas::Conflict { current } => Err(TrieError::ConcurrentModification { current }),
        }
    }
}

/// A snapshot of the map: the decoded root node and its published hash.
///
/// All operations return fresh snapshots; an old `Trie` stays valid and
/// readable for as long as its blocks remain in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trie {
    root: Champ,
    root_hash: ContentHash,
}

impl Trie {
    /// Publish an empty root and return the empty snapshot.
    pub async fn empty<S: ContentStore + ?Sized>(
        writer: &SignedWriter,
        store: &S,
    ) -> Result<Self, TrieError> {
        let root = Champ::empty();
        let root_hash = writer.put_block(store, root.serialize()).await?;
        Ok(Self { root, root_hash })
    }

    /// Load the snapshot a root hash names.
    pub async fn load<S: ContentStore + ?Sized>(
        root_hash: ContentHash,
        store: &S,
    ) -> Result<Self, TrieError> {
        let bytes = store.get(&root_hash).await?;
        if !root_hash.verifies(&bytes) {
            return Err(TrieError::Integrity { hash: root_hash });
        }
        let root = Champ::decode(&bytes)?;
        Ok(Self { root, root_hash })
    }

    pub fn root_hash(&self) -> &ContentHash {
        &self.root_hash
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Value hash stored under `key`, if any.
    pub async fn get<S: ContentStore + ?Sized>(
        &self,
        key: &[u8],
        store: &S,
    ) -> Result<Option<ContentHash>, TrieError> {
        check_key(key)?;
        self.root.get(key, 0, store).await
    }

    /// Compare-and-swap `key` from `expected` (None = absent) to `value`.
    ///
    /// On conflict nothing above the conflict point is published and the
    /// found value comes back in `Cas::Conflict`.
    pub async fn put<S: ContentStore + ?Sized>(
        &self,
        writer: &SignedWriter,
        key: &[u8],
        expected: Option<ContentHash>,
        value: ContentHash,
        store: &S,
    ) -> Result<Cas<Self>, TrieError> {
        check_key(key)?;
        match self.root.put(writer, key, 0, expected, value, store).await {
            Ok((root, root_hash)) => Ok(Cas::Applied(Self { root, root_hash })),
            Err(TrieError::ConcurrentModification { current }) => Ok(Cas::Conflict { current }),
            Err(e) => Err(e),
        }
    }

    /// Remove `key`. Removing an absent key yields an equal snapshot.
    pub async fn remove<S: ContentStore + ?Sized>(
        &self,
        writer: &SignedWriter,
        key: &[u8],
        store: &S,
    ) -> Result<Self, TrieError> {
        check_key(key)?;
        let (root, root_hash) = self.root.remove(writer, key, 0, store).await?;
        Ok(Self { root, root_hash })
    }
}

/// The 4-bit chunk of `key` consumed at `depth`, or None once exhausted.
fn chunk(key: &[u8], depth: usize) -> Option<u8> {
    let byte = *key.get(depth / 2)?;
    Some(if depth % 2 == 0 {
        byte >> BIT_WIDTH
    } else {
        byte & (RADIX as u8 - 1)
    })
}

fn check_key(key: &[u8]) -> Result<(), TrieError> {
    if key.is_empty() {
        return Err(TrieError::InvalidKey("empty key"));
    }
    if key.len() > MAX_KEY_SIZE {
        return Err(TrieError::InvalidKey("key exceeds cap"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_walks_nibbles_high_first() {
        let key = [0xAB, 0xCD];
        assert_eq!(chunk(&key, 0), Some(0xA));
        assert_eq!(chunk(&key, 1), Some(0xB));
        assert_eq!(chunk(&key, 2), Some(0xC));
        assert_eq!(chunk(&key, 3), Some(0xD));
        assert_eq!(chunk(&key, 4), None);
    }

    #[test]
    fn key_bounds() {
        assert!(matches!(check_key(&[]), Err(TrieError::InvalidKey(_))));
        assert!(check_key(&[0u8; MAX_KEY_SIZE]).is_ok());
        assert!(matches!(
            check_key(&[0u8; MAX_KEY_SIZE + 1]),
            Err(TrieError::InvalidKey(_))
        ));
    }

    #[test]
    fn cas_accessors() {
        let applied: Cas<u32> = Cas::Applied(7);
        assert_eq!(applied.clone().applied(), Some(7));
        assert!(!applied.is_conflict());

        let conflict: Cas<u32> = Cas::Conflict { current: None };
        assert!(conflict.is_conflict());
        assert!(matches!(
            conflict.into_result(),
            Err(TrieError::ConcurrentModification { current: None })
        ));
    }
}
