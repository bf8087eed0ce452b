/**
 * Content block identity: self-describing content
 *  hashes and their ring addressing.
 */
pub mod block;
/**
 * Cryptographic types and operations.
 *  - Public and Private key implementations
 *  - The Signer capability and ownership proofs
 */
pub mod crypto;
/**
 * The circular 64-bit node identifier space and
 *  its distance metric.
 */
pub mod ring;
/**
 * Authenticated content-addressed storage.
 *  The trait consumed by the trie and the routing
 *  layer, plus the in-memory reference store.
 */
pub mod store;
/**
 * Persistent CHAMP trie. Copy-on-write, bitmap
 *  indexed, canonical-form nodes linked by content
 *  hash through a ContentStore.
 */
pub mod trie;
/**
 * The six-message DHT wire protocol and its
 *  byte-exact binary codec.
 */
pub mod wire;

pub mod prelude {
    pub use crate::block::{ContentHash, HashAlgorithm};
    pub use crate::crypto::{Proof, PublicKey, SecretKey, Signer};
    pub use crate::ring::NodeId;
    pub use crate::store::{ContentStore, MemoryStore, SignedWriter, StoreError};
    pub use crate::trie::{Cas, Trie, TrieError};
    pub use crate::wire::{Body, Message, WireError};
}
