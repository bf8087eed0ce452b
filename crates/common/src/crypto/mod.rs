//! Cryptographic primitives for Tessera
//!
//! This module provides the signing foundation for the ownership-proof
//! model:
//!
//! - **Identity & Authentication**: Ed25519 keypairs identify block owners
//! - **Ownership proofs**: a `Proof` is an Ed25519 signature binding a write
//!   to an owner key; the store verifies it before accepting the write
//! - **Signer capability**: raw curve arithmetic stays opaque behind the
//!   `Signer` trait, so callers only ever see sign/verify
//!
//! What a proof signs is fixed by the store layer (`store::proof_payload`):
//! the 32-byte map key the block files under, followed by the canonical
//! encoding of the block's content hash.

mod keys;
mod proof;

pub use keys::{KeyError, PublicKey, SecretKey, PUBLIC_KEY_SIZE, SECRET_KEY_SIZE};
pub use proof::{Proof, Signer, PROOF_SIZE};
