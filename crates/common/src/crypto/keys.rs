use std::ops::Deref;

use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Size of an Ed25519 private key in bytes
pub const SECRET_KEY_SIZE: usize = 32;
/// Size of an Ed25519 public key in bytes
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Errors that can occur during key operations
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("key error: {0}")]
    Default(#[from] anyhow::Error),
}

/// Public key identifying a block owner
///
/// A thin wrapper around an Ed25519 verifying key. This key serves two
/// purposes:
/// - **Ownership**: names the writer a block belongs to; the store verifies
///   every write's proof against it
/// - **Addressing**: `store::hash_key` derives the ring id a node's own
///   records live under from this key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey(VerifyingKey);

impl Deref for PublicKey {
    type Target = VerifyingKey;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<VerifyingKey> for PublicKey {
    fn from(key: VerifyingKey) -> Self {
        PublicKey(key)
    }
}

impl TryFrom<&[u8]> for PublicKey {
    type Error = KeyError;
    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() != PUBLIC_KEY_SIZE {
            return Err(anyhow::anyhow!(
                "invalid public key size, expected {}, got {}",
                PUBLIC_KEY_SIZE,
                bytes.len()
            )
            .into());
        }
        let mut buff = [0; PUBLIC_KEY_SIZE];
        buff.copy_from_slice(bytes);
        let key = VerifyingKey::from_bytes(&buff)
            .map_err(|_| anyhow::anyhow!("invalid edwards point in public key"))?;
        Ok(PublicKey(key))
    }
}

impl PublicKey {
    /// Parse a public key from a hexadecimal string
    ///
    /// Accepts both plain hex and "0x"-prefixed hex strings.
    pub fn from_hex(hex: &str) -> Result<Self, KeyError> {
        let hex = hex.strip_prefix("0x").unwrap_or(hex);
        let mut buff = [0; PUBLIC_KEY_SIZE];
        hex::decode_to_slice(hex, &mut buff)
            .map_err(|_| anyhow::anyhow!("public key hex decode error"))?;
        PublicKey::try_from(&buff[..])
    }

    /// Convert public key to raw bytes
    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.0.to_bytes()
    }

    /// Convert public key to hexadecimal string
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl std::hash::Hash for PublicKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.to_bytes().hash(state)
    }
}

/// Secret half of an owner keypair
#[derive(Clone)]
pub struct SecretKey(SigningKey);

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never print key material
        write!(f, "SecretKey({})", self.public().to_hex())
    }
}

impl Deref for SecretKey {
    type Target = SigningKey;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl SecretKey {
    /// Generate a fresh keypair from the thread rng
    pub fn generate() -> Self {
        let seed: [u8; SECRET_KEY_SIZE] = rand::rng().random();
        SecretKey(SigningKey::from_bytes(&seed))
    }

    /// Build a keypair from fixed seed bytes. Deterministic; used by tests
    /// and by callers restoring a persisted identity.
    pub fn from_seed(seed: [u8; SECRET_KEY_SIZE]) -> Self {
        SecretKey(SigningKey::from_bytes(&seed))
    }

    pub fn public(&self) -> PublicKey {
        PublicKey(self.0.verifying_key())
    }

    pub fn to_bytes(&self) -> [u8; SECRET_KEY_SIZE] {
        self.0.to_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_and_hex_round_trip() {
        let secret = SecretKey::generate();
        let public = secret.public();
        let hex = public.to_hex();
        let recovered = PublicKey::from_hex(&hex).unwrap();
        assert_eq!(public, recovered);

        let prefixed = format!("0x{}", hex);
        let recovered = PublicKey::from_hex(&prefixed).unwrap();
        assert_eq!(public, recovered);
    }

    #[test]
    fn from_seed_is_deterministic() {
        let a = SecretKey::from_seed([7u8; 32]);
        let b = SecretKey::from_seed([7u8; 32]);
        assert_eq!(a.public(), b.public());
    }

    #[test]
    fn rejects_wrong_size_bytes() {
        assert!(PublicKey::try_from(&[0u8; 16][..]).is_err());
    }
}
