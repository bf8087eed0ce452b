use ed25519_dalek::{Signature, Signer as DalekSigner, Verifier};

use super::keys::{KeyError, PublicKey, SecretKey};

/// Size of an ownership proof in bytes (an Ed25519 signature). The wire
/// format reserves up to 4096 bytes for the proof field so the shape can
/// evolve, but every proof this implementation emits is exactly this size.
pub const PROOF_SIZE: usize = 64;

/// An ownership proof: a signature binding a write to an owner public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Proof(Signature);

impl Proof {
    pub fn to_bytes(&self) -> [u8; PROOF_SIZE] {
        self.0.to_bytes()
    }
}

impl From<Signature> for Proof {
    fn from(sig: Signature) -> Self {
        Proof(sig)
    }
}

impl TryFrom<&[u8]> for Proof {
    type Error = KeyError;
    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() != PROOF_SIZE {
            return Err(anyhow::anyhow!(
                "invalid proof size, expected {}, got {}",
                PROOF_SIZE,
                bytes.len()
            )
            .into());
        }
        let mut buff = [0; PROOF_SIZE];
        buff.copy_from_slice(bytes);
        Ok(Proof(Signature::from_bytes(&buff)))
    }
}

/// The opaque signing capability.
///
/// Callers that publish blocks hold a `Signer`; everything else only ever
/// verifies. Curve arithmetic stays behind this seam.
pub trait Signer: Send + Sync {
    fn public(&self) -> PublicKey;
    fn sign(&self, message: &[u8]) -> Proof;
}

impl Signer for SecretKey {
    fn public(&self) -> PublicKey {
        SecretKey::public(self)
    }

    fn sign(&self, message: &[u8]) -> Proof {
        Proof((**self).sign(message))
    }
}

impl PublicKey {
    /// Verify `proof` over `message` against this key.
    pub fn verify_proof(&self, proof: &Proof, message: &[u8]) -> bool {
        (**self).verify(message, &proof.0).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify() {
        let secret = SecretKey::from_seed([1u8; 32]);
        let proof = secret.sign(b"block digest");
        assert!(secret.public().verify_proof(&proof, b"block digest"));
    }

    #[test]
    fn verify_rejects_tampered_message() {
        let secret = SecretKey::from_seed([2u8; 32]);
        let proof = secret.sign(b"block digest");
        assert!(!secret.public().verify_proof(&proof, b"other digest"));
    }

    #[test]
    fn verify_rejects_wrong_key() {
        let signer = SecretKey::from_seed([3u8; 32]);
        let other = SecretKey::from_seed([4u8; 32]);
        let proof = signer.sign(b"block digest");
        assert!(!other.public().verify_proof(&proof, b"block digest"));
    }

    #[test]
    fn proof_bytes_round_trip() {
        let secret = SecretKey::from_seed([5u8; 32]);
        let proof = secret.sign(b"payload");
        let bytes = proof.to_bytes();
        let recovered = Proof::try_from(&bytes[..]).unwrap();
        assert_eq!(proof, recovered);
        assert!(Proof::try_from(&bytes[..32]).is_err());
    }
}
