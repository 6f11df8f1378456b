//! Participant identity using Ed25519

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use spora_core::Signature;

/// Key fingerprint length in bytes
pub const FINGERPRINT_LEN: usize = 8;

/// Derive a short fingerprint from a public key (first 8 bytes of SHA-256)
fn derive_fingerprint(verifying_key: &VerifyingKey) -> [u8; FINGERPRINT_LEN] {
    let hash = Sha256::digest(verifying_key.as_bytes());
    let mut id = [0u8; FINGERPRINT_LEN];
    id.copy_from_slice(&hash[..FINGERPRINT_LEN]);
    id
}

/// Full keypair for a participant hosted on this pod
#[derive(Clone)]
pub struct Identity {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl Identity {
    /// Generate a new random identity
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();

        Identity {
            signing_key,
            verifying_key,
        }
    }

    /// Create identity from existing signing key bytes
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(bytes);
        let verifying_key = signing_key.verifying_key();

        Identity {
            signing_key,
            verifying_key,
        }
    }

    /// Get the signing key bytes (secret)
    pub fn signing_key_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Get the verifying key bytes (public)
    pub fn verifying_key_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// Public half only
    pub fn public(&self) -> PublicIdentity {
        PublicIdentity {
            verifying_key: self.verifying_key,
        }
    }

    /// Hex fingerprint of the public key, for logs
    pub fn fingerprint(&self) -> String {
        hex::encode(derive_fingerprint(&self.verifying_key))
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.signing_key.sign(message).to_bytes())
    }

    /// Verify a signature
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        let sig = ed25519_dalek::Signature::from_bytes(signature.as_bytes());
        self.verifying_key.verify(message, &sig).is_ok()
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

/// Public identity for verification only
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicIdentity {
    verifying_key: VerifyingKey,
}

impl PublicIdentity {
    /// Create from verifying key bytes
    pub fn from_bytes(bytes: &[u8; 32]) -> Option<Self> {
        let verifying_key = VerifyingKey::from_bytes(bytes).ok()?;
        Some(PublicIdentity { verifying_key })
    }

    /// Hex fingerprint of the public key, for logs
    pub fn fingerprint(&self) -> String {
        hex::encode(derive_fingerprint(&self.verifying_key))
    }

    /// Verify a signature. Strict verification: rejects malleable and
    /// small-order encodings.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        let sig = ed25519_dalek::Signature::from_bytes(signature.as_bytes());
        self.verifying_key.verify_strict(message, &sig).is_ok()
    }

    /// Get the verifying key bytes
    pub fn to_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }
}

impl std::fmt::Debug for PublicIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicIdentity")
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}
