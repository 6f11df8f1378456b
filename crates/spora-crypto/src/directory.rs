//! Participant key directory
//!
//! Maps handles to public keys for every participant this pod knows, and
//! holds the private keys of participants hosted here. Key discovery is
//! external: keys are registered explicitly.

use std::collections::HashMap;

use parking_lot::RwLock;

use spora_core::{Handle, SporaError, SporaResult};

use crate::{Identity, PublicIdentity};

/// Known key directory
#[derive(Debug, Default)]
pub struct KeyDirectory {
    /// Public keys of every known participant
    public_keys: RwLock<HashMap<Handle, PublicIdentity>>,
    /// Private keys of participants hosted on this pod
    keyring: RwLock<HashMap<Handle, Identity>>,
}

impl KeyDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a remote participant's public key
    pub fn register_public(&self, handle: Handle, key: &[u8; 32]) -> SporaResult<PublicIdentity> {
        let public =
            PublicIdentity::from_bytes(key).ok_or_else(|| SporaError::InvalidPublicKey(handle.clone()))?;
        tracing::debug!(%handle, fingerprint = %public.fingerprint(), "registered public key");
        self.public_keys.write().insert(handle, public);
        Ok(public)
    }

    /// Register a participant hosted on this pod
    pub fn register_local(&self, handle: Handle, identity: Identity) {
        tracing::debug!(%handle, fingerprint = %identity.fingerprint(), "registered local identity");
        self.public_keys.write().insert(handle.clone(), identity.public());
        self.keyring.write().insert(handle, identity);
    }

    /// Public key for a participant
    pub fn public_identity(&self, handle: &Handle) -> Option<PublicIdentity> {
        self.public_keys.read().get(handle).copied()
    }

    /// Private identity for a participant hosted here
    pub fn identity(&self, handle: &Handle) -> SporaResult<Identity> {
        self.keyring
            .read()
            .get(handle)
            .cloned()
            .ok_or_else(|| SporaError::NoPrivateKey(handle.clone()))
    }

    /// Is the participant hosted on this pod (we hold their key)?
    pub fn is_local(&self, handle: &Handle) -> bool {
        self.keyring.read().contains_key(handle)
    }

    /// Is the participant known at all?
    pub fn is_known(&self, handle: &Handle) -> bool {
        self.public_keys.read().contains_key(handle)
    }

    /// Number of known participants
    pub fn len(&self) -> usize {
        self.public_keys.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.public_keys.read().is_empty()
    }
}
