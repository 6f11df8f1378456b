//! Relayable signatures
//!
//! Both the author signature and the parent author's countersignature
//! cover the same canonical bytes. Verification is pure: it never touches
//! entity state.

use spora_core::{
    retraction_canonical_bytes, Guid, Handle, RelayableDraft, RelayableKind, RelayableObject,
    Signature, SignatureFault, SporaResult,
};

use crate::{Identity, KeyDirectory};

/// Sign a draft as its author, using the author's key from the keyring
pub fn sign_as_author(directory: &KeyDirectory, draft: &RelayableDraft) -> SporaResult<Signature> {
    let identity = directory.identity(&draft.author)?;
    Ok(identity.sign(&draft.canonical_bytes()))
}

/// Countersign a draft as the parent owner
pub fn countersign(owner: &Identity, draft: &RelayableDraft) -> Signature {
    owner.sign(&draft.canonical_bytes())
}

/// Sign a retraction as `author`, the retracting participant
pub fn sign_retraction(
    directory: &KeyDirectory,
    target: &Guid,
    kind: RelayableKind,
    author: &Handle,
) -> SporaResult<Signature> {
    let identity = directory.identity(author)?;
    Ok(identity.sign(&retraction_canonical_bytes(target, kind, author)))
}

/// Signature verification against the key directory
pub struct RelayableVerifier<'a> {
    directory: &'a KeyDirectory,
}

impl<'a> RelayableVerifier<'a> {
    pub fn new(directory: &'a KeyDirectory) -> Self {
        RelayableVerifier { directory }
    }

    /// Verify the author signature only
    pub fn verify_author(&self, draft: &RelayableDraft, signature: &Signature) -> Result<(), SignatureFault> {
        let author = self
            .directory
            .public_identity(&draft.author)
            .ok_or(SignatureFault::UnknownSigner)?;

        if author.verify(&draft.canonical_bytes(), signature) {
            Ok(())
        } else {
            Err(SignatureFault::Author)
        }
    }

    /// Verify every signature the object must carry given its parent owner.
    ///
    /// The author signature is always checked. When the author is not the
    /// parent owner, a parent author signature must be present and verify
    /// against the owner's key.
    pub fn verify(&self, object: &RelayableObject, parent_owner: &Handle) -> Result<(), SignatureFault> {
        let canonical = object.canonical_bytes();

        let author = self
            .directory
            .public_identity(object.author())
            .ok_or(SignatureFault::UnknownSigner)?;
        if !author.verify(&canonical, &object.author_signature) {
            return Err(SignatureFault::Author);
        }

        if !object.requires_parent_author_signature(parent_owner) {
            return Ok(());
        }

        let countersignature = object
            .parent_author_signature
            .as_ref()
            .ok_or(SignatureFault::MissingParentAuthor)?;
        let owner = self
            .directory
            .public_identity(parent_owner)
            .ok_or(SignatureFault::UnknownSigner)?;

        if owner.verify(&canonical, countersignature) {
            Ok(())
        } else {
            Err(SignatureFault::ParentAuthor)
        }
    }

    /// Verify a retraction against the retracting participant's key
    pub fn verify_retraction(
        &self,
        target: &Guid,
        kind: RelayableKind,
        author: &Handle,
        signature: &Signature,
    ) -> Result<(), SignatureFault> {
        let public = self
            .directory
            .public_identity(author)
            .ok_or(SignatureFault::UnknownSigner)?;

        if public.verify(&retraction_canonical_bytes(target, kind, author), signature) {
            Ok(())
        } else {
            Err(SignatureFault::Author)
        }
    }
}
