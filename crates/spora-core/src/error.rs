//! Error types for Spora

use thiserror::Error;

use crate::{Guid, Handle, ParentRef, RelayableKind};

/// Validation failures surfaced synchronously to the caller. Nothing is
/// persisted when one of these is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    // Identifiers
    #[error("Invalid handle: {0:?}")]
    InvalidHandle(String),

    #[error("Invalid guid: {0:?}")]
    InvalidGuid(String),

    // Payload
    #[error("Payload is empty")]
    EmptyPayload,

    #[error("Payload too long: {len} > {max}")]
    PayloadTooLong { len: usize, max: usize },

    // Parent linkage
    #[error("Parent not found: {0}")]
    ParentNotFound(ParentRef),

    #[error("{kind} cannot attach to {parent}")]
    NotAttachable { kind: RelayableKind, parent: ParentRef },

    #[error("{author} already likes {parent}")]
    DuplicateLike { author: Handle, parent: ParentRef },

    // Relation edges
    #[error("Cannot create self-contact")]
    SelfContact,

    #[error("Cannot be in contact with a closed account: {0}")]
    ClosedAccount(Handle),

    #[error("Cannot connect to an ignored user: {0}")]
    BlockedParticipant(Handle),
}

/// Core Spora errors
#[derive(Error, Debug)]
pub enum SporaError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    // Wire errors
    #[error("Invalid wire format: {0}")]
    InvalidWireFormat(String),

    #[error("Buffer too short: expected {expected}, got {actual}")]
    BufferTooShort { expected: usize, actual: usize },

    // Identity errors
    #[error("Unknown participant: {0}")]
    UnknownParticipant(Handle),

    #[error("No private key for {0} on this pod")]
    NoPrivateKey(Handle),

    #[error("Invalid public key for {0}")]
    InvalidPublicKey(Handle),

    // Signature errors
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Countersignature from {owner} unavailable: {reason}")]
    CountersignUnavailable { owner: Handle, reason: String },

    #[error("Countersign refused: {0}")]
    CountersignRefused(String),

    // Object errors
    #[error("Relayable not found: {0}")]
    NotFound(Guid),

    #[error("{handle} is not the author of {guid}")]
    NotAuthor { guid: Guid, handle: Handle },

    // Transport / config errors
    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for Spora operations
pub type SporaResult<T> = Result<T, SporaError>;
