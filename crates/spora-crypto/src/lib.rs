//! Spora Crypto - Identity & Signing
//!
//! Provides the cryptographic side of the relay protocol:
//! - Participant identities (Ed25519)
//! - Key directory of known participants and the local keyring
//! - Author signatures, parent author countersignatures and retraction
//!   signatures over canonical bytes

pub mod directory;
pub mod identity;
pub mod signing;

pub use directory::*;
pub use identity::*;
pub use signing::*;
