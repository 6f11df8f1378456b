//! Spora Core - Fundamental types for relayable federation
//!
//! This crate defines the types shared by every Spora component:
//! - Identifiers (Handle, Guid)
//! - Time primitives (Timestamp, TimeWindow)
//! - Parent references and per-kind attachment rules
//! - Relayable objects and their canonical signed bytes
//! - Error taxonomy and inbound receive outcomes

pub mod error;
pub mod id;
pub mod outcome;
pub mod parent;
pub mod relayable;
pub mod time;

pub use error::*;
pub use id::*;
pub use outcome::*;
pub use parent::*;
pub use relayable::*;
pub use time::*;
