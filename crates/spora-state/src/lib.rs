//! Spora State - Relayable storage and parent aggregates
//!
//! This crate holds everything a pod knows about parents and the
//! relayables attached to them:
//! - Idempotent, per-parent serialized persistence
//! - Denormalized counters maintained on accept / remove
//! - Cascade removal when a parent disappears
//! - Activity statistics for administrators

pub mod aggregate;
pub mod stats;
pub mod store;

pub use aggregate::*;
pub use stats::*;
pub use store::*;
