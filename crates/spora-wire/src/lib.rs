//! Spora Wire Protocol - Binary envelope format
//!
//! This crate implements the serialized shape exchanged between pods:
//! - Fixed header (magic, version, tag)
//! - Relayable body with both signature fields
//! - Retraction body

pub mod envelope;

pub use envelope::*;
