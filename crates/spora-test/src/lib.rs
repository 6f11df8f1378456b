//! Spora Test Harness - Multi-pod federation simulation
//!
//! This crate provides:
//! - An in-memory network routing envelopes between pods by domain
//! - Link failure injection (down, loss, duplication, latency)
//! - A federation builder that publishes user keys to every pod
//! - End-to-end relay scenarios

pub mod federation;
pub mod scenarios;

pub use federation::*;
