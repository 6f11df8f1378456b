//! Spora Relation Graph
//!
//! Tracks, per pod, which participants are authorized to receive a local
//! user's updates. The relay engine never replicates edges; it only reads
//! a snapshot of an owner's receiving edges when choosing fan-out targets.
//!
//! # Facets
//!
//! - sharing: the other participant shares with the local user
//! - receiving: the local user shares with the other participant
//! - mutual: both

pub mod edge;
pub mod graph;

pub use edge::*;
pub use graph::*;
