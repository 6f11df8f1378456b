//! End-to-end relay scenarios
//!
//! Full multi-pod flows over the in-memory network:
//! - Comment relay through the authoritative pod
//! - Signature gate on missing countersignatures
//! - Edge validation against blocked participants
//! - Failure isolation, redelivery and retraction
