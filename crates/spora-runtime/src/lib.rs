//! Spora Runtime - Relay engine and pod bootstrap
//!
//! Processing of one relayable object:
//! 1. Resolve the parent and its owner
//! 2. Verify the author signature
//! 3. Verify the parent owner's countersignature when required
//! 4. Persist idempotently, updating parent aggregates
//! 5. On the owner's pod only, fan out to the owner's subscribers
//!
//! Local creation obtains the countersignature before step 4; retractions
//! follow the same route in reverse.

pub mod config;
pub mod delivery;
pub mod logging;
pub mod pod;

pub use config::*;
pub use delivery::*;
pub use logging::*;
pub use pod::*;
