//! Inbound processing results
//!
//! Remote rejections are not errors for the caller: they are reported
//! pod-to-pod and audited, never surfaced to end users.

use std::fmt;

/// Which signature failed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SignatureFault {
    /// Author signature did not verify
    Author,
    /// Parent author signature required but absent
    MissingParentAuthor,
    /// Parent author signature present but did not verify
    ParentAuthor,
    /// No public key known for a required signer
    UnknownSigner,
}

/// Reason an inbound object was discarded
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RejectReason {
    /// Either signature failed verification
    BadSignature(SignatureFault),
    /// Parent does not exist or the kind cannot attach to it
    UnauthorizedParentLink,
    /// Retraction signed by someone other than the author or parent owner
    UnauthorizedRetraction,
    /// Could not be decoded
    Malformed(String),
    /// Decoded and signed, but the payload breaks a model rule
    InvalidPayload(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::BadSignature(fault) => write!(f, "bad signature ({:?})", fault),
            RejectReason::UnauthorizedParentLink => f.write_str("unauthorized parent link"),
            RejectReason::UnauthorizedRetraction => f.write_str("unauthorized retraction"),
            RejectReason::Malformed(why) => write!(f, "malformed: {}", why),
            RejectReason::InvalidPayload(why) => write!(f, "invalid payload: {}", why),
        }
    }
}

/// Processing result for one inbound delivery
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// First-time acceptance, state was written
    Accepted,
    /// Already known; nothing changed
    Duplicate,
    /// Discarded without writing anything
    Rejected(RejectReason),
}

impl ReceiveOutcome {
    #[inline]
    pub fn is_accepted(&self) -> bool {
        matches!(self, ReceiveOutcome::Accepted)
    }

    #[inline]
    pub fn is_rejected(&self) -> bool {
        matches!(self, ReceiveOutcome::Rejected(_))
    }

    #[inline]
    pub fn bad_signature(fault: SignatureFault) -> Self {
        ReceiveOutcome::Rejected(RejectReason::BadSignature(fault))
    }
}
