//! Relation edges - who shares with whom
//!
//! An edge is owned by a local user and points at another participant.
//! The two facets are independent:
//! - `sharing`: the other participant shares with the user
//! - `receiving`: the user shares with the other participant

use spora_core::Handle;

/// Directed relation between a local user and a participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationEdge {
    /// Local user owning the edge
    pub user: Handle,
    /// The other participant
    pub person: Handle,
    /// `person` has authorized `user` to receive their updates
    pub sharing: bool,
    /// `user` has authorized `person` to receive updates from `user`
    pub receiving: bool,
}

impl RelationEdge {
    /// A fresh edge with both facets off
    pub fn new(user: Handle, person: Handle) -> Self {
        Self {
            user,
            person,
            sharing: false,
            receiving: false,
        }
    }

    #[inline]
    pub fn mutual(&self) -> bool {
        self.sharing && self.receiving
    }

    /// Sharing towards the user without the user sharing back
    #[inline]
    pub fn only_sharing(&self) -> bool {
        self.sharing && !self.receiving
    }

    /// Neither facet set - the edge carries no authorization
    #[inline]
    pub fn is_empty(&self) -> bool {
        !self.sharing && !self.receiving
    }
}

/// Result of authorizing a participant to share with a user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizeOutcome {
    /// Sharing started now
    Started(RelationEdge),
    /// Already sharing - edge returned unchanged, nothing to signal
    AlreadySharing(RelationEdge),
}

impl AuthorizeOutcome {
    pub fn edge(&self) -> &RelationEdge {
        match self {
            AuthorizeOutcome::Started(edge) | AuthorizeOutcome::AlreadySharing(edge) => edge,
        }
    }

    #[inline]
    pub fn is_new(&self) -> bool {
        matches!(self, AuthorizeOutcome::Started(_))
    }
}
