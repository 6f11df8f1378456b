//! Relation graph - who receives a user's updates
//!
//! Edges live only on the pod of the user that owns them. Relay fan-out
//! reads them through `subscribers_of`, which returns an owned snapshot so
//! edits made during a fan-out cannot change who that fan-out targets.

use std::collections::{BTreeMap, HashMap, HashSet};

use spora_core::{Handle, ValidationError};

use crate::{AuthorizeOutcome, RelationEdge};

/// Per-user relation preferences
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserSettings {
    /// Share back automatically when someone starts sharing
    pub auto_follow_back: bool,
}

/// Relation graph for the users hosted on one pod
#[derive(Debug, Clone, Default)]
pub struct RelationGraph {
    /// User -> (person -> edge); ordered so snapshots are reproducible
    edges: HashMap<Handle, BTreeMap<Handle, RelationEdge>>,
    /// User -> participants they ignore
    blocks: HashMap<Handle, HashSet<Handle>>,
    /// Participants whose account is closed
    closed: HashSet<Handle>,
    /// User -> preferences
    settings: HashMap<Handle, UserSettings>,
    /// Default for users without explicit settings
    default_settings: UserSettings,
}

impl RelationGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with a default for users that never set preferences
    pub fn with_default_settings(default_settings: UserSettings) -> Self {
        Self {
            default_settings,
            ..Self::default()
        }
    }

    /// Set a user's preferences
    pub fn set_settings(&mut self, user: Handle, settings: UserSettings) {
        self.settings.insert(user, settings);
    }

    /// Preferences in effect for a user
    pub fn settings(&self, user: &Handle) -> UserSettings {
        self.settings
            .get(user)
            .copied()
            .unwrap_or(self.default_settings)
    }

    /// Look up an edge
    pub fn edge(&self, user: &Handle, person: &Handle) -> Option<&RelationEdge> {
        self.edges.get(user).and_then(|edges| edges.get(person))
    }

    /// Does `user` ignore `person`?
    pub fn is_blocked(&self, user: &Handle, person: &Handle) -> bool {
        self.blocks
            .get(user)
            .is_some_and(|blocked| blocked.contains(person))
    }

    pub fn is_closed(&self, person: &Handle) -> bool {
        self.closed.contains(person)
    }

    /// Edge invariants, checked on every mutation
    fn validate(&self, edge: &RelationEdge) -> Result<(), ValidationError> {
        if edge.user == edge.person {
            return Err(ValidationError::SelfContact);
        }
        if self.closed.contains(&edge.person) {
            return Err(ValidationError::ClosedAccount(edge.person.clone()));
        }
        if edge.receiving && self.is_blocked(&edge.user, &edge.person) {
            return Err(ValidationError::BlockedParticipant(edge.person.clone()));
        }
        Ok(())
    }

    /// Validate and store an edge; empty edges are dropped
    fn commit(&mut self, edge: RelationEdge) -> Result<RelationEdge, ValidationError> {
        self.validate(&edge)?;

        if edge.is_empty() {
            if let Some(edges) = self.edges.get_mut(&edge.user) {
                edges.remove(&edge.person);
            }
        } else {
            self.edges
                .entry(edge.user.clone())
                .or_default()
                .insert(edge.person.clone(), edge.clone());
        }
        Ok(edge)
    }

    fn current(&self, user: &Handle, person: &Handle) -> RelationEdge {
        self.edge(user, person)
            .cloned()
            .unwrap_or_else(|| RelationEdge::new(user.clone(), person.clone()))
    }

    /// `person` starts sharing with `user`.
    ///
    /// Idempotent: when already sharing, the existing edge is returned
    /// unchanged. Users with auto follow back also start receiving, unless
    /// they ignore `person`.
    pub fn authorize(&mut self, user: &Handle, person: &Handle) -> Result<AuthorizeOutcome, ValidationError> {
        let mut edge = self.current(user, person);
        if edge.sharing {
            return Ok(AuthorizeOutcome::AlreadySharing(edge));
        }

        edge.sharing = true;
        if self.settings(user).auto_follow_back
            && !edge.receiving
            && !self.is_blocked(user, person)
        {
            tracing::debug!(%user, %person, "auto follow back");
            edge.receiving = true;
        }

        self.commit(edge).map(AuthorizeOutcome::Started)
    }

    /// `person` stops sharing with `user`
    pub fn revoke_authorization(&mut self, user: &Handle, person: &Handle) -> Option<RelationEdge> {
        let mut edge = self.edge(user, person)?.clone();
        edge.sharing = false;
        self.commit(edge).ok()
    }

    /// `user` starts sharing with `person`
    pub fn share_with(&mut self, user: &Handle, person: &Handle) -> Result<RelationEdge, ValidationError> {
        let mut edge = self.current(user, person);
        edge.receiving = true;
        self.commit(edge)
    }

    /// `user` stops sharing with `person`
    pub fn stop_sharing(&mut self, user: &Handle, person: &Handle) -> Option<RelationEdge> {
        let mut edge = self.edge(user, person)?.clone();
        edge.receiving = false;
        self.commit(edge).ok()
    }

    /// `user` ignores `person`; any sharing from `user` to `person` stops
    pub fn block(&mut self, user: &Handle, person: &Handle) -> Result<(), ValidationError> {
        if user == person {
            return Err(ValidationError::SelfContact);
        }

        self.stop_sharing(user, person);
        self.blocks
            .entry(user.clone())
            .or_default()
            .insert(person.clone());
        Ok(())
    }

    /// Lift an ignore
    pub fn unblock(&mut self, user: &Handle, person: &Handle) -> bool {
        self.blocks
            .get_mut(user)
            .is_some_and(|blocked| blocked.remove(person))
    }

    /// Mark an account closed and drop every edge that touches it
    pub fn close_account(&mut self, person: &Handle) -> usize {
        self.closed.insert(person.clone());

        let mut removed = self.edges.remove(person).map_or(0, |edges| edges.len());
        for edges in self.edges.values_mut() {
            if edges.remove(person).is_some() {
                removed += 1;
            }
        }
        removed
    }

    /// Relay recipients for an owner's objects: every participant the
    /// owner shares with. Owned, sorted snapshot.
    pub fn subscribers_of(&self, owner: &Handle) -> Vec<Handle> {
        self.edges
            .get(owner)
            .map(|edges| {
                edges
                    .values()
                    .filter(|edge| edge.receiving)
                    .map(|edge| edge.person.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Participants in a mutual relation with `user`
    pub fn mutual_contacts(&self, user: &Handle) -> Vec<Handle> {
        self.filtered(user, RelationEdge::mutual)
    }

    /// Participants sharing with `user` that `user` does not share back with
    pub fn only_sharing(&self, user: &Handle) -> Vec<Handle> {
        self.filtered(user, RelationEdge::only_sharing)
    }

    fn filtered(&self, user: &Handle, keep: fn(&RelationEdge) -> bool) -> Vec<Handle> {
        self.edges
            .get(user)
            .map(|edges| {
                edges
                    .values()
                    .filter(|edge| keep(edge))
                    .map(|edge| edge.person.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of edges a user holds
    pub fn edge_count(&self, user: &Handle) -> usize {
        self.edges.get(user).map_or(0, |edges| edges.len())
    }
}
