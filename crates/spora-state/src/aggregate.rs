//! Parent aggregates
//!
//! Denormalized counters on a parent, written only by the maintainer in
//! response to relayables being accepted or removed. Callers serialize
//! access per parent; the maintainer itself holds no locks.

use std::collections::BTreeMap;

use spora_core::{Handle, ParentRules, RelayableKind, RelayableObject, Timestamp};

/// Derived state on a parent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParentAggregate {
    pub comments_count: u64,
    pub likes_count: u64,
    /// Last accepted interaction, for parents that track it
    pub interacted_at: Option<Timestamp>,
    /// Author -> number of their relayables on this parent
    participants: BTreeMap<Handle, u32>,
}

impl ParentAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter for one relayable kind
    pub fn count(&self, kind: RelayableKind) -> u64 {
        match kind {
            RelayableKind::Comment => self.comments_count,
            RelayableKind::Like => self.likes_count,
        }
    }

    fn count_mut(&mut self, kind: RelayableKind) -> &mut u64 {
        match kind {
            RelayableKind::Comment => &mut self.comments_count,
            RelayableKind::Like => &mut self.likes_count,
        }
    }

    /// Does `author` currently participate in this thread?
    pub fn is_participant(&self, author: &Handle) -> bool {
        self.participants.contains_key(author)
    }

    /// Participating authors, sorted
    pub fn participants(&self) -> impl Iterator<Item = &Handle> {
        self.participants.keys()
    }
}

/// Applies accepted / removed relayables to parent aggregates
pub struct AggregateMaintainer;

impl AggregateMaintainer {
    /// A relayable was durably accepted for the first time
    pub fn on_accepted(
        aggregate: &mut ParentAggregate,
        rules: &ParentRules,
        object: &RelayableObject,
        now: Timestamp,
    ) {
        *aggregate.count_mut(object.kind()) += 1;

        if rules.tracks_interaction {
            aggregate.interacted_at = Some(aggregate.interacted_at.map_or(now, |t| t.max(now)));
        }

        *aggregate
            .participants
            .entry(object.author().clone())
            .or_insert(0) += 1;
    }

    /// A relayable was removed. Clears the author's participant marker
    /// when this was their last relayable on the parent.
    pub fn on_removed(aggregate: &mut ParentAggregate, object: &RelayableObject) {
        let count = aggregate.count_mut(object.kind());
        *count = count.saturating_sub(1);

        if let Some(n) = aggregate.participants.get_mut(object.author()) {
            *n = n.saturating_sub(1);
            if *n == 0 {
                aggregate.participants.remove(object.author());
            }
        }
    }

    /// Rebuild counters and participants from the persisted relayables.
    /// `interacted_at` is kept.
    pub fn recount<'a>(
        aggregate: &mut ParentAggregate,
        objects: impl IntoIterator<Item = &'a RelayableObject>,
    ) {
        let interacted_at = aggregate.interacted_at;
        *aggregate = ParentAggregate::default();
        aggregate.interacted_at = interacted_at;

        for object in objects {
            *aggregate.count_mut(object.kind()) += 1;
            *aggregate
                .participants
                .entry(object.author().clone())
                .or_insert(0) += 1;
        }
    }
}
