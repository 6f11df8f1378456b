//! Relayable store
//!
//! Keyed by guid, grouped by parent. Every parent has its own slot behind
//! a mutex; persisting a relayable and updating the parent's aggregate
//! happen inside that one critical section, so counters never observe a
//! half-applied write.
//!
//! Removal leaves a tombstone in the guid index: a late copy of a removed
//! relayable is never stored again, and a retraction that arrives before
//! its target is held until the target shows up.
//!
//! Lock order: parent slot, then guid index. The parent map lock is held
//! only to clone, insert or remove a slot handle, never while waiting on a
//! slot.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use spora_core::{
    Guid, Handle, ParentRef, RelayableKind, RelayableObject, Timestamp, ValidationError,
};

use crate::aggregate::{AggregateMaintainer, ParentAggregate};

/// A parent known to this pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentRecord {
    pub parent: ParentRef,
    /// Author of the parent, the countersigning authority
    pub owner: Handle,
    pub created_at: Timestamp,
}

/// Result of persisting a relayable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// Stored for the first time; aggregates updated
    Inserted,
    /// Guid already stored; nothing changed
    Duplicate,
    /// Guid was retracted, before or after arriving; nothing stored
    Retracted,
}

/// Result of recording a retraction whose target is not stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferOutcome {
    /// Held until the target arrives
    Deferred,
    /// Target already removed
    AlreadyRetracted,
    /// Target was stored in the meantime; retract it directly
    Stored,
}

/// A retraction received before its target
#[derive(Debug, Clone)]
struct PendingRetraction {
    kind: RelayableKind,
    signer: Handle,
}

#[derive(Default)]
struct GuidIndex {
    live: HashMap<Guid, ParentRef>,
    retracted: HashSet<Guid>,
    pending: HashMap<Guid, PendingRetraction>,
}

impl GuidIndex {
    fn tombstone(&mut self, guid: &Guid) {
        self.live.remove(guid);
        self.pending.remove(guid);
        self.retracted.insert(guid.clone());
    }
}

struct ParentSlot {
    record: ParentRecord,
    aggregate: ParentAggregate,
    children: HashMap<Guid, RelayableObject>,
    /// Set once the parent is destroyed; late writers holding the slot see it
    destroyed: bool,
}

impl ParentSlot {
    fn new(record: ParentRecord) -> Self {
        Self {
            record,
            aggregate: ParentAggregate::new(),
            children: HashMap::new(),
            destroyed: false,
        }
    }

    fn has_like_from(&self, author: &Handle) -> bool {
        self.children
            .values()
            .any(|o| o.kind() == RelayableKind::Like && o.author() == author)
    }
}

/// In-memory relayable store with per-parent serialization
#[derive(Default)]
pub struct RelayableStore {
    parents: RwLock<HashMap<ParentRef, Arc<Mutex<ParentSlot>>>>,
    index: Mutex<GuidIndex>,
}

impl RelayableStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, parent: &ParentRef) -> Option<Arc<Mutex<ParentSlot>>> {
        self.parents.read().get(parent).cloned()
    }

    /// Register a parent. Returns false if it was already known.
    pub fn register_parent(&self, record: ParentRecord) -> bool {
        let mut parents = self.parents.write();
        if parents.contains_key(&record.parent) {
            return false;
        }
        debug!(parent = %record.parent, owner = %record.owner, "parent registered");
        parents.insert(
            record.parent.clone(),
            Arc::new(Mutex::new(ParentSlot::new(record))),
        );
        true
    }

    pub fn parent(&self, parent: &ParentRef) -> Option<ParentRecord> {
        self.slot(parent).map(|slot| slot.lock().record.clone())
    }

    /// Owner of a known parent
    pub fn parent_owner(&self, parent: &ParentRef) -> Option<Handle> {
        self.slot(parent).map(|slot| slot.lock().record.owner.clone())
    }

    /// Snapshot of a parent's aggregate
    pub fn aggregate(&self, parent: &ParentRef) -> Option<ParentAggregate> {
        self.slot(parent).map(|slot| slot.lock().aggregate.clone())
    }

    /// Persist a verified relayable.
    ///
    /// Idempotent by guid. The parent must be known and must accept the
    /// relayable's kind; an author may like a parent at most once. A
    /// retracted guid is never stored again; a held retraction signed by
    /// the author or the parent owner is applied here.
    pub fn persist(
        &self,
        object: &RelayableObject,
        now: Timestamp,
    ) -> Result<PersistOutcome, ValidationError> {
        let parent = object.parent();
        let slot = self
            .slot(parent)
            .ok_or_else(|| ValidationError::ParentNotFound(parent.clone()))?;

        let mut slot = slot.lock();
        if slot.destroyed {
            return Err(ValidationError::ParentNotFound(parent.clone()));
        }
        if !parent.kind.accepts(object.kind()) {
            return Err(ValidationError::NotAttachable {
                kind: object.kind(),
                parent: parent.clone(),
            });
        }

        {
            let mut index = self.index.lock();
            if index.live.contains_key(object.guid()) {
                return Ok(PersistOutcome::Duplicate);
            }
            if index.retracted.contains(object.guid()) {
                return Ok(PersistOutcome::Retracted);
            }
            if let Some(pending) = index.pending.remove(object.guid()) {
                let authorized =
                    &pending.signer == object.author() || pending.signer == slot.record.owner;
                if authorized && pending.kind == object.kind() {
                    index.retracted.insert(object.guid().clone());
                    debug!(guid = %object.guid(), signer = %pending.signer, "held retraction applied");
                    return Ok(PersistOutcome::Retracted);
                }
            }
            if object.kind() == RelayableKind::Like && slot.has_like_from(object.author()) {
                return Err(ValidationError::DuplicateLike {
                    author: object.author().clone(),
                    parent: parent.clone(),
                });
            }
            index.live.insert(object.guid().clone(), parent.clone());
        }

        slot.children.insert(object.guid().clone(), object.clone());
        AggregateMaintainer::on_accepted(&mut slot.aggregate, parent.kind.rules(), object, now);

        // A comment is itself a likeable parent
        if object.kind() == RelayableKind::Comment {
            self.register_parent(ParentRecord {
                parent: ParentRef::comment(object.guid().clone()),
                owner: object.author().clone(),
                created_at: object.created_at(),
            });
        }

        Ok(PersistOutcome::Inserted)
    }

    /// Has `author` already liked `parent`?
    pub fn has_like_from(&self, parent: &ParentRef, author: &Handle) -> bool {
        self.slot(parent)
            .is_some_and(|slot| slot.lock().has_like_from(author))
    }

    pub fn contains(&self, guid: &Guid) -> bool {
        self.index.lock().live.contains_key(guid)
    }

    /// Was `guid` removed or retracted on this pod?
    pub fn is_retracted(&self, guid: &Guid) -> bool {
        self.index.lock().retracted.contains(guid)
    }

    /// Hold a verified retraction whose target is not stored. It is
    /// applied if the target later arrives and `signer` is its author or
    /// its parent's owner.
    pub fn defer_retraction(
        &self,
        target: &Guid,
        kind: RelayableKind,
        signer: &Handle,
    ) -> DeferOutcome {
        let mut index = self.index.lock();
        if index.retracted.contains(target) {
            return DeferOutcome::AlreadyRetracted;
        }
        if index.live.contains_key(target) {
            return DeferOutcome::Stored;
        }
        index.pending.insert(
            target.clone(),
            PendingRetraction {
                kind,
                signer: signer.clone(),
            },
        );
        DeferOutcome::Deferred
    }

    pub fn get(&self, guid: &Guid) -> Option<RelayableObject> {
        let parent = self.index.lock().live.get(guid).cloned()?;
        let slot = self.slot(&parent)?;
        let slot = slot.lock();
        slot.children.get(guid).cloned()
    }

    /// Remove one relayable, decrementing its parent's aggregate.
    /// Removing a comment also destroys the likes attached to it.
    pub fn remove(&self, guid: &Guid) -> Option<RelayableObject> {
        let parent = self.index.lock().live.get(guid).cloned()?;
        let slot = self.slot(&parent)?;

        let removed = {
            let mut slot = slot.lock();
            let object = slot.children.remove(guid)?;
            self.index.lock().tombstone(guid);
            AggregateMaintainer::on_removed(&mut slot.aggregate, &object);
            object
        };

        if removed.kind() == RelayableKind::Comment {
            self.destroy_parent(&ParentRef::comment(guid.clone()));
        }
        debug!(guid = %guid, parent = %parent, "relayable removed");
        Some(removed)
    }

    /// Destroy a parent and every relayable attached to it, recursively.
    /// Returns the removed relayables.
    pub fn destroy_parent(&self, parent: &ParentRef) -> Vec<RelayableObject> {
        let Some(slot) = self.parents.write().remove(parent) else {
            return Vec::new();
        };

        let children: Vec<RelayableObject> = {
            let mut slot = slot.lock();
            slot.destroyed = true;
            let children: Vec<_> = slot.children.drain().map(|(_, o)| o).collect();
            let mut index = self.index.lock();
            for child in &children {
                index.tombstone(child.guid());
            }
            slot.aggregate = ParentAggregate::new();
            children
        };

        let mut removed = Vec::with_capacity(children.len());
        for child in children {
            if child.kind() == RelayableKind::Comment {
                removed.extend(self.destroy_parent(&ParentRef::comment(child.guid().clone())));
            }
            removed.push(child);
        }
        debug!(parent = %parent, removed = removed.len(), "parent destroyed");
        removed
    }

    /// Relayables on a parent in presentation order: creation time, then guid
    pub fn relayables_for(&self, parent: &ParentRef) -> Vec<RelayableObject> {
        let Some(slot) = self.slot(parent) else {
            return Vec::new();
        };
        let mut objects: Vec<_> = slot.lock().children.values().cloned().collect();
        objects.sort_by(|a, b| a.presentation_key().cmp(&b.presentation_key()));
        objects
    }

    /// Rebuild a parent's counters from its persisted relayables.
    /// Returns the corrected aggregate.
    pub fn recount(&self, parent: &ParentRef) -> Option<ParentAggregate> {
        let slot = self.slot(parent)?;
        let mut slot = slot.lock();
        let ParentSlot {
            aggregate,
            children,
            ..
        } = &mut *slot;
        AggregateMaintainer::recount(aggregate, children.values());
        Some(aggregate.clone())
    }

    /// Number of stored relayables
    pub fn len(&self) -> usize {
        self.index.lock().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every known parent record
    pub fn parents(&self) -> Vec<ParentRecord> {
        let slots: Vec<_> = self.parents.read().values().cloned().collect();
        slots.iter().map(|slot| slot.lock().record.clone()).collect()
    }

    /// Every stored relayable, unordered
    pub fn snapshot(&self) -> Vec<RelayableObject> {
        let slots: Vec<_> = self.parents.read().values().cloned().collect();
        slots
            .iter()
            .flat_map(|slot| slot.lock().children.values().cloned().collect::<Vec<_>>())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use spora_core::{Payload, RelayableDraft, Signature};

    fn handle(s: &str) -> Handle {
        Handle::parse(s).unwrap()
    }

    fn guid(n: u32) -> Guid {
        Guid::parse(&format!("object{:012}", n)).unwrap()
    }

    fn post() -> ParentRef {
        ParentRef::post(Guid::parse("post000000000000001").unwrap())
    }

    fn store_with_post() -> RelayableStore {
        let store = RelayableStore::new();
        assert!(store.register_parent(ParentRecord {
            parent: post(),
            owner: handle("bob@b.example"),
            created_at: Timestamp::from_secs(1),
        }));
        store
    }

    fn object(n: u32, parent: ParentRef, author: &str, payload: Payload) -> RelayableObject {
        RelayableObject::new(
            RelayableDraft {
                guid: guid(n),
                parent,
                author: handle(author),
                payload,
                created_at: Timestamp::from_secs(100 - n as i64),
            },
            Signature([1u8; 64]),
            None,
        )
    }

    #[test]
    fn test_persist_is_idempotent() {
        let store = store_with_post();
        let comment = object(1, post(), "alice@a.example", Payload::comment("hi"));

        let now = Timestamp::from_secs(10);
        assert_eq!(store.persist(&comment, now), Ok(PersistOutcome::Inserted));
        assert_eq!(store.persist(&comment, now), Ok(PersistOutcome::Duplicate));

        let aggregate = store.aggregate(&post()).unwrap();
        assert_eq!(aggregate.comments_count, 1);
        assert_eq!(aggregate.interacted_at, Some(now));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_unknown_parent_rejected() {
        let store = RelayableStore::new();
        let comment = object(1, post(), "alice@a.example", Payload::comment("hi"));
        assert_eq!(
            store.persist(&comment, Timestamp::ZERO),
            Err(ValidationError::ParentNotFound(post()))
        );
    }

    #[test]
    fn test_comment_on_comment_not_attachable() {
        let store = store_with_post();
        let comment = object(1, post(), "alice@a.example", Payload::comment("hi"));
        store.persist(&comment, Timestamp::ZERO).unwrap();

        let reply = object(
            2,
            ParentRef::comment(guid(1)),
            "bob@b.example",
            Payload::comment("reply"),
        );
        assert!(matches!(
            store.persist(&reply, Timestamp::ZERO),
            Err(ValidationError::NotAttachable { .. })
        ));
    }

    #[test]
    fn test_one_like_per_author() {
        let store = store_with_post();
        let first = object(1, post(), "alice@a.example", Payload::Like);
        let second = object(2, post(), "alice@a.example", Payload::Like);

        store.persist(&first, Timestamp::ZERO).unwrap();
        assert!(matches!(
            store.persist(&second, Timestamp::ZERO),
            Err(ValidationError::DuplicateLike { .. })
        ));
        assert_eq!(store.aggregate(&post()).unwrap().likes_count, 1);
    }

    #[test]
    fn test_relayables_ordered_by_creation() {
        let store = store_with_post();
        for n in 1..=5 {
            let c = object(n, post(), "alice@a.example", Payload::comment(format!("c{}", n)));
            store.persist(&c, Timestamp::ZERO).unwrap();
        }
        let listed: Vec<_> = store
            .relayables_for(&post())
            .iter()
            .map(|o| o.created_at())
            .collect();
        let mut sorted = listed.clone();
        sorted.sort();
        assert_eq!(listed, sorted);
        assert_eq!(listed.len(), 5);
    }

    #[test]
    fn test_remove_comment_cascades_to_likes() {
        let store = store_with_post();
        let comment = object(1, post(), "alice@a.example", Payload::comment("hi"));
        store.persist(&comment, Timestamp::ZERO).unwrap();

        let like = object(2, ParentRef::comment(guid(1)), "bob@b.example", Payload::Like);
        store.persist(&like, Timestamp::ZERO).unwrap();
        assert_eq!(
            store.parent_owner(&ParentRef::comment(guid(1))),
            Some(handle("alice@a.example"))
        );

        let removed = store.remove(&guid(1)).unwrap();
        assert_eq!(removed.guid(), &guid(1));
        assert!(!store.contains(&guid(2)));
        assert!(store.parent(&ParentRef::comment(guid(1))).is_none());
        assert_eq!(store.aggregate(&post()).unwrap().comments_count, 0);
        assert!(store.is_empty());
    }

    #[test]
    fn test_destroy_parent_removes_everything() {
        let store = store_with_post();
        store
            .persist(&object(1, post(), "alice@a.example", Payload::comment("a")), Timestamp::ZERO)
            .unwrap();
        store
            .persist(&object(2, post(), "carol@c.example", Payload::Like), Timestamp::ZERO)
            .unwrap();
        store
            .persist(
                &object(3, ParentRef::comment(guid(1)), "carol@c.example", Payload::Like),
                Timestamp::ZERO,
            )
            .unwrap();

        let removed = store.destroy_parent(&post());
        assert_eq!(removed.len(), 3);
        assert!(store.is_empty());
        assert!(store.parent(&post()).is_none());

        let late = object(4, post(), "dave@d.example", Payload::Like);
        assert!(store.persist(&late, Timestamp::ZERO).is_err());
    }

    #[test]
    fn test_concurrent_persist_keeps_counts_exact() {
        let store = store_with_post();
        let objects: Vec<_> = (0..64)
            .map(|n| object(n, post(), "alice@a.example", Payload::comment(format!("c{}", n))))
            .collect();

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for o in &objects {
                        store.persist(o, Timestamp::ZERO).unwrap();
                    }
                });
            }
        });

        assert_eq!(store.aggregate(&post()).unwrap().comments_count, 64);
        assert_eq!(store.len(), 64);
    }

    #[test]
    fn test_concurrent_persist_and_remove_keep_counts_exact() {
        let store = store_with_post();
        // Every fourth object is a like from its own author
        let make = |n: u32| {
            if n % 4 == 0 {
                object(n, post(), &format!("liker{}@l.example", n), Payload::Like)
            } else {
                let author = AUTHORS[n as usize % AUTHORS.len()];
                object(n, post(), author, Payload::comment(format!("c{}", n)))
            }
        };
        for n in 0..64 {
            store.persist(&make(n), Timestamp::ZERO).unwrap();
        }

        std::thread::scope(|scope| {
            for t in 0..4u32 {
                let store = &store;
                let make = &make;
                scope.spawn(move || {
                    for n in (0..64u32).filter(|n| n % 4 == t) {
                        if n % 2 == 1 {
                            assert!(store.remove(&guid(n)).is_some());
                        }
                        assert_eq!(
                            store.persist(&make(64 + n), Timestamp::ZERO),
                            Ok(PersistOutcome::Inserted)
                        );
                    }
                });
            }
        });

        let children = store.relayables_for(&post());
        assert_eq!(children.len(), 96);

        let aggregate = store.aggregate(&post()).unwrap();
        let comments = children.iter().filter(|o| o.kind() == RelayableKind::Comment).count();
        let likes = children.iter().filter(|o| o.kind() == RelayableKind::Like).count();
        assert_eq!(aggregate.comments_count, comments as u64);
        assert_eq!(aggregate.likes_count, likes as u64);

        let mut authors: Vec<_> = children.iter().map(|o| o.author().clone()).collect();
        authors.sort();
        authors.dedup();
        let participants: Vec<_> = aggregate.participants().cloned().collect();
        assert_eq!(participants, authors);
    }

    #[test]
    fn test_removed_guid_is_never_stored_again() {
        let store = store_with_post();
        let comment = object(1, post(), "alice@a.example", Payload::comment("hi"));
        store.persist(&comment, Timestamp::ZERO).unwrap();
        store.remove(&guid(1)).unwrap();

        assert!(store.is_retracted(&guid(1)));
        assert_eq!(store.persist(&comment, Timestamp::ZERO), Ok(PersistOutcome::Retracted));
        assert_eq!(store.aggregate(&post()).unwrap().comments_count, 0);
        assert!(!store.contains(&guid(1)));
    }

    #[test]
    fn test_destroyed_children_are_tombstoned() {
        let store = store_with_post();
        let comment = object(1, post(), "alice@a.example", Payload::comment("hi"));
        let like = object(2, ParentRef::comment(guid(1)), "carol@c.example", Payload::Like);
        store.persist(&comment, Timestamp::ZERO).unwrap();
        store.persist(&like, Timestamp::ZERO).unwrap();

        store.destroy_parent(&post());
        assert!(store.is_retracted(&guid(1)));
        assert!(store.is_retracted(&guid(2)));
    }

    #[test]
    fn test_held_retraction_applies_on_arrival() {
        let store = store_with_post();
        let alice = handle("alice@a.example");

        assert_eq!(
            store.defer_retraction(&guid(1), RelayableKind::Comment, &alice),
            DeferOutcome::Deferred
        );
        let comment = object(1, post(), "alice@a.example", Payload::comment("hi"));
        assert_eq!(store.persist(&comment, Timestamp::ZERO), Ok(PersistOutcome::Retracted));
        assert_eq!(store.aggregate(&post()).unwrap().comments_count, 0);
        assert_eq!(
            store.defer_retraction(&guid(1), RelayableKind::Comment, &alice),
            DeferOutcome::AlreadyRetracted
        );

        // The parent owner may retract too
        store.defer_retraction(&guid(2), RelayableKind::Like, &handle("bob@b.example"));
        let like = object(2, post(), "carol@c.example", Payload::Like);
        assert_eq!(store.persist(&like, Timestamp::ZERO), Ok(PersistOutcome::Retracted));
    }

    #[test]
    fn test_held_retraction_by_stranger_is_dropped() {
        let store = store_with_post();
        store.defer_retraction(&guid(1), RelayableKind::Comment, &handle("mallory@m.example"));
        let comment = object(1, post(), "alice@a.example", Payload::comment("hi"));
        assert_eq!(store.persist(&comment, Timestamp::ZERO), Ok(PersistOutcome::Inserted));

        assert_eq!(
            store.defer_retraction(&guid(1), RelayableKind::Comment, &handle("alice@a.example")),
            DeferOutcome::Stored
        );
        assert_eq!(store.aggregate(&post()).unwrap().comments_count, 1);
    }

    #[test]
    fn test_recount_matches_incremental() {
        let store = store_with_post();
        store
            .persist(&object(1, post(), "alice@a.example", Payload::comment("a")), Timestamp::ZERO)
            .unwrap();
        store
            .persist(&object(2, post(), "carol@c.example", Payload::Like), Timestamp::ZERO)
            .unwrap();

        let incremental = store.aggregate(&post()).unwrap();
        let recounted = store.recount(&post()).unwrap();
        assert_eq!(incremental, recounted);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Comment(u32),
        Like(u32),
        Remove(u32),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u32..16).prop_map(Op::Comment),
            (0u32..16).prop_map(Op::Like),
            (0u32..16).prop_map(Op::Remove),
        ]
    }

    const AUTHORS: [&str; 3] = ["alice@a.example", "carol@c.example", "dave@d.example"];

    proptest! {
        #[test]
        fn prop_counters_match_stored_children(ops in prop::collection::vec(op_strategy(), 0..64)) {
            let store = store_with_post();
            for op in ops {
                match op {
                    Op::Comment(n) => {
                        let author = AUTHORS[n as usize % AUTHORS.len()];
                        let _ = store.persist(&object(n, post(), author, Payload::comment("x")), Timestamp::ZERO);
                    }
                    Op::Like(n) => {
                        let author = AUTHORS[n as usize % AUTHORS.len()];
                        let _ = store.persist(&object(n, post(), author, Payload::Like), Timestamp::ZERO);
                    }
                    Op::Remove(n) => {
                        store.remove(&guid(n));
                    }
                }
            }

            let children = store.relayables_for(&post());
            let aggregate = store.aggregate(&post()).unwrap();
            let comments = children.iter().filter(|o| o.kind() == RelayableKind::Comment).count();
            let likes = children.iter().filter(|o| o.kind() == RelayableKind::Like).count();
            prop_assert_eq!(aggregate.comments_count, comments as u64);
            prop_assert_eq!(aggregate.likes_count, likes as u64);
            for author in aggregate.participants() {
                prop_assert!(children.iter().any(|o| o.author() == author));
            }
        }
    }
}
