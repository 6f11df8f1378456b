//! Spora Pod - Relay engine
//!
//! One pod hosts a set of users. For every relayable it sees, the pod
//! walks `Received -> Verified -> Persisted -> Relayed`, where the last
//! step only happens on the pod hosting the parent's owner.
//!
//! Locks on the store and the relation graph are never held while a
//! delivery or a countersign request is in flight.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, trace, warn};

use spora_core::{
    Guid, Handle, ParentRef, Payload, ReceiveOutcome, RejectReason, RelayableDraft,
    RelayableObject, Signature, SporaError, SporaResult, Timestamp, ValidationError,
};
use spora_crypto::{countersign, sign_as_author, sign_retraction, KeyDirectory, RelayableVerifier};
use spora_graph::{RelationGraph, UserSettings};
use spora_state::{
    ActivityStats, DeferOutcome, ParentAggregate, ParentRecord, PersistOutcome, RelayableStore,
};
use spora_wire::{Envelope, Retraction};

use crate::config::PodConfig;
use crate::delivery::{fan_out, CountersignRequest, CountersignSource, Deliverer, FanoutReport};
use crate::logging::AUDIT_TARGET;

/// Relay engine counters
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    /// Inbound deliveries, any outcome
    pub received: u64,
    pub accepted: u64,
    pub duplicates: u64,
    pub rejected: u64,
    /// Relayables created by local users
    pub created: u64,
    /// Local retractions
    pub retracted: u64,
    /// Countersignatures issued for parents owned here
    pub countersigned: u64,
    pub fanout_attempts: u64,
    pub fanout_failures: u64,
}

/// Result of a local creation
#[derive(Clone, Debug)]
pub struct CreateReport {
    pub object: RelayableObject,
    /// Fan-out (authoritative pod) or forward to the parent owner
    pub dispatch: FanoutReport,
}

/// Result of one inbound delivery
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceiveReport {
    pub outcome: ReceiveOutcome,
    /// Relay attempts, empty unless this pod relayed
    pub fanout: FanoutReport,
}

impl ReceiveReport {
    fn settled(outcome: ReceiveOutcome) -> Self {
        ReceiveReport {
            outcome,
            fanout: FanoutReport::default(),
        }
    }
}

/// Result of a local retraction
#[derive(Clone, Debug)]
pub struct RetractReport {
    pub removed: RelayableObject,
    pub dispatch: FanoutReport,
}

/// A federated pod
pub struct Pod {
    config: PodConfig,
    directory: Arc<KeyDirectory>,
    graph: RwLock<RelationGraph>,
    store: RelayableStore,
    deliverer: Arc<dyn Deliverer>,
    countersigner: Arc<dyn CountersignSource>,
    stats: Mutex<RuntimeStats>,
}

impl Pod {
    pub fn new(
        config: PodConfig,
        directory: Arc<KeyDirectory>,
        deliverer: Arc<dyn Deliverer>,
        countersigner: Arc<dyn CountersignSource>,
    ) -> Self {
        let graph = RelationGraph::with_default_settings(UserSettings {
            auto_follow_back: config.auto_follow_back,
        });
        info!(domain = %config.domain, "pod started");
        Pod {
            config,
            directory,
            graph: RwLock::new(graph),
            store: RelayableStore::new(),
            deliverer,
            countersigner,
            stats: Mutex::new(RuntimeStats::default()),
        }
    }

    pub fn domain(&self) -> &str {
        &self.config.domain
    }

    pub fn config(&self) -> &PodConfig {
        &self.config
    }

    pub fn directory(&self) -> &Arc<KeyDirectory> {
        &self.directory
    }

    pub fn store(&self) -> &RelayableStore {
        &self.store
    }

    pub fn graph(&self) -> RwLockReadGuard<'_, RelationGraph> {
        self.graph.read()
    }

    /// Edit the relation graph. Do not hold across an await.
    pub fn graph_mut(&self) -> RwLockWriteGuard<'_, RelationGraph> {
        self.graph.write()
    }

    pub fn stats(&self) -> RuntimeStats {
        self.stats.lock().clone()
    }

    pub fn activity(&self) -> ActivityStats<'_> {
        ActivityStats::new(&self.store)
    }

    /// Is `handle` a user of this pod?
    #[inline]
    pub fn hosts(&self, handle: &Handle) -> bool {
        handle.is_hosted_on(&self.config.domain)
    }

    /// Make a parent known to this pod. Posts federate outside the relay
    /// protocol; this is where they land.
    pub fn register_parent(&self, parent: ParentRef, owner: Handle, created_at: Timestamp) -> bool {
        self.store.register_parent(ParentRecord {
            parent,
            owner,
            created_at,
        })
    }

    pub fn aggregate(&self, parent: &ParentRef) -> Option<ParentAggregate> {
        self.store.aggregate(parent)
    }

    pub fn relayables_for(&self, parent: &ParentRef) -> Vec<RelayableObject> {
        self.store.relayables_for(parent)
    }

    /// Destroy a parent, cascading to every relayable attached to it
    pub fn destroy_parent(&self, parent: &ParentRef) -> Vec<RelayableObject> {
        let removed = self.store.destroy_parent(parent);
        info!(parent = %parent, removed = removed.len(), "parent destroyed");
        removed
    }

    // ------------------------------------------------------------------
    // Local creation
    // ------------------------------------------------------------------

    /// Create a comment or like on behalf of a local user.
    ///
    /// The parent owner's signature is obtained before anything is
    /// stored: directly when the owner is hosted here, otherwise from the
    /// owner's pod. If it cannot be obtained, nothing is persisted.
    pub async fn create_relayable(
        &self,
        author: &Handle,
        parent: ParentRef,
        payload: Payload,
    ) -> SporaResult<CreateReport> {
        self.local_user(author)?;
        let payload = payload.normalized(self.config.max_comment_length)?;

        let owner = self
            .store
            .parent_owner(&parent)
            .ok_or_else(|| ValidationError::ParentNotFound(parent.clone()))?;
        if !parent.kind.accepts(payload.kind()) {
            return Err(ValidationError::NotAttachable {
                kind: payload.kind(),
                parent,
            }
            .into());
        }
        if payload == Payload::Like && self.store.has_like_from(&parent, author) {
            return Err(ValidationError::DuplicateLike {
                author: author.clone(),
                parent,
            }
            .into());
        }

        let draft = RelayableDraft::new(author.clone(), parent, payload);
        let author_signature = sign_as_author(&self.directory, &draft)?;

        let parent_author_signature = if *author == owner {
            None
        } else {
            let request = CountersignRequest {
                draft: draft.clone(),
                author_signature,
            };
            Some(self.acquire_countersign(&owner, &request).await?)
        };

        let object = RelayableObject::new(draft, author_signature, parent_author_signature);
        let envelope = Envelope::Relayable(object.clone()).encode()?;

        match self.store.persist(&object, Timestamp::now())? {
            PersistOutcome::Inserted => {}
            PersistOutcome::Duplicate | PersistOutcome::Retracted => {
                debug!(guid = %object.guid(), "created relayable already stored");
            }
        }
        self.stats.lock().created += 1;
        info!(
            guid = %object.guid(),
            parent = %object.parent(),
            author = %author,
            kind = %object.kind(),
            "relayable created"
        );

        let dispatch = if self.hosts(&owner) {
            let recipients = self.relay_targets(&owner, &[author]);
            self.dispatch(&owner, recipients, envelope).await
        } else {
            self.dispatch(author, vec![owner], envelope).await
        };

        Ok(CreateReport { object, dispatch })
    }

    /// `handle` must be a user of this pod with an account here
    fn local_user(&self, handle: &Handle) -> SporaResult<()> {
        if !self.hosts(handle) {
            return Err(SporaError::NoPrivateKey(handle.clone()));
        }
        if !self.directory.is_local(handle) {
            return Err(SporaError::UnknownParticipant(handle.clone()));
        }
        Ok(())
    }

    async fn acquire_countersign(
        &self,
        owner: &Handle,
        request: &CountersignRequest,
    ) -> SporaResult<Signature> {
        if self.hosts(owner) {
            return self.countersign(request);
        }

        self.countersigner
            .request_countersign(owner, request)
            .await
            .map_err(|e| match e {
                e @ (SporaError::CountersignRefused(_)
                | SporaError::CountersignUnavailable { .. }) => e,
                e => SporaError::CountersignUnavailable {
                    owner: owner.clone(),
                    reason: e.to_string(),
                },
            })
    }

    /// Owner side of countersigning: sign a draft on a parent owned by a
    /// user of this pod.
    pub fn countersign(&self, request: &CountersignRequest) -> SporaResult<Signature> {
        let draft = &request.draft;
        let owner = self
            .store
            .parent_owner(&draft.parent)
            .ok_or_else(|| ValidationError::ParentNotFound(draft.parent.clone()))?;

        if !self.hosts(&owner) {
            return Err(SporaError::CountersignRefused(format!(
                "{} is not hosted on {}",
                owner, self.config.domain
            )));
        }
        let identity = self.directory.identity(&owner)?;

        RelayableVerifier::new(&self.directory)
            .verify_author(draft, &request.author_signature)
            .map_err(|_| SporaError::InvalidSignature)?;

        if !draft.parent.kind.accepts(draft.kind()) {
            return Err(ValidationError::NotAttachable {
                kind: draft.kind(),
                parent: draft.parent.clone(),
            }
            .into());
        }
        draft.payload.clone().normalized(self.config.max_comment_length)?;

        if self.graph.read().is_blocked(&owner, &draft.author) {
            warn!(
                target: AUDIT_TARGET,
                guid = %draft.guid,
                owner = %owner,
                author = %draft.author,
                "countersign refused: author is blocked"
            );
            return Err(SporaError::CountersignRefused(format!(
                "{} does not accept relayables from {}",
                owner, draft.author
            )));
        }

        self.stats.lock().countersigned += 1;
        debug!(guid = %draft.guid, owner = %owner, "countersigned");
        Ok(countersign(&identity, draft))
    }

    // ------------------------------------------------------------------
    // Local retraction
    // ------------------------------------------------------------------

    /// Retract a relayable. Allowed for its author and for the owner of
    /// its parent; the actor must be hosted here.
    pub async fn retract(&self, actor: &Handle, guid: &Guid) -> SporaResult<RetractReport> {
        let object = self
            .store
            .get(guid)
            .ok_or_else(|| SporaError::NotFound(guid.clone()))?;
        let owner = self.store.parent_owner(object.parent());

        if actor != object.author() && owner.as_ref() != Some(actor) {
            return Err(SporaError::NotAuthor {
                guid: guid.clone(),
                handle: actor.clone(),
            });
        }
        self.local_user(actor)?;

        let retraction = Retraction {
            target: guid.clone(),
            kind: object.kind(),
            author: actor.clone(),
            signature: sign_retraction(&self.directory, guid, object.kind(), actor)?,
        };
        let envelope = Envelope::Retraction(retraction).encode()?;

        let removed = self
            .store
            .remove(guid)
            .ok_or_else(|| SporaError::NotFound(guid.clone()))?;
        self.stats.lock().retracted += 1;
        info!(guid = %guid, actor = %actor, "relayable retracted");

        let dispatch = match owner {
            Some(owner) if self.hosts(&owner) => {
                let mut recipients = self.relay_targets(&owner, &[actor]);
                if removed.author() != actor && !recipients.contains(removed.author()) {
                    recipients.push(removed.author().clone());
                }
                self.dispatch(&owner, recipients, envelope).await
            }
            Some(owner) => self.dispatch(actor, vec![owner], envelope).await,
            None => FanoutReport::default(),
        };

        Ok(RetractReport { removed, dispatch })
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    /// Process one inbound delivery from `sender`
    pub async fn receive(&self, sender: &Handle, data: &[u8]) -> ReceiveReport {
        self.stats.lock().received += 1;

        let report = match Envelope::decode(data) {
            Ok(Envelope::Relayable(object)) => self.receive_relayable(sender, object).await,
            Ok(Envelope::Retraction(retraction)) => {
                self.receive_retraction(sender, retraction).await
            }
            Err(e) => {
                warn!(target: AUDIT_TARGET, sender = %sender, error = %e, "undecodable delivery");
                ReceiveReport::settled(ReceiveOutcome::Rejected(RejectReason::Malformed(
                    e.to_string(),
                )))
            }
        };

        let mut stats = self.stats.lock();
        match report.outcome {
            ReceiveOutcome::Accepted => stats.accepted += 1,
            ReceiveOutcome::Duplicate => stats.duplicates += 1,
            ReceiveOutcome::Rejected(_) => stats.rejected += 1,
        }
        drop(stats);

        report
    }

    async fn receive_relayable(&self, sender: &Handle, object: RelayableObject) -> ReceiveReport {
        let outcome = match self.accept_relayable(&object) {
            Ok(outcome) => outcome,
            Err(reason) => {
                warn!(
                    target: AUDIT_TARGET,
                    guid = %object.guid(),
                    parent = %object.parent(),
                    author = %object.author(),
                    sender = %sender,
                    reason = %reason,
                    "relayable rejected"
                );
                return ReceiveReport::settled(ReceiveOutcome::Rejected(reason));
            }
        };

        let owner = match (outcome, self.store.parent_owner(object.parent())) {
            (PersistOutcome::Duplicate, _) => {
                trace!(guid = %object.guid(), sender = %sender, "duplicate relayable");
                return ReceiveReport::settled(ReceiveOutcome::Duplicate);
            }
            (PersistOutcome::Retracted, _) => {
                debug!(guid = %object.guid(), sender = %sender, "relayable already retracted");
                return ReceiveReport::settled(ReceiveOutcome::Duplicate);
            }
            (PersistOutcome::Inserted, Some(owner)) => owner,
            (PersistOutcome::Inserted, None) => {
                return ReceiveReport::settled(ReceiveOutcome::Accepted);
            }
        };
        debug!(
            guid = %object.guid(),
            parent = %object.parent(),
            author = %object.author(),
            "relayable accepted"
        );

        if !self.hosts(&owner) {
            return ReceiveReport::settled(ReceiveOutcome::Accepted);
        }

        let fanout = match Envelope::Relayable(object.clone()).encode() {
            Ok(envelope) => {
                let recipients = self.relay_targets(&owner, &[object.author(), sender]);
                self.dispatch(&owner, recipients, envelope).await
            }
            Err(e) => {
                warn!(guid = %object.guid(), error = %e, "cannot re-encode for relay");
                FanoutReport::default()
            }
        };

        ReceiveReport {
            outcome: ReceiveOutcome::Accepted,
            fanout,
        }
    }

    /// Verify and persist. Nothing is written unless every check passes.
    fn accept_relayable(&self, object: &RelayableObject) -> Result<PersistOutcome, RejectReason> {
        let parent = object.parent();
        let owner = self
            .store
            .parent_owner(parent)
            .ok_or(RejectReason::UnauthorizedParentLink)?;
        if !parent.kind.accepts(object.kind()) {
            return Err(RejectReason::UnauthorizedParentLink);
        }

        RelayableVerifier::new(&self.directory)
            .verify(object, &owner)
            .map_err(RejectReason::BadSignature)?;

        let normalized = object
            .payload()
            .clone()
            .normalized(self.config.max_comment_length)
            .map_err(|e| RejectReason::InvalidPayload(e.to_string()))?;
        if normalized != *object.payload() {
            return Err(RejectReason::InvalidPayload(
                "comment text is not trimmed".into(),
            ));
        }

        match self.store.persist(object, Timestamp::now()) {
            Ok(outcome) => Ok(outcome),
            Err(ValidationError::ParentNotFound(_)) | Err(ValidationError::NotAttachable { .. }) => {
                Err(RejectReason::UnauthorizedParentLink)
            }
            Err(e) => Err(RejectReason::InvalidPayload(e.to_string())),
        }
    }

    async fn receive_retraction(&self, sender: &Handle, retraction: Retraction) -> ReceiveReport {
        let reject = |reason: RejectReason| {
            warn!(
                target: AUDIT_TARGET,
                guid = %retraction.target,
                signer = %retraction.author,
                sender = %sender,
                reason = %reason,
                "retraction rejected"
            );
            ReceiveReport::settled(ReceiveOutcome::Rejected(reason))
        };

        if let Err(fault) = RelayableVerifier::new(&self.directory).verify_retraction(
            &retraction.target,
            retraction.kind,
            &retraction.author,
            &retraction.signature,
        ) {
            return reject(RejectReason::BadSignature(fault));
        }

        let object = match self.store.get(&retraction.target) {
            Some(object) => object,
            None => match self.store.defer_retraction(
                &retraction.target,
                retraction.kind,
                &retraction.author,
            ) {
                DeferOutcome::Deferred => {
                    debug!(
                        guid = %retraction.target,
                        signer = %retraction.author,
                        "retraction held for absent target"
                    );
                    return ReceiveReport::settled(ReceiveOutcome::Accepted);
                }
                DeferOutcome::AlreadyRetracted => {
                    trace!(guid = %retraction.target, "retraction target already removed");
                    return ReceiveReport::settled(ReceiveOutcome::Duplicate);
                }
                DeferOutcome::Stored => match self.store.get(&retraction.target) {
                    Some(object) => object,
                    None => return ReceiveReport::settled(ReceiveOutcome::Duplicate),
                },
            },
        };
        if object.kind() != retraction.kind {
            return reject(RejectReason::Malformed(format!(
                "retraction names a {}, target is a {}",
                retraction.kind,
                object.kind()
            )));
        }

        let owner = self.store.parent_owner(object.parent());
        if retraction.author != *object.author() && owner.as_ref() != Some(&retraction.author) {
            return reject(RejectReason::UnauthorizedRetraction);
        }

        let Some(removed) = self.store.remove(&retraction.target) else {
            return ReceiveReport::settled(ReceiveOutcome::Duplicate);
        };
        debug!(guid = %retraction.target, signer = %retraction.author, "retraction accepted");

        let fanout = match owner {
            Some(owner) if self.hosts(&owner) => {
                let mut recipients = self.relay_targets(&owner, &[&retraction.author, sender]);
                let author = removed.author();
                if author != &retraction.author && author != sender && !recipients.contains(author) {
                    recipients.push(author.clone());
                }
                match Envelope::Retraction(retraction.clone()).encode() {
                    Ok(envelope) => self.dispatch(&owner, recipients, envelope).await,
                    Err(e) => {
                        warn!(guid = %retraction.target, error = %e, "cannot re-encode for relay");
                        FanoutReport::default()
                    }
                }
            }
            _ => FanoutReport::default(),
        };

        ReceiveReport {
            outcome: ReceiveOutcome::Accepted,
            fanout,
        }
    }

    // ------------------------------------------------------------------
    // Fan-out
    // ------------------------------------------------------------------

    /// Snapshot of the owner's subscribers, minus `exclude`
    fn relay_targets(&self, owner: &Handle, exclude: &[&Handle]) -> Vec<Handle> {
        let subscribers = self.graph.read().subscribers_of(owner);
        subscribers
            .into_iter()
            .filter(|s| !exclude.contains(&s))
            .collect()
    }

    /// Deliver to every remote recipient. Users of this pod already see
    /// local state and are skipped.
    async fn dispatch(&self, sender: &Handle, recipients: Vec<Handle>, envelope: Bytes) -> FanoutReport {
        let recipients: Vec<Handle> = recipients.into_iter().filter(|r| !self.hosts(r)).collect();
        if recipients.is_empty() {
            return FanoutReport::default();
        }

        let report = fan_out(
            self.deliverer.as_ref(),
            sender,
            recipients,
            envelope,
            self.config.delivery_timeout,
        )
        .await;

        let mut stats = self.stats.lock();
        stats.fanout_attempts += report.attempted.len() as u64;
        stats.fanout_failures += report.failures.len() as u64;
        report
    }
}
