//! In-memory federation
//!
//! Several pods wired together by a simulated network. Every delivery and
//! countersign request is routed by the recipient's pod domain, passes
//! through that pod's link conditions, and is logged.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use spora_core::{Guid, Handle, ParentRef, ReceiveOutcome, Signature, SporaError, SporaResult, Timestamp};
use spora_crypto::Identity;
use spora_runtime::{CountersignRequest, CountersignSource, Deliverer, Pod, PodConfig};
use spora_wire::Envelope;

/// Conditions on the link towards one pod
#[derive(Clone, Debug, PartialEq)]
pub struct LinkConfig {
    /// Added before every delivery
    pub latency: Duration,
    /// Probability a delivery is lost (0.0 - 1.0)
    pub loss_rate: f64,
    /// Probability a delivered envelope arrives twice
    pub duplicate_prob: f64,
    /// Pod unreachable
    pub down: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self::good()
    }
}

impl LinkConfig {
    pub fn good() -> Self {
        LinkConfig {
            latency: Duration::ZERO,
            loss_rate: 0.0,
            duplicate_prob: 0.0,
            down: false,
        }
    }

    pub fn down() -> Self {
        LinkConfig {
            down: true,
            ..Self::good()
        }
    }

    pub fn lossy(loss_rate: f64) -> Self {
        LinkConfig {
            loss_rate,
            ..Self::good()
        }
    }

    pub fn duplicating(duplicate_prob: f64) -> Self {
        LinkConfig {
            duplicate_prob,
            ..Self::good()
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

/// One delivery attempt as seen by the network
#[derive(Clone, Debug)]
pub struct DeliveryRecord {
    pub sender: Handle,
    pub recipient: Handle,
    pub envelope: Option<Envelope>,
    /// Receiver's verdict; `None` if the envelope never arrived
    pub outcome: Option<ReceiveOutcome>,
}

impl DeliveryRecord {
    /// Guid the envelope is about
    pub fn guid(&self) -> Option<&Guid> {
        match self.envelope.as_ref()? {
            Envelope::Relayable(object) => Some(object.guid()),
            Envelope::Retraction(retraction) => Some(&retraction.target),
        }
    }
}

/// Simulated network between pods
pub struct Network {
    pods: RwLock<HashMap<String, Weak<Pod>>>,
    links: RwLock<HashMap<String, LinkConfig>>,
    default_link: LinkConfig,
    rng: Mutex<StdRng>,
    log: Mutex<Vec<DeliveryRecord>>,
}

impl Network {
    pub fn new(default_link: LinkConfig, seed: u64) -> Self {
        Network {
            pods: RwLock::new(HashMap::new()),
            links: RwLock::new(HashMap::new()),
            default_link,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            log: Mutex::new(Vec::new()),
        }
    }

    fn attach(&self, pod: &Arc<Pod>) {
        self.pods
            .write()
            .insert(pod.domain().to_string(), Arc::downgrade(pod));
    }

    /// Set conditions on the link towards `domain`
    pub fn set_link(&self, domain: &str, config: LinkConfig) {
        self.links.write().insert(domain.to_string(), config);
    }

    /// Restore the default link towards `domain`
    pub fn heal(&self, domain: &str) {
        self.links.write().remove(domain);
    }

    fn link(&self, domain: &str) -> LinkConfig {
        self.links
            .read()
            .get(domain)
            .cloned()
            .unwrap_or_else(|| self.default_link.clone())
    }

    fn route(&self, domain: &str) -> SporaResult<Arc<Pod>> {
        self.pods
            .read()
            .get(domain)
            .and_then(Weak::upgrade)
            .ok_or_else(|| SporaError::TransportError(format!("no pod at {}", domain)))
    }

    /// Returns (lost, copies)
    fn roll(&self, link: &LinkConfig) -> (bool, usize) {
        let mut rng = self.rng.lock();
        let lost = rng.gen_bool(link.loss_rate.clamp(0.0, 1.0));
        let copies = if rng.gen_bool(link.duplicate_prob.clamp(0.0, 1.0)) {
            2
        } else {
            1
        };
        (lost, copies)
    }

    fn record(&self, sender: &Handle, recipient: &Handle, envelope: &Bytes, outcome: Option<ReceiveOutcome>) {
        self.log.lock().push(DeliveryRecord {
            sender: sender.clone(),
            recipient: recipient.clone(),
            envelope: Envelope::decode(envelope).ok(),
            outcome,
        });
    }

    /// Every delivery attempt so far
    pub fn deliveries(&self) -> Vec<DeliveryRecord> {
        self.log.lock().clone()
    }

    /// Delivery attempts addressed to `recipient`
    pub fn deliveries_to(&self, recipient: &Handle) -> Vec<DeliveryRecord> {
        self.log
            .lock()
            .iter()
            .filter(|r| &r.recipient == recipient)
            .cloned()
            .collect()
    }

    pub fn clear_log(&self) {
        self.log.lock().clear();
    }
}

#[async_trait]
impl Deliverer for Network {
    async fn deliver(&self, sender: &Handle, recipient: &Handle, envelope: Bytes) -> SporaResult<()> {
        let link = self.link(recipient.pod());
        if link.down {
            self.record(sender, recipient, &envelope, None);
            return Err(SporaError::TransportError(format!("{} unreachable", recipient.pod())));
        }
        let pod = self.route(recipient.pod())?;

        if !link.latency.is_zero() {
            tokio::time::sleep(link.latency).await;
        }

        let (lost, copies) = self.roll(&link);
        if lost {
            self.record(sender, recipient, &envelope, None);
            return Err(SporaError::TransportError("lost in transit".into()));
        }

        for _ in 0..copies {
            let report = pod.receive(sender, &envelope).await;
            debug!(sender = %sender, recipient = %recipient, outcome = ?report.outcome, "simulated delivery");
            self.record(sender, recipient, &envelope, Some(report.outcome));
        }
        Ok(())
    }
}

#[async_trait]
impl CountersignSource for Network {
    async fn request_countersign(
        &self,
        owner: &Handle,
        request: &CountersignRequest,
    ) -> SporaResult<Signature> {
        let link = self.link(owner.pod());
        if link.down {
            return Err(SporaError::TransportError(format!("{} unreachable", owner.pod())));
        }
        let pod = self.route(owner.pod())?;
        if !link.latency.is_zero() {
            tokio::time::sleep(link.latency).await;
        }
        pod.countersign(request)
    }
}

/// A set of pods sharing one simulated network
pub struct Federation {
    network: Arc<Network>,
    pods: BTreeMap<String, Arc<Pod>>,
    /// Public keys of every user, registered on every pod
    users: Vec<(Handle, [u8; 32])>,
}

impl Federation {
    pub fn new() -> Self {
        Self::with_network(LinkConfig::good(), 42)
    }

    pub fn with_network(default_link: LinkConfig, seed: u64) -> Self {
        Federation {
            network: Arc::new(Network::new(default_link, seed)),
            pods: BTreeMap::new(),
            users: Vec::new(),
        }
    }

    /// Add a pod with default configuration and a short delivery timeout
    pub fn add_pod(&mut self, domain: &str) -> Arc<Pod> {
        let mut config = PodConfig::for_domain(domain);
        config.delivery_timeout = Duration::from_secs(2);
        self.add_pod_with_config(config)
    }

    pub fn add_pod_with_config(&mut self, config: PodConfig) -> Arc<Pod> {
        let domain = config.domain.clone();
        let pod = Arc::new(Pod::new(
            config,
            Arc::new(spora_crypto::KeyDirectory::new()),
            self.network.clone(),
            self.network.clone(),
        ));
        for (handle, key) in &self.users {
            // Keys came from valid identities
            let _ = pod.directory().register_public(handle.clone(), key);
        }
        self.network.attach(&pod);
        self.pods.insert(domain, pod.clone());
        pod
    }

    /// Create a user on their home pod and publish their key everywhere
    pub fn add_user(&mut self, handle: &str) -> SporaResult<Handle> {
        let handle = Handle::parse(handle)?;
        let home = self
            .pods
            .get(handle.pod())
            .ok_or_else(|| SporaError::Config(format!("no pod {}", handle.pod())))?;

        let identity = Identity::generate();
        let key = identity.verifying_key_bytes();
        home.directory().register_local(handle.clone(), identity);
        for (domain, pod) in &self.pods {
            if domain != handle.pod() {
                pod.directory().register_public(handle.clone(), &key)?;
            }
        }
        self.users.push((handle.clone(), key));
        Ok(handle)
    }

    pub fn pod(&self, domain: &str) -> Option<&Arc<Pod>> {
        self.pods.get(domain)
    }

    /// Home pod of a user
    pub fn home_of(&self, handle: &Handle) -> Option<&Arc<Pod>> {
        self.pods.get(handle.pod())
    }

    pub fn pods(&self) -> impl Iterator<Item = &Arc<Pod>> {
        self.pods.values()
    }

    /// Publish a post owned by `owner`. Post federation is outside the
    /// relay protocol, so the post simply appears on every pod.
    pub fn publish_post(&self, owner: &Handle) -> ParentRef {
        let post = ParentRef::post(Guid::generate());
        let now = Timestamp::now();
        for pod in self.pods.values() {
            pod.register_parent(post.clone(), owner.clone(), now);
        }
        post
    }

    /// `owner` starts sharing with `subscriber`
    pub fn share(&self, owner: &Handle, subscriber: &Handle) -> SporaResult<()> {
        let pod = self
            .home_of(owner)
            .ok_or_else(|| SporaError::UnknownParticipant(owner.clone()))?;
        pod.graph_mut().share_with(owner, subscriber)?;
        Ok(())
    }

    pub fn network(&self) -> &Arc<Network> {
        &self.network
    }
}

impl Default for Federation {
    fn default() -> Self {
        Self::new()
    }
}
