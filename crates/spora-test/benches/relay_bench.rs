//! Benchmarks for envelope encoding and inbound relay processing

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};

use spora_core::{
    Guid, Handle, ParentRef, Payload, RelayableDraft, RelayableObject, SporaResult, Timestamp,
};
use spora_crypto::{countersign, sign_as_author, Identity, KeyDirectory};
use spora_runtime::{Deliverer, NoCountersign, Pod, PodConfig};
use spora_wire::Envelope;

struct Sink;

#[async_trait]
impl Deliverer for Sink {
    async fn deliver(&self, _sender: &Handle, _recipient: &Handle, _envelope: Bytes) -> SporaResult<()> {
        Ok(())
    }
}

struct Fixture {
    pod: Pod,
    /// Signing keys, kept outside the pod's directory
    keys: KeyDirectory,
    alice: Handle,
    bob: Identity,
    post: ParentRef,
}

impl Fixture {
    fn new(subscribers: usize) -> Self {
        let alice = Handle::parse("alice@x.example").unwrap();
        let bob = Handle::parse("bob@y.example").unwrap();
        let alice_identity = Identity::generate();
        let bob_identity = Identity::generate();

        let directory = Arc::new(KeyDirectory::new());
        directory
            .register_public(alice.clone(), &alice_identity.verifying_key_bytes())
            .unwrap();
        directory.register_local(bob.clone(), bob_identity.clone());

        let pod = Pod::new(
            PodConfig::for_domain("y.example"),
            directory,
            Arc::new(Sink),
            Arc::new(NoCountersign),
        );
        for i in 0..subscribers {
            let subscriber = Handle::parse(&format!("s{}@s{}.example", i, i)).unwrap();
            pod.graph_mut().share_with(&bob, &subscriber).unwrap();
        }

        let post = ParentRef::post(Guid::generate());
        pod.register_parent(post.clone(), bob.clone(), Timestamp::now());

        let keys = KeyDirectory::new();
        keys.register_local(alice.clone(), alice_identity);

        Fixture {
            pod,
            keys,
            alice,
            bob: bob_identity,
            post,
        }
    }

    /// A fresh comment by alice, countersigned by bob, encoded
    fn comment(&self) -> Bytes {
        let draft = RelayableDraft::new(
            self.alice.clone(),
            self.post.clone(),
            Payload::comment("benchmark comment"),
        );
        let author_signature = sign_as_author(&self.keys, &draft).unwrap();
        let parent_signature = countersign(&self.bob, &draft);
        Envelope::Relayable(RelayableObject::new(draft, author_signature, Some(parent_signature)))
            .encode()
            .unwrap()
    }
}

fn bench_envelope(c: &mut Criterion) {
    let fixture = Fixture::new(0);
    let encoded = fixture.comment();
    let envelope = Envelope::decode(&encoded).unwrap();

    let mut group = c.benchmark_group("envelope");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("encode", |b| b.iter(|| black_box(&envelope).encode().unwrap()));
    group.bench_function("decode", |b| b.iter(|| Envelope::decode(black_box(&encoded)).unwrap()));
    group.finish();
}

fn bench_receive(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let alice = Handle::parse("alice@x.example").unwrap();

    let mut group = c.benchmark_group("receive");
    group.throughput(Throughput::Elements(1));

    for subscribers in [0usize, 16, 128] {
        let fixture = Fixture::new(subscribers);
        group.bench_function(format!("accept_relay_{}", subscribers), |b| {
            b.iter_batched(
                || fixture.comment(),
                |envelope| runtime.block_on(fixture.pod.receive(&alice, &envelope)),
                BatchSize::SmallInput,
            )
        });
    }

    let fixture = Fixture::new(0);
    let envelope = fixture.comment();
    runtime.block_on(fixture.pod.receive(&alice, &envelope));
    group.bench_function("duplicate", |b| {
        b.iter(|| runtime.block_on(fixture.pod.receive(&alice, black_box(&envelope))))
    });

    group.finish();
}

criterion_group!(benches, bench_envelope, bench_receive);
criterion_main!(benches);
