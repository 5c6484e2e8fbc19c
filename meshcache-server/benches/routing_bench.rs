//! Routing Benchmarks
//!
//! Owner lookup cost per partition strategy as the cluster grows, plus the
//! replica selection done on every write.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use meshcache_server::cluster::HashRing;
use meshcache_server::{
    FirstActivePeers, LeastLoaded, Node, NodeRegistry, PartitionRouter, PartitionStrategy,
    ReplicaSelector, SeedNode,
};
use std::hint::black_box;

fn registry_with(nodes: usize) -> NodeRegistry {
    let seeds: Vec<SeedNode> = (0..nodes)
        .map(|i| SeedNode::new(format!("node-{:03}", i), format!("10.0.0.{}:7100", i)))
        .collect();
    NodeRegistry::with_seeds("node-000", "10.0.0.0:7100", &seeds)
}

fn bench_owner_lookup(c: &mut Criterion) {
    let keys: Vec<String> = (0..1000).map(|i| format!("user:{}:session", i)).collect();

    for strategy in [
        PartitionStrategy::Hash,
        PartitionStrategy::ConsistentHash,
        PartitionStrategy::Range,
    ] {
        let mut group = c.benchmark_group(format!("owner_of_{:?}", strategy));
        group.throughput(Throughput::Elements(keys.len() as u64));

        for nodes in [3, 16, 64] {
            let router = PartitionRouter::new(registry_with(nodes), strategy);
            group.bench_with_input(BenchmarkId::from_parameter(nodes), &keys, |b, keys| {
                b.iter(|| {
                    for key in keys {
                        black_box(router.owner_of(black_box(key)).unwrap());
                    }
                })
            });
        }
        group.finish();
    }
}

fn bench_ring_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("hash_ring_build");
    for nodes in [3, 16, 64] {
        let ids: Vec<String> = (0..nodes).map(|i| format!("node-{:03}", i)).collect();
        group.bench_with_input(BenchmarkId::from_parameter(nodes), &ids, |b, ids| {
            b.iter(|| black_box(HashRing::new(black_box(ids))))
        });
    }
    group.finish();
}

fn bench_replica_selection(c: &mut Criterion) {
    let peers: Vec<Node> = (0..32)
        .map(|i| {
            let mut node = Node::new(format!("node-{:03}", i), format!("10.0.0.{}:7100", i));
            node.load = (i % 7) as f64 / 7.0;
            node
        })
        .collect();

    let selectors: Vec<Box<dyn ReplicaSelector>> =
        vec![Box::new(FirstActivePeers), Box::new(LeastLoaded)];
    let mut group = c.benchmark_group("replica_selection");
    for selector in &selectors {
        group.bench_function(selector.name(), |b| {
            b.iter(|| black_box(selector.select(black_box("user:42"), &peers, 3)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_owner_lookup, bench_ring_build, bench_replica_selection);
criterion_main!(benches);
