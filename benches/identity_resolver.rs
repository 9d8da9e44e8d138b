//! Benchmark for interface identity resolution and planning
//!
//! Resolution is linear in the number of existing interfaces; clusters with
//! thousands of LIFs are the worst case for cluster-scoped listings.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use svm_operator::controller::identity::{plan, resolve};
use svm_operator::domain::interface::{DesiredInterface, InterfaceScope, NetworkInterface};

fn existing_interfaces(count: usize) -> Vec<NetworkInterface> {
    (0..count)
        .map(|i| NetworkInterface {
            uuid: Some(format!("uuid-{:05}", i)),
            name: format!("lif-{:05}", i),
            address: format!("10.{}.{}.{}", (i >> 16) & 0xff, (i >> 8) & 0xff, i & 0xff),
            netmask: Some(24),
            broadcast_domain: Some("Default".to_string()),
            home_node: None,
            service_policy: Some("default-data-files".to_string()),
            enabled: true,
            owner: Some("svm-1".to_string()),
        })
        .collect()
}

fn desired_interface(name: &str, address: &str) -> DesiredInterface {
    DesiredInterface {
        name: name.to_string(),
        address: address.to_string(),
        netmask: 24,
        broadcast_domain: Some("Default".to_string()),
        home_node: None,
        service_policy: "default-data-files".to_string(),
    }
}

fn bench_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("identity_resolve");

    for count in [16usize, 256, 4096] {
        let existing = existing_interfaces(count);
        let last = count - 1;
        let hit = desired_interface(&existing[last].name, &existing[last].address);
        let miss = desired_interface("lif-new", "192.168.200.1");

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("match_last", count), &existing, |b, existing| {
            b.iter(|| resolve(black_box(&hit), black_box(existing)));
        });
        group.bench_with_input(BenchmarkId::new("not_found", count), &existing, |b, existing| {
            b.iter(|| resolve(black_box(&miss), black_box(existing)));
        });
    }

    group.finish();
}

fn bench_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("identity_plan");
    let existing = existing_interfaces(1024);
    let scope = InterfaceScope::svm("svm-1");
    let moved = desired_interface(&existing[512].name, "172.16.0.9");

    group.throughput(Throughput::Elements(1));
    group.bench_function("address_change", |b| {
        b.iter(|| plan(black_box(&moved), black_box(&existing), &scope));
    });

    group.finish();
}

criterion_group!(benches, bench_resolve, bench_plan);
criterion_main!(benches);
