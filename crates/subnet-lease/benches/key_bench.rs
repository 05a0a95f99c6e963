//! Performance benchmarks for subnet key encoding and decoding

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ipnet::IpNet;
use subnet_lease::{make_subnet_key, parse_subnet_key};

fn subnets() -> Vec<(&'static str, IpNet)> {
    vec![
        ("ipv4", "10.244.3.0/24".parse().unwrap()),
        ("ipv6", "fd00:10:244:3::/64".parse().unwrap()),
    ]
}

/// Benchmark key encoding per family
fn bench_make_key(c: &mut Criterion) {
    let mut group = c.benchmark_group("subnet_key_make");

    for (family, subnet) in subnets() {
        group.bench_with_input(BenchmarkId::new("family", family), &subnet, |b, subnet| {
            b.iter(|| black_box(make_subnet_key(subnet)));
        });
    }

    group.finish();
}

/// Benchmark key decoding per family
fn bench_parse_key(c: &mut Criterion) {
    let mut group = c.benchmark_group("subnet_key_parse");

    for (family, subnet) in subnets() {
        let key = make_subnet_key(&subnet);
        group.bench_with_input(BenchmarkId::new("family", family), &key, |b, key| {
            b.iter(|| black_box(parse_subnet_key(key)));
        });
    }

    group.finish();
}

/// Benchmark rejection of keys that are not subnet keys
fn bench_parse_invalid(c: &mut Criterion) {
    let keys = ["10.244.3.0", "/coreos.com/network/config", "fd00::-64", "10.244.3.0-24/x"];

    c.bench_function("subnet_key_parse_invalid", |b| {
        b.iter(|| {
            for key in keys.iter() {
                black_box(parse_subnet_key(key));
            }
        });
    });
}

criterion_group!(benches, bench_make_key, bench_parse_key, bench_parse_invalid);
criterion_main!(benches);
