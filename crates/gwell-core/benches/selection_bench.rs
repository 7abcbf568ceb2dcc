//! Criterion benchmarks for server-list decoding and relay selection.
//!
//! Run with:
//! ```bash
//! cargo bench --package gwell-core --bench selection_bench
//! ```

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use gwell_core::protocol::{encode_server_list, MAX_ENTRIES};
use gwell_core::{decode_server_list, select_best, CandidateServer, ServerEntry};

// ── Fixtures ──────────────────────────────────────────────────────────────────

fn make_entries(n: usize) -> Vec<ServerEntry> {
    (0..n)
        .map(|i| ServerEntry {
            address: IpAddr::V4(Ipv4Addr::new(10, 0, (i / 256) as u8, (i % 256) as u8)),
            server_id: i as u16,
            primary_port: 28800,
            secondary_port: 28800,
            stamp: 0,
            level: (i % 3) as u32,
        })
        .collect()
}

fn make_candidates(n: usize) -> Vec<CandidateServer> {
    make_entries(n)
        .iter()
        .enumerate()
        .map(|(i, e)| {
            let c = CandidateServer::new(e.socket_addr(), e.server_id, e.level, i);
            if i % 4 == 0 {
                c
            } else {
                c.with_rtt(Duration::from_millis((i * 7 % 50) as u64))
            }
        })
        .collect()
}

// ── Benchmark groups ──────────────────────────────────────────────────────────

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_server_list");
    for n in [3, 16, MAX_ENTRIES] {
        let bytes = encode_server_list(&make_entries(n));
        group.bench_with_input(BenchmarkId::new("entries", n), &bytes, |b, bytes| {
            b.iter(|| decode_server_list(black_box(bytes)))
        });
    }
    group.finish();
}

fn bench_select(c: &mut Criterion) {
    let mut group = c.benchmark_group("select_best");
    for n in [3, 16, MAX_ENTRIES] {
        let candidates = make_candidates(n);
        group.bench_with_input(BenchmarkId::new("candidates", n), &candidates, |b, set| {
            b.iter(|| select_best(black_box(set)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_decode, bench_select);
criterion_main!(benches);
