use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use std::net::Ipv4Addr;

use garm_classify::{AclTable, BufferPool, ClassifyNode, ClassifyStats, SessionTable};
use garm_ebpf_common::net::IPPROTO_TCP;
use garm_ebpf_common::{AclRule, FlowKey, ACTION_DROP};

fn flow(i: u32) -> FlowKey {
    FlowKey::new(
        Ipv4Addr::from((10 << 24) | i),
        Ipv4Addr::new(10, 0, 0, 2),
        (1024 + (i % 40000)) as u16,
        80,
        IPPROTO_TCP,
    )
}

fn tcp_frame(key: &FlowKey) -> Vec<u8> {
    let mut f = vec![0u8; 64];
    f[12] = 0x08;
    f[13] = 0x00;
    f[14] = 0x45;
    f[23] = IPPROTO_TCP;
    f[26..30].copy_from_slice(&key.src_ip.to_ne_bytes());
    f[30..34].copy_from_slice(&key.dst_ip.to_ne_bytes());
    f[34..36].copy_from_slice(&key.src_port.to_ne_bytes());
    f[36..38].copy_from_slice(&key.dst_port.to_ne_bytes());
    f
}

fn bench_session_update(c: &mut Criterion) {
    let mut table = SessionTable::new(65536);
    let mut i = 0u32;
    c.bench_function("session_update", |b| {
        b.iter(|| {
            i = i.wrapping_add(1);
            table.update(black_box(&flow(i % 50000)), 64, u64::from(i))
        })
    });
}

fn bench_acl_lookup(c: &mut Criterion) {
    let mut acl = AclTable::new();
    for i in 0..1024u32 {
        let key = flow(i);
        acl.insert(key, AclRule::new(&key, ACTION_DROP, 1));
    }
    let miss = flow(900000);
    c.bench_function("acl_lookup_miss", |b| b.iter(|| acl.lookup(black_box(&miss))));
    let hit = flow(7);
    c.bench_function("acl_lookup_hit", |b| b.iter(|| acl.lookup(black_box(&hit))));
}

fn bench_node_batch(c: &mut Criterion) {
    let mut node = ClassifyNode::new(ClassifyStats::new(1), 0);
    node.set_enabled(0, true);

    let mut pool = BufferPool::new(256);
    let input: Vec<u32> = (0..256).collect();
    for &bi in &input {
        pool.write_packet(bi, &tcp_frame(&flow(bi)));
    }

    let mut now = 0u64;
    c.bench_function("node_batch_256", |b| {
        b.iter(|| {
            now += 1;
            node.process(black_box(&pool), black_box(&input), now)
        })
    });
}

criterion_group!(benches, bench_session_update, bench_acl_lookup, bench_node_batch);
criterion_main!(benches);
