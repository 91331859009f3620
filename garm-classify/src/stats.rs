//! Classifier statistics, sharded per worker.
//!
//! Each worker owns one shard and adds to it without contending with the
//! others; readers sum across shards. Counters only ever grow.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Default)]
#[repr(align(64))]
pub struct StatsShard {
    pkts_processed: AtomicU64,
    pkts_dropped: AtomicU64,
    pkts_allowed: AtomicU64,
    pkts_invalid: AtomicU64,
    pkts_logged: AtomicU64,
    bytes_total: AtomicU64,
    map_lookups: AtomicU64,
    map_hits: AtomicU64,
    sessions_created: AtomicU64,
    sessions_deleted: AtomicU64,
}

macro_rules! shard_counter {
    ($add:ident, $field:ident) => {
        pub fn $add(&self, n: u64) {
            self.$field.fetch_add(n, Ordering::Relaxed);
        }
    };
}

impl StatsShard {
    shard_counter!(add_processed, pkts_processed);
    shard_counter!(add_dropped, pkts_dropped);
    shard_counter!(add_allowed, pkts_allowed);
    shard_counter!(add_invalid, pkts_invalid);
    shard_counter!(add_logged, pkts_logged);
    shard_counter!(add_bytes, bytes_total);
    shard_counter!(add_map_lookups, map_lookups);
    shard_counter!(add_map_hits, map_hits);
    shard_counter!(add_sessions_created, sessions_created);
    shard_counter!(add_sessions_deleted, sessions_deleted);
}

/// Point-in-time sum over all shards.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub pkts_processed: u64,
    pub pkts_dropped: u64,
    pub pkts_allowed: u64,
    pub pkts_invalid: u64,
    pub pkts_logged: u64,
    pub bytes_total: u64,
    pub map_lookups: u64,
    pub map_hits: u64,
    pub sessions_created: u64,
    pub sessions_deleted: u64,
}

pub struct ClassifyStats {
    shards: Box<[StatsShard]>,
}

impl ClassifyStats {
    pub fn new(workers: usize) -> Arc<Self> {
        Arc::new(Self { shards: (0..workers.max(1)).map(|_| StatsShard::default()).collect() })
    }

    /// The shard owned by worker `index`.
    pub fn shard(&self, index: usize) -> &StatsShard {
        &self.shards[index]
    }

    pub fn workers(&self) -> usize {
        self.shards.len()
    }

    pub fn aggregate(&self) -> StatsSnapshot {
        let mut out = StatsSnapshot::default();
        for shard in self.shards.iter() {
            out.pkts_processed += shard.pkts_processed.load(Ordering::Relaxed);
            out.pkts_dropped += shard.pkts_dropped.load(Ordering::Relaxed);
            out.pkts_allowed += shard.pkts_allowed.load(Ordering::Relaxed);
            out.pkts_invalid += shard.pkts_invalid.load(Ordering::Relaxed);
            out.pkts_logged += shard.pkts_logged.load(Ordering::Relaxed);
            out.bytes_total += shard.bytes_total.load(Ordering::Relaxed);
            out.map_lookups += shard.map_lookups.load(Ordering::Relaxed);
            out.map_hits += shard.map_hits.load(Ordering::Relaxed);
            out.sessions_created += shard.sessions_created.load(Ordering::Relaxed);
            out.sessions_deleted += shard.sessions_deleted.load(Ordering::Relaxed);
        }
        out
    }
}
