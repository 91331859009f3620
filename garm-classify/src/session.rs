//! Fixed-capacity session table with open addressing.
//!
//! Slots are preallocated up front; nothing allocates per packet. Keys hash
//! to a home slot and probe linearly within a short window. When the window
//! is full, insertion evicts: an entry idle past its protocol timeout is
//! always preferred, otherwise the stalest `last_seen` in the window goes.
//!
//! A flow is keyed by the 5-tuple of its first observed packet. Packets in
//! the opposite direction find the row through a reverse-tuple probe and
//! account into `bytes_tx`. Any second observation of a flow promotes it
//! from `NEW` to `ESTABLISHED`; a single observer has no direction oracle,
//! so the promotion does not require seeing the reverse path.

use ahash::RandomState;
use std::hash::BuildHasher;

use garm_ebpf_common::net::{IPPROTO_TCP, IPPROTO_UDP};
use garm_ebpf_common::{FlowKey, SessionEntry, SESSION_ESTABLISHED, SESSION_NEW};

/// Linear-probe window length.
const PROBE_LIMIT: usize = 16;

/// What `update` did with the packet's flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionUpdate {
    /// New row inserted.
    Created,
    /// Existing row refreshed in the observed direction.
    Refreshed,
    /// Existing row refreshed through the reverse tuple.
    Reverse,
    /// Insertion replaced a live entry (window full).
    Evicted,
    /// Not a protocol this table tracks.
    Ignored,
}

pub struct SessionTable {
    slots: Vec<Option<SessionEntry>>,
    mask: usize,
    hasher: RandomState,
    len: usize,
    deleted: u64,
}

impl SessionTable {
    /// `capacity` must be a power of two.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two());
        Self {
            slots: vec![None; capacity],
            mask: capacity - 1,
            // Fixed seeds: slot placement must not change across restarts of
            // the same build, or eviction behavior becomes unreproducible.
            hasher: RandomState::with_seeds(0x6761, 0x726d, 0x7873, 0x6b30),
            len: 0,
            deleted: 0,
        }
    }

    fn home(&self, key: &FlowKey) -> usize {
        self.hasher.hash_one(key) as usize & self.mask
    }

    fn find(&self, key: &FlowKey, now: u64) -> Option<usize> {
        let home = self.home(key);
        for i in 0..PROBE_LIMIT {
            let idx = (home + i) & self.mask;
            if let Some(entry) = &self.slots[idx] {
                if entry.key() == *key && !entry.is_expired(now) {
                    return Some(idx);
                }
            }
        }
        None
    }

    /// Live entry for `key`, if present. Expired rows read as misses.
    pub fn get(&self, key: &FlowKey, now: u64) -> Option<&SessionEntry> {
        self.find(key, now).and_then(|idx| self.slots[idx].as_ref())
    }

    /// Account one packet of `packet_len` bytes into its flow, creating the
    /// row on first observation. Only TCP and UDP flows are tracked.
    ///
    /// Returns what happened, and the row is left with `last_seen = now`.
    pub fn update(&mut self, key: &FlowKey, packet_len: u64, now: u64) -> SessionUpdate {
        if key.protocol != IPPROTO_TCP && key.protocol != IPPROTO_UDP {
            return SessionUpdate::Ignored;
        }

        if let Some(entry) = self.find(key, now).and_then(|idx| self.slots[idx].as_mut()) {
            entry.last_seen = now;
            entry.bytes_rx += packet_len;
            if entry.state == SESSION_NEW {
                entry.state = SESSION_ESTABLISHED;
            }
            return SessionUpdate::Refreshed;
        }

        let reversed = key.reversed();
        if let Some(entry) = self.find(&reversed, now).and_then(|idx| self.slots[idx].as_mut()) {
            entry.last_seen = now;
            entry.bytes_tx += packet_len;
            if entry.state == SESSION_NEW {
                entry.state = SESSION_ESTABLISHED;
            }
            return SessionUpdate::Reverse;
        }

        self.insert(key, packet_len, now)
    }

    fn insert(&mut self, key: &FlowKey, packet_len: u64, now: u64) -> SessionUpdate {
        let entry = SessionEntry {
            src_ip: key.src_ip,
            dst_ip: key.dst_ip,
            src_port: key.src_port,
            dst_port: key.dst_port,
            protocol: key.protocol,
            state: SESSION_NEW,
            _pad: [0; 2],
            last_seen: now,
            bytes_rx: packet_len,
            bytes_tx: 0,
        };

        let home = self.home(key);
        let mut victim = (home, u64::MAX);
        for i in 0..PROBE_LIMIT {
            let idx = (home + i) & self.mask;
            match &self.slots[idx] {
                None => {
                    self.slots[idx] = Some(entry);
                    self.len += 1;
                    return SessionUpdate::Created;
                }
                Some(existing) if existing.is_expired(now) => {
                    // An idle-past-timeout entry always loses its slot.
                    self.slots[idx] = Some(entry);
                    self.deleted += 1;
                    return SessionUpdate::Created;
                }
                Some(existing) => {
                    if existing.last_seen < victim.1 {
                        victim = (idx, existing.last_seen);
                    }
                }
            }
        }

        // Window full of live entries: replace the stalest.
        self.slots[victim.0] = Some(entry);
        self.deleted += 1;
        SessionUpdate::Evicted
    }

    /// Remove every expired row. Eviction is otherwise lazy, so callers run
    /// this off the packet path.
    pub fn sweep(&mut self, now: u64) -> u64 {
        let mut removed = 0;
        for slot in &mut self.slots {
            if slot.as_ref().is_some_and(|e| e.is_expired(now)) {
                *slot = None;
                self.len -= 1;
                removed += 1;
            }
        }
        self.deleted += removed;
        removed
    }

    /// Rows removed or replaced so far.
    pub fn deleted(&self) -> u64 {
        self.deleted
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SessionEntry> {
        self.slots.iter().filter_map(|s| s.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use garm_ebpf_common::{TCP_TIMEOUT_SECS, UDP_TIMEOUT_SECS};
    use std::net::Ipv4Addr;

    fn tcp_key(src_port: u16) -> FlowKey {
        FlowKey::new(
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
            src_port,
            80,
            IPPROTO_TCP,
        )
    }

    #[test]
    fn test_two_packets_one_row() {
        let mut table = SessionTable::new(1024);
        let key = tcp_key(5000);

        assert_eq!(table.update(&key, 60, 100), SessionUpdate::Created);
        assert_eq!(table.update(&key, 40, 101), SessionUpdate::Refreshed);

        assert_eq!(table.len(), 1);
        let row = table.get(&key, 101).unwrap();
        assert_eq!(row.bytes_rx, 100);
        assert_eq!(row.bytes_tx, 0);
        assert_eq!(row.last_seen, 101);
        assert_eq!(row.state, SESSION_ESTABLISHED);
    }

    #[test]
    fn test_row_key_matches_tuple() {
        let mut table = SessionTable::new(1024);
        let key = tcp_key(5000);
        table.update(&key, 60, 100);
        for entry in table.iter() {
            assert_eq!(entry.key(), key);
        }
    }

    #[test]
    fn test_reverse_direction_accounts_tx() {
        let mut table = SessionTable::new(1024);
        let key = tcp_key(5000);

        table.update(&key, 60, 100);
        assert_eq!(table.update(&key.reversed(), 1500, 101), SessionUpdate::Reverse);

        let row = table.get(&key, 101).unwrap();
        assert_eq!(row.bytes_rx, 60);
        assert_eq!(row.bytes_tx, 1500);
        assert_eq!(row.state, SESSION_ESTABLISHED);
        // The reverse tuple did not get its own row.
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_tcp_expiry_after_timeout() {
        let mut table = SessionTable::new(1024);
        let key = tcp_key(5000);

        table.update(&key, 60, 1000);
        assert!(table.get(&key, 1000 + TCP_TIMEOUT_SECS).is_some());
        assert!(table.get(&key, 1000 + TCP_TIMEOUT_SECS + 1).is_none());
    }

    #[test]
    fn test_udp_expires_faster_than_tcp() {
        let mut table = SessionTable::new(1024);
        let udp = FlowKey::new(
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
            53,
            53,
            IPPROTO_UDP,
        );
        table.update(&udp, 60, 1000);
        assert!(table.get(&udp, 1000 + UDP_TIMEOUT_SECS).is_some());
        assert!(table.get(&udp, 1000 + UDP_TIMEOUT_SECS + 1).is_none());
    }

    #[test]
    fn test_expired_entry_is_reused_before_live_ones() {
        let mut table = SessionTable::new(1024);
        let key = tcp_key(5000);

        table.update(&key, 60, 100);
        // Same tuple again long after expiry: the stale row is replaced by a
        // fresh one rather than refreshed.
        let later = 100 + TCP_TIMEOUT_SECS + 10;
        assert_eq!(table.update(&key, 70, later), SessionUpdate::Created);
        let row = table.get(&key, later).unwrap();
        assert_eq!(row.bytes_rx, 70);
        assert_eq!(row.state, SESSION_NEW);
        assert_eq!(table.deleted(), 1);
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let mut table = SessionTable::new(1024);
        table.update(&tcp_key(5000), 60, 100);
        table.update(&tcp_key(5001), 60, 350);

        // At t=450 the first flow (idle 350s) is expired, the second is not.
        assert_eq!(table.sweep(450), 1);
        assert_eq!(table.len(), 1);
        assert!(table.get(&tcp_key(5001), 450).is_some());
    }

    #[test]
    fn test_full_window_evicts_stalest() {
        // Capacity 16 with a 16-slot probe window: every insertion shares
        // one window, so the 17th live flow must evict the stalest.
        let mut table = SessionTable::new(16);
        for i in 0..16u16 {
            table.update(&tcp_key(1000 + i), 60, 100 + u64::from(i));
        }
        let newest = tcp_key(2000);
        assert_eq!(table.update(&newest, 60, 200), SessionUpdate::Evicted);
        assert!(table.get(&newest, 200).is_some());
        // The stalest (t=100) flow is gone.
        assert!(table.get(&tcp_key(1000), 200).is_none());
        assert_eq!(table.deleted(), 1);
    }

    #[test]
    fn test_ignores_non_transport_protocols() {
        let mut table = SessionTable::new(1024);
        let icmp = FlowKey::new(
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
            0,
            0,
            garm_ebpf_common::net::IPPROTO_ICMP,
        );
        assert_eq!(table.update(&icmp, 60, 100), SessionUpdate::Ignored);
        assert!(table.is_empty());
    }
}
