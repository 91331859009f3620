//! The classifier graph node.

use std::fmt::Write as _;
use std::sync::Arc;

use tracing::info;

use garm_ebpf_common::net::{
    parse_frame, ParsedFrame, ETH_P_IPV6, IPPROTO_ICMP, IPPROTO_TCP,
};
use garm_ebpf_common::{FlowKey, ACTION_ALLOW, ACTION_DROP, ACTION_LOG, CONN_TABLE_SIZE};

use crate::acl::AclTable;
use crate::admin::IfaceState;
use crate::buffer::BufferPool;
use crate::dual::DualTables;
use crate::session::SessionTable;
use crate::stats::ClassifyStats;

/// Prefix of the system-log records for noteworthy packets.
const LOG_PREFIX: &str = "garm";

/// Destination ports whose packets are worth a system-log record.
const LOGGED_PORTS: [u16; 3] = [22, 80, 443];

/// Downstream nodes a buffer can be dispatched to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Next {
    Drop = 0,
    Ip4Lookup = 1,
    Ip6Lookup = 2,
    EthernetInput = 3,
}

/// Buffers handed to one downstream node in one go. A window never exceeds
/// `FRAME_WINDOW` entries; the node keeps appending to the current window
/// while consecutive buffers pick the same next hop (the common case), and
/// opens a new one on every switch so per-interface order is preserved.
pub const FRAME_WINDOW: usize = 256;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceRecord {
    pub buffer: u32,
    pub rx_if_index: u32,
    pub next: Next,
    pub reason: &'static str,
}

/// Accumulates dispatch windows in completion order.
struct Dispatcher {
    done: Vec<(Next, Vec<u32>)>,
    current: Option<(Next, Vec<u32>)>,
}

impl Dispatcher {
    fn new() -> Self {
        Self { done: Vec::new(), current: None }
    }

    fn enqueue(&mut self, next: Next, bi: u32) {
        match &mut self.current {
            Some((cur, window)) if *cur == next && window.len() < FRAME_WINDOW => {
                window.push(bi);
            }
            _ => {
                if let Some(full) = self.current.take() {
                    self.done.push(full);
                }
                self.current = Some((next, vec![bi]));
            }
        }
    }

    fn finish(mut self) -> Vec<(Next, Vec<u32>)> {
        if let Some(window) = self.current.take() {
            self.done.push(window);
        }
        self.done
    }
}

/// One classifier worker. Owns its rules fallback, session table, trace
/// arena and per-interface counters; shares the statistics shards with the
/// other workers.
pub struct ClassifyNode {
    rules: AclTable,
    sessions: SessionTable,
    dual: Option<DualTables>,
    stats: Arc<ClassifyStats>,
    shard: usize,
    interfaces: Vec<IfaceState>,
    trace: Vec<TraceRecord>,
}

impl ClassifyNode {
    pub fn new(stats: Arc<ClassifyStats>, shard: usize) -> Self {
        Self {
            rules: AclTable::new(),
            sessions: SessionTable::new(CONN_TABLE_SIZE as usize),
            dual: None,
            stats,
            shard,
            interfaces: Vec::new(),
            trace: Vec::new(),
        }
    }

    /// Enter dual-protection mode with already-opened shared tables.
    pub fn with_dual(mut self, dual: DualTables) -> Self {
        self.dual = Some(dual);
        self
    }

    pub fn dual_protection(&self) -> bool {
        self.dual.is_some()
    }

    /// Local fallback rules, consulted when the shared ACL is unavailable.
    pub fn rules_mut(&mut self) -> &mut AclTable {
        &mut self.rules
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    /// Enable or disable classification for one interface, growing the
    /// per-interface vector as needed.
    pub fn set_enabled(&mut self, if_index: u32, enabled: bool) {
        let idx = if_index as usize;
        if self.interfaces.len() <= idx {
            self.interfaces.resize_with(idx + 1, IfaceState::default);
        }
        self.interfaces[idx].enabled = enabled;
    }

    pub fn interfaces(&self) -> &[IfaceState] {
        &self.interfaces
    }

    /// Aggregate counters across all worker shards.
    pub fn snapshot_stats(&self) -> crate::stats::StatsSnapshot {
        self.stats.aggregate()
    }

    /// Trace records appended during the most recent batch.
    pub fn trace(&self) -> &[TraceRecord] {
        &self.trace
    }

    /// Drop expired sessions; run off the packet path.
    pub fn sweep_sessions(&mut self, now: u64) -> u64 {
        let removed = self.sessions.sweep(now);
        self.stats.shard(self.shard).add_sessions_deleted(removed);
        removed
    }

    /// Process one frame of buffers. Every input buffer comes back out in a
    /// dispatch window; nothing is lost or reordered within the batch.
    pub fn process(&mut self, pool: &BufferPool, input: &[u32], now: u64) -> Vec<(Next, Vec<u32>)> {
        self.trace.clear();
        let mut dispatch = Dispatcher::new();

        for &bi in input {
            let buffer = pool.get(bi);
            let (next, reason) =
                self.classify_packet(buffer.bytes(), buffer.rx_if_index, false, now);

            if buffer.trace {
                self.trace.push(TraceRecord {
                    buffer: bi,
                    rx_if_index: buffer.rx_if_index,
                    next,
                    reason,
                });
            }

            dispatch.enqueue(next, bi);
        }

        dispatch.finish()
    }

    /// Classify one frame that the fast path redirected to userspace. Same
    /// verdict logic as [`ClassifyNode::process`], but the per-interface
    /// counter records the packet as redirected rather than passed.
    pub fn classify_redirected(&mut self, frame: &[u8], rx_if_index: u32, now: u64) -> Next {
        self.classify_packet(frame, rx_if_index, true, now).0
    }

    fn classify_packet(
        &mut self,
        frame: &[u8],
        rx_if_index: u32,
        redirected: bool,
        now: u64,
    ) -> (Next, &'static str) {
        let stats = Arc::clone(&self.stats);
        let shard = stats.shard(self.shard);

        // Disabled interfaces bypass classification entirely; the frame goes
        // to its ethertype's natural next hop.
        let enabled = self
            .interfaces
            .get(rx_if_index as usize)
            .map(|iface| iface.enabled)
            .unwrap_or(false);
        if !enabled {
            let next = match parse_frame(frame) {
                Ok(ParsedFrame::Ipv4 { .. }) => Next::Ip4Lookup,
                Ok(ParsedFrame::NonIp { ethertype: ETH_P_IPV6 }) => Next::Ip6Lookup,
                _ => Next::EthernetInput,
            };
            return (next, "classification disabled");
        }

        shard.add_bytes(frame.len() as u64);

        let (next, reason) = match parse_frame(frame) {
            Err(_) => {
                shard.add_invalid(1);
                (Next::Drop, "invalid packet")
            }
            Ok(ParsedFrame::NonIp { ethertype: ETH_P_IPV6 }) => {
                shard.add_processed(1);
                (Next::Ip6Lookup, "ipv6 passthrough")
            }
            Ok(ParsedFrame::NonIp { .. }) => {
                shard.add_processed(1);
                (Next::EthernetInput, "non-ip")
            }
            Ok(ParsedFrame::Ipv4 { key }) => {
                shard.add_processed(1);
                self.classify_ipv4(&key, frame.len() as u64, now)
            }
        };

        self.count_iface(rx_if_index, next, redirected);
        (next, reason)
    }

    fn classify_ipv4(&mut self, key: &FlowKey, packet_len: u64, now: u64) -> (Next, &'static str) {
        let stats = Arc::clone(&self.stats);
        let shard = stats.shard(self.shard);

        if wants_syslog(key) {
            info!(target: "syslog", "{}", format_packet_log(key));
            shard.add_logged(1);
        }

        shard.add_map_lookups(1);
        let rule = match &self.dual {
            Some(dual) => dual.lookup_rule(key),
            None => self.rules.lookup(key).copied(),
        };

        let action = match rule {
            Some(rule) => {
                shard.add_map_hits(1);
                rule.action
            }
            // No rule: default allow.
            None => ACTION_ALLOW,
        };

        match action {
            ACTION_DROP => {
                shard.add_dropped(1);
                (Next::Drop, "acl drop")
            }
            log_or_allow => {
                if log_or_allow == ACTION_LOG {
                    info!(
                        target: "syslog",
                        "{LOG_PREFIX}: rule match {} -> {}, proto={}",
                        key.src_addr(),
                        key.dst_addr(),
                        key.protocol
                    );
                    shard.add_logged(1);
                }
                self.track_session(key, packet_len, now);
                shard.add_allowed(1);
                (Next::Ip4Lookup, "allowed")
            }
        }
    }

    fn track_session(&mut self, key: &FlowKey, packet_len: u64, now: u64) {
        use crate::session::SessionUpdate;

        let update = self.sessions.update(key, packet_len, now);
        match update {
            SessionUpdate::Created => {
                self.stats.shard(self.shard).add_sessions_created(1);
            }
            SessionUpdate::Evicted => {
                let shard = self.stats.shard(self.shard);
                shard.add_sessions_created(1);
                shard.add_sessions_deleted(1);
            }
            SessionUpdate::Refreshed | SessionUpdate::Reverse | SessionUpdate::Ignored => {}
        }

        if let Some(dual) = &mut self.dual {
            // The row just touched is under the first-observed orientation;
            // probe both so the mirror carries the authoritative copy.
            let entry = self
                .sessions
                .get(key, now)
                .or_else(|| self.sessions.get(&key.reversed(), now))
                .copied();
            if let Some(entry) = entry {
                dual.mirror_session(&entry);
            }
        }
    }

    fn count_iface(&mut self, rx_if_index: u32, next: Next, redirected: bool) {
        // Bounds-checked: unknown interfaces are not counted.
        let Some(iface) = self.interfaces.get_mut(rx_if_index as usize) else {
            return;
        };
        match next {
            Next::Drop => iface.drop += 1,
            _ if redirected => iface.redirect += 1,
            _ => iface.pass += 1,
        }
    }
}

/// Whether this packet rates a system-log record: ICMP, or TCP to an
/// administratively interesting port.
fn wants_syslog(key: &FlowKey) -> bool {
    key.protocol == IPPROTO_ICMP
        || (key.protocol == IPPROTO_TCP && LOGGED_PORTS.contains(&key.dst_port_host()))
}

/// `"<prefix>: <ICMP|TCP> packet A.B.C.D -> E.F.G.H, proto=<n>"`
fn format_packet_log(key: &FlowKey) -> String {
    let mut msg = String::with_capacity(64);
    let kind = if key.protocol == IPPROTO_ICMP { "ICMP" } else { "TCP" };
    // Writing to a String cannot fail.
    let _ = write!(
        msg,
        "{LOG_PREFIX}: {kind} packet {} -> {}, proto={}",
        key.src_addr(),
        key.dst_addr(),
        key.protocol
    );
    msg
}
