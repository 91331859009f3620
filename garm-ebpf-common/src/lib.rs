//! Types shared between the BPF kernel program and userspace.
//!
//! This crate is `no_std` so it can be compiled for both targets:
//! - `bpfel-unknown-none` (kernel-side XDP program)
//! - the host target (loader, zero-copy drainer, host-stack classifier)
//!
//! Every multi-byte field of the map key/value types is kept in **network
//! byte order**, exactly as it appears on the wire. The XDP program reads
//! packet fields without conversion, so userspace must build keys the same
//! way (see [`FlowKey::new`]) for lookups against the shared maps to agree.
//!
//! Enable the `aya-pod` feature in userspace crates to get the `aya::Pod`
//! impls required for reading values out of BPF maps.
#![cfg_attr(not(test), no_std)]

pub mod net;

use core::net::Ipv4Addr;

// ── Pool and batch geometry ─────────────────────────────────────────────────

/// Size of one zero-copy frame in the UMEM pool.
pub const FRAME_SIZE: u32 = 2048;
/// Number of frames in the UMEM pool.
pub const NUM_FRAMES: u32 = 4096;
/// Maximum RX descriptors drained per poll wakeup.
pub const RX_BATCH_SIZE: u32 = 64;
/// Capacity of the session table (shared map and local fallback alike).
pub const CONN_TABLE_SIZE: u32 = 65536;
/// Capacity of the ACL rule map.
pub const ACL_TABLE_SIZE: u32 = 1024;
/// Maximum number of receive queues the XSK map can address.
pub const XSK_MAP_SIZE: u32 = 64;

// ── Session timeouts ────────────────────────────────────────────────────────

/// Idle timeout for TCP sessions, in seconds.
pub const TCP_TIMEOUT_SECS: u64 = 300;
/// Idle timeout for UDP sessions, in seconds.
pub const UDP_TIMEOUT_SECS: u64 = 60;

// ── Pinned map namespace ────────────────────────────────────────────────────

/// Directory the shared maps are pinned under.
pub const PIN_ROOT: &str = "/sys/fs/bpf";
/// Pinned name of the ACL rule map.
pub const MAP_ACL_V4: &str = "vpp_acl_v4";
/// Pinned name of the kernel verdict counters.
pub const MAP_STATS: &str = "vpp_stats";
/// Pinned name of the session map.
pub const MAP_SESSIONS: &str = "vpp_sessions";

// ── Kernel verdict counter indices (vpp_stats) ──────────────────────────────

pub const STAT_PASS: u32 = 0;
pub const STAT_DROP: u32 = 1;
pub const STAT_REDIRECT: u32 = 2;
pub const STAT_ERROR: u32 = 3;
/// Number of slots in the kernel verdict counter array.
pub const STAT_N_COUNTERS: u32 = 4;

// ── ACL actions ─────────────────────────────────────────────────────────────

pub const ACTION_DROP: u8 = 0;
pub const ACTION_ALLOW: u8 = 1;
/// Allow, and emit a log record for the packet.
pub const ACTION_LOG: u8 = 2;

// ── Session states ──────────────────────────────────────────────────────────

pub const SESSION_NEW: u8 = 0;
pub const SESSION_ESTABLISHED: u8 = 1;
pub const SESSION_CLOSING: u8 = 2;

// ── BPF map update modes ────────────────────────────────────────────────────
//
// UAPI-stable values of BPF_ANY / BPF_NOEXIST / BPF_EXIST.

pub const UPDATE_ANY: u64 = 0;
pub const UPDATE_NOEXIST: u64 = 1;
pub const UPDATE_EXIST: u64 = 2;

/// 5-tuple key of the `vpp_acl_v4` and `vpp_sessions` maps.
///
/// All fields network byte order. The trailing padding is part of the key
/// bytes the kernel hashes, so it must always be zero; use [`FlowKey::new`]
/// or [`FlowKey::default`] rather than building the struct literally.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct FlowKey {
    pub src_ip: u32,
    pub dst_ip: u32,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,
    pub _pad: [u8; 3],
}

impl FlowKey {
    /// Build a key from host-order addresses and ports.
    pub fn new(src_ip: Ipv4Addr, dst_ip: Ipv4Addr, src_port: u16, dst_port: u16, protocol: u8) -> Self {
        Self {
            src_ip: u32::from_ne_bytes(src_ip.octets()),
            dst_ip: u32::from_ne_bytes(dst_ip.octets()),
            src_port: src_port.to_be(),
            dst_port: dst_port.to_be(),
            protocol,
            _pad: [0; 3],
        }
    }

    /// The same flow seen from the opposite direction.
    pub fn reversed(&self) -> Self {
        Self {
            src_ip: self.dst_ip,
            dst_ip: self.src_ip,
            src_port: self.dst_port,
            dst_port: self.src_port,
            protocol: self.protocol,
            _pad: [0; 3],
        }
    }

    pub fn src_addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.src_ip.to_ne_bytes())
    }

    pub fn dst_addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.dst_ip.to_ne_bytes())
    }

    /// Source port in host byte order.
    pub fn src_port_host(&self) -> u16 {
        u16::from_be(self.src_port)
    }

    /// Destination port in host byte order.
    pub fn dst_port_host(&self) -> u16 {
        u16::from_be(self.dst_port)
    }
}

/// Value of the `vpp_acl_v4` map. Rules are injected by the control plane;
/// both data planes treat them as read-only.
///
/// The 5-tuple is repeated in the value so a rule can be displayed or
/// re-validated without the key it was fetched under.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct AclRule {
    pub src_ip: u32,
    pub dst_ip: u32,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,
    /// One of `ACTION_DROP`, `ACTION_ALLOW`, `ACTION_LOG`.
    pub action: u8,
    pub priority: u16,
}

impl AclRule {
    pub fn new(key: &FlowKey, action: u8, priority: u16) -> Self {
        Self {
            src_ip: key.src_ip,
            dst_ip: key.dst_ip,
            src_port: key.src_port,
            dst_port: key.dst_port,
            protocol: key.protocol,
            action,
            priority,
        }
    }
}

/// Value of the `vpp_sessions` map: one tracked flow.
///
/// `last_seen` is in whole seconds on the classifier's clock. The key tuple
/// is repeated in the value (same fields, same byte order) so an entry can be
/// checked against the key it is stored under.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct SessionEntry {
    pub src_ip: u32,
    pub dst_ip: u32,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,
    /// One of `SESSION_NEW`, `SESSION_ESTABLISHED`, `SESSION_CLOSING`.
    pub state: u8,
    pub _pad: [u8; 2],
    pub last_seen: u64,
    pub bytes_rx: u64,
    pub bytes_tx: u64,
}

impl SessionEntry {
    pub fn key(&self) -> FlowKey {
        FlowKey {
            src_ip: self.src_ip,
            dst_ip: self.dst_ip,
            src_port: self.src_port,
            dst_port: self.dst_port,
            protocol: self.protocol,
            _pad: [0; 3],
        }
    }

    /// Idle timeout for this session's protocol, in seconds.
    pub fn timeout_secs(&self) -> u64 {
        match self.protocol {
            net::IPPROTO_UDP => UDP_TIMEOUT_SECS,
            _ => TCP_TIMEOUT_SECS,
        }
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now.saturating_sub(self.last_seen) > self.timeout_secs()
    }
}

// The kernel hashes the raw key bytes, so the layouts below are wire
// contracts. Checked at compile time for both targets.
const _: () = {
    use core::mem::{offset_of, size_of};

    assert!(size_of::<FlowKey>() == 16);
    assert!(offset_of!(FlowKey, src_ip) == 0);
    assert!(offset_of!(FlowKey, dst_ip) == 4);
    assert!(offset_of!(FlowKey, src_port) == 8);
    assert!(offset_of!(FlowKey, dst_port) == 10);
    assert!(offset_of!(FlowKey, protocol) == 12);

    assert!(size_of::<AclRule>() == 16);
    assert!(offset_of!(AclRule, action) == 13);
    assert!(offset_of!(AclRule, priority) == 14);

    assert!(size_of::<SessionEntry>() == 40);
    assert!(offset_of!(SessionEntry, state) == 13);
    assert!(offset_of!(SessionEntry, last_seen) == 16);
    assert!(offset_of!(SessionEntry, bytes_rx) == 24);
    assert!(offset_of!(SessionEntry, bytes_tx) == 32);
};

// SAFETY: all three are #[repr(C)], Copy, fully initialized by their
// constructors, with padding declared as explicit zeroed fields.
#[cfg(feature = "aya-pod")]
mod pod_impls {
    #[allow(unsafe_code)]
    unsafe impl aya::Pod for super::FlowKey {}
    #[allow(unsafe_code)]
    unsafe impl aya::Pod for super::AclRule {}
    #[allow(unsafe_code)]
    unsafe impl aya::Pod for super::SessionEntry {}
}
