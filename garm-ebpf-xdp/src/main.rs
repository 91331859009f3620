//! XDP fast-path classifier.
//!
//! Attached at the earliest receive hook of the interface. Per frame:
//! ICMP is dropped, TCP is checked against the shared ACL map and then
//! redirected into the AF_XDP socket serving the packet's receive queue,
//! everything else (ARP, IPv6, UDP, ...) passes to the host stack.
//!
//! The `vpp_*` maps are pinned by name under the loader's pin root so the
//! host-stack classifier can open the same tables. This program reads
//! `vpp_acl_v4` and writes `vpp_stats`; `vpp_sessions` is only declared
//! here so that loading one object creates the whole shared namespace.
#![no_std]
#![no_main]

use aya_ebpf::{
    bindings::xdp_action,
    macros::{map, xdp},
    maps::{HashMap, LruHashMap, PerCpuArray, XskMap},
    programs::XdpContext,
};

use core::mem;

use garm_ebpf_common::{
    AclRule, FlowKey, SessionEntry, ACL_TABLE_SIZE, ACTION_DROP, CONN_TABLE_SIZE, STAT_DROP,
    STAT_ERROR, STAT_N_COUNTERS, STAT_PASS, STAT_REDIRECT, XSK_MAP_SIZE,
};

// ── Network protocol constants (network byte order on LE host) ──────────────

const ETH_P_IP: u16 = 0x0800_u16.swap_bytes();

const IPPROTO_ICMP: u8 = 1;
const IPPROTO_TCP: u8 = 6;

// ── Network header definitions ──────────────────────────────────────────────
//
// aya-ebpf-bindings does not include ethernet/IP headers (those are UAPI
// network headers, not BPF-specific). We define minimal versions here.

#[repr(C)]
struct EthHdr {
    h_dest: [u8; 6],
    h_source: [u8; 6],
    h_proto: u16, // network byte order
}

/// Minimal IPv4 header (no options).
/// The first byte encodes `ihl` (low nibble) and `version` (high nibble).
#[repr(C)]
struct IpHdr {
    version_ihl: u8,
    tos: u8,
    tot_len: u16,
    id: u16,
    frag_off: u16,
    ttl: u8,
    protocol: u8,
    check: u16,
    saddr: u32, // network byte order
    daddr: u32, // network byte order
}

impl IpHdr {
    #[inline(always)]
    fn ihl(&self) -> u8 {
        self.version_ihl & 0x0F
    }
}

// ── BPF maps ────────────────────────────────────────────────────────────────

#[map]
static XSK_SOCKETS: XskMap = XskMap::with_max_entries(XSK_MAP_SIZE, 0);

#[map(name = "vpp_stats")]
static STATS: PerCpuArray<u64> = PerCpuArray::pinned(STAT_N_COUNTERS, 0);

#[map(name = "vpp_acl_v4")]
static ACL_V4: HashMap<FlowKey, AclRule> = HashMap::pinned(ACL_TABLE_SIZE, 0);

// Not consulted on this path; declared so the session table is created and
// pinned together with the rest of the shared namespace.
#[allow(dead_code)]
#[map(name = "vpp_sessions")]
static SESSIONS: LruHashMap<FlowKey, SessionEntry> = LruHashMap::pinned(CONN_TABLE_SIZE, 0);

/// Increment one per-CPU verdict counter. Each CPU owns its slot, so a
/// plain read-modify-write is race-free here; readers sum across CPUs.
#[inline(always)]
fn count(key: u32) {
    if let Some(value) = STATS.get_ptr_mut(key) {
        unsafe { *value += 1 };
    }
}

// ── Packet access helper ────────────────────────────────────────────────────

/// Returns a const pointer to `T` at `offset` bytes from the start of the
/// packet, or `None` if the access would exceed `data_end`.
///
/// The BPF verifier accepts this pattern (explicit bounds check before cast).
#[inline(always)]
unsafe fn ptr_at<T>(ctx: &XdpContext, offset: usize) -> Option<*const T> {
    let start = ctx.data();
    let end = ctx.data_end();
    let access_end = start.checked_add(offset)?.checked_add(mem::size_of::<T>())?;
    if access_end > end {
        return None;
    }
    Some(start.checked_add(offset)? as *const T)
}

// ── Entry point ─────────────────────────────────────────────────────────────

#[xdp]
pub fn garm_xdp(ctx: XdpContext) -> u32 {
    match try_garm_xdp(&ctx) {
        Ok(action) => action,
        // Malformed L2/L3: never hand the frame to anyone.
        Err(()) => {
            count(STAT_ERROR);
            xdp_action::XDP_ABORTED
        }
    }
}

fn try_garm_xdp(ctx: &XdpContext) -> Result<u32, ()> {
    // ── Ethernet ────────────────────────────────────────────────────────────
    let eth = unsafe { ptr_at::<EthHdr>(ctx, 0).ok_or(())? };

    if unsafe { (*eth).h_proto } != ETH_P_IP {
        count(STAT_PASS);
        return Ok(xdp_action::XDP_PASS);
    }

    // ── IPv4 ────────────────────────────────────────────────────────────────
    let ip = unsafe { ptr_at::<IpHdr>(ctx, mem::size_of::<EthHdr>()).ok_or(())? };

    let ip_hdr_len = unsafe { usize::from((*ip).ihl()).saturating_mul(4) };
    if ip_hdr_len < mem::size_of::<IpHdr>() {
        return Err(());
    }

    let protocol = unsafe { (*ip).protocol };

    if protocol == IPPROTO_ICMP {
        count(STAT_DROP);
        return Ok(xdp_action::XDP_DROP);
    }

    if protocol != IPPROTO_TCP {
        count(STAT_PASS);
        return Ok(xdp_action::XDP_PASS);
    }

    // ── TCP: ACL fast path, then redirect to the AF_XDP socket ─────────────
    //
    // Ports are read from the first four transport bytes; a frame too short
    // to carry them keeps zero ports, matching the slow-path extractor.
    let l4_offset = mem::size_of::<EthHdr>().saturating_add(ip_hdr_len);
    let mut src_port = 0u16;
    let mut dst_port = 0u16;
    if let Some(ports) = unsafe { ptr_at::<[u16; 2]>(ctx, l4_offset) } {
        src_port = unsafe { (*ports)[0] };
        dst_port = unsafe { (*ports)[1] };
    }

    let key = FlowKey {
        src_ip: unsafe { (*ip).saddr },
        dst_ip: unsafe { (*ip).daddr },
        src_port,
        dst_port,
        protocol,
        _pad: [0; 3],
    };

    // No map entry means default ALLOW; only an explicit DROP rule keeps the
    // frame in the kernel. LOG rules are acted on by the userspace drainer.
    if let Some(rule) = unsafe { ACL_V4.get(&key) } {
        if rule.action == ACTION_DROP {
            count(STAT_DROP);
            return Ok(xdp_action::XDP_DROP);
        }
    }

    // Counted on the attempt: if no socket is bound to this queue the driver
    // drops the frame, but the redirect still shows up in the counter.
    count(STAT_REDIRECT);
    let queue_id = unsafe { (*ctx.ctx).rx_queue_index };
    Ok(match XSK_SOCKETS.redirect(queue_id, 0) {
        Ok(action) => action,
        Err(action) => action,
    })
}

// ── Required for no_std + no_main ───────────────────────────────────────────

#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}
