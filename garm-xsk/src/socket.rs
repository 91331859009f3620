//! AF_XDP socket setup: UMEM registration, ring creation, queue binding.

use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr::NonNull;
use std::sync::atomic::AtomicU32;

use tracing::info;

use crate::ring::{ConsumerRing, ProducerRing, RawRing, RingMapping, RxDesc};
use crate::sys;
use crate::umem::Umem;
use crate::XskError;

/// Sizes of the four rings. All must be powers of two.
#[derive(Clone, Copy, Debug)]
pub struct RingConfig {
    pub fill_size: u32,
    pub completion_size: u32,
    pub rx_size: u32,
    pub tx_size: u32,
    /// `sxdp_flags` for bind; 0 lets the kernel pick copy or zero-copy mode.
    pub bind_flags: u16,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self { fill_size: 2048, completion_size: 2048, rx_size: 2048, tx_size: 2048, bind_flags: 0 }
    }
}

/// Resolve an interface name to its index.
pub fn ifindex(name: &str) -> Result<u32, XskError> {
    let cname =
        CString::new(name).map_err(|_| XskError::UnknownInterface(name.to_string()))?;
    let index = unsafe { libc::if_nametoindex(cname.as_ptr()) };
    if index == 0 {
        return Err(XskError::UnknownInterface(name.to_string()));
    }
    Ok(index)
}

/// One AF_XDP socket bound to an interface queue, with its four rings mapped.
///
/// Ring ownership is fixed: userspace produces on `fill` and `tx`, consumes
/// on `rx` and `completion`; the kernel holds the opposite side of each.
pub struct XskSocket {
    fd: OwnedFd,
    pub rx: ConsumerRing<RxDesc>,
    pub tx: ProducerRing<RxDesc>,
    pub fill: ProducerRing<u64>,
    pub completion: ConsumerRing<u64>,
}

impl XskSocket {
    /// Create a socket, register `umem` with it, size and map the rings, and
    /// bind to `(ifindex, queue_id)`.
    pub fn bind(
        umem: &Umem,
        ifindex: u32,
        queue_id: u32,
        config: RingConfig,
    ) -> Result<Self, XskError> {
        for size in [config.fill_size, config.completion_size, config.rx_size, config.tx_size] {
            if size == 0 || !size.is_power_of_two() {
                return Err(XskError::RingSize(size));
            }
        }

        let raw = unsafe { libc::socket(sys::AF_XDP, libc::SOCK_RAW, 0) };
        if raw < 0 {
            return Err(XskError::os("socket(AF_XDP)"));
        }
        // SAFETY: freshly created, owned by us from here on.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let reg = sys::XdpUmemReg {
            addr: umem.as_ptr() as u64,
            len: umem.len() as u64,
            chunk_size: umem.frame_size(),
            headroom: 0,
            flags: 0,
        };
        setsockopt(fd.as_raw_fd(), sys::XDP_UMEM_REG, &reg, "setsockopt(XDP_UMEM_REG)")?;

        setsockopt(
            fd.as_raw_fd(),
            sys::XDP_UMEM_FILL_RING,
            &config.fill_size,
            "setsockopt(XDP_UMEM_FILL_RING)",
        )?;
        setsockopt(
            fd.as_raw_fd(),
            sys::XDP_UMEM_COMPLETION_RING,
            &config.completion_size,
            "setsockopt(XDP_UMEM_COMPLETION_RING)",
        )?;
        setsockopt(fd.as_raw_fd(), sys::XDP_RX_RING, &config.rx_size, "setsockopt(XDP_RX_RING)")?;
        setsockopt(fd.as_raw_fd(), sys::XDP_TX_RING, &config.tx_size, "setsockopt(XDP_TX_RING)")?;

        let offsets = mmap_offsets(fd.as_raw_fd())?;

        // Map each ring region and carve out cursor/descriptor views.
        let rx = ConsumerRing::new(map_ring::<RxDesc>(
            fd.as_raw_fd(),
            sys::XDP_PGOFF_RX_RING,
            &offsets.rx,
            config.rx_size,
            "RX ring",
        )?);
        let tx = ProducerRing::new(map_ring::<RxDesc>(
            fd.as_raw_fd(),
            sys::XDP_PGOFF_TX_RING,
            &offsets.tx,
            config.tx_size,
            "TX ring",
        )?);
        let fill = ProducerRing::new(map_ring::<u64>(
            fd.as_raw_fd(),
            sys::XDP_UMEM_PGOFF_FILL_RING,
            &offsets.fr,
            config.fill_size,
            "fill ring",
        )?);
        let completion = ConsumerRing::new(map_ring::<u64>(
            fd.as_raw_fd(),
            sys::XDP_UMEM_PGOFF_COMPLETION_RING,
            &offsets.cr,
            config.completion_size,
            "completion ring",
        )?);

        let addr = sys::SockaddrXdp {
            sxdp_family: sys::AF_XDP as u16,
            sxdp_flags: config.bind_flags,
            sxdp_ifindex: ifindex,
            sxdp_queue_id: queue_id,
            sxdp_shared_umem_fd: 0,
        };
        let rc = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                &addr as *const _ as *const libc::sockaddr,
                std::mem::size_of::<sys::SockaddrXdp>() as libc::socklen_t,
            )
        };
        if rc != 0 {
            return Err(XskError::os("bind(AF_XDP)"));
        }

        info!(ifindex, queue_id, "AF_XDP socket bound");
        Ok(Self { fd, rx, tx, fill, completion })
    }
}

impl AsRawFd for XskSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

fn setsockopt<T>(fd: RawFd, opt: libc::c_int, value: &T, op: &'static str) -> Result<(), XskError> {
    let rc = unsafe {
        libc::setsockopt(
            fd,
            sys::SOL_XDP,
            opt,
            value as *const T as *const libc::c_void,
            std::mem::size_of::<T>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(XskError::Socket { op, source: io::Error::last_os_error() });
    }
    Ok(())
}

fn mmap_offsets(fd: RawFd) -> Result<sys::XdpMmapOffsets, XskError> {
    let mut offsets = sys::XdpMmapOffsets::default();
    let mut optlen = std::mem::size_of::<sys::XdpMmapOffsets>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd,
            sys::SOL_XDP,
            sys::XDP_MMAP_OFFSETS,
            &mut offsets as *mut _ as *mut libc::c_void,
            &mut optlen,
        )
    };
    if rc != 0 {
        return Err(XskError::os("getsockopt(XDP_MMAP_OFFSETS)"));
    }
    Ok(offsets)
}

fn map_ring<D: Copy>(
    fd: RawFd,
    pgoff: libc::off_t,
    offset: &sys::XdpRingOffset,
    size: u32,
    what: &'static str,
) -> Result<RawRing<D>, XskError> {
    let len = offset.desc as usize + size as usize * std::mem::size_of::<D>();
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED | libc::MAP_POPULATE,
            fd,
            pgoff,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(XskError::Mmap { what, source: io::Error::last_os_error() });
    }

    let base = ptr.cast::<u8>();
    // SAFETY: the kernel lays the ring out at the offsets it just reported;
    // the mapping covers cursors and the descriptor array, and is owned by
    // the RingMapping stored inside the ring.
    unsafe {
        let producer = NonNull::new_unchecked(base.add(offset.producer as usize) as *mut AtomicU32);
        let consumer = NonNull::new_unchecked(base.add(offset.consumer as usize) as *mut AtomicU32);
        let desc = NonNull::new_unchecked(base.add(offset.desc as usize) as *mut D);
        Ok(RawRing::from_raw_parts(
            producer,
            consumer,
            desc,
            size,
            Some(RingMapping::new(ptr, len)),
        ))
    }
}
