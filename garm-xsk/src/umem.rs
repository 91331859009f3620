//! UMEM frame pool and the userspace free-frame allocator.

use std::io;
use std::ptr::NonNull;

use garm_ebpf_common::{FRAME_SIZE, NUM_FRAMES};

use crate::XskError;

/// Sentinel returned by [`FrameAllocator::alloc`] on pool exhaustion.
pub const INVALID_FRAME: u64 = u64::MAX;

/// The contiguous, page-aligned memory region backing all zero-copy frames
/// for one socket. Frames are addressed by byte offset from the base.
pub struct Umem {
    base: NonNull<u8>,
    len: usize,
    frame_size: u32,
}

impl Umem {
    /// Allocate a pool of `num_frames` frames of `frame_size` bytes each.
    /// `mmap` returns page-aligned memory; `MAP_POPULATE` pre-faults it so
    /// no page faults land on the packet path.
    pub fn new(num_frames: u32, frame_size: u32) -> Result<Self, XskError> {
        let len = num_frames as usize * frame_size as usize;
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_POPULATE,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(XskError::Mmap { what: "UMEM", source: io::Error::last_os_error() });
        }
        // mmap never returns null on success
        let base = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| XskError::Mmap { what: "UMEM", source: io::Error::last_os_error() })?;
        Ok(Self { base, len, frame_size })
    }

    /// Pool sized by the compiled-in geometry.
    pub fn with_default_size() -> Result<Self, XskError> {
        Self::new(NUM_FRAMES, FRAME_SIZE)
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn frame_size(&self) -> u32 {
        self.frame_size
    }

    /// Borrow the received bytes of the frame at `addr`.
    ///
    /// An address or length outside the pool means the rings and the pool
    /// have diverged; that is fatal, not a per-packet error.
    pub fn frame(&self, addr: u64, len: u32) -> Result<&[u8], XskError> {
        let end = addr.checked_add(u64::from(len)).filter(|&end| end <= self.len as u64);
        match end {
            Some(_) => {
                // SAFETY: range checked against the mapping above; the kernel
                // only writes frames it was handed via the fill ring, and the
                // caller holds the frame until it is freed.
                Ok(unsafe {
                    std::slice::from_raw_parts(self.base.as_ptr().add(addr as usize), len as usize)
                })
            }
            None => Err(XskError::InvariantViolation(format!(
                "frame {addr:#x}+{len} outside UMEM of {} bytes",
                self.len
            ))),
        }
    }
}

impl Drop for Umem {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base.as_ptr().cast(), self.len);
        }
    }
}

// SAFETY: the mapping is owned and unaliased; &Umem only hands out shared
// slices of frames the caller owns per the ring protocol.
unsafe impl Send for Umem {}

/// LIFO stack of free frame addresses.
///
/// Every frame address lives in exactly one place at a time: here, in the
/// fill ring, in flight in the kernel, in the RX ring, or with the packet
/// handler. The allocator checks what it is given back so a double free or
/// a stray address is caught at the boundary instead of corrupting the pool.
pub struct FrameAllocator {
    free: Vec<u64>,
    num_frames: u32,
    frame_size: u32,
}

impl FrameAllocator {
    /// All frames start out free, addressed `0, frame_size, 2*frame_size, ...`
    pub fn new(num_frames: u32, frame_size: u32) -> Self {
        let free = (0..u64::from(num_frames)).map(|i| i * u64::from(frame_size)).collect();
        Self { free, num_frames, frame_size }
    }

    /// Pop a free frame, or `INVALID_FRAME` if the pool is exhausted.
    pub fn alloc(&mut self) -> u64 {
        self.free.pop().unwrap_or(INVALID_FRAME)
    }

    /// Return a frame to the pool.
    pub fn free(&mut self, addr: u64) -> Result<(), XskError> {
        if self.free.len() >= self.num_frames as usize {
            return Err(XskError::InvariantViolation(format!(
                "free list overflow returning frame {addr:#x}"
            )));
        }
        if addr % u64::from(self.frame_size) != 0
            || addr >= u64::from(self.num_frames) * u64::from(self.frame_size)
        {
            return Err(XskError::InvariantViolation(format!(
                "freed address {addr:#x} is not a frame in this pool"
            )));
        }
        self.free.push(addr);
        Ok(())
    }

    /// Number of frames currently free.
    pub fn available(&self) -> u32 {
        self.free.len() as u32
    }

    pub fn capacity(&self) -> u32 {
        self.num_frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_exhaustion_returns_sentinel() {
        let mut frames = FrameAllocator::new(2, 2048);
        assert_ne!(frames.alloc(), INVALID_FRAME);
        assert_ne!(frames.alloc(), INVALID_FRAME);
        assert_eq!(frames.alloc(), INVALID_FRAME);
        assert_eq!(frames.available(), 0);
    }

    #[test]
    fn test_free_restores_capacity() {
        let mut frames = FrameAllocator::new(4, 2048);
        let a = frames.alloc();
        let b = frames.alloc();
        assert_eq!(frames.available(), 2);
        frames.free(a).unwrap();
        frames.free(b).unwrap();
        assert_eq!(frames.available(), 4);
    }

    #[test]
    fn test_free_overflow_is_fatal() {
        let mut frames = FrameAllocator::new(2, 2048);
        let err = frames.free(0).unwrap_err();
        assert!(matches!(err, XskError::InvariantViolation(_)));
    }

    #[test]
    fn test_free_out_of_range_is_fatal() {
        let mut frames = FrameAllocator::new(4, 2048);
        let _ = frames.alloc();
        assert!(frames.free(4 * 2048).is_err());
        let _ = frames.alloc();
        assert!(frames.free(100).is_err()); // not frame-aligned
    }

    #[test]
    fn test_conservation_across_churn() {
        let mut frames = FrameAllocator::new(8, 2048);
        let mut held = Vec::new();
        for _ in 0..5 {
            held.push(frames.alloc());
        }
        assert_eq!(frames.available() as usize + held.len(), 8);
        for addr in held.drain(..) {
            frames.free(addr).unwrap();
        }
        assert_eq!(frames.available(), 8);
    }

    #[test]
    fn test_umem_frame_bounds() {
        let umem = Umem::new(4, 2048).unwrap();
        assert!(umem.frame(0, 2048).is_ok());
        assert!(umem.frame(3 * 2048, 100).is_ok());
        assert!(matches!(umem.frame(4 * 2048, 1), Err(XskError::InvariantViolation(_))));
        assert!(matches!(umem.frame(3 * 2048, 4096), Err(XskError::InvariantViolation(_))));
    }
}
