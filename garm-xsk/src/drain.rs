//! The poll/drain loop: move redirected frames from the RX ring to the
//! packet handler and recycle them through the free list and fill ring.

use std::os::fd::{AsRawFd, RawFd};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, warn};

use garm_ebpf_common::RX_BATCH_SIZE;

use crate::ring::{ConsumerRing, ProducerRing, RxDesc};
use crate::socket::XskSocket;
use crate::umem::{FrameAllocator, Umem};
use crate::XskError;

const POLL_TIMEOUT_MS: libc::c_int = 1000;

/// Receives each drained frame. The slice aliases UMEM memory and is only
/// valid for the duration of the call; the frame returns to the pool as soon
/// as the handler returns (or panics).
pub trait FrameHandler {
    fn handle(&mut self, frame: &[u8]);
}

impl<F: FnMut(&[u8])> FrameHandler for F {
    fn handle(&mut self, frame: &[u8]) {
        self(frame)
    }
}

/// Counters kept by the drain loop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub frames: u64,
    pub batches: u64,
    pub handler_panics: u64,
}

/// Outcome of one poll wakeup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PollResult {
    Readable,
    Timeout,
}

/// Single-threaded drainer for one AF_XDP socket.
///
/// The socket is declared before the UMEM so it is torn down first; the
/// kernel must drop its references to the pool before the pool unmaps.
pub struct Drainer<H: FrameHandler> {
    socket: XskSocket,
    umem: Umem,
    frames: FrameAllocator,
    handler: H,
    cancel: Arc<AtomicBool>,
    stats: DrainStats,
}

impl<H: FrameHandler> Drainer<H> {
    pub fn new(socket: XskSocket, umem: Umem, handler: H, cancel: Arc<AtomicBool>) -> Self {
        let frames = FrameAllocator::new(
            (umem.len() / umem.frame_size() as usize) as u32,
            umem.frame_size(),
        );
        Self { socket, umem, frames, handler, cancel, stats: DrainStats::default() }
    }

    /// Drain until cancelled. The cancellation flag is observed at each loop
    /// head, so shutdown takes at most one poll interval plus one batch.
    pub fn run(&mut self) -> Result<DrainStats, XskError> {
        // Hand the kernel its initial RX budget: fill the whole fill ring.
        let fill_size = self.socket.fill.size();
        replenish(&mut self.socket.fill, &mut self.frames, fill_size);

        while !self.cancel.load(Ordering::Relaxed) {
            // Top the fill ring back up once it drops below half capacity,
            // in batches, so sustained load cannot starve kernel RX.
            replenish(&mut self.socket.fill, &mut self.frames, fill_size / 2);

            match poll_readable(self.socket.as_raw_fd(), POLL_TIMEOUT_MS)? {
                PollResult::Timeout => continue,
                PollResult::Readable => {
                    drain_batch(
                        &mut self.socket.rx,
                        &self.umem,
                        &mut self.frames,
                        &mut self.handler,
                        &mut self.stats,
                    )?;
                }
            }
        }

        debug!(frames = self.stats.frames, batches = self.stats.batches, "drain loop stopped");
        Ok(self.stats)
    }

    pub fn stats(&self) -> DrainStats {
        self.stats
    }
}

/// Post free frames to the fill ring until its occupancy reaches `target`.
/// Returns the number of frames posted. Works in fixed-size chunks so the
/// packet path stays allocation-free.
fn replenish(fill: &mut ProducerRing<u64>, frames: &mut FrameAllocator, target: u32) -> u32 {
    let mut chunk = [0u64; RX_BATCH_SIZE as usize];
    let mut posted = 0;
    loop {
        let pending = fill.pending();
        if pending >= target || frames.available() == 0 {
            break;
        }
        let want = (target - pending).min(frames.available()).min(RX_BATCH_SIZE) as usize;
        for slot in &mut chunk[..want] {
            *slot = frames.alloc();
        }
        let wrote = fill.produce(&chunk[..want]);
        // Slots the ring would not take go straight back to the pool; the
        // addresses came out of the allocator a moment ago.
        for &addr in &chunk[wrote as usize..want] {
            let _ = frames.free(addr);
        }
        posted += wrote;
        if (wrote as usize) < want {
            break;
        }
    }
    posted
}

/// Consume up to one batch of RX descriptors in ring order.
///
/// Every consumed frame is returned to the free list, whether the handler
/// completed or panicked. A descriptor pointing outside the UMEM aborts the
/// drain: the rings and the pool no longer agree.
fn drain_batch<H: FrameHandler>(
    rx: &mut ConsumerRing<RxDesc>,
    umem: &Umem,
    frames: &mut FrameAllocator,
    handler: &mut H,
    stats: &mut DrainStats,
) -> Result<u32, XskError> {
    let n = rx.peek(RX_BATCH_SIZE);
    if n == 0 {
        return Ok(0);
    }

    for i in 0..n {
        let desc = rx.read(i);
        let frame = umem.frame(desc.addr, desc.len)?;

        if catch_unwind(AssertUnwindSafe(|| handler.handle(frame))).is_err() {
            stats.handler_panics += 1;
            warn!(addr = desc.addr, len = desc.len, "packet handler panicked; frame freed");
        }

        frames.free(desc.addr)?;
        stats.frames += 1;
        if stats.frames % 1000 == 0 {
            debug!(frames = stats.frames, "frames processed");
        }
    }

    rx.release(n);
    stats.batches += 1;
    Ok(n)
}

/// Wait for the socket to become readable. `EINTR` is a timeout, not an
/// error; anything else fatal is logged by the caller.
fn poll_readable(fd: RawFd, timeout_ms: libc::c_int) -> Result<PollResult, XskError> {
    let mut fds = [libc::pollfd { fd, events: libc::POLLIN, revents: 0 }];
    let rc = unsafe { libc::poll(fds.as_mut_ptr(), 1, timeout_ms) };
    if rc < 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            return Ok(PollResult::Timeout);
        }
        error!(%err, "poll failed");
        return Err(XskError::Poll(err));
    }
    if rc == 0 {
        return Ok(PollResult::Timeout);
    }
    Ok(PollResult::Readable)
}
