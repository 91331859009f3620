//! Zero-copy transport between the XDP fast path and userspace.
//!
//! Owns the UMEM frame pool, the four single-producer/single-consumer rings
//! (fill, completion, RX, TX), the free-frame allocator, and the poll/drain
//! loop. Frames redirected by the kernel classifier land in the RX ring;
//! the drainer hands each one to a packet handler and returns the frame to
//! the pool, re-posting batches to the fill ring as it runs low.
// AF_XDP is Linux-only. This crate does not compile for other targets.
#![cfg(target_os = "linux")]

pub mod drain;
pub mod ring;
pub mod socket;
mod sys;
pub mod umem;

pub use drain::{DrainStats, Drainer, FrameHandler};
pub use ring::{ConsumerRing, ProducerRing, RxDesc};
pub use socket::{ifindex, RingConfig, XskSocket};
pub use umem::{FrameAllocator, Umem, INVALID_FRAME};

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum XskError {
    #[error("{op} failed: {source}")]
    Socket {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("mmap of {what} failed: {source}")]
    Mmap {
        what: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("unknown interface '{0}'")]
    UnknownInterface(String),

    #[error("ring size {0} is not a power of two")]
    RingSize(u32),

    #[error("poll failed: {0}")]
    Poll(#[source] io::Error),

    // Frame-accounting violations are unrecoverable: the pool no longer
    // matches the rings, so continuing would hand out aliased frames.
    #[error("frame pool invariant violated: {0}")]
    InvariantViolation(String),
}

impl XskError {
    pub(crate) fn os(op: &'static str) -> Self {
        XskError::Socket { op, source: io::Error::last_os_error() }
    }
}
