//! Preallocated packet buffers addressed by index.
//!
//! The pipeline hands the classifier buffer indices, never pointers; all
//! buffer memory is allocated up front so nothing allocates per packet.

use garm_ebpf_common::FRAME_SIZE;

pub struct PacketBuffer {
    data: Box<[u8]>,
    len: u32,
    /// Index of the interface the frame arrived on.
    pub rx_if_index: u32,
    /// When set, the node appends a trace record for this buffer.
    pub trace: bool,
}

impl PacketBuffer {
    fn new() -> Self {
        Self {
            data: vec![0u8; FRAME_SIZE as usize].into_boxed_slice(),
            len: 0,
            rx_if_index: 0,
            trace: false,
        }
    }

    /// The valid frame bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

pub struct BufferPool {
    buffers: Vec<PacketBuffer>,
}

impl BufferPool {
    pub fn new(count: usize) -> Self {
        Self { buffers: (0..count).map(|_| PacketBuffer::new()).collect() }
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn get(&self, bi: u32) -> &PacketBuffer {
        &self.buffers[bi as usize]
    }

    pub fn get_mut(&mut self, bi: u32) -> &mut PacketBuffer {
        &mut self.buffers[bi as usize]
    }

    /// Copy a frame into buffer `bi`, truncating at the buffer size.
    pub fn write_packet(&mut self, bi: u32, frame: &[u8]) {
        let buf = &mut self.buffers[bi as usize];
        let n = frame.len().min(buf.data.len());
        buf.data[..n].copy_from_slice(&frame[..n]);
        buf.len = n as u32;
    }
}
