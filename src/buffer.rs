//! 64-byte-aligned heap buffers for the stream and global double buffers.

use std::slice;

#[repr(C, align(64))]
#[derive(Clone, Copy)]
struct Chunk([u8; 64]);

/// A fixed-capacity byte buffer whose storage is aligned to 64 bytes.
///
/// Capacity is rounded up to a whole number of cache lines internally;
/// `as_slice` exposes exactly the requested length.
pub struct AlignedBuf {
    chunks: Box<[Chunk]>,
    len: usize,
}

impl AlignedBuf {
    pub fn new(len: usize) -> Self {
        assert!(len > 0, "buffer capacity must be non-zero");
        let chunks = vec![Chunk([0; 64]); len.div_ceil(64)].into_boxed_slice();
        Self { chunks, len }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the chunk storage holds at least `len` initialized bytes
        // and `Chunk` is a plain byte array.
        unsafe { slice::from_raw_parts(self.chunks.as_ptr().cast::<u8>(), self.len) }
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above; exclusive access through &mut self.
        unsafe { slice::from_raw_parts_mut(self.chunks.as_mut_ptr().cast::<u8>(), self.len) }
    }
}
