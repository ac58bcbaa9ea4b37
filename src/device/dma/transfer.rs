//! Transfer stepper.
//!
//! An [`ActiveDescriptor`] is the working copy of a descriptor while it
//! runs. It carries the raw fields (mutated in place so they can be written
//! back) plus byte and line counters derived when the descriptor starts.
//!
//! # Stepping
//!
//! ```text
//!      ┌──────────────┐  chunk   ┌────────────┐  bytes   ┌──────────────┐
//!  ┌──►│  next_chunk  ├─────────►│ translate/ ├─────────►│   advance    │
//!  │   └──────────────┘          │ copy/xform │          └──────┬───────┘
//!  │                             └────────────┘                 │
//!  └──────────────────── until next_chunk() is empty ◄──────────┘
//! ```
//!
//! A plain chunk is the largest power of two, capped by the side's maximum,
//! that keeps the current address aligned. Read and write always move the
//! same amount; the smaller side wins. Element-reinterpreting transforms move
//! one 16-bit element per step instead, plus a single-byte step for the odd
//! byte closing a line of odd width.
//!
//! Linear descriptors count `length` down and advance both addresses. 2D
//! descriptors walk the width offset across a line, then step the address by
//! the stride and count the height down.

use super::descriptor::{Descriptor, DescriptorKind, Transform};
use super::{DescriptorState, MAX_CHUNK_BYPASS, MAX_CHUNK_CACHED};

/// Largest chunk a side may move in one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLimits {
    /// Side bypasses the cache
    pub bypass: u32,
    /// Side goes through the cache
    pub cached: u32,
}

impl Default for ChunkLimits {
    fn default() -> Self {
        Self { bypass: MAX_CHUNK_BYPASS, cached: MAX_CHUNK_CACHED }
    }
}

impl ChunkLimits {
    fn for_side(&self, bypass: bool) -> u32 {
        if bypass {
            self.bypass
        } else {
            self.cached
        }
    }
}

/// One step of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Chunk {
    pub src_va: u32,
    pub dst_va: u32,
    pub read: u32,
    pub write: u32,
}

impl Chunk {
    /// Nothing left to move: the descriptor is finished.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.read == 0 && self.write == 0
    }
}

/// Largest power of two up to `max` that `va` is aligned to.
#[inline]
pub fn aligned_chunk(va: u32, max: u32) -> u32 {
    let mut size = max;
    while size > 1 && va & (size - 1) != 0 {
        size >>= 1;
    }
    size
}

/// Working copy of the descriptor being executed.
#[derive(Debug, Clone, Default)]
pub struct ActiveDescriptor {
    /// Virtual address of the descriptor
    pub va: u32,
    /// Physical address, once translated
    pub pa: Option<u64>,
    pub desc: Descriptor,
    /// Tracker id (0 until tracked)
    pub id: u64,
    pub state: DescriptorState,
    /// Stopped at a caller-requested pause point
    pub pause: bool,
    /// Stopped by an exception
    pub exception: bool,

    pub bytes_to_read: u32,
    pub bytes_to_write: u32,
    /// Bytes per source line (2D)
    pub src_roi_width: u32,
    /// Bytes per destination line, after scaling (2D)
    pub dst_roi_width: u32,
    pub lines_to_read: u32,
    pub lines_to_write: u32,

    pub max_read: u32,
    pub max_write: u32,
}

impl ActiveDescriptor {
    /// Start executing `desc`, fetched from `va`/`pa`.
    ///
    /// Counters pick up from the descriptor's stored progress, so a
    /// descriptor written back at a pause or exception resumes where it
    /// stopped.
    pub fn new(va: u32, pa: u64, desc: Descriptor, limits: ChunkLimits) -> Self {
        let mut active = Self {
            va,
            pa: Some(pa),
            desc,
            max_read: limits.for_side(desc.header.src_bypass),
            max_write: limits.for_side(desc.header.dst_bypass),
            ..Default::default()
        };
        active.desc.header.done = false;

        match desc.kind {
            DescriptorKind::Linear { length } => {
                active.bytes_to_read = length;
                active.bytes_to_write = length;
            }
            DescriptorKind::TwoD(r) => {
                active.src_roi_width = r.width as u32;
                active.dst_roi_width = r.transform.scaled(r.width as u32);
                active.bytes_to_read = active.src_roi_width.saturating_sub(r.src_width_offset as u32);
                active.bytes_to_write = active.dst_roi_width.saturating_sub(r.dst_width_offset as u32);
                active.lines_to_read = r.height as u32;
                active.lines_to_write = r.height as u32;
            }
        }
        active
    }

    /// Placeholder for a descriptor whose fetch failed.
    pub fn unfetched(va: u32, state: DescriptorState) -> Self {
        Self { va, state, exception: true, ..Default::default() }
    }

    pub fn transform(&self) -> Transform {
        self.desc.region().map(|r| r.transform).unwrap_or_default()
    }

    /// Compute the next step, or an empty chunk when the descriptor is done.
    pub fn next_chunk(&self) -> Chunk {
        let h = &self.desc.header;
        let (src_va, dst_va) = match &self.desc.kind {
            DescriptorKind::Linear { .. } => (h.src, h.dst),
            DescriptorKind::TwoD(r) => (
                h.src.wrapping_add(r.src_width_offset as u32),
                h.dst.wrapping_add(r.dst_width_offset as u32),
            ),
        };
        let mut chunk = Chunk { src_va, dst_va, read: 0, write: 0 };

        if let DescriptorKind::TwoD(r) = &self.desc.kind {
            if r.height == 0 {
                return chunk;
            }
            if let Some((read, write)) = r.transform.fixed_chunk() {
                if self.bytes_to_read >= read && self.bytes_to_write >= write {
                    chunk.read = read;
                    chunk.write = write;
                } else if self.bytes_to_read > 0 && self.bytes_to_read < read {
                    // Unpaired last byte of an odd-width line
                    let write = r.transform.scaled(self.bytes_to_read);
                    if self.bytes_to_write >= write {
                        chunk.read = self.bytes_to_read;
                        chunk.write = write;
                    }
                }
                return chunk;
            }
        }

        let read = self.bytes_to_read.min(aligned_chunk(src_va, self.max_read));
        let write = self.bytes_to_write.min(aligned_chunk(dst_va, self.max_write));
        let size = read.min(write);
        chunk.read = size;
        chunk.write = size;
        chunk
    }

    /// Record that `chunk` has been moved.
    pub fn advance(&mut self, chunk: &Chunk) {
        self.bytes_to_read -= chunk.read;
        self.bytes_to_write -= chunk.write;

        let h = &mut self.desc.header;
        match &mut self.desc.kind {
            DescriptorKind::Linear { length } => {
                *length -= chunk.write;
                h.src = h.src.wrapping_add(chunk.read);
                h.dst = h.dst.wrapping_add(chunk.write);
            }
            DescriptorKind::TwoD(r) => {
                r.src_width_offset += chunk.read as u16;
                if r.src_width_offset as u32 >= self.src_roi_width {
                    r.src_width_offset = 0;
                    h.src = h.src.wrapping_add(r.src_stride as u32);
                    self.bytes_to_read = self.src_roi_width;
                    self.lines_to_read = self.lines_to_read.saturating_sub(1);
                }

                r.dst_width_offset += chunk.write as u16;
                if r.dst_width_offset as u32 >= self.dst_roi_width {
                    r.dst_width_offset = 0;
                    r.height -= 1;
                    h.dst = h.dst.wrapping_add(r.dst_stride as u32);
                    self.bytes_to_write = self.dst_roi_width;
                    self.lines_to_write = self.lines_to_write.saturating_sub(1);
                }

                // The ROI registers read back as zero once the last line lands.
                if r.height == 0 {
                    r.src_width_offset = 0;
                    r.dst_width_offset = 0;
                    r.width = 0;
                    self.bytes_to_read = 0;
                    self.bytes_to_write = 0;
                }
            }
        }
    }

    /// True once no further chunk remains.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.next_chunk().is_empty()
    }

    /// Whether write-back should include the addresses.
    #[inline]
    pub fn stopped_early(&self) -> bool {
        self.pause || self.exception
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::dma::descriptor::Region2d;

    fn linear(src: u32, dst: u32, len: u32) -> ActiveDescriptor {
        ActiveDescriptor::new(0x100, 0x100, Descriptor::linear(src, dst, len), ChunkLimits::default())
    }

    fn run(active: &mut ActiveDescriptor) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        loop {
            let chunk = active.next_chunk();
            if chunk.is_empty() {
                break;
            }
            active.advance(&chunk);
            chunks.push(chunk);
        }
        chunks
    }

    #[test]
    fn test_aligned_chunk() {
        assert_eq!(aligned_chunk(0x1000, 128), 128);
        assert_eq!(aligned_chunk(0x1040, 128), 64);
        assert_eq!(aligned_chunk(0x1001, 128), 1);
        assert_eq!(aligned_chunk(0x1006, 256), 2);
        assert_eq!(aligned_chunk(0, 256), 256);
    }

    #[test]
    fn test_chunk_limits_follow_bypass() {
        let desc = Descriptor::linear(0, 0x1000, 1024).with_bypass(true, false);
        let active = ActiveDescriptor::new(0, 0, desc, ChunkLimits::default());
        assert_eq!(active.max_read, 256);
        assert_eq!(active.max_write, 128);
        assert_eq!(active.next_chunk().read, 128);
    }

    #[test]
    fn test_linear_byte_conservation() {
        let mut active = linear(0x1003, 0x2000, 300);
        let chunks = run(&mut active);

        let read: u32 = chunks.iter().map(|c| c.read).sum();
        let written: u32 = chunks.iter().map(|c| c.write).sum();
        assert_eq!(read, 300);
        assert_eq!(written, 300);
        assert_eq!(active.bytes_to_read, 0);
        assert_eq!(active.bytes_to_write, 0);
        assert_eq!(active.desc.header.src, 0x1003 + 300);
        assert_eq!(active.desc.header.dst, 0x2000 + 300);
        assert_eq!(active.desc.kind, DescriptorKind::Linear { length: 0 });
        assert!(active.is_complete());
    }

    #[test]
    fn test_linear_chunks_stay_aligned() {
        let mut active = linear(0x1004, 0x2004, 64);
        let chunks = run(&mut active);
        // Grows with the alignment, then the 4-byte tail
        let sizes: Vec<u32> = chunks.iter().map(|c| c.read).collect();
        assert_eq!(sizes, vec![4, 8, 16, 32, 4]);
        for c in &chunks {
            assert_eq!(c.src_va % c.read, 0);
            assert_eq!(c.dst_va % c.write, 0);
        }
    }

    #[test]
    fn test_zero_length_completes_immediately() {
        let active = linear(0x1000, 0x2000, 0);
        assert!(active.next_chunk().is_empty());
    }

    #[test]
    fn test_2d_walk() {
        let desc = Descriptor::two_d(0x1000, 0x2000, Region2d::new(8, 3, 16, 32));
        let mut active = ActiveDescriptor::new(0, 0, desc, ChunkLimits::default());
        assert_eq!(active.bytes_to_read, 8);
        assert_eq!(active.lines_to_write, 3);

        let chunks = run(&mut active);
        let src: Vec<u32> = chunks.iter().map(|c| c.src_va).collect();
        let dst: Vec<u32> = chunks.iter().map(|c| c.dst_va).collect();
        assert_eq!(src, vec![0x1000, 0x1010, 0x1020]);
        assert_eq!(dst, vec![0x2000, 0x2020, 0x2040]);

        let r = active.desc.region().unwrap();
        assert_eq!(r.height, 0);
        assert_eq!(r.width, 0);
        assert_eq!(active.lines_to_read, 0);
        assert_eq!(active.desc.header.src, 0x1030);
    }

    #[test]
    fn test_2d_resumes_from_offsets() {
        let region = Region2d::new(8, 2, 8, 8).with_offsets(6, 6);
        let desc = Descriptor::two_d(0x1000, 0x2000, region);
        let mut active = ActiveDescriptor::new(0, 0, desc, ChunkLimits::default());
        assert_eq!(active.bytes_to_read, 2);

        let chunks = run(&mut active);
        assert_eq!(chunks[0], Chunk { src_va: 0x1006, dst_va: 0x2006, read: 2, write: 2 });
        assert_eq!(chunks[1], Chunk { src_va: 0x1008, dst_va: 0x2008, read: 8, write: 8 });
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn test_2d_expand_steps() {
        let region = Region2d::new(3, 1, 4, 8).with_transform(Transform::ExpandUpper);
        let desc = Descriptor::two_d(0x1000, 0x2000, region);
        let mut active = ActiveDescriptor::new(0, 0, desc, ChunkLimits::default());
        assert_eq!(active.dst_roi_width, 6);

        let chunks = run(&mut active);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.read == 1 && c.write == 2));
        assert_eq!(chunks[2].dst_va, 0x2004);
    }

    #[test]
    fn test_2d_compress_steps() {
        let region = Region2d::new(4, 2, 4, 4).with_transform(Transform::CompressLower);
        let desc = Descriptor::two_d(0x1000, 0x2000, region);
        let mut active = ActiveDescriptor::new(0, 0, desc, ChunkLimits::default());
        let chunks = run(&mut active);
        assert_eq!(chunks.len(), 4);
        assert!(chunks.iter().all(|c| c.read == 2 && c.write == 1));
        assert_eq!(chunks[2].src_va, 0x1004);
        assert_eq!(chunks[2].dst_va, 0x2004);
    }

    #[test]
    fn test_2d_compress_odd_width() {
        let region = Region2d::new(3, 2, 4, 4).with_transform(Transform::CompressLower);
        let desc = Descriptor::two_d(0x1000, 0x2000, region);
        let mut active = ActiveDescriptor::new(0, 0, desc, ChunkLimits::default());
        assert_eq!(active.dst_roi_width, 1);

        let chunks = run(&mut active);
        assert_eq!(
            chunks,
            vec![
                Chunk { src_va: 0x1000, dst_va: 0x2000, read: 2, write: 1 },
                // The odd byte is read and dropped
                Chunk { src_va: 0x1002, dst_va: 0x2004, read: 1, write: 0 },
                Chunk { src_va: 0x1004, dst_va: 0x2004, read: 2, write: 1 },
            ]
        );
        assert_eq!(active.desc.region().unwrap().height, 0);
        assert!(active.is_complete());
    }

    #[test]
    fn test_2d_swap_odd_width() {
        let region = Region2d::new(3, 2, 4, 4).with_transform(Transform::Swap);
        let desc = Descriptor::two_d(0x1000, 0x2000, region);
        let mut active = ActiveDescriptor::new(0, 0, desc, ChunkLimits::default());

        let chunks = run(&mut active);
        let sizes: Vec<(u32, u32)> = chunks.iter().map(|c| (c.read, c.write)).collect();
        assert_eq!(sizes, vec![(2, 2), (1, 1), (2, 2), (1, 1)]);
        assert_eq!(chunks[1].dst_va, 0x2002);
        assert_eq!(chunks[2].src_va, 0x1004);
        assert_eq!(chunks[3].dst_va, 0x2006);
        assert!(active.is_complete());
    }

    #[test]
    fn test_2d_zero_height() {
        let desc = Descriptor::two_d(0x1000, 0x2000, Region2d::new(8, 0, 8, 8));
        let active = ActiveDescriptor::new(0, 0, desc, ChunkLimits::default());
        assert!(active.next_chunk().is_empty());
    }

    #[test]
    fn test_new_clears_done() {
        let mut desc = Descriptor::linear(0, 0x100, 4);
        desc.header.done = true;
        let active = ActiveDescriptor::new(0, 0, desc, ChunkLimits::default());
        assert!(!active.desc.header.done);
        assert!(!active.stopped_early());
    }
}
