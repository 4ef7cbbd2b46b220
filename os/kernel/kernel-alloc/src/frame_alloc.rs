//! # Bitmap Physical Frame Allocator
//!
//! One bit per 4 KiB frame of the full 32-bit physical range:
//!
//! ```text
//! byte i, bit b  →  frame (i * 8 + b)  →  physical (i * 8 + b) * 4096
//! 1 = allocated or reserved, 0 = free
//! ```
//!
//! The bitmap is 128 KiB and lives inside the allocator, so a `static`
//! instance ends up in `.bss` and needs no heap.
//!
//! Allocation returns the lowest free frame. A search hint remembers the
//! lowest byte that may still contain a zero bit; bytes below it are known to
//! be full and are not rescanned.

use kernel_memory_addresses::{PhysicalPage, Size4K};
use kernel_vmem::FrameAlloc;

/// Number of 4 KiB frames in a 32-bit physical address space.
pub const FRAME_COUNT: usize = 1 << 20;

const BITMAP_BYTES: usize = FRAME_COUNT / 8;
const FRAME_SHIFT: u32 = 12;

/// Errors of the physical frame allocator.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PmmError {
    #[error("out of physical memory")]
    OutOfMemory,
}

/// A half-open physical byte range `[start, end)`.
///
/// 64-bit so that firmware regions above 4 GiB can be described and clipped.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PhysRange {
    pub start: u64,
    pub end: u64,
}

impl PhysRange {
    #[inline]
    #[must_use]
    pub const fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Build from a base and a length, saturating at `u64::MAX`.
    #[inline]
    #[must_use]
    pub const fn from_len(start: u64, len: u64) -> Self {
        Self {
            start,
            end: start.saturating_add(len),
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Bitmap frame allocator.
pub struct BitmapFrameAlloc {
    bitmap: [u8; BITMAP_BYTES],
    used: usize,
    hint: usize,
}

impl Default for BitmapFrameAlloc {
    fn default() -> Self {
        Self::new()
    }
}

impl BitmapFrameAlloc {
    /// An allocator with every frame free.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bitmap: [0; BITMAP_BYTES],
            used: 0,
            hint: 0,
        }
    }

    /// Reset to all-free, then mark every frame overlapping `reserved` as used.
    pub fn init<I>(&mut self, reserved: I)
    where
        I: IntoIterator<Item = PhysRange>,
    {
        self.bitmap.fill(0);
        self.used = 0;
        self.hint = 0;
        for range in reserved {
            self.reserve_range(range);
        }
        log::info!(
            "pmm: {} frames free, {} used",
            self.free_count(),
            self.used_count()
        );
    }

    /// Mark every frame touching `range` as used (rounded outwards).
    pub fn reserve_range(&mut self, range: PhysRange) {
        if range.is_empty() {
            return;
        }
        let first = frame_floor(range.start);
        let last = frame_ceil(range.end);
        log::trace!(
            "pmm: reserve {:#x}..{:#x} (frames {first}..{last})",
            range.start,
            range.end
        );
        for frame in first..last {
            if self.set(frame) {
                self.used += 1;
            }
        }
    }

    /// Mark every frame fully inside `range` as free (rounded inwards).
    pub fn release_range(&mut self, range: PhysRange) {
        if range.is_empty() {
            return;
        }
        let first = frame_ceil(range.start);
        let last = frame_floor(range.end);
        for frame in first..last {
            if self.clear(frame) {
                self.used -= 1;
            }
        }
        self.hint = self.hint.min(first / 8);
    }

    /// Hand out the lowest free frame.
    ///
    /// # Errors
    /// [`PmmError::OutOfMemory`] once every frame is used.
    pub fn alloc_frame(&mut self) -> Result<PhysicalPage<Size4K>, PmmError> {
        let start = self.hint;
        let Some(offset) = self.bitmap[start..].iter().position(|b| *b != 0xFF) else {
            self.hint = BITMAP_BYTES;
            return Err(PmmError::OutOfMemory);
        };

        let byte = start + offset;
        let bit = self.bitmap[byte].trailing_ones() as usize;
        self.bitmap[byte] |= 1 << bit;
        self.used += 1;
        self.hint = byte;

        let frame = PhysicalPage::from_index(frame_index(byte * 8 + bit));
        log::trace!("pmm: alloc {frame}");
        Ok(frame)
    }

    /// Return `frame` to the pool.
    ///
    /// ### Debug assertions
    /// - Asserts the frame is currently allocated.
    pub fn free_frame(&mut self, frame: PhysicalPage<Size4K>) {
        let index = frame.index() as usize;
        debug_assert!(self.is_used(frame), "double free of {frame}");
        if self.clear(index) {
            self.used -= 1;
        }
        self.hint = self.hint.min(index / 8);
        log::trace!("pmm: free {frame}");
    }

    #[inline]
    #[must_use]
    pub const fn is_used(&self, frame: PhysicalPage<Size4K>) -> bool {
        let index = frame.index() as usize;
        self.bitmap[index / 8] & (1 << (index % 8)) != 0
    }

    #[inline]
    #[must_use]
    pub const fn used_count(&self) -> usize {
        self.used
    }

    #[inline]
    #[must_use]
    pub const fn free_count(&self) -> usize {
        FRAME_COUNT - self.used
    }

    /// Set the bit for `frame`; `true` if it was clear.
    #[inline]
    const fn set(&mut self, frame: usize) -> bool {
        let mask = 1 << (frame % 8);
        let byte = &mut self.bitmap[frame / 8];
        let was_clear = *byte & mask == 0;
        *byte |= mask;
        was_clear
    }

    /// Clear the bit for `frame`; `true` if it was set.
    #[inline]
    const fn clear(&mut self, frame: usize) -> bool {
        let mask = 1 << (frame % 8);
        let byte = &mut self.bitmap[frame / 8];
        let was_set = *byte & mask != 0;
        *byte &= !mask;
        was_set
    }
}

impl FrameAlloc for BitmapFrameAlloc {
    #[inline]
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
        self.alloc_frame().ok()
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn frame_floor(addr: u64) -> usize {
    let frame = addr >> FRAME_SHIFT;
    if frame > FRAME_COUNT as u64 {
        FRAME_COUNT
    } else {
        frame as usize
    }
}

const fn frame_ceil(addr: u64) -> usize {
    frame_floor(addr.saturating_add((1 << FRAME_SHIFT) - 1))
}

#[allow(clippy::cast_possible_truncation)]
const fn frame_index(frame: usize) -> u32 {
    frame as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_memory_addresses::PhysicalAddress;

    fn boxed() -> Box<BitmapFrameAlloc> {
        Box::new(BitmapFrameAlloc::new())
    }

    #[test]
    fn first_allocation_is_lowest_free_frame() {
        let mut pmm = boxed();
        pmm.init([PhysRange::new(0, 0x10_0000)]);
        let f = pmm.alloc_frame().unwrap();
        assert_eq!(f.base(), PhysicalAddress::new(0x10_0000));
        assert_eq!(pmm.used_count(), 257);
    }

    #[test]
    fn reservation_rounds_outwards() {
        let mut pmm = boxed();
        pmm.init([PhysRange::new(0x1001, 0x2001)]);
        assert!(!pmm.is_used(PhysicalPage::from_index(0)));
        assert!(pmm.is_used(PhysicalPage::from_index(1)));
        assert!(pmm.is_used(PhysicalPage::from_index(2)));
        assert!(!pmm.is_used(PhysicalPage::from_index(3)));
        assert_eq!(pmm.used_count(), 2);
    }

    #[test]
    fn release_rounds_inwards() {
        let mut pmm = boxed();
        pmm.init([PhysRange::new(0, 0x10_000)]);
        pmm.release_range(PhysRange::new(0x1800, 0x4800));
        assert!(pmm.is_used(PhysicalPage::from_index(1)));
        assert!(!pmm.is_used(PhysicalPage::from_index(2)));
        assert!(!pmm.is_used(PhysicalPage::from_index(3)));
        assert!(pmm.is_used(PhysicalPage::from_index(4)));
    }

    #[test]
    fn overlapping_reservations_count_once() {
        let mut pmm = boxed();
        pmm.init([
            PhysRange::new(0, 0x8000),
            PhysRange::new(0x4000, 0xC000),
        ]);
        assert_eq!(pmm.used_count(), 12);
    }

    #[test]
    fn alloc_then_free_restores_state() {
        let mut pmm = boxed();
        pmm.init([PhysRange::new(0, 0x3000)]);
        let before = pmm.used_count();
        let f = pmm.alloc_frame().unwrap();
        pmm.free_frame(f);
        assert_eq!(pmm.used_count(), before);
        assert!(!pmm.is_used(f));
        assert_eq!(pmm.alloc_frame().unwrap(), f);
    }

    #[test]
    fn freed_low_frame_is_reused_before_higher_ones() {
        let mut pmm = boxed();
        pmm.init([]);
        let frames: Vec<_> = (0..20).map(|_| pmm.alloc_frame().unwrap()).collect();
        pmm.free_frame(frames[3]);
        assert_eq!(pmm.alloc_frame().unwrap(), frames[3]);
        assert_eq!(pmm.alloc_frame().unwrap().index(), 20);
    }

    #[test]
    fn no_frame_is_handed_out_twice() {
        let mut pmm = boxed();
        pmm.init([PhysRange::new(0x40_000, u64::from(u32::MAX) + 1)]);
        let mut seen = std::collections::HashSet::new();
        while let Ok(f) = pmm.alloc_frame() {
            assert!(seen.insert(f.index()), "{f} returned twice");
        }
        assert_eq!(seen.len(), 64);
    }

    #[test]
    fn exhaustion_is_deterministic() {
        let mut pmm = boxed();
        pmm.init([PhysRange::new(0x2000, 1 << 32)]);
        assert_eq!(pmm.alloc_frame().unwrap().index(), 0);
        assert_eq!(pmm.alloc_frame().unwrap().index(), 1);
        assert_eq!(pmm.alloc_frame(), Err(PmmError::OutOfMemory));
        assert_eq!(pmm.alloc_frame(), Err(PmmError::OutOfMemory));
        assert_eq!(pmm.free_count(), 0);
    }

    #[test]
    fn ranges_above_four_gib_are_clipped() {
        let mut pmm = boxed();
        pmm.init([PhysRange::from_len(0xFFFF_F000, 0x10_0000)]);
        assert_eq!(pmm.used_count(), 1);
    }

    #[test]
    #[should_panic(expected = "double free")]
    #[cfg(debug_assertions)]
    fn double_free_is_caught_in_debug_builds() {
        let mut pmm = boxed();
        pmm.init([]);
        let f = pmm.alloc_frame().unwrap();
        pmm.free_frame(f);
        pmm.free_frame(f);
    }
}
