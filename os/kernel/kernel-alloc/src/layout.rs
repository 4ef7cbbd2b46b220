//! # Kernel Layout
//!
//! Derives the kernel's fixed mappings from the linked sections and the heap
//! constants. The same list seeds the kernel paging context and the kernel
//! VMM context, so the two always agree.
//!
//! ```text
//! phys 0 ┌──────────────┐  lowmem   RW
//!  1 MiB ├──────────────┤  .text    RO
//!        ├──────────────┤  .rodata  RO
//!        ├──────────────┤  .data    RW
//!        ├──────────────┤  .bss     RW
//!        ├──────────────┤  lowmem   RW
//!  8 MiB ├──────────────┤  heap     RW
//! 24 MiB ├──────────────┤  lowmem   RW
//!        └──────────────┘  min(RAM, LOWMEM_SIZE)
//! ```
//!
//! Everything is mapped at `HIGHER_HALF_BASE + pa`.

use crate::frame_alloc::PhysRange;
use alloc::vec::Vec;
use kernel_info::boot::{FramebufferInfo, KernelMemInfo, MemoryMap};
use kernel_info::memory::{
    HIGHER_HALF_BASE, KERNEL_HEAP_PHYS_START, KERNEL_HEAP_SIZE, LEGACY_LOW_MEMORY_END,
    LOWMEM_SIZE, PAGE_SIZE,
};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, VirtualAddress, VirtualPage};
use kernel_vmem::{FixedMapping, PageEntryBits, align_down, align_up};

const FOUR_GIB: u64 = 1 << 32;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    #[error("section {name} at {start} is not linked into the direct map")]
    OutsideDirectMap {
        name: &'static str,
        start: VirtualAddress,
    },
    #[error("kernel image ends at {0}, past the heap start")]
    ImageOverlapsHeap(PhysicalAddress),
    #[error("low memory ends at {0:#x}, the heap needs {1:#x}")]
    NotEnoughLowMemory(u64, u64),
}

/// Ordered, non-overlapping fixed mappings of the kernel half.
#[derive(Debug, Clone)]
pub struct KernelLayout {
    mappings: Vec<FixedMapping>,
}

struct Piece {
    name: &'static str,
    start: u32,
    end: u32,
    flags: PageEntryBits,
}

impl KernelLayout {
    /// Build the layout for an image described by `image` on a machine whose
    /// usable RAM ends at `ram_end`.
    ///
    /// # Errors
    /// - [`LayoutError::OutsideDirectMap`] if a section is not linked at
    ///   `HIGHER_HALF_BASE + LMA`.
    /// - [`LayoutError::ImageOverlapsHeap`] if the image runs into the heap.
    /// - [`LayoutError::NotEnoughLowMemory`] if RAM ends before the heap does.
    pub fn new(image: &KernelMemInfo, ram_end: u64) -> Result<Self, LayoutError> {
        let heap_end = KERNEL_HEAP_PHYS_START + KERNEL_HEAP_SIZE;
        let direct_map_end = clip_direct_map(ram_end);
        if direct_map_end < heap_end {
            return Err(LayoutError::NotEnoughLowMemory(ram_end, u64::from(heap_end)));
        }
        if image.physical_end().as_u32() > KERNEL_HEAP_PHYS_START {
            return Err(LayoutError::ImageOverlapsHeap(image.physical_end()));
        }

        let mut pieces = Vec::with_capacity(5);
        for (name, section) in image.sections() {
            if section.is_empty() {
                continue;
            }
            let start = section.virtual_start.as_u32();
            if start < HIGHER_HALF_BASE || start - HIGHER_HALF_BASE >= LOWMEM_SIZE {
                return Err(LayoutError::OutsideDirectMap {
                    name,
                    start: section.virtual_start,
                });
            }
            let writable = matches!(name, ".data" | ".bss");
            pieces.push(Piece {
                name,
                start: align_down(section.physical_start().as_u32(), PAGE_SIZE),
                end: page_end(section.virtual_end.as_u32() - HIGHER_HALF_BASE),
                flags: if writable {
                    PageEntryBits::new_kernel_rw()
                } else {
                    PageEntryBits::new_kernel_ro()
                },
            });
        }
        pieces.push(Piece {
            name: "heap",
            start: KERNEL_HEAP_PHYS_START,
            end: heap_end,
            flags: PageEntryBits::new_kernel_rw(),
        });

        let mut mappings = Vec::with_capacity(pieces.len() * 2 + 1);
        let mut cursor = 0;
        for mut piece in pieces {
            piece.start = piece.start.max(cursor);
            if piece.end <= piece.start {
                continue;
            }
            if piece.start > cursor {
                mappings.push(fixed("lowmem", cursor, piece.start, PageEntryBits::new_kernel_rw()));
            }
            mappings.push(fixed(piece.name, piece.start, piece.end, piece.flags));
            cursor = piece.end;
        }
        if cursor < direct_map_end {
            mappings.push(fixed("lowmem", cursor, direct_map_end, PageEntryBits::new_kernel_rw()));
        }

        Ok(Self { mappings })
    }

    #[inline]
    #[must_use]
    pub fn fixed_mappings(&self) -> &[FixedMapping] {
        &self.mappings
    }

    pub fn log(&self) {
        for m in &self.mappings {
            log::info!(
                "layout: {:<8} {}..{:#010x} -> {} ({} pages, {})",
                m.name,
                m.virt.base(),
                m.virt_end(),
                m.phys.base(),
                m.pages,
                if m.flags.writable() { "rw" } else { "ro" }
            );
        }
    }
}

fn fixed(name: &'static str, start: u32, end: u32, flags: PageEntryBits) -> FixedMapping {
    FixedMapping {
        name,
        virt: VirtualPage::containing_address(VirtualAddress::new(HIGHER_HALF_BASE + start)),
        phys: PhysicalPage::containing_address(PhysicalAddress::new(start)),
        pages: (end - start) / PAGE_SIZE,
        flags,
    }
}

const fn page_end(addr: u32) -> u32 {
    match align_up(addr, PAGE_SIZE) {
        Some(v) => v,
        None => u32::MAX & !(PAGE_SIZE - 1),
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn clip_direct_map(ram_end: u64) -> u32 {
    let end = if ram_end < LOWMEM_SIZE as u64 {
        ram_end as u32
    } else {
        LOWMEM_SIZE
    };
    align_down(end, PAGE_SIZE)
}

/// Physical ranges the frame allocator must never hand out.
///
/// Covers the legacy first megabyte, the kernel image, the heap, every
/// non-available memory-map region and every hole between available ones,
/// the framebuffer, and everything at or above `LOWMEM_SIZE`.
#[must_use]
pub fn boot_reserved_ranges(
    image: &KernelMemInfo,
    memory_map: &MemoryMap<'_>,
    framebuffer: Option<&FramebufferInfo>,
) -> Vec<PhysRange> {
    let mut reserved = Vec::new();
    reserved.push(PhysRange::new(0, u64::from(LEGACY_LOW_MEMORY_END)));
    reserved.push(PhysRange::new(
        image.physical_start().as_u64(),
        image.physical_end().as_u64(),
    ));
    reserved.push(PhysRange::from_len(
        u64::from(KERNEL_HEAP_PHYS_START),
        u64::from(KERNEL_HEAP_SIZE),
    ));

    let mut available = Vec::new();
    for region in memory_map.iter() {
        if region.kind.is_usable() {
            available.push(PhysRange::new(region.base, region.end()));
        } else {
            reserved.push(PhysRange::new(region.base, region.end()));
        }
    }

    available.sort_unstable_by_key(|r| r.start);
    let mut cursor = 0;
    for r in &available {
        if r.start > cursor {
            reserved.push(PhysRange::new(cursor, r.start));
        }
        cursor = cursor.max(r.end);
    }
    if cursor < FOUR_GIB {
        reserved.push(PhysRange::new(cursor, FOUR_GIB));
    }

    if let Some(fb) = framebuffer {
        reserved.push(PhysRange::from_len(fb.address, fb.size_bytes()));
    }
    reserved.push(PhysRange::new(u64::from(LOWMEM_SIZE), FOUR_GIB));

    reserved.retain(|r| !r.is_empty());
    reserved
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_info::boot::SectionInfo;

    fn image() -> KernelMemInfo {
        KernelMemInfo {
            text: SectionInfo::new(0xC010_0000, 0xC010_3000),
            rodata: SectionInfo::new(0xC010_3000, 0xC010_4800),
            data: SectionInfo::new(0xC010_5000, 0xC010_6000),
            bss: SectionInfo::new(0xC010_6000, 0xC010_9000),
        }
    }

    fn names(l: &KernelLayout) -> Vec<&'static str> {
        l.fixed_mappings().iter().map(|m| m.name).collect()
    }

    #[test]
    fn pieces_cover_low_memory_in_order() {
        let l = KernelLayout::new(&image(), 64 << 20).unwrap();
        assert_eq!(
            names(&l),
            ["lowmem", ".text", ".rodata", ".data", ".bss", "lowmem", "heap", "lowmem"]
        );
        let mut expected = 0u64;
        for m in l.fixed_mappings() {
            assert_eq!(u64::from(m.phys.base().as_u32()), expected, "{}", m.name);
            assert_eq!(m.virt.base().as_u32(), HIGHER_HALF_BASE + m.phys.base().as_u32());
            expected += u64::from(m.pages) * u64::from(PAGE_SIZE);
        }
        assert_eq!(expected, 64 << 20);
    }

    #[test]
    fn code_and_constants_are_read_only() {
        let l = KernelLayout::new(&image(), 64 << 20).unwrap();
        for m in l.fixed_mappings() {
            let ro = matches!(m.name, ".text" | ".rodata");
            assert_eq!(m.flags.writable(), !ro, "{}", m.name);
            assert!(!m.flags.user_access());
        }
    }

    #[test]
    fn direct_map_is_clipped_to_lowmem() {
        let l = KernelLayout::new(&image(), 4 << 30).unwrap();
        let last = l.fixed_mappings().last().unwrap();
        assert_eq!(last.virt_end(), u64::from(HIGHER_HALF_BASE + LOWMEM_SIZE));
    }

    #[test]
    fn too_little_ram_for_the_heap() {
        assert!(matches!(
            KernelLayout::new(&image(), 16 << 20),
            Err(LayoutError::NotEnoughLowMemory(..))
        ));
    }

    #[test]
    fn image_must_not_reach_the_heap() {
        let mut img = image();
        img.bss = SectionInfo::new(0xC010_6000, 0xC090_0000);
        assert!(matches!(
            KernelLayout::new(&img, 64 << 20),
            Err(LayoutError::ImageOverlapsHeap(_))
        ));
    }

    #[test]
    fn sections_must_be_linked_high() {
        let mut img = image();
        img.text = SectionInfo::new(0x0010_0000, 0x0010_3000);
        assert!(matches!(
            KernelLayout::new(&img, 64 << 20),
            Err(LayoutError::OutsideDirectMap { name: ".text", .. })
        ));
    }
}
