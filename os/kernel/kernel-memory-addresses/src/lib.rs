//! # Virtual and Physical Memory Address Types (i386)
//!
//! Strongly typed wrappers for raw 32-bit memory addresses and page bases used
//! in paging and memory management code.
//!
//! ## Overview
//!
//! The types prevent mixing virtual and physical addresses at compile time while
//! remaining zero-cost wrappers around `u32` values:
//!
//! | Concept | Generic | Description |
//! |----------|----------|-------------|
//! | [`MemoryAddress`] | – | A raw 32-bit address, either physical or virtual. |
//! | [`MemoryPage<S>`] | [`S: PageSize`](PageSize) | A page-aligned base address of a page of size `S`. |
//! | [`MemoryAddressOffset<S>`] | [`S: PageSize`](PageSize) | An offset within a page of size `S`. |
//!
//! These are then wrapped to distinguish between virtual and physical spaces:
//!
//! | Wrapper | Meaning |
//! |----------|----------|
//! | [`VirtualAddress`] / [`VirtualPage<S>`] | Refer to virtual (page-table translated) memory. |
//! | [`PhysicalAddress`] / [`PhysicalPage<S>`] | Refer to physical memory frames or MMIO regions. |
//!
//! ## Page Sizes
//!
//! Two page sizes exist in non-PAE 32-bit paging:
//!
//! - [`Size4K`]: 4 KiB pages mapped through a page table
//! - [`Size4M`]: 4 MiB pages mapped directly by a directory entry (`CR4.PSE`)
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0xC010_1234);
//! assert_eq!(va.directory_index(), 0x300);
//! assert_eq!(va.table_index(), 0x101);
//!
//! let (page, off) = va.split::<Size4K>();
//! assert_eq!(page.join(off), va);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::inline_always)]

mod memory_address;
mod memory_address_offset;
mod memory_page;
mod page_size;
mod physical_address;
mod physical_page;
mod virtual_address;
mod virtual_page;

pub use memory_address::MemoryAddress;
pub use memory_address_offset::MemoryAddressOffset;
pub use memory_page::MemoryPage;
pub use page_size::{PageSize, Size4K, Size4M, page_count};
pub use physical_address::PhysicalAddress;
pub use physical_page::PhysicalPage;
pub use virtual_address::VirtualAddress;
pub use virtual_page::VirtualPage;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_and_join_4k() {
        let va = VirtualAddress::new(0xFFC0_3ABC);
        let (p, o) = va.split::<Size4K>();
        assert_eq!(p.base().as_u32(), 0xFFC0_3000);
        assert_eq!(o.as_u32(), 0xABC);
        assert_eq!(p.join(o), va);
    }

    #[test]
    fn split_and_join_4m() {
        let pa = PhysicalAddress::new(0x0123_4567);
        let (p, o) = pa.split::<Size4M>();
        assert_eq!(p.base().as_u32(), 0x0100_0000);
        assert_eq!(o.as_u32(), 0x23_4567);
        assert_eq!(p.join(o), pa);
    }

    #[test]
    fn directory_and_table_indices() {
        let self_map_dir = VirtualAddress::new(0xFFFF_F000);
        assert_eq!(self_map_dir.directory_index(), 1023);
        assert_eq!(self_map_dir.table_index(), 1023);

        let higher_half = VirtualAddress::new(0xC000_0000);
        assert_eq!(higher_half.directory_index(), 768);
        assert_eq!(higher_half.table_index(), 0);
    }

    #[test]
    fn page_arithmetic_stops_at_4gib() {
        let last = VirtualPage::<Size4K>::from_index(0xF_FFFF);
        assert_eq!(last.base().as_u32(), 0xFFFF_F000);
        assert!(last.checked_add_pages(1).is_none());
        assert_eq!(
            VirtualPage::<Size4K>::from_index(1).checked_add_pages(3),
            Some(VirtualPage::from_index(4))
        );
    }

    #[test]
    fn alignment_helpers() {
        let a = MemoryAddress::new(0x1001);
        assert!(!a.is_aligned::<Size4K>());
        assert_eq!(a.align_down::<Size4K>().as_u32(), 0x1000);
        assert_eq!(a.checked_align_up::<Size4K>().map(MemoryAddress::as_u32), Some(0x2000));
        assert_eq!(MemoryAddress::new(u32::MAX).checked_align_up::<Size4K>(), None);
    }

    #[test]
    fn typed_page_rejects_unaligned_conversion() {
        assert!(VirtualPage::<Size4K>::try_from(VirtualAddress::new(0x1234)).is_err());
        assert!(VirtualPage::<Size4K>::try_from(VirtualAddress::new(0x2000)).is_ok());
    }

    #[test]
    fn display_is_fixed_width_hex() {
        assert_eq!(format!("{}", VirtualAddress::new(0xC000_0000)), "0xC0000000");
        assert_eq!(format!("{:?}", PhysicalAddress::new(0x1000)), "PA(0x00001000)");
    }
}
