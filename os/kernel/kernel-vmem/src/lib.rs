//! # Virtual Memory Support
//!
//! i386 (non-PAE) paging helpers for the kernel.
//!
//! ## What you get
//! - A [`PagingContext`] naming one page directory, and an
//!   [`AddressSpace`] view to create, map, unmap, query and activate it.
//! - [`PageEntryBits`], the 32-bit entry layout shared by PDEs and PTEs.
//! - 4 KiB-aligned [`PageDirectory`](page_table::pd::PageDirectory) and
//!   [`PageTable`](page_table::pt::PageTable) wrappers with typed indices.
//! - A tiny allocator/mapper interface ([`FrameAlloc`], [`PhysMapper`]).
//! - The low-memory [`direct_map`] translation and the [`self_map`] window.
//!
//! ## i386 Virtual Address → Physical Address Walk
//!
//! Each 32-bit virtual address is divided into three fields:
//!
//! ```text
//! | 31‒22 | 21‒12 | 11‒0   |
//! |   PD  |   PT  | Offset |
//! ```
//!
//! The CPU uses the first two fields as **indices** into two levels of tables,
//! each containing 1024 (2¹⁰) entries of 4 bytes:
//!
//! ```text
//!  CR3 → PD  →  PT  →  Physical Page
//!        │      │
//!        │      └───► PTE → maps a 4 KiB page
//!        └──────────► PDE → PS=1 → maps a 4 MiB page (CR4.PSE)
//! ```
//!
//! ### Self-map
//!
//! The last directory slot links the directory itself. Walking through it
//! treats the directory as a page table, so the active context's tables appear
//! as ordinary memory at `0xFFC0_0000` and the directory at `0xFFFF_F000`.
//! Nothing may be mapped in that 4 MiB window.
//!
//! ### Granularity
//!
//! Everything mapped through [`AddressSpace::map_one`] is a 4 KiB page. 4 MiB
//! leaves only appear in the boot loader's bootstrap directory; they are
//! decoded by [`AddressSpace::query`] but never created here.

#![cfg_attr(not(test), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

pub mod address_space;
pub mod direct_map;
mod page_entry_bits;
pub mod page_table;
pub mod self_map;
mod tlb;

pub use crate::address_space::{AddressSpace, FixedMapping, PagingContext};
pub use crate::page_entry_bits::PageEntryBits;
pub use crate::tlb::invalidate_tlb_page;
use crate::page_table::pd::PageDirectory;
use crate::page_table::pt::PageTable;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};

/// Re-export constants as info module.
pub use kernel_info::memory as info;

/// Errors of the paging layer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PagingError {
    #[error("address {0:#010x} is not page aligned")]
    Unaligned(u32),
    #[error("no physical frame left for a page table")]
    OutOfMemory,
    #[error("{0} is covered by a 4 MiB page")]
    LargePageConflict(VirtualAddress),
    #[error("{0} lies in the self-map window")]
    SelfMapSlot(VirtualAddress),
    #[error("{0} is not mapped")]
    NotMapped(VirtualAddress),
    #[error("mapping runs past the end of the address space")]
    Overflow,
}

/// Minimal frame allocator used to obtain **physical** 4 KiB frames
/// for page tables and page contents.
///
/// The implementation decides where frames come from (bootstrap pool,
/// bitmap, etc.). Returned frames **must** be reachable through the
/// [`PhysMapper`] they are used with.
///
/// Returns `None` on out-of-memory.
pub trait FrameAlloc {
    /// Allocate one 4 KiB *physical* frame.
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>>;
}

impl<A: FrameAlloc + ?Sized> FrameAlloc for &mut A {
    #[inline]
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
        (**self).alloc_4k()
    }
}

/// Converts physical addresses to *temporarily* usable pointers in the current
/// virtual address space.
///
/// Typical patterns:
/// - **Kernel**: the low-memory direct map; adds `HIGHER_HALF_BASE`.
/// - **Tests**: a `Vec` of aligned frames standing in for RAM.
///
/// Implementors promise that every frame handed out by the [`FrameAlloc`]
/// they are paired with can be turned into a writable reference; the provided
/// table accessors rely on that.
pub trait PhysMapper {
    /// Convert a *physical* address to a usable mutable reference.
    ///
    /// # Safety
    /// - `pa` must be mapped writable in the current address space.
    /// - The mapping must remain valid for `'a`.
    /// - Type `T` must match the bytes at `pa`, and no other live reference
    ///   may alias them.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;

    /// Borrow the page directory stored in `page`.
    #[inline]
    fn directory_mut<'a>(&self, page: PhysicalPage<Size4K>) -> &'a mut PageDirectory {
        // SAFETY: directory frames come from the paired allocator.
        unsafe { self.phys_to_mut::<PageDirectory>(page.base()) }
    }

    /// Borrow the page table stored in `page`.
    #[inline]
    fn table_mut<'a>(&self, page: PhysicalPage<Size4K>) -> &'a mut PageTable {
        // SAFETY: table frames come from the paired allocator.
        unsafe { self.phys_to_mut::<PageTable>(page.base()) }
    }

    /// Fill one frame with zeroes.
    #[inline]
    fn zero_frame(&self, page: PhysicalPage<Size4K>) {
        // SAFETY: the frame comes from the paired allocator.
        let bytes = unsafe { self.phys_to_mut::<[u8; 4096]>(page.base()) };
        bytes.fill(0);
    }
}

/// Align `x` down to the nearest multiple of `a`.
///
/// ### Preconditions
/// - `a` must be **non-zero** and a **power of two**.
///
/// ### Examples
/// ```rust
/// # use kernel_vmem::align_down;
/// assert_eq!(align_down(0,      4096), 0);
/// assert_eq!(align_down(4095,   4096), 0);
/// assert_eq!(align_down(4096,   4096), 4096);
/// assert_eq!(align_down(0xC010_1234, 4096), 0xC010_1000);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_down(x: u32, a: u32) -> u32 {
    x & !(a - 1)
}

/// Align `x` up to the nearest multiple of `a`, or `None` past `u32::MAX`.
///
/// ### Preconditions
/// - `a` must be **non-zero** and a **power of two**.
///
/// ### Examples
/// ```rust
/// # use kernel_vmem::align_up;
/// assert_eq!(align_up(0,    4096), Some(0));
/// assert_eq!(align_up(1,    4096), Some(4096));
/// assert_eq!(align_up(4097, 4096), Some(8192));
/// assert_eq!(align_up(0xFFFF_F001, 4096), None);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_up(x: u32, a: u32) -> Option<u32> {
    match x.checked_add(a - 1) {
        Some(v) => Some(v & !(a - 1)),
        None => None,
    }
}
