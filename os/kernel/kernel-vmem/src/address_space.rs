//! # Address Space (i386, directory-rooted)
//!
//! Strongly-typed helpers to build and manipulate one paging context: a page
//! directory plus the page tables it links.
//!
//! ## Highlights
//!
//! - [`AddressSpace::create_kernel_context`] builds the kernel context with
//!   every kernel-half page table pre-allocated and the fixed mappings in place.
//! - [`AddressSpace::create_task_context`] builds a task context sharing the
//!   kernel half.
//! - [`AddressSpace::map_one`] / [`AddressSpace::unmap_one`] install or clear
//!   one 4 KiB translation.
//! - [`AddressSpace::query`] / [`AddressSpace::translate`] walk the tables
//!   (4 KiB and 4 MiB leaves).
//! - [`AddressSpace::activate`] loads CR3.
//!
//! ## Sharing the kernel half
//!
//! All kernel-half directory slots (`768..1023`) of the kernel context link
//! tables allocated up front. Task contexts copy those slots verbatim, so a
//! kernel mapping added later lands in a table every context already links.
//!
//! ## Safety
//!
//! - `unmap_one` invalidates the TLB entry; overwriting a present entry in
//!   `map_one` does too.
//! - The provided `PhysMapper` must yield **writable** references to table frames.

use crate::page_table::pd::{L2Index, PageDirectory, PdEntry, PdEntryKind};
use crate::page_table::pt::{PageTable, PtEntry};
use crate::page_table::split_indices;
use crate::{FrameAlloc, PageEntryBits, PagingError, PhysMapper, invalidate_tlb_page, self_map};
use kernel_info::memory::{KERNEL_FIRST_DIRECTORY_INDEX, SELF_MAP_INDEX};
use kernel_memory_addresses::{
    MemoryAddressOffset, PhysicalAddress, PhysicalPage, Size4K, Size4M, VirtualAddress,
    VirtualPage,
};
use kernel_registers::cr3::Cr3;

/// Hardware-visible paging structures of one address space.
///
/// Only the directory frame is stored; tables are reached through it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PagingContext {
    directory: PhysicalPage<Size4K>,
}

impl PagingContext {
    #[inline]
    #[must_use]
    pub const fn from_directory(directory: PhysicalPage<Size4K>) -> Self {
        Self { directory }
    }

    /// Physical page of the page directory.
    #[inline]
    #[must_use]
    pub const fn directory(&self) -> PhysicalPage<Size4K> {
        self.directory
    }

    /// The CR3 value that activates this context.
    #[inline]
    #[must_use]
    pub fn cr3(&self) -> Cr3 {
        Cr3::from_directory_phys(self.directory.base(), false, false)
    }
}

/// A run of pages mapped at context creation and never handed out by the VMM.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FixedMapping {
    pub name: &'static str,
    pub virt: VirtualPage<Size4K>,
    pub phys: PhysicalPage<Size4K>,
    pub pages: u32,
    pub flags: PageEntryBits,
}

impl FixedMapping {
    /// First virtual address past the run.
    #[inline]
    #[must_use]
    pub const fn virt_end(&self) -> u64 {
        self.virt.base().as_u32() as u64 + self.pages as u64 * 4096
    }
}

/// Handle to a single, concrete address space.
pub struct AddressSpace<'m, M: PhysMapper> {
    ctx: PagingContext,
    mapper: &'m M,
}

impl<'m, M: PhysMapper> AddressSpace<'m, M> {
    #[inline]
    pub const fn new(mapper: &'m M, ctx: PagingContext) -> Self {
        Self { ctx, mapper }
    }

    #[inline]
    pub const fn context(&self) -> PagingContext {
        self.ctx
    }

    #[inline]
    pub const fn mapper(&self) -> &'m M {
        self.mapper
    }

    /// Build the kernel context.
    ///
    /// Allocates and zeroes a directory, pre-allocates one page table for every
    /// kernel-half slot, writes the self-map into the last slot and installs
    /// each of the `fixed` mappings.
    ///
    /// # Errors
    /// [`PagingError::OutOfMemory`] if the allocator runs dry, or any error of
    /// [`map_one`](Self::map_one) for a malformed fixed mapping.
    pub fn create_kernel_context<A: FrameAlloc>(
        mapper: &'m M,
        alloc: &mut A,
        fixed: &[FixedMapping],
    ) -> Result<Self, PagingError> {
        let space = Self::new_empty(mapper, alloc)?;

        let pd = space.directory_mut();
        for slot in KERNEL_FIRST_DIRECTORY_INDEX..SELF_MAP_INDEX {
            let table = alloc.alloc_4k().ok_or(PagingError::OutOfMemory)?;
            mapper.zero_frame(table);
            pd.set(
                slot_index(slot),
                PdEntry::make_next(table, PageEntryBits::new_table_link(false)),
            );
        }

        for m in fixed {
            log::debug!(
                "fixed mapping {}: {} -> {}, {} pages",
                m.name,
                m.virt,
                m.phys,
                m.pages
            );
            space.map_fixed(alloc, m)?;
        }

        Ok(space)
    }

    /// Build a task context that shares this context's kernel half.
    ///
    /// The user half starts out empty.
    ///
    /// # Errors
    /// [`PagingError::OutOfMemory`] if no frame is left for the directory.
    pub fn create_task_context<A: FrameAlloc>(
        &self,
        alloc: &mut A,
    ) -> Result<PagingContext, PagingError> {
        let task = Self::new_empty(self.mapper, alloc)?;

        let src = self.directory_mut();
        let dst = task.directory_mut();
        for slot in KERNEL_FIRST_DIRECTORY_INDEX..SELF_MAP_INDEX {
            let i = slot_index(slot);
            dst.set(i, src.get(i));
        }

        Ok(task.ctx)
    }

    /// Fresh zeroed directory with only the self-map slot filled.
    fn new_empty<A: FrameAlloc>(mapper: &'m M, alloc: &mut A) -> Result<Self, PagingError> {
        let dir = alloc.alloc_4k().ok_or(PagingError::OutOfMemory)?;
        mapper.zero_frame(dir);

        let space = Self::new(mapper, PagingContext::from_directory(dir));
        space.directory_mut().set(
            slot_index(SELF_MAP_INDEX),
            PdEntry::make_next(dir, PageEntryBits::new_kernel_rw()),
        );
        Ok(space)
    }

    /// Load CR3 with this context's directory.
    ///
    /// Does nothing on hosted builds.
    ///
    /// # Safety
    /// The code and stack of the caller must be mapped identically in the
    /// target context (true for everything in the kernel half).
    #[inline]
    pub unsafe fn activate(&self) {
        #[cfg(all(target_arch = "x86", target_os = "none"))]
        {
            use kernel_registers::StoreRegisterUnsafe;
            unsafe { self.ctx.cr3().store_unsafe() };
        }
    }

    /// Borrow the page directory.
    #[inline]
    pub(crate) fn directory_mut(&self) -> &mut PageDirectory {
        self.mapper.directory_mut(self.ctx.directory)
    }

    /// Borrow the page table in `page`.
    #[inline]
    pub(crate) fn table_mut(&self, page: PhysicalPage<Size4K>) -> &mut PageTable {
        self.mapper.table_mut(page)
    }

    /// Read directory slot `index`.
    #[must_use]
    pub fn directory_entry(&self, index: usize) -> PdEntry {
        self.directory_mut().get(slot_index(index))
    }

    /// Map **one** 4 KiB page at `va → pa` with `flags`.
    ///
    /// A missing page table is allocated and zeroed. The directory link of a
    /// user mapping is widened to user access.
    ///
    /// # Errors
    /// - [`PagingError::Unaligned`] if either address is not 4 KiB aligned.
    /// - [`PagingError::SelfMapSlot`] for addresses in the self-map window.
    /// - [`PagingError::LargePageConflict`] if a 4 MiB leaf covers `va`.
    /// - [`PagingError::OutOfMemory`] if a table cannot be allocated.
    pub fn map_one<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
        pa: PhysicalAddress,
        flags: PageEntryBits,
    ) -> Result<(), PagingError> {
        if !va.is_aligned::<Size4K>() {
            return Err(PagingError::Unaligned(va.as_u32()));
        }
        if !pa.is_aligned::<Size4K>() {
            return Err(PagingError::Unaligned(pa.as_u32()));
        }
        if self_map::is_self_map(va) {
            return Err(PagingError::SelfMapSlot(va));
        }

        let (i2, i1) = split_indices(va);
        let pd = self.directory_mut();
        let table = match pd.get(i2).kind() {
            Some(PdEntryKind::Leaf4MiB(..)) => return Err(PagingError::LargePageConflict(va)),
            Some(PdEntryKind::NextPageTable(table, link)) => {
                if flags.user_access() && !link.user_access() {
                    pd.set(i2, pd.get(i2).with_user_access());
                }
                table
            }
            None => {
                let table = alloc.alloc_4k().ok_or(PagingError::OutOfMemory)?;
                self.mapper.zero_frame(table);
                pd.set(
                    i2,
                    PdEntry::make_next(table, PageEntryBits::new_table_link(flags.user_access())),
                );
                table
            }
        };

        let pt = self.table_mut(table);
        let replaced = pt.get(i1).is_present();
        pt.set(i1, PtEntry::make_4k(PhysicalPage::containing_address(pa), flags));
        if replaced {
            invalidate_tlb_page(va);
        }
        log::trace!("map {va} -> {pa} ({:#05x})", flags.into_bits() & 0xFFF);
        Ok(())
    }

    /// Map every page of a fixed run.
    ///
    /// # Errors
    /// As [`map_one`](Self::map_one).
    pub fn map_fixed<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        m: &FixedMapping,
    ) -> Result<(), PagingError> {
        for i in 0..m.pages {
            let va = m
                .virt
                .checked_add_pages(i)
                .ok_or(PagingError::Overflow)?;
            let pa = m
                .phys
                .checked_add_pages(i)
                .ok_or(PagingError::Overflow)?;
            self.map_one(alloc, va.base(), pa.base(), m.flags)?;
        }
        Ok(())
    }

    /// Clear the 4 KiB translation at `va` and invalidate its TLB entry.
    ///
    /// Returns the frame that was mapped; the frame itself is not freed.
    ///
    /// # Errors
    /// - [`PagingError::Unaligned`] if `va` is not 4 KiB aligned.
    /// - [`PagingError::LargePageConflict`] if a 4 MiB leaf covers `va`.
    /// - [`PagingError::NotMapped`] if there is no translation.
    pub fn unmap_one(&self, va: VirtualAddress) -> Result<PhysicalPage<Size4K>, PagingError> {
        if !va.is_aligned::<Size4K>() {
            return Err(PagingError::Unaligned(va.as_u32()));
        }
        if self_map::is_self_map(va) {
            return Err(PagingError::SelfMapSlot(va));
        }

        let (i2, i1) = split_indices(va);
        let table = match self.directory_mut().get(i2).kind() {
            Some(PdEntryKind::NextPageTable(table, _)) => table,
            Some(PdEntryKind::Leaf4MiB(..)) => return Err(PagingError::LargePageConflict(va)),
            None => return Err(PagingError::NotMapped(va)),
        };

        let pt = self.table_mut(table);
        let Some((frame, _)) = pt.get(i1).page_4k() else {
            return Err(PagingError::NotMapped(va));
        };
        pt.set(i1, PtEntry::zero());
        invalidate_tlb_page(va);
        log::trace!("unmap {va} (was {frame})");
        Ok(frame)
    }

    /// Translate a `VirtualAddress` to `PhysicalAddress` if mapped.
    #[must_use]
    pub fn query(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.translate(va).map(|(pa, _)| pa)
    }

    /// Translate `va` and return the leaf flags as well.
    ///
    /// Handles 4 MiB leaves by adding the 22-bit in-page offset.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<(PhysicalAddress, PageEntryBits)> {
        let (i2, i1) = split_indices(va);
        match self.directory_mut().get(i2).kind()? {
            PdEntryKind::Leaf4MiB(base, flags) => {
                let off: MemoryAddressOffset<Size4M> = va.offset::<Size4M>();
                Some((base.join(off), flags))
            }
            PdEntryKind::NextPageTable(table, _) => {
                let (base, flags) = self.table_mut(table).get(i1).page_4k()?;
                let off: MemoryAddressOffset<Size4K> = va.offset::<Size4K>();
                Some((base.join(off), flags))
            }
        }
    }
}

#[inline]
#[allow(clippy::cast_possible_truncation)]
const fn slot_index(slot: usize) -> L2Index {
    L2Index::new(slot as u16)
}
