//! # Virtual Memory Manager
//!
//! Per-address-space bookkeeping of which virtual pages are reserved and what
//! backs them.
//!
//! - [`VmmContext`] holds the [`FreeBlockList`] and the [`AllocationTree`].
//!   It never touches page tables, so it can be cloned, inspected and tested
//!   in isolation.
//! - [`Vmm`] pairs a context with a paging [`AddressSpace`] and a frame
//!   allocator and performs the side effects: eager mappings, PTE removal,
//!   demand backing of single pages.
//!
//! ## Partitions
//!
//! ```text
//! 0x0000_1000 ┌──────────────────────┐
//!             │ user partition       │  flags.user_access() == true
//! 0xC000_0000 ├──────────────────────┤
//!             │ kernel partition     │  flags.user_access() == false
//! 0xFFC0_0000 ├──────────────────────┤
//!             │ self-map (never free)│
//!             └──────────────────────┘
//! ```
//!
//! Page 0 is never handed out. Free blocks never merge across `0xC000_0000`.

mod alloc_tree;
mod free_blocks;

pub use crate::vmm::alloc_tree::AllocationTree;
pub use crate::vmm::free_blocks::{FreeBlock, FreeBlockList};
use crate::fault::FaultResolution;
use kernel_info::memory::{
    KERNEL_SPACE_END, KERNEL_SPACE_START, PAGE_SIZE, USER_SPACE_END, USER_SPACE_START,
};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};
use kernel_vmem::{
    AddressSpace, FixedMapping, FrameAlloc, PageEntryBits, PagingError, PhysMapper,
};

/// Errors of the virtual memory manager.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VmmError {
    #[error("no free virtual range of {0} pages")]
    OutOfVirtualMemory(u32),
    #[error("out of physical memory")]
    OutOfPhysicalMemory,
    #[error("{0} is not free")]
    AddressInUse(VirtualAddress),
    #[error("{0} is not covered by a single allocation")]
    NotMapped(VirtualAddress),
    #[error("address {0:#010x} is not page aligned")]
    Unaligned(u32),
    #[error("invalid range: {pages} pages at {start}")]
    InvalidRange { start: VirtualAddress, pages: u32 },
    #[error("inconsistent bookkeeping: {0}")]
    Inconsistent(&'static str),
    #[error(transparent)]
    Paging(#[from] PagingError),
}

/// One reserved run of virtual pages.
///
/// `physical_start == None` marks a lazy reservation that is backed page by
/// page on first touch.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub virtual_start: VirtualAddress,
    pub physical_start: Option<PhysicalAddress>,
    pub pages: u32,
    pub flags: PageEntryBits,
}

impl Allocation {
    /// First address past the record.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.virtual_start.as_u32() as u64 + self.pages as u64 * PAGE_SIZE as u64
    }

    #[inline]
    #[must_use]
    pub const fn contains(&self, va: VirtualAddress) -> bool {
        va.as_u32() >= self.virtual_start.as_u32() && (va.as_u32() as u64) < self.end()
    }

    #[inline]
    #[must_use]
    pub const fn is_lazy(&self) -> bool {
        self.physical_start.is_none()
    }

    /// Frame backing the page that contains `va`, for eager records.
    #[must_use]
    pub fn physical_for(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        let delta = va.as_u32().checked_sub(self.virtual_start.as_u32())? & !(PAGE_SIZE - 1);
        self.physical_start?.checked_add(delta)
    }

    /// The sub-record `[start, start + pages)`, keeping the physical offset.
    fn slice(&self, start: VirtualAddress, pages: u32) -> Self {
        let delta = start.as_u32() - self.virtual_start.as_u32();
        Self {
            virtual_start: start,
            physical_start: self.physical_start.map(|pa| pa + delta),
            pages,
            flags: self.flags,
        }
    }
}

/// Virtual layout of one address space.
///
/// `Clone` is a deep copy: both arenas are duplicated, so the copy can
/// diverge without affecting the original.
#[derive(Debug, Clone)]
pub struct VmmContext {
    free: FreeBlockList,
    allocations: AllocationTree,
}

impl Default for VmmContext {
    fn default() -> Self {
        Self::new()
    }
}

/// `[lo, hi)` of the partition selected by `flags`.
#[inline]
const fn partition(flags: PageEntryBits) -> (u32, u32) {
    if flags.user_access() {
        (USER_SPACE_START, USER_SPACE_END)
    } else {
        (KERNEL_SPACE_START, KERNEL_SPACE_END)
    }
}

const fn pages_in(bytes: u32) -> u32 {
    bytes / PAGE_SIZE
}

impl VmmContext {
    /// A context with no free space and no allocations.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            free: FreeBlockList::new(),
            allocations: AllocationTree::new(),
        }
    }

    /// Both partitions entirely free.
    #[must_use]
    pub fn new() -> Self {
        let mut ctx = Self::empty();
        ctx.free.insert(
            VirtualAddress::new(USER_SPACE_START),
            pages_in(USER_SPACE_END - USER_SPACE_START),
        );
        ctx.free.insert(
            VirtualAddress::new(KERNEL_SPACE_START),
            pages_in(KERNEL_SPACE_END - KERNEL_SPACE_START),
        );
        ctx
    }

    /// A fresh context with the kernel's `fixed` mappings recorded as eager
    /// allocations.
    ///
    /// # Errors
    /// Any [`map_pages`](Self::map_pages) error for a fixed mapping that is
    /// malformed or overlaps another.
    pub fn seeded(fixed: &[FixedMapping]) -> Result<Self, VmmError> {
        let mut ctx = Self::new();
        for m in fixed {
            ctx.map_pages(m.virt.base(), Some(m.phys.base()), m.pages, m.flags)?;
            log::debug!("vmm: seeded {} at {} ({} pages)", m.name, m.virt.base(), m.pages);
        }
        Ok(ctx)
    }

    /// Reserve `pages` pages and record what backs them.
    ///
    /// - `va == 0` picks the first free range in the partition selected by
    ///   `flags.user_access()`; otherwise exactly `[va, va + pages)` is taken
    ///   and must be free.
    /// - `phys == None` records a lazy reservation.
    ///
    /// Only bookkeeping changes; see [`Vmm::map_pages`] for the paging side.
    ///
    /// # Errors
    /// - [`VmmError::InvalidRange`] for zero pages, a range outside the
    ///   partition, or a physical range running past 4 GiB.
    /// - [`VmmError::Unaligned`] for misaligned addresses.
    /// - [`VmmError::AddressInUse`] if a requested range is not free.
    /// - [`VmmError::OutOfVirtualMemory`] if no free range is large enough.
    pub fn map_pages(
        &mut self,
        va: VirtualAddress,
        phys: Option<PhysicalAddress>,
        pages: u32,
        flags: PageEntryBits,
    ) -> Result<VirtualAddress, VmmError> {
        if pages == 0 {
            return Err(VmmError::InvalidRange { start: va, pages });
        }
        if !va.is_aligned::<Size4K>() {
            return Err(VmmError::Unaligned(va.as_u32()));
        }
        if let Some(pa) = phys {
            if !pa.is_aligned::<Size4K>() {
                return Err(VmmError::Unaligned(pa.as_u32()));
            }
            // Backing frames must stay below 4 GiB.
            if pa.as_u64() + u64::from(pages) * u64::from(PAGE_SIZE) > 1 << 32 {
                return Err(VmmError::InvalidRange { start: va, pages });
            }
        }

        let (lo, hi) = partition(flags);
        let start = if va.as_u32() == 0 {
            self.free
                .take_first_fit(pages, lo, hi)
                .ok_or(VmmError::OutOfVirtualMemory(pages))?
        } else {
            let end = u64::from(va.as_u32()) + u64::from(pages) * u64::from(PAGE_SIZE);
            if va.as_u32() < lo || end > u64::from(hi) {
                return Err(VmmError::InvalidRange { start: va, pages });
            }
            if !self.free.take_exact(va, pages) {
                return Err(VmmError::AddressInUse(va));
            }
            va
        };

        let recorded = self.allocations.insert(Allocation {
            virtual_start: start,
            physical_start: phys,
            pages,
            flags,
        });
        if !recorded {
            self.free.insert(start, pages);
            return Err(VmmError::Inconsistent("free range already recorded as allocated"));
        }
        log::debug!(
            "vmm: reserve {start}+{pages} ({})",
            if phys.is_some() { "eager" } else { "lazy" }
        );
        Ok(start)
    }

    /// Release `[va, va + pages)` back to the free list.
    ///
    /// The range must lie inside a single allocation; exact, prefix, suffix
    /// and interior ranges are supported. Returns the released piece.
    ///
    /// # Errors
    /// - [`VmmError::InvalidRange`] for zero pages.
    /// - [`VmmError::Unaligned`] for a misaligned `va`.
    /// - [`VmmError::NotMapped`] if no single allocation covers the range.
    pub fn unmap_pages(&mut self, va: VirtualAddress, pages: u32) -> Result<Allocation, VmmError> {
        if pages == 0 {
            return Err(VmmError::InvalidRange { start: va, pages });
        }
        if !va.is_aligned::<Size4K>() {
            return Err(VmmError::Unaligned(va.as_u32()));
        }

        let record = *self.allocations.find(va).ok_or(VmmError::NotMapped(va))?;
        let end = u64::from(va.as_u32()) + u64::from(pages) * u64::from(PAGE_SIZE);
        if end > record.end() {
            return Err(VmmError::NotMapped(va));
        }

        let head = pages_in(va.as_u32() - record.virtual_start.as_u32());
        let tail = record.pages - head - pages;
        let released = record.slice(va, pages);

        if head == 0 {
            self.allocations.remove(va);
        } else {
            self.allocations.set_pages(record.virtual_start, head);
        }
        if tail != 0 && !self.allocations.insert(record.slice(released_end(&released), tail)) {
            return Err(VmmError::Inconsistent("split tail already recorded"));
        }

        self.free.insert(va, pages);
        log::debug!("vmm: release {va}+{pages}");
        Ok(released)
    }

    /// The allocation containing `va`.
    #[inline]
    #[must_use]
    pub fn find_allocation(&self, va: VirtualAddress) -> Option<&Allocation> {
        self.allocations.find(va)
    }

    /// Deep copy of both structures.
    #[inline]
    #[must_use]
    pub fn clone_context(&self) -> Self {
        self.clone()
    }

    /// Free blocks in address order.
    pub fn free_blocks(&self) -> impl Iterator<Item = FreeBlock> + '_ {
        self.free.iter()
    }

    /// Allocations in address order.
    pub fn allocations(&self) -> impl Iterator<Item = &Allocation> + '_ {
        self.allocations.iter()
    }

    /// Number of free pages across both partitions.
    #[must_use]
    pub fn free_pages(&self) -> u64 {
        self.free.total_pages()
    }

    /// Check ordering, maximality and the partition between free and
    /// allocated space.
    ///
    /// # Errors
    /// [`VmmError::Inconsistent`] naming the first violated property.
    pub fn check_invariants(&self) -> Result<(), VmmError> {
        let boundary = u64::from(KERNEL_SPACE_START);
        let mut last_end: Option<u64> = None;
        for block in self.free.iter() {
            let start = u64::from(block.start.as_u32());
            if block.pages == 0 {
                return Err(VmmError::Inconsistent("empty free block"));
            }
            if start < u64::from(USER_SPACE_START) || block.end() > u64::from(KERNEL_SPACE_END) {
                return Err(VmmError::Inconsistent("free block outside the managed range"));
            }
            if start < boundary && block.end() > boundary {
                return Err(VmmError::Inconsistent("free block straddles the higher half"));
            }
            if let Some(prev) = last_end {
                if start < prev {
                    return Err(VmmError::Inconsistent("free blocks out of order"));
                }
                if start == prev && start != boundary {
                    return Err(VmmError::Inconsistent("adjacent free blocks not merged"));
                }
            }
            last_end = Some(block.end());
        }

        if !self.allocations.links_consistent() {
            return Err(VmmError::Inconsistent("allocation tree links"));
        }
        let mut last_end: Option<u64> = None;
        for record in self.allocations.iter() {
            if record.pages == 0 {
                return Err(VmmError::Inconsistent("empty allocation"));
            }
            if last_end.is_some_and(|prev| u64::from(record.virtual_start.as_u32()) < prev) {
                return Err(VmmError::Inconsistent("allocations overlap"));
            }
            last_end = Some(record.end());
        }

        let mut free = self.free.iter().peekable();
        for record in self.allocations.iter() {
            let start = u64::from(record.virtual_start.as_u32());
            while free.peek().is_some_and(|b| b.end() <= start) {
                free.next();
            }
            if free
                .peek()
                .is_some_and(|b| u64::from(b.start.as_u32()) < record.end())
            {
                return Err(VmmError::Inconsistent("allocation overlaps free space"));
            }
        }
        Ok(())
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn released_end(released: &Allocation) -> VirtualAddress {
    VirtualAddress::new(released.end() as u32)
}

/// A [`VmmContext`] wired to the paging structures it describes.
pub struct Vmm<'a, 'm, M: PhysMapper, A: FrameAlloc> {
    ctx: &'a mut VmmContext,
    aspace: AddressSpace<'m, M>,
    alloc: &'a mut A,
}

impl<'a, 'm, M: PhysMapper, A: FrameAlloc> Vmm<'a, 'm, M, A> {
    pub const fn new(ctx: &'a mut VmmContext, aspace: AddressSpace<'m, M>, alloc: &'a mut A) -> Self {
        Self { ctx, aspace, alloc }
    }

    /// Reserve pages and, for eager requests, install every translation now.
    ///
    /// On a paging failure the reservation is rolled back before the error is
    /// returned.
    ///
    /// # Errors
    /// As [`VmmContext::map_pages`], plus [`VmmError::Paging`].
    pub fn map_pages(
        &mut self,
        va: VirtualAddress,
        phys: Option<PhysicalAddress>,
        pages: u32,
        flags: PageEntryBits,
    ) -> Result<VirtualAddress, VmmError> {
        let start = self.ctx.map_pages(va, phys, pages, flags)?;
        let Some(pa) = phys else {
            return Ok(start);
        };

        for i in 0..pages {
            let offset = i * PAGE_SIZE;
            if let Err(e) = self.aspace.map_one(self.alloc, start + offset, pa + offset, flags) {
                log::warn!("vmm: eager map of {start}+{pages} failed at page {i}: {e}");
                self.clear_range(start, i)?;
                self.ctx.unmap_pages(start, pages)?;
                return Err(e.into());
            }
        }
        Ok(start)
    }

    /// Release pages and clear whatever translations exist for them.
    ///
    /// Frames are not returned to the physical allocator.
    ///
    /// # Errors
    /// As [`VmmContext::unmap_pages`], plus [`VmmError::Paging`].
    pub fn unmap_pages(&mut self, va: VirtualAddress, pages: u32) -> Result<(), VmmError> {
        self.ctx.unmap_pages(va, pages)?;
        self.clear_range(va, pages)
    }

    /// Back every page of `[va, va + pages)` now instead of on first touch.
    ///
    /// # Errors
    /// As [`resolve_page`](Self::resolve_page).
    pub fn populate(&mut self, va: VirtualAddress, pages: u32) -> Result<(), VmmError> {
        for i in 0..pages {
            let page = va + i * PAGE_SIZE;
            if self.aspace.query(page).is_none() {
                self.resolve_page(page)?;
            }
        }
        Ok(())
    }

    /// Install the translation for the page containing `va` from its record.
    ///
    /// Lazy records get a freshly zeroed frame; eager ones are remapped to
    /// the frame the record names.
    ///
    /// # Errors
    /// - [`VmmError::NotMapped`] if no allocation covers `va`.
    /// - [`VmmError::OutOfPhysicalMemory`] if no frame is left.
    /// - [`VmmError::Paging`] if the translation cannot be written.
    pub fn resolve_page(&mut self, va: VirtualAddress) -> Result<FaultResolution, VmmError> {
        let page = va.page::<Size4K>().base();
        let record = *self
            .ctx
            .find_allocation(page)
            .ok_or(VmmError::NotMapped(page))?;

        if let Some(frame) = record.physical_for(page) {
            self.aspace.map_one(self.alloc, page, frame, record.flags)?;
            log::debug!("vmm: remapped {page} -> {frame}");
            return Ok(FaultResolution::Remapped { page, frame });
        }

        let frame: PhysicalPage<Size4K> = self
            .alloc
            .alloc_4k()
            .ok_or(VmmError::OutOfPhysicalMemory)?;
        self.aspace.mapper().zero_frame(frame);
        self.aspace
            .map_one(self.alloc, page, frame.base(), record.flags)?;
        log::debug!("vmm: demand-mapped {page} -> {frame}");
        Ok(FaultResolution::DemandAllocated {
            page,
            frame: frame.base(),
        })
    }

    /// Translate `va` in the underlying paging context.
    #[inline]
    #[must_use]
    pub fn query(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.aspace.query(va)
    }

    fn clear_range(&self, va: VirtualAddress, pages: u32) -> Result<(), VmmError> {
        for i in 0..pages {
            match self.aspace.unmap_one(va + i * PAGE_SIZE) {
                Ok(_) | Err(PagingError::NotMapped(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_info::memory::HIGHER_HALF_BASE;

    fn user() -> PageEntryBits {
        PageEntryBits::new_user_rw()
    }

    fn kernel() -> PageEntryBits {
        PageEntryBits::new_kernel_rw()
    }

    fn free(ctx: &VmmContext) -> Vec<(u32, u32)> {
        ctx.free_blocks()
            .map(|b| (b.start.as_u32(), b.pages))
            .collect()
    }

    #[test]
    fn fresh_context_has_two_partitions() {
        let ctx = VmmContext::new();
        assert_eq!(
            free(&ctx),
            [
                (USER_SPACE_START, pages_in(USER_SPACE_END - USER_SPACE_START)),
                (KERNEL_SPACE_START, pages_in(KERNEL_SPACE_END - KERNEL_SPACE_START)),
            ]
        );
        ctx.check_invariants().unwrap();
    }

    #[test]
    fn first_fit_uses_the_partition_of_the_flags() {
        let mut ctx = VmmContext::new();
        let u = ctx.map_pages(VirtualAddress::zero(), None, 4, user()).unwrap();
        let k = ctx.map_pages(VirtualAddress::zero(), None, 4, kernel()).unwrap();
        assert_eq!(u.as_u32(), USER_SPACE_START);
        assert_eq!(k.as_u32(), HIGHER_HALF_BASE);
        ctx.check_invariants().unwrap();
    }

    #[test]
    fn specific_address_must_be_free_and_in_partition() {
        let mut ctx = VmmContext::new();
        let va = VirtualAddress::new(0x40_0000);
        ctx.map_pages(va, None, 2, user()).unwrap();
        assert_eq!(
            ctx.map_pages(VirtualAddress::new(0x40_1000), None, 1, user()),
            Err(VmmError::AddressInUse(VirtualAddress::new(0x40_1000)))
        );
        assert!(matches!(
            ctx.map_pages(va, None, 1, kernel()),
            Err(VmmError::InvalidRange { .. })
        ));
        assert!(matches!(
            ctx.map_pages(VirtualAddress::new(HIGHER_HALF_BASE - 0x1000), None, 2, user()),
            Err(VmmError::InvalidRange { .. })
        ));
    }

    #[test]
    fn argument_errors() {
        let mut ctx = VmmContext::new();
        assert!(matches!(
            ctx.map_pages(VirtualAddress::zero(), None, 0, user()),
            Err(VmmError::InvalidRange { .. })
        ));
        assert_eq!(
            ctx.map_pages(VirtualAddress::new(0x1234), None, 1, user()),
            Err(VmmError::Unaligned(0x1234))
        );
        assert_eq!(
            ctx.map_pages(VirtualAddress::zero(), Some(PhysicalAddress::new(0x10)), 1, user()),
            Err(VmmError::Unaligned(0x10))
        );
        assert_eq!(
            ctx.unmap_pages(VirtualAddress::new(0x5000), 1),
            Err(VmmError::NotMapped(VirtualAddress::new(0x5000)))
        );
    }

    #[test]
    fn map_then_unmap_restores_free_list() {
        let mut ctx = VmmContext::new();
        let before = free(&ctx);
        let va = ctx
            .map_pages(VirtualAddress::new(0x80_0000), Some(PhysicalAddress::new(0x20_0000)), 8, user())
            .unwrap();
        assert_ne!(free(&ctx), before);
        ctx.unmap_pages(va, 8).unwrap();
        assert_eq!(free(&ctx), before);
        assert_eq!(ctx.allocations().count(), 0);
        ctx.check_invariants().unwrap();
    }

    #[test]
    fn prefix_unmap_keeps_the_tail() {
        let mut ctx = VmmContext::new();
        let v = ctx.map_pages(VirtualAddress::zero(), None, 10, user()).unwrap();
        ctx.unmap_pages(v, 3).unwrap();

        let rest = ctx.find_allocation(v + 3 * PAGE_SIZE).unwrap();
        assert_eq!(rest.virtual_start, v + 3 * PAGE_SIZE);
        assert_eq!(rest.pages, 7);
        assert!(ctx.find_allocation(v).is_none());
        assert_eq!(free(&ctx)[0], (v.as_u32(), 3));
        ctx.check_invariants().unwrap();
    }

    #[test]
    fn suffix_unmap_shrinks_in_place() {
        let mut ctx = VmmContext::new();
        let v = ctx.map_pages(VirtualAddress::zero(), None, 10, user()).unwrap();
        ctx.unmap_pages(v + 7 * PAGE_SIZE, 3).unwrap();

        let rest = ctx.find_allocation(v).unwrap();
        assert_eq!(rest.pages, 7);
        assert!(ctx.find_allocation(v + 7 * PAGE_SIZE).is_none());
        let first = free(&ctx)[0];
        assert_eq!(first.0, v.as_u32() + 7 * PAGE_SIZE);
        ctx.check_invariants().unwrap();
    }

    #[test]
    fn interior_unmap_splits_and_keeps_physical_offsets() {
        let mut ctx = VmmContext::new();
        let v = ctx
            .map_pages(VirtualAddress::zero(), Some(PhysicalAddress::new(0x30_0000)), 10, kernel())
            .unwrap();
        let released = ctx.unmap_pages(v + 4 * PAGE_SIZE, 2).unwrap();
        assert_eq!(released.physical_start, Some(PhysicalAddress::new(0x30_4000)));

        let tail = ctx.find_allocation(v + 6 * PAGE_SIZE).unwrap();
        assert_eq!(tail.virtual_start, v + 6 * PAGE_SIZE);
        assert_eq!(tail.pages, 4);
        assert_eq!(tail.physical_start, Some(PhysicalAddress::new(0x30_6000)));
        assert_eq!(ctx.find_allocation(v).unwrap().pages, 4);
        ctx.check_invariants().unwrap();
    }

    #[test]
    fn unmap_must_stay_inside_one_record() {
        let mut ctx = VmmContext::new();
        let a = ctx.map_pages(VirtualAddress::new(0x10_0000), None, 2, user()).unwrap();
        ctx.map_pages(VirtualAddress::new(0x10_2000), None, 2, user()).unwrap();
        assert_eq!(
            ctx.unmap_pages(a, 4),
            Err(VmmError::NotMapped(a))
        );
        ctx.check_invariants().unwrap();
    }

    #[test]
    fn clone_is_isolated() {
        let mut parent = VmmContext::new();
        let v = parent.map_pages(VirtualAddress::zero(), None, 2, user()).unwrap();
        let mut child = parent.clone_context();
        child.unmap_pages(v, 2).unwrap();
        assert!(parent.find_allocation(v).is_some());
        assert!(child.find_allocation(v).is_none());
        parent.check_invariants().unwrap();
        child.check_invariants().unwrap();
    }

    #[test]
    fn exhausting_a_partition_is_out_of_virtual_memory() {
        let mut ctx = VmmContext::new();
        let all = pages_in(USER_SPACE_END - USER_SPACE_START);
        ctx.map_pages(VirtualAddress::zero(), None, all, user()).unwrap();
        assert_eq!(
            ctx.map_pages(VirtualAddress::zero(), None, 1, user()),
            Err(VmmError::OutOfVirtualMemory(1))
        );
        ctx.map_pages(VirtualAddress::zero(), None, 1, kernel()).unwrap();
    }

    #[test]
    fn physical_for_follows_the_page_offset() {
        let rec = Allocation {
            virtual_start: VirtualAddress::new(0xC010_0000),
            physical_start: Some(PhysicalAddress::new(0x10_0000)),
            pages: 4,
            flags: kernel(),
        };
        assert_eq!(
            rec.physical_for(VirtualAddress::new(0xC010_2ABC)),
            Some(PhysicalAddress::new(0x10_2000))
        );
        assert!(!rec.is_lazy());
    }

    #[test]
    fn physical_range_must_stay_below_4gib() {
        let mut ctx = VmmContext::new();
        let before = free(&ctx);
        let last = PhysicalAddress::new(0xFFFF_F000);
        assert_eq!(
            ctx.map_pages(VirtualAddress::zero(), Some(last), 2, kernel()),
            Err(VmmError::InvalidRange { start: VirtualAddress::zero(), pages: 2 })
        );
        assert_eq!(free(&ctx), before);

        let va = ctx.map_pages(VirtualAddress::zero(), Some(last), 1, kernel()).unwrap();
        assert_eq!(ctx.find_allocation(va).unwrap().physical_for(va), Some(last));
        ctx.check_invariants().unwrap();
    }

    /// Records overlapping `[start, start + pages)` in the mirror.
    fn overlaps(live: &[(u32, u32)], start: u32, pages: u32) -> bool {
        let end = u64::from(start) + u64::from(pages) * u64::from(PAGE_SIZE);
        live.iter().any(|&(s, n)| {
            u64::from(s) < end && u64::from(start) < u64::from(s) + u64::from(n) * u64::from(PAGE_SIZE)
        })
    }

    #[test]
    fn random_map_unmap_sequence_keeps_invariants() {
        use rand::rngs::SmallRng;
        use rand::{Rng, SeedableRng};

        let mut rng = SmallRng::seed_from_u64(0x1386_C0DE);
        let mut ctx = VmmContext::new();
        let initial = free(&ctx);
        // (start, pages) of every record the context should hold.
        let mut live: Vec<(u32, u32)> = Vec::new();

        for step in 0..3000 {
            if live.is_empty() || rng.gen_bool(0.55) {
                let user_side = rng.gen_bool(0.5);
                let flags = if user_side { user() } else { kernel() };
                let (lo, hi) = if user_side {
                    (USER_SPACE_START, USER_SPACE_END)
                } else {
                    (KERNEL_SPACE_START, KERNEL_SPACE_END)
                };
                let pages = rng.gen_range(1..=16);
                let phys = rng
                    .gen_bool(0.5)
                    .then(|| PhysicalAddress::new(rng.gen_range(0..0x8_0000) * PAGE_SIZE));

                if rng.gen_bool(0.35) {
                    let start = if rng.gen_bool(0.1) {
                        hi - rng.gen_range(1..=8) * PAGE_SIZE
                    } else {
                        lo + rng.gen_range(0..256) * PAGE_SIZE
                    };
                    let va = VirtualAddress::new(start);
                    let result = ctx.map_pages(va, phys, pages, flags);
                    let end = u64::from(start) + u64::from(pages) * u64::from(PAGE_SIZE);
                    if end > u64::from(hi) {
                        assert_eq!(result, Err(VmmError::InvalidRange { start: va, pages }), "step {step}");
                    } else if overlaps(&live, start, pages) {
                        assert_eq!(result, Err(VmmError::AddressInUse(va)), "step {step}");
                    } else {
                        assert_eq!(result, Ok(va), "step {step}");
                        live.push((start, pages));
                    }
                } else {
                    let va = ctx.map_pages(VirtualAddress::zero(), phys, pages, flags).unwrap();
                    assert!((lo..hi).contains(&va.as_u32()), "step {step}");
                    assert!(!overlaps(&live, va.as_u32(), pages), "step {step}");
                    live.push((va.as_u32(), pages));
                }
            } else {
                let (start, n) = live.swap_remove(rng.gen_range(0..live.len()));
                let (off, len) = match rng.gen_range(0..4) {
                    1 if n > 1 => (0, rng.gen_range(1..n)),
                    2 if n > 1 => {
                        let k = rng.gen_range(1..n);
                        (n - k, k)
                    }
                    3 if n > 2 => {
                        let off = rng.gen_range(1..n - 1);
                        (off, rng.gen_range(1..n - off))
                    }
                    _ => (0, n),
                };
                let va = VirtualAddress::new(start + off * PAGE_SIZE);
                let released = ctx.unmap_pages(va, len).unwrap();
                assert_eq!((released.virtual_start, released.pages), (va, len), "step {step}");

                if off != 0 {
                    live.push((start, off));
                }
                if off + len != n {
                    live.push((start + (off + len) * PAGE_SIZE, n - off - len));
                }
            }

            ctx.check_invariants().unwrap();
            assert_eq!(ctx.allocations().count(), live.len(), "step {step}");
            for &(start, pages) in &live {
                let record = ctx.find_allocation(VirtualAddress::new(start)).unwrap();
                assert_eq!((record.virtual_start.as_u32(), record.pages), (start, pages));
            }
        }

        for (start, pages) in live.drain(..) {
            ctx.unmap_pages(VirtualAddress::new(start), pages).unwrap();
            ctx.check_invariants().unwrap();
        }
        assert_eq!(free(&ctx), initial);
        assert_eq!(ctx.allocations().count(), 0);
    }
}
