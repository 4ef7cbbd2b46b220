//! # Memory Manager
//!
//! Owns the kernel's address space and routes every request to the context
//! that owns the address:
//!
//! | Address / request          | Paging context  | VMM context     |
//! |----------------------------|-----------------|-----------------|
//! | kernel half (`>= 0xC000_0000`) | kernel      | kernel          |
//! | user half, task given      | task            | task            |
//! | user half, no task         | kernel          | kernel          |
//!
//! Kernel-half page tables are shared by every task context, so a kernel
//! mapping made through the kernel context is visible everywhere. Kernel-half
//! bookkeeping lives only in the kernel's [`VmmContext`]; the copy a task
//! inherits through [`VmmContext::clone_context`] is never consulted.
//!
//! The frame allocator is borrowed per call so it can live in its own lock.

use crate::fault::{self, FaultResolution, KernelFault, PageFaultError};
use crate::layout::KernelLayout;
use crate::vmm::{Allocation, Vmm, VmmContext};
use kernel_info::boot::FramebufferInfo;
use kernel_info::memory::{
    HIGHER_HALF_BASE, KERNEL_STACK_PAGE_COUNT, KERNEL_STACK_SIZE, PAGE_SIZE,
    STACK_TOP_PADDING, USER_STACK_PAGE_COUNT, USER_STACK_SIZE, USER_STACK_TOP,
};
use kernel_memory_addresses::{PhysicalAddress, Size4K, VirtualAddress, page_count};
use kernel_vmem::{AddressSpace, FrameAlloc, PageEntryBits, PagingContext, PhysMapper};

/// Paging structures plus bookkeeping of one address space.
#[derive(Debug)]
pub struct TaskAddressSpace {
    paging: PagingContext,
    vmm: VmmContext,
}

impl TaskAddressSpace {
    #[inline]
    #[must_use]
    pub const fn paging(&self) -> PagingContext {
        self.paging
    }

    #[inline]
    #[must_use]
    pub const fn vmm(&self) -> &VmmContext {
        &self.vmm
    }
}

/// A stack; `top` is the initial stack pointer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Stack {
    pub bottom: VirtualAddress,
    pub top: VirtualAddress,
}

/// The kernel's memory manager.
pub struct MemoryManager<'m, M: PhysMapper> {
    mapper: &'m M,
    kernel: TaskAddressSpace,
}

impl<'m, M: PhysMapper> MemoryManager<'m, M> {
    /// Build the kernel paging context and its VMM context from `layout`.
    ///
    /// # Errors
    /// [`KernelFault::OutOfPhysicalMemory`] if the page tables do not fit, or
    /// a [`KernelFault::Vmm`] / [`KernelFault::Paging`] for a malformed layout.
    pub fn bootstrap<A: FrameAlloc>(
        mapper: &'m M,
        alloc: &mut A,
        layout: &KernelLayout,
    ) -> Result<Self, KernelFault> {
        let fixed = layout.fixed_mappings();
        let aspace = AddressSpace::create_kernel_context(mapper, alloc, fixed)?;
        let vmm = VmmContext::seeded(fixed)?;
        log::info!(
            "mm: kernel context at {} ({} fixed mappings, {} pages free)",
            aspace.context().directory(),
            fixed.len(),
            vmm.free_pages()
        );
        Ok(Self {
            mapper,
            kernel: TaskAddressSpace {
                paging: aspace.context(),
                vmm,
            },
        })
    }

    #[inline]
    #[must_use]
    pub const fn kernel_space(&self) -> &TaskAddressSpace {
        &self.kernel
    }

    #[inline]
    #[must_use]
    pub const fn mapper(&self) -> &'m M {
        self.mapper
    }

    /// Paging view of `space`.
    #[inline]
    #[must_use]
    pub const fn address_space(&self, space: &TaskAddressSpace) -> AddressSpace<'m, M> {
        AddressSpace::new(self.mapper, space.paging)
    }

    /// A new task address space: shared kernel half, empty user page tables,
    /// and a copy of `parent`'s bookkeeping.
    ///
    /// Records inherited from `parent` keep their frames; lazily backed ones
    /// get private frames on first touch in the child.
    ///
    /// # Errors
    /// [`KernelFault::OutOfPhysicalMemory`] if no frame is left for the
    /// directory.
    pub fn spawn_address_space<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        parent: &TaskAddressSpace,
    ) -> Result<TaskAddressSpace, KernelFault> {
        let paging = self.address_space(&self.kernel).create_task_context(alloc)?;
        log::debug!("mm: spawned context at {}", paging.directory());
        Ok(TaskAddressSpace {
            paging,
            vmm: parent.vmm.clone_context(),
        })
    }

    /// Reserve and, when `phys` is given, map `pages` pages.
    ///
    /// `va == 0` lets the manager choose. Requests with user flags go to
    /// `task` (or the kernel context when there is none); all others go to
    /// the kernel context.
    ///
    /// # Errors
    /// See [`Vmm::map_pages`].
    pub fn map_pages<A: FrameAlloc>(
        &mut self,
        alloc: &mut A,
        task: Option<&mut TaskAddressSpace>,
        va: VirtualAddress,
        phys: Option<PhysicalAddress>,
        pages: u32,
        flags: PageEntryBits,
    ) -> Result<VirtualAddress, KernelFault> {
        let kernel_half = !flags.user_access();
        Ok(self
            .vmm(alloc, task, kernel_half)
            .map_pages(va, phys, pages, flags)?)
    }

    /// Release `pages` pages at `va` and clear their translations.
    ///
    /// # Errors
    /// See [`Vmm::unmap_pages`].
    pub fn unmap_pages<A: FrameAlloc>(
        &mut self,
        alloc: &mut A,
        task: Option<&mut TaskAddressSpace>,
        va: VirtualAddress,
        pages: u32,
    ) -> Result<(), KernelFault> {
        let kernel_half = va.as_u32() >= HIGHER_HALF_BASE;
        Ok(self.vmm(alloc, task, kernel_half).unmap_pages(va, pages)?)
    }

    /// The record covering `va` in the context that owns it.
    #[must_use]
    pub fn find_allocation<'s>(
        &'s self,
        task: Option<&'s TaskAddressSpace>,
        va: VirtualAddress,
    ) -> Option<&'s Allocation> {
        let space = match task {
            Some(t) if va.as_u32() < HIGHER_HALF_BASE => t,
            _ => &self.kernel,
        };
        space.vmm.find_allocation(va)
    }

    /// Resolve a page fault at `addr` raised while `task` was running.
    ///
    /// # Errors
    /// A [`KernelFault`]; its [`disposition`](KernelFault::disposition) says
    /// whether to halt or to kill the task.
    pub fn handle_page_fault<A: FrameAlloc>(
        &mut self,
        alloc: &mut A,
        task: Option<&mut TaskAddressSpace>,
        addr: VirtualAddress,
        code: PageFaultError,
    ) -> Result<FaultResolution, KernelFault> {
        let kernel_half = addr.as_u32() >= HIGHER_HALF_BASE;
        let mut vmm = self.vmm(alloc, task, kernel_half);
        let resolution = fault::resolve(&mut vmm, addr, code)?;
        log::trace!("mm: fault at {addr} [{code}] resolved: {resolution:?}");
        Ok(resolution)
    }

    /// A kernel stack, backed now.
    ///
    /// # Errors
    /// [`KernelFault::OutOfVirtualMemory`] or
    /// [`KernelFault::OutOfPhysicalMemory`].
    pub fn alloc_kernel_stack<A: FrameAlloc>(&mut self, alloc: &mut A) -> Result<Stack, KernelFault> {
        let mut vmm = self.vmm(alloc, None, true);
        let bottom = vmm.map_pages(
            VirtualAddress::zero(),
            None,
            KERNEL_STACK_PAGE_COUNT,
            PageEntryBits::new_kernel_rw(),
        )?;
        if let Err(e) = vmm.populate(bottom, KERNEL_STACK_PAGE_COUNT) {
            vmm.unmap_pages(bottom, KERNEL_STACK_PAGE_COUNT)?;
            return Err(e.into());
        }
        let top = bottom + (KERNEL_STACK_SIZE - STACK_TOP_PADDING);
        log::debug!("mm: kernel stack {bottom}..{top}");
        Ok(Stack { bottom, top })
    }

    /// The user stack of `task`, ending at `USER_STACK_TOP` and backed on
    /// first touch.
    ///
    /// # Errors
    /// [`KernelFault::Vmm`] with `AddressInUse` if the task already has one.
    pub fn alloc_user_stack<A: FrameAlloc>(
        &mut self,
        alloc: &mut A,
        task: Option<&mut TaskAddressSpace>,
    ) -> Result<Stack, KernelFault> {
        let bottom = VirtualAddress::new(USER_STACK_TOP - USER_STACK_SIZE);
        self.vmm(alloc, task, false).map_pages(
            bottom,
            None,
            USER_STACK_PAGE_COUNT,
            PageEntryBits::new_user_rw(),
        )?;
        let top = VirtualAddress::new(USER_STACK_TOP - STACK_TOP_PADDING);
        log::debug!("mm: user stack {bottom}..{top}");
        Ok(Stack { bottom, top })
    }

    /// Map the framebuffer into the kernel partition, uncached.
    ///
    /// Returns the virtual address of the first pixel, or `None` if the
    /// framebuffer is not addressable without PAE.
    ///
    /// # Errors
    /// See [`Vmm::map_pages`].
    pub fn map_framebuffer<A: FrameAlloc>(
        &mut self,
        alloc: &mut A,
        fb: &FramebufferInfo,
    ) -> Result<Option<VirtualAddress>, KernelFault> {
        let size = fb.size_bytes();
        let Some(end) = fb.address.checked_add(size) else {
            log::warn!("mm: framebuffer at {:#x} overflows", fb.address);
            return Ok(None);
        };
        let Some(pa) = PhysicalAddress::from_u64(fb.address).filter(|_| end <= 1 << 32) else {
            log::warn!("mm: framebuffer at {:#x} is above 4 GiB, not mapped", fb.address);
            return Ok(None);
        };
        if size == 0 {
            log::warn!("mm: empty framebuffer, not mapped");
            return Ok(None);
        }

        let offset = pa.as_u32() & (PAGE_SIZE - 1);
        let base = PhysicalAddress::new(pa.as_u32() - offset);
        let pages = page_count::<Size4K>(u64::from(offset) + size);
        let va = self.vmm(alloc, None, true).map_pages(
            VirtualAddress::zero(),
            Some(base),
            pages,
            PageEntryBits::new_mmio(),
        )?;
        log::info!(
            "mm: framebuffer {}x{}x{} at {pa} -> {}",
            fb.width,
            fb.height,
            fb.bpp,
            va + offset
        );
        Ok(Some(va + offset))
    }

    /// Switch to `task`, or back to the kernel context.
    ///
    /// # Safety
    /// See [`AddressSpace::activate`].
    pub unsafe fn activate(&self, task: Option<&TaskAddressSpace>) {
        let space = task.unwrap_or(&self.kernel);
        unsafe { self.address_space(space).activate() };
    }

    /// Log the kernel context's free blocks and allocations.
    pub fn log_summary(&self) {
        for block in self.kernel.vmm.free_blocks() {
            log::info!("mm: free {}+{} pages", block.start, block.pages);
        }
        for a in self.kernel.vmm.allocations() {
            log::debug!(
                "mm: used {}+{} pages ({})",
                a.virtual_start,
                a.pages,
                if a.is_lazy() { "lazy" } else { "eager" }
            );
        }
    }

    /// The [`Vmm`] view owning the address half selected by `kernel_half`.
    fn vmm<'a, A: FrameAlloc>(
        &'a mut self,
        alloc: &'a mut A,
        task: Option<&'a mut TaskAddressSpace>,
        kernel_half: bool,
    ) -> Vmm<'a, 'm, M, A> {
        let space = match task {
            Some(t) if !kernel_half => t,
            _ => &mut self.kernel,
        };
        Vmm::new(
            &mut space.vmm,
            AddressSpace::new(self.mapper, space.paging),
            alloc,
        )
    }
}
