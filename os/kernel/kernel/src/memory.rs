//! # Kernel Memory Bring-up
//!
//! Owns the memory-management singletons and wires them together at boot:
//!
//! 1. check the boot information against the heap and the RAM size,
//! 2. start the heap (the frame allocator's reserved list and the VMM arenas
//!    live on it),
//! 3. initialize the frame allocator from the firmware memory map,
//! 4. build the kernel context from the [`KernelLayout`] and switch to it,
//! 5. map the framebuffer.
//!
//! The frame allocator and the memory manager sit behind separate
//! [`SpinLock`]s, always taken in that order and with interrupts disabled.
//! The page-fault path only ever *tries* them: a fault taken while either is
//! held is a kernel bug, not something to wait for.

use core::sync::atomic::{AtomicBool, Ordering};
use kernel_alloc::{
    BitmapFrameAlloc, FaultResolution, KernelFault, KernelHeap, KernelLayout, LayoutError,
    LowmemPhysMapper, MemoryManager, PageFaultError, PhysRange, Stack, TaskAddressSpace,
    boot_reserved_ranges,
};
use kernel_info::boot::{BootInformation, FramebufferInfo, KernelMemInfo};
use kernel_info::memory::{KERNEL_HEAP_PHYS_START, KERNEL_HEAP_SIZE, KERNEL_HEAP_VIRT_START};
use kernel_memory_addresses::VirtualAddress;
use kernel_sync::SpinLock;
use kernel_vmem::PageEntryBits;
use log::{debug, info};

/// Failures of the bring-up glue around the memory manager.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemoryError {
    #[error(transparent)]
    Fault(#[from] KernelFault),
    #[error("boot information at {0:#x} is not reachable through the direct map")]
    BootInfoUnreachable(u32),
    #[error("boot information at {0:#x} lies inside the kernel heap")]
    BootInfoInHeap(u64),
    #[error("memory manager is not initialized")]
    Uninitialized,
    #[error("memory manager is locked")]
    Busy,
}

impl From<LayoutError> for MemoryError {
    fn from(e: LayoutError) -> Self {
        Self::Fault(e.into())
    }
}

/// The kernel's memory manager plus the address space currently running.
pub struct KernelMemory {
    manager: MemoryManager<'static, LowmemPhysMapper>,
    current: Option<TaskAddressSpace>,
}

static MAPPER: LowmemPhysMapper = LowmemPhysMapper;

static PMM: SpinLock<BitmapFrameAlloc> = SpinLock::new(BitmapFrameAlloc::new());

static MM: SpinLock<Option<KernelMemory>> = SpinLock::new(None);

/// Set once a context with the self-map window is active.
static SELF_MAP_LIVE: AtomicBool = AtomicBool::new(false);

#[cfg_attr(target_os = "none", global_allocator)]
static HEAP: KernelHeap = KernelHeap::new();

/// `true` once the page tables can be read through the self-map window.
pub fn self_map_live() -> bool {
    SELF_MAP_LIVE.load(Ordering::Acquire)
}

/// Bring up the heap, the frame allocator and the kernel context.
///
/// `mbi` is the physical extent of the boot information; its frames stay
/// reserved so `info` remains valid afterwards.
///
/// Returns the framebuffer and where it is mapped, if it could be mapped.
///
/// # Errors
/// Any [`MemoryError`]; all of them are fatal at boot.
pub fn init(
    info: &BootInformation<'_>,
    image: &KernelMemInfo,
    mbi: PhysRange,
) -> Result<Option<(FramebufferInfo, VirtualAddress)>, MemoryError> {
    let memory_map = info.memory_map().map_err(KernelFault::from)?;
    let framebuffer = info.framebuffer().map_err(KernelFault::from)?;
    crate::tracing::log_memory_map(&memory_map);

    let heap = PhysRange::from_len(
        u64::from(KERNEL_HEAP_PHYS_START),
        u64::from(KERNEL_HEAP_SIZE),
    );
    if mbi.start < heap.end && heap.start < mbi.end {
        return Err(MemoryError::BootInfoInHeap(mbi.start));
    }
    let ram_end = memory_map.available_end();
    if ram_end < heap.end {
        return Err(LayoutError::NotEnoughLowMemory(ram_end, heap.end).into());
    }

    // SAFETY: the bootstrap directory maps the heap through the direct map,
    // RAM covers it (checked above), and the frame allocator reserves it.
    unsafe {
        HEAP.init(
            VirtualAddress::new(KERNEL_HEAP_VIRT_START),
            KERNEL_HEAP_SIZE,
        );
    }

    let mut pmm = PMM.lock_irq();
    pmm.init(boot_reserved_ranges(image, &memory_map, framebuffer.as_ref()));
    pmm.reserve_range(mbi);
    info!(
        "pmm: {} frames free, {} reserved",
        pmm.free_count(),
        pmm.used_count()
    );

    let layout = KernelLayout::new(image, ram_end)?;
    layout.log();

    let mut manager = MemoryManager::bootstrap(&MAPPER, &mut *pmm, &layout)?;
    // SAFETY: the kernel context maps the running image, the boot stack (in
    // .bss), the heap and the direct map exactly like the bootstrap directory.
    unsafe { manager.activate(None) };
    SELF_MAP_LIVE.store(true, Ordering::Release);
    info!("mm: kernel context active");

    let mapped = match framebuffer {
        Some(fb) => manager
            .map_framebuffer(&mut *pmm, &fb)?
            .map(|va| (fb, va)),
        None => None,
    };
    manager.log_summary();
    info!("heap: {} bytes free", HEAP.free_bytes());

    *MM.lock_irq() = Some(KernelMemory {
        manager,
        current: None,
    });
    Ok(mapped)
}

/// Run `f` on the memory manager with the frame allocator locked.
///
/// # Errors
/// [`MemoryError::Uninitialized`] before [`init`], or whatever `f` returns.
pub fn with_memory<R>(
    f: impl FnOnce(&mut KernelMemory, &mut BitmapFrameAlloc) -> Result<R, KernelFault>,
) -> Result<R, MemoryError> {
    let mut pmm = PMM.lock_irq();
    let mut mm = MM.lock_irq();
    let mm = mm.as_mut().ok_or(MemoryError::Uninitialized)?;
    Ok(f(mm, &mut pmm)?)
}

/// Resolve a page fault against the running address space.
///
/// # Errors
/// [`MemoryError::Busy`] if the fault hit while the frame allocator or the
/// memory manager was locked, otherwise the [`KernelFault`] from resolution.
pub fn handle_page_fault(
    addr: VirtualAddress,
    code: PageFaultError,
) -> Result<FaultResolution, MemoryError> {
    let mut pmm = PMM.try_lock().ok_or(MemoryError::Busy)?;
    let mut mm = MM.try_lock().ok_or(MemoryError::Busy)?;
    let mm = mm.as_mut().ok_or(MemoryError::Uninitialized)?;
    Ok(mm
        .manager
        .handle_page_fault(&mut *pmm, mm.current.as_mut(), addr, code)?)
}

/// Exercise demand paging end to end on the running machine.
///
/// Reserves lazy kernel pages and touches them, backs a kernel stack, then
/// spawns a task address space, switches to it and touches its lazy user
/// stack before switching back.
///
/// # Errors
/// Any [`MemoryError`] from the memory manager.
pub fn self_test() -> Result<(), MemoryError> {
    const PAGES: u32 = 4;
    let lazy = with_memory(|mem, pmm| {
        Ok(mem.manager.map_pages(
            pmm,
            None,
            VirtualAddress::zero(),
            None,
            PAGES,
            PageEntryBits::new_kernel_rw(),
        )?)
    })?;
    for page in 0..PAGES {
        // Each write faults in one fresh, zeroed frame.
        touch(lazy + page * 4096, 0xC0DE_0000 | page);
    }
    debug!("selftest: {PAGES} lazy kernel pages at {lazy} backed on touch");

    let stack: Stack = with_memory(|mem, pmm| mem.manager.alloc_kernel_stack(pmm))?;
    touch(stack.top, 0x57AC_0000);

    let user = with_memory(|mem, pmm| {
        let space = mem.manager.spawn_address_space(pmm, mem.manager.kernel_space())?;
        mem.current = Some(space);
        let stack = mem.manager.alloc_user_stack(pmm, mem.current.as_mut())?;
        // SAFETY: task contexts share the kernel half, including this stack.
        unsafe { mem.manager.activate(mem.current.as_ref()) };
        Ok(stack)
    })?;
    touch(user.top, 0x05E4_0000);
    debug!("selftest: task stack {}..{} backed on touch", user.bottom, user.top);

    with_memory(|mem, _| {
        // SAFETY: back to the kernel context, which maps everything running.
        unsafe { mem.manager.activate(None) };
        mem.current = None;
        Ok(())
    })?;
    info!("selftest: demand paging ok");
    Ok(())
}

/// Write `value` to `va` and read it back.
fn touch(va: VirtualAddress, value: u32) {
    let p = va.as_mut_ptr::<u32>();
    // SAFETY: `va` is reserved in the active context; a missing translation
    // is resolved by the page-fault handler before the access retires.
    unsafe {
        p.write_volatile(value);
        debug_assert_eq!(p.read_volatile(), value);
    }
}
