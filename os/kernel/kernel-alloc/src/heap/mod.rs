//! # Kernel Heap
//!
//! A [`GlobalAlloc`] over a fixed region reached through the direct map
//! (`KERNEL_HEAP_VIRT_START`, `KERNEL_HEAP_SIZE`). The VMM arenas grow on this
//! heap.
//!
//! - **Free-list**: first-fit with alignment, split on allocation, coalesced
//!   on free ([`FreeListAllocator`]).
//! - **Synchronization**: a [`SpinLock`] guards every operation. Allocating
//!   from interrupt context while the lock is held would deadlock; the page
//!   fault path only allocates when it grows a VMM arena.
//! - **Initialization**: explicit, once, after the bootstrap directory maps
//!   the region. Before that every allocation fails with null.

mod free_list;

pub use crate::heap::free_list::FreeListAllocator;
use core::alloc::{GlobalAlloc, Layout};
use core::ptr;
use kernel_memory_addresses::VirtualAddress;
use kernel_sync::SpinLock;

/// The kernel's global allocator.
pub struct KernelHeap {
    inner: SpinLock<FreeListAllocator>,
}

impl Default for KernelHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelHeap {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: SpinLock::new(FreeListAllocator::new()),
        }
    }

    /// Hand `[start, start + size)` to the allocator. Later calls are ignored.
    ///
    /// # Safety
    /// The range must be mapped, writable, and used by nothing else.
    pub unsafe fn init(&self, start: VirtualAddress, size: u32) {
        self.inner.with_lock(|heap| {
            if heap.is_initialized() {
                log::warn!("heap: already initialized");
                return;
            }
            unsafe { heap.init(start.as_usize(), size as usize) };
            log::info!("heap: {size:#x} bytes at {start}");
        });
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.inner.with_lock(|heap| heap.is_initialized())
    }

    /// Bytes still available.
    #[must_use]
    pub fn free_bytes(&self) -> usize {
        self.inner.with_lock(|heap| heap.free_bytes())
    }
}

unsafe impl GlobalAlloc for KernelHeap {
    /// Allocate a block of at least `layout.size()` bytes with `layout.align()`.
    ///
    /// # Safety
    /// The `GlobalAlloc` contract applies. Caller must handle a null return (OOM).
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.inner
            .with_lock(|heap| unsafe { heap.allocate(layout.size(), layout.align()) })
    }

    /// Deallocate a block previously returned by `alloc`/`alloc_zeroed`.
    ///
    /// # Safety
    /// The `GlobalAlloc` contract applies.
    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        self.inner.with_lock(|heap| unsafe { heap.deallocate(ptr) });
    }

    /// Allocate and zero a block.
    ///
    /// # Safety
    /// The `GlobalAlloc` contract applies.
    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let p = unsafe { self.alloc(layout) };
        if !p.is_null() {
            unsafe { ptr::write_bytes(p, 0, layout.size()) };
        }
        p
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(align(4096))]
    struct Region([u8; 32 * 1024]);

    #[test]
    fn uninitialized_heap_returns_null() {
        let heap = KernelHeap::new();
        let p = unsafe { heap.alloc(Layout::from_size_align(16, 8).unwrap()) };
        assert!(p.is_null());
    }

    #[test]
    fn alloc_zeroed_and_dealloc() {
        let mut region = Box::new(Region([0xAA; 32 * 1024]));
        let heap = KernelHeap::new();
        #[allow(clippy::cast_possible_truncation)]
        let start = VirtualAddress::new(region.0.as_mut_ptr() as usize as u32);
        // Host pointers do not fit 32 bits on 64-bit hosts; drive the inner
        // allocator directly there.
        if start.as_usize() != region.0.as_mut_ptr() as usize {
            heap.inner
                .with_lock(|h| unsafe { h.init(region.0.as_mut_ptr() as usize, 32 * 1024) });
        } else {
            unsafe { heap.init(start, 32 * 1024) };
        }
        assert!(heap.is_initialized());
        let before = heap.free_bytes();

        let layout = Layout::from_size_align(64, 16).unwrap();
        let p = unsafe { heap.alloc_zeroed(layout) };
        assert!(!p.is_null());
        assert_eq!(p as usize % 16, 0);
        assert!(unsafe { core::slice::from_raw_parts(p, 64) }.iter().all(|b| *b == 0));
        unsafe { heap.dealloc(p, layout) };
        assert_eq!(heap.free_bytes(), before);
    }
}
