//! # Low-Memory PhysMapper
//!
//! [`PhysMapper`] for the kernel: physical `[0, LOWMEM_SIZE)` is mapped at
//! `HIGHER_HALF_BASE + pa` in every context, so a frame is reached by plain
//! address arithmetic.
//!
//! ## Why is this needed?
//! - Code can only dereference virtual addresses, not physical ones.
//! - Page tables and freshly allocated frames must be written before they are
//!   mapped anywhere else.
//!
//! The PMM reserves every frame at or above `LOWMEM_SIZE`, so all frames it
//! hands out are reachable here.
//!
//! ## Example
//! ```rust
//! use kernel_alloc::phys_mapper::LowmemPhysMapper;
//! use kernel_memory_addresses::PhysicalAddress;
//!
//! let va = LowmemPhysMapper::virt_of(PhysicalAddress::new(0x0010_0000));
//! assert_eq!(va.map(|v| v.as_u32()), Some(0xC010_0000));
//! ```

use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_vmem::PhysMapper;
use kernel_vmem::direct_map::phys_to_virt;

/// [`PhysMapper`] over the low-memory direct map.
///
/// # Safety
/// - The direct map must be present in the active context (true for the
///   bootstrap directory's first megabytes and for every context built by
///   `MemoryManager`).
#[derive(Debug, Default, Copy, Clone)]
pub struct LowmemPhysMapper;

impl LowmemPhysMapper {
    /// Where `pa` appears in the direct map, if it is low memory.
    #[inline]
    #[must_use]
    pub const fn virt_of(pa: PhysicalAddress) -> Option<VirtualAddress> {
        phys_to_virt(pa)
    }
}

impl PhysMapper for LowmemPhysMapper {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let Some(va) = phys_to_virt(pa) else {
            panic!("{pa} is outside the low-memory direct map");
        };
        // SAFETY: caller guarantees `pa` is mapped writable through the direct map.
        unsafe { &mut *va.as_mut_ptr::<T>() }
    }
}
