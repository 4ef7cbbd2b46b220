//! # Low-Memory Direct Map
//!
//! Physical `[0, LOWMEM_SIZE)` is mapped at `HIGHER_HALF_BASE + pa` in every
//! context. These two functions are the only place that offset is applied.

use kernel_info::memory::{HIGHER_HALF_BASE, LOWMEM_END, LOWMEM_SIZE};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

/// Virtual alias of a physical address, if it lies in the direct map.
///
/// ```rust
/// # use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
/// # use kernel_vmem::direct_map::phys_to_virt;
/// assert_eq!(phys_to_virt(PhysicalAddress::new(0x0010_0000)), Some(VirtualAddress::new(0xC010_0000)));
/// assert_eq!(phys_to_virt(PhysicalAddress::new(0x4000_0000)), None);
/// ```
#[inline]
#[must_use]
pub const fn phys_to_virt(pa: PhysicalAddress) -> Option<VirtualAddress> {
    if pa.as_u32() < LOWMEM_SIZE {
        Some(VirtualAddress::new(HIGHER_HALF_BASE + pa.as_u32()))
    } else {
        None
    }
}

/// Physical address behind a direct-map virtual address.
///
/// ```rust
/// # use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
/// # use kernel_vmem::direct_map::virt_to_phys;
/// assert_eq!(virt_to_phys(VirtualAddress::new(0xC080_0000)), Some(PhysicalAddress::new(0x0080_0000)));
/// assert_eq!(virt_to_phys(VirtualAddress::new(0x0040_0000)), None);
/// ```
#[inline]
#[must_use]
pub const fn virt_to_phys(va: VirtualAddress) -> Option<PhysicalAddress> {
    let v = va.as_u32();
    if v >= HIGHER_HALF_BASE && v < LOWMEM_END {
        Some(PhysicalAddress::new(v - HIGHER_HALF_BASE))
    } else {
        None
    }
}
