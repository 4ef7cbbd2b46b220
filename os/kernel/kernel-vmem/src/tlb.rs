//! TLB maintenance.

use kernel_memory_addresses::VirtualAddress;

/// Drop the cached translation for the page containing `va` (`invlpg`).
///
/// Only the current CPU's TLB is affected. On hosted builds there is no TLB to
/// maintain and this does nothing.
#[inline]
pub fn invalidate_tlb_page(va: VirtualAddress) {
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    unsafe {
        core::arch::asm!("invlpg [{}]", in(reg) va.as_u32(), options(nostack, preserves_flags));
    }

    #[cfg(not(all(target_arch = "x86", target_os = "none")))]
    let _ = va;
}
