//! CR2 holds the linear address that caused the most recent page fault.

use kernel_memory_addresses::VirtualAddress;

#[cfg(all(feature = "asm", target_arch = "x86"))]
use crate::LoadRegisterUnsafe;

/// CR2: Page-Fault Linear Address.
///
/// Only meaningful inside the `#PF` handler, before interrupts are re-enabled;
/// a nested fault overwrites it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(transparent)]
pub struct Cr2(u32);

impl Cr2 {
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn into_bits(self) -> u32 {
        self.0
    }

    /// The faulting virtual address.
    #[must_use]
    pub const fn fault_address(self) -> VirtualAddress {
        VirtualAddress::new(self.0)
    }
}

#[cfg(all(feature = "asm", target_arch = "x86"))]
impl LoadRegisterUnsafe for Cr2 {
    unsafe fn load_unsafe() -> Self {
        let mut cr2: u32;
        unsafe {
            core::arch::asm!("mov {}, cr2", out(reg) cr2, options(nomem, nostack, preserves_flags));
        }
        Self(cr2)
    }
}
