use bitfield_struct::bitfield;

#[cfg(all(feature = "asm", target_arch = "x86"))]
use crate::{LoadRegisterUnsafe, StoreRegisterUnsafe};

/// CR4: Control Register 4 (32-bit protected mode).
///
/// Controls paging extensions and a few protection features. Bits above
/// `SMAP` are modeled as reserved.
#[bitfield(u32, order = Lsb)]
pub struct Cr4 {
    /// Bit 0: VME: Virtual-8086 Mode Extensions.
    pub vme: bool,

    /// Bit 1: PVI: Protected-Mode Virtual Interrupts.
    pub pvi: bool,

    /// Bit 2: TSD: Time Stamp Disable.
    pub tsd: bool,

    /// Bit 3: DE: Debugging Extensions.
    pub de: bool,

    /// Bit 4: PSE: Page Size Extensions.
    ///
    /// Enables 4 MiB directory leaves (`PS=1`) in non-PAE paging.
    pub pse: bool,

    /// Bit 5: PAE: Physical Address Extension.
    ///
    /// Must stay clear; the kernel uses the two-level 32-bit format.
    pub pae: bool,

    /// Bit 6: MCE: Machine-Check Enable.
    pub mce: bool,

    /// Bit 7: PGE: Page Global Enable.
    ///
    /// Global entries survive CR3 reloads.
    pub pge: bool,

    /// Bit 8: PCE: Performance-Monitoring Counter Enable.
    pub pce: bool,

    /// Bit 9: OSFXSR: OS supports FXSAVE/FXRSTOR.
    pub osfxsr: bool,

    /// Bit 10: OSXMMEXCPT: OS supports unmasked SIMD FP exceptions.
    pub osxmmexcpt: bool,

    /// Bit 11: UMIP: User-Mode Instruction Prevention.
    pub umip: bool,

    /// Bits 12–19: not used in 32-bit paging.
    #[bits(8, access = RO)]
    pub reserved0: u8,

    /// Bit 20: SMEP: Supervisor Mode Execution Prevention.
    pub smep: bool,

    /// Bit 21: SMAP: Supervisor Mode Access Prevention.
    pub smap: bool,

    /// Bits 22–31: Reserved.
    #[bits(10, access = RO)]
    pub reserved1: u16,
}

#[cfg(all(feature = "asm", target_arch = "x86"))]
impl LoadRegisterUnsafe for Cr4 {
    unsafe fn load_unsafe() -> Self {
        let mut cr4: u32;
        unsafe {
            core::arch::asm!("mov {}, cr4", out(reg) cr4, options(nomem, preserves_flags));
        }
        Self::from_bits(cr4)
    }
}

#[cfg(all(feature = "asm", target_arch = "x86"))]
impl StoreRegisterUnsafe for Cr4 {
    unsafe fn store_unsafe(self) {
        let cr4 = self.into_bits();
        unsafe {
            core::arch::asm!("mov cr4, {}", in(reg) cr4, options(nomem, preserves_flags));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_and_global_bits() {
        let cr4 = Cr4::new().with_pse(true).with_pge(true);
        assert_eq!(cr4.into_bits(), (1 << 4) | (1 << 7));
        assert!(!cr4.pae());
    }
}
