use bitfield_struct::bitfield;
use kernel_memory_addresses::PhysicalAddress;

/// A single 32-bit i386 paging entry (non-PAE) in its raw bitfield form.
///
/// This structure models the **common superset** of the fields found in page
/// directory entries (PDE) and page table entries (PTE). Each bit corresponds
/// to a hardware-defined flag or address field as specified in the Intel SDM,
/// Vol. 3A, §4.3 ("32-Bit Paging").
///
/// ### Overview
/// An entry may either:
/// - point to a **page table** (PDE with `PS=0`), or
/// - directly map a **4 MiB page** (PDE with `PS=1`, requires `CR4.PSE`), or
/// - map a **4 KiB page** (PTE).
///
/// ### Bit layout
///
/// | Bits      | Name / Mnemonic   | Meaning |
/// |-----------|-------------------|----------|
/// | 0         | `P` (present)     | Valid entry if set |
/// | 1         | `RW`              | Writable if set |
/// | 2         | `US`              | User-mode accessible if set |
/// | 3         | `PWT`             | Write-through caching |
/// | 4         | `PCD`             | Disable caching |
/// | 5         | `A`               | Accessed |
/// | 6         | `D`               | Dirty (leaf only) |
/// | 7         | `PS` / `PAT`      | 4 MiB page in a PDE; PAT in a PTE |
/// | 8         | `G`               | Global (leaf only, needs `CR4.PGE`) |
/// | 9–11      | OS avail          | Ignored by hardware |
/// | 12–31     | `addr`            | Physical frame bits [31:12] |
///
/// ### Notes
/// - In a 4 MiB leaf only bits 22–31 hold the frame base; bit 12 is PAT and
///   bits 13–21 carry PSE-36 high address bits, which this kernel keeps zero.
/// - There is no execute-disable bit without PAE.
///
/// ### Example
/// ```rust
/// # use kernel_memory_addresses::PhysicalAddress;
/// # use kernel_vmem::PageEntryBits;
/// let mut e = PageEntryBits::new();
/// e.set_present(true);
/// e.set_writable(true);
/// e.set_physical_address(PhysicalAddress::new(0x0012_3000));
/// assert!(e.present());
/// assert_eq!(e.into_bits(), 0x0012_3003);
/// ```
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PageEntryBits {
    /// Present (P, bit 0).
    ///
    /// Clear implies a not-present entry; every other bit is then free for
    /// software use, and an access through it raises `#PF` with `P=0`.
    pub present: bool,

    /// Writable (RW, bit 1).
    ///
    /// Set to allow writes; clear for read-only. Supervisor writes honor this
    /// only when `CR0.WP` is set.
    pub writable: bool,

    /// User/Supervisor (US, bit 2).
    ///
    /// Set to allow user-mode access. Permissions intersect over the walk, so
    /// both the PDE and the PTE need it for a user mapping.
    pub user_access: bool,

    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,

    /// Page Cache Disable (PCD, bit 4).
    ///
    /// Used for MMIO such as the linear framebuffer.
    pub cache_disabled: bool,

    /// Accessed (A, bit 5). Set by the CPU on first access.
    pub accessed: bool,

    /// Dirty (D, bit 6): **leaf only**. Set by the CPU on first write.
    pub dirty: bool,

    /// Page Size (PS, bit 7).
    ///
    /// In a PDE: when **set**, the entry maps a 4 MiB page directly. In a PTE
    /// the bit is PAT; this kernel always keeps it clear there.
    pub large_page: bool,

    /// Global (G, bit 8): **leaf only**.
    ///
    /// Survives CR3 reloads when `CR4.PGE` is enabled.
    pub global_translation: bool,

    /// OS-available (bits 9..=11).
    #[bits(3)]
    pub os_available: u8,

    /// Physical address bits [31:12].
    #[bits(20)]
    phys_addr_bits_31_12: u32,
}

impl PageEntryBits {
    #[inline]
    pub const fn set_physical_address(&mut self, phys: PhysicalAddress) {
        self.set_phys_addr_bits_31_12(phys.as_u32() >> 12);
    }

    #[inline]
    #[must_use]
    pub const fn with_physical_address(mut self, phys: PhysicalAddress) -> Self {
        self.set_physical_address(phys);
        self
    }

    /// Frame base for a 4 KiB leaf or a page-table pointer.
    #[inline]
    #[must_use]
    pub const fn physical_address(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.phys_addr_bits_31_12() << 12)
    }

    /// Frame base for a 4 MiB leaf (bits 22–31 only).
    #[inline]
    #[must_use]
    pub const fn large_physical_address(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.into_bits() & 0xFFC0_0000)
    }

    /// Permission and caching bits only: address, `A`, `D`, `PS` cleared.
    #[inline]
    #[must_use]
    pub const fn permissions(self) -> Self {
        Self::new()
            .with_present(self.present())
            .with_writable(self.writable())
            .with_user_access(self.user_access())
            .with_write_through(self.write_through())
            .with_cache_disabled(self.cache_disabled())
            .with_global_translation(self.global_translation())
    }

    /// Kernel read/write data.
    #[inline]
    #[must_use]
    pub const fn new_kernel_rw() -> Self {
        Self::new().with_present(true).with_writable(true)
    }

    /// Kernel read-only (code, constants).
    #[inline]
    #[must_use]
    pub const fn new_kernel_ro() -> Self {
        Self::new().with_present(true)
    }

    /// User read/write data (heap, stack).
    #[inline]
    #[must_use]
    pub const fn new_user_rw() -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_user_access(true)
    }

    /// User read-only/executable (loaded code).
    #[inline]
    #[must_use]
    pub const fn new_user_ro() -> Self {
        Self::new().with_present(true).with_user_access(true)
    }

    /// Kernel MMIO: write-through, uncached.
    #[inline]
    #[must_use]
    pub const fn new_mmio() -> Self {
        Self::new_kernel_rw()
            .with_write_through(true)
            .with_cache_disabled(true)
    }

    /// Flags for a directory entry linking a page table.
    ///
    /// Writable so leaf entries decide; `user` widens access for user leaves.
    #[inline]
    #[must_use]
    pub const fn new_table_link(user: bool) -> Self {
        Self::new_kernel_rw().with_user_access(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_bit_positions() {
        assert_eq!(PageEntryBits::new_kernel_rw().into_bits(), 0b011);
        assert_eq!(PageEntryBits::new_user_rw().into_bits(), 0b111);
        assert_eq!(PageEntryBits::new_mmio().into_bits(), 0b1_1011);
        assert_eq!(PageEntryBits::new().with_large_page(true).into_bits(), 1 << 7);
        assert_eq!(
            PageEntryBits::new().with_global_translation(true).into_bits(),
            1 << 8
        );
    }

    #[test]
    fn large_page_address_ignores_pat_and_pse36_bits() {
        let e = PageEntryBits::from_bits(0x0840_0000 | (1 << 12) | (1 << 7) | 1);
        assert_eq!(e.large_physical_address().as_u32(), 0x0840_0000);
        assert_eq!(e.physical_address().as_u32(), 0x0840_1000);
    }

    #[test]
    fn permissions_drop_hardware_status_bits() {
        let e = PageEntryBits::new_user_rw()
            .with_accessed(true)
            .with_dirty(true)
            .with_physical_address(PhysicalAddress::new(0x5000));
        assert_eq!(e.permissions(), PageEntryBits::new_user_rw());
    }
}
