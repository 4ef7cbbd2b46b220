//! # Self-Map Window
//!
//! Directory slot [`SELF_MAP_INDEX`] links the directory itself as if it were a
//! page table. In the **active** context this makes every page table visible
//! at `SELF_MAP_BASE + pde * 4 KiB`, the directory at `SELF_MAP_DIRECTORY`, and
//! the PTE for any `va` at `SELF_MAP_BASE + (va >> 12) * 4`.
//!
//! The window is only meaningful after the context has been activated; the
//! paging layer itself reaches tables through a [`PhysMapper`](crate::PhysMapper).

use kernel_info::memory::{SELF_MAP_BASE, SELF_MAP_DIRECTORY, SELF_MAP_INDEX};
use kernel_memory_addresses::VirtualAddress;

/// Virtual address of the active page directory.
#[inline]
#[must_use]
pub const fn directory_window() -> VirtualAddress {
    VirtualAddress::new(SELF_MAP_DIRECTORY)
}

/// Virtual address of the page table linked from directory slot `pde`.
#[inline]
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn table_window(pde: usize) -> VirtualAddress {
    debug_assert!(pde <= SELF_MAP_INDEX);
    VirtualAddress::new(SELF_MAP_BASE + (pde as u32) * 4096)
}

/// Virtual address of the PTE that translates `va`.
#[inline]
#[must_use]
pub const fn pte_address(va: VirtualAddress) -> VirtualAddress {
    VirtualAddress::new(SELF_MAP_BASE + (va.as_u32() >> 12) * 4)
}

/// Virtual address of the PDE that translates `va`.
#[inline]
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn pde_address(va: VirtualAddress) -> VirtualAddress {
    VirtualAddress::new(SELF_MAP_DIRECTORY + (va.directory_index() as u32) * 4)
}

/// `true` if `va` lies in the self-map window.
#[inline]
#[must_use]
pub const fn is_self_map(va: VirtualAddress) -> bool {
    va.directory_index() == SELF_MAP_INDEX
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_is_its_own_last_table() {
        assert_eq!(table_window(SELF_MAP_INDEX), directory_window());
        assert_eq!(pte_address(directory_window()).as_u32(), 0xFFFF_FFFC);
    }

    #[test]
    fn entry_addresses() {
        let va = VirtualAddress::new(0xC000_5123);
        assert_eq!(pte_address(va).as_u32(), 0xFFF0_0014);
        assert_eq!(pde_address(va).as_u32(), 0xFFFF_FC00);
        assert!(is_self_map(VirtualAddress::new(0xFFC0_0000)));
        assert!(!is_self_map(VirtualAddress::new(0xFFBF_FFFF)));
    }
}
