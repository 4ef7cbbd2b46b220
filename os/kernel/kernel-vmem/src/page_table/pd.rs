//! # i386 Page Directory (PD / L2)
//!
//! - [`L2Index`]: index type for virtual-address bits `[31:22]`.
//! - [`PdEntry`]: either a pointer to a PT (`PS=0`) or a 4 MiB leaf (`PS=1`).
//! - [`PdEntryKind`]: decoded view of an entry.
//! - [`PageDirectory`]: a 4 KiB-aligned array of 1024 entries.
//!
//! 4 MiB leaves require `CR4.PSE`. Their base must be 4 MiB-aligned.

use crate::PageEntryBits;
use crate::page_table::ENTRIES;
use kernel_memory_addresses::{PhysicalPage, Size4K, Size4M, VirtualAddress};

/// Index into the Page Directory (derived from VA bits `[31:22]`).
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct L2Index(u16);

/// A single Page Directory entry (PDE).
#[doc(alias = "PDE")]
#[repr(transparent)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PdEntry(PageEntryBits);

/// Decoded PDE.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PdEntryKind {
    /// `PS=0`: the entry links a page table.
    NextPageTable(PhysicalPage<Size4K>, PageEntryBits),
    /// `PS=1`: the entry maps a 4 MiB page.
    Leaf4MiB(PhysicalPage<Size4M>, PageEntryBits),
}

/// The Page Directory (L2): 1024 entries, 4 KiB-aligned.
#[doc(alias = "PD")]
#[repr(C, align(4096))]
pub struct PageDirectory {
    entries: [PdEntry; ENTRIES],
}

impl L2Index {
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from(va: VirtualAddress) -> Self {
        Self::new(va.directory_index() as u16)
    }

    /// ### Debug assertions
    /// - Asserts `v < 1024` in debug builds.
    #[inline]
    #[must_use]
    pub const fn new(v: u16) -> Self {
        debug_assert!((v as usize) < ENTRIES);
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl PdEntry {
    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(PageEntryBits::new())
    }

    #[inline]
    #[must_use]
    pub const fn is_present(self) -> bool {
        self.0.present()
    }

    #[inline]
    #[must_use]
    pub const fn flags(self) -> PageEntryBits {
        self.0
    }

    /// Decode a present entry.
    #[inline]
    #[must_use]
    pub fn kind(self) -> Option<PdEntryKind> {
        if !self.is_present() {
            return None;
        }
        Some(if self.0.large_page() {
            PdEntryKind::Leaf4MiB(
                PhysicalPage::containing_address(self.0.large_physical_address()),
                self.0,
            )
        } else {
            PdEntryKind::NextPageTable(
                PhysicalPage::containing_address(self.0.physical_address()),
                self.0,
            )
        })
    }

    /// Link a page table (`PS=0`).
    #[inline]
    #[must_use]
    pub const fn make_next(table: PhysicalPage<Size4K>, mut flags: PageEntryBits) -> Self {
        flags.set_large_page(false);
        flags.set_present(true);
        flags.set_physical_address(table.base());
        Self(flags)
    }

    /// Map a 4 MiB page (`PS=1`).
    #[inline]
    #[must_use]
    pub const fn make_4m(page: PhysicalPage<Size4M>, mut flags: PageEntryBits) -> Self {
        flags.set_present(true);
        flags.set_large_page(true);
        flags.set_physical_address(page.base());
        Self(flags)
    }

    /// Widen a table link so user leaves below it are reachable.
    #[inline]
    #[must_use]
    pub const fn with_user_access(self) -> Self {
        Self(self.0.with_user_access(true))
    }

    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0.into_bits()
    }

    #[inline]
    #[must_use]
    pub const fn from_raw(v: u32) -> Self {
        Self(PageEntryBits::from_bits(v))
    }
}

impl PageDirectory {
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PdEntry::zero(); ENTRIES],
        }
    }

    #[inline]
    pub fn zero(&mut self) {
        self.entries.fill(PdEntry::zero());
    }

    #[inline]
    #[must_use]
    pub const fn get(&self, i: L2Index) -> PdEntry {
        self.entries[i.as_usize()]
    }

    #[inline]
    pub const fn set(&mut self, i: L2Index, e: PdEntry) {
        self.entries[i.as_usize()] = e;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use kernel_memory_addresses::PhysicalAddress;

    #[test]
    fn pde_next_table() {
        let pt = PhysicalPage::<Size4K>::containing_address(PhysicalAddress::new(0x0001_2000));
        let e = PdEntry::make_next(pt, PageEntryBits::new_table_link(false));
        match e.kind().unwrap() {
            PdEntryKind::NextPageTable(p, f) => {
                assert_eq!(p, pt);
                assert!(f.writable());
                assert!(!f.large_page());
            }
            PdEntryKind::Leaf4MiB(..) => panic!("expected a table link"),
        }
    }

    #[test]
    fn pde_4m_leaf() {
        let m4 = PhysicalPage::<Size4M>::containing_address(PhysicalAddress::new(0x0040_0000));
        let e = PdEntry::make_4m(m4, PageEntryBits::new_kernel_rw());
        assert_eq!(e.raw(), 0x0040_0083);
        assert!(matches!(e.kind(), Some(PdEntryKind::Leaf4MiB(p, _)) if p == m4));
    }

    #[test]
    fn non_present_has_no_kind() {
        assert!(PdEntry::zero().kind().is_none());
    }
}
