//! # Page Directory and Page Table (i386, non-PAE)
//!
//! Two levels, 1024 four-byte entries each:
//!
//! ```text
//! | 31‒22 | 21‒12 | 11‒0   |
//! |  PD   |  PT   | Offset |
//! ```

pub mod pd;
pub mod pt;

use crate::page_table::pd::L2Index;
use crate::page_table::pt::L1Index;
use kernel_memory_addresses::VirtualAddress;

/// Entries per directory or table.
pub const ENTRIES: usize = 1024;

#[inline]
#[must_use]
pub const fn split_indices(va: VirtualAddress) -> (L2Index, L1Index) {
    (L2Index::from(va), L1Index::from(va))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_ok() {
        let (i2, i1) = split_indices(VirtualAddress::new(0xC03F_F123));
        assert_eq!(i2.as_usize(), 768);
        assert_eq!(i1.as_usize(), 1023);
    }
}
