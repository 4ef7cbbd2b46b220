use core::fmt;
use core::hash::Hash;

/// Sealed trait pattern to restrict `PageSize` impls to our markers.
mod sealed {
    pub trait Sealed {}
}

/// Marker trait for supported page sizes.
pub trait PageSize:
    sealed::Sealed + Clone + Copy + Eq + PartialEq + Ord + PartialOrd + Hash + fmt::Display + fmt::Debug
{
    /// Page size in bytes (power of two).
    const SIZE: u32;
    /// log2(SIZE), i.e., number of low bits used for the offset.
    const SHIFT: u32;

    fn as_str() -> &'static str;
}

/// 4 KiB page (4096 bytes), mapped by a page-table entry.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Size4K;
impl sealed::Sealed for Size4K {}
impl PageSize for Size4K {
    const SIZE: u32 = 4096;
    const SHIFT: u32 = 12;

    fn as_str() -> &'static str {
        "4K"
    }
}

/// 4 MiB page (`4_194_304` bytes), mapped by a directory entry with `PS=1`.
///
/// Requires `CR4.PSE`. This is also the span covered by one page table.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Size4M;
impl sealed::Sealed for Size4M {}
impl PageSize for Size4M {
    const SIZE: u32 = 4 * 1024 * 1024;
    const SHIFT: u32 = 22;

    fn as_str() -> &'static str {
        "4M"
    }
}

impl fmt::Display for Size4K {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(Self::as_str())
    }
}

impl fmt::Display for Size4M {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(Self::as_str())
    }
}

impl fmt::Debug for Size4K {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self, f)
    }
}

impl fmt::Debug for Size4M {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self, f)
    }
}

/// Number of `S`-sized pages needed to hold `bytes` bytes (rounds up).
///
/// ```rust
/// # use kernel_memory_addresses::{page_count, Size4K, Size4M};
/// assert_eq!(page_count::<Size4K>(0), 0);
/// assert_eq!(page_count::<Size4K>(1), 1);
/// assert_eq!(page_count::<Size4K>(4096), 1);
/// assert_eq!(page_count::<Size4K>(4097), 2);
/// assert_eq!(page_count::<Size4M>(0x0100_0000), 4);
/// ```
#[inline]
#[must_use]
pub const fn page_count<S: PageSize>(bytes: u64) -> u32 {
    let pages = bytes.div_ceil(S::SIZE as u64);
    if pages > u32::MAX as u64 {
        u32::MAX
    } else {
        pages as u32
    }
}
