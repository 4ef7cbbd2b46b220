use crate::{MemoryAddress, MemoryPage, PageSize};
use core::fmt;
use core::marker::PhantomData;
use core::ops::Add;

/// Byte offset inside a page of size `S`, always `< S::SIZE`.
///
/// A 4 KiB offset is the low 12 bits of an address; a 4 MiB offset (directory
/// leaf) the low 22 bits.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MemoryAddressOffset<S: PageSize> {
    value: u32,
    _phantom: PhantomData<S>,
}

impl<S: PageSize> MemoryAddressOffset<S> {
    /// Keep the bits of `value` below `S::SIZE`; debug builds reject the rest.
    #[inline]
    #[must_use]
    pub const fn new(value: u32) -> Self {
        debug_assert!(value < S::SIZE, "offset must be < page size");
        Self {
            value: value & (S::SIZE - 1),
            _phantom: PhantomData,
        }
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.value
    }

    #[inline]
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.value == 0
    }
}

impl<S: PageSize> fmt::Debug for MemoryAddressOffset<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "+{:#x}/{}", self.value, S::as_str())
    }
}

impl<S: PageSize> Add<MemoryAddressOffset<S>> for MemoryPage<S> {
    type Output = MemoryAddress;
    #[inline]
    fn add(self, rhs: MemoryAddressOffset<S>) -> Self::Output {
        self.join(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Size4K, Size4M};

    #[test]
    fn offsets_are_masked_to_the_page_size() {
        assert_eq!(MemoryAddressOffset::<Size4K>::new(0xABC).as_u32(), 0xABC);
        assert_eq!(MemoryAddressOffset::<Size4M>::new(0x3F_FFFF).as_u32(), 0x3F_FFFF);
        assert!(MemoryAddressOffset::<Size4K>::new(0).is_zero());
        assert_eq!(format!("{:?}", MemoryAddressOffset::<Size4K>::new(0x10)), "+0x10/4K");
    }
}
