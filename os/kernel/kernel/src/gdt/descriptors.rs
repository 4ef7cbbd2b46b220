//! # 32-bit GDT code/data descriptor encodings (typed builders)
//!
//! The kernel runs with a flat model: every code and data segment has base 0
//! and a 4 GiB limit, so linear addresses equal offsets and paging alone
//! provides protection. What still matters per descriptor is:
//! - **Type** (code vs data, readable/writable),
//! - **S** (descriptor class: code/data vs system),
//! - **DPL** (descriptor privilege level),
//! - **P** (present),
//! - **DB** (32-bit default operand size / stack pointer width),
//! - **G** (limit counted in 4 KiB units).

use bitfield_struct::bitfield;

/// Bit layout of a code or data segment descriptor.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct SegmentDescriptor {
    pub limit_lo: u16, // [15:0]
    pub base_lo: u16,  // [31:16]
    pub base_mid: u8,  // [39:32]
    #[bits(4)]
    pub typ: u8, // [43:40]
    pub s: bool,       // [44]     = 1 (code/data)
    #[bits(2)]
    pub dpl: u8, // [46:45]
    pub p: bool,       // [47]
    #[bits(4)]
    pub limit_hi: u8, // [51:48]
    pub avl: bool,     // [52]
    pub l: bool,       // [53]     = 0 (no long mode)
    pub db: bool,      // [54]     = 1 (32-bit)
    pub g: bool,       // [55]     = 1 (4 KiB granularity)
    pub base_hi: u8,   // [63:56]
}

/// Execute + read.
const TYPE_CODE_RX: u8 = 0b1010;
/// Read + write.
const TYPE_DATA_RW: u8 = 0b0010;

impl SegmentDescriptor {
    pub const NULL: Self = Self::new();

    /// Base 0, limit 4 GiB, 32-bit, present.
    const fn flat(typ: u8, dpl: u8) -> Self {
        Self::new()
            .with_limit_lo(0xFFFF)
            .with_limit_hi(0xF)
            .with_typ(typ)
            .with_s(true)
            .with_dpl(dpl & 0b11)
            .with_p(true)
            .with_db(true)
            .with_g(true)
    }

    /// Flat **code** descriptor (execute+read).
    #[must_use]
    pub const fn flat_code(dpl: u8) -> Self {
        Self::flat(TYPE_CODE_RX, dpl)
    }

    /// Flat **data/stack** descriptor (read/write).
    #[must_use]
    pub const fn flat_data(dpl: u8) -> Self {
        Self::flat(TYPE_DATA_RW, dpl)
    }

    /// Segment limit in bytes minus one, after granularity scaling.
    #[must_use]
    pub fn byte_limit(self) -> u32 {
        let raw = u32::from(self.limit_lo()) | (u32::from(self.limit_hi()) << 16);
        if self.g() { (raw << 12) | 0xFFF } else { raw }
    }
}

// Size guard: each descriptor is exactly 8 bytes.
const _: () = assert!(size_of::<SegmentDescriptor>() == 8);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_descriptors_match_the_classic_encodings() {
        assert_eq!(SegmentDescriptor::flat_code(0).into_bits(), 0x00CF_9A00_0000_FFFF);
        assert_eq!(SegmentDescriptor::flat_data(0).into_bits(), 0x00CF_9200_0000_FFFF);
        assert_eq!(SegmentDescriptor::flat_code(3).into_bits(), 0x00CF_FA00_0000_FFFF);
        assert_eq!(SegmentDescriptor::flat_data(3).into_bits(), 0x00CF_F200_0000_FFFF);
    }

    #[test]
    fn flat_limit_covers_4_gib() {
        assert_eq!(SegmentDescriptor::flat_code(0).byte_limit(), u32::MAX);
        assert_eq!(SegmentDescriptor::NULL.into_bits(), 0);
    }
}
