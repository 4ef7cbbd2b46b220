//! # Segment selectors
//!
//! Segment selectors are 16-bit values loaded into CS/DS/ES/SS. A selector
//! encodes:
//!
//! ```text
//!  15            3 2  1  0
//! +----------------+--+----+
//! |   Index[12:0]  |TI| RPL|
//! +----------------+--+----+  (TI=0 → GDT, TI=1 → LDT; RPL=0..3)
//! ```

use bitfield_struct::bitfield;

/// Raw 16-bit selector encoding (index/TI/RPL).
#[bitfield(u16)]
#[derive(PartialEq, Eq)]
pub struct SegmentSelector {
    /// Requested Privilege Level (bits 0..1).
    #[bits(2)]
    pub rpl: u8,
    /// Table Indicator (bit 2): `false` = GDT, `true` = LDT.
    pub ldt: bool,
    /// Descriptor index (bits 3..15).
    #[bits(13)]
    pub index: u16,
}

impl SegmentSelector {
    /// A GDT selector for `index` with the given RPL.
    #[inline]
    #[must_use]
    pub const fn gdt(index: u16, rpl: u8) -> Self {
        Self::new().with_index(index).with_rpl(rpl & 0b11)
    }

    /// Return the selector as a plain `u16`.
    #[inline]
    #[must_use]
    pub const fn encode(self) -> u16 {
        self.into_bits()
    }
}
