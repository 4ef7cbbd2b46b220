//! # Global Descriptor Table (GDT) for 32-bit protected mode
//!
//! The boot loader leaves *some* GDT loaded, but its location is unspecified
//! and may be reclaimed as ordinary memory. The kernel installs its own flat
//! table before it touches interrupts: the IDT gates name [`KERNEL_CS`], so
//! that selector must mean kernel code for as long as the kernel runs.
//!
//! ## GDT layout used here
//! Index | Selector | Meaning
//! ------|----------|--------
//! 0     | 0x00     | Null
//! 1     | 0x08     | Kernel code (DPL=0; [`KERNEL_CS`])
//! 2     | 0x10     | Kernel data (DPL=0; [`KERNEL_DS`])
//! 3     | 0x18     | User   code (DPL=3) → with RPL=3: **0x1b** ([`USER_CS`])
//! 4     | 0x20     | User   data (DPL=3) → with RPL=3: **0x23** ([`USER_DS`])
//!
//! User segments are present so that ring-3 code can later run in the
//! address spaces the memory manager builds; nothing enters ring 3 yet.

pub mod descriptors;
pub mod selectors;

use crate::gdt::descriptors::SegmentDescriptor;
use crate::gdt::selectors::SegmentSelector;

pub const KERNEL_CS_SEL: SegmentSelector = SegmentSelector::gdt(1, 0);
pub const KERNEL_DS_SEL: SegmentSelector = SegmentSelector::gdt(2, 0);
pub const USER_CS_SEL: SegmentSelector = SegmentSelector::gdt(3, 3);
pub const USER_DS_SEL: SegmentSelector = SegmentSelector::gdt(4, 3);

// Encoded selector numbers as `u16` (what the CPU actually loads).
pub const KERNEL_CS: u16 = KERNEL_CS_SEL.encode(); // 0x08
pub const KERNEL_DS: u16 = KERNEL_DS_SEL.encode(); // 0x10
pub const USER_CS: u16 = USER_CS_SEL.encode(); // 0x1b
pub const USER_DS: u16 = USER_DS_SEL.encode(); // 0x23

const _: () = {
    assert!(KERNEL_CS == 0x08);
    assert!(KERNEL_DS == 0x10);
    assert!(USER_CS == 0x1b);
    assert!(USER_DS == 0x23);
};

/// The complete GDT for the bootstrap CPU.
#[repr(C, align(8))]
pub struct Gdt {
    entries: [SegmentDescriptor; 5],
}

impl Default for Gdt {
    fn default() -> Self {
        Self::new()
    }
}

impl Gdt {
    pub const fn new() -> Self {
        Self {
            entries: [
                SegmentDescriptor::NULL,
                SegmentDescriptor::flat_code(0),
                SegmentDescriptor::flat_data(0),
                SegmentDescriptor::flat_code(3),
                SegmentDescriptor::flat_data(3),
            ],
        }
    }

    /// The descriptor a selector refers to.
    #[must_use]
    pub fn descriptor(&self, sel: SegmentSelector) -> Option<SegmentDescriptor> {
        self.entries.get(usize::from(sel.index())).copied()
    }
}

static GDT: Gdt = Gdt::new();

/// Pointer format required by `lgdt`.
///
/// The CPU reads exactly `limit+1` bytes starting at `base` to load the GDT.
#[repr(C, packed)]
struct DescTablePtr {
    /// Size of the table **minus one** in bytes.
    limit: u16,
    /// Base linear address of the table.
    base: u32,
}

/// Load the kernel GDT and reload every segment register from it.
///
/// ### Safety / Ordering
/// - Run with interrupts disabled, before the IDT is loaded.
/// - Ring 0 only.
#[allow(clippy::cast_possible_truncation)]
pub unsafe fn init_gdt() {
    let ptr = DescTablePtr {
        limit: (size_of::<Gdt>() - 1) as u16,
        base: core::ptr::from_ref(&GDT).addr() as u32,
    };

    #[cfg(all(target_arch = "x86", target_os = "none"))]
    unsafe {
        core::arch::asm!(
            "lgdt [{}]",
            in(reg) &raw const ptr,
            options(readonly, nostack, preserves_flags)
        );

        // Refresh data segments to kernel data
        core::arch::asm!(
            "mov ds, {0:x}",
            "mov es, {0:x}",
            "mov fs, {0:x}",
            "mov gs, {0:x}",
            "mov ss, {0:x}",
            in(reg) KERNEL_DS,
            options(nostack, preserves_flags)
        );

        // Far reload of CS = 0x08 (kernel code) via a far return.
        core::arch::asm!(
            "push {cs}",
            "mov {tmp}, offset 2f",
            "push {tmp}",
            "retf",
            "2:",
            cs = const KERNEL_CS,
            tmp = out(reg) _,
        );
    }

    #[cfg(not(all(target_arch = "x86", target_os = "none")))]
    let _ = ptr;

    log::debug!("gdt: loaded, cs={KERNEL_CS:#04x} ds={KERNEL_DS:#04x}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selectors_index_the_matching_descriptors() {
        let gdt = Gdt::new();
        let kcode = gdt.descriptor(KERNEL_CS_SEL).unwrap();
        assert_eq!((kcode.typ(), kcode.dpl()), (0b1010, 0));
        let udata = gdt.descriptor(USER_DS_SEL).unwrap();
        assert_eq!((udata.typ(), udata.dpl()), (0b0010, 3));
        assert!(gdt.descriptor(SegmentSelector::gdt(5, 0)).is_none());
    }

    #[test]
    fn selector_fields_round_trip() {
        assert_eq!(USER_CS_SEL.rpl(), 3);
        assert_eq!(USER_CS_SEL.index(), 3);
        assert!(!USER_CS_SEL.ldt());
    }
}
