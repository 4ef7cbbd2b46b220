//! # i386 Interrupt Descriptor Table (IDT)
//!
//! Minimal, `no_std`-friendly IDT for 32-bit protected mode with a fluent
//! builder API:
//!
//! ```ignore
//! idt[PAGE_FAULT_VECTOR]
//!     .set_handler(page_fault_isr)
//!     .selector(KERNEL_CS)                 // run handler in the kernel code segment
//!     .present(true)                       // mark entry valid
//!     .gate_type(GateType::InterruptGate); // mask IF on entry
//! ```
//!
//! ## Acronyms (kept close at hand)
//! - **IDT** – *Interrupt Descriptor Table* (256 entries describing traps/IRQs)
//! - **ISR** – *Interrupt Service Routine* (your handler function)
//! - **DPL** – *Descriptor Privilege Level* (0=kernel … 3=user)
//! - **P** – *Present* bit (must be 1 for a valid gate)
//!
//! ## Design notes
//! - Exact 8-byte gate layout per Intel SDM, "IDT Descriptors".
//! - [`IdtGateAttr`] encodes the attribute byte using [`bitfield_struct`]; the
//!   rest stays `repr(C)` to keep offsets clear.
//! - Only the page-fault vector is installed. Any other exception finds a
//!   non-present gate and escalates to a triple fault.

pub mod page_fault;

use bitfield_struct::bitfield;
use core::mem::size_of;
use core::ops::{Index, IndexMut};

const _: () = assert!(size_of::<IdtEntry>() == 8);
const _: () = assert!(size_of::<Idt>() == 256 * 8);

/// Attribute byte of a gate: `| P | DPL(2) | S(0) | Type(4) |`.
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct IdtGateAttr {
    /// **Type** – 0xE = 32-bit *interrupt gate*, 0xF = 32-bit *trap gate*.
    #[bits(4)]
    pub typ: u8,

    /// **S** – System bit (must be `0` for interrupt/trap gates).
    pub s: bool,

    /// **DPL** – Descriptor Privilege Level (0..=3).
    ///
    /// To allow invocation from user mode via `int n`, set DPL to `3`.
    #[bits(2)]
    pub dpl: u8,

    /// **P** – Present bit. Must be `1` for a valid entry.
    pub present: bool,
}

impl IdtGateAttr {
    #[inline]
    #[must_use]
    pub const fn interrupt_gate() -> Self {
        Self::new().with_typ(0xE).with_s(false)
    }

    #[inline]
    #[must_use]
    pub const fn trap_gate() -> Self {
        Self::new().with_typ(0xF).with_s(false)
    }
}

/// Gate kinds supported by this IDT.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum GateType {
    /// Masks further maskable interrupts upon entry (clears `IF`).
    InterruptGate,
    /// Leaves `IF` unchanged.
    TrapGate,
}

/// One **8-byte** i386 IDT gate descriptor.
///
/// ```text
/// 63            48 47 46 45 44  40 39    32
/// +---------------+--+-----+--+-----+-------+
/// | offset[31:16] |P | DPL |0 |type |  zero |
/// +---------------+--+-----+--+-----+-------+
/// 31            16 15                      0
/// +---------------+-------------------------+
/// |   selector    |      offset[15:0]       |
/// +---------------+-------------------------+
/// ```
#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub struct IdtEntry {
    offset_lo: u16,
    selector: u16,
    zero: u8,
    attr: u8,
    offset_hi: u16,
}

impl IdtEntry {
    /// A zeroed, non-present entry.
    pub const MISSING: Self = Self {
        offset_lo: 0,
        selector: 0,
        zero: 0,
        attr: 0,
        offset_hi: 0,
    };

    /// Store the handler address and return a fluent builder.
    ///
    /// The entry is **not** marked present by default; call
    /// [`IdtEntryBuilder::present`] when you are ready.
    #[allow(clippy::cast_possible_truncation)]
    pub fn set_handler(&mut self, handler: unsafe extern "C" fn()) -> IdtEntryBuilder<'_> {
        let addr = handler as usize as u32;
        self.offset_lo = (addr & 0xFFFF) as u16;
        self.offset_hi = (addr >> 16) as u16;
        self.attr = IdtGateAttr::interrupt_gate().into_bits();
        IdtEntryBuilder { entry: self }
    }

    /// Linear address of the handler.
    #[must_use]
    pub fn handler_address(&self) -> u32 {
        u32::from(self.offset_lo) | (u32::from(self.offset_hi) << 16)
    }

    #[must_use]
    pub const fn selector_bits(&self) -> u16 {
        self.selector
    }

    #[must_use]
    pub const fn attributes(&self) -> IdtGateAttr {
        IdtGateAttr::from_bits(self.attr)
    }
}

/// Fluent builder for an [`IdtEntry`].
pub struct IdtEntryBuilder<'a> {
    entry: &'a mut IdtEntry,
}

impl IdtEntryBuilder<'_> {
    /// Set the **Present** bit. Must be `true` for a usable gate.
    #[inline]
    #[must_use]
    pub const fn present(self, p: bool) -> Self {
        self.entry.attr = IdtGateAttr::from_bits(self.entry.attr).with_present(p).into_bits();
        self
    }

    /// Set **DPL** (Descriptor Privilege Level), 0..=3.
    #[inline]
    #[must_use]
    pub const fn dpl(self, dpl: u8) -> Self {
        self.entry.attr = IdtGateAttr::from_bits(self.entry.attr)
            .with_dpl(dpl & 0b11)
            .into_bits();
        self
    }

    /// Code segment the handler runs in.
    #[inline]
    #[must_use]
    pub const fn selector(self, sel: u16) -> Self {
        self.entry.selector = sel;
        self
    }

    #[inline]
    pub const fn gate_type(self, ty: GateType) {
        let base = match ty {
            GateType::InterruptGate => IdtGateAttr::interrupt_gate(),
            GateType::TrapGate => IdtGateAttr::trap_gate(),
        };
        let current = IdtGateAttr::from_bits(self.entry.attr);
        self.entry.attr = base
            .with_present(current.present())
            .with_dpl(current.dpl())
            .into_bits();
    }
}

/// A 256-entry **Interrupt Descriptor Table**.
#[repr(C, align(8))]
pub struct Idt {
    entries: [IdtEntry; 256],
}

impl Default for Idt {
    fn default() -> Self {
        Self::new()
    }
}

impl Idt {
    /// A new, empty IDT with all gates marked **not present**.
    pub const fn new() -> Self {
        Self {
            entries: [IdtEntry::MISSING; 256],
        }
    }

    /// Load this IDT into the CPU’s **IDTR** using `lidt`.
    ///
    /// # Safety
    /// - Must be called at **CPL0**, after the GDT holding the gates'
    ///   selectors is loaded.
    /// - All **present** entries must reference valid handler code.
    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    pub unsafe fn load(&'static self) {
        let idtr = Idtr {
            limit: (size_of::<Self>() - 1) as u16,
            base: core::ptr::from_ref(self).addr() as u32,
        };

        #[cfg(all(target_arch = "x86", target_os = "none"))]
        unsafe {
            core::arch::asm!("lidt [{}]", in(reg) &raw const idtr, options(nostack, preserves_flags, readonly));
        }

        #[cfg(not(all(target_arch = "x86", target_os = "none")))]
        let _ = idtr;
    }
}

impl Index<usize> for Idt {
    type Output = IdtEntry;
    fn index(&self, i: usize) -> &Self::Output {
        &self.entries[i]
    }
}

impl IndexMut<usize> for Idt {
    fn index_mut(&mut self, i: usize) -> &mut Self::Output {
        &mut self.entries[i]
    }
}

/// Operand format used by `lidt` (limit + base).
#[repr(C, packed)]
struct Idtr {
    limit: u16,
    base: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe extern "C" fn dummy() {}

    #[test]
    fn gate_attributes() {
        assert_eq!(IdtGateAttr::interrupt_gate().with_present(true).into_bits(), 0x8E);
        assert_eq!(IdtGateAttr::trap_gate().with_present(true).with_dpl(3).into_bits(), 0xEF);
    }

    #[test]
    #[allow(clippy::cast_possible_truncation)]
    fn builder_fills_the_entry() {
        let mut idt = Idt::new();
        assert!(!idt[14].attributes().present());
        idt[14]
            .set_handler(dummy)
            .selector(0x08)
            .present(true)
            .gate_type(GateType::TrapGate);
        let e = idt[14];
        assert_eq!(
            e.handler_address(),
            dummy as unsafe extern "C" fn() as usize as u32
        );
        assert_eq!(e.selector_bits(), 0x08);
        assert_eq!(e.attributes().typ(), 0xF);
        assert!(e.attributes().present());
        assert!(!idt[13].attributes().present());
    }
}
