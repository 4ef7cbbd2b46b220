//! # Interrupt Descriptor Table (IDT) storage
//!
//! A single, **global** IDT for the bootstrap CPU. It is written once, then
//! loaded into the IDTR; the CPU reads gates from this memory on every
//! interrupt, so it must stay put for the lifetime of the kernel.
//!
//! ## Ordering checklist (bootstrap)
//! 1. Paging on (boot stub), kernel running in the higher half.
//! 2. **GDT:** [`crate::gdt::init_gdt`], so the gates' `KERNEL_CS` is valid.
//! 3. **IDT:** build an `Idt`, then call [`init_idt_once`].
//! 4. Anything that may fault on purpose (demand paging) comes after.

use crate::interrupts::Idt;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicBool, Ordering};

/// The global interrupt descriptor table.
static mut IDT: MaybeUninit<Idt> = MaybeUninit::uninit();

static LOADED: AtomicBool = AtomicBool::new(false);

/// Install `idt` as the system-wide interrupt table and load it.
///
/// Later calls are ignored.
///
/// # Safety
/// - Ring 0, interrupts disabled, GDT loaded.
/// - Every present gate in `idt` must point at a valid handler.
pub unsafe fn init_idt_once(idt: Idt) {
    if LOADED.swap(true, Ordering::AcqRel) {
        log::warn!("idt: already loaded");
        return;
    }
    #[allow(static_mut_refs)]
    unsafe {
        IDT.write(idt);
        IDT.assume_init_ref().load();
    }
    log::debug!("idt: loaded");
}

/// Whether [`init_idt_once`] has run.
pub fn is_loaded() -> bool {
    LOADED.load(Ordering::Acquire)
}
