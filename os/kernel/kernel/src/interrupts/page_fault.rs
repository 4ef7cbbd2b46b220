//! # Page-Fault Vector (#PF, 14)
//!
//! The ISR stub saves the general registers, hands the error code to
//! [`page_fault_entry`], and returns with `iretd` so the faulting instruction
//! is retried. Resolution itself lives in `kernel-alloc`; this module only
//! decides what happens when it fails.

use crate::gdt::KERNEL_CS;
use crate::interrupts::{GateType, Idt};
use crate::memory::{self, MemoryError};
use kernel_alloc::{Disposition, FaultResolution, KernelFault, PageFaultError};
use kernel_memory_addresses::VirtualAddress;
use kernel_sync::irq::halt_forever;
use log::{error, warn};

pub const PAGE_FAULT_VECTOR: usize = 0x0E; // 14

pub trait PageFaultInterrupt {
    /// Install a ring-0 page-fault handler as an interrupt gate.
    fn init_page_fault_gate(&mut self, handler: unsafe extern "C" fn()) -> &mut Self;
}

impl PageFaultInterrupt for Idt {
    fn init_page_fault_gate(&mut self, handler: unsafe extern "C" fn()) -> &mut Self {
        self[PAGE_FAULT_VECTOR]
            .set_handler(handler)
            .selector(KERNEL_CS)
            .present(true)
            .gate_type(GateType::InterruptGate);
        self
    }
}

/// Interrupt-gate #PF stub.
///
/// Stack on entry: error code, `EIP`, `CS`, `EFLAGS` (plus `ESP`, `SS` from
/// ring 3). `pushad` adds 32 bytes on top of that.
#[cfg(all(target_arch = "x86", target_os = "none"))]
#[unsafe(naked)]
pub unsafe extern "C" fn page_fault_isr() {
    core::arch::naked_asm!(
        "pushad",
        "cld",
        "push dword ptr [esp + 32]", // error code
        "call {handler}",
        "add esp, 4",
        "popad",
        "add esp, 4", // drop the error code
        "iretd",
        handler = sym page_fault_entry,
    )
}

/// Rust side of the #PF stub. Returns only if the fault was resolved.
#[cfg(all(target_arch = "x86", target_os = "none"))]
extern "C" fn page_fault_entry(code: u32) {
    use kernel_registers::LoadRegisterUnsafe;
    use kernel_registers::cr2::Cr2;

    // SAFETY: ring 0, first thing in the handler; nothing can fault before
    // CR2 is read.
    let addr = unsafe { Cr2::load_unsafe() }.fault_address();
    let code = PageFaultError::from_bits(code);
    if let Err(e) = on_page_fault(addr, code) {
        fatal(addr, code, &e);
    }
}

/// Resolve a page fault and log the outcome.
///
/// # Errors
/// Anything that keeps the faulting instruction from being retried.
pub fn on_page_fault(
    addr: VirtualAddress,
    code: PageFaultError,
) -> Result<FaultResolution, MemoryError> {
    let resolution = memory::handle_page_fault(addr, code)?;
    log::debug!("page fault at {addr} [{code}]: {resolution:?}");
    Ok(resolution)
}

/// Log everything known about an unresolved fault, then stop the CPU.
fn fatal(addr: VirtualAddress, code: PageFaultError, err: &MemoryError) -> ! {
    match err {
        MemoryError::Fault(fault) if fault.disposition() == Disposition::KillTask => {
            // No task layer to kill the offender yet.
            warn!("page fault: task would be killed: {fault}");
        }
        MemoryError::Fault(KernelFault::OutOfPhysicalMemory) => {
            error!("PAGE FAULT: out of physical memory while backing {addr}");
        }
        _ => error!("PAGE FAULT: {err}"),
    }

    error!("  cr2={addr} err={:#x} [{code}]", code.into_bits());
    error!("  {}", code.explain());
    crate::tracing::log_ctrl_bits();

    if memory::self_map_live() {
        error!("Table walk at CR2:");
        // SAFETY: the active context carries the self-map.
        unsafe { crate::tracing::dump_walk(addr) };
    }

    halt_forever()
}
