//! # Kernel Entry Point
//!
//! Boot order on the bare-metal target:
//!
//! 1. `_start` (boot stub): bootstrap page directory, paging on, jump high.
//! 2. [`kernel_main`]: logger, GDT, IDT with the page-fault gate.
//! 3. Memory bring-up: heap, frame allocator, kernel context, framebuffer.
//! 4. A demand-paging self test, then halt.
//!
//! On hosted targets the binary is an empty stub so the workspace builds and
//! tests on the development machine.

#![cfg_attr(target_os = "none", no_std, no_main)]
#![allow(unsafe_code)]
#![cfg_attr(not(target_os = "none"), allow(dead_code))]

#[cfg(target_os = "none")]
mod boot;
mod gdt;
mod idt;
mod interrupts;
mod memory;
mod tracing;

#[cfg(target_os = "none")]
use kernel_qemu::QemuLogger;

#[cfg(target_os = "none")]
static LOGGER: QemuLogger = QemuLogger::new(log::LevelFilter::Debug);

#[cfg(target_os = "none")]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    log::error!("KERNEL PANIC: {info}");
    kernel_sync::irq::halt_forever()
}

#[cfg(not(target_os = "none"))]
fn main() {}

#[cfg(target_os = "none")]
fn kernel_main(magic: u32, mbi_phys: u32) -> ! {
    use crate::interrupts::Idt;
    use crate::interrupts::page_fault::{PageFaultInterrupt, page_fault_isr};
    use log::{error, info};

    if LOGGER.init().is_err() {
        kernel_qemu::qemu_trace!("logger already installed\n");
    }
    info!("kernel: multiboot2 magic={magic:#010x} mbi={mbi_phys:#010x}");

    // SAFETY: ring 0, interrupts off since the boot stub.
    unsafe { gdt::init_gdt() };
    let mut idt = Idt::new();
    idt.init_page_fault_gate(page_fault_isr);
    // SAFETY: the only present gate points at the #PF stub.
    unsafe { idt::init_idt_once(idt) };

    match bring_up(magic, mbi_phys) {
        Ok(()) => info!("kernel: memory management up, nothing left to run"),
        Err(e) => error!("kernel: boot failed: {e}"),
    }
    kernel_sync::irq::halt_forever()
}

/// Parse the boot information and start memory management.
#[cfg(target_os = "none")]
fn bring_up(magic: u32, mbi_phys: u32) -> Result<(), memory::MemoryError> {
    use kernel_alloc::{KernelFault, PhysRange};
    use kernel_info::boot::{BootInformation, check_magic, total_size};
    use kernel_memory_addresses::PhysicalAddress;
    use kernel_vmem::direct_map::phys_to_virt;

    check_magic(magic).map_err(KernelFault::from)?;

    let unreachable = memory::MemoryError::BootInfoUnreachable(mbi_phys);
    let header = phys_to_virt(PhysicalAddress::new(mbi_phys)).ok_or(unreachable)?;
    // SAFETY: the boot loader placed the block at `mbi_phys`, the bootstrap
    // directory maps it through the direct map, and it is 8-byte aligned.
    let len = total_size(unsafe { &*header.as_ptr::<[u8; 8]>() });
    let end = u32::try_from(len)
        .ok()
        .filter(|&len| len >= 8)
        .and_then(|len| mbi_phys.checked_add(len))
        .ok_or(unreachable)?;
    phys_to_virt(PhysicalAddress::new(end - 1)).ok_or(unreachable)?;
    // SAFETY: as above, for all `len` bytes; the frames stay reserved.
    let bytes = unsafe { core::slice::from_raw_parts(header.as_ptr::<u8>(), len) };
    let info = BootInformation::parse(bytes).map_err(KernelFault::from)?;

    let image = boot::kernel_mem_info();
    for (name, section) in image.sections() {
        log::debug!(
            "kernel: {name:8} {}..{} ({} bytes)",
            section.virtual_start,
            section.virtual_end,
            section.len()
        );
    }

    let mbi = PhysRange::new(u64::from(mbi_phys), u64::from(end));
    if let Some((fb, va)) = memory::init(&info, &image, mbi)? {
        log::info!("kernel: framebuffer {}x{} at {va}", fb.width, fb.height);
    }

    memory::self_test()
}
