//! # Kernel Tracing helpers

use kernel_info::boot::MemoryMap;
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::PageEntryBits;
use kernel_vmem::self_map::{is_self_map, pde_address, pte_address};
use log::{error, info};

/// Log every firmware memory region once.
pub fn log_memory_map(memory_map: &MemoryMap<'_>) {
    info!("Memory map:");
    for region in memory_map.iter() {
        info!(
            "  {base:#012x}..{end:#012x} {len:>10} KiB  {kind}",
            base = region.base,
            end = region.end(),
            len = region.length >> 10,
            kind = region.kind,
        );
    }
    info!("  usable RAM ends at {:#x}", memory_map.available_end());
}

/// Log CR0, CR3 and CR4 as far as paging cares.
pub fn log_ctrl_bits() {
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    {
        use kernel_registers::LoadRegisterUnsafe;
        use kernel_registers::{cr0::Cr0, cr3::Cr3, cr4::Cr4};

        // SAFETY: ring 0.
        let (cr0, cr3, cr4) = unsafe { (Cr0::load_unsafe(), Cr3::load_unsafe(), Cr4::load_unsafe()) };
        error!(
            "CR0={:08x} (PG={} WP={}) CR3={} CR4={:08x} (PSE={} PGE={})",
            cr0.into_bits(),
            u8::from(cr0.pg_paging()),
            u8::from(cr0.wp_write_protect()),
            cr3.directory_phys(),
            cr4.into_bits(),
            u8::from(cr4.pse()),
            u8::from(cr4.pge()),
        );
    }
}

/// Dump the directory and table entries translating `va` in the active
/// context, read through the self-map window.
///
/// # Safety
/// The active context must carry the self-map.
pub unsafe fn dump_walk(va: VirtualAddress) {
    let read = |at: VirtualAddress| {
        // SAFETY: the caller guarantees the self-map is live.
        PageEntryBits::from_bits(unsafe { at.as_ptr::<u32>().read_volatile() })
    };

    let pde = read(pde_address(va));
    error!(
        "  PDE[{:4}] @ {} = {:#010x} {pde:?}",
        va.directory_index(),
        pde_address(va),
        pde.into_bits()
    );
    if !pde.present() {
        error!("  -> directory entry not present");
        return;
    }
    if pde.large_page() {
        error!("  -> 4 MiB page at {}", pde.large_physical_address());
        return;
    }
    if is_self_map(va) {
        error!("  -> inside the self-map window");
        return;
    }

    let pte = read(pte_address(va));
    error!(
        "  PTE[{:4}] @ {} = {:#010x} {pte:?}",
        va.table_index(),
        pte_address(va),
        pte.into_bits()
    );
    if pte.present() {
        error!("  -> {}", pte.physical_address());
    } else {
        error!("  -> page not present");
    }
}
