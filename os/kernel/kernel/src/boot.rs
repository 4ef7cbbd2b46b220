//! # Multiboot2 Entry
//!
//! The boot loader enters [`_start`] in 32-bit protected mode with paging off,
//! `EAX` holding the Multiboot2 magic and `EBX` the physical address of the
//! boot information. The image is linked at `KERNEL_BASE` but loaded at
//! `PHYS_LOAD`, so until paging is on every absolute address is rebased by
//! `-HIGHER_HALF_BASE`.
//!
//! The stub builds a throw-away page directory out of 4 MiB pages:
//!
//! | Slots           | Maps                                   |
//! |-----------------|----------------------------------------|
//! | 0               | identity, first 4 MiB (the stub itself) |
//! | 768 .. 768+192  | `[0, LOWMEM_SIZE)` at `HIGHER_HALF_BASE` |
//!
//! That is enough to run the image, reach the heap and every frame the frame
//! allocator hands out through the direct map, and build the real kernel
//! context. The identity slot dies with the bootstrap directory as soon as
//! the memory manager activates its own.

use core::arch::global_asm;
use kernel_info::boot::{
    KernelMemInfo, MULTIBOOT2_ARCHITECTURE_I386, MULTIBOOT2_HEADER_MAGIC, SectionInfo,
};
use kernel_info::memory::{HIGHER_HALF_BASE, KERNEL_FIRST_DIRECTORY_INDEX, LOWMEM_SIZE};
use kernel_registers::cr0::Cr0;
use kernel_registers::cr4::Cr4;
use kernel_vmem::PageEntryBits;

/// Stack size.
const BOOT_STACK_SIZE: usize = 64 * 1024;

/// 16-byte aligned stack
#[repr(C, align(16))]
struct Aligned<const N: usize>([u8; N]);

#[unsafe(link_section = ".bss.boot")]
#[unsafe(no_mangle)]
static mut BOOT_STACK: Aligned<BOOT_STACK_SIZE> = Aligned([0; BOOT_STACK_SIZE]);

/// Page directory used between the boot loader and the kernel context.
#[repr(C, align(4096))]
struct BootDirectory([u32; 1024]);

#[unsafe(link_section = ".bss.boot")]
#[unsafe(no_mangle)]
static mut BOOT_PAGE_DIRECTORY: BootDirectory = BootDirectory([0; 1024]);

/// Supervisor, writable, 4 MiB leaf at frame 0.
const BOOT_PDE: u32 = PageEntryBits::new_kernel_rw().with_large_page(true).into_bits();

/// Directory slots covering the low-memory direct map.
const BOOT_DIRECT_MAP_SLOTS: u32 = LOWMEM_SIZE >> 22;

const CR4_BOOT: u32 = Cr4::new().with_pse(true).into_bits();
const CR0_BOOT: u32 = Cr0::new()
    .with_pg_paging(true)
    .with_wp_write_protect(true)
    .into_bits();

// Multiboot2 header: magic, architecture, length, checksum, then an optional
// framebuffer request (type 5) and the end tag. Must sit in the first 32 KiB
// of the image, 8-byte aligned; the linker script puts `.multiboot2` first.
global_asm!(
    ".section .multiboot2, \"a\"",
    ".balign 8",
    "2:",
    ".long {magic}",
    ".long {arch}",
    ".long 3f - 2b",
    ".long 0x100000000 - ({magic} + {arch} + (3f - 2b))",
    ".balign 8",
    ".short 5",
    ".short 1",
    ".long 20",
    ".long 1024",
    ".long 768",
    ".long 32",
    ".balign 8",
    ".short 0",
    ".short 0",
    ".long 8",
    "3:",
    magic = const MULTIBOOT2_HEADER_MAGIC,
    arch = const MULTIBOOT2_ARCHITECTURE_I386,
);

global_asm!(
    ".section .text.boot, \"ax\"",
    ".global _start",
    "_start:",
    "cli",
    "cld",
    // Keep the boot loader's handoff out of the registers we use.
    "mov esi, eax",
    "mov ebp, ebx",

    // Zero the bootstrap directory (physical address, paging is off).
    "mov edi, offset {pd}",
    "sub edi, {hh}",
    "mov edx, edi",
    "xor eax, eax",
    "mov ecx, 1024",
    "rep stosd",

    // Slot 0: identity map of the first 4 MiB.
    "mov dword ptr [edx], {pde}",

    // Slots 768..: the low-memory direct map.
    "xor ecx, ecx",
    "4:",
    "mov eax, ecx",
    "shl eax, 22",
    "or eax, {pde}",
    "mov [edx + ecx * 4 + {first_slot} * 4], eax",
    "inc ecx",
    "cmp ecx, {slots}",
    "jb 4b",

    // 4 MiB pages, then paging.
    "mov eax, cr4",
    "or eax, {cr4}",
    "mov cr4, eax",
    "mov cr3, edx",
    "mov eax, cr0",
    "or eax, {cr0}",
    "mov cr0, eax",

    // Continue at the linked (higher-half) address.
    "mov eax, offset 5f",
    "jmp eax",
    "5:",
    "mov esp, offset {stack}",
    "add esp, {stack_size}",
    "xor ebx, ebx",
    "push ebp", // mbi_phys
    "push esi", // magic
    "push ebx", // no return address
    "xor ebp, ebp",
    "jmp {entry}",
    pd = sym BOOT_PAGE_DIRECTORY,
    hh = const HIGHER_HALF_BASE,
    pde = const BOOT_PDE,
    first_slot = const KERNEL_FIRST_DIRECTORY_INDEX,
    slots = const BOOT_DIRECT_MAP_SLOTS,
    cr4 = const CR4_BOOT,
    cr0 = const CR0_BOOT,
    stack = sym BOOT_STACK,
    stack_size = const BOOT_STACK_SIZE,
    entry = sym kernel_entry,
);

/// Kernel entry running on the boot stack, in the higher half.
///
/// # Notes
/// * `no_mangle` is used so that `_start` can jump to it by name.
/// * It uses C ABI to have a defined convention when calling in from ASM:
///   both arguments are on the stack.
#[unsafe(no_mangle)]
extern "C" fn kernel_entry(magic: u32, mbi_phys: u32) -> ! {
    #[cfg(feature = "qemu")]
    kernel_qemu::qemu_trace!("Kernel reporting to QEMU!\n");

    crate::kernel_main(magic, mbi_phys)
}

unsafe extern "C" {
    static __text_start: u8;
    static __text_end: u8;
    static __rodata_start: u8;
    static __rodata_end: u8;
    static __data_start: u8;
    static __data_end: u8;
    static __bss_start: u8;
    static __bss_end: u8;
}

/// Where the linker placed each section of the image.
#[allow(clippy::cast_possible_truncation)]
pub fn kernel_mem_info() -> KernelMemInfo {
    let section = |start: *const u8, end: *const u8| {
        SectionInfo::new(start.addr() as u32, end.addr() as u32)
    };
    // Only the addresses of the linker symbols are used, never their contents.
    KernelMemInfo {
        text: section(&raw const __text_start, &raw const __text_end),
        rodata: section(&raw const __rodata_start, &raw const __rodata_end),
        data: section(&raw const __data_start, &raw const __data_end),
        bss: section(&raw const __bss_start, &raw const __bss_end),
    }
}
