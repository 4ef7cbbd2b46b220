//! # Memory Layout
//!
//! ```text
//! 0x0000_0000 ┌──────────────────────────────┐
//!             │ null guard page              │
//! 0x0000_1000 ├──────────────────────────────┤ USER_SPACE_START
//!             │ user space (per task)        │  user stack ends at USER_STACK_TOP
//! 0xC000_0000 ├──────────────────────────────┤ HIGHER_HALF_BASE
//!             │ low-memory direct map        │  va = HIGHER_HALF_BASE + pa
//!             │  (kernel image, heap, ...)   │
//! 0xF000_0000 ├──────────────────────────────┤ LOWMEM_END
//!             │ kernel mappings on demand    │  framebuffer, kernel stacks
//! 0xFFC0_0000 ├──────────────────────────────┤ SELF_MAP_BASE
//!             │ page tables via self-map     │  directory at SELF_MAP_DIRECTORY
//! 0xFFFF_FFFF └──────────────────────────────┘
//! ```

/// Size of a base page / physical frame.
pub const PAGE_SIZE: u32 = 4096;

/// Number of entries in a page directory or page table.
pub const ENTRIES_PER_TABLE: usize = 1024;

/// Start of the kernel half. Everything below belongs to the running task.
pub const HIGHER_HALF_BASE: u32 = 0xC000_0000;

/// First address handed out to user mappings; page 0 stays unmapped.
pub const USER_SPACE_START: u32 = 0x0000_1000;

/// End (exclusive) of the user partition.
pub const USER_SPACE_END: u32 = HIGHER_HALF_BASE;

/// Directory slot that points back at the directory itself.
pub const SELF_MAP_INDEX: usize = ENTRIES_PER_TABLE - 1;

/// Window through which the active context's page tables are visible.
pub const SELF_MAP_BASE: u32 = (SELF_MAP_INDEX as u32) << 22;

/// Virtual address of the active page directory through the self-map.
pub const SELF_MAP_DIRECTORY: u32 = SELF_MAP_BASE + (SELF_MAP_INDEX as u32) * PAGE_SIZE;

/// Start of the kernel partition.
pub const KERNEL_SPACE_START: u32 = HIGHER_HALF_BASE;

/// End (exclusive) of the kernel partition; the self-map window follows.
pub const KERNEL_SPACE_END: u32 = SELF_MAP_BASE;

/// First directory slot of the kernel half.
pub const KERNEL_FIRST_DIRECTORY_INDEX: usize = (HIGHER_HALF_BASE >> 22) as usize;

/// Bytes of physical memory reachable at [`HIGHER_HALF_BASE`] `+ pa`.
///
/// Frames above this limit are never handed out by the frame allocator.
pub const LOWMEM_SIZE: u32 = 0x3000_0000; // 768 MiB

/// End (exclusive) of the low-memory direct map.
pub const LOWMEM_END: u32 = HIGHER_HALF_BASE + LOWMEM_SIZE;

/// Legacy real-mode area (IVT, BDA, EBDA, VGA, BIOS ROM); never allocated.
pub const LEGACY_LOW_MEMORY_END: u32 = 0x0010_0000;

/// Where the boot loader places the kernel image (LMA).
///
/// # Kernel Build
/// Sourced by the kernel's `build.rs` to configure the linker.
pub const PHYS_LOAD: u32 = 0x0010_0000; // 1 MiB

/// Where the kernel image executes (VMA).
///
/// # Kernel Build
/// Sourced by the kernel's `build.rs` to configure the linker.
pub const KERNEL_BASE: u32 = HIGHER_HALF_BASE + PHYS_LOAD;

/// Physical start of the kernel heap.
pub const KERNEL_HEAP_PHYS_START: u32 = 0x0080_0000; // 8 MiB

/// Kernel heap size.
pub const KERNEL_HEAP_SIZE: u32 = 0x0100_0000; // 16 MiB

/// Virtual start of the kernel heap inside the direct map.
pub const KERNEL_HEAP_VIRT_START: u32 = HIGHER_HALF_BASE + KERNEL_HEAP_PHYS_START;

/// Pages per kernel stack.
pub const KERNEL_STACK_PAGE_COUNT: u32 = 10;

/// Bytes per kernel stack.
pub const KERNEL_STACK_SIZE: u32 = KERNEL_STACK_PAGE_COUNT * PAGE_SIZE;

/// Pages per user stack.
pub const USER_STACK_PAGE_COUNT: u32 = 10;

/// Bytes per user stack.
pub const USER_STACK_SIZE: u32 = USER_STACK_PAGE_COUNT * PAGE_SIZE;

/// End (exclusive) of the user stack; the stack grows down from here.
pub const USER_STACK_TOP: u32 = 0x0010_0000;

/// Bytes reserved below a stack top for the initial call frame.
pub const STACK_TOP_PADDING: u32 = 16;

const _: () = {
    assert!(HIGHER_HALF_BASE.is_multiple_of(1 << 22));
    assert!(SELF_MAP_DIRECTORY == 0xFFFF_F000);
    assert!(LOWMEM_END <= KERNEL_SPACE_END);
    assert!(KERNEL_HEAP_PHYS_START >= PHYS_LOAD);
    assert!(KERNEL_HEAP_PHYS_START.is_multiple_of(PAGE_SIZE));
    assert!(KERNEL_HEAP_SIZE.is_multiple_of(PAGE_SIZE));
    assert!(KERNEL_HEAP_PHYS_START + KERNEL_HEAP_SIZE <= LOWMEM_SIZE);
    assert!(USER_STACK_TOP.is_multiple_of(PAGE_SIZE));
    assert!(USER_STACK_TOP - USER_STACK_SIZE >= USER_SPACE_START);
    assert!(USER_STACK_TOP <= USER_SPACE_END);
};
