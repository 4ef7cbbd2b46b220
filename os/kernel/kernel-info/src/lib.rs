//! # Kernel Configuration and Boot Interface
//!
//! Memory layout constants and the boot loader handoff shared by the kernel
//! binary, its build script and the memory-management crates.
//!
//! ## Architecture
//!
//! ### Memory Layout ([`memory`])
//! The fixed 32-bit address space split:
//! * **User partition**: `[USER_SPACE_START, HIGHER_HALF_BASE)`, private per task
//! * **Kernel partition**: `[HIGHER_HALF_BASE, SELF_MAP_BASE)`, shared by all tasks
//! * **Low-memory direct map**: physical `[0, LOWMEM_SIZE)` at `HIGHER_HALF_BASE + pa`
//! * **Self-map window**: the active page tables at `SELF_MAP_BASE`
//!
//! ### Boot Information ([`boot`])
//! A safe reader for the Multiboot2 information block:
//! * **Memory map**: firmware regions fed to the frame allocator
//! * **Framebuffer**: the linear framebuffer mapped into the kernel partition
//! * **Kernel sections**: where `.text`, `.rodata`, `.data` and `.bss` were linked
//!
//! ## Physical Memory Layout
//!
//! ```text
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │     Low Memory (< 1MiB)         │
//!             │  (BIOS, VGA, real-mode data)    │
//! PHYS_LOAD   ├─────────────────────────────────┤ 0x0010_0000 (1 MiB)
//!             │       Kernel Image              │
//! HEAP        ├─────────────────────────────────┤ 0x0080_0000 (8 MiB)
//!             │       Kernel Heap (16 MiB)      │
//!             ├─────────────────────────────────┤ 0x0180_0000
//!             │    Available RAM                │
//!             │  (Managed by frame allocator)   │
//! LOWMEM_SIZE ├─────────────────────────────────┤ 0x3000_0000
//!             │    Not directly mapped          │
//!             └─────────────────────────────────┘
//! ```
//!
//! ## Build Script Integration
//! ```rust
//! use kernel_info::memory::{KERNEL_BASE, PHYS_LOAD};
//!
//! println!("cargo:rustc-link-arg=--defsym=KERNEL_BASE={:#x}", KERNEL_BASE);
//! println!("cargo:rustc-link-arg=--defsym=PHYS_LOAD={:#x}", PHYS_LOAD);
//! ```
//!
//! The crate is `#![deny(unsafe_code)]`; the boot information is handed in as
//! a byte slice by the kernel entry code.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod memory;
