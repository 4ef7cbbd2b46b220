//! # Kernel Memory Allocation and Virtual Memory Management
//!
//! Physical frame allocation, per-address-space bookkeeping, demand paging,
//! and the kernel heap, on top of the paging layer in `kernel-vmem`.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 Memory Manager                      │
//! │    • kernel / task address spaces                   │
//! │    • routing by partition, stacks, framebuffer      │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │          Virtual Memory Manager (VMM)               │
//! │    • free-block list + allocation tree              │
//! │    • eager and lazy mappings, page-fault resolution │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │        Paging layer (kernel-vmem) + Phys Mapper     │
//! │    • page directory / tables via the direct map     │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │           Physical Frame Allocator                  │
//! │    • one bit per 4 KiB frame, lowest free first     │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Components
//!
//! - [`frame_alloc`]: the bitmap PMM. Needs no heap, so it works before the
//!   heap exists.
//! - [`vmm`]: [`VmmContext`](vmm::VmmContext) bookkeeping and the
//!   [`Vmm`](vmm::Vmm) view that applies it to page tables.
//! - [`fault`]: page-fault decoding, resolution, and [`KernelFault`](fault::KernelFault).
//! - [`heap`]: the `#[global_allocator]` backing the VMM arenas.
//! - [`phys_mapper`]: frame access through the low-memory direct map.
//! - [`layout`] and [`manager`]: the kernel's fixed mappings and the
//!   [`MemoryManager`](manager::MemoryManager) that owns the address spaces.
//!
//! ## Usage
//!
//! ```rust
//! use kernel_alloc::frame_alloc::{BitmapFrameAlloc, PhysRange};
//!
//! let mut pmm = Box::new(BitmapFrameAlloc::new());
//! pmm.init([PhysRange::new(0, 0x10_0000)]);
//! let frame = pmm.alloc_frame().unwrap();
//! assert_eq!(frame.base().as_u32(), 0x10_0000);
//! pmm.free_frame(frame);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

pub mod fault;
pub mod frame_alloc;
pub mod heap;
pub mod layout;
pub mod manager;
pub mod phys_mapper;
pub mod vmm;

pub use crate::fault::{Disposition, FaultResolution, KernelFault, PageFaultError};
pub use crate::frame_alloc::{BitmapFrameAlloc, PhysRange, PmmError};
pub use crate::heap::KernelHeap;
pub use crate::layout::{KernelLayout, LayoutError, boot_reserved_ranges};
pub use crate::manager::{MemoryManager, Stack, TaskAddressSpace};
pub use crate::phys_mapper::LowmemPhysMapper;
pub use crate::vmm::{Allocation, Vmm, VmmContext, VmmError};
