//! # Page-Fault Resolution
//!
//! Decision procedure for vector 14, independent of the ISR glue:
//!
//! ```text
//! reserved bit set ─────────────────────────────► fatal
//! present (protection violation) ── user ───────► kill task
//!                                 └─ supervisor ─► fatal
//! user access to the kernel half ───────────────► kill task
//! not present ── no allocation ── user ─────────► kill task
//!             │                └─ supervisor ───► fatal
//!             ├─ lazy record ──► fresh zeroed frame, map
//!             └─ eager record ─► remap the recorded frame
//! ```
//!
//! The hardware retries the faulting instruction after a successful return.

use crate::frame_alloc::PmmError;
use crate::layout::LayoutError;
use crate::vmm::{Vmm, VmmError};
use bitfield_struct::bitfield;
use core::fmt;
use kernel_info::boot::BootInfoError;
use kernel_info::memory::HIGHER_HALF_BASE;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_vmem::{FrameAlloc, PagingError, PhysMapper};

/// Page-fault error code layout (i386).
///
/// Each bit describes the condition that caused the page fault.
/// Reference: Intel SDM Vol. 3A, §6.15 "Page-Fault Exception (#PF)".
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PageFaultError {
    /// 0 = non-present page.
    /// 1 = protection violation (page present but access disallowed).
    pub present: bool, // bit 0

    /// 0 = read or execute.
    /// 1 = write access.
    pub write: bool, // bit 1

    /// 0 = supervisor (CPL 0–2).
    /// 1 = user mode (CPL 3).
    pub user: bool, // bit 2

    /// 1 = caused by reserved bit set in a paging structure.
    pub reserved_bit: bool, // bit 3

    /// 1 = instruction fetch.
    pub instruction_fetch: bool, // bit 4

    /// 1 = protection-key violation (if CR4.PKE=1).
    pub protection_key: bool, // bit 5

    /// 1 = shadow stack access (if CET-SS enabled).
    pub shadow_stack: bool, // bit 6

    #[bits(8)]
    __: u8, // bits 7..14

    /// 1 = SGX access-control violation.
    pub sgx: bool, // bit 15

    #[bits(16)]
    __: u16,
}

impl PageFaultError {
    #[must_use]
    pub const fn explain(&self) -> &'static str {
        if self.reserved_bit() {
            "Reserved bit set in a paging entry"
        } else if !self.present() {
            if self.user() {
                "User-mode access to a non-present page"
            } else {
                "Kernel access to a non-present page"
            }
        } else if self.instruction_fetch() {
            if self.user() {
                "User-mode instruction fetch on protected page"
            } else {
                "Kernel instruction fetch on protected page"
            }
        } else if self.write() {
            if self.user() {
                "User-mode write to protected page"
            } else {
                "Kernel write to protected page (WP)"
            }
        } else if self.user() {
            "User-mode read of a supervisor page"
        } else {
            "Kernel read of protected page"
        }
    }
}

impl fmt::Display for PageFaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flag = |set: bool, c: char| if set { c } else { '-' };
        write!(
            f,
            "{}{}{}{}{}",
            flag(self.present(), 'P'),
            flag(self.write(), 'W'),
            flag(self.user(), 'U'),
            flag(self.reserved_bit(), 'R'),
            flag(self.instruction_fetch(), 'I'),
        )
    }
}

/// How a page fault was resolved.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FaultResolution {
    /// A lazy page got a fresh, zeroed frame.
    DemandAllocated {
        page: VirtualAddress,
        frame: PhysicalAddress,
    },
    /// An eagerly backed page was mapped again to its recorded frame.
    Remapped {
        page: VirtualAddress,
        frame: PhysicalAddress,
    },
}

/// What the kernel must do about a [`KernelFault`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Disposition {
    HaltKernel,
    KillTask,
}

/// Every failure that reaches a kernel API boundary.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KernelFault {
    #[error("out of physical memory")]
    OutOfPhysicalMemory,
    #[error("out of virtual address space ({0} pages requested)")]
    OutOfVirtualMemory(u32),
    #[error("protection violation at {addr} [{code}]: {}", .code.explain())]
    ProtectionViolation {
        addr: VirtualAddress,
        code: PageFaultError,
    },
    #[error("reserved bit violation at {addr} [{code}]")]
    ReservedBit {
        addr: VirtualAddress,
        code: PageFaultError,
    },
    #[error("access to unreserved address {addr} [{code}]")]
    UnreservedAccess {
        addr: VirtualAddress,
        code: PageFaultError,
    },
    #[error(transparent)]
    Vmm(VmmError),
    #[error(transparent)]
    Paging(PagingError),
    #[error("boot information: {0}")]
    BootInfo(#[from] BootInfoError),
    #[error("kernel layout: {0}")]
    Layout(#[from] LayoutError),
}

impl KernelFault {
    /// Whether the fault takes down the kernel or only the current task.
    #[must_use]
    pub const fn disposition(&self) -> Disposition {
        match self {
            Self::ProtectionViolation { code, .. } | Self::UnreservedAccess { code, .. }
                if code.user() =>
            {
                Disposition::KillTask
            }
            _ => Disposition::HaltKernel,
        }
    }
}

impl From<PmmError> for KernelFault {
    fn from(e: PmmError) -> Self {
        match e {
            PmmError::OutOfMemory => Self::OutOfPhysicalMemory,
        }
    }
}

impl From<PagingError> for KernelFault {
    fn from(e: PagingError) -> Self {
        match e {
            PagingError::OutOfMemory => Self::OutOfPhysicalMemory,
            other => Self::Paging(other),
        }
    }
}

impl From<VmmError> for KernelFault {
    fn from(e: VmmError) -> Self {
        match e {
            VmmError::OutOfPhysicalMemory => Self::OutOfPhysicalMemory,
            VmmError::OutOfVirtualMemory(pages) => Self::OutOfVirtualMemory(pages),
            VmmError::Paging(p) => p.into(),
            other => Self::Vmm(other),
        }
    }
}

/// Resolve a page fault at `addr` against the context behind `vmm`.
///
/// The caller picks the context: the kernel's for kernel-half addresses, the
/// current task's otherwise.
///
/// # Errors
/// A [`KernelFault`] whose [`disposition`](KernelFault::disposition) tells
/// the caller whether to halt or to kill the task.
pub fn resolve<M: PhysMapper, A: FrameAlloc>(
    vmm: &mut Vmm<'_, '_, M, A>,
    addr: VirtualAddress,
    code: PageFaultError,
) -> Result<FaultResolution, KernelFault> {
    if code.reserved_bit() {
        return Err(KernelFault::ReservedBit { addr, code });
    }
    if code.present() || (code.user() && addr.as_u32() >= HIGHER_HALF_BASE) {
        return Err(KernelFault::ProtectionViolation { addr, code });
    }

    match vmm.resolve_page(addr) {
        Ok(resolution) => Ok(resolution),
        Err(VmmError::NotMapped(_)) => Err(KernelFault::UnreservedAccess { addr, code }),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_bits() {
        let e = PageFaultError::from_bits(0b111);
        assert!(e.present() && e.write() && e.user());
        assert!(!e.reserved_bit());
        assert_eq!(e.to_string(), "PWU--");
        assert!(PageFaultError::from_bits(1 << 15).sgx());
    }

    #[test]
    fn explain_distinguishes_cases() {
        assert_eq!(
            PageFaultError::new().explain(),
            "Kernel access to a non-present page"
        );
        assert_eq!(
            PageFaultError::new().with_present(true).with_write(true).explain(),
            "Kernel write to protected page (WP)"
        );
        assert_eq!(
            PageFaultError::new().with_reserved_bit(true).explain(),
            "Reserved bit set in a paging entry"
        );
    }

    #[test]
    fn user_faults_kill_the_task_supervisor_faults_halt() {
        let addr = VirtualAddress::new(0x1000);
        let user = PageFaultError::new().with_present(true).with_user(true);
        let kern = PageFaultError::new().with_present(true);
        assert_eq!(
            KernelFault::ProtectionViolation { addr, code: user }.disposition(),
            Disposition::KillTask
        );
        assert_eq!(
            KernelFault::ProtectionViolation { addr, code: kern }.disposition(),
            Disposition::HaltKernel
        );
        assert_eq!(
            KernelFault::UnreservedAccess { addr, code: PageFaultError::new().with_user(true) }
                .disposition(),
            Disposition::KillTask
        );
        assert_eq!(
            KernelFault::ReservedBit { addr, code: user }.disposition(),
            Disposition::HaltKernel
        );
        assert_eq!(KernelFault::OutOfPhysicalMemory.disposition(), Disposition::HaltKernel);
    }

    #[test]
    fn lower_layer_errors_fold_into_kernel_faults() {
        assert_eq!(
            KernelFault::from(PmmError::OutOfMemory),
            KernelFault::OutOfPhysicalMemory
        );
        assert_eq!(
            KernelFault::from(VmmError::Paging(PagingError::OutOfMemory)),
            KernelFault::OutOfPhysicalMemory
        );
        assert_eq!(
            KernelFault::from(VmmError::OutOfVirtualMemory(3)),
            KernelFault::OutOfVirtualMemory(3)
        );
    }
}
