//! # Kernel synchronization primitives
//!
//! The kernel runs on one CPU, but the memory manager is reached both from
//! normal kernel code and from the page-fault handler. Its state therefore
//! lives behind a [`SpinLock`]. Normal code takes it with
//! [`SpinLock::lock_irq`] so no interrupt handler runs while it is held; the
//! page-fault handler only ever calls [`SpinLock::try_lock`], since a fault
//! raised under the lock must not spin on it.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod irq;
mod spin_lock;

pub use irq::IrqGuard;
pub use spin_lock::{IrqSpinLockGuard, SpinLock, SpinLockGuard};
