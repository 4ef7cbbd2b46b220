//! # Typed i386 Control Registers
//!
//! `bitfield`-backed models of the 32-bit control registers the memory
//! manager touches:
//!
//! | Register | Used for |
//! |----------|----------|
//! | [`Cr0`](cr0::Cr0) | paging enable, supervisor write protection |
//! | [`Cr2`](cr2::Cr2) | faulting linear address after `#PF` |
//! | [`Cr3`](cr3::Cr3) | physical base of the active page directory |
//! | [`Cr4`](cr4::Cr4) | 4 MiB pages (`PSE`), global pages (`PGE`) |
//!
//! The `asm` feature provides the actual `mov` instructions. They are only
//! compiled for `target_arch = "x86"`; on any other target the types are plain
//! values, which keeps them usable from host-side tests.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

#[cfg(feature = "cr0")]
pub mod cr0;

#[cfg(feature = "cr2")]
pub mod cr2;

#[cfg(feature = "cr3")]
pub mod cr3;

#[cfg(feature = "cr4")]
pub mod cr4;

pub trait LoadRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, the register access might be privileged and require kernel mode (Ring 0).
    unsafe fn load_unsafe() -> Self;
}

pub trait StoreRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, the register access might be privileged and require kernel mode (Ring 0).
    unsafe fn store_unsafe(self);
}

pub trait LoadRegister {
    /// # Safety
    /// It is generally safe to load this register even from user mode.
    fn load() -> Self;
}

pub trait StoreRegister {
    /// # Safety
    /// It is generally safe to store this register even from user mode.
    fn store(self);
}

impl<T> LoadRegisterUnsafe for T
where
    T: LoadRegister,
{
    #[inline]
    unsafe fn load_unsafe() -> Self {
        <Self as LoadRegister>::load()
    }
}

impl<T> StoreRegisterUnsafe for T
where
    T: StoreRegister,
{
    #[inline]
    unsafe fn store_unsafe(self) {
        <Self as StoreRegister>::store(self);
    }
}
