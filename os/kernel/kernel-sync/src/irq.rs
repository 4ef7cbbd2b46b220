//! Interrupt flag control for i386.
//!
//! On hosted builds there are no interrupts to mask: [`eflags`] reports IF
//! clear and [`disable`]/[`enable`] do nothing, so code using [`IrqGuard`]
//! stays testable.

/// Interrupt-enable flag in `EFLAGS`.
pub const EFLAGS_IF: u32 = 1 << 9;

/// Disable maskable interrupts (`cli`).
///
/// # Privilege
/// Ring 0 only.
#[inline]
pub fn disable() {
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    unsafe {
        core::arch::asm!("cli", options(nomem, nostack, preserves_flags));
    }
}

/// Enable maskable interrupts (`sti`).
///
/// # Privilege
/// Ring 0 only.
#[inline]
pub fn enable() {
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    unsafe {
        core::arch::asm!("sti", options(nomem, nostack, preserves_flags));
    }
}

/// Current `EFLAGS` (via `pushfd; pop`).
#[inline]
#[must_use]
pub fn eflags() -> u32 {
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    {
        let r: u32;
        unsafe {
            core::arch::asm!("pushfd", "pop {}", out(reg) r, options(preserves_flags));
        }
        r
    }
    #[cfg(not(all(target_arch = "x86", target_os = "none")))]
    {
        0
    }
}

#[inline]
#[must_use]
pub fn interrupts_enabled() -> bool {
    eflags() & EFLAGS_IF != 0
}

/// Halt until the next interrupt, forever, with interrupts off.
pub fn halt_forever() -> ! {
    disable();
    loop {
        #[cfg(all(target_arch = "x86", target_os = "none"))]
        unsafe {
            core::arch::asm!("hlt", options(nomem, nostack, preserves_flags));
        }
        core::hint::spin_loop();
    }
}

/// Disables interrupts while alive and restores the previous state on drop.
///
/// Nested guards are fine: only the outermost one re-enables.
///
/// ```
/// use kernel_sync::IrqGuard;
/// use kernel_sync::irq::interrupts_enabled;
///
/// let before = interrupts_enabled();
/// {
///     let _g = IrqGuard::new();
///     assert!(!interrupts_enabled());
/// }
/// assert_eq!(interrupts_enabled(), before);
/// ```
pub struct IrqGuard {
    were_enabled: bool,
}

impl Default for IrqGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl IrqGuard {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        let were_enabled = interrupts_enabled();
        if were_enabled {
            disable();
        }
        Self { were_enabled }
    }

    /// Whether interrupts will be re-enabled on drop.
    #[inline]
    #[must_use]
    pub const fn restores(&self) -> bool {
        self.were_enabled
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        if self.were_enabled {
            enable();
        }
    }
}
