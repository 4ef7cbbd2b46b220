//! # QEMU Debug Console
//!
//! Kernel log output through QEMU's debug console (`-debugcon`), which
//! captures every byte written to I/O port `0x402`:
//!
//! ```text
//! log::info!(..) ─► QemuLogger ─► "[INFO] target: message\n" ─► out 0x402
//! qemu_trace!(..) ───────────────────────────────────────────────► out 0x402
//! ```
//!
//! [`qemu_trace!`] needs no setup and works from the first instruction of
//! Rust code; [`QemuLogger`] plugs the port into the `log` facade.
//!
//! ## Host side
//! ```bash
//! qemu-system-i386 -kernel kernel.elf -debugcon stdio
//! ```
//!
//! ## Features
//! - `enabled` (default): port writes are compiled in. Without it every write
//!   is a no-op. Writes are also no-ops on hosted targets, where `out` would
//!   fault.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod logger;

pub use logger::{QemuLogger, write_record};

#[doc(hidden)]
pub mod qemu_fmt {
    use core::fmt::{self, Write};

    /// QEMU's debug console port.
    pub const QEMU_DEBUG_PORT: u16 = 0x402;

    /// Write one byte to the debug console.
    #[allow(clippy::inline_always)]
    #[inline(always)]
    pub fn dbg_putc(c: u8) {
        #[cfg(all(feature = "enabled", target_arch = "x86", target_os = "none"))]
        unsafe {
            core::arch::asm!(
                "out dx, al",
                in("dx") QEMU_DEBUG_PORT,
                in("al") c,
                options(nomem, nostack, preserves_flags)
            );
        }
        #[cfg(not(all(feature = "enabled", target_arch = "x86", target_os = "none")))]
        let _ = c;
    }

    /// [`fmt::Write`] over the debug console.
    pub struct QemuSink;

    impl Write for QemuSink {
        #[inline]
        fn write_str(&mut self, s: &str) -> fmt::Result {
            s.bytes().for_each(dbg_putc);
            Ok(())
        }
    }

    #[inline]
    pub fn qemu_write(args: fmt::Arguments<'_>) {
        // Best effort: the sink itself never fails.
        let _ = QemuSink.write_fmt(args);
    }
}

/// `print!`-style output straight to the debug console, without the `log`
/// facade.
#[macro_export]
macro_rules! qemu_trace {
    ($($arg:tt)*) => {{
        $crate::qemu_fmt::qemu_write(core::format_args!($($arg)*));
    }};
}
