use crate::qemu_fmt::QemuSink;
use core::fmt;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

/// `log` backend writing one line per record to the debug console.
///
/// ```no_run
/// use kernel_qemu::QemuLogger;
/// use log::LevelFilter;
///
/// static LOGGER: QemuLogger = QemuLogger::new(LevelFilter::Debug);
/// LOGGER.init().ok();
/// log::info!("pmm: ready");
/// ```
pub struct QemuLogger {
    max_level: LevelFilter,
}

impl QemuLogger {
    #[must_use]
    pub const fn new(max_level: LevelFilter) -> Self {
        Self { max_level }
    }

    #[must_use]
    pub const fn max_level(&self) -> LevelFilter {
        self.max_level
    }

    /// Install as the global logger.
    ///
    /// # Errors
    /// If another logger was installed first.
    pub fn init(&'static self) -> Result<(), SetLoggerError> {
        log::set_logger(self)?;
        log::set_max_level(self.max_level);
        Ok(())
    }
}

/// Format `record` as `[LEVEL] target: message\n`.
///
/// # Errors
/// Whatever `w` reports.
pub fn write_record(w: &mut impl fmt::Write, record: &Record<'_>) -> fmt::Result {
    writeln!(w, "[{}] {}: {}", record.level(), record.target(), record.args())
}

impl Log for QemuLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record<'_>) {
        if self.enabled(record.metadata()) {
            let _ = write_record(&mut QemuSink, record);
        }
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;

    #[test]
    fn records_are_one_line_each() {
        let mut out = String::new();
        write_record(
            &mut out,
            &Record::builder()
                .level(Level::Warn)
                .target("kernel_alloc::manager")
                .args(format_args!("mm: framebuffer at {:#x} is above 4 GiB", 0x1_0000_0000u64))
                .build(),
        )
        .unwrap();
        assert_eq!(
            out,
            "[WARN] kernel_alloc::manager: mm: framebuffer at 0x100000000 is above 4 GiB\n"
        );
    }

    #[test]
    fn level_filter_applies() {
        let logger = QemuLogger::new(LevelFilter::Info);
        let debug = Metadata::builder().level(Level::Debug).build();
        let error = Metadata::builder().level(Level::Error).build();
        assert!(!logger.enabled(&debug));
        assert!(logger.enabled(&error));
        assert_eq!(logger.max_level(), LevelFilter::Info);
    }

    #[test]
    fn trace_macro_is_harmless_on_the_host() {
        crate::qemu_trace!("boot: {} {}\n", "hello", 42);
    }
}
