//! Kernel logging subsystem.
//!
//! Messages are formatted with `format_args!()` (no allocation) and handed
//! to whichever [`Sink`] the kernel registered with [`set_sink`]: the COM1
//! serial port during early boot, the framebuffer console later, a capture
//! buffer in host tests. Until a sink is registered, messages are dropped.
//!
//! Crates that log through the `log` facade reach the same sink once
//! [`init_log_bridge`] has been called.
#![no_std]

#[cfg(test)]
extern crate std;

use core::fmt;
use core::sync::atomic::{AtomicU8, Ordering};

use spin::RwLock;

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "TRACE",
            Level::Debug => "DEBUG",
            Level::Info => " INFO",
            Level::Warn => " WARN",
            Level::Error => "ERROR",
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            Level::Trace => "\x1b[90m", // Gray
            Level::Debug => "\x1b[36m", // Cyan
            Level::Info => "\x1b[32m",  // Green
            Level::Warn => "\x1b[33m",  // Yellow
            Level::Error => "\x1b[31m", // Red
        }
    }

    fn from_u8(raw: u8) -> Level {
        match raw {
            0 => Level::Trace,
            1 => Level::Debug,
            2 => Level::Info,
            3 => Level::Warn,
            _ => Level::Error,
        }
    }
}

impl From<log::Level> for Level {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Trace => Level::Trace,
            log::Level::Debug => Level::Debug,
            log::Level::Info => Level::Info,
            log::Level::Warn => Level::Warn,
            log::Level::Error => Level::Error,
        }
    }
}

/// Level used until [`set_max_level`] is called.
pub const DEFAULT_MAX_LEVEL: Level = Level::Info;

/// Destination for log output.
///
/// Implementations must be callable from any context, including interrupt
/// handlers, so they must not block.
pub trait Sink: Sync {
    /// Write one complete record. `args` carries no trailing newline.
    fn write(&self, level: Level, args: fmt::Arguments);

    /// Write raw text with no level prefix (used by `print!`).
    fn write_raw(&self, args: fmt::Arguments);
}

/// Readers only ever `try_read`: a message logged from an interrupt handler
/// that fired inside `set_sink` on the same core must not spin on the writer
/// it interrupted.
static SINK: RwLock<Option<&'static dyn Sink>> = RwLock::new(None);
static MAX_LEVEL: AtomicU8 = AtomicU8::new(DEFAULT_MAX_LEVEL as u8);

/// Route all further output to `sink`, replacing any previous sink.
///
/// Messages logged on any core while the swap is in progress are dropped.
pub fn set_sink(sink: &'static dyn Sink) {
    *SINK.write() = Some(sink);
}

/// Stop emitting output. Messages logged afterwards are dropped.
pub fn clear_sink() {
    *SINK.write() = None;
}

/// Suppress messages below `level`.
pub fn set_max_level(level: Level) {
    MAX_LEVEL.store(level as u8, Ordering::Relaxed);
}

/// The current filter level.
pub fn max_level() -> Level {
    Level::from_u8(MAX_LEVEL.load(Ordering::Relaxed))
}

/// Whether a message at `level` would currently be emitted.
#[inline]
pub fn enabled(level: Level) -> bool {
    level >= max_level()
}

/// Render a record in the serial console format: `[ INFO] message\n`,
/// with the level tag colored.
pub fn write_record(out: &mut dyn fmt::Write, level: Level, args: fmt::Arguments) -> fmt::Result {
    out.write_str(level.color())?;
    out.write_str("[")?;
    out.write_str(level.as_str())?;
    out.write_str("]\x1b[0m ")?;
    out.write_fmt(args)?;
    out.write_str("\n")
}

/// Log a message with a specific level
pub fn log(level: Level, args: fmt::Arguments) {
    if !enabled(level) {
        return;
    }
    if let Some(sink) = current_sink() {
        sink.write(level, args);
    }
}

/// Print to the sink without formatting
pub fn print(args: fmt::Arguments) {
    if let Some(sink) = current_sink() {
        sink.write_raw(args);
    }
}

fn current_sink() -> Option<&'static dyn Sink> {
    SINK.try_read().and_then(|sink| *sink)
}

// =============================================================================
// `log` facade bridge
// =============================================================================

struct LogBridge;

impl log::Log for LogBridge {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        crate::enabled(Level::from(metadata.level()))
    }

    fn log(&self, record: &log::Record) {
        crate::log(Level::from(record.level()), *record.args());
    }

    fn flush(&self) {}
}

static BRIDGE: LogBridge = LogBridge;

/// Install klog as the `log` facade's global logger.
///
/// Filtering stays with klog: the facade is opened up to `Trace` and every
/// record is checked against [`max_level`] before reaching the sink.
pub fn init_log_bridge() -> Result<(), log::SetLoggerError> {
    log::set_logger(&BRIDGE)?;
    log::set_max_level(log::LevelFilter::Trace);
    Ok(())
}

/// Log at TRACE level
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {
        $crate::log($crate::Level::Trace, format_args!($($arg)*))
    };
}

/// Log at DEBUG level
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::log($crate::Level::Debug, format_args!($($arg)*))
    };
}

/// Log at INFO level
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::log($crate::Level::Info, format_args!($($arg)*))
    };
}

/// Log at WARN level
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::log($crate::Level::Warn, format_args!($($arg)*))
    };
}

/// Log at ERROR level
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::log($crate::Level::Error, format_args!($($arg)*))
    };
}

/// Print without newline
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::print(format_args!($($arg)*))
    };
}

/// Print with newline
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => {{
        $crate::print(format_args!($($arg)*));
        $crate::print(format_args!("\n"));
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::string::String;
    use std::sync::Mutex;

    /// Global sink state is shared by every test in this module.
    static SERIAL: Mutex<()> = Mutex::new(());

    struct Capture {
        buf: spin::Mutex<String>,
    }

    impl Sink for Capture {
        fn write(&self, level: Level, args: fmt::Arguments) {
            let mut buf = self.buf.lock();
            let _ = write_record(&mut *buf, level, args);
        }

        fn write_raw(&self, args: fmt::Arguments) {
            let _ = fmt::Write::write_fmt(&mut *self.buf.lock(), args);
        }
    }

    static CAPTURE: Capture = Capture {
        buf: spin::Mutex::new(String::new()),
    };

    fn take() -> String {
        core::mem::take(&mut *CAPTURE.buf.lock())
    }

    #[test]
    fn record_format_has_colored_tag() {
        let mut out = String::new();
        write_record(&mut out, Level::Warn, format_args!("slot {} empty", 7)).unwrap();
        assert_eq!(out, "\x1b[33m[ WARN]\x1b[0m slot 7 empty\n");
    }

    #[test]
    fn messages_below_max_level_are_dropped() {
        let _serial = SERIAL.lock().unwrap();
        set_sink(&CAPTURE);
        take();
        set_max_level(Level::Info);

        debug!("hidden {}", 1);
        info!("shown {}", 2);
        error!("shown {}", 3);

        let out = take();
        assert!(!out.contains("hidden"));
        assert!(out.contains("[ INFO]\x1b[0m shown 2"));
        assert!(out.contains("[ERROR]\x1b[0m shown 3"));

        set_max_level(Level::Trace);
        trace!("now visible");
        assert!(take().contains("now visible"));
        set_max_level(DEFAULT_MAX_LEVEL);
    }

    #[test]
    fn no_sink_drops_output() {
        let _serial = SERIAL.lock().unwrap();
        set_sink(&CAPTURE);
        take();
        clear_sink();
        error!("nobody listening");
        println!("nor here");
        set_sink(&CAPTURE);
        assert_eq!(take(), "");
    }

    #[test]
    fn print_macros_skip_prefix() {
        let _serial = SERIAL.lock().unwrap();
        set_sink(&CAPTURE);
        take();
        print!("a{}", 1);
        println!("b{}", 2);
        assert_eq!(take(), "a1b2\n");
    }

    #[test]
    fn log_facade_reaches_sink() {
        let _serial = SERIAL.lock().unwrap();
        set_sink(&CAPTURE);
        take();
        set_max_level(Level::Debug);
        init_log_bridge().unwrap();

        log::debug!("through the facade");
        log::trace!("filtered by klog");

        let out = take();
        assert!(out.contains("[DEBUG]\x1b[0m through the facade"));
        assert!(!out.contains("filtered by klog"));
        set_max_level(DEFAULT_MAX_LEVEL);
    }

    #[test]
    fn logging_during_sink_swap_is_dropped_not_blocked() {
        let _serial = SERIAL.lock().unwrap();
        set_sink(&CAPTURE);
        take();

        {
            // As seen by an interrupt that arrives inside `set_sink`.
            let _swap = SINK.write();
            error!("while swapping");
            println!("raw while swapping");
        }
        error!("after the swap");

        let out = take();
        assert!(!out.contains("while swapping"));
        assert!(out.contains("[ERROR]\x1b[0m after the swap"));
    }
}
