//! Diagnostic sink handed to every component.
//!
//! Components never reach for a global logger directly. They hold an
//! `Arc<dyn Diagnostics>` and report through the `diag_*!` macros:
//!
//! ```
//! use session_bootstrap::diag::{Diagnostics, NoOpDiagnostics};
//! use session_bootstrap::diag_info;
//! use std::sync::Arc;
//!
//! let diag: Arc<dyn Diagnostics> = Arc::new(NoOpDiagnostics);
//! diag_info!(diag, "resolved uid {}", 1000);
//! ```
//!
//! The binary installs `env_logger` once and passes a [`LogDiagnostics`],
//! which forwards to the `log` facade. Tests pass [`NoOpDiagnostics`] or
//! their own recording implementation.

use std::fmt::Arguments;

/// Severity of a diagnostic message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Destination for diagnostic messages.
pub trait Diagnostics: Send + Sync {
    /// Emit one message. The level helpers below delegate here.
    fn emit(&self, level: Level, args: Arguments<'_>);

    fn trace(&self, args: Arguments<'_>) {
        self.emit(Level::Trace, args);
    }

    fn debug(&self, args: Arguments<'_>) {
        self.emit(Level::Debug, args);
    }

    fn info(&self, args: Arguments<'_>) {
        self.emit(Level::Info, args);
    }

    fn warn(&self, args: Arguments<'_>) {
        self.emit(Level::Warn, args);
    }

    fn error(&self, args: Arguments<'_>) {
        self.emit(Level::Error, args);
    }
}

/// Forwards to the `log` facade under a fixed target.
#[derive(Debug, Clone, Copy)]
pub struct LogDiagnostics {
    target: &'static str,
}

impl LogDiagnostics {
    pub fn new(target: &'static str) -> Self {
        Self { target }
    }
}

impl Default for LogDiagnostics {
    fn default() -> Self {
        Self::new("session_bootstrap")
    }
}

impl Diagnostics for LogDiagnostics {
    fn emit(&self, level: Level, args: Arguments<'_>) {
        let level = match level {
            Level::Trace => log::Level::Trace,
            Level::Debug => log::Level::Debug,
            Level::Info => log::Level::Info,
            Level::Warn => log::Level::Warn,
            Level::Error => log::Level::Error,
        };
        log::log!(target: self.target, level, "{}", args);
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpDiagnostics;

impl Diagnostics for NoOpDiagnostics {
    #[inline]
    fn emit(&self, _level: Level, _args: Arguments<'_>) {}
}

#[macro_export]
macro_rules! diag_trace {
    ($diag:expr, $($arg:tt)*) => {
        $diag.trace(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! diag_debug {
    ($diag:expr, $($arg:tt)*) => {
        $diag.debug(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! diag_info {
    ($diag:expr, $($arg:tt)*) => {
        $diag.info(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! diag_warn {
    ($diag:expr, $($arg:tt)*) => {
        $diag.warn(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! diag_error {
    ($diag:expr, $($arg:tt)*) => {
        $diag.error(format_args!($($arg)*))
    };
}
