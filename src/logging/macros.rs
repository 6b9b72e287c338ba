//! Common logging macros for lanlens
//!
//! Thin wrappers over `tracing` used by the CLI and adapters.

/// Log an informational message
#[macro_export]
macro_rules! log_stderr {
    ($($arg:tt)*) => {
        tracing::info!($($arg)*)
    };
}

/// Log a debug message
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        tracing::debug!($($arg)*)
    };
}

/// Log a warning message
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        tracing::warn!($($arg)*)
    };
}

/// Log an error message
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        tracing::error!($($arg)*)
    };
}
