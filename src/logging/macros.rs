// SPDX-License-Identifier: Apache-2.0 OR MIT
// Logging macros for convenient logging

/// Log a formatted message under a filter tag
///
/// # Examples
/// ```ignore
/// logf!(logger, "net", "connected to {} in {}ms", addr, elapsed);
/// ```
#[macro_export]
macro_rules! logf {
    ($logger:expr, $tag:expr, $($arg:tt)+) => {
        $logger.log($tag, format_args!($($arg)+))
    };
}

/// Log a formatted message followed by the caller's call stack
///
/// # Examples
/// ```ignore
/// log_callstack!(logger, "core", "unexpected state {:?}", state);
/// ```
#[macro_export]
macro_rules! log_callstack {
    ($logger:expr, $tag:expr, $($arg:tt)+) => {
        $logger.log_callstack($tag, format_args!($($arg)+))
    };
}
