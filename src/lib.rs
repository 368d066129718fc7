// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Ring-buffered asynchronous logging and a category-aware job dispatcher.
//!
//! - [`logging`]: many producer threads append records to a lock-light ring
//!   buffer; one consumer thread writes them to a file and runs hooks.
//! - [`dispatch`]: a worker pool with direct handoff to idle workers and
//!   per-category FIFO queues for thread-affine work.
//! - [`config`]: JSON5 configuration for both.

pub mod config;
pub mod dispatch;
#[macro_use]
pub mod logging;
pub mod sync;

pub use config::{Config, ConfigError, DispatcherConfig, FilterConfig, LogConfig};
pub use dispatch::{DispatchError, DispatchStats, Dispatcher, FnJob, Job, JobCategory};
pub use logging::{FilterMode, LogError, LogRecord, LogStats, LogSystem, Logger};
