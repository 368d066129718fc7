// SPDX-License-Identifier: Apache-2.0 OR MIT
// LogSystem (composition root) and the cloneable Logger handle

use super::callstack;
use super::consumer::{Consumer, FileSink, LogSink, StderrSink, TeeSink};
use super::filter::{FilterMode, FilterRegistry};
use super::record::{self, BoundedWriter, LogRecord, MAX_TAG_LEN};
use super::ringbuffer::{RingBuffer, RingBufferError, RingStats, WriteSlot};
use crate::config::LogConfig;
use crate::sync::Semaphore;
use crossbeam_utils::Backoff;
use std::collections::HashSet;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};
use std::thread::{self, JoinHandle, ThreadId};
use thiserror::Error;

/// Callback run by the consumer thread for every record it writes
pub type Hook = Arc<dyn Fn(&LogRecord<'_>) + Send + Sync>;

/// Handle returned by [`Logger::hook`], used to unregister the hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

#[derive(Debug, Error)]
pub enum LogError {
    #[error("a log system is already running on {}", .0.display())]
    AlreadyInitialized(PathBuf),

    #[error("failed to open log file {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    RingBuffer(#[from] RingBufferError),

    #[error("messages of {max_message_len} bytes cannot fit a {capacity}-byte ring buffer")]
    MessageLimit {
        max_message_len: usize,
        capacity: usize,
    },

    #[error("failed to spawn the log consumer thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("log consumer thread panicked")]
    ConsumerPanicked,

    #[error("failed to close log sink: {0}")]
    Close(#[source] io::Error),
}

/// Snapshot of the pipeline counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogStats {
    /// Records committed to the ring buffer
    pub written: u64,
    /// Records suppressed by the tag filter
    pub filtered: u64,
    /// Records whose message or tag was cut to fit
    pub truncated: u64,
    /// Records lost because the pipeline was stopped
    pub dropped: u64,
    /// Records drained by the consumer
    pub consumed: u64,
    /// Payloads the consumer could not decode
    pub corrupt: u64,
    /// Failed sink writes and flushes
    pub sink_errors: u64,
    pub ring: RingStats,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) written: AtomicU64,
    pub(crate) filtered: AtomicU64,
    pub(crate) truncated: AtomicU64,
    pub(crate) dropped: AtomicU64,
    pub(crate) consumed: AtomicU64,
    pub(crate) corrupt: AtomicU64,
    pub(crate) sink_errors: AtomicU64,
}

impl Counters {
    /// Count a sink failure; only the first one is reported on stderr
    pub(crate) fn sink_error(&self, err: &io::Error) {
        if self.sink_errors.fetch_add(1, Ordering::Relaxed) == 0 {
            eprintln!("[ringlog] log sink error: {}", err);
        }
    }
}

/// State shared between producers, the consumer and the owning `LogSystem`
pub(crate) struct Shared {
    pub(crate) ring: RingBuffer,
    pub(crate) wake: Semaphore,
    pub(crate) filter: FilterRegistry,
    pub(crate) hooks: RwLock<Vec<(HookId, Hook)>>,
    pub(crate) running: AtomicBool,
    /// Producers between `admit` and commit (or drop) of their record
    pub(crate) in_flight: AtomicUsize,
    pub(crate) consumer_alive: AtomicBool,
    pub(crate) consumer_thread: OnceLock<ThreadId>,
    pub(crate) flush_requested: AtomicU64,
    pub(crate) flush_done: AtomicU64,
    pub(crate) counters: Counters,
    next_hook: AtomicU64,
    max_message_len: usize,
}

/// Paths owned by a live `LogSystem` in this process
fn active_paths() -> &'static Mutex<HashSet<PathBuf>> {
    static ACTIVE: OnceLock<Mutex<HashSet<PathBuf>>> = OnceLock::new();
    ACTIVE.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Claim on a log file path, released on drop
#[derive(Debug)]
struct PathGuard {
    key: PathBuf,
}

impl PathGuard {
    fn acquire(path: &Path) -> Result<Self, LogError> {
        let key = canonical_key(path);
        let mut active = active_paths()
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !active.insert(key.clone()) {
            return Err(LogError::AlreadyInitialized(path.to_path_buf()));
        }
        Ok(Self { key })
    }
}

impl Drop for PathGuard {
    fn drop(&mut self) {
        active_paths()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

/// Canonical form of a path whose file may not exist yet
fn canonical_key(path: &Path) -> PathBuf {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    match (std::fs::canonicalize(parent), path.file_name()) {
        (Ok(dir), Some(name)) => dir.join(name),
        _ => path.to_path_buf(),
    }
}

/// A running log pipeline: ring buffer, consumer thread and sink
///
/// Dropping a running system shuts it down; call [`LogSystem::shutdown`] to
/// observe the result.
pub struct LogSystem {
    logger: Logger,
    consumer: Option<JoinHandle<Box<dyn LogSink>>>,
    guard: Option<PathGuard>,
}

impl LogSystem {
    /// Start a pipeline writing to `path` with default settings
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LogError> {
        Self::init(&LogConfig::new(path.as_ref()))
    }

    /// Start a pipeline writing to `config.path`, truncating the file
    ///
    /// Fails with [`LogError::AlreadyInitialized`] while another system in this
    /// process still owns the same file.
    pub fn init(config: &LogConfig) -> Result<Self, LogError> {
        let guard = PathGuard::acquire(&config.path)?;
        let file =
            FileSink::create(&config.path, config.sync_on_flush).map_err(|source| {
                LogError::Open {
                    path: config.path.clone(),
                    source,
                }
            })?;

        let sink: Box<dyn LogSink> = if config.echo_stderr {
            Box::new(TeeSink::new(Box::new(file), Box::new(StderrSink::new())))
        } else {
            Box::new(file)
        };

        let mut system = Self::with_sink(config, sink)?;
        system.guard = Some(guard);
        Ok(system)
    }

    /// Start a pipeline against an arbitrary sink; `config.path` is ignored
    pub fn with_sink(config: &LogConfig, sink: Box<dyn LogSink>) -> Result<Self, LogError> {
        let ring = RingBuffer::new(config.ring_capacity)?;
        if record::max_encoded_len(config.max_message_len) > ring.max_record_size() {
            return Err(LogError::MessageLimit {
                max_message_len: config.max_message_len,
                capacity: config.ring_capacity,
            });
        }

        let shared = Arc::new(Shared {
            ring,
            wake: Semaphore::new(0),
            filter: FilterRegistry::with_tags(config.filter.mode, config.filter.tags.iter().cloned()),
            hooks: RwLock::new(Vec::new()),
            running: AtomicBool::new(true),
            in_flight: AtomicUsize::new(0),
            consumer_alive: AtomicBool::new(true),
            consumer_thread: OnceLock::new(),
            flush_requested: AtomicU64::new(0),
            flush_done: AtomicU64::new(0),
            counters: Counters::default(),
            next_hook: AtomicU64::new(1),
            max_message_len: config.max_message_len,
        });

        let consumer = Consumer::new(Arc::clone(&shared), sink);
        let handle = thread::Builder::new()
            .name("ringlog-consumer".to_string())
            .spawn(move || consumer.run())
            .map_err(LogError::Spawn)?;
        let _ = shared.consumer_thread.set(handle.thread().id());

        Ok(Self {
            logger: Logger { shared },
            consumer: Some(handle),
            guard: None,
        })
    }

    /// Cheap handle for producers
    pub fn logger(&self) -> Logger {
        self.logger.clone()
    }

    /// Drain everything still buffered, stop the consumer and close the sink
    pub fn shutdown(mut self) -> Result<(), LogError> {
        self.stop()
    }

    fn stop(&mut self) -> Result<(), LogError> {
        let Some(handle) = self.consumer.take() else {
            return Ok(());
        };

        let shared = &self.logger.shared;
        // Pairs with the SeqCst increment in `admit`: a producer either sees
        // the stop or is counted in `in_flight` before the consumer's final drain.
        shared.running.store(false, Ordering::SeqCst);
        shared.wake.release(1);

        let result = match handle.join() {
            Ok(mut sink) => sink.close().map_err(LogError::Close),
            Err(_) => Err(LogError::ConsumerPanicked),
        };
        self.guard.take();
        result
    }
}

impl Drop for LogSystem {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            eprintln!("[ringlog] shutdown failed: {}", err);
        }
    }
}

impl fmt::Debug for LogSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogSystem")
            .field("running", &self.consumer.is_some())
            .field("path", &self.guard.as_ref().map(|guard| &guard.key))
            .finish()
    }
}

/// Producer handle; clone freely across threads
#[derive(Clone)]
pub struct Logger {
    shared: Arc<Shared>,
}

impl Logger {
    /// Append a formatted record under `tag`
    ///
    /// Never blocks on I/O; waits only while the ring buffer is full.
    pub fn log(&self, tag: &str, args: fmt::Arguments<'_>) {
        if let Some(_producer) = self.admit(tag) {
            self.write(tag, args, &[]);
        }
    }

    /// Like [`Logger::log`], plus the calling thread's call stack
    #[inline(never)]
    pub fn log_callstack(&self, tag: &str, args: fmt::Arguments<'_>) {
        if let Some(_producer) = self.admit(tag) {
            let frames = callstack::capture();
            self.write(tag, args, &frames);
        }
    }

    /// Block until every record committed before this call has reached the sink
    ///
    /// Returns at once if the consumer has stopped or when called from a hook.
    pub fn flush(&self) {
        let shared = &*self.shared;
        if !shared.consumer_alive.load(Ordering::Acquire)
            || shared.consumer_thread.get() == Some(&thread::current().id())
        {
            return;
        }

        let ticket = shared.flush_requested.fetch_add(1, Ordering::AcqRel) + 1;
        shared.wake.release(1);

        let backoff = Backoff::new();
        while shared.flush_done.load(Ordering::Acquire) < ticket {
            if !shared.consumer_alive.load(Ordering::Acquire) {
                return;
            }
            backoff.snooze();
        }
    }

    /// True while the pipeline accepts records
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// True if a record under `tag` would be written
    pub fn is_enabled(&self, tag: &str) -> bool {
        !self.shared.filter.is_filtered(tag)
    }

    pub fn enable_all(&self) {
        self.shared.filter.enable_all();
    }

    pub fn disable_all(&self) {
        self.shared.filter.disable_all();
    }

    /// Let `tag` through; `false` (with a diagnostic) if nothing changed
    pub fn enable(&self, tag: &str) -> bool {
        let changed = self.shared.filter.enable(tag);
        if !changed {
            eprintln!("[ringlog] tag '{}' is already enabled", tag);
        }
        changed
    }

    /// Suppress `tag`; `false` (with a diagnostic) if nothing changed
    pub fn disable(&self, tag: &str) -> bool {
        let changed = self.shared.filter.disable(tag);
        if !changed {
            eprintln!("[ringlog] tag '{}' is already disabled", tag);
        }
        changed
    }

    pub fn filter_mode(&self) -> FilterMode {
        self.shared.filter.mode()
    }

    /// Register a callback run on the consumer thread for each record
    ///
    /// Hooks registered while a drain is in progress take effect from the
    /// next drain.
    pub fn hook<F>(&self, hook: F) -> HookId
    where
        F: Fn(&LogRecord<'_>) + Send + Sync + 'static,
    {
        let id = HookId(self.shared.next_hook.fetch_add(1, Ordering::Relaxed));
        self.shared
            .hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(hook)));
        id
    }

    /// Unregister a hook; `false` if `id` is not registered
    ///
    /// The hook may still see records from a drain already in progress.
    pub fn unhook(&self, id: HookId) -> bool {
        let mut hooks = self
            .shared
            .hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = hooks.len();
        hooks.retain(|(hook_id, _)| *hook_id != id);
        hooks.len() != before
    }

    pub fn stats(&self) -> LogStats {
        let counters = &self.shared.counters;
        LogStats {
            written: counters.written.load(Ordering::Relaxed),
            filtered: counters.filtered.load(Ordering::Relaxed),
            truncated: counters.truncated.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
            consumed: counters.consumed.load(Ordering::Relaxed),
            corrupt: counters.corrupt.load(Ordering::Relaxed),
            sink_errors: counters.sink_errors.load(Ordering::Relaxed),
            ring: self.shared.ring.stats(),
        }
    }

    /// Running and not filtered; counts the rejection otherwise
    ///
    /// The returned guard keeps the consumer's final drain waiting until the
    /// record is committed or given up.
    fn admit(&self, tag: &str) -> Option<InFlight<'_>> {
        let shared = &*self.shared;
        let producer = InFlight::enter(&shared.in_flight);
        if !shared.running.load(Ordering::SeqCst) {
            shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        if shared.filter.is_filtered(tag) {
            shared.counters.filtered.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        Some(producer)
    }

    fn write(&self, tag: &str, args: fmt::Arguments<'_>, frames: &[u64]) {
        let shared = &*self.shared;

        let mut message = BoundedWriter::new(shared.max_message_len);
        // BoundedWriter never fails; a Display impl that errors just ends the message.
        let _ = fmt::write(&mut message, args);
        let clipped_tag = record::truncate_str(tag, MAX_TAG_LEN);
        if message.is_truncated() || clipped_tag.len() < tag.len() {
            shared.counters.truncated.fetch_add(1, Ordering::Relaxed);
        }

        let size = record::encoded_len(clipped_tag, message.as_str(), frames.len());
        let Some(mut slot) = self.reserve(size) else {
            shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };
        record::encode_into(
            shared.ring.slot_mut(&mut slot),
            clipped_tag,
            frames,
            message.as_str(),
        );

        if let Err(err) = shared.ring.commit_write(slot) {
            eprintln!("[ringlog] commit failed: {}", err);
            shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        shared.counters.written.fetch_add(1, Ordering::Relaxed);
        shared.wake.release(1);
    }

    /// Reserve `size` bytes, waking the consumer while the buffer is full
    ///
    /// `None` once the consumer is gone and nothing will ever free space.
    /// On the consumer thread (from a hook) a full buffer drops the record,
    /// since only that thread could make room.
    fn reserve(&self, size: usize) -> Option<WriteSlot> {
        let shared = &*self.shared;
        if shared.consumer_thread.get() == Some(&thread::current().id()) {
            return match shared.ring.try_reserve_write(size) {
                Ok(slot) => slot,
                Err(err) => {
                    eprintln!("[ringlog] dropping record: {}", err);
                    None
                }
            };
        }

        let backoff = Backoff::new();
        let mut woke_consumer = false;
        loop {
            match shared.ring.try_reserve_write(size) {
                Ok(Some(slot)) => return Some(slot),
                Ok(None) => {
                    if !shared.consumer_alive.load(Ordering::Acquire) {
                        return None;
                    }
                    // A wraparound sentinel frees no space until the consumer
                    // skips it, and skipping needs a wake-up.
                    if !woke_consumer || backoff.is_completed() {
                        shared.wake.release(1);
                        woke_consumer = true;
                        backoff.reset();
                    }
                    backoff.snooze();
                }
                Err(err) => {
                    eprintln!("[ringlog] dropping record: {}", err);
                    return None;
                }
            }
        }
    }
}

/// Counts a producer in `Shared::in_flight` for as long as it lives
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(count: &'a AtomicUsize) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self(count)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Release);
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("running", &self.is_running())
            .field("filter_mode", &self.filter_mode())
            .finish()
    }
}
