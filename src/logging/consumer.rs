// SPDX-License-Identifier: Apache-2.0 OR MIT
// Log consumer thread - drains the ring buffer into a sink and runs hooks

use super::callstack::ResolvedFrame;
use super::logger::{Hook, Shared};
use super::record::LogRecord;
use crossbeam_utils::Backoff;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};

/// Output sink for consumed records
pub trait LogSink: Send {
    /// Write one record
    fn write_record(&mut self, record: &LogRecord<'_>) -> io::Result<()>;

    /// Push buffered output to the OS
    fn flush(&mut self) -> io::Result<()>;

    /// Final flush before the sink is dropped
    fn close(&mut self) -> io::Result<()> {
        self.flush()
    }
}

/// Render a record as `message\n` followed by indented call-stack lines
pub fn write_record_text<W: Write + ?Sized>(out: &mut W, record: &LogRecord<'_>) -> io::Result<()> {
    writeln!(out, "{}", record.message())?;
    for ip in record.frames() {
        writeln!(out, "    {}", ResolvedFrame::resolve(ip))?;
    }
    Ok(())
}

/// Buffered file sink; the file is truncated on creation
pub struct FileSink {
    writer: BufWriter<File>,
    path: PathBuf,
    sync_on_flush: bool,
}

impl FileSink {
    /// Create (or truncate) the file at `path`
    ///
    /// With `sync_on_flush` every flush also waits for the data to reach the disk.
    pub fn create(path: impl AsRef<Path>, sync_on_flush: bool) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path,
            sync_on_flush,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogSink for FileSink {
    fn write_record(&mut self, record: &LogRecord<'_>) -> io::Result<()> {
        write_record_text(&mut self.writer, record)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        if self.sync_on_flush {
            self.writer.get_ref().sync_data()?;
        }
        Ok(())
    }
}

/// Standard error sink, prefixed with the record's tag
pub struct StderrSink {
    stderr: io::Stderr,
}

impl StderrSink {
    pub fn new() -> Self {
        Self {
            stderr: io::stderr(),
        }
    }
}

impl Default for StderrSink {
    fn default() -> Self {
        Self::new()
    }
}

impl LogSink for StderrSink {
    fn write_record(&mut self, record: &LogRecord<'_>) -> io::Result<()> {
        let mut out = self.stderr.lock();
        write!(out, "[{}] ", record.tag())?;
        write_record_text(&mut out, record)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stderr.flush()
    }
}

/// Writes every record to two sinks; the first error wins
pub struct TeeSink {
    primary: Box<dyn LogSink>,
    secondary: Box<dyn LogSink>,
}

impl TeeSink {
    pub fn new(primary: Box<dyn LogSink>, secondary: Box<dyn LogSink>) -> Self {
        Self { primary, secondary }
    }
}

impl LogSink for TeeSink {
    fn write_record(&mut self, record: &LogRecord<'_>) -> io::Result<()> {
        let first = self.primary.write_record(record);
        let second = self.secondary.write_record(record);
        first.and(second)
    }

    fn flush(&mut self) -> io::Result<()> {
        let first = self.primary.flush();
        let second = self.secondary.flush();
        first.and(second)
    }

    fn close(&mut self) -> io::Result<()> {
        let first = self.primary.close();
        let second = self.secondary.close();
        first.and(second)
    }
}

/// Clears the shared "consumer alive" flag however the thread exits
struct AliveGuard<'a>(&'a AtomicBool);

impl Drop for AliveGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// The body of the dedicated logging thread
pub(crate) struct Consumer {
    shared: Arc<Shared>,
    sink: Box<dyn LogSink>,
}

impl Consumer {
    pub(crate) fn new(shared: Arc<Shared>, sink: Box<dyn LogSink>) -> Self {
        Self { shared, sink }
    }

    /// Run until the owning `LogSystem` stops us; hands the sink back for closing
    pub(crate) fn run(mut self) -> Box<dyn LogSink> {
        let shared = Arc::clone(&self.shared);
        let _alive = AliveGuard(&shared.consumer_alive);

        while shared.running.load(Ordering::Acquire) {
            shared.wake.acquire();

            // Read the ticket before draining: every record committed before the
            // ticket was taken is visible to this drain.
            let ticket = shared.flush_requested.load(Ordering::Acquire);
            self.drain();
            if ticket > shared.flush_done.load(Ordering::Acquire) {
                self.flush_sink();
                shared.flush_done.fetch_max(ticket, Ordering::AcqRel);
            }
        }

        // Producers admitted before the stop may still be copying their
        // record in; keep draining until every one of them has committed.
        let ticket = shared.flush_requested.load(Ordering::Acquire);
        let backoff = Backoff::new();
        loop {
            let pending = shared.in_flight.load(Ordering::SeqCst);
            self.drain();
            if pending == 0 {
                break;
            }
            backoff.snooze();
        }
        self.flush_sink();
        shared.flush_done.fetch_max(ticket, Ordering::AcqRel);

        self.sink
    }

    /// Consume every committed record; returns how many were consumed
    fn drain(&mut self) -> usize {
        let shared = &*self.shared;
        let sink = &mut self.sink;
        let hooks: Vec<Hook> = shared
            .hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, hook)| Arc::clone(hook))
            .collect();

        let mut consumed = 0;
        loop {
            let slot = match shared.ring.try_reserve_read() {
                Ok(Some(slot)) => slot,
                Ok(None) => break,
                Err(err) => {
                    eprintln!("[ringlog] consumer read failed: {}", err);
                    break;
                }
            };

            match LogRecord::decode(shared.ring.slot(&slot)) {
                Some(record) => {
                    if let Err(err) = sink.write_record(&record) {
                        shared.counters.sink_error(&err);
                    }
                    for hook in &hooks {
                        hook(&record);
                    }
                }
                None => {
                    shared.counters.corrupt.fetch_add(1, Ordering::Relaxed);
                }
            }

            if let Err(err) = shared.ring.release_read(slot) {
                eprintln!("[ringlog] consumer release failed: {}", err);
                break;
            }
            consumed += 1;
        }

        shared
            .counters
            .consumed
            .fetch_add(consumed as u64, Ordering::Relaxed);
        consumed
    }

    fn flush_sink(&mut self) {
        if let Err(err) = self.sink.flush() {
            self.shared.counters.sink_error(&err);
        }
    }
}
