// SPDX-License-Identifier: Apache-2.0 OR MIT
// Ring-buffered logging: many producers, one consumer thread, one sink
//
// Producers format into a bounded buffer, reserve space in the ring buffer,
// copy, commit and wake the consumer. The consumer drains committed records in
// order, writes them to the sink and runs hooks. Nothing on the producer path
// touches the file.

mod callstack;
mod consumer;
mod filter;
mod logger;
#[macro_use]
mod macros;
pub mod record;
pub mod ringbuffer;

// Public exports
pub use callstack::{capture as capture_callstack, ResolvedFrame};
pub use consumer::{write_record_text, FileSink, LogSink, StderrSink, TeeSink};
pub use filter::{FilterMode, FilterRegistry};
pub use logger::{Hook, HookId, LogError, LogStats, LogSystem, Logger};
pub use record::LogRecord;
pub use ringbuffer::{ReadSlot, RingBuffer, RingBufferError, RingStats, WriteSlot};
