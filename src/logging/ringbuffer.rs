// SPDX-License-Identifier: Apache-2.0 OR MIT
// Variable-length record ring buffer feeding the log consumer thread
//
// A fixed byte arena with a read head and a write head. Head movement happens
// under a mutex; payload bytes are copied outside the lock by whoever holds the
// reservation token. Each record is `[header][payload]`, where the header is a
// single 8-byte word carrying a 31-bit size and a ready bit. A ready header with
// size 0 is the wraparound sentinel: the reader jumps back to offset 0.

use crossbeam_utils::Backoff;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Size of a record header in bytes (also the arena alignment)
pub const HEADER_SIZE: usize = 8;

/// Smallest arena that can hold one record plus the trailing header reserve
pub const MIN_CAPACITY: usize = 4 * HEADER_SIZE;

/// Bit pattern written over consumed records
pub const POISON_BYTE: u8 = 0xDD;

const READY_BIT: u64 = 1 << 31;
const SIZE_MASK: u64 = READY_BIT - 1;

/// Largest size the 31-bit header field can describe
pub const MAX_HEADER_SIZE_FIELD: usize = SIZE_MASK as usize;

/// Source of per-buffer identities used to reject foreign tokens
static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// One 8-byte arena word; the alignment lets header words be viewed as `AtomicU64`
#[repr(C, align(8))]
struct Word(UnsafeCell<u64>);

/// Errors reported by [`RingBuffer`]
///
/// Back-pressure (full on write, empty on read) is not an error; those cases
/// come back as `Ok(None)` from the non-blocking calls.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RingBufferError {
    #[error("invalid ring buffer capacity {capacity}: must be a multiple of {align} and at least {min} bytes")]
    InvalidCapacity {
        capacity: usize,
        align: usize,
        min: usize,
    },

    #[error("failed to allocate a {capacity} byte ring buffer arena")]
    Alloc { capacity: usize },

    #[error("record of {size} bytes can never fit (largest record is {max} bytes)")]
    RecordTooLarge { size: usize, max: usize },

    #[error("zero-length records are reserved for the wraparound sentinel")]
    EmptyRecord,

    #[error("a read reservation is already outstanding (single consumer only)")]
    ReadAlreadyReserved,

    #[error("read released out of order: expected record at offset {expected}, got {actual}")]
    ReleaseOutOfOrder { expected: usize, actual: usize },

    #[error("write slot at offset {offset} is not a pending reservation")]
    InvalidWriteSlot { offset: usize },

    #[error("ring buffer arena has been released")]
    Released,
}

/// Reservation token for a record being written
///
/// Not `Clone`: exactly one producer holds a given slot until it is committed.
#[derive(Debug)]
pub struct WriteSlot {
    owner: u64,
    offset: usize,
    len: usize,
}

impl WriteSlot {
    /// Payload offset inside the arena
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false; zero-length reservations are rejected
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Reservation token for the record currently being consumed
#[derive(Debug)]
pub struct ReadSlot {
    owner: u64,
    offset: usize,
    len: usize,
}

impl ReadSlot {
    /// Payload offset inside the arena
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false; zero-length records are sentinels and never handed out
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Counters describing ring buffer pressure
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingStats {
    /// Write reservations refused for lack of space
    pub full_events: u64,
    /// Sentinels written by producers
    pub wraps: u64,
    /// Sentinels consumed by the reader
    pub skips: u64,
}

#[derive(Debug, Default)]
struct Heads {
    read: usize,
    write: usize,
    /// Set while a `ReadSlot` is outstanding
    reading: bool,
}

/// Multi-producer, single-consumer ring buffer of variable-length byte records
///
/// Records are consumed strictly in reservation order: the reader stalls on the
/// oldest reserved record until its producer commits, even if later records are
/// already committed.
pub struct RingBuffer {
    arena: Box<[Word]>,
    capacity: usize,
    id: u64,
    heads: Mutex<Heads>,
    full_events: AtomicU64,
    wraps: AtomicU64,
    skips: AtomicU64,
}

// SAFETY: RingBuffer is Sync because:
// - Head indices are only mutated under the `heads` mutex
// - A reserved region is written only by the holder of its WriteSlot and
//   becomes visible to the reader through a Release store of the ready bit
// - Only one ReadSlot can be outstanding (enforced under the mutex), and the
//   region it covers is not handed to a producer until it is released
unsafe impl Sync for RingBuffer {}

impl RingBuffer {
    /// Allocate a zeroed arena of `capacity` bytes
    pub fn new(capacity: usize) -> Result<Self, RingBufferError> {
        if capacity % HEADER_SIZE != 0 || capacity < MIN_CAPACITY || capacity > u32::MAX as usize
        {
            return Err(RingBufferError::InvalidCapacity {
                capacity,
                align: HEADER_SIZE,
                min: MIN_CAPACITY,
            });
        }

        let words = capacity / HEADER_SIZE;
        let mut arena: Vec<Word> = Vec::new();
        arena
            .try_reserve_exact(words)
            .map_err(|_| RingBufferError::Alloc { capacity })?;
        arena.extend((0..words).map(|_| Word(UnsafeCell::new(0))));

        Ok(Self {
            arena: arena.into_boxed_slice(),
            capacity,
            id: NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed),
            heads: Mutex::new(Heads::default()),
            full_events: AtomicU64::new(0),
            wraps: AtomicU64::new(0),
            skips: AtomicU64::new(0),
        })
    }

    /// Release the arena; calling it again is a no-op
    pub fn deinit(&mut self) {
        if self.capacity == 0 {
            return;
        }
        self.arena = Vec::new().into_boxed_slice();
        self.capacity = 0;
        *self.heads.get_mut().unwrap_or_else(PoisonError::into_inner) = Heads::default();
    }

    /// Arena size in bytes (0 once released)
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Largest payload a single record may carry
    pub fn max_record_size(&self) -> usize {
        self.capacity
            .saturating_sub(2 * HEADER_SIZE)
            .min(MAX_HEADER_SIZE_FIELD)
    }

    /// True when every committed record has been consumed
    pub fn is_empty(&self) -> bool {
        let heads = self.lock();
        heads.read == heads.write
    }

    /// Bytes that can be written before reaching the read head
    pub fn writable_space(&self) -> usize {
        let heads = self.lock();
        self.space(&heads)
    }

    /// Snapshot of the pressure counters
    pub fn stats(&self) -> RingStats {
        RingStats {
            full_events: self.full_events.load(Ordering::Relaxed),
            wraps: self.wraps.load(Ordering::Relaxed),
            skips: self.skips.load(Ordering::Relaxed),
        }
    }

    /// Reserve `size` payload bytes without blocking
    ///
    /// Returns `Ok(None)` when there is not enough room right now. When the
    /// record would run past the end of the arena a sentinel is written and the
    /// write head restarts at offset 0.
    pub fn try_reserve_write(&self, size: usize) -> Result<Option<WriteSlot>, RingBufferError> {
        self.check_live()?;
        if size == 0 {
            return Err(RingBufferError::EmptyRecord);
        }
        let max = self.max_record_size();
        if size > max {
            return Err(RingBufferError::RecordTooLarge { size, max });
        }

        let footprint = HEADER_SIZE + align_up(size);
        // Room for this record plus the next header, so the reader always finds
        // either a record or a sentinel after it.
        let needed = footprint + HEADER_SIZE;

        let mut heads = self.lock();
        if self.space(&heads) < needed {
            self.full_events.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        if heads.write + needed > self.capacity {
            // Only reachable when read > 0, otherwise the space check above fails.
            debug_assert!(heads.read > 0);
            self.header(heads.write)
                .store(encode(0, true), Ordering::Release);
            heads.write = 0;
            self.wraps.fetch_add(1, Ordering::Relaxed);

            if heads.read < needed {
                self.full_events.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
        }

        let offset = heads.write;
        self.header(offset)
            .store(encode(size, false), Ordering::Relaxed);
        heads.write += footprint;

        Ok(Some(WriteSlot {
            owner: self.id,
            offset: offset + HEADER_SIZE,
            len: size,
        }))
    }

    /// Reserve `size` payload bytes, retrying with backoff until space frees up
    pub fn reserve_write(&self, size: usize) -> Result<WriteSlot, RingBufferError> {
        let backoff = Backoff::new();
        loop {
            if let Some(slot) = self.try_reserve_write(size)? {
                return Ok(slot);
            }
            backoff.snooze();
        }
    }

    /// Mutable view of a reserved payload region
    ///
    /// # Panics
    /// Panics if the slot was issued by another buffer or lies outside the arena.
    pub fn slot_mut<'a>(&'a self, slot: &'a mut WriteSlot) -> &'a mut [u8] {
        self.assert_owned(slot.owner, slot.offset, slot.len);
        // SAFETY: the region was reserved exclusively for this token and stays
        // reserved until commit_write consumes it; the &mut borrow of the token
        // rules out a second view through the same token.
        unsafe { std::slice::from_raw_parts_mut(self.base_ptr().add(slot.offset), slot.len) }
    }

    /// Publish a written record to the consumer
    pub fn commit_write(&self, slot: WriteSlot) -> Result<(), RingBufferError> {
        self.check_live()?;
        self.assert_owned(slot.owner, slot.offset, slot.len);

        let header = self.header(slot.offset - HEADER_SIZE);
        if header.load(Ordering::Relaxed) != encode(slot.len, false) {
            return Err(RingBufferError::InvalidWriteSlot {
                offset: slot.offset,
            });
        }
        header.store(encode(slot.len, true), Ordering::Release);
        Ok(())
    }

    /// Take the oldest committed record without blocking
    ///
    /// Returns `Ok(None)` when the buffer is empty or the oldest reserved record
    /// has not been committed yet.
    pub fn try_reserve_read(&self) -> Result<Option<ReadSlot>, RingBufferError> {
        self.check_live()?;
        let mut heads = self.lock();
        if heads.reading {
            return Err(RingBufferError::ReadAlreadyReserved);
        }

        loop {
            if heads.read == heads.write {
                return Ok(None);
            }

            let word = self.header(heads.read).load(Ordering::Acquire);
            if word & READY_BIT == 0 {
                return Ok(None);
            }

            let size = (word & SIZE_MASK) as usize;
            if size == 0 {
                heads.read = 0;
                self.skips.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            heads.reading = true;
            return Ok(Some(ReadSlot {
                owner: self.id,
                offset: heads.read + HEADER_SIZE,
                len: size,
            }));
        }
    }

    /// Take the oldest committed record, retrying with backoff until one exists
    pub fn reserve_read(&self) -> Result<ReadSlot, RingBufferError> {
        let backoff = Backoff::new();
        loop {
            if let Some(slot) = self.try_reserve_read()? {
                return Ok(slot);
            }
            backoff.snooze();
        }
    }

    /// Payload of a reserved read
    ///
    /// # Panics
    /// Panics if the slot was issued by another buffer or lies outside the arena.
    pub fn slot<'a>(&'a self, slot: &'a ReadSlot) -> &'a [u8] {
        self.assert_owned(slot.owner, slot.offset, slot.len);
        // SAFETY: a committed record is never written again until release_read
        // moves the read head past it.
        unsafe { std::slice::from_raw_parts(self.base_ptr().add(slot.offset), slot.len) }
    }

    /// Return a consumed record's space to the producers
    pub fn release_read(&self, slot: ReadSlot) -> Result<(), RingBufferError> {
        self.check_live()?;
        self.assert_owned(slot.owner, slot.offset, slot.len);

        let mut heads = self.lock();
        let expected = heads.read + HEADER_SIZE;
        if !heads.reading
            || slot.offset != expected
            || self.header(heads.read).load(Ordering::Acquire) != encode(slot.len, true)
        {
            return Err(RingBufferError::ReleaseOutOfOrder {
                expected,
                actual: slot.offset,
            });
        }

        let footprint = HEADER_SIZE + align_up(slot.len);
        // SAFETY: [read, read + footprint) is the record we just validated; no
        // producer can reserve it until the read head moves past it below.
        unsafe {
            std::ptr::write_bytes(self.base_ptr().add(heads.read), POISON_BYTE, footprint);
        }
        heads.read += footprint;
        heads.reading = false;
        Ok(())
    }

    fn space(&self, heads: &Heads) -> usize {
        if heads.write >= heads.read {
            self.capacity - heads.write + heads.read
        } else {
            heads.read - heads.write
        }
    }

    fn header(&self, offset: usize) -> &AtomicU64 {
        debug_assert!(offset % HEADER_SIZE == 0 && offset + HEADER_SIZE <= self.capacity);
        // SAFETY: Word is 8 bytes with 8-byte alignment, which satisfies
        // AtomicU64's layout; header words are only touched atomically while
        // they hold a live header.
        unsafe { AtomicU64::from_ptr(self.arena[offset / HEADER_SIZE].0.get()) }
    }

    fn base_ptr(&self) -> *mut u8 {
        self.arena.as_ptr() as *mut u8
    }

    fn assert_owned(&self, owner: u64, offset: usize, len: usize) {
        assert_eq!(owner, self.id, "slot was issued by a different ring buffer");
        assert!(
            offset >= HEADER_SIZE && offset + len <= self.capacity,
            "slot [{}, {}) lies outside the {} byte arena",
            offset,
            offset + len,
            self.capacity
        );
    }

    fn check_live(&self) -> Result<(), RingBufferError> {
        if self.capacity == 0 {
            Err(RingBufferError::Released)
        } else {
            Ok(())
        }
    }

    fn lock(&self) -> MutexGuard<'_, Heads> {
        // Heads are updated with plain assignments after all checks pass, so a
        // poisoned lock still guards consistent indices.
        self.heads.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let heads = self.lock();
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity)
            .field("read", &heads.read)
            .field("write", &heads.write)
            .field("reading", &heads.reading)
            .finish()
    }
}

#[inline]
const fn align_up(size: usize) -> usize {
    (size + HEADER_SIZE - 1) & !(HEADER_SIZE - 1)
}

#[inline]
const fn encode(size: usize, ready: bool) -> u64 {
    (size as u64 & SIZE_MASK) | if ready { READY_BIT } else { 0 }
}
