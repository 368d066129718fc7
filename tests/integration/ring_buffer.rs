// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Ring buffer used directly, without the log pipeline around it.

use anyhow::Result;
use ringlog::logging::ringbuffer::{RingBuffer, RingBufferError, HEADER_SIZE};
use std::sync::Arc;
use std::thread;

fn write(ring: &RingBuffer, payload: &[u8]) -> Result<()> {
    let mut slot = ring.reserve_write(payload.len())?;
    ring.slot_mut(&mut slot).copy_from_slice(payload);
    ring.commit_write(slot)?;
    Ok(())
}

fn read(ring: &RingBuffer) -> Result<Option<Vec<u8>>> {
    let Some(slot) = ring.try_reserve_read()? else {
        return Ok(None);
    };
    let payload = ring.slot(&slot).to_vec();
    ring.release_read(slot)?;
    Ok(Some(payload))
}

#[test]
fn test_fifo_single_producer() -> Result<()> {
    let ring = RingBuffer::new(256)?;
    for i in 0u8..5 {
        write(&ring, &[i; 9])?;
    }
    for i in 0u8..5 {
        assert_eq!(read(&ring)?, Some(vec![i; 9]));
    }
    assert_eq!(read(&ring)?, None);
    assert!(ring.is_empty());
    Ok(())
}

#[test]
fn test_wraparound_interleaved_with_reads() -> Result<()> {
    let ring = RingBuffer::new(16 * HEADER_SIZE)?;
    let records = [[b'a'; 40], [b'b'; 40], [b'c'; 40]];

    write(&ring, &records[0])?;
    write(&ring, &records[1])?;
    // Only 32 bytes remain at the tail
    assert!(ring.try_reserve_write(40)?.is_none());

    assert_eq!(read(&ring)?.as_deref(), Some(&records[0][..]));
    assert_eq!(read(&ring)?.as_deref(), Some(&records[1][..]));
    write(&ring, &records[2])?;
    assert_eq!(read(&ring)?.as_deref(), Some(&records[2][..]));
    assert_eq!(read(&ring)?, None);

    let stats = ring.stats();
    assert_eq!(stats.wraps, 1);
    assert_eq!(stats.skips, 1);
    Ok(())
}

#[test]
fn test_oversized_record_rejected() -> Result<()> {
    let ring = RingBuffer::new(64)?;
    let max = ring.max_record_size();
    assert!(matches!(
        ring.try_reserve_write(max + 1),
        Err(RingBufferError::RecordTooLarge { .. })
    ));
    assert!(ring.try_reserve_write(max)?.is_some());
    Ok(())
}

#[test]
fn test_producers_and_consumer_threads() -> Result<()> {
    const PRODUCERS: u8 = 3;
    const PER_PRODUCER: u32 = 2000;

    let ring = Arc::new(RingBuffer::new(512)?);
    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let ring = Arc::clone(&ring);
            thread::spawn(move || -> Result<()> {
                for i in 0..PER_PRODUCER {
                    let mut payload = vec![p];
                    payload.extend_from_slice(&i.to_le_bytes());
                    write(&ring, &payload)?;
                }
                Ok(())
            })
        })
        .collect();

    let mut next = [0u32; PRODUCERS as usize];
    let mut remaining = PRODUCERS as u32 * PER_PRODUCER;
    while remaining > 0 {
        let slot = ring.reserve_read()?;
        let payload = ring.slot(&slot);
        let producer = payload[0] as usize;
        let seq = u32::from_le_bytes([payload[1], payload[2], payload[3], payload[4]]);
        assert_eq!(seq, next[producer]);
        next[producer] += 1;
        ring.release_read(slot)?;
        remaining -= 1;
    }

    for producer in producers {
        producer.join().expect("producer panicked")?;
    }
    assert!(ring.is_empty());
    Ok(())
}
