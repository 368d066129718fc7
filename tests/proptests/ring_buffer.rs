//! Property-Based Tests: Ring Buffer
//!
//! Drives a ring buffer with random sequences of writes and reads and checks it
//! against a plain FIFO queue.
//!
//! # Coverage
//!
//! - **FIFO:** every read returns the oldest unread payload, byte for byte.
//! - **Back-pressure:** a refused write never loses or corrupts queued data,
//!   and a drained buffer accepts any record up to the maximum size.
//! - **Wraparound:** arbitrary size mixes force sentinels at every offset.

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use ringlog::logging::ringbuffer::RingBuffer;
    use std::collections::VecDeque;

    #[derive(Debug, Clone)]
    enum Op {
        Write(Vec<u8>),
        Read,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => prop::collection::vec(any::<u8>(), 1..100).prop_map(Op::Write),
            2 => Just(Op::Read),
        ]
    }

    proptest! {
        /// **Property:** the buffer behaves like a FIFO queue that sometimes
        /// refuses writes when full.
        #[test]
        fn test_matches_fifo_model(
            capacity_words in 16usize..64,
            ops in prop::collection::vec(op(), 1..300),
        ) {
            let ring = RingBuffer::new(capacity_words * 8).unwrap();
            let max = ring.max_record_size();
            let mut model: VecDeque<Vec<u8>> = VecDeque::new();

            for op in ops {
                match op {
                    Op::Write(payload) => {
                        let payload: Vec<u8> = payload.into_iter().take(max).collect();
                        let mut reserved = ring.try_reserve_write(payload.len()).unwrap();
                        if reserved.is_none() && model.is_empty() {
                            // The refused write left a wraparound sentinel behind;
                            // once the reader skips it the whole arena is free.
                            prop_assert!(ring.try_reserve_read().unwrap().is_none());
                            reserved = ring.try_reserve_write(payload.len()).unwrap();
                            prop_assert!(reserved.is_some(), "empty buffer refused a write");
                        }
                        if let Some(mut slot) = reserved {
                            ring.slot_mut(&mut slot).copy_from_slice(&payload);
                            ring.commit_write(slot).unwrap();
                            model.push_back(payload);
                        }
                    }
                    Op::Read => match ring.try_reserve_read().unwrap() {
                        Some(slot) => {
                            let expected = model.pop_front();
                            prop_assert_eq!(Some(ring.slot(&slot).to_vec()), expected);
                            ring.release_read(slot).unwrap();
                        }
                        None => prop_assert!(model.is_empty()),
                    },
                }
            }

            while let Some(expected) = model.pop_front() {
                let slot = ring.try_reserve_read().unwrap().unwrap();
                prop_assert_eq!(ring.slot(&slot), &expected[..]);
                ring.release_read(slot).unwrap();
            }
            prop_assert!(ring.is_empty());
        }
    }
}
