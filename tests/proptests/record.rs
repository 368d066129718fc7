//! Property-Based Tests: Log Record Framing
//!
//! The consumer decodes whatever bytes sit in a ring buffer slot. Decoding must
//! never panic, and anything it accepts must stay inside the payload.

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use ringlog::logging::record::{encode_into, encoded_len, truncate_str, LogRecord, MAX_TAG_LEN};

    proptest! {
        /// **Property:** `LogRecord::decode` never panics on arbitrary bytes.
        #[test]
        fn test_decode_does_not_panic(input in any::<Vec<u8>>()) {
            if let Some(record) = LogRecord::decode(&input) {
                let total = record.tag().len() + record.message().len();
                prop_assert!(total <= input.len());
                let _ = record.frames().count();
            }
        }

        /// **Property:** an encoded record decodes to the same tag, frames and message.
        #[test]
        fn test_encoded_records_decode(
            tag in "[a-z]{0,80}",
            message in any::<String>(),
            frames in prop::collection::vec(any::<u64>(), 0..8),
        ) {
            let tag = truncate_str(&tag, MAX_TAG_LEN);
            let mut payload = vec![0u8; encoded_len(tag, &message, frames.len())];
            encode_into(&mut payload, tag, &frames, &message);

            let record = LogRecord::decode(&payload).unwrap();
            prop_assert_eq!(record.tag(), tag);
            prop_assert_eq!(record.message(), message.as_str());
            prop_assert_eq!(record.frames().collect::<Vec<_>>(), frames);
        }

        /// **Property:** truncation keeps a valid UTF-8 prefix no longer than the limit.
        #[test]
        fn test_truncate_str_is_prefix(s in any::<String>(), max in 0usize..64) {
            let cut = truncate_str(&s, max);
            prop_assert!(cut.len() <= max);
            prop_assert!(s.starts_with(cut));
            prop_assert!(s.len() <= max || max - cut.len() < 4);
        }
    }
}
