// SPDX-License-Identifier: Apache-2.0 OR MIT
// Log record framing inside a ring buffer payload
//
// Layout (little endian):
//   tag_len: u16 | frame_count: u16 | frames: frame_count x u64 | tag | message
//
// The message length is implied by the payload length.

use std::fmt;

/// Fixed framing bytes at the start of every record
pub const RECORD_HEADER_LEN: usize = 4;

/// Longest filter tag stored in a record
pub const MAX_TAG_LEN: usize = 64;

/// Most call-stack frames captured per record
pub const MAX_FRAMES: usize = 32;

/// Bytes used by one captured frame
pub const FRAME_LEN: usize = 8;

/// Payload bytes needed to frame a record
pub fn encoded_len(tag: &str, message: &str, frames: usize) -> usize {
    RECORD_HEADER_LEN + frames * FRAME_LEN + tag.len() + message.len()
}

/// Largest payload a record can reach for a given message limit
pub const fn max_encoded_len(max_message_len: usize) -> usize {
    RECORD_HEADER_LEN + MAX_FRAMES * FRAME_LEN + MAX_TAG_LEN + max_message_len
}

/// Serialize a record into `out`, which must be exactly `encoded_len` bytes
///
/// # Panics
/// Panics if `out` has the wrong length or the tag/frame limits are exceeded.
pub fn encode_into(out: &mut [u8], tag: &str, frames: &[u64], message: &str) {
    assert!(tag.len() <= MAX_TAG_LEN, "tag exceeds {} bytes", MAX_TAG_LEN);
    assert!(frames.len() <= MAX_FRAMES, "more than {} frames", MAX_FRAMES);
    assert_eq!(out.len(), encoded_len(tag, message, frames.len()));

    out[0..2].copy_from_slice(&(tag.len() as u16).to_le_bytes());
    out[2..4].copy_from_slice(&(frames.len() as u16).to_le_bytes());

    let mut pos = RECORD_HEADER_LEN;
    for ip in frames {
        out[pos..pos + FRAME_LEN].copy_from_slice(&ip.to_le_bytes());
        pos += FRAME_LEN;
    }
    out[pos..pos + tag.len()].copy_from_slice(tag.as_bytes());
    pos += tag.len();
    out[pos..].copy_from_slice(message.as_bytes());
}

/// Borrowed view of a record sitting in ring buffer memory
///
/// Hooks and sinks receive this by reference; it cannot outlive the read
/// reservation it was decoded from.
#[derive(Clone, Copy)]
pub struct LogRecord<'a> {
    tag: &'a str,
    message: &'a str,
    frames: &'a [u8],
}

impl<'a> LogRecord<'a> {
    /// Decode a record payload; `None` if the framing is inconsistent
    pub fn decode(payload: &'a [u8]) -> Option<Self> {
        if payload.len() < RECORD_HEADER_LEN {
            return None;
        }
        let tag_len = u16::from_le_bytes([payload[0], payload[1]]) as usize;
        let frame_count = u16::from_le_bytes([payload[2], payload[3]]) as usize;

        let frames_end = RECORD_HEADER_LEN.checked_add(frame_count.checked_mul(FRAME_LEN)?)?;
        let tag_end = frames_end.checked_add(tag_len)?;
        if tag_end > payload.len() {
            return None;
        }

        Some(Self {
            frames: &payload[RECORD_HEADER_LEN..frames_end],
            tag: std::str::from_utf8(&payload[frames_end..tag_end]).ok()?,
            message: std::str::from_utf8(&payload[tag_end..]).ok()?,
        })
    }

    /// Filter tag the record was logged under
    pub fn tag(&self) -> &'a str {
        self.tag
    }

    /// Rendered message text
    pub fn message(&self) -> &'a str {
        self.message
    }

    /// True if a call stack was captured
    pub fn has_callstack(&self) -> bool {
        !self.frames.is_empty()
    }

    /// Captured instruction pointers, innermost first
    pub fn frames(&self) -> impl Iterator<Item = u64> + 'a {
        self.frames.chunks_exact(FRAME_LEN).map(|chunk| {
            let mut bytes = [0u8; FRAME_LEN];
            bytes.copy_from_slice(chunk);
            u64::from_le_bytes(bytes)
        })
    }
}

impl fmt::Debug for LogRecord<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("LogRecord");
        debug.field("tag", &self.tag).field("message", &self.message);
        if self.has_callstack() {
            debug.field("frames", &(self.frames.len() / FRAME_LEN));
        }
        debug.finish()
    }
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a char
pub fn truncate_str(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// `fmt::Write` target that stops accepting text after `limit` bytes
///
/// Overflow is recorded instead of reported as an error so that formatting
/// always completes.
pub struct BoundedWriter {
    buf: String,
    limit: usize,
    truncated: bool,
}

impl BoundedWriter {
    pub fn new(limit: usize) -> Self {
        Self {
            buf: String::with_capacity(limit.min(256)),
            limit,
            truncated: false,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }
}

impl fmt::Write for BoundedWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if self.truncated {
            return Ok(());
        }
        let room = self.limit - self.buf.len();
        let piece = truncate_str(s, room);
        self.buf.push_str(piece);
        if piece.len() < s.len() {
            self.truncated = true;
        }
        Ok(())
    }
}
