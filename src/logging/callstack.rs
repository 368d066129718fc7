// SPDX-License-Identifier: Apache-2.0 OR MIT
// Call-stack capture on the producer side, symbol resolution on the consumer
//
// Producers only record raw instruction pointers (cheap); the consumer thread
// resolves them to `file(line): symbol` when it writes the record out.

use super::record::MAX_FRAMES;
use std::fmt;

/// Frames above `capture` that still belong to the logging call path
/// (`Logger::log_callstack`)
const CALLER_FRAMES: usize = 1;

/// How deep to look for `capture`'s own frame before giving up on skipping
const SEARCH_DEPTH: usize = 32;

/// Record up to `MAX_FRAMES` instruction pointers of the calling thread
///
/// Frames from the unwinder itself, this function and its logging caller are
/// left out, so the first frame is the code that logged.
#[inline(never)]
pub fn capture() -> Vec<u64> {
    let this_fn = capture as usize;
    let mut raw = Vec::with_capacity(MAX_FRAMES + SEARCH_DEPTH);
    let mut start = None;
    backtrace::trace(|frame| {
        if start.is_none() && frame.symbol_address() as usize == this_fn {
            start = Some(raw.len() + 1 + CALLER_FRAMES);
        }
        raw.push(frame.ip() as usize as u64);
        match start {
            Some(start) => raw.len() < start + MAX_FRAMES,
            None => raw.len() < SEARCH_DEPTH,
        }
    });

    // Without symbol addresses the own frame cannot be found; keep everything.
    let start = start.unwrap_or(0).min(raw.len());
    raw.drain(..start);
    raw.truncate(MAX_FRAMES);
    raw
}

/// A single resolved stack frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFrame {
    pub ip: u64,
    pub file: Option<String>,
    pub line: u32,
    pub symbol: Option<String>,
}

impl ResolvedFrame {
    /// Resolve `ip` against the running binary's debug info
    pub fn resolve(ip: u64) -> Self {
        let mut resolved = Self {
            ip,
            file: None,
            line: 0,
            symbol: None,
        };
        backtrace::resolve(ip as usize as *mut std::ffi::c_void, |symbol| {
            // Inlined frames resolve to several symbols; keep the first one.
            if resolved.symbol.is_some() {
                return;
            }
            resolved.symbol = symbol.name().map(|name| name.to_string());
            resolved.file = symbol.filename().map(|path| path.display().to_string());
            resolved.line = symbol.lineno().unwrap_or(0);
        });
        resolved
    }
}

impl fmt::Display for ResolvedFrame {
    /// `file(line): symbol`, with `??` placeholders for missing debug info
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let file = self.file.as_deref().unwrap_or("??");
        match &self.symbol {
            Some(symbol) => write!(f, "{}({}): {}", file, self.line, symbol),
            None => write!(f, "{}({}): {:#x}", file, self.line, self.ip),
        }
    }
}
