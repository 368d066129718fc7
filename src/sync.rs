// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Counting semaphore used to park the log consumer while there is no work.
//!
//! Producers call [`Semaphore::release`] once per unit of work they queue and the
//! consumer blocks in [`Semaphore::acquire`] once it has drained everything.
//! The count only has to guarantee at least one wake per unit of work; the
//! ring buffer never relies on it being exact.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Counting semaphore built on a mutex-protected counter and a condition variable
#[derive(Debug, Default)]
pub struct Semaphore {
    count: Mutex<usize>,
    cvar: Condvar,
}

impl Semaphore {
    /// Create a semaphore with `initial` permits
    pub fn new(initial: usize) -> Self {
        Self {
            count: Mutex::new(initial),
            cvar: Condvar::new(),
        }
    }

    /// Block until a permit is available, then take it
    pub fn acquire(&self) {
        let mut count = self.lock();
        while *count == 0 {
            count = self
                .cvar
                .wait(count)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *count -= 1;
    }

    /// Take a permit if one is available without blocking
    pub fn try_acquire(&self) -> bool {
        let mut count = self.lock();
        if *count == 0 {
            return false;
        }
        *count -= 1;
        true
    }

    /// Block for at most `timeout` waiting for a permit
    ///
    /// Returns `true` if a permit was taken.
    pub fn acquire_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.lock();
        while *count == 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .cvar
                .wait_timeout(count, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            count = guard;
        }
        *count -= 1;
        true
    }

    /// Add `n` permits, waking up to `n` blocked acquirers
    pub fn release(&self, n: usize) {
        if n == 0 {
            return;
        }
        let mut count = self.lock();
        *count = count.saturating_add(n);
        drop(count);

        if n == 1 {
            self.cvar.notify_one();
        } else {
            // Condvar has no notify_n; waking everyone is correct because each
            // waiter re-checks the count under the lock.
            self.cvar.notify_all();
        }
    }

    /// Number of permits currently available
    pub fn available(&self) -> usize {
        *self.lock()
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        // The counter is a plain integer; a panic while holding the lock can't
        // leave it half-updated.
        self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
