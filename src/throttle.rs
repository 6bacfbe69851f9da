//! Bounded admission gate for heavy image work.
//!
//! Decode and transform are already parallel inside the `image` crate, so
//! running many of them side by side mostly adds memory pressure. A
//! [`Throttle`] caps how many run at once. It is owned by a
//! [`Processor`](crate::process::Processor), not global, so independent
//! processors (and tests) never share slots.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Instant;
use tracing::debug;

/// Counting gate with a fixed number of slots.
#[derive(Debug)]
pub struct Throttle {
    capacity: usize,
    in_use: Mutex<usize>,
    released: Condvar,
}

/// A held slot. Dropping it frees the slot, so it is released on success,
/// error and unwind alike.
#[must_use = "the slot is released as soon as the permit is dropped"]
#[derive(Debug)]
pub struct Permit<'a> {
    throttle: &'a Throttle,
}

impl Throttle {
    /// A gate with `capacity` slots. Zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            in_use: Mutex::new(0),
            released: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently held.
    pub fn in_use(&self) -> usize {
        *self.in_use.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until a slot is free and take it.
    pub fn acquire(&self) -> Permit<'_> {
        let started = Instant::now();
        let mut in_use = self.in_use.lock().unwrap_or_else(PoisonError::into_inner);
        while *in_use >= self.capacity {
            in_use = self
                .released
                .wait(in_use)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *in_use += 1;

        let waited = started.elapsed();
        if waited.as_millis() > 0 {
            debug!(waited_ms = waited.as_millis() as u64, "throttle slot acquired");
        }
        Permit { throttle: self }
    }

    /// Take a slot only if one is free right now.
    pub fn try_acquire(&self) -> Option<Permit<'_>> {
        let mut in_use = self.in_use.lock().unwrap_or_else(PoisonError::into_inner);
        if *in_use >= self.capacity {
            return None;
        }
        *in_use += 1;
        Some(Permit { throttle: self })
    }
}

impl Default for Throttle {
    fn default() -> Self {
        Self::new(1)
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        let mut in_use = self
            .throttle
            .in_use
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *in_use -= 1;
        self.throttle.released.notify_one();
    }
}
