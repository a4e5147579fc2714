// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Kernel Counters
//!
//! Monotonic event counters for diagnostics. Counters are only ever added
//! to; readers get a relaxed snapshot.

use core::sync::atomic::{AtomicU64, Ordering};

/// A named monotonic counter
pub struct KernelCounter {
    name: &'static str,
    value: AtomicU64,
}

impl KernelCounter {
    /// Create a counter starting at zero
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            value: AtomicU64::new(0),
        }
    }

    /// Add to the counter
    #[inline]
    pub fn add(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    /// Current value
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Counter name, dotted
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

pub static JOB_CREATE: KernelCounter = KernelCounter::new("dispatcher.job.create");
pub static JOB_DESTROY: KernelCounter = KernelCounter::new("dispatcher.job.destroy");
pub static PROCESS_CREATE: KernelCounter = KernelCounter::new("dispatcher.process.create");
pub static PROCESS_DESTROY: KernelCounter = KernelCounter::new("dispatcher.process.destroy");
pub static VMO_DISPATCHER_CREATE: KernelCounter = KernelCounter::new("dispatcher.vmo.create");
pub static VMO_DISPATCHER_DESTROY: KernelCounter = KernelCounter::new("dispatcher.vmo.destroy");
pub static HANDLE_ARENA_EXHAUSTED: KernelCounter = KernelCounter::new("handle.arena.exhausted");

/// Every counter, for dumping
pub static ALL: [&KernelCounter; 7] = [
    &JOB_CREATE,
    &JOB_DESTROY,
    &PROCESS_CREATE,
    &PROCESS_DESTROY,
    &VMO_DISPATCHER_CREATE,
    &VMO_DISPATCHER_DESTROY,
    &HANDLE_ARENA_EXHAUSTED,
];

/// Log every counter at info level
pub fn dump() {
    for counter in ALL.iter() {
        tracing::info!(counter = counter.name(), value = counter.get());
    }
}
