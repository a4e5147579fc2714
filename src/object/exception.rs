// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Exception Ports
//!
//! Binding side of exception delivery. Jobs hold up to two ports (normal
//! and debugger); processes queue exception reports against the port they
//! were sent to.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};

/// What an exception port is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionPortType {
    Job,
    JobDebugger,
    Process,
}

/// An exception port bound to a target
#[derive(Debug)]
pub struct ExceptionPort {
    port_type: ExceptionPortType,
    key: u64,
    unbinds: AtomicU32,
}

impl ExceptionPort {
    pub fn new(port_type: ExceptionPortType, key: u64) -> Arc<Self> {
        Arc::new(Self {
            port_type,
            key,
            unbinds: AtomicU32::new(0),
        })
    }

    pub fn port_type(&self) -> ExceptionPortType {
        self.port_type
    }

    pub fn key(&self) -> u64 {
        self.key
    }

    /// The target dropped its binding
    ///
    /// Called with the target's lock held, before anyone else can bind a
    /// new port to the same slot.
    pub fn on_target_unbind(&self) {
        self.unbinds.fetch_add(1, Ordering::AcqRel);
        tracing::trace!(key = self.key, port_type = ?self.port_type, "exception port unbound");
    }

    /// How many times a target unbound this port
    pub fn unbind_count(&self) -> u32 {
        self.unbinds.load(Ordering::Acquire)
    }
}
