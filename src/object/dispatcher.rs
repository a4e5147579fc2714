// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Dispatcher Base
//!
//! A dispatcher is the reference-counted kernel object behind a handle.
//! Reference counting is `Arc`; this module adds what every dispatcher
//! shares on top of that.
//!
//! # Design
//!
//! - **Koid**: globally unique id, never reused
//! - **Handle count**: number of live process-visible handles, maintained by
//!   the handle arena under its lock
//! - **Signals**: user-observable state bits, updated with
//!   [`DispatcherBase::update_state`]
//! - **on_zero_handles**: hook fired exactly once when the last handle (or
//!   the owning [`KernelHandle`](super::KernelHandle)) goes away

use alloc::string::String;
use alloc::sync::Arc;
use core::any::Any;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use bitflags::bitflags;

use crate::config::MAX_NAME_LEN;
use crate::object::Rights;
use crate::sync::SpinMutex;

/// ============================================================================
/// Koid
/// ============================================================================

/// Kernel object id
pub type Koid = u64;

/// Koid that names no object
pub const KOID_INVALID: Koid = 0;

/// Koids below this are reserved
pub const KOID_FIRST: Koid = 1024;

static NEXT_KOID: AtomicU64 = AtomicU64::new(KOID_FIRST);

/// Allocate a new koid
pub fn generate_koid() -> Koid {
    NEXT_KOID.fetch_add(1, Ordering::Relaxed)
}

/// ============================================================================
/// Object Type
/// ============================================================================

/// Kernel object type
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    /// Unknown type
    Unknown = 0,

    /// Process object
    Process = 1,

    /// Thread object
    Thread = 2,

    /// Virtual Memory Object
    Vmo = 3,

    /// Channel endpoint
    Channel = 4,

    /// Event object
    Event = 5,

    /// Port (waitset)
    Port = 6,

    /// Job object
    Job = 17,
}

impl ObjectType {
    /// Create from raw value
    pub const fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::Process,
            2 => Self::Thread,
            3 => Self::Vmo,
            4 => Self::Channel,
            5 => Self::Event,
            6 => Self::Port,
            17 => Self::Job,
            _ => Self::Unknown,
        }
    }

    /// Get raw value
    pub const fn into_raw(self) -> u32 {
        self as u32
    }

    /// Get name as string
    pub const fn name(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Process => "process",
            Self::Thread => "thread",
            Self::Vmo => "vmo",
            Self::Channel => "channel",
            Self::Event => "event",
            Self::Port => "port",
            Self::Job => "job",
        }
    }
}

// ============================================================================
// Signals
// ============================================================================

bitflags! {
    /// User-observable object state bits
    ///
    /// Object-specific signals reuse the same bit positions, so the meaning
    /// of a bit depends on the object type.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Signals: u32 {
        /// Task (process or job) has terminated
        const TASK_TERMINATED = 1 << 3;
        /// Job has no child jobs
        const JOB_NO_JOBS = 1 << 4;
        /// Job has no child processes
        const JOB_NO_PROCESSES = 1 << 5;
        /// VMO has no clones
        const VMO_ZERO_CHILDREN = 1 << 3;
    }
}

/// ============================================================================
/// Dispatcher Base
/// ============================================================================

/// State shared by every dispatcher
pub struct DispatcherBase {
    koid: Koid,

    /// Guarded by the handle arena lock for writers
    handle_count: AtomicU32,

    signals: SpinMutex<Signals>,
}

impl DispatcherBase {
    /// Create a base with a fresh koid and the given initial signals
    pub fn new(signals: Signals) -> Self {
        Self {
            koid: generate_koid(),
            handle_count: AtomicU32::new(0),
            signals: SpinMutex::new(signals),
        }
    }

    pub fn koid(&self) -> Koid {
        self.koid
    }

    /// Live process-visible handles to this object
    pub fn handle_count(&self) -> u32 {
        self.handle_count.load(Ordering::Acquire)
    }

    /// Called by the arena with its write lock held
    pub(crate) fn increment_handle_count(&self) {
        self.handle_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Called by the arena with its write lock held. Returns true when this
    /// removed the last handle.
    pub(crate) fn decrement_handle_count(&self) -> bool {
        let prev = self.handle_count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "handle count underflow on koid {}", self.koid);
        prev == 1
    }

    /// Current signal state
    pub fn signals(&self) -> Signals {
        *self.signals.lock()
    }

    /// Clear then set signal bits atomically
    pub fn update_state(&self, clear: Signals, set: Signals) {
        let mut signals = self.signals.lock();
        let old = *signals;
        *signals = (old - clear) | set;
        if *signals != old {
            tracing::trace!(koid = self.koid, old = old.bits(), new = signals.bits(), "signals");
        }
    }
}

/// ============================================================================
/// Dispatcher Trait
/// ============================================================================

/// A kernel object reachable from user mode through handles
pub trait Dispatcher: Send + Sync + 'static {
    /// Shared dispatcher state
    fn base(&self) -> &DispatcherBase;

    /// Object type, for handle validation and diagnostics
    fn object_type(&self) -> ObjectType;

    /// Rights a freshly created handle gets
    fn default_rights(&self) -> Rights;

    /// Upcast for typed lookups, see [`downcast_dispatcher`]
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    fn koid(&self) -> Koid {
        self.base().koid()
    }

    /// Koid of the related object (the parent job for tasks)
    fn related_koid(&self) -> Koid {
        KOID_INVALID
    }

    /// Fired once the last handle (or the owning kernel handle) is gone.
    /// The dispatcher may still be referenced after this returns.
    fn on_zero_handles(&self) {}
}

/// Downcast a type-erased dispatcher to its concrete type
pub fn downcast_dispatcher<T: Dispatcher>(dispatcher: Arc<dyn Dispatcher>) -> Option<Arc<T>> {
    dispatcher.into_any().downcast::<T>().ok()
}

/// ============================================================================
/// Object Name
/// ============================================================================

/// Debug name of an object, truncated to `MAX_NAME_LEN - 1` bytes
pub struct Name {
    inner: SpinMutex<String>,
}

impl Name {
    pub fn new(name: &str) -> Self {
        let named = Self {
            inner: SpinMutex::new(String::new()),
        };
        named.set(name);
        named
    }

    /// Replace the name. Overlong names are cut at a character boundary.
    pub fn set(&self, name: &str) {
        let mut end = name.len().min(MAX_NAME_LEN - 1);
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        let mut inner = self.inner.lock();
        inner.clear();
        inner.push_str(&name[..end]);
    }

    pub fn get(&self) -> String {
        self.inner.lock().clone()
    }
}

impl Default for Name {
    fn default() -> Self {
        Self::new("")
    }
}
