// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Handle Arena
//!
//! Process-visible handles are allocated from a fixed-capacity arena. A
//! handle binds a dispatcher to a rights mask and, once installed in a
//! handle table, to a process.
//!
//! # Design
//!
//! - **Base value**: `generation << HANDLE_INDEX_BITS | index`. The slot
//!   generation is bumped on every free, so a stale value never names a
//!   newer handle that reused the slot.
//! - **Ownership**: [`HandleOwner`] is the only path that deletes a handle.
//!   Dropping or reassigning an owner always deletes the handle it held.
//! - **Handle count**: maintained in the dispatcher base under the arena
//!   lock. The last delete calls `on_zero_handles` after the lock is
//!   released.
//!
//! # Usage
//!
//! ```ignore
//! let owner = Handle::make(dispatcher, Rights::DEFAULT_VMO)?;
//! let dup = Handle::dup(&owner, Rights::READ)?;
//! assert_eq!(Handle::count(&*dup.dispatcher()), 2);
//! ```

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::ops::Deref;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::config::config;
use crate::counters;
use crate::object::dispatcher::{Dispatcher, Koid, KOID_INVALID};
use crate::object::kernel_handle::KernelHandle;
use crate::object::Rights;
use crate::sync::{Lazy, SpinRwLock};
use crate::{ObjectError, Result};

/// Bits of a base value used for the slot index
pub const HANDLE_INDEX_BITS: u32 = 18;

/// Largest arena the base value encoding can address
pub const MAX_ARENA_CAPACITY: usize = 1 << HANDLE_INDEX_BITS;

pub(crate) const INDEX_MASK: u32 = (1 << HANDLE_INDEX_BITS) - 1;
const GENERATION_MASK: u32 = (1 << (32 - HANDLE_INDEX_BITS)) - 1;

/// ============================================================================
/// Handle
/// ============================================================================

/// Binding between a process and a dispatcher with a rights mask
pub struct Handle {
    /// Owning process, or `KOID_INVALID` while in transit
    process_id: AtomicU64,

    dispatcher: Arc<dyn Dispatcher>,

    rights: Rights,

    base_value: u32,

    arena: &'static HandleArena,
}

impl Handle {
    /// Allocate a handle from the global arena
    pub fn make(dispatcher: Arc<dyn Dispatcher>, rights: Rights) -> Result<HandleOwner> {
        global_arena().make(dispatcher, rights)
    }

    /// Promote a kernel handle to a process-visible handle
    ///
    /// On failure the kernel handle is dropped, so the dispatcher still
    /// sees `on_zero_handles`.
    pub fn make_from_kernel<T: Dispatcher>(
        kernel_handle: KernelHandle<T>,
        rights: Rights,
    ) -> Result<HandleOwner> {
        global_arena().make_from_kernel(kernel_handle, rights)
    }

    /// Second handle to the same dispatcher, from the source's arena
    ///
    /// Records `rights` as given. Callers check that it is a subset of the
    /// source rights (see [`Rights::attenuate`]).
    pub fn dup(source: &Handle, rights: Rights) -> Result<HandleOwner> {
        source.arena.make(source.dispatcher.clone(), rights)
    }

    /// Resolve a base value in the global arena
    pub fn from_u32(value: u32) -> Option<Arc<Handle>> {
        global_arena().from_u32(value)
    }

    /// Live process-visible handles to `dispatcher`
    pub fn count(dispatcher: &dyn Dispatcher) -> u32 {
        dispatcher.base().handle_count()
    }

    pub fn dispatcher(&self) -> &Arc<dyn Dispatcher> {
        &self.dispatcher
    }

    pub fn rights(&self) -> Rights {
        self.rights
    }

    pub fn has_rights(&self, rights: Rights) -> bool {
        self.rights.contains(rights)
    }

    pub fn base_value(&self) -> u32 {
        self.base_value
    }

    pub fn process_id(&self) -> Koid {
        self.process_id.load(Ordering::Acquire)
    }

    pub fn set_process_id(&self, process_id: Koid) {
        self.process_id.store(process_id, Ordering::Release);
    }

    fn index(&self) -> usize {
        (self.base_value & INDEX_MASK) as usize
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("base_value", &format_args!("{:#x}", self.base_value))
            .field("koid", &self.dispatcher.koid())
            .field("type", &self.dispatcher.object_type())
            .field("rights", &self.rights)
            .field("process_id", &self.process_id())
            .finish()
    }
}

/// ============================================================================
/// Handle Owner
/// ============================================================================

/// Scoped owner of a handle
///
/// Dropping the owner deletes the handle from its arena. Use
/// `Option<HandleOwner>` for an owner that may be empty.
pub struct HandleOwner {
    handle: Arc<Handle>,
}

impl HandleOwner {
    /// Shared reference to the owned handle, for lookups
    pub fn handle(&self) -> &Arc<Handle> {
        &self.handle
    }
}

impl Deref for HandleOwner {
    type Target = Handle;

    fn deref(&self) -> &Handle {
        &self.handle
    }
}

impl Drop for HandleOwner {
    fn drop(&mut self) {
        self.handle.arena.delete(&self.handle);
    }
}

impl fmt::Debug for HandleOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HandleOwner").field(&*self.handle).finish()
    }
}

/// ============================================================================
/// Handle Arena
/// ============================================================================

struct Slot {
    generation: u32,
    handle: Option<Arc<Handle>>,
}

struct ArenaState {
    /// Grows lazily up to the arena capacity
    slots: Vec<Slot>,

    /// Freed slot indexes, most recently freed last
    free: Vec<u32>,

    outstanding: usize,
    high_water: usize,
}

/// Fixed-capacity handle allocator
pub struct HandleArena {
    capacity: usize,
    state: SpinRwLock<ArenaState>,
}

impl HandleArena {
    /// Create an arena. The capacity is clamped to `1..=MAX_ARENA_CAPACITY`.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.clamp(1, MAX_ARENA_CAPACITY),
            state: SpinRwLock::new(ArenaState {
                slots: Vec::new(),
                free: Vec::new(),
                outstanding: 0,
                high_water: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Allocate a handle
    ///
    /// Fails with `NoMemory` only when every slot is in use.
    pub fn make(
        &'static self,
        dispatcher: Arc<dyn Dispatcher>,
        rights: Rights,
    ) -> Result<HandleOwner> {
        let mut state = self.state.write();

        let reused = state.free.pop();
        let index = match reused {
            Some(index) => index as usize,
            None if state.slots.len() < self.capacity => {
                state.slots.try_reserve(1)?;
                state.slots.push(Slot {
                    generation: 1,
                    handle: None,
                });
                state.slots.len() - 1
            }
            None => {
                drop(state);
                counters::HANDLE_ARENA_EXHAUSTED.add(1);
                tracing::warn!(capacity = self.capacity, "handle arena exhausted");
                return Err(ObjectError::NoMemory);
            }
        };

        let slot = &mut state.slots[index];
        let base_value = (slot.generation << HANDLE_INDEX_BITS) | index as u32;
        let handle = Arc::new(Handle {
            process_id: AtomicU64::new(KOID_INVALID),
            dispatcher,
            rights,
            base_value,
            arena: self,
        });
        slot.handle = Some(handle.clone());
        handle.dispatcher.base().increment_handle_count();

        state.outstanding += 1;
        state.high_water = state.high_water.max(state.outstanding);

        tracing::trace!(
            handle = base_value,
            koid = handle.dispatcher.koid(),
            rights = rights.bits(),
            "handle made"
        );
        Ok(HandleOwner { handle })
    }

    /// Promote a kernel handle; see [`Handle::make_from_kernel`]
    pub fn make_from_kernel<T: Dispatcher>(
        &'static self,
        mut kernel_handle: KernelHandle<T>,
        rights: Rights,
    ) -> Result<HandleOwner> {
        let dispatcher = kernel_handle
            .dispatcher()
            .cloned()
            .ok_or(ObjectError::InvalidArgs)?;
        let owner = self.make(dispatcher, rights)?;
        // Ownership moves to the handle without a zero-handles transition.
        kernel_handle.release();
        Ok(owner)
    }

    /// Resolve a base value to its live handle
    ///
    /// Out-of-range indexes and stale generations are rejected.
    pub fn from_u32(&self, value: u32) -> Option<Arc<Handle>> {
        let index = (value & INDEX_MASK) as usize;
        let generation = value >> HANDLE_INDEX_BITS;
        if index >= self.capacity {
            return None;
        }

        let state = self.state.read();
        let slot = state.slots.get(index)?;
        if slot.generation != generation {
            return None;
        }
        slot.handle.clone()
    }

    /// Handles currently allocated
    pub fn outstanding_handles(&self) -> usize {
        self.state.read().outstanding
    }

    /// Log arena occupancy
    pub fn dump_table_info(&self) {
        let state = self.state.read();
        tracing::info!(
            capacity = self.capacity,
            outstanding = state.outstanding,
            high_water = state.high_water,
            slots_touched = state.slots.len(),
            "handle arena"
        );
    }

    fn delete(&self, handle: &Arc<Handle>) {
        let index = handle.index();
        let (released, last) = {
            let mut state = self.state.write();
            let slot = &mut state.slots[index];
            debug_assert!(
                slot.handle.as_ref().is_some_and(|h| Arc::ptr_eq(h, handle)),
                "deleting handle {:#x} not owned by its slot",
                handle.base_value
            );
            let released = slot.handle.take();
            slot.generation = match (slot.generation + 1) & GENERATION_MASK {
                0 => 1,
                g => g,
            };
            state.free.push(index as u32);
            state.outstanding -= 1;
            let last = handle.dispatcher.base().decrement_handle_count();
            (released, last)
        };

        tracing::trace!(handle = handle.base_value, last, "handle deleted");
        if last {
            handle.dispatcher.on_zero_handles();
        }
        drop(released);
    }
}

static GLOBAL_ARENA: Lazy<HandleArena> =
    Lazy::new(|| HandleArena::new(config().handle_arena_capacity));

/// The system-wide handle arena, sized from the active configuration
pub fn global_arena() -> &'static HandleArena {
    &GLOBAL_ARENA
}
