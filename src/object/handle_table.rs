// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Per-process Handle Table
//!
//! Owns the handles of one process. User-visible handle values are the
//! arena base value xor a per-process random mask, so values leaked from
//! one process are meaningless in another.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::object::dispatcher::{downcast_dispatcher, Dispatcher, Koid, KOID_INVALID};
use crate::object::handle::{global_arena, Handle, HandleArena, HandleOwner, INDEX_MASK};
use crate::object::Rights;
use crate::sync::SpinMutex;
use crate::{ObjectError, Result};

/// Handles owned by one process
pub struct HandleTable {
    process_id: Koid,

    /// Only index bits, so a user value is never zero
    handle_rand: u32,

    arena: &'static HandleArena,

    /// Keyed by arena base value
    handles: SpinMutex<BTreeMap<u32, HandleOwner>>,
}

impl HandleTable {
    /// Table for `process_id` over the global arena
    pub fn new(process_id: Koid) -> Self {
        Self::with_arena(process_id, global_arena())
    }

    pub fn with_arena(process_id: Koid, arena: &'static HandleArena) -> Self {
        Self {
            process_id,
            handle_rand: (mix64(process_id) as u32) & INDEX_MASK,
            arena,
            handles: SpinMutex::new(BTreeMap::new()),
        }
    }

    pub fn process_id(&self) -> Koid {
        self.process_id
    }

    /// User-visible value of a handle in this table
    pub fn map_handle_to_value(&self, handle: &Handle) -> u32 {
        handle.base_value() ^ self.handle_rand
    }

    fn map_value_to_base(&self, value: u32) -> u32 {
        value ^ self.handle_rand
    }

    /// Take ownership of a handle and return its user value
    pub fn add(&self, owner: HandleOwner) -> u32 {
        owner.set_process_id(self.process_id);
        let value = self.map_handle_to_value(&owner);
        self.handles.lock().insert(owner.base_value(), owner);
        value
    }

    /// Look up a handle owned by this process
    pub fn get(&self, value: u32) -> Result<Arc<Handle>> {
        let handle = self
            .arena
            .from_u32(self.map_value_to_base(value))
            .ok_or(ObjectError::BadHandle)?;
        if handle.process_id() != self.process_id {
            return Err(ObjectError::BadHandle);
        }
        Ok(handle)
    }

    /// Detach a handle from this process
    ///
    /// Dropping the returned owner closes it; it may also be moved into
    /// another table.
    pub fn remove(&self, value: u32) -> Result<HandleOwner> {
        let base = self.map_value_to_base(value);
        let owner = {
            let mut handles = self.handles.lock();
            match handles.get(&base) {
                Some(owner) if owner.process_id() == self.process_id => {}
                _ => return Err(ObjectError::BadHandle),
            }
            handles.remove(&base).ok_or(ObjectError::BadHandle)?
        };
        owner.set_process_id(KOID_INVALID);
        Ok(owner)
    }

    /// Duplicate a handle within this process
    ///
    /// The source needs `DUPLICATE`. `rights` must be a subset of the
    /// source rights, or `SAME_RIGHTS`.
    pub fn duplicate(&self, value: u32, rights: Rights) -> Result<u32> {
        let source = self.get(value)?;
        source.rights().require(Rights::DUPLICATE)?;
        let rights = source.rights().attenuate(rights)?;
        let dup = Handle::dup(&source, rights)?;
        Ok(self.add(dup))
    }

    /// Typed dispatcher behind a handle, checking rights
    pub fn get_dispatcher_with_rights<T: Dispatcher>(
        &self,
        value: u32,
        rights: Rights,
    ) -> Result<(Arc<T>, Rights)> {
        let handle = self.get(value)?;
        let dispatcher =
            downcast_dispatcher::<T>(handle.dispatcher().clone()).ok_or(ObjectError::WrongType)?;
        handle.rights().require(rights)?;
        Ok((dispatcher, handle.rights()))
    }

    /// Close every handle
    ///
    /// Handles are deleted after the table lock is released, since the
    /// last handle of an object may run its zero-handles hook.
    pub fn clear(&self) -> usize {
        let drained: Vec<HandleOwner> = {
            let mut handles = self.handles.lock();
            core::mem::take(&mut *handles).into_values().collect()
        };
        let count = drained.len();
        for owner in drained.iter() {
            owner.set_process_id(KOID_INVALID);
        }
        drop(drained);
        if count > 0 {
            tracing::debug!(process = self.process_id, count, "handle table cleared");
        }
        count
    }

    pub fn count(&self) -> usize {
        self.handles.lock().len()
    }
}

/// splitmix64 finalizer
fn mix64(seed: u64) -> u64 {
    let mut z = seed.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}
