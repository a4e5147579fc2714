// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! VMO Dispatcher
//!
//! Handle-facing wrapper of a [`VmObject`]. Registers itself as the
//! object's child observer and mirrors the child count onto the
//! `VMO_ZERO_CHILDREN` signal.
//!
//! # Usage
//!
//! ```ignore
//! let vmo = VmObject::create(0x4000, VmoOptions::RESIZABLE)?;
//! let (kernel_handle, rights) = VmObjectDispatcher::create(vmo)?;
//! let owner = Handle::make_from_kernel(kernel_handle, rights)?;
//! ```

use alloc::string::String;
use alloc::sync::{Arc, Weak};
use core::any::Any;

use bitflags::bitflags;

use crate::counters;
use crate::object::dispatcher::{Dispatcher, DispatcherBase, Koid, ObjectType, Signals};
use crate::object::kernel_handle::KernelHandle;
use crate::object::Rights;
use crate::vm::{CachePolicy, ChildType, VmObject, VmObjectChildObserver, VmoOptions, PAGE_SIZE};
use crate::{ObjectError, Result};

bitflags! {
    /// Options of a VMO child
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VmoChildOptions: u32 {
        const COPY_ON_WRITE = 1 << 0;
        const NON_RESIZABLE = 1 << 2;
    }
}

/// Range operations on a VMO
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmoOp {
    Commit = 1,
    Decommit = 2,
    Lock = 3,
    Unlock = 4,
    CacheSync = 6,
    CacheInvalidate = 7,
    CacheClean = 8,
    CacheCleanInvalidate = 9,
}

impl VmoOp {
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::Commit),
            2 => Some(Self::Decommit),
            3 => Some(Self::Lock),
            4 => Some(Self::Unlock),
            6 => Some(Self::CacheSync),
            7 => Some(Self::CacheInvalidate),
            8 => Some(Self::CacheClean),
            9 => Some(Self::CacheCleanInvalidate),
            _ => None,
        }
    }
}

/// Point-in-time description of a VMO
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmoInfo {
    pub koid: Koid,
    pub name: String,
    pub size_bytes: u64,
    pub create_options: VmoOptions,
    pub parent_koid: Koid,
    pub num_children: u32,
    pub num_mappings: u32,
    pub share_count: u32,
    pub committed_bytes: u64,
    pub cache_policy: CachePolicy,
    pub is_cow_clone: bool,
    pub handle_rights: Rights,
}

/// Dispatcher of a VM object
pub struct VmObjectDispatcher {
    base: DispatcherBase,
    vmo: Arc<VmObject>,
}

impl VmObjectDispatcher {
    /// Wrap `vmo` in a new dispatcher
    ///
    /// Stamps the object with the dispatcher koid. Fails with `BadState` if
    /// another dispatcher already claimed the object.
    pub fn create(vmo: Arc<VmObject>) -> Result<(KernelHandle<Self>, Rights)> {
        let dispatcher = Arc::new(Self {
            base: DispatcherBase::new(Signals::VMO_ZERO_CHILDREN),
            vmo,
        });
        counters::VMO_DISPATCHER_CREATE.add(1);

        dispatcher.vmo.set_user_id(dispatcher.koid())?;
        let weak = Arc::downgrade(&dispatcher);
        let observer: Weak<dyn VmObjectChildObserver> = weak;
        dispatcher.vmo.set_child_observer(Some(observer));

        tracing::trace!(koid = dispatcher.koid(), vmo = dispatcher.vmo.id(), "vmo dispatcher created");
        Ok((KernelHandle::new(dispatcher), Rights::DEFAULT_VMO))
    }

    pub fn vmo(&self) -> &Arc<VmObject> {
        &self.vmo
    }

    /// Create a copy-on-write child
    ///
    /// `options` must contain `COPY_ON_WRITE` and may add `NON_RESIZABLE`.
    /// Any other bit is rejected.
    pub fn create_child(
        &self,
        options: u32,
        offset: u64,
        size: u64,
        copy_name: bool,
    ) -> Result<Arc<VmObject>> {
        let mut options = VmoChildOptions::from_bits_retain(options);
        if !options.contains(VmoChildOptions::COPY_ON_WRITE) {
            return Err(ObjectError::InvalidArgs);
        }
        options.remove(VmoChildOptions::COPY_ON_WRITE);

        let mut resizable = true;
        if options.contains(VmoChildOptions::NON_RESIZABLE) {
            resizable = false;
            options.remove(VmoChildOptions::NON_RESIZABLE);
        }

        if !options.is_empty() {
            return Err(ObjectError::InvalidArgs);
        }

        self.vmo.create_cow_clone(resizable, offset, size, copy_name)
    }

    /// Run a range operation, checking the handle rights it needs
    pub fn range_op(&self, op: u32, offset: u64, size: u64, rights: Rights) -> Result<()> {
        let op = VmoOp::from_raw(op).ok_or(ObjectError::InvalidArgs)?;
        tracing::trace!(koid = self.koid(), ?op, offset, size, "vmo range op");

        match op {
            VmoOp::Commit => {
                rights.require(Rights::WRITE)?;
                self.vmo.commit_range(offset, size)
            }
            VmoOp::Decommit => {
                rights.require(Rights::WRITE)?;
                self.vmo.decommit_range(offset, size)
            }
            VmoOp::Lock | VmoOp::Unlock => Err(ObjectError::NotSupported),
            VmoOp::CacheSync => {
                rights.require(Rights::READ)?;
                self.vmo.sync_cache(offset, size)
            }
            // Invalidate may drop dirty lines, which modifies the contents
            VmoOp::CacheInvalidate => {
                rights.require(Rights::WRITE)?;
                self.vmo.invalidate_cache(offset, size)
            }
            VmoOp::CacheClean => {
                rights.require(Rights::READ)?;
                self.vmo.clean_cache(offset, size)
            }
            VmoOp::CacheCleanInvalidate => {
                rights.require(Rights::READ)?;
                self.vmo.clean_invalidate_cache(offset, size)
            }
        }
    }

    pub fn get_vmo_info(&self, handle_rights: Rights) -> VmoInfo {
        let vmo = &self.vmo;
        VmoInfo {
            koid: vmo.user_id(),
            name: vmo.get_name(),
            size_bytes: vmo.size(),
            create_options: vmo.create_options(),
            parent_koid: vmo.parent_user_id(),
            num_children: vmo.num_children(),
            num_mappings: vmo.num_mappings(),
            share_count: vmo.share_count(),
            committed_bytes: vmo.allocated_pages() * PAGE_SIZE,
            cache_policy: vmo.get_mapping_cache_policy(),
            is_cow_clone: vmo.child_type() == ChildType::CowClone,
            handle_rights,
        }
    }

    pub fn get_size(&self) -> u64 {
        self.vmo.size()
    }

    pub fn set_size(&self, size: u64) -> Result<()> {
        self.vmo.resize(size)
    }

    pub fn get_name(&self) -> String {
        self.vmo.get_name()
    }

    pub fn set_name(&self, name: &str) {
        self.vmo.set_name(name);
    }

    pub fn set_mapping_cache_policy(&self, cache_policy: u32) -> Result<()> {
        self.vmo.set_mapping_cache_policy(cache_policy)
    }
}

impl VmObjectChildObserver for VmObjectDispatcher {
    fn on_zero_child(&self) {
        self.base.update_state(Signals::empty(), Signals::VMO_ZERO_CHILDREN);
    }

    fn on_one_child(&self) {
        self.base.update_state(Signals::VMO_ZERO_CHILDREN, Signals::empty());
    }
}

impl Dispatcher for VmObjectDispatcher {
    fn base(&self) -> &DispatcherBase {
        &self.base
    }

    fn object_type(&self) -> ObjectType {
        ObjectType::Vmo
    }

    fn default_rights(&self) -> Rights {
        Rights::DEFAULT_VMO
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    // The object outlives us and may still call back; detach on the last
    // handle rather than on drop.
    fn on_zero_handles(&self) {
        self.vmo.set_child_observer(None);
    }
}

impl Drop for VmObjectDispatcher {
    fn drop(&mut self) {
        // The object keeps our koid as its user id; koids are never reused.
        counters::VMO_DISPATCHER_DESTROY.add(1);
        tracing::trace!(koid = self.base.koid(), "vmo dispatcher destroyed");
    }
}
