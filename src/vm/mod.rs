// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Virtual Memory Object Graph
//!
//! The VM side of the object layer: the [`VmObject`] parent/child graph,
//! the mappings that reference an object, and the child observer hook
//! the VMO dispatcher registers.
//!
//! Page-table management is out of scope. Mappings record unmap requests
//! instead of touching hardware.

pub mod mapping;
pub mod vm_object;

pub use mapping::{VmAspace, VmMapping};
pub use vm_object::{
    for_each_vmo, CachePolicy, ChildType, VmLockGuard, VmObject, VmObjectChildObserver, VmoId,
    VmoOptions,
};

/// Page size in bytes
pub const PAGE_SIZE: u64 = 4096;

/// Round `value` down to a page boundary
#[inline]
pub const fn round_down_page(value: u64) -> u64 {
    value & !(PAGE_SIZE - 1)
}

/// Round `value` up to a page boundary, or `None` on overflow
#[inline]
pub const fn round_up_page(value: u64) -> Option<u64> {
    match value.checked_add(PAGE_SIZE - 1) {
        Some(v) => Some(round_down_page(v)),
        None => None,
    }
}
