// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Address Space Mappings
//!
//! A [`VmMapping`] is owned by its address space and maps a window of a
//! VM object. The object keeps only a weak back-reference, so a mapping
//! never keeps its object alive through the object's own list.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::sync::SpinMutex;
use crate::vm::VmoId;

static NEXT_ASPACE_ID: AtomicU64 = AtomicU64::new(1);

/// Address space a mapping lives in
#[derive(Debug)]
pub struct VmAspace {
    id: u64,
    is_user: bool,
}

impl VmAspace {
    pub fn new(is_user: bool) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_ASPACE_ID.fetch_add(1, Ordering::Relaxed),
            is_user,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_user(&self) -> bool {
        self.is_user
    }
}

/// Window `[object_offset, object_offset + size)` of a VM object mapped
/// into an address space
#[derive(Debug)]
pub struct VmMapping {
    aspace: Arc<VmAspace>,
    object: VmoId,
    object_offset: u64,
    size: u64,

    /// Object ranges unmapped so far, in object offsets
    unmapped: SpinMutex<Vec<(u64, u64)>>,
}

impl VmMapping {
    pub fn new(aspace: Arc<VmAspace>, object: VmoId, object_offset: u64, size: u64) -> Arc<Self> {
        Arc::new(Self {
            aspace,
            object,
            object_offset,
            size,
            unmapped: SpinMutex::new(Vec::new()),
        })
    }

    pub fn aspace(&self) -> &Arc<VmAspace> {
        &self.aspace
    }

    pub fn object(&self) -> VmoId {
        self.object
    }

    pub fn object_offset(&self) -> u64 {
        self.object_offset
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Unmap the part of `[offset, offset + len)` this mapping covers
    ///
    /// Called with the object's lock held. Returns whether anything
    /// overlapped.
    pub fn unmap_vmo_range_locked(&self, offset: u64, len: u64) -> bool {
        let start = offset.max(self.object_offset);
        let end = offset
            .saturating_add(len)
            .min(self.object_offset.saturating_add(self.size));
        if start >= end {
            return false;
        }
        tracing::trace!(
            aspace = self.aspace.id,
            vmo = self.object,
            offset = start,
            len = end - start,
            "unmap vmo range"
        );
        self.unmapped.lock().push((start, end - start));
        true
    }

    /// Ranges unmapped by range change updates
    pub fn unmapped_ranges(&self) -> Vec<(u64, u64)> {
        self.unmapped.lock().clone()
    }
}
