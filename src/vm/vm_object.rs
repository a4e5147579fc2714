// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Virtual Memory Objects
//!
//! A [`VmObject`] is a node in the copy-on-write clone tree. A clone holds
//! its parent strongly; the parent only records the clone's id.
//!
//! # Design
//!
//! - **Shared lock domain**: a clone shares its parent's lock. The mutable
//!   state of every object in a domain lives inside that lock, keyed by
//!   object id, and `*_locked` operations take the guard as a parameter.
//! - **Child observer**: at most one observer, told about 0→1 and 1→0
//!   child transitions with the shared lock released.
//! - **Global list**: every live object, for diagnostics. Objects are added
//!   once fully constructed and removed when dropped.

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::ops::ControlFlow;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bitflags::bitflags;

use crate::object::dispatcher::Name;
use crate::sync::{SpinMutex, SpinMutexGuard};
use crate::vm::{round_down_page, round_up_page, VmMapping, PAGE_SIZE};
use crate::{ObjectError, Result};

/// ============================================================================
/// VMO ID
/// ============================================================================

/// VM object identifier
pub type VmoId = u64;

static NEXT_VMO_ID: AtomicU64 = AtomicU64::new(1);

fn alloc_vmo_id() -> VmoId {
    NEXT_VMO_ID.fetch_add(1, Ordering::Relaxed)
}

bitflags! {
    /// VM object creation options
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VmoOptions: u32 {
        /// Size may change after creation
        const RESIZABLE = 1 << 1;
    }
}

/// ============================================================================
/// Cache Policy
/// ============================================================================

/// Cache policy for mappings of a VM object
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Normal cached access
    Cached = 0,

    /// Uncached access
    Uncached = 1,

    /// Uncached, device ordering
    UncachedDevice = 2,

    /// Write-combining
    WriteCombining = 3,
}

impl CachePolicy {
    /// Create from raw value
    pub const fn try_from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Cached),
            1 => Some(Self::Uncached),
            2 => Some(Self::UncachedDevice),
            3 => Some(Self::WriteCombining),
            _ => None,
        }
    }

    /// Get raw value
    pub const fn into_raw(self) -> u32 {
        self as u32
    }
}

/// How an object relates to its parent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildType {
    NotChild,
    CowClone,
}

/// Told when an object gains its first child or loses its last one
pub trait VmObjectChildObserver: Send + Sync {
    fn on_zero_child(&self);
    fn on_one_child(&self);
}

/// ============================================================================
/// Lock Domain
/// ============================================================================

struct VmObjectState {
    user_id: u64,
    size: u64,

    /// Offset of this object's window into its parent
    parent_offset: u64,

    children: Vec<VmoId>,

    /// Mappings are owned by their address space
    mappings: Vec<Weak<VmMapping>>,

    /// Committed page indexes
    committed: BTreeSet<u64>,

    cache_policy: CachePolicy,
}

impl VmObjectState {
    fn new(size: u64, parent_offset: u64) -> Self {
        Self {
            user_id: 0,
            size,
            parent_offset,
            children: Vec::new(),
            mappings: Vec::new(),
            committed: BTreeSet::new(),
            cache_policy: CachePolicy::Cached,
        }
    }
}

/// State of every object in one copy-on-write family
pub struct VmLockState {
    objects: BTreeMap<VmoId, VmObjectState>,
}

/// Held lock of a copy-on-write family
pub type VmLockGuard<'a> = SpinMutexGuard<'a, VmLockState>;

/// ============================================================================
/// VM Object
/// ============================================================================

/// Memory object node in the clone tree
pub struct VmObject {
    id: VmoId,

    lock: Arc<SpinMutex<VmLockState>>,

    parent: Option<Arc<VmObject>>,

    options: VmoOptions,

    child_type: ChildType,

    name: Name,

    child_observer: SpinMutex<Option<Weak<dyn VmObjectChildObserver>>>,

    in_global_list: AtomicBool,
}

impl VmObject {
    /// Create a parentless object in a fresh lock domain
    ///
    /// The size is rounded up to a whole page.
    pub fn create(size: u64, options: VmoOptions) -> Result<Arc<Self>> {
        let size = round_up_page(size).ok_or(ObjectError::OutOfRange)?;
        let id = alloc_vmo_id();

        let mut objects = BTreeMap::new();
        objects.insert(id, VmObjectState::new(size, 0));

        let vmo = Arc::new(Self {
            id,
            lock: Arc::new(SpinMutex::new(VmLockState { objects })),
            parent: None,
            options,
            child_type: ChildType::NotChild,
            name: Name::default(),
            child_observer: SpinMutex::new(None),
            in_global_list: AtomicBool::new(false),
        });
        vmo.add_to_global_list();

        tracing::trace!(vmo = id, size, "vm object created");
        Ok(vmo)
    }

    /// Create a copy-on-write clone of `[offset, offset + size)`
    pub fn create_cow_clone(
        self: &Arc<Self>,
        resizable: bool,
        offset: u64,
        size: u64,
        copy_name: bool,
    ) -> Result<Arc<Self>> {
        let size = round_up_page(size).ok_or(ObjectError::OutOfRange)?;
        offset.checked_add(size).ok_or(ObjectError::OutOfRange)?;

        let id = alloc_vmo_id();
        let name = if copy_name {
            Name::new(&self.name.get())
        } else {
            Name::default()
        };
        let child = Arc::new(Self {
            id,
            lock: self.lock.clone(),
            parent: Some(self.clone()),
            options: if resizable {
                VmoOptions::RESIZABLE
            } else {
                VmoOptions::empty()
            },
            child_type: ChildType::CowClone,
            name,
            child_observer: SpinMutex::new(None),
            in_global_list: AtomicBool::new(false),
        });

        let count = {
            let mut guard = self.lock.lock();
            guard.objects.insert(id, VmObjectState::new(size, offset));
            self.add_child_locked(&mut guard, &child)
        };
        if count == 1 {
            self.notify_one_child();
        }
        child.add_to_global_list();

        tracing::trace!(vmo = id, parent = self.id, offset, size, "cow clone created");
        Ok(child)
    }

    pub fn id(&self) -> VmoId {
        self.id
    }

    /// Take this object's family lock
    pub fn lock(&self) -> VmLockGuard<'_> {
        self.lock.lock()
    }

    pub fn parent(&self) -> Option<&Arc<VmObject>> {
        self.parent.as_ref()
    }

    pub fn create_options(&self) -> VmoOptions {
        self.options
    }

    pub fn is_resizable(&self) -> bool {
        self.options.contains(VmoOptions::RESIZABLE)
    }

    pub fn child_type(&self) -> ChildType {
        self.child_type
    }

    pub fn size(&self) -> u64 {
        self.with_state(|state| state.size).unwrap_or(0)
    }

    /// ========================================================================
    /// Identity and naming
    /// ========================================================================

    /// Stamp the user-visible id. May only be done once.
    pub fn set_user_id(&self, user_id: u64) -> Result<()> {
        let mut guard = self.lock.lock();
        let state = guard
            .objects
            .get_mut(&self.id)
            .ok_or(ObjectError::BadState)?;
        if state.user_id != 0 {
            return Err(ObjectError::BadState);
        }
        state.user_id = user_id;
        Ok(())
    }

    pub fn user_id(&self) -> u64 {
        self.with_state(|state| state.user_id).unwrap_or(0)
    }

    /// User id of the parent, or 0
    ///
    /// The parent shares our lock, so it is read separately from our own
    /// state.
    pub fn parent_user_id(&self) -> u64 {
        self.parent.as_ref().map_or(0, |parent| parent.user_id())
    }

    pub fn get_name(&self) -> String {
        self.name.get()
    }

    pub fn set_name(&self, name: &str) {
        self.name.set(name);
    }

    /// ========================================================================
    /// Children
    /// ========================================================================

    /// Register (or clear) the observer of child count transitions
    pub fn set_child_observer(&self, observer: Option<Weak<dyn VmObjectChildObserver>>) {
        *self.child_observer.lock() = observer;
    }

    /// Record a new child. Returns the new child count.
    pub fn add_child_locked(&self, guard: &mut VmLockGuard<'_>, child: &VmObject) -> u32 {
        match guard.objects.get_mut(&self.id) {
            Some(state) => {
                state.children.push(child.id);
                state.children.len() as u32
            }
            None => 0,
        }
    }

    /// Forget a child. Removing an unknown child is a no-op.
    ///
    /// When the last child goes, the observer is told with the family lock
    /// released.
    pub fn remove_child(&self, child: VmoId) {
        let guard = {
            let mut guard = self.lock.lock();
            let Some(state) = guard.objects.get_mut(&self.id) else {
                return;
            };
            let Some(pos) = state.children.iter().position(|&id| id == child) else {
                return;
            };
            state.children.swap_remove(pos);
            if !state.children.is_empty() {
                return;
            }
            guard
        };

        let observer = self.child_observer.lock();
        drop(guard);

        let target = observer.as_ref().and_then(Weak::upgrade);
        if let Some(target) = &target {
            target.on_zero_child();
        }
        drop(observer);
        drop(target);
    }

    fn notify_one_child(&self) {
        let observer = self.child_observer.lock();
        let target = observer.as_ref().and_then(Weak::upgrade);
        if let Some(target) = &target {
            target.on_one_child();
        }
        drop(observer);
        drop(target);
    }

    pub fn num_children(&self) -> u32 {
        self.with_state(|state| state.children.len() as u32)
            .unwrap_or(0)
    }

    /// ========================================================================
    /// Mappings
    /// ========================================================================

    pub fn add_mapping_locked(&self, guard: &mut VmLockGuard<'_>, mapping: &Arc<VmMapping>) {
        if let Some(state) = guard.objects.get_mut(&self.id) {
            state.mappings.push(Arc::downgrade(mapping));
        }
    }

    pub fn remove_mapping_locked(&self, guard: &mut VmLockGuard<'_>, mapping: &VmMapping) {
        if let Some(state) = guard.objects.get_mut(&self.id) {
            state
                .mappings
                .retain(|m| m.strong_count() > 0 && !core::ptr::eq(m.as_ptr(), mapping));
        }
    }

    pub fn num_mappings(&self) -> u32 {
        self.with_state(|state| {
            state
                .mappings
                .iter()
                .filter(|m| m.strong_count() > 0)
                .count() as u32
        })
        .unwrap_or(0)
    }

    /// Whether any mapping lives in a user address space
    pub fn is_mapped_by_user(&self) -> bool {
        let live = self.live_mappings();
        live.iter().any(|m| m.aspace().is_user())
    }

    /// Number of distinct address spaces mapping this object, at least 1
    pub fn share_count(&self) -> u32 {
        let live = self.live_mappings();
        if live.len() < 2 {
            return 1;
        }
        let aspaces: BTreeSet<u64> = live.iter().map(|m| m.aspace().id()).collect();
        aspaces.len() as u32
    }

    fn live_mappings(&self) -> Vec<Arc<VmMapping>> {
        self.with_state(|state| state.mappings.iter().filter_map(Weak::upgrade).collect::<Vec<_>>())
            .unwrap_or_default()
    }

    /// Unmap `[offset, offset + len)` from every mapping of this object
    /// and, translated by their parent offset, of its clones
    pub fn range_change_update_locked(&self, guard: &VmLockGuard<'_>, offset: u64, len: u64) {
        let mut pending: Vec<(VmoId, u64, u64)> = Vec::new();
        pending.push((self.id, offset, len));

        while let Some((id, offset, len)) = pending.pop() {
            let Some(state) = guard.objects.get(&id) else {
                continue;
            };

            // Mappings use page-aligned offsets even though objects need not
            let aligned_offset = round_down_page(offset);
            let aligned_end = round_up_page(offset.saturating_add(len)).unwrap_or(u64::MAX);
            for mapping in state.mappings.iter().filter_map(Weak::upgrade) {
                mapping.unmap_vmo_range_locked(aligned_offset, aligned_end - aligned_offset);
            }

            for child_id in state.children.iter() {
                let Some(child) = guard.objects.get(child_id) else {
                    continue;
                };
                let start = offset.max(child.parent_offset);
                let end = offset
                    .saturating_add(len)
                    .min(child.parent_offset.saturating_add(child.size));
                if start < end {
                    pending.push((*child_id, start - child.parent_offset, end - start));
                }
            }
        }
    }

    /// ========================================================================
    /// Pages
    /// ========================================================================

    /// Mark the pages covering `[offset, offset + len)` committed
    pub fn commit_range(&self, offset: u64, len: u64) -> Result<()> {
        let mut guard = self.lock.lock();
        let state = guard
            .objects
            .get_mut(&self.id)
            .ok_or(ObjectError::BadState)?;
        let pages = page_span(state.size, offset, len)?;
        state.committed.extend(pages);
        Ok(())
    }

    /// Release the pages covering `[offset, offset + len)`
    ///
    /// Clones share their parent's pages and cannot decommit.
    pub fn decommit_range(&self, offset: u64, len: u64) -> Result<()> {
        if self.parent.is_some() {
            return Err(ObjectError::NotSupported);
        }
        let mut guard = self.lock.lock();
        let state = guard
            .objects
            .get_mut(&self.id)
            .ok_or(ObjectError::BadState)?;
        let pages = page_span(state.size, offset, len)?;
        for page in pages {
            state.committed.remove(&page);
        }
        self.range_change_update_locked(&guard, offset, len);
        Ok(())
    }

    /// Committed pages
    pub fn allocated_pages(&self) -> u64 {
        self.with_state(|state| state.committed.len() as u64)
            .unwrap_or(0)
    }

    /// Change the size of a resizable object
    ///
    /// Shrinking drops the committed pages past the new end and unmaps the
    /// removed range.
    pub fn resize(&self, size: u64) -> Result<()> {
        if !self.is_resizable() {
            return Err(ObjectError::NotSupported);
        }
        let size = round_up_page(size).ok_or(ObjectError::OutOfRange)?;

        let mut guard = self.lock.lock();
        let state = guard
            .objects
            .get_mut(&self.id)
            .ok_or(ObjectError::BadState)?;
        let old = state.size;
        state.size = size;
        if size < old {
            let first_gone = size / PAGE_SIZE;
            state.committed.retain(|&page| page < first_gone);
            self.range_change_update_locked(&guard, size, old - size);
        }

        tracing::debug!(vmo = self.id, old, new = size, "vm object resized");
        Ok(())
    }

    /// ========================================================================
    /// Cache maintenance
    /// ========================================================================

    pub fn sync_cache(&self, offset: u64, len: u64) -> Result<()> {
        self.cache_op("sync", offset, len)
    }

    pub fn invalidate_cache(&self, offset: u64, len: u64) -> Result<()> {
        self.cache_op("invalidate", offset, len)
    }

    pub fn clean_cache(&self, offset: u64, len: u64) -> Result<()> {
        self.cache_op("clean", offset, len)
    }

    pub fn clean_invalidate_cache(&self, offset: u64, len: u64) -> Result<()> {
        self.cache_op("clean_invalidate", offset, len)
    }

    // Host builds have coherent caches; only the range is checked.
    fn cache_op(&self, op: &'static str, offset: u64, len: u64) -> Result<()> {
        if len == 0 {
            return Err(ObjectError::InvalidArgs);
        }
        let size = self.size();
        match offset.checked_add(len) {
            Some(end) if end <= size => {}
            _ => return Err(ObjectError::OutOfRange),
        }
        tracing::trace!(vmo = self.id, op, offset, len, "cache op");
        Ok(())
    }

    pub fn get_mapping_cache_policy(&self) -> CachePolicy {
        self.with_state(|state| state.cache_policy)
            .unwrap_or(CachePolicy::Cached)
    }

    /// Set the cache policy of future mappings
    ///
    /// Only a pristine object may change policy: no committed pages, no
    /// mappings, no clones and no parent.
    pub fn set_mapping_cache_policy(&self, raw: u32) -> Result<()> {
        let policy = CachePolicy::try_from_raw(raw).ok_or(ObjectError::InvalidArgs)?;
        if self.parent.is_some() {
            return Err(ObjectError::BadState);
        }

        let mut guard = self.lock.lock();
        let state = guard
            .objects
            .get_mut(&self.id)
            .ok_or(ObjectError::BadState)?;
        let mapped = state.mappings.iter().any(|m| m.strong_count() > 0);
        if !state.committed.is_empty() || mapped || !state.children.is_empty() {
            return Err(ObjectError::BadState);
        }
        state.cache_policy = policy;
        Ok(())
    }

    fn with_state<R>(&self, f: impl FnOnce(&VmObjectState) -> R) -> Option<R> {
        let guard = self.lock.lock();
        guard.objects.get(&self.id).map(f)
    }

    /// ========================================================================
    /// Global list
    /// ========================================================================

    fn add_to_global_list(self: &Arc<Self>) {
        ALL_VMOS.lock().insert(self.id, Arc::downgrade(self));
        self.in_global_list.store(true, Ordering::Release);
    }

    /// Leave the global list, the parent and the lock domain
    ///
    /// Runs once per object; later calls find nothing left to do.
    fn detach(&self, parent: Option<&Arc<VmObject>>) {
        if self.in_global_list.swap(false, Ordering::AcqRel) {
            ALL_VMOS.lock().remove(&self.id);
        }

        if let Some(parent) = parent {
            parent.remove_child(self.id);
        }

        let Some(state) = self.lock.lock().objects.remove(&self.id) else {
            return;
        };
        debug_assert!(
            state.children.is_empty(),
            "vm object {} dropped with children",
            self.id
        );
        tracing::trace!(vmo = self.id, "vm object destroyed");
    }
}

impl Drop for VmObject {
    // Ancestors whose last reference was ours are torn down in this loop
    // instead of from their own drop, so a long clone chain never nests
    // destructors.
    fn drop(&mut self) {
        let mut parent = self.parent.take();
        self.detach(parent.as_ref());

        while let Some(next) = parent.take() {
            let Ok(mut vmo) = Arc::try_unwrap(next) else {
                break;
            };
            parent = vmo.parent.take();
            vmo.detach(parent.as_ref());
        }
    }
}

/// Page indexes covering `[offset, offset + len)` of an object of `size`
fn page_span(size: u64, offset: u64, len: u64) -> Result<core::ops::Range<u64>> {
    let end = offset.checked_add(len).ok_or(ObjectError::OutOfRange)?;
    if end > size {
        return Err(ObjectError::OutOfRange);
    }
    let first = round_down_page(offset) / PAGE_SIZE;
    let last = round_up_page(end).ok_or(ObjectError::OutOfRange)? / PAGE_SIZE;
    Ok(first..last)
}

/// ============================================================================
/// Global VMO list
/// ============================================================================

/// Keyed by id, so in creation order
static ALL_VMOS: SpinMutex<BTreeMap<VmoId, Weak<VmObject>>> =
    SpinMutex::new(BTreeMap::new());

/// Visit every live VM object
///
/// The list is snapshotted under its lock and the callback runs without
/// it. Returns `false` if the callback stopped the walk.
pub fn for_each_vmo<F>(mut f: F) -> Result<bool>
where
    F: FnMut(&Arc<VmObject>) -> ControlFlow<()>,
{
    let live: Vec<Arc<VmObject>> = {
        let all = ALL_VMOS.lock();
        let mut live = Vec::new();
        live.try_reserve(all.len())?;
        live.extend(all.values().filter_map(Weak::upgrade));
        live
    };

    for vmo in live.iter() {
        if f(vmo).is_break() {
            return Ok(false);
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::VmAspace;
    use core::sync::atomic::AtomicU32;

    #[derive(Default)]
    struct Observer {
        zero: AtomicU32,
        one: AtomicU32,
    }

    impl VmObjectChildObserver for Observer {
        fn on_zero_child(&self) {
            self.zero.fetch_add(1, Ordering::SeqCst);
        }
        fn on_one_child(&self) {
            self.one.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn observe(vmo: &VmObject) -> Arc<Observer> {
        let observer = Arc::new(Observer::default());
        let weak: Weak<dyn VmObjectChildObserver> =
            Arc::downgrade(&(observer.clone() as Arc<dyn VmObjectChildObserver>));
        vmo.set_child_observer(Some(weak));
        observer
    }

    #[test]
    fn test_create_rounds_size() {
        let vmo = VmObject::create(0x1001, VmoOptions::empty()).unwrap();
        assert_eq!(vmo.size(), 0x2000);
        assert_eq!(vmo.child_type(), ChildType::NotChild);
        assert!(VmObject::create(u64::MAX, VmoOptions::empty()).is_err());
    }

    #[test]
    fn test_zero_one_child_transitions() {
        let parent = VmObject::create(0x4000, VmoOptions::empty()).unwrap();
        let observer = observe(&parent);

        let c1 = parent.create_cow_clone(true, 0, 0x1000, false).unwrap();
        let c2 = parent.create_cow_clone(true, 0x1000, 0x1000, false).unwrap();
        assert_eq!(observer.one.load(Ordering::SeqCst), 1);
        assert_eq!(parent.num_children(), 2);

        drop(c1);
        assert_eq!(observer.zero.load(Ordering::SeqCst), 0);
        drop(c2);
        assert_eq!(observer.zero.load(Ordering::SeqCst), 1);
        assert_eq!(parent.num_children(), 0);
    }

    #[test]
    fn test_clone_shares_lock_domain() {
        let parent = VmObject::create(0x2000, VmoOptions::empty()).unwrap();
        let child = parent.create_cow_clone(false, 0, 0x2000, false).unwrap();
        assert!(Arc::ptr_eq(&parent.lock, &child.lock));
        assert_eq!(child.child_type(), ChildType::CowClone);
        assert!(!child.is_resizable());
        assert!(Arc::ptr_eq(child.parent().unwrap(), &parent));
    }

    #[test]
    fn test_user_ids() {
        let parent = VmObject::create(0x1000, VmoOptions::empty()).unwrap();
        let child = parent.create_cow_clone(true, 0, 0x1000, false).unwrap();
        parent.set_user_id(77).unwrap();
        assert_eq!(parent.set_user_id(78), Err(ObjectError::BadState));
        assert_eq!(child.parent_user_id(), 77);
        assert_eq!(parent.parent_user_id(), 0);
    }

    #[test]
    fn test_name_copy() {
        let parent = VmObject::create(0x1000, VmoOptions::empty()).unwrap();
        parent.set_name("heap");
        let named = parent.create_cow_clone(true, 0, 0x1000, true).unwrap();
        let unnamed = parent.create_cow_clone(true, 0, 0x1000, false).unwrap();
        assert_eq!(named.get_name(), "heap");
        assert_eq!(unnamed.get_name(), "");
    }

    #[test]
    fn test_mappings_and_share_count() {
        let vmo = VmObject::create(0x4000, VmoOptions::empty()).unwrap();
        let user = VmAspace::new(true);
        let kernel = VmAspace::new(false);
        let m1 = VmMapping::new(kernel.clone(), vmo.id(), 0, 0x1000);
        let m2 = VmMapping::new(kernel, vmo.id(), 0x1000, 0x1000);
        {
            let mut guard = vmo.lock();
            vmo.add_mapping_locked(&mut guard, &m1);
            vmo.add_mapping_locked(&mut guard, &m2);
        }
        assert_eq!(vmo.num_mappings(), 2);
        assert_eq!(vmo.share_count(), 1);
        assert!(!vmo.is_mapped_by_user());

        let m3 = VmMapping::new(user, vmo.id(), 0, 0x4000);
        {
            let mut guard = vmo.lock();
            vmo.add_mapping_locked(&mut guard, &m3);
        }
        assert_eq!(vmo.share_count(), 2);
        assert!(vmo.is_mapped_by_user());

        {
            let mut guard = vmo.lock();
            vmo.remove_mapping_locked(&mut guard, &m3);
        }
        drop(m2);
        assert_eq!(vmo.num_mappings(), 1);
    }

    #[test]
    fn test_range_change_propagates_to_clones() {
        let parent = VmObject::create(0x8000, VmoOptions::empty()).unwrap();
        let child = parent.create_cow_clone(true, 0x2000, 0x4000, false).unwrap();
        let grandchild = child.create_cow_clone(true, 0x1000, 0x1000, false).unwrap();

        let aspace = VmAspace::new(true);
        let pm = VmMapping::new(aspace.clone(), parent.id(), 0, 0x8000);
        let cm = VmMapping::new(aspace.clone(), child.id(), 0, 0x4000);
        let gm = VmMapping::new(aspace, grandchild.id(), 0, 0x1000);
        {
            let mut guard = parent.lock();
            parent.add_mapping_locked(&mut guard, &pm);
            child.add_mapping_locked(&mut guard, &cm);
            grandchild.add_mapping_locked(&mut guard, &gm);
            parent.range_change_update_locked(&guard, 0x2800, 0x1000);
        }

        // Parent range [0x2800, 0x3800) aligns to [0x2000, 0x4000)
        assert_eq!(pm.unmapped_ranges(), [(0x2000, 0x2000)]);
        // Child sees [0x800, 0x1800), aligned to [0, 0x2000)
        assert_eq!(cm.unmapped_ranges(), [(0, 0x2000)]);
        // Grandchild window starts at child offset 0x1000: [0, 0x800)
        assert_eq!(gm.unmapped_ranges(), [(0, 0x1000)]);
    }

    #[test]
    fn test_range_change_skips_disjoint_clone() {
        let parent = VmObject::create(0x8000, VmoOptions::empty()).unwrap();
        let child = parent.create_cow_clone(true, 0x4000, 0x1000, false).unwrap();
        let aspace = VmAspace::new(true);
        let cm = VmMapping::new(aspace, child.id(), 0, 0x1000);
        {
            let mut guard = parent.lock();
            child.add_mapping_locked(&mut guard, &cm);
            parent.range_change_update_locked(&guard, 0, 0x1000);
        }
        assert!(cm.unmapped_ranges().is_empty());
    }

    #[test]
    fn test_commit_decommit() {
        let vmo = VmObject::create(0x4000, VmoOptions::empty()).unwrap();
        vmo.commit_range(0x800, 0x1000).unwrap();
        assert_eq!(vmo.allocated_pages(), 2);
        assert_eq!(vmo.commit_range(0x3000, 0x2000), Err(ObjectError::OutOfRange));

        vmo.decommit_range(0, 0x1000).unwrap();
        assert_eq!(vmo.allocated_pages(), 1);

        let clone = vmo.create_cow_clone(true, 0, 0x1000, false).unwrap();
        assert_eq!(clone.decommit_range(0, 0x1000), Err(ObjectError::NotSupported));
    }

    #[test]
    fn test_resize() {
        let fixed = VmObject::create(0x1000, VmoOptions::empty()).unwrap();
        assert_eq!(fixed.resize(0x2000), Err(ObjectError::NotSupported));

        let vmo = VmObject::create(0x4000, VmoOptions::RESIZABLE).unwrap();
        vmo.commit_range(0, 0x4000).unwrap();
        let aspace = VmAspace::new(true);
        let m = VmMapping::new(aspace, vmo.id(), 0, 0x4000);
        {
            let mut guard = vmo.lock();
            vmo.add_mapping_locked(&mut guard, &m);
        }

        vmo.resize(0x1800).unwrap();
        assert_eq!(vmo.size(), 0x2000);
        assert_eq!(vmo.allocated_pages(), 2);
        assert_eq!(m.unmapped_ranges(), [(0x2000, 0x2000)]);
    }

    #[test]
    fn test_cache_ops_check_range() {
        let vmo = VmObject::create(0x2000, VmoOptions::empty()).unwrap();
        assert!(vmo.sync_cache(0, 0x2000).is_ok());
        assert!(vmo.clean_cache(0x1000, 0x10).is_ok());
        assert_eq!(vmo.invalidate_cache(0, 0), Err(ObjectError::InvalidArgs));
        assert_eq!(
            vmo.clean_invalidate_cache(0x1000, 0x2000),
            Err(ObjectError::OutOfRange)
        );
        assert_eq!(vmo.sync_cache(u64::MAX, 2), Err(ObjectError::OutOfRange));
    }

    #[test]
    fn test_cache_policy_requires_pristine_object() {
        let vmo = VmObject::create(0x2000, VmoOptions::empty()).unwrap();
        assert_eq!(vmo.set_mapping_cache_policy(9), Err(ObjectError::InvalidArgs));
        vmo.set_mapping_cache_policy(CachePolicy::Uncached.into_raw())
            .unwrap();
        assert_eq!(vmo.get_mapping_cache_policy(), CachePolicy::Uncached);

        vmo.commit_range(0, 0x1000).unwrap();
        assert_eq!(
            vmo.set_mapping_cache_policy(CachePolicy::Cached.into_raw()),
            Err(ObjectError::BadState)
        );

        let other = VmObject::create(0x2000, VmoOptions::empty()).unwrap();
        let clone = other.create_cow_clone(true, 0, 0x1000, false).unwrap();
        assert_eq!(other.set_mapping_cache_policy(1), Err(ObjectError::BadState));
        assert_eq!(clone.set_mapping_cache_policy(1), Err(ObjectError::BadState));
    }

    #[test]
    fn test_global_list_tracks_lifetime() {
        let vmo = VmObject::create(0x1000, VmoOptions::empty()).unwrap();
        let id = vmo.id();
        let seen = |id: VmoId| {
            let mut found = false;
            for_each_vmo(|v| {
                if v.id() == id {
                    found = true;
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .unwrap();
            found
        };
        assert!(seen(id));
        drop(vmo);
        assert!(!seen(id));
    }

    #[test]
    fn test_drop_deep_clone_chain() {
        const DEPTH: usize = 100_000;

        let worker = std::thread::Builder::new()
            .stack_size(2 * 1024 * 1024)
            .spawn(|| {
                let root = VmObject::create(PAGE_SIZE, VmoOptions::empty()).unwrap();
                let root_ref = Arc::downgrade(&root);
                let mut leaf = root;
                let mut middle = Weak::new();
                for depth in 0..DEPTH {
                    leaf = leaf.create_cow_clone(false, 0, PAGE_SIZE, false).unwrap();
                    if depth == DEPTH / 2 {
                        middle = Arc::downgrade(&leaf);
                    }
                }
                assert_eq!(leaf.lock().objects.len(), DEPTH + 1);

                let leaf_ref = Arc::downgrade(&leaf);
                drop(leaf);
                assert!(leaf_ref.upgrade().is_none());
                assert!(middle.upgrade().is_none());
                assert!(root_ref.upgrade().is_none());
            })
            .unwrap();
        worker.join().unwrap();
    }

    #[test]
    fn test_drop_stops_at_shared_ancestor() {
        let root = VmObject::create(0x2000, VmoOptions::empty()).unwrap();
        let keep = root.create_cow_clone(false, 0, 0x1000, false).unwrap();
        let a = keep.create_cow_clone(false, 0, 0x1000, false).unwrap();
        let b = a.create_cow_clone(false, 0, 0x1000, false).unwrap();
        let a_ref = Arc::downgrade(&a);
        drop(a);

        // `keep` is still referenced here, so only `b` and `a` go
        drop(b);
        assert!(a_ref.upgrade().is_none());
        assert_eq!(keep.num_children(), 0);
        assert_eq!(root.num_children(), 1);
        assert_eq!(root.lock().objects.len(), 2);
    }
}
