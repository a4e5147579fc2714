// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Kernel Handles
//!
//! A [`KernelHandle`] owns a dispatcher before (or instead of) any process
//! handle referring to it. Whenever it stops holding a dispatcher, it calls
//! `on_zero_handles` on it exactly once, while the reference is still held.

use alloc::sync::Arc;

use crate::object::dispatcher::Dispatcher;

/// Single owner of a kernel-internal dispatcher reference
pub struct KernelHandle<T: Dispatcher> {
    dispatcher: Option<Arc<T>>,
}

impl<T: Dispatcher> KernelHandle<T> {
    pub fn new(dispatcher: Arc<T>) -> Self {
        Self {
            dispatcher: Some(dispatcher),
        }
    }

    pub const fn empty() -> Self {
        Self { dispatcher: None }
    }

    pub fn dispatcher(&self) -> Option<&Arc<T>> {
        self.dispatcher.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.dispatcher.is_none()
    }

    /// Replace the held dispatcher
    ///
    /// The current dispatcher (if any) gets `on_zero_handles` before it is
    /// replaced, including when `dispatcher` is `None`.
    pub fn reset(&mut self, dispatcher: Option<Arc<T>>) {
        if let Some(old) = self.dispatcher.take() {
            old.on_zero_handles();
        }
        self.dispatcher = dispatcher;
    }

    /// Give up the reference without a zero-handles transition
    ///
    /// Used when ownership moves to a process handle.
    pub fn release(&mut self) -> Option<Arc<T>> {
        self.dispatcher.take()
    }
}

impl<T: Dispatcher> Drop for KernelHandle<T> {
    fn drop(&mut self) {
        self.reset(None);
    }
}

impl<T: Dispatcher> Default for KernelHandle<T> {
    fn default() -> Self {
        Self::empty()
    }
}
