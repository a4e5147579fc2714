// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Integration Tests
//!
//! Scenarios that cross module boundaries: job trees with processes and
//! handles, races between threads, and property tests over random
//! operation sequences.


use alloc::sync::Arc;
use alloc::vec::Vec;
use core::any::Any;

use crate::object::{Dispatcher, DispatcherBase, ObjectType, Rights, Signals};
use crate::sync::SpinMutex;

/// Dispatcher that logs its label when its last handle closes
pub(crate) struct Witness {
    base: DispatcherBase,
    label: &'static str,
    log: Arc<SpinMutex<Vec<&'static str>>>,
}

impl Witness {
    pub(crate) fn new(label: &'static str, log: &Arc<SpinMutex<Vec<&'static str>>>) -> Arc<Self> {
        Arc::new(Self {
            base: DispatcherBase::new(Signals::empty()),
            label,
            log: log.clone(),
        })
    }
}

impl Dispatcher for Witness {
    fn base(&self) -> &DispatcherBase {
        &self.base
    }

    fn object_type(&self) -> ObjectType {
        ObjectType::Event
    }

    fn default_rights(&self) -> Rights {
        Rights::BASIC
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn on_zero_handles(&self) {
        self.log.lock().push(self.label);
    }
}
