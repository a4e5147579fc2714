// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Kernel Synchronization Primitives
//!
//! Thin naming layer over the `spin` crate so the object code reads the
//! same way the rest of the kernel does.
//!
//! # Primitives
//!
//! - **SpinMutex**: exclusive lock used for every per-object lock
//! - **SpinRwLock**: reader/writer lock used for the handle arena
//! - **Lazy** / **Once**: process-wide singletons (registries, configuration)
//!
//! None of these locks are re-entrant. Code that may call out to another
//! object while holding one must snapshot what it needs and release first.

pub use spin::{Lazy, Once};

/// Exclusive spin lock
pub type SpinMutex<T> = spin::Mutex<T>;

/// Guard returned by [`SpinMutex::lock`]
pub type SpinMutexGuard<'a, T> = spin::MutexGuard<'a, T>;

/// Reader/writer spin lock
pub type SpinRwLock<T> = spin::RwLock<T>;

/// Shared guard of a [`SpinRwLock`]
pub type SpinRwLockReadGuard<'a, T> = spin::RwLockReadGuard<'a, T>;

/// Exclusive guard of a [`SpinRwLock`]
pub type SpinRwLockWriteGuard<'a, T> = spin::RwLockWriteGuard<'a, T>;
