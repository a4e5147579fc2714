// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! # Rustux Object Core
//!
//! Lifecycle and hierarchy core of the Rustux kernel object layer:
//!
//! - **Handles**: a global arena of handles with generation-checked
//!   values, per-process handle tables and kernel-internal handles
//! - **Jobs**: the job tree with policy inheritance, tree-wide kill,
//!   enumeration and a global registry used for OOM victim selection
//! - **VM objects**: the parent/child clone graph and the dispatcher
//!   that exposes it through handles
//!
//! ## Layout
//!
//! ```text
//! src/
//! ├── object/            # Dispatchers, handles, jobs, processes
//! ├── vm/                # VmObject graph and mappings
//! ├── sync/              # Lock aliases
//! ├── config.rs          # Boot-time limits
//! ├── counters.rs        # Kernel counters
//! ├── error.rs           # ObjectError
//! └── lib.rs             # This file
//! ```
//!
//! ## Locking
//!
//! Lock order is global job registry, then job lock. The handle arena,
//! each handle table and each VM lock domain are separate leaf locks.
//! Objects are never destroyed while one of these locks is held.
//!
//! ```ignore
//! use rustux_object::object::{Handle, JobDispatcher, Rights};
//!
//! let root = JobDispatcher::create_root_job(None);
//! let (job, rights) = JobDispatcher::create(&root)?;
//! let owner = Handle::make_from_kernel(job, rights)?;
//! ```

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod config;
pub mod counters;
pub mod error;
pub mod object;
pub mod sync;
pub mod vm;

#[cfg(test)]
mod tests;

pub use config::{config, init, ObjectConfig};
pub use error::{ObjectError, Result};
