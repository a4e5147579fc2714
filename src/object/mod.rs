// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Kernel Objects
//!
//! Capability-based object model in the style of Zircon. Every kernel
//! object is a [`Dispatcher`] reached through handles carrying rights.
//!
//! # Modules
//!
//! - [`dispatcher`] - Koids, signals and the dispatcher trait
//! - [`handle`] - Handle arena and handle owners
//! - [`handle_table`] - Per-process handle tables
//! - [`kernel_handle`] - Kernel-internal handles
//! - [`job`] - Job tree and registry
//! - [`job_policy`] - Basic and timer slack policy
//! - [`process`] - Processes as job children
//! - [`exception`] - Exception ports
//! - [`vmo`] - VMO dispatcher

pub mod dispatcher;
pub mod exception;
pub mod handle;
pub mod handle_table;
pub mod job;
pub mod job_policy;
pub mod kernel_handle;
pub mod process;
pub mod rights;
pub mod vmo;

// Re-exports
pub use dispatcher::{Dispatcher, DispatcherBase, Koid, ObjectType, Signals, KOID_INVALID};
pub use exception::{ExceptionPort, ExceptionPortType};
pub use handle::{global_arena, Handle, HandleArena, HandleOwner};
pub use handle_table::HandleTable;
pub use job::{HaltHandler, JobDispatcher, JobEnumerator, JobInfo, JobState};
pub use job_policy::{
    BasicPolicy, JobPolicy, PolicyAction, PolicyCondition, PolicyMode, TimerSlackPolicy,
};
pub use kernel_handle::KernelHandle;
pub use process::{ProcessDispatcher, ProcessState};
pub use rights::Rights;
pub use vmo::{VmObjectDispatcher, VmoChildOptions, VmoInfo, VmoOp};
