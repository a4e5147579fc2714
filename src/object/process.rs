// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Process Objects
//!
//! The parts of a process the object layer manages: membership in a job,
//! the handle table, the policy snapshot taken from the job and the
//! exception reports waiting on a port. Threads and address spaces live
//! elsewhere.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::any::Any;

use crate::counters;
use crate::object::dispatcher::{Dispatcher, DispatcherBase, Koid, Name, ObjectType, Signals};
use crate::object::exception::ExceptionPort;
use crate::object::handle_table::HandleTable;
use crate::object::job::JobDispatcher;
use crate::object::job_policy::{JobPolicy, PolicyAction, PolicyCondition};
use crate::object::kernel_handle::KernelHandle;
use crate::object::Rights;
use crate::sync::SpinMutex;
use crate::{ObjectError, Result};

/// Return code of a process killed by its job's policy
pub const TASK_RETCODE_POLICY_KILL: i64 = -1026;

/// Lifecycle of a process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Dead,
}

/// An exception report waiting for a handler
#[derive(Debug, Clone)]
pub struct PendingException {
    pub port: Arc<ExceptionPort>,
    pub exception_type: u32,
}

struct ProcessInner {
    state: ProcessState,
    return_code: i64,
    pending_exceptions: Vec<PendingException>,
}

/// Process kernel object
pub struct ProcessDispatcher {
    base: DispatcherBase,
    job: Arc<JobDispatcher>,
    name: Name,

    /// Copied from the job at creation; never changes
    policy: JobPolicy,

    handles: HandleTable,
    inner: SpinMutex<ProcessInner>,
}

impl ProcessDispatcher {
    /// Create a process in `job`
    ///
    /// Fails with `BadState` if the job no longer accepts children.
    pub fn create(job: &Arc<JobDispatcher>, name: &str) -> Result<(KernelHandle<Self>, Rights)> {
        let base = DispatcherBase::new(Signals::empty());
        let handles = HandleTable::new(base.koid());
        let process = Arc::new(Self {
            base,
            job: job.clone(),
            name: Name::new(name),
            policy: job.get_policy(),
            handles,
            inner: SpinMutex::new(ProcessInner {
                state: ProcessState::Running,
                return_code: 0,
                pending_exceptions: Vec::new(),
            }),
        });
        counters::PROCESS_CREATE.add(1);

        if !job.add_child_process(&process) {
            tracing::warn!(job = job.koid(), name, "job refused child process");
            return Err(ObjectError::BadState);
        }

        tracing::trace!(koid = process.koid(), job = job.koid(), name, "process created");
        Ok((KernelHandle::new(process), Rights::DEFAULT_PROCESS))
    }

    pub fn job(&self) -> &Arc<JobDispatcher> {
        &self.job
    }

    pub fn get_name(&self) -> String {
        self.name.get()
    }

    pub fn set_name(&self, name: &str) {
        self.name.set(name);
    }

    pub fn handle_table(&self) -> &HandleTable {
        &self.handles
    }

    pub fn state(&self) -> ProcessState {
        self.inner.lock().state
    }

    pub fn return_code(&self) -> i64 {
        self.inner.lock().return_code
    }

    pub fn policy(&self) -> &JobPolicy {
        &self.policy
    }

    pub fn policy_action(&self, condition: PolicyCondition) -> PolicyAction {
        self.policy.get_action(condition)
    }

    /// Apply the basic policy for `condition`
    ///
    /// Denied actions fail with `AccessDenied`. A `Kill` action also kills
    /// this process.
    pub fn enforce_basic_policy(&self, condition: PolicyCondition) -> Result<()> {
        let action = self.policy_action(condition);
        if action.raises_exception() {
            tracing::debug!(koid = self.koid(), ?condition, ?action, "policy exception");
        }
        if action == PolicyAction::Kill {
            tracing::warn!(koid = self.koid(), ?condition, "killed by job policy");
            self.kill(TASK_RETCODE_POLICY_KILL);
        }
        if action.is_allowed() {
            Ok(())
        } else {
            Err(ObjectError::AccessDenied)
        }
    }

    /// Terminate the process
    ///
    /// Closes every handle it owns and leaves its job. Killing a dead
    /// process does nothing.
    pub fn kill(&self, return_code: i64) {
        {
            let mut inner = self.inner.lock();
            if inner.state == ProcessState::Dead {
                return;
            }
            inner.state = ProcessState::Dead;
            inner.return_code = return_code;
        }
        self.base.update_state(Signals::empty(), Signals::TASK_TERMINATED);
        tracing::debug!(koid = self.koid(), return_code, "process dead");

        // Closing a handle may destroy other objects, so no lock is held
        self.handles.clear();
        self.job.remove_child_process(self.koid());
    }

    /// ========================================================================
    /// Exceptions
    /// ========================================================================

    /// Queue an exception report for `port`
    pub fn report_exception(&self, port: &Arc<ExceptionPort>, exception_type: u32) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state == ProcessState::Dead {
            return Err(ObjectError::BadState);
        }
        inner.pending_exceptions.try_reserve(1)?;
        inner.pending_exceptions.push(PendingException {
            port: port.clone(),
            exception_type,
        });
        Ok(())
    }

    pub fn pending_exceptions(&self) -> Vec<PendingException> {
        self.inner.lock().pending_exceptions.clone()
    }

    /// Drop every report waiting on `port`
    pub fn on_exception_port_removal(&self, port: &Arc<ExceptionPort>) {
        let removed: Vec<PendingException> = {
            let mut inner = self.inner.lock();
            let (removed, kept) = core::mem::take(&mut inner.pending_exceptions)
                .into_iter()
                .partition(|pending| Arc::ptr_eq(&pending.port, port));
            inner.pending_exceptions = kept;
            removed
        };
        if !removed.is_empty() {
            tracing::debug!(
                koid = self.koid(),
                port = port.key(),
                dropped = removed.len(),
                "exception reports dropped"
            );
        }
    }
}

impl Dispatcher for ProcessDispatcher {
    fn base(&self) -> &DispatcherBase {
        &self.base
    }

    fn object_type(&self) -> ObjectType {
        ObjectType::Process
    }

    fn default_rights(&self) -> Rights {
        Rights::DEFAULT_PROCESS
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn related_koid(&self) -> Koid {
        self.job.koid()
    }
}

impl Drop for ProcessDispatcher {
    fn drop(&mut self) {
        let koid = self.base.koid();
        self.job.remove_child_process(koid);
        counters::PROCESS_DESTROY.add(1);
        tracing::trace!(koid, "process destroyed");
    }
}
