// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Job Objects
//!
//! Jobs are containers for processes and other jobs, forming a tree with a
//! root job at the top. A job bounds the depth below it, carries the policy
//! its children inherit, and can kill its whole subtree.
//!
//! # Design
//!
//! - **Weak children**: a job lists its children as weak references and
//!   children hold their parent strongly. A child removes itself from its
//!   parent when it is destroyed.
//! - **Live refs**: children are upgraded under the job lock into a vector
//!   that is only dropped after the lock is released, so a child's
//!   destructor never runs with its parent's lock held.
//! - **Worklists**: kill and enumeration walk the tree with explicit
//!   stacks rather than recursion.
//! - **Registry**: every job is listed in a global registry ordered by
//!   hierarchy and age. The registry lock is always taken before a job
//!   lock.
//!
//! # Usage
//!
//! ```ignore
//! let root = JobDispatcher::create_root_job(None);
//! let (child, rights) = JobDispatcher::create(&root)?;
//! ```

use alloc::sync::{Arc, Weak};
use alloc::vec::{self, Vec};
use core::any::Any;
use core::ops::ControlFlow;

use crate::config::config;
use crate::counters;
use crate::object::dispatcher::{
    Dispatcher, DispatcherBase, Koid, Name, ObjectType, Signals, KOID_INVALID,
};
use crate::object::exception::{ExceptionPort, ExceptionPortType};
use crate::object::job_policy::{BasicPolicy, JobPolicy, TimerSlackPolicy};
use crate::object::kernel_handle::KernelHandle;
use crate::object::process::ProcessDispatcher;
use crate::object::Rights;
use crate::sync::{Lazy, SpinMutex};
use crate::{ObjectError, Result};

/// Name given to every root job
pub const ROOT_JOB_NAME: &str = "<superroot>";

/// ============================================================================
/// Job State
/// ============================================================================

/// Lifecycle of a job
///
/// A job leaves `Ready` when killed and becomes `Dead` once its last child
/// is gone. It never accepts children again after leaving `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Ready,
    Killing,
    Dead,
}

/// Snapshot returned by [`JobDispatcher::get_info`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobInfo {
    pub return_code: i64,
    pub exited: bool,
    pub kill_on_oom: bool,
    pub debugger_attached: bool,
}

/// Receives the system halt request when a root job runs out of children
pub trait HaltHandler: Send + Sync {
    fn halt(&self, root_job: Koid);
}

/// Visitor for [`JobDispatcher::enumerate_children`]
///
/// Returning `Break` from either method stops the whole walk.
pub trait JobEnumerator {
    fn on_job(&mut self, _job: &Arc<JobDispatcher>) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }

    fn on_process(&mut self, _process: &Arc<ProcessDispatcher>) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }
}

/// ============================================================================
/// Job Registry
/// ============================================================================

/// All jobs, ordered by hierarchy and creation
static ALL_JOBS: Lazy<SpinMutex<Vec<(Koid, Weak<JobDispatcher>)>>> =
    Lazy::new(|| SpinMutex::new(Vec::new()));

/// Insert a new job after its youngest sibling, or after its parent if it
/// has none
fn register_job(job: &Arc<JobDispatcher>) {
    let mut all = ALL_JOBS.lock();
    let index = match job.parent.as_ref() {
        None => all.len(),
        Some(parent) => {
            // The sibling cannot leave the registry while it is still in
            // the parent's list and we hold the parent lock.
            let inner = parent.inner.lock();
            let neighbor = match inner.jobs.last() {
                Some((koid, _)) => *koid,
                None => parent.koid(),
            };
            match all.iter().position(|(koid, _)| *koid == neighbor) {
                Some(pos) => pos + 1,
                None => all.len(),
            }
        }
    };
    all.insert(index, (job.koid(), Arc::downgrade(job)));
}

fn unregister_job(koid: Koid) {
    ALL_JOBS.lock().retain(|(k, _)| *k != koid);
}


/// ============================================================================
/// Job Dispatcher
/// ============================================================================

struct JobInner {
    state: JobState,
    return_code: i64,
    kill_on_oom: bool,
    halted: bool,

    jobs: Vec<(Koid, Weak<JobDispatcher>)>,
    procs: Vec<(Koid, Weak<ProcessDispatcher>)>,

    policy: JobPolicy,

    exception_port: Option<Arc<ExceptionPort>>,
    debugger_exception_port: Option<Arc<ExceptionPort>>,

    #[cfg(test)]
    fail_next_snapshot: bool,
}

/// Strong references to the direct children of one job
///
/// Must be dropped after the job lock is released: dropping the last
/// reference to a child takes that lock.
struct LiveChildren {
    procs: Vec<Arc<ProcessDispatcher>>,
    jobs: Vec<Arc<JobDispatcher>>,
}

impl JobInner {
    /// Upgrade every child still alive
    ///
    /// Both vectors are allocated before any child is upgraded, so a
    /// failed allocation never releases a child under the lock.
    fn live_children(&mut self) -> Result<LiveChildren> {
        #[cfg(test)]
        if core::mem::take(&mut self.fail_next_snapshot) {
            return Err(ObjectError::NoMemory);
        }

        let mut procs = Vec::new();
        procs.try_reserve_exact(self.procs.len())?;
        let mut jobs = Vec::new();
        jobs.try_reserve_exact(self.jobs.len())?;

        procs.extend(self.procs.iter().filter_map(|(_, child)| child.upgrade()));
        jobs.extend(self.jobs.iter().filter_map(|(_, child)| child.upgrade()));
        Ok(LiveChildren { procs, jobs })
    }
}

/// Children of one level still to be killed
struct KillFrame {
    jobs: vec::IntoIter<Arc<JobDispatcher>>,
    procs: Vec<Arc<ProcessDispatcher>>,
}

/// Job kernel object
pub struct JobDispatcher {
    base: DispatcherBase,
    parent: Option<Arc<JobDispatcher>>,
    max_height: u32,
    name: Name,

    /// Only set on root jobs
    halt: Option<Arc<dyn HaltHandler>>,

    inner: SpinMutex<JobInner>,
}

impl JobDispatcher {
    fn new(
        parent: Option<Arc<JobDispatcher>>,
        max_height: u32,
        policy: JobPolicy,
        halt: Option<Arc<dyn HaltHandler>>,
    ) -> Arc<Self> {
        let job = Arc::new(Self {
            base: DispatcherBase::new(Signals::JOB_NO_JOBS | Signals::JOB_NO_PROCESSES),
            parent,
            max_height,
            name: Name::default(),
            halt,
            inner: SpinMutex::new(JobInner {
                state: JobState::Ready,
                return_code: 0,
                kill_on_oom: false,
                halted: false,
                jobs: Vec::new(),
                procs: Vec::new(),
                policy,
                exception_port: None,
                debugger_exception_port: None,
                #[cfg(test)]
                fail_next_snapshot: false,
            }),
        });
        counters::JOB_CREATE.add(1);
        register_job(&job);
        job
    }

    /// Create a root job
    ///
    /// `halt` is told when the root loses its last child.
    pub fn create_root_job(halt: Option<Arc<dyn HaltHandler>>) -> Arc<Self> {
        let job = Self::new(None, config().root_job_max_height, JobPolicy::new(), halt);
        job.name.set(ROOT_JOB_NAME);
        tracing::debug!(koid = job.koid(), max_height = job.max_height, "root job created");
        job
    }

    /// Create a child of `parent`
    ///
    /// The child starts with a copy of the parent's policy. Fails with
    /// `OutOfRange` when the parent may not have children and `BadState`
    /// when the parent is no longer accepting them.
    pub fn create(parent: &Arc<JobDispatcher>) -> Result<(KernelHandle<Self>, Rights)> {
        if parent.max_height == 0 {
            return Err(ObjectError::OutOfRange);
        }

        let job = Self::new(
            Some(parent.clone()),
            parent.max_height - 1,
            parent.get_policy(),
            None,
        );
        if !parent.add_child_job(&job) {
            tracing::warn!(parent = parent.koid(), "job refused child job");
            return Err(ObjectError::BadState);
        }

        tracing::trace!(koid = job.koid(), parent = parent.koid(), "job created");
        Ok((KernelHandle::new(job), Rights::DEFAULT_JOB))
    }

    pub fn parent(&self) -> Option<&Arc<JobDispatcher>> {
        self.parent.as_ref()
    }

    /// How many generations of jobs may still be created below this one
    pub fn max_height(&self) -> u32 {
        self.max_height
    }

    pub fn get_name(&self) -> alloc::string::String {
        self.name.get()
    }

    pub fn set_name(&self, name: &str) {
        self.name.set(name);
    }

    pub fn state(&self) -> JobState {
        self.inner.lock().state
    }

    /// Direct child jobs, including ones being destroyed
    pub fn job_count(&self) -> usize {
        self.inner.lock().jobs.len()
    }

    /// Direct child processes, including ones being destroyed
    pub fn process_count(&self) -> usize {
        self.inner.lock().procs.len()
    }

    /// ========================================================================
    /// Children
    /// ========================================================================

    /// Attach a process. Returns false unless the job is `Ready`.
    pub fn add_child_process(&self, process: &Arc<ProcessDispatcher>) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != JobState::Ready {
            return false;
        }
        inner.procs.push((process.koid(), Arc::downgrade(process)));
        self.update_signals_increment_locked(&inner);
        true
    }

    fn add_child_job(&self, job: &Arc<JobDispatcher>) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != JobState::Ready {
            return false;
        }
        inner.jobs.push((job.koid(), Arc::downgrade(job)));
        self.update_signals_increment_locked(&inner);
        true
    }

    /// Detach a process. Unknown koids are ignored.
    pub fn remove_child_process(&self, koid: Koid) {
        let halt = {
            let mut inner = self.inner.lock();
            match inner.procs.iter().position(|(k, _)| *k == koid) {
                Some(pos) => {
                    inner.procs.remove(pos);
                }
                None => return,
            }
            self.update_signals_decrement_locked(&mut inner)
        };
        if halt {
            self.halt_system();
        }
    }

    fn remove_child_job(&self, koid: Koid) {
        let halt = {
            let mut inner = self.inner.lock();
            match inner.jobs.iter().position(|(k, _)| *k == koid) {
                Some(pos) => {
                    inner.jobs.remove(pos);
                }
                None => return,
            }
            self.update_signals_decrement_locked(&mut inner)
        };
        if halt {
            self.halt_system();
        }
    }

    fn update_signals_increment_locked(&self, inner: &JobInner) {
        let mut clear = Signals::empty();
        if inner.procs.len() == 1 {
            clear |= Signals::JOB_NO_PROCESSES;
        }
        if inner.jobs.len() == 1 {
            clear |= Signals::JOB_NO_JOBS;
        }
        self.base.update_state(clear, Signals::empty());
    }

    /// Returns true when the caller must halt the system once the lock is
    /// released
    fn update_signals_decrement_locked(&self, inner: &mut JobInner) -> bool {
        let mut set = Signals::empty();
        if inner.procs.is_empty() {
            set |= Signals::JOB_NO_PROCESSES;
        }
        if inner.jobs.is_empty() {
            set |= Signals::JOB_NO_JOBS;
        }

        let mut halt = false;
        if inner.procs.is_empty() && inner.jobs.is_empty() {
            if inner.state == JobState::Killing {
                self.mark_dead_locked(inner);
            }
            if self.parent.is_none() && !inner.halted {
                inner.halted = true;
                halt = true;
            }
        }

        self.base.update_state(Signals::empty(), set);
        halt
    }

    fn mark_dead_locked(&self, inner: &mut JobInner) {
        inner.state = JobState::Dead;
        if let Some(port) = inner.exception_port.take() {
            port.on_target_unbind();
        }
        if let Some(port) = inner.debugger_exception_port.take() {
            port.on_target_unbind();
        }
        self.base.update_state(Signals::empty(), Signals::TASK_TERMINATED);
        tracing::debug!(koid = self.koid(), return_code = inner.return_code, "job dead");
    }

    fn halt_system(&self) {
        tracing::error!(koid = self.koid(), "root job has no children left, halting");
        if let Some(handler) = self.halt.as_ref() {
            handler.halt(self.koid());
        }
    }

    /// ========================================================================
    /// Kill
    /// ========================================================================

    /// Kill every process and job below this one
    ///
    /// Child jobs are killed before processes, depth first. Returns
    /// `Ok(false)` if the job was already killed; otherwise it accepts no
    /// new children and eventually becomes `Dead`.
    ///
    /// Fails with `NoMemory` if the children of this job cannot be
    /// snapshotted, leaving it `Ready`. If that happens to a descendant,
    /// the rest of the tree is still killed, the descendant stays `Ready`
    /// and the first such error is returned.
    pub fn kill(&self, return_code: i64) -> Result<bool> {
        let mut stack = Vec::new();
        stack.try_reserve(1)?;
        match self.begin_kill(return_code)? {
            Some(frame) => stack.push(frame),
            None => return Ok(false),
        }

        let mut result = Ok(true);
        loop {
            let next = match stack.last_mut() {
                Some(frame) => frame.jobs.next(),
                None => break,
            };
            let job = match next {
                Some(job) => job,
                None => {
                    if let Some(frame) = stack.pop() {
                        for process in frame.procs {
                            process.kill(return_code);
                        }
                    }
                    continue;
                }
            };

            // Room for the frame is made before the job commits to dying
            let frame = stack
                .try_reserve(1)
                .map_err(ObjectError::from)
                .and_then(|()| job.begin_kill(return_code));
            match frame {
                Ok(Some(frame)) => stack.push(frame),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(koid = job.koid(), %err, "job left unkilled");
                    if result.is_ok() {
                        result = Err(err);
                    }
                }
            }
        }
        result
    }

    /// Snapshot the live children, then move to `Killing`
    ///
    /// A failed snapshot leaves the job untouched.
    fn begin_kill(&self, return_code: i64) -> Result<Option<KillFrame>> {
        let children = {
            let mut inner = self.inner.lock();
            if inner.state != JobState::Ready {
                return Ok(None);
            }
            let children = inner.live_children()?;

            inner.return_code = return_code;
            inner.state = JobState::Killing;
            tracing::debug!(koid = self.koid(), return_code, "job killing");
            if inner.jobs.is_empty() && inner.procs.is_empty() {
                self.mark_dead_locked(&mut inner);
            }
            children
        };

        Ok(Some(KillFrame {
            jobs: children.jobs.into_iter(),
            procs: children.procs,
        }))
    }

    /// ========================================================================
    /// Enumeration
    /// ========================================================================

    /// Snapshot of the live direct children
    fn children(&self) -> Result<LiveChildren> {
        self.inner.lock().live_children()
    }

    /// Visit the children of this job
    ///
    /// Each level visits its processes, then its jobs; with `recurse` a job
    /// is descended into right after it is visited. Each level is a
    /// snapshot taken when the walk reaches it. Returns `Ok(false)` if the
    /// enumerator stopped the walk, and `NoMemory` if a level could not be
    /// snapshotted.
    pub fn enumerate_children(&self, je: &mut dyn JobEnumerator, recurse: bool) -> Result<bool> {
        let mut stack = Vec::new();
        match self.enumerate_level(je)? {
            Some(jobs) => {
                stack.try_reserve(1)?;
                stack.push(jobs.into_iter());
            }
            None => return Ok(false),
        }

        loop {
            let next = match stack.last_mut() {
                Some(level) => level.next(),
                None => break,
            };
            let job = match next {
                Some(job) => job,
                None => {
                    stack.pop();
                    continue;
                }
            };

            if je.on_job(&job).is_break() {
                return Ok(false);
            }
            if recurse {
                match job.enumerate_level(je)? {
                    Some(jobs) => {
                        stack.try_reserve(1)?;
                        stack.push(jobs.into_iter());
                    }
                    None => return Ok(false),
                }
            }
        }
        Ok(true)
    }

    /// Visit this level's processes and hand back its jobs, or `None` if
    /// the enumerator stopped
    fn enumerate_level(
        &self,
        je: &mut dyn JobEnumerator,
    ) -> Result<Option<Vec<Arc<JobDispatcher>>>> {
        let LiveChildren { procs, jobs } = self.children()?;
        for process in procs.iter() {
            if je.on_process(process).is_break() {
                return Ok(None);
            }
        }
        Ok(Some(jobs))
    }

    /// Direct child process with `koid`, if alive
    pub fn lookup_process_by_id(&self, koid: Koid) -> Option<Arc<ProcessDispatcher>> {
        let inner = self.inner.lock();
        inner
            .procs
            .iter()
            .find(|(k, _)| *k == koid)
            .and_then(|(_, process)| process.upgrade())
    }

    /// Direct child job with `koid`, if alive
    pub fn lookup_job_by_id(&self, koid: Koid) -> Option<Arc<JobDispatcher>> {
        let inner = self.inner.lock();
        inner
            .jobs
            .iter()
            .find(|(k, _)| *k == koid)
            .and_then(|(_, job)| job.upgrade())
    }

    /// ========================================================================
    /// Policy
    /// ========================================================================

    // Policy is frozen once the job has children, so a process's policy
    // never changes under it.
    fn can_set_policy_locked(inner: &JobInner) -> bool {
        inner.procs.is_empty() && inner.jobs.is_empty()
    }

    pub fn set_basic_policy(&self, mode: u32, policies: &[BasicPolicy]) -> Result<()> {
        let mut inner = self.inner.lock();
        if !Self::can_set_policy_locked(&inner) {
            return Err(ObjectError::BadState);
        }
        inner.policy.add_basic_policy(mode, policies)
    }

    pub fn set_timer_slack_policy(&self, policy: TimerSlackPolicy) -> Result<()> {
        let mut inner = self.inner.lock();
        if !Self::can_set_policy_locked(&inner) {
            return Err(ObjectError::BadState);
        }
        inner.policy.set_timer_slack(policy)
    }

    pub fn get_policy(&self) -> JobPolicy {
        self.inner.lock().policy
    }

    /// ========================================================================
    /// Exception Ports
    /// ========================================================================

    /// Bind a job or debugger exception port
    pub fn set_exception_port(&self, port: Arc<ExceptionPort>) -> Result<()> {
        let mut inner = self.inner.lock();
        let slot = match port.port_type() {
            ExceptionPortType::Job => &mut inner.exception_port,
            ExceptionPortType::JobDebugger => &mut inner.debugger_exception_port,
            ExceptionPortType::Process => return Err(ObjectError::InvalidArgs),
        };
        if slot.is_some() {
            return Err(ObjectError::AlreadyBound);
        }
        *slot = Some(port);
        Ok(())
    }

    /// Unbind the job or debugger exception port
    ///
    /// The port hears about the unbind before any other caller can see the
    /// slot empty. Every process below then drops exceptions pending on
    /// it. Returns `Ok(false)` if no port was bound. If that walk fails
    /// the port stays unbound.
    pub fn reset_exception_port(&self, debugger: bool) -> Result<bool> {
        let port = {
            let mut inner = self.inner.lock();
            let slot = if debugger {
                &mut inner.debugger_exception_port
            } else {
                &mut inner.exception_port
            };
            match slot.take() {
                Some(port) => {
                    port.on_target_unbind();
                    port
                }
                None => return Ok(false),
            }
        };

        let mut remover = ExceptionPortRemover { port: &port };
        self.enumerate_children(&mut remover, true)?;
        Ok(true)
    }

    pub fn exception_port(&self) -> Option<Arc<ExceptionPort>> {
        self.inner.lock().exception_port.clone()
    }

    pub fn debugger_exception_port(&self) -> Option<Arc<ExceptionPort>> {
        self.inner.lock().debugger_exception_port.clone()
    }

    /// ========================================================================
    /// Diagnostics
    /// ========================================================================

    pub fn set_kill_on_oom(&self, kill: bool) {
        self.inner.lock().kill_on_oom = kill;
    }

    pub fn get_kill_on_oom(&self) -> bool {
        self.inner.lock().kill_on_oom
    }

    pub fn get_info(&self) -> JobInfo {
        let inner = self.inner.lock();
        JobInfo {
            return_code: inner.return_code,
            exited: inner.state == JobState::Dead,
            kill_on_oom: inner.kill_on_oom,
            debugger_attached: inner.debugger_exception_port.is_some(),
        }
    }

    /// Call `func` on every job in registry order
    ///
    /// Stops at the first error and returns it. `func` runs with the
    /// registry lock held and must not create or destroy jobs.
    pub fn for_each_job<F>(mut func: F) -> Result<()>
    where
        F: FnMut(&Arc<JobDispatcher>) -> Result<()>,
    {
        let mut live = Vec::new();
        let result = {
            let all = ALL_JOBS.lock();
            live.try_reserve_exact(all.len())?;
            let mut result = Ok(());
            for (_, job) in all.iter() {
                if let Some(job) = job.upgrade() {
                    result = func(&job);
                    live.push(job);
                    if result.is_err() {
                        break;
                    }
                }
            }
            result
        };
        drop(live);
        result
    }

    /// Youngest job marked kill-on-OOM, in registry order
    pub fn oom_victim() -> Option<Arc<JobDispatcher>> {
        let mut victim = None;
        Self::for_each_job(|job| {
            if job.get_kill_on_oom() {
                victim = Some(job.clone());
            }
            Ok(())
        })
        .ok()?;
        victim
    }
}

struct ExceptionPortRemover<'a> {
    port: &'a Arc<ExceptionPort>,
}

impl JobEnumerator for ExceptionPortRemover<'_> {
    fn on_process(&mut self, process: &Arc<ProcessDispatcher>) -> ControlFlow<()> {
        process.on_exception_port_removal(self.port);
        ControlFlow::Continue(())
    }
}

#[cfg(test)]
impl JobDispatcher {
    /// Make the next child snapshot of this job fail with `NoMemory`
    pub(crate) fn fail_next_snapshot(&self) {
        self.inner.lock().fail_next_snapshot = true;
    }
}

impl Dispatcher for JobDispatcher {
    fn base(&self) -> &DispatcherBase {
        &self.base
    }

    fn object_type(&self) -> ObjectType {
        ObjectType::Job
    }

    fn default_rights(&self) -> Rights {
        Rights::DEFAULT_JOB
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn related_koid(&self) -> Koid {
        match self.parent.as_ref() {
            Some(parent) => parent.koid(),
            None => KOID_INVALID,
        }
    }
}

impl Drop for JobDispatcher {
    fn drop(&mut self) {
        let koid = self.base.koid();
        if let Some(parent) = self.parent.as_ref() {
            parent.remove_child_job(koid);
        }
        unregister_job(koid);
        counters::JOB_DESTROY.add(1);
        tracing::trace!(koid, "job destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::job_policy::{PolicyAction, PolicyCondition, PolicyMode};
    use crate::object::process::ProcessState;
    use alloc::string::String;
    use alloc::vec;

    fn child(parent: &Arc<JobDispatcher>) -> Arc<JobDispatcher> {
        let (kh, rights) = JobDispatcher::create(parent).unwrap();
        assert_eq!(rights, Rights::DEFAULT_JOB);
        kh.dispatcher().unwrap().clone()
    }

    fn process(job: &Arc<JobDispatcher>, name: &str) -> Arc<ProcessDispatcher> {
        let (kh, _) = ProcessDispatcher::create(job, name).unwrap();
        kh.dispatcher().unwrap().clone()
    }

    #[test]
    fn test_root_job() {
        let root = JobDispatcher::create_root_job(None);
        assert_eq!(root.get_name(), ROOT_JOB_NAME);
        assert_eq!(root.max_height(), config().root_job_max_height);
        assert_eq!(root.related_koid(), KOID_INVALID);
        assert!(root.parent().is_none());
        assert_eq!(root.state(), JobState::Ready);
        assert!(root
            .base()
            .signals()
            .contains(Signals::JOB_NO_JOBS | Signals::JOB_NO_PROCESSES));
    }

    #[test]
    fn test_height_decreases_until_out_of_range() {
        let root = JobDispatcher::create_root_job(None);
        let mut chain = vec![root.clone()];
        loop {
            let parent = chain.last().unwrap().clone();
            match JobDispatcher::create(&parent) {
                Ok((kh, _)) => {
                    let job = kh.dispatcher().unwrap().clone();
                    assert_eq!(job.max_height(), parent.max_height() - 1);
                    assert_eq!(job.related_koid(), parent.koid());
                    chain.push(job);
                }
                Err(err) => {
                    assert_eq!(err, ObjectError::OutOfRange);
                    assert_eq!(parent.max_height(), 0);
                    break;
                }
            }
        }
        assert_eq!(chain.len() as u32, root.max_height() + 1);
    }

    #[test]
    fn test_child_signals() {
        let root = JobDispatcher::create_root_job(None);
        let job = child(&root);
        assert_eq!(root.job_count(), 1);
        assert!(!root.base().signals().contains(Signals::JOB_NO_JOBS));

        let proc = process(&job, "p");
        assert!(!job.base().signals().contains(Signals::JOB_NO_PROCESSES));
        drop(proc);
        assert!(job.base().signals().contains(Signals::JOB_NO_PROCESSES));
        assert_eq!(job.process_count(), 0);

        drop(job);
        assert_eq!(root.job_count(), 0);
        assert!(root.base().signals().contains(Signals::JOB_NO_JOBS));
    }

    #[test]
    fn test_remove_unknown_child_is_noop() {
        let root = JobDispatcher::create_root_job(None);
        let job = child(&root);
        root.remove_child_process(job.koid());
        root.remove_child_job(12345);
        assert_eq!(root.job_count(), 1);
    }

    #[test]
    fn test_killed_job_refuses_children() {
        let root = JobDispatcher::create_root_job(None);
        let job = child(&root);
        assert_eq!(job.kill(7), Ok(true));
        assert_eq!(job.kill(8), Ok(false));
        assert_eq!(job.state(), JobState::Dead);
        assert_eq!(job.get_info().return_code, 7);
        assert!(job.get_info().exited);
        assert!(job.base().signals().contains(Signals::TASK_TERMINATED));

        assert_eq!(JobDispatcher::create(&job).err(), Some(ObjectError::BadState));
        assert_eq!(
            ProcessDispatcher::create(&job, "late").err(),
            Some(ObjectError::BadState)
        );
    }

    #[test]
    fn test_kill_waits_for_children() {
        let root = JobDispatcher::create_root_job(None);
        let job = child(&root);
        let sub = child(&job);

        assert_eq!(job.kill(-1), Ok(true));
        assert_eq!(job.state(), JobState::Killing);
        assert_eq!(sub.state(), JobState::Dead);

        drop(sub);
        assert_eq!(job.state(), JobState::Dead);
    }

    #[test]
    fn test_kill_snapshot_failure_leaves_job_ready() {
        let root = JobDispatcher::create_root_job(None);
        let job = child(&root);
        let proc = process(&job, "p");

        job.fail_next_snapshot();
        assert_eq!(job.kill(5), Err(ObjectError::NoMemory));
        assert_eq!(job.state(), JobState::Ready);
        assert_eq!(job.get_info().return_code, 0);
        assert_eq!(proc.state(), ProcessState::Running);

        // Still accepting children, and a later kill takes them all
        let late = process(&job, "late");
        assert_eq!(job.kill(5), Ok(true));
        assert_eq!(proc.state(), ProcessState::Dead);
        assert_eq!(late.state(), ProcessState::Dead);
        assert_eq!(job.state(), JobState::Dead);
    }

    #[test]
    fn test_kill_continues_past_failed_descendant() {
        let root = JobDispatcher::create_root_job(None);
        let top = child(&root);
        let a = child(&top);
        let b = child(&top);
        let p_top = process(&top, "p-top");
        let p_a = process(&a, "p-a");
        let p_b = process(&b, "p-b");

        a.fail_next_snapshot();
        assert_eq!(top.kill(3), Err(ObjectError::NoMemory));
        assert_eq!(top.state(), JobState::Killing);
        assert_eq!(a.state(), JobState::Ready);
        assert_eq!(p_a.state(), ProcessState::Running);
        assert_eq!(b.state(), JobState::Dead);
        assert_eq!(p_b.state(), ProcessState::Dead);
        assert_eq!(p_top.state(), ProcessState::Dead);

        assert_eq!(a.kill(3), Ok(true));
        assert_eq!(p_a.state(), ProcessState::Dead);
        assert_eq!(a.state(), JobState::Dead);

        drop((p_top, p_a, p_b));
        drop((a, b));
        assert_eq!(top.state(), JobState::Dead);
    }

    #[test]
    fn test_policy_copied_and_locked() {
        let root = JobDispatcher::create_root_job(None);
        let job = child(&root);
        let deny_vmo = [BasicPolicy::new(PolicyCondition::NewVmo, PolicyAction::Deny)];
        job.set_basic_policy(PolicyMode::Absolute as u32, &deny_vmo).unwrap();

        let sub = child(&job);
        assert_eq!(sub.get_policy().get_action(PolicyCondition::NewVmo), PolicyAction::Deny);

        assert_eq!(
            job.set_basic_policy(PolicyMode::Absolute as u32, &deny_vmo),
            Err(ObjectError::BadState)
        );
        assert_eq!(
            job.set_timer_slack_policy(TimerSlackPolicy { min_slack: 0, default_mode: 0 }),
            Err(ObjectError::BadState)
        );

        drop(sub);
        job.set_timer_slack_policy(TimerSlackPolicy { min_slack: 10, default_mode: 0 })
            .unwrap();
    }

    #[test]
    fn test_lookup_direct_children_only() {
        let root = JobDispatcher::create_root_job(None);
        let job = child(&root);
        let sub = child(&job);
        let proc = process(&job, "worker");

        assert!(Arc::ptr_eq(&root.lookup_job_by_id(job.koid()).unwrap(), &job));
        assert!(root.lookup_job_by_id(sub.koid()).is_none());
        assert!(Arc::ptr_eq(&job.lookup_process_by_id(proc.koid()).unwrap(), &proc));
        assert!(root.lookup_process_by_id(proc.koid()).is_none());
    }

    struct Recorder {
        seen: Vec<String>,
        stop_at: Option<Koid>,
    }

    impl JobEnumerator for Recorder {
        fn on_job(&mut self, job: &Arc<JobDispatcher>) -> ControlFlow<()> {
            self.seen.push(job.get_name());
            if self.stop_at == Some(job.koid()) {
                return ControlFlow::Break(());
            }
            ControlFlow::Continue(())
        }

        fn on_process(&mut self, process: &Arc<ProcessDispatcher>) -> ControlFlow<()> {
            self.seen.push(process.get_name());
            ControlFlow::Continue(())
        }
    }

    #[test]
    fn test_enumerate_order() {
        let root = JobDispatcher::create_root_job(None);
        let a = child(&root);
        a.set_name("a");
        let b = child(&root);
        b.set_name("b");
        let a1 = child(&a);
        a1.set_name("a1");
        let _p_root = process(&root, "p-root");
        let _p_a = process(&a, "p-a");
        let _p_a1 = process(&a1, "p-a1");

        let mut flat = Recorder { seen: Vec::new(), stop_at: None };
        assert_eq!(root.enumerate_children(&mut flat, false), Ok(true));
        assert_eq!(flat.seen, ["p-root", "a", "b"]);

        let mut deep = Recorder { seen: Vec::new(), stop_at: None };
        assert_eq!(root.enumerate_children(&mut deep, true), Ok(true));
        assert_eq!(deep.seen, ["p-root", "a", "p-a", "a1", "p-a1", "b"]);

        // Stopping inside a subtree stops the siblings above it too
        let mut stopped = Recorder { seen: Vec::new(), stop_at: Some(a1.koid()) };
        assert_eq!(root.enumerate_children(&mut stopped, true), Ok(false));
        assert_eq!(stopped.seen, ["p-root", "a", "p-a", "a1"]);
    }

    #[test]
    fn test_enumerate_snapshot_failure() {
        let root = JobDispatcher::create_root_job(None);
        let job = child(&root);
        let sub = child(&job);
        let _p = process(&sub, "p");

        sub.fail_next_snapshot();
        let mut failed = Recorder { seen: Vec::new(), stop_at: None };
        assert_eq!(
            job.enumerate_children(&mut failed, true),
            Err(ObjectError::NoMemory)
        );
        assert_eq!(failed.seen.len(), 1);

        let mut retry = Recorder { seen: Vec::new(), stop_at: None };
        assert_eq!(job.enumerate_children(&mut retry, true), Ok(true));
        assert_eq!(retry.seen.len(), 2);
    }

    #[test]
    fn test_exception_ports() {
        let root = JobDispatcher::create_root_job(None);
        let job = child(&root);
        let port = ExceptionPort::new(ExceptionPortType::Job, 1);
        let debugger = ExceptionPort::new(ExceptionPortType::JobDebugger, 2);

        job.set_exception_port(port.clone()).unwrap();
        assert_eq!(
            job.set_exception_port(ExceptionPort::new(ExceptionPortType::Job, 3)),
            Err(ObjectError::AlreadyBound)
        );
        job.set_exception_port(debugger.clone()).unwrap();
        assert!(job.get_info().debugger_attached);
        assert_eq!(
            job.set_exception_port(ExceptionPort::new(ExceptionPortType::Process, 4)),
            Err(ObjectError::InvalidArgs)
        );

        assert_eq!(job.reset_exception_port(true), Ok(true));
        assert_eq!(job.reset_exception_port(true), Ok(false));
        assert_eq!(debugger.unbind_count(), 1);
        assert!(!job.get_info().debugger_attached);

        // Dying unbinds what is left
        job.kill(0).unwrap();
        assert_eq!(port.unbind_count(), 1);
        assert!(job.exception_port().is_none());
    }
}
