// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Job Policy
//!
//! A job carries a basic policy table (what happens when a process hits a
//! policy condition) and a timer slack policy. Children copy their
//! parent's policy at creation and may only tighten it while still empty.
//!
//! # Modes
//!
//! - **Relative**: entries that conflict with an explicitly set condition
//!   are skipped
//! - **Absolute**: any conflict fails the whole request with
//!   `AlreadyExists`
//!
//! Requests are validated in full before anything is applied.

use crate::{ObjectError, Result};

/// ============================================================================
/// Conditions and Actions
/// ============================================================================

/// Number of basic policy conditions
pub const CONDITION_COUNT: usize = 14;

/// Basic policy condition
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyCondition {
    BadHandle = 0,
    WrongObject = 1,
    VmarWx = 2,
    /// Shorthand for every `New*` condition
    NewAny = 3,
    NewVmo = 4,
    NewChannel = 5,
    NewEvent = 6,
    NewEventPair = 7,
    NewPort = 8,
    NewSocket = 9,
    NewFifo = 10,
    NewTimer = 11,
    NewProcess = 12,
    NewProfile = 13,
}

impl PolicyCondition {
    pub const fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Self::BadHandle,
            1 => Self::WrongObject,
            2 => Self::VmarWx,
            3 => Self::NewAny,
            4 => Self::NewVmo,
            5 => Self::NewChannel,
            6 => Self::NewEvent,
            7 => Self::NewEventPair,
            8 => Self::NewPort,
            9 => Self::NewSocket,
            10 => Self::NewFifo,
            11 => Self::NewTimer,
            12 => Self::NewProcess,
            13 => Self::NewProfile,
            _ => return None,
        })
    }

    pub const fn into_raw(self) -> u32 {
        self as u32
    }

    /// Whether this is one of the object creation conditions
    pub const fn is_new_object(self) -> bool {
        (self as u32) >= (Self::NewAny as u32)
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// What happens when a condition is hit
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PolicyAction {
    #[default]
    Allow = 0,
    Deny = 1,
    AllowException = 2,
    DenyException = 3,
    Kill = 4,
}

impl PolicyAction {
    pub const fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Self::Allow,
            1 => Self::Deny,
            2 => Self::AllowException,
            3 => Self::DenyException,
            4 => Self::Kill,
            _ => return None,
        })
    }

    pub const fn into_raw(self) -> u32 {
        self as u32
    }

    /// Whether the guarded operation goes ahead
    pub const fn is_allowed(self) -> bool {
        matches!(self, Self::Allow | Self::AllowException)
    }

    /// Whether a policy exception is reported to the process
    pub const fn raises_exception(self) -> bool {
        matches!(self, Self::AllowException | Self::DenyException)
    }
}

/// How [`JobPolicy::add_basic_policy`] treats conflicts
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyMode {
    Relative = 0,
    Absolute = 1,
}

impl PolicyMode {
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Relative),
            1 => Some(Self::Absolute),
            _ => None,
        }
    }
}

/// One raw basic policy entry, as passed in by user mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasicPolicy {
    pub condition: u32,
    pub policy: u32,
}

impl BasicPolicy {
    pub const fn new(condition: PolicyCondition, action: PolicyAction) -> Self {
        Self {
            condition: condition as u32,
            policy: action as u32,
        }
    }
}

/// ============================================================================
/// Timer Slack
/// ============================================================================

/// Where a timer may fire within its slack window
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlackMode {
    #[default]
    Center = 0,
    Early = 1,
    Late = 2,
}

impl SlackMode {
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Center),
            1 => Some(Self::Early),
            2 => Some(Self::Late),
            _ => None,
        }
    }
}

/// Effective timer slack of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimerSlack {
    /// Slack in nanoseconds
    pub amount: i64,
    pub mode: SlackMode,
}

/// Raw timer slack request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerSlackPolicy {
    /// Minimum slack in nanoseconds, must not be negative
    pub min_slack: i64,
    pub default_mode: u32,
}

/// ============================================================================
/// Job Policy
/// ============================================================================

/// Policy of a job, copied by value into children and processes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JobPolicy {
    actions: [PolicyAction; CONDITION_COUNT],

    /// Bit per condition set explicitly by some ancestor
    explicit: u32,

    slack: TimerSlack,
}

impl JobPolicy {
    /// Everything allowed, no slack
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a batch of basic policy entries
    ///
    /// Fails with `InvalidArgs` on an empty batch, an unknown mode or an
    /// unknown condition, with `NotSupported` on an unknown action and with
    /// `AlreadyExists` on an absolute-mode conflict. Nothing changes on
    /// failure.
    pub fn add_basic_policy(&mut self, mode: u32, policies: &[BasicPolicy]) -> Result<()> {
        if policies.is_empty() {
            return Err(ObjectError::InvalidArgs);
        }
        let mode = PolicyMode::from_raw(mode).ok_or(ObjectError::InvalidArgs)?;

        let mut updated = *self;
        for entry in policies {
            let condition =
                PolicyCondition::from_raw(entry.condition).ok_or(ObjectError::InvalidArgs)?;
            let action = PolicyAction::from_raw(entry.policy).ok_or(ObjectError::NotSupported)?;

            if condition == PolicyCondition::NewAny {
                for raw in (PolicyCondition::NewAny as u32)..(CONDITION_COUNT as u32) {
                    if let Some(cond) = PolicyCondition::from_raw(raw) {
                        updated.set_one(mode, cond, action)?;
                    }
                }
            } else {
                updated.set_one(mode, condition, action)?;
            }
        }

        *self = updated;
        Ok(())
    }

    fn set_one(
        &mut self,
        mode: PolicyMode,
        condition: PolicyCondition,
        action: PolicyAction,
    ) -> Result<()> {
        let bit = 1u32 << condition.index();
        let current = self.actions[condition.index()];
        if self.explicit & bit != 0 && current != action {
            return match mode {
                PolicyMode::Absolute => Err(ObjectError::AlreadyExists),
                PolicyMode::Relative => Ok(()),
            };
        }
        self.actions[condition.index()] = action;
        self.explicit |= bit;
        Ok(())
    }

    /// Action for a condition
    pub fn get_action(&self, condition: PolicyCondition) -> PolicyAction {
        self.actions[condition.index()]
    }

    /// Whether `condition` was set explicitly
    pub fn is_explicit(&self, condition: PolicyCondition) -> bool {
        self.explicit & (1 << condition.index()) != 0
    }

    /// Apply a timer slack request
    ///
    /// The slack amount only ever grows; the mode is replaced.
    pub fn set_timer_slack(&mut self, policy: TimerSlackPolicy) -> Result<()> {
        if policy.min_slack < 0 {
            return Err(ObjectError::InvalidArgs);
        }
        let mode = SlackMode::from_raw(policy.default_mode).ok_or(ObjectError::InvalidArgs)?;
        self.slack = TimerSlack {
            amount: self.slack.amount.max(policy.min_slack),
            mode,
        };
        Ok(())
    }

    pub fn timer_slack(&self) -> TimerSlack {
        self.slack
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PolicyAction::*;
    use PolicyCondition::*;

    const ABSOLUTE: u32 = PolicyMode::Absolute as u32;
    const RELATIVE: u32 = PolicyMode::Relative as u32;

    #[test]
    fn test_default_allows_everything() {
        let policy = JobPolicy::new();
        for raw in 0..CONDITION_COUNT as u32 {
            let cond = PolicyCondition::from_raw(raw).unwrap();
            assert_eq!(policy.get_action(cond), Allow);
            assert!(!policy.is_explicit(cond));
        }
        assert_eq!(policy.timer_slack(), TimerSlack::default());
    }

    #[test]
    fn test_new_any_expands() {
        let mut policy = JobPolicy::new();
        policy
            .add_basic_policy(ABSOLUTE, &[BasicPolicy::new(NewAny, Deny)])
            .unwrap();
        assert_eq!(policy.get_action(NewVmo), Deny);
        assert_eq!(policy.get_action(NewProcess), Deny);
        assert_eq!(policy.get_action(NewProfile), Deny);
        assert_eq!(policy.get_action(BadHandle), Allow);
        assert_eq!(policy.get_action(VmarWx), Allow);
    }

    #[test]
    fn test_absolute_conflict_changes_nothing() {
        let mut policy = JobPolicy::new();
        policy
            .add_basic_policy(ABSOLUTE, &[BasicPolicy::new(NewChannel, Deny)])
            .unwrap();

        let before = policy;
        let batch = [
            BasicPolicy::new(BadHandle, Kill),
            BasicPolicy::new(NewChannel, Allow),
        ];
        assert_eq!(
            policy.add_basic_policy(ABSOLUTE, &batch),
            Err(ObjectError::AlreadyExists)
        );
        assert_eq!(policy, before);

        // Same action again is not a conflict
        policy
            .add_basic_policy(ABSOLUTE, &[BasicPolicy::new(NewChannel, Deny)])
            .unwrap();
    }

    #[test]
    fn test_relative_conflict_skipped() {
        let mut policy = JobPolicy::new();
        policy
            .add_basic_policy(ABSOLUTE, &[BasicPolicy::new(NewEvent, Kill)])
            .unwrap();
        policy
            .add_basic_policy(
                RELATIVE,
                &[BasicPolicy::new(NewEvent, Allow), BasicPolicy::new(NewPort, Deny)],
            )
            .unwrap();
        assert_eq!(policy.get_action(NewEvent), Kill);
        assert_eq!(policy.get_action(NewPort), Deny);
    }

    #[test]
    fn test_invalid_entries() {
        let mut policy = JobPolicy::new();
        assert_eq!(policy.add_basic_policy(ABSOLUTE, &[]), Err(ObjectError::InvalidArgs));
        assert_eq!(
            policy.add_basic_policy(7, &[BasicPolicy::new(NewVmo, Deny)]),
            Err(ObjectError::InvalidArgs)
        );
        assert_eq!(
            policy.add_basic_policy(ABSOLUTE, &[BasicPolicy { condition: 99, policy: 0 }]),
            Err(ObjectError::InvalidArgs)
        );
        assert_eq!(
            policy.add_basic_policy(
                ABSOLUTE,
                &[BasicPolicy::new(NewVmo, Deny), BasicPolicy { condition: 4, policy: 9 }]
            ),
            Err(ObjectError::NotSupported)
        );
        assert_eq!(policy, JobPolicy::new());
    }

    #[test]
    fn test_timer_slack() {
        let mut policy = JobPolicy::new();
        policy
            .set_timer_slack(TimerSlackPolicy { min_slack: 500, default_mode: 2 })
            .unwrap();
        assert_eq!(policy.timer_slack(), TimerSlack { amount: 500, mode: SlackMode::Late });

        // Lower minimum keeps the amount, mode still replaced
        policy
            .set_timer_slack(TimerSlackPolicy { min_slack: 100, default_mode: 1 })
            .unwrap();
        assert_eq!(policy.timer_slack(), TimerSlack { amount: 500, mode: SlackMode::Early });

        assert_eq!(
            policy.set_timer_slack(TimerSlackPolicy { min_slack: -1, default_mode: 0 }),
            Err(ObjectError::InvalidArgs)
        );
        assert_eq!(
            policy.set_timer_slack(TimerSlackPolicy { min_slack: 0, default_mode: 3 }),
            Err(ObjectError::InvalidArgs)
        );
    }

    #[test]
    fn test_action_predicates() {
        assert!(Allow.is_allowed());
        assert!(AllowException.is_allowed());
        assert!(!Deny.is_allowed());
        assert!(!Kill.is_allowed());
        assert!(DenyException.raises_exception());
        assert!(!Deny.raises_exception());
    }
}
