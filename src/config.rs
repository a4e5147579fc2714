// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Object Layer Configuration
//!
//! Tunables for the object layer, installed once during bring-up.
//!
//! # Usage
//!
//! ```ignore
//! rustux_object::init(ObjectConfig {
//!     handle_arena_capacity: 4096,
//!     ..ObjectConfig::default()
//! });
//! ```
//!
//! If [`init`] is never called the defaults are used. The first reader
//! freezes the configuration: a later `init` is ignored and reported.

use crate::sync::Once;

/// Handle arena slots available by default (256K handles).
pub const DEFAULT_HANDLE_ARENA_CAPACITY: usize = 256 * 1024;

/// The starting max_height value of the root job.
pub const DEFAULT_ROOT_JOB_MAX_HEIGHT: u32 = 32;

/// Maximum object name length, including the terminator slot.
pub const MAX_NAME_LEN: usize = 32;

/// Object layer configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectConfig {
    /// Number of slots in the global handle arena
    pub handle_arena_capacity: usize,

    /// Height given to root jobs; each generation below has one less
    pub root_job_max_height: u32,
}

impl ObjectConfig {
    /// Configuration with every limit at its default
    pub const fn new() -> Self {
        Self {
            handle_arena_capacity: DEFAULT_HANDLE_ARENA_CAPACITY,
            root_job_max_height: DEFAULT_ROOT_JOB_MAX_HEIGHT,
        }
    }

    /// Reject configurations the arena encoding cannot represent
    pub fn validate(&self) -> crate::Result<()> {
        if self.handle_arena_capacity == 0
            || self.handle_arena_capacity > crate::object::handle::MAX_ARENA_CAPACITY
        {
            return Err(crate::ObjectError::InvalidArgs);
        }
        Ok(())
    }
}

impl Default for ObjectConfig {
    fn default() -> Self {
        Self::new()
    }
}

static CONFIG: Once<ObjectConfig> = Once::new();

/// Install the object layer configuration
///
/// Returns `BadState` if the configuration was already frozen, either by an
/// earlier `init` or by a reader.
pub fn init(config: ObjectConfig) -> crate::Result<()> {
    config.validate()?;
    let mut installed = false;
    CONFIG.call_once(|| {
        installed = true;
        config
    });
    if !installed {
        tracing::warn!("object config already frozen, ignoring init");
        return Err(crate::ObjectError::BadState);
    }
    tracing::debug!(
        capacity = config.handle_arena_capacity,
        root_height = config.root_job_max_height,
        "object config installed"
    );
    Ok(())
}

/// Active configuration (defaults if [`init`] was never called)
pub fn config() -> &'static ObjectConfig {
    CONFIG.call_once(ObjectConfig::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ObjectConfig::default();
        assert_eq!(config.handle_arena_capacity, DEFAULT_HANDLE_ARENA_CAPACITY);
        assert_eq!(config.root_job_max_height, 32);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_capacity() {
        let zero = ObjectConfig {
            handle_arena_capacity: 0,
            ..ObjectConfig::default()
        };
        assert_eq!(zero.validate(), Err(crate::ObjectError::InvalidArgs));

        let huge = ObjectConfig {
            handle_arena_capacity: usize::MAX,
            ..ObjectConfig::default()
        };
        assert_eq!(huge.validate(), Err(crate::ObjectError::InvalidArgs));
    }

    #[test]
    fn test_config_is_frozen_after_read() {
        let _ = config();
        assert_eq!(init(ObjectConfig::default()), Err(crate::ObjectError::BadState));
    }
}
