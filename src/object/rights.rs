// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Handle Rights
//!
//! Rights are permissions that control what operations can be performed
//! on a kernel object through a handle. Rights can only be reduced, never
//! elevated, when a handle is duplicated.

use bitflags::bitflags;

bitflags! {
    /// Handle rights bitmask
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Rights: u32 {
        const DUPLICATE = 1 << 0;
        const TRANSFER = 1 << 1;
        const READ = 1 << 2;
        const WRITE = 1 << 3;
        const EXECUTE = 1 << 4;
        const MAP = 1 << 5;
        const GET_PROPERTY = 1 << 6;
        const SET_PROPERTY = 1 << 7;
        const ENUMERATE = 1 << 8;
        const DESTROY = 1 << 9;
        const SET_POLICY = 1 << 10;
        const GET_POLICY = 1 << 11;
        const SIGNAL = 1 << 12;
        const SIGNAL_PEER = 1 << 13;
        const WAIT = 1 << 14;
        const INSPECT = 1 << 15;
        const MANAGE_JOB = 1 << 16;
        const MANAGE_PROCESS = 1 << 17;
        const MANAGE_THREAD = 1 << 18;
        const APPLY_PROFILE = 1 << 19;

        /// Keep the source rights on duplicate
        const SAME_RIGHTS = 1 << 31;

        const BASIC = Self::TRANSFER.bits() | Self::DUPLICATE.bits()
            | Self::WAIT.bits() | Self::INSPECT.bits();
        const IO = Self::READ.bits() | Self::WRITE.bits();
        const PROPERTY = Self::GET_PROPERTY.bits() | Self::SET_PROPERTY.bits();
        const POLICY = Self::GET_POLICY.bits() | Self::SET_POLICY.bits();
    }
}

impl Rights {
    /// Default rights of a job handle
    pub const DEFAULT_JOB: Self = Self::BASIC
        .union(Self::IO)
        .union(Self::PROPERTY)
        .union(Self::POLICY)
        .union(Self::ENUMERATE)
        .union(Self::DESTROY)
        .union(Self::SIGNAL)
        .union(Self::MANAGE_JOB)
        .union(Self::MANAGE_PROCESS)
        .union(Self::MANAGE_THREAD);

    /// Default rights of a process handle
    pub const DEFAULT_PROCESS: Self = Self::BASIC
        .union(Self::IO)
        .union(Self::PROPERTY)
        .union(Self::ENUMERATE)
        .union(Self::DESTROY)
        .union(Self::SIGNAL)
        .union(Self::MANAGE_PROCESS)
        .union(Self::MANAGE_THREAD);

    /// Default rights of a VMO handle
    pub const DEFAULT_VMO: Self = Self::BASIC
        .union(Self::IO)
        .union(Self::PROPERTY)
        .union(Self::MAP)
        .union(Self::SIGNAL);

    /// Require specific rights
    pub fn require(self, required: Self) -> crate::Result<()> {
        if self.contains(required) {
            Ok(())
        } else {
            Err(crate::ObjectError::AccessDenied)
        }
    }

    /// Rights for a duplicate of a handle holding `self`
    ///
    /// `SAME_RIGHTS` keeps the source mask. Otherwise the request must be a
    /// subset of the source, since rights can only ever be attenuated.
    pub fn attenuate(self, requested: Self) -> crate::Result<Self> {
        if requested.contains(Self::SAME_RIGHTS) {
            return Ok(self);
        }
        if !self.contains(requested) {
            return Err(crate::ObjectError::InvalidArgs);
        }
        Ok(requested)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rights_basic() {
        let rights = Rights::READ | Rights::WRITE;
        assert!(rights.contains(Rights::READ));
        assert!(rights.contains(Rights::IO));
        assert!(!rights.contains(Rights::EXECUTE));

        let removed = rights - Rights::READ;
        assert!(!removed.contains(Rights::READ));
        assert!(removed.contains(Rights::WRITE));
    }

    #[test]
    fn test_rights_require() {
        let rights = Rights::READ | Rights::WRITE;
        assert!(rights.require(Rights::READ).is_ok());
        assert_eq!(
            rights.require(Rights::EXECUTE),
            Err(crate::ObjectError::AccessDenied)
        );
    }

    #[test]
    fn test_attenuate() {
        let src = Rights::DEFAULT_VMO;
        assert_eq!(src.attenuate(Rights::SAME_RIGHTS), Ok(src));
        assert_eq!(src.attenuate(Rights::READ), Ok(Rights::READ));
        assert_eq!(
            src.attenuate(Rights::MANAGE_JOB),
            Err(crate::ObjectError::InvalidArgs)
        );
    }

    #[test]
    fn test_default_rights_shapes() {
        assert!(Rights::DEFAULT_JOB.contains(Rights::MANAGE_JOB | Rights::SET_POLICY));
        assert!(!Rights::DEFAULT_PROCESS.contains(Rights::MANAGE_JOB));
        assert!(Rights::DEFAULT_VMO.contains(Rights::MAP | Rights::IO));
        assert!(!Rights::DEFAULT_VMO.contains(Rights::EXECUTE));
    }
}
