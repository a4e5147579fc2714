// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Object Error Types
//!
//! Every fallible operation in this crate returns [`Result`]. Errors are
//! reported to the immediate caller and never retried internally; the
//! syscall layer maps them to user-visible status codes with
//! [`ObjectError::into_raw`].

use core::fmt;

/// Kernel object errors
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectError {
    /// Handle arena or allocator exhausted
    NoMemory,

    /// Malformed option bits, enum values or arguments
    InvalidArgs,

    /// Index or depth outside the permitted range
    OutOfRange,

    /// Object is in the wrong state for the operation
    BadState,

    /// Entry already present with a conflicting value
    AlreadyExists,

    /// Slot (e.g. an exception port) already bound
    AlreadyBound,

    /// Handle lacks a required right
    AccessDenied,

    /// Handle value does not name a live handle of the caller
    BadHandle,

    /// Object is not of the requested type
    WrongType,

    /// Lookup found nothing
    NotFound,

    /// Operation is not implemented for this object
    NotSupported,

    /// I/O failure reported by a collaborator
    Io,

    /// Data integrity failure reported by a collaborator
    IoDataIntegrity,
}

impl ObjectError {
    /// Status code as seen by user mode
    pub const fn into_raw(self) -> i32 {
        match self {
            Self::NoMemory => -4,
            Self::InvalidArgs => -10,
            Self::OutOfRange => -14,
            Self::BadState => -20,
            Self::AlreadyExists => -26,
            Self::AlreadyBound => -27,
            Self::AccessDenied => -30,
            Self::BadHandle => -11,
            Self::WrongType => -12,
            Self::NotFound => -25,
            Self::NotSupported => -2,
            Self::Io => -40,
            Self::IoDataIntegrity => -42,
        }
    }

    /// Short name, matching the status constant naming
    pub const fn name(self) -> &'static str {
        match self {
            Self::NoMemory => "NO_MEMORY",
            Self::InvalidArgs => "INVALID_ARGS",
            Self::OutOfRange => "OUT_OF_RANGE",
            Self::BadState => "BAD_STATE",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::AlreadyBound => "ALREADY_BOUND",
            Self::AccessDenied => "ACCESS_DENIED",
            Self::BadHandle => "BAD_HANDLE",
            Self::WrongType => "WRONG_TYPE",
            Self::NotFound => "NOT_FOUND",
            Self::NotSupported => "NOT_SUPPORTED",
            Self::Io => "IO",
            Self::IoDataIntegrity => "IO_DATA_INTEGRITY",
        }
    }
}

impl fmt::Display for ObjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.into_raw())
    }
}

impl From<alloc::collections::TryReserveError> for ObjectError {
    fn from(_: alloc::collections::TryReserveError) -> Self {
        ObjectError::NoMemory
    }
}

/// Result type used throughout the object layer
pub type Result<T> = core::result::Result<T, ObjectError>;
