//! Kernel error type.
//!
//! A small, closed set of error kinds rather than one variant per call
//! site: every fallible kernel operation maps its failure onto one of
//! these, which keeps the propagation policy in one place instead of
//! scattered through each subsystem.

use core::fmt;

/// Error kind returned by kernel operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// Frame, page-table, or heap allocation failed.
    OutOfMemory { requested: usize, available: usize },
    /// Misaligned mmap arguments, unknown mmap flags, seek past end, or
    /// similar malformed caller input.
    InvalidArgument { what: &'static str },
    /// User accessed kernel memory, faulted on an unmapped address, or a
    /// demand-paged file read could not be satisfied.
    BadFault { addr: usize },
    /// Attempt to execute a file lacking execute permission.
    NoPermission,
    /// `wait()` called by a process with no children.
    NoChildren,
    /// Kernel-mode access violation, unknown syscall, context switch with
    /// an empty run queue, or a corrupted invariant. Never returned to
    /// user code: callers that detect this condition panic directly.
    Panic { reason: &'static str },
}

pub type KernelResult<T> = Result<T, KernelError>;

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory {
                requested,
                available,
            } => write!(
                f,
                "out of memory: requested {requested} bytes, {available} available"
            ),
            Self::InvalidArgument { what } => write!(f, "invalid argument: {what}"),
            Self::BadFault { addr } => write!(f, "access violation at {addr:#x}"),
            Self::NoPermission => write!(f, "permission denied"),
            Self::NoChildren => write!(f, "no child processes"),
            Self::Panic { reason } => write!(f, "fatal: {reason}"),
        }
    }
}

impl KernelError {
    /// Syscall-convention negative return value for this error, per §6.
    pub const fn to_errno(self) -> isize {
        match self {
            Self::OutOfMemory { .. } => -1,
            Self::InvalidArgument { .. } => -2,
            Self::BadFault { .. } => -3,
            Self::NoPermission => -4,
            Self::NoChildren => -5,
            Self::Panic { .. } => -6,
        }
    }
}

/// Build a [`KernelError`] without repeating `KernelError::` at call sites.
#[macro_export]
macro_rules! kernel_error {
    (OutOfMemory { requested: $req:expr, available: $avail:expr }) => {
        $crate::error::KernelError::OutOfMemory {
            requested: $req,
            available: $avail,
        }
    };
    (InvalidArgument { $what:expr }) => {
        $crate::error::KernelError::InvalidArgument { what: $what }
    };
    (BadFault { addr: $addr:expr }) => {
        $crate::error::KernelError::BadFault { addr: $addr }
    };
    (Panic { $reason:expr }) => {
        $crate::error::KernelError::Panic { reason: $reason }
    };
    ($variant:ident) => {
        $crate::error::KernelError::$variant
    };
}
