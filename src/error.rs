//! Kernel Error Types
//!
//! Every core operation reports failure through [`KernelError`]. The
//! dispatcher is the only place these are turned into syscall return values.

use core::fmt;

/// Errors produced by the process and file tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Unknown, closed or reserved file descriptor.
    BadDescriptor,
    /// No such file.
    NotFound,
    /// Descriptor table, open file table or process table exhausted.
    TableFull,
    /// Join target is not a child of the caller.
    NotMyChild,
    /// The executable image could not be loaded.
    LoadFailure,
    /// Negative count, oversized name or a partially mapped user range.
    InvalidArgument,
    /// The physical file system reported an I/O error.
    Io,
    /// A user pointer with no mapping at all. Kills the caller.
    Fault {
        /// The untranslatable user address.
        vaddr: usize,
    },
}

impl KernelError {
    /// Value returned to user mode for a failed syscall.
    pub const SYSCALL_FAILURE: i64 = -1;

    /// Whether this error terminates the calling process instead of
    /// returning to it.
    #[inline]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Fault { .. })
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadDescriptor => write!(f, "bad file descriptor"),
            Self::NotFound => write!(f, "no such file"),
            Self::TableFull => write!(f, "table full"),
            Self::NotMyChild => write!(f, "not a child of the caller"),
            Self::LoadFailure => write!(f, "executable could not be loaded"),
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::Io => write!(f, "file system i/o error"),
            Self::Fault { vaddr } => write!(f, "bad user address 0x{:x}", vaddr),
        }
    }
}

/// Result alias used throughout the core.
pub type KernelResult<T> = Result<T, KernelError>;
