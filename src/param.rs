//! Kernel Parameters
//!
//! Fixed limits of the process core. The defaults match the sizes user
//! programs are built against; an embedder may tighten them.

use core::fmt;

/// Descriptors per process, including the two console descriptors.
pub const MAX_FILES: usize = 16;

/// Longest argument string accepted by `exec`, excluding the NUL.
pub const MAX_ARG_LEN: usize = 256;

/// Longest file name accepted by `open`, `creat` and `unlink`.
pub const MAX_NAME_LEN: usize = 255;

/// Most arguments `exec` will copy in.
pub const MAX_ARGC: usize = 16;

/// Size of one user pointer in an `argv` array.
pub const USER_POINTER_SIZE: usize = 4;

/// Size of the bounce buffer used for file transfers.
pub const TRANSFER_CHUNK: usize = 1024;

/// Executables must carry this suffix.
pub const EXECUTABLE_SUFFIX: &str = ".coff";

/// Tunable kernel limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelConfig {
    /// Descriptor slots per process (two are reserved for the console).
    pub max_files: usize,
    /// PCBs held at once, zombies included.
    pub max_processes: usize,
    /// Open file entries system-wide.
    pub max_open_files: usize,
    /// Longest file name.
    pub max_name_len: usize,
    /// Longest `exec` argument.
    pub max_arg_len: usize,
    /// Most `exec` arguments.
    pub max_argc: usize,
    /// Bounce buffer size for `read`/`write`.
    pub transfer_chunk: usize,
    /// Required executable suffix.
    pub executable_suffix: &'static str,
}

impl KernelConfig {
    /// Check that the limits describe a usable kernel.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_files <= crate::fs::Fd::FIRST_USER.index() {
            return Err(ConfigError::NoUserDescriptors);
        }
        if self.max_processes == 0 {
            return Err(ConfigError::NoProcesses);
        }
        if self.max_open_files == 0 {
            return Err(ConfigError::NoOpenFiles);
        }
        if self.transfer_chunk == 0 {
            return Err(ConfigError::ZeroTransferChunk);
        }
        if self.max_name_len == 0 || self.max_arg_len == 0 {
            return Err(ConfigError::ZeroStringLimit);
        }
        Ok(())
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            max_files: MAX_FILES,
            max_processes: 64,
            max_open_files: 256,
            max_name_len: MAX_NAME_LEN,
            max_arg_len: MAX_ARG_LEN,
            max_argc: MAX_ARGC,
            transfer_chunk: TRANSFER_CHUNK,
            executable_suffix: EXECUTABLE_SUFFIX,
        }
    }
}

/// Rejected configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// No descriptor slots remain after the console pair.
    NoUserDescriptors,
    /// The process table cannot hold a single process.
    NoProcesses,
    /// The open file table cannot hold a single entry.
    NoOpenFiles,
    /// Transfers would never make progress.
    ZeroTransferChunk,
    /// A name or argument limit of zero.
    ZeroStringLimit,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoUserDescriptors => write!(f, "max_files leaves no user descriptors"),
            Self::NoProcesses => write!(f, "max_processes must be non-zero"),
            Self::NoOpenFiles => write!(f, "max_open_files must be non-zero"),
            Self::ZeroTransferChunk => write!(f, "transfer_chunk must be non-zero"),
            Self::ZeroStringLimit => write!(f, "string limits must be non-zero"),
        }
    }
}
