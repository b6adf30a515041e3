//! PantherOS Process Core
//!
//! The process table and file descriptor manager consulted by the kernel's
//! syscall dispatcher on every user-mode trap.
//!
//! # Components
//! - Open File Table: system-wide, reference counted, deferred unlink
//! - File Descriptor Table: per-process fixed slots, lowest-free allocation
//! - Process Table: PCB arena, parent/child links, one-shot join
//! - Syscall Dispatcher: maps traps onto the tables and the platform
//!
//! # Platform Boundary
//! The scheduler, address translation, physical file system, program loader
//! and console are collaborators behind the traits in [`platform`]. The core
//! only ever sees validated byte buffers and file names.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

pub mod error;
pub mod fs;
pub mod kernel;
pub mod param;
pub mod platform;
pub mod proc;
pub mod syscall;

#[cfg(test)]
mod testing;

pub use error::{KernelError, KernelResult};
pub use kernel::{Kernel, ProcessContext};
pub use param::KernelConfig;
pub use proc::{ExitStatus, Pid};
