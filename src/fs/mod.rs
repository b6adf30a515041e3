//! File management for the process core
//!
//! Two layers:
//! - [`OpenFileTable`]: one system-wide registry of physically open files
//! - [`FileDescriptorTable`]: one per process, small integers to handles
//!
//! # Ownership
//! A [`FileHandle`] is owned by exactly one descriptor slot. Closing moves
//! the handle out of the slot and into [`OpenFileTable::release`], so a
//! closed descriptor cannot reach the file again.

mod fdt;
mod oft;

pub use fdt::{Fd, FileDescriptorTable};
pub use oft::{FileHandle, FileId, OpenFileTable};
