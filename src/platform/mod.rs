//! Platform collaborators for the process core
//!
//! The core never touches hardware, raw user memory or disk blocks itself.
//! Each of those concerns sits behind one narrow trait here:
//! - [`FileSystem`] / [`PhysicalFile`]: named files with an implicit cursor
//! - [`Console`]: the byte stream behind descriptors 0 and 1
//! - [`AddressSpace`]: validated copies between user and kernel memory
//! - [`Scheduler`]: spawn, park/unpark, shutdown
//! - [`Loader`] / [`UserProgram`]: executable images and their instruction stream
//!
//! All implementations must fail cleanly on invalid input; none may panic.

mod fs;
mod memory;
mod sched;

pub use fs::{Console, FileSystem, PhysicalFile};
pub use memory::{Access, AddressSpace};
pub use sched::{
    Exception, LoadedImage, Loader, Scheduler, Task, Termination, TrapGate, UserProgram,
};

use alloc::sync::Arc;

/// The set of collaborators a [`crate::Kernel`] is wired to.
#[derive(Clone)]
pub struct Platform {
    /// Physical file system.
    pub filesystem: Arc<dyn FileSystem>,
    /// Program loader.
    pub loader: Arc<dyn Loader>,
    /// Thread scheduler.
    pub scheduler: Arc<dyn Scheduler>,
    /// Console device for descriptors 0 and 1.
    pub console: Arc<dyn Console>,
}
