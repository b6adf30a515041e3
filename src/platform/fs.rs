//! File system and console collaborators.

use alloc::boxed::Box;

use crate::error::KernelResult;

/// The physical file system, addressed by flat file names.
pub trait FileSystem: Send + Sync {
    /// Open `name`, creating an empty file first when `create` is set.
    ///
    /// Returns `None` if the file does not exist (and was not created).
    fn open(&self, name: &str, create: bool) -> Option<Box<dyn PhysicalFile>>;

    /// Delete `name`. Returns `false` if there was no such file.
    fn remove(&self, name: &str) -> bool;

    /// Check whether `name` exists.
    fn exists(&self, name: &str) -> bool;
}

/// One physically open file with its own cursor.
///
/// Dropping the object closes it.
pub trait PhysicalFile: Send {
    /// Read at the cursor. `Ok(0)` means end of file.
    fn read(&mut self, buf: &mut [u8]) -> KernelResult<usize>;

    /// Write at the cursor, returning the number of bytes stored.
    fn write(&mut self, data: &[u8]) -> KernelResult<usize>;
}

/// Console byte stream behind the reserved descriptors.
pub trait Console: Send + Sync {
    /// Read whatever input is available, up to `buf.len()` bytes.
    fn read(&self, buf: &mut [u8]) -> usize;

    /// Write `data`, returning the number of bytes accepted.
    fn write(&self, data: &[u8]) -> usize;
}
