//! Address translation collaborator.

use bitflags::bitflags;

use crate::error::KernelResult;

bitflags! {
    /// How the kernel intends to touch a user range.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Access: u8 {
        /// Kernel copies out of user memory (`write`, names, argv).
        const READ = 1 << 0;
        /// Kernel copies into user memory (`read`, join status).
        const WRITE = 1 << 1;
    }
}

/// A process's user address space as seen through the MMU.
///
/// Copies are all-or-nothing: an implementation must never transfer a
/// prefix of a range and then report failure.
pub trait AddressSpace: Send {
    /// Number of leading bytes of `[vaddr, vaddr + len)` mapped with `access`.
    fn accessible(&self, vaddr: usize, len: usize, access: Access) -> usize;

    /// Copy `buf.len()` bytes from user `vaddr` into `buf`.
    fn copy_in(&self, vaddr: usize, buf: &mut [u8]) -> KernelResult<()>;

    /// Copy `data` to user `vaddr`.
    fn copy_out(&mut self, vaddr: usize, data: &[u8]) -> KernelResult<()>;
}
