//! File Descriptor Table
//!
//! Per-process mapping from small integers to open file handles.
//!
//! # Design
//! - Fixed number of slots, sized once when the process is created
//! - Slots 0 and 1 belong to the console and are never allocated
//! - Allocation always picks the lowest free slot
//! - Only the owning process mutates its table, so there is no lock here

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;

use log::debug;

use super::oft::{FileHandle, OpenFileTable};
use crate::error::{KernelError, KernelResult};

/// A file descriptor number.
///
/// Newtype so raw syscall integers are checked before they index a table.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
#[repr(transparent)]
pub struct Fd(u32);

impl Fd {
    /// Console input.
    pub const STDIN: Self = Self(0);

    /// Console output.
    pub const STDOUT: Self = Self(1);

    /// First descriptor handed out by `open`.
    pub const FIRST_USER: Self = Self(2);

    /// Convert a raw syscall argument. Negative values are rejected.
    #[inline]
    pub fn from_raw(raw: i32) -> Option<Self> {
        u32::try_from(raw).ok().map(Self)
    }

    /// Slot index.
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Value returned to user mode.
    #[inline]
    pub const fn as_i64(self) -> i64 {
        self.0 as i64
    }

    /// Whether this is one of the console descriptors.
    #[inline]
    pub const fn is_reserved(self) -> bool {
        self.0 < Self::FIRST_USER.0
    }
}

impl fmt::Display for Fd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A process's descriptor table.
pub struct FileDescriptorTable {
    slots: Box<[Option<FileHandle>]>,
}

impl FileDescriptorTable {
    /// Create a table with `capacity` slots, the console pair included.
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots: slots.into_boxed_slice(),
        }
    }

    /// Total slots, reserved ones included.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Bind `handle` to the lowest free descriptor.
    ///
    /// On a full table the handle goes back to `oft` so the entry does
    /// not leak.
    pub fn allocate(&mut self, handle: FileHandle, oft: &OpenFileTable) -> KernelResult<Fd> {
        let free = (Fd::FIRST_USER.index()..self.slots.len()).find(|&i| self.slots[i].is_none());
        match free {
            Some(index) => {
                debug!("[FDT] fd {} -> {:?}", index, handle);
                self.slots[index] = Some(handle);
                Ok(Fd(index as u32))
            }
            None => {
                oft.release(handle);
                Err(KernelError::TableFull)
            }
        }
    }

    /// Look up the handle bound to `fd`.
    pub fn resolve(&self, fd: Fd) -> KernelResult<&FileHandle> {
        if fd.is_reserved() {
            return Err(KernelError::BadDescriptor);
        }
        self.slots
            .get(fd.index())
            .and_then(Option::as_ref)
            .ok_or(KernelError::BadDescriptor)
    }

    /// Unbind `fd` and release its entry.
    pub fn close(&mut self, fd: Fd, oft: &OpenFileTable) -> KernelResult<()> {
        if fd.is_reserved() {
            return Err(KernelError::BadDescriptor);
        }
        let handle = self
            .slots
            .get_mut(fd.index())
            .and_then(Option::take)
            .ok_or(KernelError::BadDescriptor)?;
        debug!("[FDT] close fd {} ({:?})", fd, handle);
        oft.release(handle);
        Ok(())
    }

    /// Release every bound slot in ascending order. A second call finds
    /// nothing left to do.
    pub fn close_all(&mut self, oft: &OpenFileTable) {
        for slot in self.slots.iter_mut() {
            if let Some(handle) = slot.take() {
                oft.release(handle);
            }
        }
    }

    /// Number of bound descriptors.
    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

impl fmt::Debug for FileDescriptorTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.slots
                    .iter()
                    .enumerate()
                    .filter_map(|(i, s)| s.as_ref().map(|h| (i, h))),
            )
            .finish()
    }
}
