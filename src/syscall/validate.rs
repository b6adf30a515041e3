//! System Call Input Validation
//!
//! Every user pointer and count is checked here before the core acts on it.
//!
//! # Argument Classes
//! - Negative counts and out-of-range descriptors: the syscall returns -1
//! - A range whose first byte is mapped but whose tail is not: -1, nothing
//!   is transferred
//! - A pointer with no mapping at all: [`KernelError::Fault`], which
//!   terminates the caller
//!
//! Data is always copied into kernel buffers before use, so a process
//! cannot change it underneath the kernel.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use crate::error::{KernelError, KernelResult};
use crate::param::USER_POINTER_SIZE;
use crate::platform::{Access, AddressSpace};

/// Validate a syscall byte count.
pub fn validate_count(count: i32) -> KernelResult<usize> {
    usize::try_from(count).map_err(|_| KernelError::InvalidArgument)
}

/// Check that all of `[vaddr, vaddr + len)` is mapped for `access`.
///
/// Zero-length ranges are always valid, whatever the pointer.
pub fn validate_range(
    memory: &dyn AddressSpace,
    vaddr: usize,
    len: usize,
    access: Access,
) -> KernelResult<()> {
    if len == 0 {
        return Ok(());
    }
    if vaddr.checked_add(len).is_none() {
        return Err(KernelError::InvalidArgument);
    }

    match memory.accessible(vaddr, len, access) {
        0 => Err(KernelError::Fault { vaddr }),
        n if n < len => Err(KernelError::InvalidArgument),
        _ => Ok(()),
    }
}

/// Copy `len` bytes out of user memory.
pub fn copy_from_user(memory: &dyn AddressSpace, vaddr: usize, len: usize) -> KernelResult<Vec<u8>> {
    validate_range(memory, vaddr, len, Access::READ)?;
    let mut buf = vec![0u8; len];
    memory.copy_in(vaddr, &mut buf)?;
    Ok(buf)
}

/// Copy `data` into user memory.
pub fn copy_to_user(memory: &mut dyn AddressSpace, vaddr: usize, data: &[u8]) -> KernelResult<()> {
    validate_range(memory, vaddr, data.len(), Access::WRITE)?;
    memory.copy_out(vaddr, data)
}

/// Read one 32-bit little-endian user word, as found in `argv` arrays.
pub fn read_user_word(memory: &dyn AddressSpace, vaddr: usize) -> KernelResult<u32> {
    let bytes = copy_from_user(memory, vaddr, USER_POINTER_SIZE)?;
    let mut word = [0u8; USER_POINTER_SIZE];
    word.copy_from_slice(&bytes);
    Ok(u32::from_le_bytes(word))
}

/// Read a NUL-terminated string of at most `max_len` bytes.
///
/// A missing terminator within `max_len + 1` bytes, a string that runs off
/// the mapping, or invalid UTF-8 is an invalid argument.
pub fn read_user_string(
    memory: &dyn AddressSpace,
    vaddr: usize,
    max_len: usize,
) -> KernelResult<String> {
    if memory.accessible(vaddr, 1, Access::READ) == 0 {
        return Err(KernelError::Fault { vaddr });
    }

    let window = memory.accessible(vaddr, max_len.saturating_add(1), Access::READ);
    let mut bytes = vec![0u8; window];
    memory.copy_in(vaddr, &mut bytes)?;

    let len = bytes
        .iter()
        .position(|&b| b == 0)
        .ok_or(KernelError::InvalidArgument)?;
    bytes.truncate(len);

    String::from_utf8(bytes).map_err(|_| KernelError::InvalidArgument)
}
