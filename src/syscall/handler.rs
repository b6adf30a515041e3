//! System Call Handler
//!
//! Dispatches system calls and implements individual syscall handlers.
//!
//! # Security Considerations
//! - Unknown syscall numbers terminate the caller abnormally
//! - Each handler validates its own arguments
//! - Only [`KernelError::Fault`] escalates beyond a -1 return

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::cmp;

use log::{debug, info, warn};

use super::validate;
use crate::error::{KernelError, KernelResult};
use crate::fs::Fd;
use crate::kernel::{Kernel, ProcessContext};
use crate::param::USER_POINTER_SIZE;
use crate::platform::Access;
use crate::proc::{ExitStatus, Pid};

/// System call numbers
pub mod numbers {
    pub const SYS_HALT: usize = 0;
    pub const SYS_EXIT: usize = 1;
    pub const SYS_EXEC: usize = 2;
    pub const SYS_JOIN: usize = 3;
    pub const SYS_CREAT: usize = 4;
    pub const SYS_OPEN: usize = 5;
    pub const SYS_READ: usize = 6;
    pub const SYS_WRITE: usize = 7;
    pub const SYS_CLOSE: usize = 8;
    pub const SYS_UNLINK: usize = 9;
}

/// How a trap finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Resume the caller with this value in the return register.
    Return(i64),
    /// The caller exited with this status; never resume it.
    Exited(i32),
    /// The caller was terminated abnormally; never resume it.
    Killed,
}

/// Dispatch a system call
///
/// # Arguments
/// * `kernel` - The kernel the caller runs under
/// * `ctx` - The calling process's context
/// * `number` - System call number
/// * `args` - Raw argument registers
///
/// # Returns
/// What the trap path must do with the caller
pub fn dispatch(
    kernel: &Arc<Kernel>,
    ctx: &mut ProcessContext,
    number: usize,
    args: [u64; 4],
) -> Completion {
    use numbers::*;

    let result = match number {
        SYS_HALT => sys_halt(kernel, ctx),
        SYS_EXIT => {
            let status = args[0] as i32;
            debug!("[SYSCALL] {}: exit({})", ctx.pid(), status);
            kernel.exit_process(ctx, ExitStatus::Normal(status));
            return Completion::Exited(status);
        }
        SYS_EXEC => sys_exec(kernel, ctx, args[0] as usize, args[1] as i32, args[2] as usize),
        SYS_JOIN => sys_join(kernel, ctx, args[0] as i32, args[1] as usize),
        SYS_CREAT => sys_open(kernel, ctx, args[0] as usize, true),
        SYS_OPEN => sys_open(kernel, ctx, args[0] as usize, false),
        SYS_READ => sys_read(kernel, ctx, args[0] as i32, args[1] as usize, args[2] as i32),
        SYS_WRITE => sys_write(kernel, ctx, args[0] as i32, args[1] as usize, args[2] as i32),
        SYS_CLOSE => sys_close(kernel, ctx, args[0] as i32),
        SYS_UNLINK => sys_unlink(kernel, ctx, args[0] as usize),
        _ => {
            warn!("[SYSCALL] {}: unknown syscall {}", ctx.pid(), number);
            kernel.exit_process(ctx, ExitStatus::Abnormal);
            return Completion::Killed;
        }
    };

    match result {
        Ok(value) => Completion::Return(value),
        Err(err) if err.is_fatal() => {
            warn!("[SYSCALL] {}: syscall {} faulted: {}", ctx.pid(), number, err);
            kernel.exit_process(ctx, ExitStatus::Abnormal);
            Completion::Killed
        }
        Err(err) => {
            debug!("[SYSCALL] {}: syscall {} failed: {}", ctx.pid(), number, err);
            Completion::Return(KernelError::SYSCALL_FAILURE)
        }
    }
}

/// Halt system call
///
/// Only the root process may stop the machine.
fn sys_halt(kernel: &Kernel, ctx: &ProcessContext) -> KernelResult<i64> {
    if ctx.pid() != Pid::ROOT {
        return Err(KernelError::InvalidArgument);
    }
    info!("[SYSCALL] halt requested by root");
    kernel.platform().scheduler.shutdown();
    Ok(0)
}

/// Exec system call
///
/// Copies the program name and `argc` argument strings out of the caller
/// and starts a child process.
fn sys_exec(
    kernel: &Arc<Kernel>,
    ctx: &mut ProcessContext,
    name_ptr: usize,
    argc: i32,
    argv: usize,
) -> KernelResult<i64> {
    let config = kernel.config();
    let argc = usize::try_from(argc).map_err(|_| KernelError::InvalidArgument)?;
    if argc > config.max_argc {
        return Err(KernelError::InvalidArgument);
    }

    let memory = ctx.memory();
    let image = validate::read_user_string(memory, name_ptr, config.max_arg_len)?;
    if image.len() <= config.executable_suffix.len() || !image.ends_with(config.executable_suffix) {
        debug!("[SYSCALL] exec: bad image name {:?}", image);
        return Err(KernelError::InvalidArgument);
    }

    let mut args = Vec::with_capacity(argc);
    for i in 0..argc {
        let slot = argv
            .checked_add(i * USER_POINTER_SIZE)
            .ok_or(KernelError::InvalidArgument)?;
        let ptr = validate::read_user_word(memory, slot)? as usize;
        args.push(validate::read_user_string(memory, ptr, config.max_arg_len)?);
    }

    let pid = kernel.create_process(&image, &args, Some(ctx.pid()))?;
    debug!("[SYSCALL] {}: exec({:?}, {:?}) = {}", ctx.pid(), image, args, pid);
    Ok(pid.as_i64())
}

/// Join system call
///
/// Waits for a child and stores its exit status through `status_ptr`.
/// Returns 1 for a clean exit and 0 for an abnormal one.
fn sys_join(
    kernel: &Kernel,
    ctx: &mut ProcessContext,
    pid: i32,
    status_ptr: usize,
) -> KernelResult<i64> {
    let status_len = core::mem::size_of::<i32>();
    validate::validate_range(ctx.memory(), status_ptr, status_len, Access::WRITE)?;

    let target = Pid::from_raw(pid).ok_or(KernelError::NotMyChild)?;
    let status = kernel
        .processes()
        .join(ctx.pid(), target, kernel.platform().scheduler.as_ref())?;

    if let ExitStatus::Normal(code) = status {
        validate::copy_to_user(ctx.memory_mut(), status_ptr, &code.to_le_bytes())?;
    }
    debug!("[SYSCALL] {}: join({}) = {:?}", ctx.pid(), target, status);
    Ok(status.join_code())
}

/// Open and creat system calls
fn sys_open(
    kernel: &Kernel,
    ctx: &mut ProcessContext,
    name_ptr: usize,
    create: bool,
) -> KernelResult<i64> {
    let name = validate::read_user_string(ctx.memory(), name_ptr, kernel.config().max_name_len)?;

    let files = kernel.files();
    let handle = if create {
        files.create_entry(&name)?
    } else {
        files.open_entry(&name)?
    };
    let fd = ctx.descriptors_mut().allocate(handle, files)?;

    debug!("[SYSCALL] {}: open({:?}) = {}", ctx.pid(), name, fd);
    Ok(fd.as_i64())
}

/// Read system call
///
/// Moves file data into the caller's buffer through a bounded kernel
/// buffer. A short physical read ends the transfer.
fn sys_read(
    kernel: &Kernel,
    ctx: &mut ProcessContext,
    fd: i32,
    buf: usize,
    count: i32,
) -> KernelResult<i64> {
    let count = validate::validate_count(count)?;
    let fd = Fd::from_raw(fd).ok_or(KernelError::BadDescriptor)?;
    if fd == Fd::STDOUT {
        return Err(KernelError::BadDescriptor);
    }
    if fd != Fd::STDIN {
        ctx.descriptors().resolve(fd)?;
    }
    validate::validate_range(ctx.memory(), buf, count, Access::WRITE)?;

    let chunk = cmp::min(count, kernel.config().transfer_chunk);
    let mut bounce = vec![0u8; chunk];

    if fd == Fd::STDIN {
        let n = cmp::min(kernel.platform().console.read(&mut bounce), bounce.len());
        ctx.memory_mut().copy_out(buf, &bounce[..n])?;
        return Ok(n as i64);
    }

    let (fdt, memory) = ctx.split_mut();
    let handle = fdt.resolve(fd)?;
    let mut done = 0;
    while done < count {
        let want = cmp::min(count - done, chunk);
        let n = match handle.read(&mut bounce[..want]) {
            Ok(n) => n,
            Err(err) if done == 0 => return Err(err),
            Err(_) => break,
        };
        if n == 0 {
            break;
        }
        memory.copy_out(buf + done, &bounce[..n])?;
        done += n;
        if n < want {
            break;
        }
    }
    Ok(done as i64)
}

/// Write system call
///
/// Copies the caller's buffer out in bounded chunks. A negative count is
/// rejected before anything moves.
fn sys_write(
    kernel: &Kernel,
    ctx: &mut ProcessContext,
    fd: i32,
    buf: usize,
    count: i32,
) -> KernelResult<i64> {
    let count = validate::validate_count(count)?;
    let fd = Fd::from_raw(fd).ok_or(KernelError::BadDescriptor)?;
    if fd == Fd::STDIN {
        return Err(KernelError::BadDescriptor);
    }
    if fd != Fd::STDOUT {
        ctx.descriptors().resolve(fd)?;
    }
    validate::validate_range(ctx.memory(), buf, count, Access::READ)?;

    let chunk = cmp::min(count, kernel.config().transfer_chunk);
    let mut bounce = vec![0u8; chunk];
    let (fdt, memory) = ctx.split_mut();

    let mut done = 0;
    while done < count {
        let want = cmp::min(count - done, chunk);
        memory.copy_in(buf + done, &mut bounce[..want])?;
        let n = if fd == Fd::STDOUT {
            kernel.platform().console.write(&bounce[..want])
        } else {
            match fdt.resolve(fd)?.write(&bounce[..want]) {
                Ok(n) => n,
                Err(err) if done == 0 => return Err(err),
                Err(_) => break,
            }
        };
        done += n;
        if n < want {
            break;
        }
    }
    Ok(done as i64)
}

/// Close system call
fn sys_close(kernel: &Kernel, ctx: &mut ProcessContext, fd: i32) -> KernelResult<i64> {
    let fd = Fd::from_raw(fd).ok_or(KernelError::BadDescriptor)?;
    ctx.descriptors_mut().close(fd, kernel.files())?;
    debug!("[SYSCALL] {}: close({})", ctx.pid(), fd);
    Ok(0)
}

/// Unlink system call
///
/// Succeeds whenever the file existed; the delete itself waits for the
/// last open descriptor to close.
fn sys_unlink(kernel: &Kernel, ctx: &mut ProcessContext, name_ptr: usize) -> KernelResult<i64> {
    let name = validate::read_user_string(ctx.memory(), name_ptr, kernel.config().max_name_len)?;
    kernel.files().mark_pending_delete(&name)?;
    debug!("[SYSCALL] {}: unlink({:?})", ctx.pid(), name);
    Ok(0)
}
