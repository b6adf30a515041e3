//! Scheduler and loader collaborators.

use alloc::boxed::Box;
use alloc::string::String;
use core::fmt;

use super::memory::AddressSpace;
use crate::error::KernelResult;
use crate::proc::Pid;

/// Work handed to the scheduler for a new process.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// The thread scheduler.
///
/// # Park Tokens
/// `park` and `unpark` follow token semantics: an `unpark` delivered before
/// the matching `park` makes that `park` return immediately. `park` may also
/// return spuriously; callers re-check their condition.
pub trait Scheduler: Send + Sync {
    /// Start running `task` as the execution context of `pid`.
    fn spawn(&self, pid: Pid, task: Task) -> KernelResult<()>;

    /// Suspend the calling context of `pid` until a token arrives.
    fn park(&self, pid: Pid);

    /// Deliver a wakeup token to `pid`.
    fn unpark(&self, pid: Pid);

    /// `pid` will never run again.
    fn finish(&self, pid: Pid);

    /// Stop the machine.
    fn shutdown(&self);
}

/// Processor exceptions other than syscalls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    /// Unmapped or protected page.
    PageFault { vaddr: usize },
    /// Misaligned access.
    AddressError { vaddr: usize },
    /// Bus error.
    BusError { vaddr: usize },
    /// Arithmetic overflow.
    Overflow,
    /// Undecodable instruction.
    IllegalInstruction,
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PageFault { vaddr } => write!(f, "page fault at 0x{:x}", vaddr),
            Self::AddressError { vaddr } => write!(f, "address error at 0x{:x}", vaddr),
            Self::BusError { vaddr } => write!(f, "bus error at 0x{:x}", vaddr),
            Self::Overflow => write!(f, "arithmetic overflow"),
            Self::IllegalInstruction => write!(f, "illegal instruction"),
        }
    }
}

/// Why a user instruction stream stopped before returning from `main`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The `exit` syscall completed; the process is already a zombie.
    Exited(i32),
    /// The kernel terminated the process abnormally.
    Killed,
    /// The processor raised an exception the kernel does not service.
    Exception(Exception),
}

/// A loaded program's instruction stream.
pub trait UserProgram: Send {
    /// Run until `main` returns (`Ok(status)`) or the stream stops.
    ///
    /// Every trap goes through `cpu`. Once a trap reports a
    /// [`Termination`] the program must stop and hand it back.
    fn run(self: Box<Self>, cpu: &mut dyn TrapGate) -> Result<i32, Termination>;
}

/// The trap interface a running program sees.
pub trait TrapGate {
    /// The process issuing traps.
    fn pid(&self) -> Pid;

    /// Trap into the kernel with a syscall.
    fn syscall(&mut self, number: usize, args: [u64; 4]) -> Result<i64, Termination>;

    /// The program's own address space, for ordinary loads and stores.
    fn memory(&mut self) -> &mut dyn AddressSpace;
}

/// An executable image mapped and ready to run.
pub struct LoadedImage {
    /// Entry point.
    pub program: Box<dyn UserProgram>,
    /// Address space holding the image, stack and arguments.
    pub memory: Box<dyn AddressSpace>,
}

/// The executable loader.
pub trait Loader: Send + Sync {
    /// Parse `image`, map it, and lay out `args` for the new program.
    ///
    /// Fails with [`crate::KernelError::LoadFailure`] on a bad image or
    /// when memory runs out.
    fn load(&self, image: &str, args: &[String]) -> KernelResult<LoadedImage>;
}
