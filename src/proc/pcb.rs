//! Process Control Block

use alloc::collections::BTreeSet;
use alloc::string::String;
use core::fmt;

/// A process identifier.
///
/// Assigned in increasing order and never reused.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(transparent)]
pub struct Pid(u32);

impl Pid {
    /// The first process, started by the kernel itself.
    pub const ROOT: Self = Self(0);

    /// Wrap a raw identifier.
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Convert a raw syscall argument. Negative values are rejected.
    #[inline]
    pub fn from_raw(raw: i32) -> Option<Self> {
        u32::try_from(raw).ok().map(Self)
    }

    /// Raw identifier value.
    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Value returned to user mode.
    #[inline]
    pub const fn as_i64(self) -> i64 {
        self.0 as i64
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a process ended.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ExitStatus {
    /// Called `exit(status)` or returned `status` from `main`.
    Normal(i32),
    /// Killed by a fault or an unserviceable trap.
    Abnormal,
}

impl ExitStatus {
    /// Value `join` returns: `1` for a clean exit, `0` otherwise.
    #[inline]
    pub const fn join_code(self) -> i64 {
        match self {
            Self::Normal(_) => 1,
            Self::Abnormal => 0,
        }
    }
}

/// Lifecycle state.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ProcessState {
    /// Schedulable.
    Running,
    /// Exited; status kept until the parent joins.
    Zombie,
    /// Status collected or abandoned; the PCB is gone.
    Reaped,
}

/// Kernel record of one process.
#[derive(Debug)]
pub struct ProcessControlBlock {
    pub(super) pid: Pid,
    pub(super) image: String,
    pub(super) parent: Option<Pid>,
    pub(super) children: BTreeSet<Pid>,
    pub(super) state: ProcessState,
    pub(super) exit_status: Option<ExitStatus>,
    /// Parent parked in `join` on this process.
    pub(super) waiter: Option<Pid>,
}

impl ProcessControlBlock {
    pub(super) fn new(pid: Pid, image: String, parent: Option<Pid>) -> Self {
        Self {
            pid,
            image,
            parent,
            children: BTreeSet::new(),
            state: ProcessState::Running,
            exit_status: None,
            waiter: None,
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Executable the process was started from.
    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn parent(&self) -> Option<Pid> {
        self.parent
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Only set once the process has left `Running`.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    pub fn children(&self) -> impl Iterator<Item = Pid> + '_ {
        self.children.iter().copied()
    }
}
