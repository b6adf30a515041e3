//! Process management for the process core
//!
//! - [`ProcessControlBlock`]: one process's identity, links and exit status
//! - [`ProcessTable`]: the PCB arena, PID allocation, exit and join
//!
//! Parent and child links are PID values resolved through the arena on
//! every access, never pointers, so a reaped PCB leaves nothing dangling.

mod pcb;
mod table;

pub use pcb::{ExitStatus, Pid, ProcessControlBlock, ProcessState};
pub use table::{ExitNotice, ProcessTable};
