//! Process Table
//!
//! Arena of PCBs keyed by PID.
//!
//! # Locking
//! One lock covers every state transition and every child-set edit, so
//! `exit` and `join` always agree on who reaps whom.
//!
//! # Reclamation
//! A PCB is dropped when its parent joins it, or as soon as nobody can:
//! - a parentless process drops its own PCB when it exits
//! - an exiting parent drops its zombie children and orphans the rest

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use core::mem;

use log::{debug, info};
use spin::Mutex;

use super::pcb::{ExitStatus, Pid, ProcessControlBlock, ProcessState};
use crate::error::{KernelError, KernelResult};
use crate::platform::Scheduler;

/// What the caller of [`ProcessTable::record_exit`] still has to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitNotice {
    /// Parent parked in `join` on the exiting process.
    pub waiter: Option<Pid>,
    /// No running process is left.
    pub last: bool,
}

struct ProcessTableInner {
    pcbs: BTreeMap<Pid, ProcessControlBlock>,
    next_pid: u32,
    live: usize,
}

/// The global process table.
pub struct ProcessTable {
    capacity: usize,
    inner: Mutex<ProcessTableInner>,
}

impl ProcessTable {
    /// Create an empty table holding at most `capacity` PCBs.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(ProcessTableInner {
                pcbs: BTreeMap::new(),
                next_pid: Pid::ROOT.as_u32(),
                live: 0,
            }),
        }
    }

    /// Register a new running process as a child of `parent`.
    ///
    /// `parent == None` is only valid for the very first process.
    pub fn create_process(&self, image: &str, parent: Option<Pid>) -> KernelResult<Pid> {
        let mut inner = self.inner.lock();

        if inner.pcbs.len() >= self.capacity {
            return Err(KernelError::TableFull);
        }
        match parent {
            Some(ppid) => {
                let running = inner
                    .pcbs
                    .get(&ppid)
                    .map_or(false, |p| p.state == ProcessState::Running);
                if !running {
                    return Err(KernelError::InvalidArgument);
                }
            }
            None if inner.next_pid != Pid::ROOT.as_u32() => {
                return Err(KernelError::InvalidArgument);
            }
            None => {}
        }

        let pid = Pid::new(inner.next_pid);
        inner.next_pid = inner
            .next_pid
            .checked_add(1)
            .ok_or(KernelError::TableFull)?;

        inner
            .pcbs
            .insert(pid, ProcessControlBlock::new(pid, String::from(image), parent));
        if let Some(ppid) = parent {
            if let Some(p) = inner.pcbs.get_mut(&ppid) {
                p.children.insert(pid);
            }
        }
        inner.live += 1;

        debug!("[PROCESS] created {} ({:?}) parent {:?}", pid, image, parent);
        Ok(pid)
    }

    /// Undo [`Self::create_process`] for a process that never ran.
    pub fn discard(&self, pid: Pid) {
        let mut inner = self.inner.lock();
        let Some(pcb) = inner.pcbs.remove(&pid) else {
            return;
        };
        if pcb.state == ProcessState::Running {
            inner.live -= 1;
        }
        if let Some(p) = pcb.parent.and_then(|ppid| inner.pcbs.get_mut(&ppid)) {
            p.children.remove(&pid);
        }
    }

    /// Move `pid` from Running to Zombie with `status`.
    ///
    /// Returns `None` if the process had already exited. The caller must
    /// tear down the descriptor table and unpark [`ExitNotice::waiter`].
    pub fn record_exit(&self, pid: Pid, status: ExitStatus) -> Option<ExitNotice> {
        let mut inner = self.inner.lock();

        let pcb = inner.pcbs.get_mut(&pid)?;
        if pcb.state != ProcessState::Running {
            return None;
        }
        pcb.state = ProcessState::Zombie;
        pcb.exit_status = Some(status);
        let waiter = pcb.waiter.take();
        let parent = pcb.parent;
        let children = mem::take(&mut pcb.children);
        inner.live -= 1;

        for child in children {
            let zombie = match inner.pcbs.get_mut(&child) {
                Some(c) if c.state == ProcessState::Zombie => true,
                Some(c) => {
                    c.parent = None;
                    false
                }
                None => false,
            };
            if zombie {
                debug!("[PROCESS] sweeping unjoined zombie {}", child);
                inner.pcbs.remove(&child);
            }
        }

        if parent.is_none() {
            inner.pcbs.remove(&pid);
        }

        info!("[PROCESS] {} exited: {:?}", pid, status);
        Some(ExitNotice {
            waiter,
            last: inner.live == 0,
        })
    }

    /// Collect the exit status of `target` on behalf of `caller`.
    ///
    /// Fails with `NotMyChild` unless `target` is currently a child of
    /// `caller`. A running child is waited for by parking `caller` until
    /// the child's exit unparks it.
    pub fn join(
        &self,
        caller: Pid,
        target: Pid,
        scheduler: &dyn Scheduler,
    ) -> KernelResult<ExitStatus> {
        loop {
            {
                let mut inner = self.inner.lock();

                let is_child = inner
                    .pcbs
                    .get(&caller)
                    .map_or(false, |p| p.children.contains(&target));
                if !is_child {
                    return Err(KernelError::NotMyChild);
                }

                let child = inner
                    .pcbs
                    .get_mut(&target)
                    .ok_or(KernelError::NotMyChild)?;
                let state = child.state;
                match state {
                    ProcessState::Zombie => {
                        let status = child.exit_status.unwrap_or(ExitStatus::Abnormal);
                        inner.pcbs.remove(&target);
                        if let Some(p) = inner.pcbs.get_mut(&caller) {
                            p.children.remove(&target);
                        }
                        debug!("[PROCESS] {} reaped {}: {:?}", caller, target, status);
                        return Ok(status);
                    }
                    ProcessState::Running => child.waiter = Some(caller),
                    ProcessState::Reaped => return Err(KernelError::NotMyChild),
                }
            }

            debug!("[PROCESS] {} waiting for {}", caller, target);
            scheduler.park(caller);
        }
    }

    /// Run `f` against the PCB of `pid`, if it is still held.
    pub fn inspect<R>(&self, pid: Pid, f: impl FnOnce(&ProcessControlBlock) -> R) -> Option<R> {
        self.inner.lock().pcbs.get(&pid).map(f)
    }

    /// Current state of `pid`. Issued PIDs with no PCB read as `Reaped`.
    pub fn state(&self, pid: Pid) -> Option<ProcessState> {
        let inner = self.inner.lock();
        match inner.pcbs.get(&pid) {
            Some(pcb) => Some(pcb.state()),
            None if pid.as_u32() < inner.next_pid => Some(ProcessState::Reaped),
            None => None,
        }
    }

    /// Children of `pid` in ascending order.
    pub fn children(&self, pid: Pid) -> Vec<Pid> {
        self.inspect(pid, |p| p.children().collect())
            .unwrap_or_default()
    }

    /// PCBs currently held, zombies included.
    pub fn len(&self) -> usize {
        self.inner.lock().pcbs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Processes still running.
    pub fn live_count(&self) -> usize {
        self.inner.lock().live
    }
}
