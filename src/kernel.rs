//! Kernel Context
//!
//! Owns the process table, the open file table and the platform
//! collaborators, and runs each process's instruction stream.
//!
//! # Ownership
//! - [`Kernel`] is shared by every process through an `Arc`
//! - [`ProcessContext`] belongs to exactly one process's execution context
//!   and carries its descriptor table and address space, so neither needs
//!   a lock

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;

use log::{info, warn};

use crate::error::{KernelError, KernelResult};
use crate::fs::{FileDescriptorTable, OpenFileTable};
use crate::param::{ConfigError, KernelConfig};
use crate::platform::{
    AddressSpace, Exception, LoadedImage, Platform, Termination, TrapGate, UserProgram,
};
use crate::proc::{ExitStatus, Pid, ProcessTable};
use crate::syscall::{self, Completion};

/// Per-process state owned by the process's own execution context.
pub struct ProcessContext {
    pid: Pid,
    fdt: FileDescriptorTable,
    memory: Box<dyn AddressSpace>,
}

impl ProcessContext {
    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn descriptors(&self) -> &FileDescriptorTable {
        &self.fdt
    }

    pub fn descriptors_mut(&mut self) -> &mut FileDescriptorTable {
        &mut self.fdt
    }

    pub fn memory(&self) -> &dyn AddressSpace {
        self.memory.as_ref()
    }

    pub fn memory_mut(&mut self) -> &mut dyn AddressSpace {
        self.memory.as_mut()
    }

    /// Borrow the descriptor table and the address space together.
    pub fn split_mut(&mut self) -> (&FileDescriptorTable, &mut dyn AddressSpace) {
        (&self.fdt, self.memory.as_mut())
    }
}

/// The process core.
pub struct Kernel {
    config: KernelConfig,
    processes: ProcessTable,
    files: OpenFileTable,
    platform: Platform,
}

impl Kernel {
    /// Build a kernel over `platform`.
    pub fn new(config: KernelConfig, platform: Platform) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        Ok(Arc::new(Self {
            processes: ProcessTable::new(config.max_processes),
            files: OpenFileTable::new(Arc::clone(&platform.filesystem), config.max_open_files),
            config,
            platform,
        }))
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn processes(&self) -> &ProcessTable {
        &self.processes
    }

    pub fn files(&self) -> &OpenFileTable {
        &self.files
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// Start the root process.
    pub fn boot(self: &Arc<Self>, image: &str, args: &[String]) -> KernelResult<Pid> {
        info!("[BOOT] starting {:?}", image);
        self.create_process(image, args, None)
    }

    /// Load `image` and start it as a child of `parent`.
    ///
    /// The image is loaded before a PCB exists, so a load failure leaves
    /// nothing behind.
    pub fn create_process(
        self: &Arc<Self>,
        image: &str,
        args: &[String],
        parent: Option<Pid>,
    ) -> KernelResult<Pid> {
        let LoadedImage { program, memory } =
            self.platform.loader.load(image, args).map_err(|err| {
                warn!("[PROCESS] cannot load {:?}: {}", image, err);
                KernelError::LoadFailure
            })?;

        let pid = self.processes.create_process(image, parent)?;
        let ctx = ProcessContext {
            pid,
            fdt: FileDescriptorTable::new(self.config.max_files),
            memory,
        };

        let kernel = Arc::clone(self);
        let spawned = self
            .platform
            .scheduler
            .spawn(pid, Box::new(move || kernel.run(ctx, program)));
        if let Err(err) = spawned {
            warn!("[PROCESS] cannot schedule {}: {}", pid, err);
            self.processes.discard(pid);
            return Err(err);
        }

        info!("[PROCESS] started {} from {:?}", pid, image);
        Ok(pid)
    }

    /// Run a process's instruction stream to completion.
    fn run(self: Arc<Self>, mut ctx: ProcessContext, program: Box<dyn UserProgram>) {
        let (outcome, trapped) = {
            let mut gate = ProcessGate {
                kernel: &self,
                ctx: &mut ctx,
                terminated: None,
            };
            let outcome = program.run(&mut gate);
            (outcome, gate.terminated)
        };

        // Only the gate knows whether exit or a kill really went through.
        if trapped.is_some() {
            return;
        }
        match outcome {
            Ok(status) => self.exit_process(&mut ctx, ExitStatus::Normal(status)),
            Err(Termination::Exception(cause)) => self.handle_exception(&mut ctx, cause),
            Err(other) => {
                warn!("[PROCESS] {} stopped with {:?} without trapping", ctx.pid, other);
                self.exit_process(&mut ctx, ExitStatus::Abnormal);
            }
        }
    }

    /// Terminate a process abnormally after an unserviceable exception.
    pub fn handle_exception(&self, ctx: &mut ProcessContext, cause: Exception) {
        warn!("[EXCEPTION] {}: {}, terminating", ctx.pid, cause);
        self.exit_process(ctx, ExitStatus::Abnormal);
    }

    /// Tear a process down: close its descriptors, make it a zombie and
    /// wake a parent waiting in `join`. Later calls do nothing.
    pub fn exit_process(&self, ctx: &mut ProcessContext, status: ExitStatus) {
        ctx.fdt.close_all(&self.files);

        let Some(notice) = self.processes.record_exit(ctx.pid, status) else {
            return;
        };
        let scheduler = &self.platform.scheduler;
        if let Some(waiter) = notice.waiter {
            scheduler.unpark(waiter);
        }
        scheduler.finish(ctx.pid);

        if notice.last {
            info!("[PROCESS] last process exited, shutting down");
            scheduler.shutdown();
        }
    }
}

/// Trap gate handed to a running program.
struct ProcessGate<'a> {
    kernel: &'a Arc<Kernel>,
    ctx: &'a mut ProcessContext,
    terminated: Option<Termination>,
}

impl TrapGate for ProcessGate<'_> {
    fn pid(&self) -> Pid {
        self.ctx.pid
    }

    fn syscall(&mut self, number: usize, args: [u64; 4]) -> Result<i64, Termination> {
        if let Some(t) = self.terminated {
            return Err(t);
        }

        let termination = match syscall::dispatch(self.kernel, self.ctx, number, args) {
            Completion::Return(value) => return Ok(value),
            Completion::Exited(status) => Termination::Exited(status),
            Completion::Killed => Termination::Killed,
        };
        self.terminated = Some(termination);
        Err(termination)
    }

    fn memory(&mut self) -> &mut dyn AddressSpace {
        self.ctx.memory.as_mut()
    }
}
