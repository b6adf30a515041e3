//! Host-side test platform.
//!
//! Stands in for the machine the core normally runs on: programs are
//! closures on OS threads, files live in memory and every process gets a
//! flat address space at [`USER_BASE`].

use std::collections::{BTreeMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::param::KernelConfig;
use crate::platform::{
    Access, AddressSpace, Console, Exception, FileSystem, LoadedImage, Loader, PhysicalFile,
    Platform, Scheduler, Task, Termination, TrapGate, UserProgram,
};
use crate::proc::{ExitStatus, Pid};
use crate::syscall::numbers::*;

/// Lowest mapped user address.
pub const USER_BASE: usize = 0x1000;

const USER_SIZE: usize = 32 * 1024;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// One contiguous read/write mapping.
pub struct FlatMemory {
    base: usize,
    bytes: Vec<u8>,
}

impl FlatMemory {
    pub fn new(base: usize, size: usize) -> Self {
        Self {
            base,
            bytes: vec![0; size],
        }
    }

    pub fn end(&self) -> usize {
        self.base + self.bytes.len()
    }

    fn span(&self, vaddr: usize, len: usize) -> KernelResult<std::ops::Range<usize>> {
        if self.accessible(vaddr, len, Access::READ) < len {
            return Err(KernelError::Fault { vaddr });
        }
        let start = vaddr - self.base;
        Ok(start..start + len)
    }
}

impl AddressSpace for FlatMemory {
    fn accessible(&self, vaddr: usize, len: usize, _access: Access) -> usize {
        if vaddr < self.base || vaddr >= self.end() {
            return 0;
        }
        len.min(self.end() - vaddr)
    }

    fn copy_in(&self, vaddr: usize, buf: &mut [u8]) -> KernelResult<()> {
        let range = self.span(vaddr, buf.len())?;
        buf.copy_from_slice(&self.bytes[range]);
        Ok(())
    }

    fn copy_out(&mut self, vaddr: usize, data: &[u8]) -> KernelResult<()> {
        let range = self.span(vaddr, data.len())?;
        self.bytes[range].copy_from_slice(data);
        Ok(())
    }
}

type FileData = Arc<Mutex<Vec<u8>>>;

/// In-memory flat file system.
#[derive(Default)]
pub struct MemFs {
    files: Mutex<BTreeMap<String, FileData>>,
    removed: Mutex<BTreeMap<String, (usize, Vec<u8>)>>,
    budgets: Mutex<BTreeMap<String, usize>>,
}

impl MemFs {
    pub fn with_files(files: &[(&str, &str)]) -> Arc<Self> {
        let fs = Self::default();
        {
            let mut map = fs.files.lock().unwrap();
            for (name, contents) in files {
                map.insert(
                    name.to_string(),
                    Arc::new(Mutex::new(contents.as_bytes().to_vec())),
                );
            }
        }
        Arc::new(fs)
    }

    pub fn contents(&self, name: &str) -> Option<Vec<u8>> {
        let files = self.files.lock().unwrap();
        files.get(name).map(|data| data.lock().unwrap().clone())
    }

    /// How many times `name` has been physically deleted.
    pub fn remove_count(&self, name: &str) -> usize {
        self.removed.lock().unwrap().get(name).map_or(0, |r| r.0)
    }

    /// Make every later open of `name` fail with an I/O error once
    /// `bytes` have moved through it.
    pub fn fail_after(&self, name: &str, bytes: usize) {
        self.budgets.lock().unwrap().insert(name.to_string(), bytes);
    }

    /// Contents `name` held when it was last deleted.
    pub fn last_contents_removed(&self, name: &str) -> Option<Vec<u8>> {
        self.removed.lock().unwrap().get(name).map(|r| r.1.clone())
    }
}

impl FileSystem for MemFs {
    fn open(&self, name: &str, create: bool) -> Option<Box<dyn PhysicalFile>> {
        let mut files = self.files.lock().unwrap();
        let data = match files.get(name) {
            Some(data) => Arc::clone(data),
            None if create => {
                let data = FileData::default();
                files.insert(name.to_string(), Arc::clone(&data));
                data
            }
            None => return None,
        };
        let budget = self.budgets.lock().unwrap().get(name).copied();
        Some(Box::new(MemFile {
            data,
            pos: 0,
            budget,
        }))
    }

    fn remove(&self, name: &str) -> bool {
        let Some(data) = self.files.lock().unwrap().remove(name) else {
            return false;
        };
        let contents = data.lock().unwrap().clone();
        let mut removed = self.removed.lock().unwrap();
        let entry = removed.entry(name.to_string()).or_default();
        entry.0 += 1;
        entry.1 = contents;
        true
    }

    fn exists(&self, name: &str) -> bool {
        self.files.lock().unwrap().contains_key(name)
    }
}

struct MemFile {
    data: FileData,
    pos: usize,
    budget: Option<usize>,
}

impl MemFile {
    /// Clamp a transfer to what is left of the budget.
    fn charge(&mut self, want: usize) -> KernelResult<usize> {
        match &mut self.budget {
            None => Ok(want),
            Some(left) if *left == 0 && want > 0 => Err(KernelError::Io),
            Some(left) => {
                let n = want.min(*left);
                *left -= n;
                Ok(n)
            }
        }
    }
}

impl PhysicalFile for MemFile {
    fn read(&mut self, buf: &mut [u8]) -> KernelResult<usize> {
        let want = self.charge(buf.len())?;
        let data = self.data.lock().unwrap();
        let start = self.pos.min(data.len());
        let n = want.min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        self.pos = start + n;
        Ok(n)
    }

    fn write(&mut self, src: &[u8]) -> KernelResult<usize> {
        let src = &src[..self.charge(src.len())?];
        let mut data = self.data.lock().unwrap();
        let end = self.pos + src.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[self.pos..end].copy_from_slice(src);
        self.pos = end;
        Ok(src.len())
    }
}

#[derive(Default)]
pub struct TestConsole {
    input: Mutex<VecDeque<u8>>,
    output: Mutex<Vec<u8>>,
}

impl TestConsole {
    pub fn feed(&self, bytes: &[u8]) {
        self.input.lock().unwrap().extend(bytes);
    }

    pub fn output(&self) -> Vec<u8> {
        self.output.lock().unwrap().clone()
    }
}

impl Console for TestConsole {
    fn read(&self, buf: &mut [u8]) -> usize {
        let mut input = self.input.lock().unwrap();
        let n = buf.len().min(input.len());
        for (slot, byte) in buf.iter_mut().zip(input.drain(..n)) {
            *slot = byte;
        }
        n
    }

    fn write(&self, data: &[u8]) -> usize {
        self.output.lock().unwrap().extend_from_slice(data);
        data.len()
    }
}

/// One OS thread per process, with park tokens keyed by PID.
#[derive(Default)]
pub struct ThreadScheduler {
    tokens: Mutex<BTreeMap<Pid, bool>>,
    wakeup: Condvar,
    threads: Mutex<Vec<JoinHandle<()>>>,
    finished: Mutex<Vec<Pid>>,
    shutdowns: AtomicUsize,
}

impl ThreadScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Join every spawned thread, including ones spawned while waiting.
    pub fn wait_all(&self) {
        loop {
            let handles = std::mem::take(&mut *self.threads.lock().unwrap());
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                handle.join().expect("process thread panicked outside its program");
            }
        }
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> Vec<Pid> {
        self.finished.lock().unwrap().clone()
    }
}

impl Scheduler for ThreadScheduler {
    fn spawn(&self, pid: Pid, task: Task) -> KernelResult<()> {
        let handle = thread::Builder::new()
            .name(format!("pid-{}", pid))
            .spawn(task)
            .map_err(|_| KernelError::TableFull)?;
        self.threads.lock().unwrap().push(handle);
        Ok(())
    }

    fn park(&self, pid: Pid) {
        let mut tokens = self.tokens.lock().unwrap();
        while !tokens.get(&pid).copied().unwrap_or(false) {
            tokens = self.wakeup.wait(tokens).unwrap();
        }
        tokens.insert(pid, false);
    }

    fn unpark(&self, pid: Pid) {
        self.tokens.lock().unwrap().insert(pid, true);
        self.wakeup.notify_all();
    }

    fn finish(&self, pid: Pid) {
        self.finished.lock().unwrap().push(pid);
    }

    fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

type Main = Arc<dyn Fn(&mut Sys<'_>, &[String]) -> Result<i32, Termination> + Send + Sync>;

#[derive(Default)]
struct Records {
    statuses: Mutex<BTreeMap<Pid, ExitStatus>>,
    panics: Mutex<Vec<String>>,
}

#[derive(Default)]
struct ProgramLoader {
    programs: Mutex<BTreeMap<String, Main>>,
    records: Arc<Records>,
}

impl Loader for ProgramLoader {
    fn load(&self, image: &str, args: &[String]) -> KernelResult<LoadedImage> {
        let main = self
            .programs
            .lock()
            .unwrap()
            .get(image)
            .cloned()
            .ok_or(KernelError::LoadFailure)?;
        Ok(LoadedImage {
            program: Box::new(ClosureProgram {
                image: image.to_string(),
                main,
                args: args.to_vec(),
                records: Arc::clone(&self.records),
            }),
            memory: Box::new(FlatMemory::new(USER_BASE, USER_SIZE)),
        })
    }
}

struct ClosureProgram {
    image: String,
    main: Main,
    args: Vec<String>,
    records: Arc<Records>,
}

impl UserProgram for ClosureProgram {
    fn run(self: Box<Self>, cpu: &mut dyn TrapGate) -> Result<i32, Termination> {
        let pid = cpu.pid();
        let mut sys = Sys {
            cpu,
            next: USER_BASE,
        };
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| (self.main)(&mut sys, &self.args)));

        let result = match outcome {
            Ok(result) => result,
            Err(payload) => {
                let message = payload
                    .downcast_ref::<String>()
                    .cloned()
                    .or_else(|| payload.downcast_ref::<&str>().map(|s| s.to_string()))
                    .unwrap_or_default();
                self.records
                    .panics
                    .lock()
                    .unwrap()
                    .push(format!("{} ({}): {}", self.image, pid, message));
                // Die like a crashed program so waiting parents wake up.
                Err(Termination::Exception(Exception::IllegalInstruction))
            }
        };

        let status = match result {
            Ok(code) | Err(Termination::Exited(code)) => ExitStatus::Normal(code),
            Err(_) => ExitStatus::Abnormal,
        };
        self.records.statuses.lock().unwrap().insert(pid, status);
        result
    }
}

/// A program's view of the machine: syscall stubs plus a bump-allocated
/// scratch area for arguments.
pub struct Sys<'a> {
    cpu: &'a mut dyn TrapGate,
    next: usize,
}

impl Sys<'_> {
    pub fn pid(&self) -> Pid {
        self.cpu.pid()
    }

    pub fn syscall(&mut self, number: usize, args: [u64; 4]) -> Result<i64, Termination> {
        self.cpu.syscall(number, args)
    }

    pub fn memory_end(&self) -> usize {
        USER_BASE + USER_SIZE
    }

    /// Reserve `len` bytes of scratch, wrapping when the mapping runs out.
    pub fn alloc(&mut self, len: usize) -> usize {
        if self.next + len > self.memory_end() {
            self.next = USER_BASE;
        }
        let addr = self.next;
        self.next += len;
        addr
    }

    pub fn put_bytes(&mut self, data: &[u8]) -> usize {
        let addr = self.alloc(data.len());
        self.cpu
            .memory()
            .copy_out(addr, data)
            .expect("scratch area is mapped");
        addr
    }

    pub fn put_str(&mut self, s: &str) -> usize {
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        self.put_bytes(&bytes)
    }

    fn get_bytes(&mut self, addr: usize, len: usize) -> Vec<u8> {
        let mut buf = vec![0; len];
        self.cpu
            .memory()
            .copy_in(addr, &mut buf)
            .expect("scratch area is mapped");
        buf
    }

    pub fn halt(&mut self) -> Result<i64, Termination> {
        self.syscall(SYS_HALT, [0; 4])
    }

    /// Exit, returning the termination the trap reported.
    pub fn exit(&mut self, status: i32) -> Termination {
        match self.syscall(SYS_EXIT, [status as u64, 0, 0, 0]) {
            Err(termination) => termination,
            Ok(value) => panic!("exit returned {}", value),
        }
    }

    pub fn exec(&mut self, image: &str, args: &[&str]) -> Result<i64, Termination> {
        let name = self.put_str(image);
        let mut argv = Vec::new();
        for arg in args {
            let ptr = self.put_str(arg) as u32;
            argv.extend_from_slice(&ptr.to_le_bytes());
        }
        let argv = self.put_bytes(&argv);
        self.syscall(SYS_EXEC, [name as u64, args.len() as u64, argv as u64, 0])
    }

    /// Join `pid`; the status is read back only when join returns 1.
    pub fn join(&mut self, pid: i64) -> Result<(i64, Option<i32>), Termination> {
        let addr = self.alloc(4);
        let result = self.join_raw(pid, addr)?;
        if result != 1 {
            return Ok((result, None));
        }
        let mut word = [0u8; 4];
        word.copy_from_slice(&self.get_bytes(addr, 4));
        Ok((result, Some(i32::from_le_bytes(word))))
    }

    pub fn join_raw(&mut self, pid: i64, status: usize) -> Result<i64, Termination> {
        self.syscall(SYS_JOIN, [pid as u64, status as u64, 0, 0])
    }

    pub fn creat(&mut self, name: &str) -> Result<i64, Termination> {
        let ptr = self.put_str(name);
        self.syscall(SYS_CREAT, [ptr as u64, 0, 0, 0])
    }

    pub fn open(&mut self, name: &str) -> Result<i64, Termination> {
        let ptr = self.put_str(name);
        self.syscall(SYS_OPEN, [ptr as u64, 0, 0, 0])
    }

    /// Read up to `len` bytes, returning the result and the bytes read.
    pub fn read(&mut self, fd: i64, len: usize) -> Result<(i64, Vec<u8>), Termination> {
        let buf = self.alloc(len);
        let n = self.read_raw(fd, buf, len as i64)?;
        let bytes = if n > 0 {
            self.get_bytes(buf, n as usize)
        } else {
            Vec::new()
        };
        Ok((n, bytes))
    }

    pub fn read_raw(&mut self, fd: i64, buf: usize, count: i64) -> Result<i64, Termination> {
        self.syscall(SYS_READ, [fd as u64, buf as u64, count as u64, 0])
    }

    pub fn write(&mut self, fd: i64, data: &[u8]) -> Result<i64, Termination> {
        let buf = self.put_bytes(data);
        self.write_raw(fd, buf, data.len() as i64)
    }

    pub fn write_raw(&mut self, fd: i64, buf: usize, count: i64) -> Result<i64, Termination> {
        self.syscall(SYS_WRITE, [fd as u64, buf as u64, count as u64, 0])
    }

    pub fn close(&mut self, fd: i64) -> Result<i64, Termination> {
        self.syscall(SYS_CLOSE, [fd as u64, 0, 0, 0])
    }

    pub fn unlink(&mut self, name: &str) -> Result<i64, Termination> {
        let ptr = self.put_str(name);
        self.syscall(SYS_UNLINK, [ptr as u64, 0, 0, 0])
    }
}

/// A one-shot gate programs can block on.
#[derive(Clone, Default)]
pub struct Latch {
    state: Arc<(Mutex<bool>, Condvar)>,
}

impl Latch {
    pub fn wait(&self) {
        let (open, cv) = &*self.state;
        let mut open = open.lock().unwrap();
        while !*open {
            open = cv.wait(open).unwrap();
        }
    }

    pub fn open(&self) {
        let (open, cv) = &*self.state;
        *open.lock().unwrap() = true;
        cv.notify_all();
    }

    pub fn open_after_millis(&self, millis: u64) {
        let latch = self.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(millis));
            latch.open();
        });
    }
}

/// A kernel wired to the host-side platform.
pub struct Harness {
    pub fs: Arc<MemFs>,
    pub console: Arc<TestConsole>,
    pub sched: Arc<ThreadScheduler>,
    pub kernel: Arc<Kernel>,
    loader: Arc<ProgramLoader>,
}

impl Harness {
    pub fn new(files: &[(&str, &str)]) -> Self {
        Self::with_config(files, |_| {})
    }

    pub fn with_config(files: &[(&str, &str)], configure: impl FnOnce(&mut KernelConfig)) -> Self {
        init_logging();

        let mut config = KernelConfig::default();
        configure(&mut config);

        let fs = MemFs::with_files(files);
        let console = Arc::new(TestConsole::default());
        let sched = ThreadScheduler::new();
        let loader = Arc::new(ProgramLoader::default());
        let platform = Platform {
            filesystem: fs.clone(),
            loader: loader.clone(),
            scheduler: sched.clone(),
            console: console.clone(),
        };
        let kernel = Kernel::new(config, platform).expect("valid test config");

        Self {
            fs,
            console,
            sched,
            kernel,
            loader,
        }
    }

    /// A fresh platform over the same collaborators.
    pub fn platform(&self) -> Platform {
        Platform {
            filesystem: self.fs.clone(),
            loader: self.loader.clone(),
            scheduler: self.sched.clone(),
            console: self.console.clone(),
        }
    }

    /// Register a program under `image`.
    pub fn program<F>(&self, image: &str, main: F)
    where
        F: Fn(&mut Sys<'_>, &[String]) -> Result<i32, Termination> + Send + Sync + 'static,
    {
        self.loader
            .programs
            .lock()
            .unwrap()
            .insert(image.to_string(), Arc::new(main));
    }

    pub fn latch(&self) -> Latch {
        Latch::default()
    }

    /// Boot `image` as root and wait for every process to finish.
    pub fn run(&self, image: &str) {
        self.kernel.boot(image, &[]).expect("root program loads");
        self.sched.wait_all();

        let panics = self.panics();
        assert!(panics.is_empty(), "programs panicked: {:#?}", panics);
        assert!(self.sched.finished().contains(&Pid::ROOT));
    }

    pub fn exit_status_of_root(&self) -> Option<ExitStatus> {
        self.loader.records.statuses.lock().unwrap().get(&Pid::ROOT).copied()
    }

    pub fn panics(&self) -> Vec<String> {
        self.loader.records.panics.lock().unwrap().clone()
    }
}
