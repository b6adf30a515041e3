//! Open File Table
//!
//! System-wide registry of files open in any process.
//!
//! # Design
//! - Every `open` creates its own entry, even for a name already open
//! - Entries are reference counted and removed at zero, never cached
//! - `unlink` of an open name is deferred until its last entry is released
//!
//! # Locking
//! Reference counts and pending-delete flags change only under the table
//! lock, so exactly one release issues a deferred physical delete.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use core::fmt;

use log::{debug, warn};
use spin::Mutex;

use crate::error::{KernelError, KernelResult};
use crate::platform::{FileSystem, PhysicalFile};

/// Identifier of one open file entry.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
#[repr(transparent)]
pub struct FileId(u64);

impl FileId {
    /// Raw identifier value.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

/// Bookkeeping for one physically open file.
#[derive(Debug)]
struct OpenFileEntry {
    name: String,
    refs: usize,
    pending_delete: bool,
}

/// A counted reference to an open file entry.
///
/// Deliberately not `Clone`: a second reference must be taken with
/// [`OpenFileTable::add_ref`] so the count stays exact.
pub struct FileHandle {
    id: FileId,
    file: Arc<Mutex<Box<dyn PhysicalFile>>>,
}

impl FileHandle {
    /// Entry this handle counts against.
    #[inline]
    pub fn id(&self) -> FileId {
        self.id
    }

    /// Read at the file's cursor.
    pub fn read(&self, buf: &mut [u8]) -> KernelResult<usize> {
        self.file.lock().read(buf)
    }

    /// Write at the file's cursor.
    pub fn write(&self, data: &[u8]) -> KernelResult<usize> {
        self.file.lock().write(data)
    }
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileHandle({})", self.id.as_u64())
    }
}

struct OpenFileTableInner {
    entries: BTreeMap<FileId, OpenFileEntry>,
    next_id: u64,
}

impl OpenFileTableInner {
    fn named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a OpenFileEntry> + 'a {
        self.entries.values().filter(move |e| e.name == name)
    }

    /// Name was unlinked while open and is waiting for its last close.
    fn is_unlinked(&self, name: &str) -> bool {
        self.named(name).any(|e| e.pending_delete)
    }
}

/// The system-wide open file table.
pub struct OpenFileTable {
    filesystem: Arc<dyn FileSystem>,
    capacity: usize,
    inner: Mutex<OpenFileTableInner>,
}

impl OpenFileTable {
    /// Create an empty table holding at most `capacity` entries.
    pub fn new(filesystem: Arc<dyn FileSystem>, capacity: usize) -> Self {
        Self {
            filesystem,
            capacity,
            inner: Mutex::new(OpenFileTableInner {
                entries: BTreeMap::new(),
                next_id: 0,
            }),
        }
    }

    /// Open an existing file under a fresh entry with one reference.
    pub fn open_entry(&self, name: &str) -> KernelResult<FileHandle> {
        self.open(name, false)
    }

    /// Like [`Self::open_entry`], creating the file if it is missing.
    ///
    /// A name unlinked while still open cannot be recreated until its last
    /// descriptor is closed.
    pub fn create_entry(&self, name: &str) -> KernelResult<FileHandle> {
        self.open(name, true)
    }

    fn open(&self, name: &str, create: bool) -> KernelResult<FileHandle> {
        let mut inner = self.inner.lock();

        if inner.is_unlinked(name) {
            return Err(if create {
                KernelError::InvalidArgument
            } else {
                KernelError::NotFound
            });
        }
        if inner.entries.len() >= self.capacity {
            return Err(KernelError::TableFull);
        }

        let file = self
            .filesystem
            .open(name, create)
            .ok_or(KernelError::NotFound)?;

        let id = FileId(inner.next_id);
        inner.next_id += 1;
        inner.entries.insert(
            id,
            OpenFileEntry {
                name: String::from(name),
                refs: 1,
                pending_delete: false,
            },
        );
        debug!("[OFT] open {:?} as entry {}", name, id.as_u64());

        Ok(FileHandle {
            id,
            file: Arc::new(Mutex::new(file)),
        })
    }

    /// Take another reference to the entry behind `handle`.
    pub fn add_ref(&self, handle: &FileHandle) -> FileHandle {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.get_mut(&handle.id) {
            entry.refs += 1;
        }
        FileHandle {
            id: handle.id,
            file: Arc::clone(&handle.file),
        }
    }

    /// Drop one reference. The last release removes the entry and, if the
    /// name was unlinked meanwhile, deletes the physical file.
    pub fn release(&self, handle: FileHandle) {
        let mut inner = self.inner.lock();

        let Some(entry) = inner.entries.get_mut(&handle.id) else {
            warn!("[OFT] release of unknown entry {}", handle.id.as_u64());
            return;
        };
        entry.refs -= 1;
        if entry.refs > 0 {
            return;
        }

        let Some(entry) = inner.entries.remove(&handle.id) else {
            return;
        };
        // Close the physical file before deleting it.
        drop(handle);

        if entry.pending_delete && inner.named(&entry.name).next().is_none() {
            debug!("[OFT] last close of unlinked {:?}, deleting", entry.name);
            if !self.filesystem.remove(&entry.name) {
                warn!("[OFT] deferred delete of {:?} failed", entry.name);
            }
        }
    }

    /// Unlink `name`.
    ///
    /// Deletes immediately when nothing has it open, otherwise marks every
    /// entry under `name` and leaves the delete to the last release. Fails
    /// if the file did not exist or was already unlinked.
    pub fn mark_pending_delete(&self, name: &str) -> KernelResult<()> {
        let mut inner = self.inner.lock();

        let open = inner.named(name).next().is_some();
        if open {
            if inner.is_unlinked(name) || !self.filesystem.exists(name) {
                return Err(KernelError::NotFound);
            }
            for entry in inner.entries.values_mut().filter(|e| e.name == name) {
                entry.pending_delete = true;
            }
            debug!("[OFT] unlink {:?} deferred until last close", name);
            return Ok(());
        }

        if self.filesystem.remove(name) {
            debug!("[OFT] unlink {:?}", name);
            Ok(())
        } else {
            Err(KernelError::NotFound)
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether no file is open anywhere.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reference count of an entry, if it is still live.
    pub fn ref_count(&self, id: FileId) -> Option<usize> {
        self.inner.lock().entries.get(&id).map(|e| e.refs)
    }
}
