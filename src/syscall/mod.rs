//! System Call Interface
//!
//! Maps trapped syscalls onto the process and file tables.
//!
//! # Security Model
//! - Whitelist approach: only the numbers in [`numbers`] are serviced
//! - All parameters are validated before use
//! - Invalid inputs return -1, never panic
//! - Unmapped pointers and unknown numbers terminate the caller
//!
//! # Syscalls
//! - 0: halt()
//! - 1: exit(status)
//! - 2: exec(name, argc, argv)
//! - 3: join(pid, status)
//! - 4: creat(name)
//! - 5: open(name)
//! - 6: read(fd, buf, count)
//! - 7: write(fd, buf, count)
//! - 8: close(fd)
//! - 9: unlink(name)

mod handler;
pub mod validate;

pub use handler::{dispatch, numbers, Completion};
