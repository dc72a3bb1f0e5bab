//! Fixed-capacity, cross-process status table in POSIX shared memory.
//!
//! A 2048-slot open-addressed hash table (32-bit keys, short
//! NUL-terminated byte values) lives in a named shared-memory segment.
//! Any number of processes attach to the same segment; a process-shared
//! reader/writer lock keeps readers parallel and writers exclusive. The
//! first process to create the segment initializes it, and later
//! processes wait on the published init flag before touching the table.
//!
//! ```no_run
//! use statusmem::StatusTable;
//!
//! let table = StatusTable::open_default()?;
//! table.upsert(7001, b"ready");
//! assert_eq!(table.get(7001).as_deref(), Some(&b"ready"[..]));
//! # Ok::<(), statusmem::Error>(())
//! ```
//!
//! The segment outlives every handle; it is destroyed only by an
//! explicit [`unlink`] (also exported as `statusmem_cleanup` on the
//! C ABI).

#[cfg(not(unix))]
compile_error!("statusmem requires POSIX shared memory and pthread process-shared locks");

mod error;
pub mod ffi;
pub mod shm;

pub use error::{Error, Result};
pub use shm::layout::{CAPACITY, MAX_LIVE, VALUE_CAP};
pub use shm::lock::LockBackend;
pub use shm::region::{unlink, MUTEX_SEGMENT_NAME, RWLOCK_SEGMENT_NAME};
pub use shm::{OpStatus, StatusTable, TableStats};
