//! Named POSIX shared-memory segment holding the table.
//!
//! Exactly one process initializes a segment: the winner of the
//! `O_CREAT | O_EXCL` race sizes it, constructs the locks, seeds the
//! hash, zeroes the slots and only then publishes `initialized`. Every
//! other process maps the segment and waits for that flag before its
//! first lock acquisition. The segment outlives all handles; it is
//! destroyed only by an explicit [`unlink`].

use std::ffi::CString;
use std::fs::File;
use std::io;
use std::os::fd::FromRawFd;
use std::sync::atomic::{fence, Ordering};
use std::time::Duration;

use memmap2::MmapMut;
use tracing::{debug, trace};

use crate::error::{Error, Result};

use super::layout::{LockCell, SharedHeader, HEADER_SIZE, STATE_EMPTY};
use super::lock::{LockBackend, ShmMutex, TableLock};

/// POSIX shm object name for the reader/writer-lock backend.
pub const RWLOCK_SEGMENT_NAME: &str = "/rwlock_optimized_status_memory";

/// POSIX shm object name for the mutex backend.
pub const MUTEX_SEGMENT_NAME: &str = "/optimized_status_memory";

/// Poll interval while waiting for the creator to publish the segment.
const INIT_POLL: Duration = Duration::from_millis(1);

/// A mapped segment, owning the mmap handle and the table lock.
pub struct ShmRegion {
    mmap: MmapMut,
    name: String,
    lock: TableLock,
    creator: bool,
}

impl ShmRegion {
    /// Open the named segment, creating and initializing it if this
    /// process wins the creation race.
    pub fn open(name: &str, backend: LockBackend) -> Result<Self> {
        let cname = CString::new(name).map_err(|_| Error::BadName(name.to_string()))?;

        loop {
            // Fast path: attach to an existing segment.
            match shm_open(&cname, libc::O_RDWR) {
                Ok(file) => return Self::attach(name, file, backend),
                Err(err) if err.raw_os_error() == Some(libc::ENOENT) => {}
                Err(err) => {
                    return Err(Error::Open {
                        name: name.to_string(),
                        source: err,
                    })
                }
            }

            // Nothing there: try to create it exclusively.
            match shm_open(&cname, libc::O_CREAT | libc::O_EXCL | libc::O_RDWR) {
                Ok(file) => return Self::create(name, file, backend),
                // Another process won the race; fall back to attaching.
                Err(err) if err.raw_os_error() == Some(libc::EEXIST) => continue,
                Err(err) => {
                    return Err(Error::Open {
                        name: name.to_string(),
                        source: err,
                    })
                }
            }
        }
    }

    /// Creator path: size, map, initialize, publish.
    fn create(name: &str, file: File, backend: LockBackend) -> Result<Self> {
        file.set_len(HEADER_SIZE as u64).map_err(|err| Error::Truncate {
            name: name.to_string(),
            source: err,
        })?;

        // Safety: freshly created object, sized above, mapped shared.
        let mut mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|err| Error::Map {
            name: name.to_string(),
            source: err,
        })?;
        mmap.fill(0);

        let header = unsafe { &mut *(mmap.as_mut_ptr() as *mut SharedHeader) };

        // Locks first, so initialized == 1 implies they are usable.
        let lock =
            unsafe { TableLock::init(&mut header.table_lock, backend) }.map_err(Error::LockInit)?;
        unsafe { ShmMutex::init(&mut header.init_mutex) }.map_err(Error::LockInit)?;

        header.live_count = 0;
        header.tomb_count = 0;
        header.hash_seed = rand::random();
        for slot in header.slots.iter_mut() {
            slot.state = STATE_EMPTY;
            slot.hash_primary = 0;
        }

        // Publication fence: everything above must be visible before any
        // attacher sees initialized == 1.
        fence(Ordering::SeqCst);
        header.initialized.store(1, Ordering::Release);

        debug!(name, ?backend, "created status segment");

        Ok(ShmRegion {
            mmap,
            name: name.to_string(),
            lock,
            creator: true,
        })
    }

    /// Attacher path: wait for size, map, wait for the init flag.
    fn attach(name: &str, file: File, backend: LockBackend) -> Result<Self> {
        // The creator may not have sized the object yet.
        loop {
            let len = file
                .metadata()
                .map_err(|err| Error::Stat {
                    name: name.to_string(),
                    source: err,
                })?
                .len();
            if len >= HEADER_SIZE as u64 {
                break;
            }
            std::thread::sleep(INIT_POLL);
        }

        // Safety: object is at least HEADER_SIZE bytes, mapped shared.
        let mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|err| Error::Map {
            name: name.to_string(),
            source: err,
        })?;

        let header = unsafe { &*(mmap.as_ptr() as *const SharedHeader) };
        let mut waited = false;
        while header.initialized.load(Ordering::Acquire) == 0 {
            waited = true;
            std::thread::sleep(INIT_POLL);
        }
        // Pairs with the creator's publication fence; must precede the
        // first lock acquisition.
        fence(Ordering::SeqCst);

        if waited {
            trace!(name, "waited for segment initialization");
        }

        let lock_cell = &header.table_lock as *const LockCell as *mut LockCell;
        let lock = unsafe { TableLock::from_existing(lock_cell, backend) };

        debug!(name, ?backend, "attached status segment");

        Ok(ShmRegion {
            mmap,
            name: name.to_string(),
            lock,
            creator: false,
        })
    }

    pub fn header(&self) -> &SharedHeader {
        unsafe { &*(self.mmap.as_ptr() as *const SharedHeader) }
    }

    /// Mutable view of the header. Caller must hold the write lock.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn header_mut(&self) -> &mut SharedHeader {
        &mut *(self.mmap.as_ptr() as *mut SharedHeader)
    }

    pub fn lock(&self) -> &TableLock {
        &self.lock
    }

    /// Whether this process created (and initialized) the segment.
    pub fn is_creator(&self) -> bool {
        self.creator
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

fn shm_open(name: &CString, flags: i32) -> io::Result<File> {
    let fd = unsafe { libc::shm_open(name.as_ptr(), flags, 0o666) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // Safety: fd is freshly opened and exclusively owned by the File.
    Ok(unsafe { File::from_raw_fd(fd) })
}

/// Remove the named segment. Attached processes keep their mappings
/// until they unmap; an absent segment is not an error.
pub fn unlink(name: &str) -> Result<()> {
    let cname = CString::new(name).map_err(|_| Error::BadName(name.to_string()))?;

    let ret = unsafe { libc::shm_unlink(cname.as_ptr()) };
    if ret != 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ENOENT) {
            return Ok(());
        }
        return Err(Error::Unlink {
            name: name.to_string(),
            source: err,
        });
    }

    debug!(name, "unlinked status segment");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_name(tag: &str) -> String {
        format!("/statusmem_region_{}_{}", tag, std::process::id())
    }

    #[test]
    fn create_then_attach() {
        let name = test_name("create_attach");
        let _ = unlink(&name);

        let first = ShmRegion::open(&name, LockBackend::RwLock).unwrap();
        assert!(first.is_creator());
        assert_eq!(first.header().initialized.load(Ordering::Acquire), 1);
        assert_eq!(first.header().live_count, 0);

        let second = ShmRegion::open(&name, LockBackend::RwLock).unwrap();
        assert!(!second.is_creator());
        assert_eq!(second.header().hash_seed, first.header().hash_seed);

        unlink(&name).unwrap();
    }

    #[test]
    fn unlink_missing_segment_is_ok() {
        assert!(unlink(&test_name("never_created")).is_ok());
    }

    #[test]
    fn dropping_handles_keeps_the_segment() {
        let name = test_name("persists");
        let _ = unlink(&name);

        let seed = {
            let region = ShmRegion::open(&name, LockBackend::RwLock).unwrap();
            region.header().hash_seed
        };

        // A new handle attaches to the same initialized segment.
        let region = ShmRegion::open(&name, LockBackend::RwLock).unwrap();
        assert!(!region.is_creator());
        assert_eq!(region.header().hash_seed, seed);

        unlink(&name).unwrap();
    }
}
