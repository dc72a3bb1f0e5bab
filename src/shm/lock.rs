//! Process-shared pthread locks living inside the segment header.
//!
//! Two backends guard the table: a reader/writer lock (the default) and
//! a recursive mutex under which readers serialize. Both are initialized
//! with `PTHREAD_PROCESS_SHARED` so any process mapping the segment can
//! take them. Acquisition is scoped: [`ReadGuard`] and [`WriteGuard`]
//! release on drop, so every exit path unlocks.
//!
//! A failing lock syscall after initialization leaves the lock in an
//! unknown state that would corrupt every subsequent operation, so the
//! acquire/release paths assert on the return code.

use std::io;
use std::marker::PhantomData;

use super::layout::LockCell;

/// Which lock flavor protects a segment. Every process attaching to one
/// segment must pick the same backend the creator used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockBackend {
    /// Process-shared rwlock: readers parallel, writers exclusive.
    #[default]
    RwLock,
    /// Process-shared recursive mutex: readers serialize.
    Mutex,
}

/// Handle to a process-shared rwlock stored in segment memory.
pub struct ShmRwLock {
    ptr: *mut libc::pthread_rwlock_t,
}

unsafe impl Send for ShmRwLock {}
unsafe impl Sync for ShmRwLock {}

impl ShmRwLock {
    /// Initialize a process-shared rwlock inside `cell`.
    ///
    /// # Safety
    /// `cell` must be zeroed segment memory that no other process is
    /// using yet.
    pub unsafe fn init(cell: *mut LockCell) -> io::Result<Self> {
        let ptr = cell as *mut libc::pthread_rwlock_t;

        let mut attr: libc::pthread_rwlockattr_t = std::mem::zeroed();
        let ret = libc::pthread_rwlockattr_init(&mut attr);
        if ret != 0 {
            return Err(io::Error::from_raw_os_error(ret));
        }

        let ret = libc::pthread_rwlockattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED);
        if ret != 0 {
            libc::pthread_rwlockattr_destroy(&mut attr);
            return Err(io::Error::from_raw_os_error(ret));
        }

        let ret = libc::pthread_rwlock_init(ptr, &attr);
        libc::pthread_rwlockattr_destroy(&mut attr);
        if ret != 0 {
            return Err(io::Error::from_raw_os_error(ret));
        }

        Ok(ShmRwLock { ptr })
    }

    /// Attach to an already-initialized rwlock inside `cell`.
    ///
    /// # Safety
    /// `cell` must hold a rwlock previously set up by [`ShmRwLock::init`]
    /// in some process.
    pub unsafe fn from_existing(cell: *mut LockCell) -> Self {
        ShmRwLock {
            ptr: cell as *mut libc::pthread_rwlock_t,
        }
    }

    fn lock_shared(&self) {
        let ret = unsafe { libc::pthread_rwlock_rdlock(self.ptr) };
        assert_eq!(ret, 0, "pthread_rwlock_rdlock failed: {ret}");
    }

    fn lock_exclusive(&self) {
        let ret = unsafe { libc::pthread_rwlock_wrlock(self.ptr) };
        assert_eq!(ret, 0, "pthread_rwlock_wrlock failed: {ret}");
    }

    fn unlock(&self) {
        let ret = unsafe { libc::pthread_rwlock_unlock(self.ptr) };
        assert_eq!(ret, 0, "pthread_rwlock_unlock failed: {ret}");
    }
}

/// Handle to a process-shared recursive mutex stored in segment memory.
pub struct ShmMutex {
    ptr: *mut libc::pthread_mutex_t,
}

unsafe impl Send for ShmMutex {}
unsafe impl Sync for ShmMutex {}

impl ShmMutex {
    /// Initialize a process-shared recursive mutex inside `cell`.
    ///
    /// # Safety
    /// Same contract as [`ShmRwLock::init`].
    pub unsafe fn init(cell: *mut LockCell) -> io::Result<Self> {
        let ptr = cell as *mut libc::pthread_mutex_t;

        let mut attr: libc::pthread_mutexattr_t = std::mem::zeroed();
        let ret = libc::pthread_mutexattr_init(&mut attr);
        if ret != 0 {
            return Err(io::Error::from_raw_os_error(ret));
        }

        let ret = libc::pthread_mutexattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED);
        if ret != 0 {
            libc::pthread_mutexattr_destroy(&mut attr);
            return Err(io::Error::from_raw_os_error(ret));
        }

        let ret = libc::pthread_mutexattr_settype(&mut attr, libc::PTHREAD_MUTEX_RECURSIVE);
        if ret != 0 {
            libc::pthread_mutexattr_destroy(&mut attr);
            return Err(io::Error::from_raw_os_error(ret));
        }

        let ret = libc::pthread_mutex_init(ptr, &attr);
        libc::pthread_mutexattr_destroy(&mut attr);
        if ret != 0 {
            return Err(io::Error::from_raw_os_error(ret));
        }

        Ok(ShmMutex { ptr })
    }

    /// Attach to an already-initialized mutex inside `cell`.
    ///
    /// # Safety
    /// `cell` must hold a mutex previously set up by [`ShmMutex::init`]
    /// in some process.
    pub unsafe fn from_existing(cell: *mut LockCell) -> Self {
        ShmMutex {
            ptr: cell as *mut libc::pthread_mutex_t,
        }
    }

    fn lock(&self) {
        let ret = unsafe { libc::pthread_mutex_lock(self.ptr) };
        assert_eq!(ret, 0, "pthread_mutex_lock failed: {ret}");
    }

    fn unlock(&self) {
        let ret = unsafe { libc::pthread_mutex_unlock(self.ptr) };
        assert_eq!(ret, 0, "pthread_mutex_unlock failed: {ret}");
    }
}

/// The table lock, in whichever flavor the segment was created with.
pub enum TableLock {
    Rw(ShmRwLock),
    Mutex(ShmMutex),
}

impl TableLock {
    /// Initialize the table lock for `backend` inside `cell`.
    ///
    /// # Safety
    /// Same contract as [`ShmRwLock::init`].
    pub unsafe fn init(cell: *mut LockCell, backend: LockBackend) -> io::Result<TableLock> {
        match backend {
            LockBackend::RwLock => Ok(TableLock::Rw(ShmRwLock::init(cell)?)),
            LockBackend::Mutex => Ok(TableLock::Mutex(ShmMutex::init(cell)?)),
        }
    }

    /// Attach to the table lock of an already-initialized segment.
    ///
    /// # Safety
    /// `cell` must hold a lock the creator initialized with the same
    /// `backend`.
    pub unsafe fn from_existing(cell: *mut LockCell, backend: LockBackend) -> TableLock {
        match backend {
            LockBackend::RwLock => TableLock::Rw(ShmRwLock::from_existing(cell)),
            LockBackend::Mutex => TableLock::Mutex(ShmMutex::from_existing(cell)),
        }
    }

    /// Acquire for reading. On the mutex backend readers serialize.
    pub fn read(&self) -> ReadGuard<'_> {
        match self {
            TableLock::Rw(lock) => lock.lock_shared(),
            TableLock::Mutex(mutex) => mutex.lock(),
        }
        ReadGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    /// Acquire for writing. Exclusive against readers and writers.
    pub fn write(&self) -> WriteGuard<'_> {
        match self {
            TableLock::Rw(lock) => lock.lock_exclusive(),
            TableLock::Mutex(mutex) => mutex.lock(),
        }
        WriteGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    fn unlock(&self) {
        match self {
            TableLock::Rw(lock) => lock.unlock(),
            TableLock::Mutex(mutex) => mutex.unlock(),
        }
    }
}

/// Shared acquisition scope. Unlocks on drop.
///
/// Not `Send`: pthread requires the unlocking thread to be the one that
/// locked.
pub struct ReadGuard<'a> {
    lock: &'a TableLock,
    _not_send: PhantomData<*mut ()>,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

/// Exclusive acquisition scope. Unlocks on drop.
pub struct WriteGuard<'a> {
    lock: &'a TableLock,
    _not_send: PhantomData<*mut ()>,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}
