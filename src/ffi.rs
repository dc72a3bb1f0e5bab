//! C-ABI surface for loading the table as a shared library.
//!
//! [`statusmem_open`] is the factory: it returns an opaque handle onto
//! the default reader/writer-lock segment. The per-operation wrappers
//! map outcomes onto the stable integer codes (`0`, `-1`, `-2`, `-3`).
//! [`statusmem_cleanup`] unlinks the segment by name and returns `0`
//! even when the segment is already gone.
//!
//! Handles must come from [`statusmem_open`] and be released with
//! [`statusmem_close`]; passing anything else is undefined behavior.
//! Bootstrap errors cannot cross this boundary as values, so they are
//! logged and collapsed to null / `-1`.

use std::ptr;
use std::slice;

use tracing::error;

use crate::shm::lock::LockBackend;
use crate::shm::region::{self, RWLOCK_SEGMENT_NAME};
use crate::shm::{OpStatus, StatusTable};

/// Open (or create) the default segment and return an opaque handle.
/// Returns null if the segment cannot be opened, sized, or mapped.
#[no_mangle]
pub extern "C" fn statusmem_open() -> *mut StatusTable {
    match StatusTable::open(RWLOCK_SEGMENT_NAME, LockBackend::RwLock) {
        Ok(table) => Box::into_raw(Box::new(table)),
        Err(err) => {
            error!(%err, "statusmem_open failed");
            ptr::null_mut()
        }
    }
}

/// Release a handle created by [`statusmem_open`]. The segment itself
/// stays alive for other processes.
///
/// # Safety
/// `table` must be null or a handle returned by [`statusmem_open`] that
/// has not been closed yet.
#[no_mangle]
pub unsafe extern "C" fn statusmem_close(table: *mut StatusTable) {
    if !table.is_null() {
        drop(Box::from_raw(table));
    }
}

/// Unlink the default segment. Returns 0 on success (an absent segment
/// included), -1 on unexpected error.
#[no_mangle]
pub extern "C" fn statusmem_cleanup() -> i32 {
    match region::unlink(RWLOCK_SEGMENT_NAME) {
        Ok(()) => 0,
        Err(err) => {
            error!(%err, "statusmem_cleanup failed");
            -1
        }
    }
}

/// # Safety
/// `value` must point to `value_len` readable bytes (null is fine when
/// `value_len` is 0).
unsafe fn value_slice<'a>(value: *const u8, value_len: usize) -> &'a [u8] {
    if value_len == 0 {
        &[]
    } else {
        slice::from_raw_parts(value, value_len)
    }
}

/// # Safety
/// `table` is a live [`statusmem_open`] handle; `value` points to
/// `value_len` readable bytes.
#[no_mangle]
pub unsafe extern "C" fn statusmem_add(
    table: *const StatusTable,
    key: i32,
    value: *const u8,
    value_len: usize,
) -> i32 {
    (*table).add(key, value_slice(value, value_len)).code()
}

/// # Safety
/// Same contract as [`statusmem_add`].
#[no_mangle]
pub unsafe extern "C" fn statusmem_update(
    table: *const StatusTable,
    key: i32,
    value: *const u8,
    value_len: usize,
) -> i32 {
    (*table).update(key, value_slice(value, value_len)).code()
}

/// # Safety
/// Same contract as [`statusmem_add`].
#[no_mangle]
pub unsafe extern "C" fn statusmem_upsert(
    table: *const StatusTable,
    key: i32,
    value: *const u8,
    value_len: usize,
) -> i32 {
    (*table).upsert(key, value_slice(value, value_len)).code()
}

/// Copy the value for `key` into `buf` (up to `buf_len` bytes) and
/// return the full value length, or -1 if the key is absent. A return
/// larger than `buf_len` means the copy was truncated.
///
/// # Safety
/// `table` is a live handle; `buf` points to `buf_len` writable bytes
/// (null is fine when `buf_len` is 0).
#[no_mangle]
pub unsafe extern "C" fn statusmem_get(
    table: *const StatusTable,
    key: i32,
    buf: *mut u8,
    buf_len: usize,
) -> isize {
    match (*table).get(key) {
        Some(value) => {
            let copy = value.len().min(buf_len);
            if copy > 0 {
                ptr::copy_nonoverlapping(value.as_ptr(), buf, copy);
            }
            value.len() as isize
        }
        None => OpStatus::NotFound.code() as isize,
    }
}

/// # Safety
/// `table` is a live [`statusmem_open`] handle.
#[no_mangle]
pub unsafe extern "C" fn statusmem_remove(table: *const StatusTable, key: i32) -> i32 {
    (*table).remove(key).code()
}

/// Returns 1 if the key is present, 0 otherwise.
///
/// # Safety
/// `table` is a live [`statusmem_open`] handle.
#[no_mangle]
pub unsafe extern "C" fn statusmem_contains(table: *const StatusTable, key: i32) -> i32 {
    i32::from((*table).contains(key))
}

/// # Safety
/// `table` is a live [`statusmem_open`] handle.
#[no_mangle]
pub unsafe extern "C" fn statusmem_clear(table: *const StatusTable) -> i32 {
    (*table).clear().code()
}

/// # Safety
/// `table` is a live [`statusmem_open`] handle.
#[no_mangle]
pub unsafe extern "C" fn statusmem_count(table: *const StatusTable) -> i32 {
    (*table).count() as i32
}

/// # Safety
/// `table` is a live [`statusmem_open`] handle.
#[no_mangle]
pub unsafe extern "C" fn statusmem_load_factor(table: *const StatusTable) -> f64 {
    (*table).load_factor()
}
