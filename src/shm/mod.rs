//! Cross-process status table backed by a POSIX shared-memory segment.
//!
//! [`StatusTable`] is a per-process handle onto a fixed array of 2048
//! slots living in the segment. Read operations take the process-shared
//! lock shared; mutations take it exclusive. All addressing inside the
//! segment is by slot index, so handles in different processes (with
//! different mapping addresses) interoperate freely.

pub mod hash;
pub mod layout;
pub mod lock;
pub mod probe;
pub mod region;

use std::fmt;

use hashbrown::HashMap;
use tracing::debug;

use crate::error::Result;

use layout::{
    SharedHeader, CAPACITY, MAX_LIVE, STATE_EMPTY, STATE_OCCUPIED, STATE_TOMBSTONE, VALUE_CAP,
};
use lock::LockBackend;
use probe::InsertSlot;
use region::ShmRegion;

/// Outcome of a table mutation. The discriminants are the stable
/// cross-process return-code surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum OpStatus {
    Ok = 0,
    NotFound = -1,
    NoSpace = -2,
    Duplicate = -3,
}

impl OpStatus {
    /// Stable integer code for foreign callers.
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Point-in-time table statistics, computed under the read lock.
#[derive(Debug, Clone)]
pub struct TableStats {
    pub capacity: usize,
    pub live: u32,
    pub tombstones: u32,
    pub load_factor: f64,
    pub hash_seed: u32,
    /// Mean probe count over Occupied slots (1.0 = every key on its
    /// home slot). 0 for an empty table.
    pub avg_probe: f64,
    pub max_probe: u32,
}

impl fmt::Display for TableStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "capacity={} live={} tombstones={} load={:.4} seed={:#010x} avg_probe={:.2} max_probe={}",
            self.capacity,
            self.live,
            self.tombstones,
            self.load_factor,
            self.hash_seed,
            self.avg_probe,
            self.max_probe
        )
    }
}

/// Handle onto the shared status table.
///
/// Cheap to hold, safe to share across threads; every operation
/// synchronizes through the lock in the segment. Dropping the handle
/// unmaps the segment but never destroys it; see [`region::unlink`].
pub struct StatusTable {
    region: ShmRegion,
}

impl StatusTable {
    /// Open (or create) the default reader/writer-lock segment.
    pub fn open_default() -> Result<Self> {
        Self::open(region::RWLOCK_SEGMENT_NAME, LockBackend::RwLock)
    }

    /// Open (or create) a named segment with the given lock backend.
    ///
    /// Every process attaching to one segment must use the backend its
    /// creator used; the two well-known segment names encode it.
    pub fn open(name: &str, backend: LockBackend) -> Result<Self> {
        Ok(StatusTable {
            region: ShmRegion::open(name, backend)?,
        })
    }

    /// Whether this process created (and initialized) the segment.
    pub fn is_creator(&self) -> bool {
        self.region.is_creator()
    }

    fn header(&self) -> &SharedHeader {
        self.region.header()
    }

    /// Caller must hold the write lock.
    unsafe fn header_mut(&self) -> &mut SharedHeader {
        self.region.header_mut()
    }

    /// Insert a new key. Refuses keys that are already present.
    pub fn add(&self, key: i32, value: &[u8]) -> OpStatus {
        if value.len() >= VALUE_CAP {
            return OpStatus::NoSpace;
        }
        let _guard = self.region.lock().write();
        let header = unsafe { self.header_mut() };
        insert_new(header, key, value)
    }

    /// Replace the value of an existing key.
    pub fn update(&self, key: i32, value: &[u8]) -> OpStatus {
        if value.len() >= VALUE_CAP {
            return OpStatus::NoSpace;
        }
        let _guard = self.region.lock().write();
        let header = unsafe { self.header_mut() };
        match probe::find_occupied(&header.slots, header.hash_seed, key) {
            Some(idx) => {
                header.slots[idx].set_value(value);
                OpStatus::Ok
            }
            None => OpStatus::NotFound,
        }
    }

    /// Insert or overwrite.
    pub fn upsert(&self, key: i32, value: &[u8]) -> OpStatus {
        if value.len() >= VALUE_CAP {
            return OpStatus::NoSpace;
        }
        let _guard = self.region.lock().write();
        let header = unsafe { self.header_mut() };
        if let Some(idx) = probe::find_occupied(&header.slots, header.hash_seed, key) {
            header.slots[idx].set_value(value);
            return OpStatus::Ok;
        }
        let status = insert_new(header, key, value);
        // The key was absent and we still hold the write lock.
        debug_assert_ne!(status, OpStatus::Duplicate);
        status
    }

    /// Copy out the value stored for `key`.
    pub fn get(&self, key: i32) -> Option<Vec<u8>> {
        let _guard = self.region.lock().read();
        let header = self.header();
        probe::find_occupied(&header.slots, header.hash_seed, key)
            .map(|idx| header.slots[idx].value_bytes().to_vec())
    }

    /// Tombstone the slot holding `key`.
    pub fn remove(&self, key: i32) -> OpStatus {
        let _guard = self.region.lock().write();
        let header = unsafe { self.header_mut() };
        match probe::find_occupied(&header.slots, header.hash_seed, key) {
            Some(idx) => {
                header.slots[idx].state = STATE_TOMBSTONE;
                header.live_count -= 1;
                header.tomb_count += 1;
                OpStatus::Ok
            }
            None => OpStatus::NotFound,
        }
    }

    pub fn contains(&self, key: i32) -> bool {
        let _guard = self.region.lock().read();
        let header = self.header();
        probe::find_occupied(&header.slots, header.hash_seed, key).is_some()
    }

    /// Drop every entry. The hash seed survives; only slot states reset.
    pub fn clear(&self) -> OpStatus {
        let _guard = self.region.lock().write();
        let header = unsafe { self.header_mut() };
        for slot in header.slots.iter_mut() {
            slot.state = STATE_EMPTY;
        }
        header.live_count = 0;
        header.tomb_count = 0;
        OpStatus::Ok
    }

    /// Number of live entries.
    pub fn count(&self) -> u32 {
        let _guard = self.region.lock().read();
        self.header().live_count as u32
    }

    /// `live / CAPACITY`.
    pub fn load_factor(&self) -> f64 {
        let _guard = self.region.lock().read();
        self.header().live_count as f64 / CAPACITY as f64
    }

    /// Overwrite values for the subset of `entries` whose keys are
    /// present and whose values fit, under one write acquisition.
    /// Returns the number updated; oversize or absent entries are
    /// skipped, not errors.
    pub fn batch_update(&self, entries: &HashMap<i32, Vec<u8>>) -> usize {
        let _guard = self.region.lock().write();
        let header = unsafe { self.header_mut() };
        let seed = header.hash_seed;

        let mut updated = 0;
        for (&key, value) in entries {
            if value.len() >= VALUE_CAP {
                continue;
            }
            if let Some(idx) = probe::find_occupied(&header.slots, seed, key) {
                header.slots[idx].set_value(value);
                updated += 1;
            }
        }
        updated
    }

    /// Snapshot every live entry under one read acquisition.
    /// Tombstoned keys are invisible.
    pub fn batch_get(&self) -> HashMap<i32, Vec<u8>> {
        let _guard = self.region.lock().read();
        let header = self.header();

        let mut out = HashMap::with_capacity(header.live_count as usize);
        for slot in header.slots.iter() {
            if slot.state == STATE_OCCUPIED {
                out.insert(slot.key, slot.value_bytes().to_vec());
            }
        }
        out
    }

    /// Recompute probe-distance statistics under the read lock.
    pub fn stats(&self) -> TableStats {
        let _guard = self.region.lock().read();
        let header = self.header();
        let seed = header.hash_seed;

        let mut total = 0u64;
        let mut max = 0u32;
        let mut occupied = 0u32;
        for idx in 0..CAPACITY {
            if header.slots[idx].state != STATE_OCCUPIED {
                continue;
            }
            let dist = probe::probe_distance(&header.slots, seed, idx);
            total += u64::from(dist);
            max = max.max(dist);
            occupied += 1;
        }

        TableStats {
            capacity: CAPACITY,
            live: header.live_count as u32,
            tombstones: header.tomb_count as u32,
            load_factor: header.live_count as f64 / CAPACITY as f64,
            hash_seed: seed,
            avg_probe: if occupied == 0 {
                0.0
            } else {
                total as f64 / f64::from(occupied)
            },
            max_probe: max,
        }
    }
}

/// Insert a key known (or assumed) absent. Caller holds the write lock
/// and has already validated the value length.
fn insert_new(header: &mut SharedHeader, key: i32, value: &[u8]) -> OpStatus {
    // Lazy deletion lets tombstones accumulate even while live stays
    // low; compact before the combined load crosses the ceiling.
    if (header.live_count + header.tomb_count) as u32 >= MAX_LIVE {
        rehash_in_place(header);
    }

    let seed = header.hash_seed;
    match probe::find_insert_slot(&header.slots, seed, key) {
        InsertSlot::Duplicate(_) => OpStatus::Duplicate,
        InsertSlot::Free(idx) => {
            if header.live_count as u32 >= MAX_LIVE {
                return OpStatus::NoSpace;
            }
            if header.slots[idx].state == STATE_TOMBSTONE {
                header.tomb_count -= 1;
            }
            let slot = &mut header.slots[idx];
            slot.key = key;
            slot.set_value(value);
            slot.hash_primary = hash::primary(seed, key);
            slot.state = STATE_OCCUPIED;
            header.live_count += 1;
            OpStatus::Ok
        }
        InsertSlot::Full => OpStatus::NoSpace,
    }
}

/// Rebuild the table in place, dropping every tombstone. Caller holds
/// the write lock. The snapshot lives outside the segment; the seed and
/// thus every probe sequence stay the same, only tombstones disappear.
fn rehash_in_place(header: &mut SharedHeader) {
    let seed = header.hash_seed;
    let dropped = header.tomb_count;

    let mut entries: Vec<(i32, [u8; VALUE_CAP])> = Vec::with_capacity(header.live_count as usize);
    for slot in header.slots.iter() {
        if slot.state == STATE_OCCUPIED {
            entries.push((slot.key, slot.value));
        }
    }

    for slot in header.slots.iter_mut() {
        slot.state = STATE_EMPTY;
    }
    header.live_count = 0;
    header.tomb_count = 0;

    for (key, value) in entries {
        match probe::find_insert_slot(&header.slots, seed, key) {
            InsertSlot::Free(idx) => {
                let slot = &mut header.slots[idx];
                slot.key = key;
                slot.value = value;
                slot.hash_primary = hash::primary(seed, key);
                slot.state = STATE_OCCUPIED;
                header.live_count += 1;
            }
            // Every re-inserted key was live a moment ago and the table
            // has no tombstones now, so below the load ceiling a failed
            // re-insert means the probe policy itself is broken.
            InsertSlot::Duplicate(_) | InsertSlot::Full => {
                unreachable!("rehash could not place key {key}")
            }
        }
    }

    debug!(live = header.live_count, dropped, "rehashed table in place");
}
