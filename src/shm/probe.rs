//! Double-hashing probe walks over the slot array.
//!
//! [`find_occupied`] and [`find_insert_slot`] are the only two readers of
//! table structure; every public operation is composed from them. A probe
//! walk ends at the first Empty slot; tombstones conduct it onward.

use super::hash;
use super::layout::{Slot, CAPACITY, INDEX_MASK, STATE_EMPTY, STATE_OCCUPIED, STATE_TOMBSTONE};

/// Outcome of an insert-position search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertSlot {
    /// The key is already present at this index.
    Duplicate(usize),
    /// Usable slot: the first tombstone on the probe path, or the
    /// terminating Empty slot if the path had none.
    Free(usize),
    /// Probe sequence exhausted with no usable slot.
    Full,
}

/// Find the slot holding `key`, if any.
pub fn find_occupied(slots: &[Slot], seed: u32, key: i32) -> Option<usize> {
    let step = hash::secondary(seed, key);
    let mut pos = hash::primary(seed, key);

    for _ in 0..CAPACITY {
        let slot = &slots[pos as usize];
        match slot.state {
            STATE_EMPTY => return None,
            STATE_OCCUPIED if slot.key == key => return Some(pos as usize),
            _ => {}
        }
        pos = (pos + step) & INDEX_MASK;
    }

    None
}

/// Find where `key` should be inserted.
///
/// Reuses the first tombstone seen on the probe path so removed slots
/// are reclaimed before fresh ones.
pub fn find_insert_slot(slots: &[Slot], seed: u32, key: i32) -> InsertSlot {
    let step = hash::secondary(seed, key);
    let mut pos = hash::primary(seed, key);
    let mut first_tomb: Option<usize> = None;

    for _ in 0..CAPACITY {
        let slot = &slots[pos as usize];
        match slot.state {
            STATE_OCCUPIED if slot.key == key => return InsertSlot::Duplicate(pos as usize),
            STATE_TOMBSTONE => {
                if first_tomb.is_none() {
                    first_tomb = Some(pos as usize);
                }
            }
            STATE_EMPTY => return InsertSlot::Free(first_tomb.unwrap_or(pos as usize)),
            _ => {}
        }
        pos = (pos + step) & INDEX_MASK;
    }

    match first_tomb {
        Some(idx) => InsertSlot::Free(idx),
        None => InsertSlot::Full,
    }
}

/// Number of probes needed to reach occupied slot `idx` from its cached
/// primary hash. Bounded by CAPACITY steps; the table invariant
/// guarantees termination within that bound.
pub fn probe_distance(slots: &[Slot], seed: u32, idx: usize) -> u32 {
    let slot = &slots[idx];
    let step = hash::secondary(seed, slot.key);
    let mut pos = slot.hash_primary;

    for s in 0..CAPACITY as u32 {
        if pos as usize == idx {
            return s + 1;
        }
        pos = (pos + step) & INDEX_MASK;
    }

    CAPACITY as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED: u32 = 0x5eed_0001;

    fn empty_table() -> Vec<Slot> {
        vec![Slot::empty(); CAPACITY]
    }

    fn occupy(slots: &mut [Slot], idx: usize, key: i32) {
        let slot = &mut slots[idx];
        slot.key = key;
        slot.state = STATE_OCCUPIED;
        slot.hash_primary = hash::primary(SEED, key);
        slot.set_value(b"v");
    }

    /// Index of the s-th probe for `key`.
    fn probe_at(key: i32, s: u32) -> usize {
        ((hash::primary(SEED, key) + s * hash::secondary(SEED, key)) & INDEX_MASK) as usize
    }

    #[test]
    fn empty_table_finds_nothing() {
        let slots = empty_table();
        assert_eq!(find_occupied(&slots, SEED, 1), None);
        assert_eq!(find_insert_slot(&slots, SEED, 1), InsertSlot::Free(probe_at(1, 0)));
    }

    #[test]
    fn lookup_walks_past_a_collision() {
        let mut slots = empty_table();
        let key = 17;
        // A different key squats on `key`'s home slot; `key` lives one
        // probe further along its own sequence.
        occupy(&mut slots, probe_at(key, 0), key + 9999);
        occupy(&mut slots, probe_at(key, 1), key);

        assert_eq!(find_occupied(&slots, SEED, key), Some(probe_at(key, 1)));
    }

    #[test]
    fn tombstone_does_not_terminate_lookup() {
        let mut slots = empty_table();
        let key = 42;
        slots[probe_at(key, 0)].state = STATE_TOMBSTONE;
        occupy(&mut slots, probe_at(key, 1), key);

        assert_eq!(find_occupied(&slots, SEED, key), Some(probe_at(key, 1)));
    }

    #[test]
    fn empty_slot_terminates_lookup() {
        let mut slots = empty_table();
        let key = 42;
        // Key sits beyond an Empty slot on its probe path; it must not
        // be found, because inserts never skip over Empty.
        occupy(&mut slots, probe_at(key, 1), key);

        assert_eq!(find_occupied(&slots, SEED, key), None);
    }

    #[test]
    fn insert_prefers_first_tombstone() {
        let mut slots = empty_table();
        let key = 5;
        occupy(&mut slots, probe_at(key, 0), key + 1000);
        slots[probe_at(key, 1)].state = STATE_TOMBSTONE;
        slots[probe_at(key, 2)].state = STATE_TOMBSTONE;

        assert_eq!(find_insert_slot(&slots, SEED, key), InsertSlot::Free(probe_at(key, 1)));
    }

    #[test]
    fn insert_detects_duplicate_past_tombstone() {
        let mut slots = empty_table();
        let key = 5;
        slots[probe_at(key, 0)].state = STATE_TOMBSTONE;
        occupy(&mut slots, probe_at(key, 1), key);

        assert_eq!(
            find_insert_slot(&slots, SEED, key),
            InsertSlot::Duplicate(probe_at(key, 1))
        );
    }

    #[test]
    fn exhausted_table_reports_full() {
        let mut slots = empty_table();
        for idx in 0..CAPACITY {
            // Occupied by keys that never match the probed key.
            occupy(&mut slots, idx, -1);
        }
        assert_eq!(find_occupied(&slots, SEED, 3), None);
        assert_eq!(find_insert_slot(&slots, SEED, 3), InsertSlot::Full);
    }

    #[test]
    fn exhausted_table_with_tombstone_still_inserts() {
        let mut slots = empty_table();
        for idx in 0..CAPACITY {
            occupy(&mut slots, idx, -1);
        }
        let key = 3;
        let tomb = probe_at(key, 7);
        slots[tomb].state = STATE_TOMBSTONE;

        assert_eq!(find_insert_slot(&slots, SEED, key), InsertSlot::Free(tomb));
    }

    #[test]
    fn probe_distance_counts_from_home_slot() {
        let mut slots = empty_table();
        let key = 88;
        occupy(&mut slots, probe_at(key, 2), key);

        assert_eq!(probe_distance(&slots, SEED, probe_at(key, 2)), 3);
    }
}
