//! Concurrent and cross-mapping behavior.
//!
//! Cross-process visibility is exercised with two independent mappings
//! of the same segment inside one process: each handle maps the object
//! at its own base address, so anything address-dependent in the
//! segment would break exactly as it would between processes.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use common::TestSegment;
use statusmem::OpStatus;

#[test]
fn second_mapping_observes_writes() {
    let seg = TestSegment::new("two_mappings");
    let writer = seg.open();
    let reader = seg.open();
    assert!(writer.is_creator());
    assert!(!reader.is_creator());

    assert_eq!(writer.add(7001, b"hello"), OpStatus::Ok);
    assert_eq!(reader.get(7001).as_deref(), Some(&b"hello"[..]));

    assert_eq!(reader.remove(7001), OpStatus::Ok);
    assert!(!writer.contains(7001));
}

#[test]
fn reopening_preserves_contents() {
    let seg = TestSegment::new("reopen");
    {
        let table = seg.open();
        assert_eq!(table.add(1, b"persistent"), OpStatus::Ok);
    }

    // The handle is gone but the segment is not.
    let table = seg.open();
    assert!(!table.is_creator());
    assert_eq!(table.get(1).as_deref(), Some(&b"persistent"[..]));
}

#[test]
fn concurrent_readers_make_progress() {
    let seg = TestSegment::new("parallel_readers");
    let table = Arc::new(seg.open());

    for key in 0..512 {
        let value = format!("r{key}");
        assert_eq!(table.add(key, value.as_bytes()), OpStatus::Ok);
    }

    let mut readers = Vec::new();
    for _ in 0..4 {
        let table = Arc::clone(&table);
        readers.push(thread::spawn(move || {
            for round in 0..5_000 {
                let key = round % 512;
                let expected = format!("r{key}");
                assert_eq!(table.get(key).as_deref(), Some(expected.as_bytes()));
            }
        }));
    }
    for reader in readers {
        reader.join().unwrap();
    }
}

#[test]
fn readers_never_see_torn_values() {
    let seg = TestSegment::new("reader_writer");
    let table = Arc::new(seg.open());
    assert_eq!(table.add(1, b"gen-0"), OpStatus::Ok);

    let done = Arc::new(AtomicBool::new(false));

    let writer = {
        let table = Arc::clone(&table);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            for generation in 1..500 {
                let value = format!("gen-{generation}");
                assert_eq!(table.upsert(1, value.as_bytes()), OpStatus::Ok);
            }
            done.store(true, Ordering::Release);
        })
    };

    let mut readers = Vec::new();
    for _ in 0..3 {
        let table = Arc::clone(&table);
        let done = Arc::clone(&done);
        readers.push(thread::spawn(move || {
            while !done.load(Ordering::Acquire) {
                let value = table.get(1).expect("key 1 is never removed");
                let text = std::str::from_utf8(&value).expect("value is utf-8");
                assert!(text.starts_with("gen-"), "torn value {text:?}");
                let generation: u32 = text["gen-".len()..].parse().expect("numeric generation");
                assert!(generation < 500);
            }
        }));
    }

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
}

#[test]
fn writers_on_separate_mappings_do_not_collide() {
    let seg = TestSegment::new("two_writers");
    let a = seg.open();
    let b = seg.open();

    let first = thread::spawn(move || {
        for key in 0..500 {
            assert_eq!(a.add(key, b"from-a"), OpStatus::Ok);
        }
        a
    });
    let second = thread::spawn(move || {
        for key in 500..1000 {
            assert_eq!(b.add(key, b"from-b"), OpStatus::Ok);
        }
        b
    });

    let a = first.join().unwrap();
    let _b = second.join().unwrap();

    assert_eq!(a.count(), 1000);
    assert_eq!(a.get(250).as_deref(), Some(&b"from-a"[..]));
    assert_eq!(a.get(750).as_deref(), Some(&b"from-b"[..]));
}
