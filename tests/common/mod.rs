#![allow(dead_code)]

use statusmem::{LockBackend, StatusTable};

/// Each test owns a uniquely named segment so parallel tests never
/// collide; any stale segment from a crashed run is cleared up front
/// and the segment is unlinked again on drop.
pub struct TestSegment {
    name: String,
}

impl TestSegment {
    pub fn new(tag: &str) -> Self {
        let name = format!("/statusmem_test_{}_{}", tag, std::process::id());
        let _ = statusmem::unlink(&name);
        TestSegment { name }
    }

    pub fn open(&self) -> StatusTable {
        self.open_with(LockBackend::RwLock)
    }

    pub fn open_with(&self, backend: LockBackend) -> StatusTable {
        StatusTable::open(&self.name, backend).expect("open test segment")
    }
}

impl Drop for TestSegment {
    fn drop(&mut self) {
        let _ = statusmem::unlink(&self.name);
    }
}
