//! In-memory fakes for storage traits (testing only)
//!
//! `MemoryRecordStore` satisfies the `DeploymentRecordStore` contract and
//! counts reads and writes so callers can assert that a record was never
//! rewritten.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::storage_traits::*;

/// In-memory deployment record.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    value: Mutex<Option<ImageIdentity>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a previously deployed identity.
    pub fn with_identity(identity: ImageIdentity) -> Self {
        let store = Self::default();
        *store.value.lock().unwrap() = Some(identity);
        store
    }

    /// Make every subsequent `write` fail with `StorageError::Unavailable`.
    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Current value without counting as a read.
    pub fn snapshot(&self) -> Option<ImageIdentity> {
        self.value.lock().unwrap().clone()
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeploymentRecordStore for MemoryRecordStore {
    async fn read(&self) -> StorageResult<Option<ImageIdentity>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.value.lock().unwrap().clone())
    }

    async fn write(&self, identity: &ImageIdentity) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(
                "memory record configured to fail".to_string(),
            ));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        *self.value.lock().unwrap() = Some(identity.clone());
        Ok(())
    }
}
