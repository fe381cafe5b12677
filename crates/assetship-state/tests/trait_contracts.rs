//! Trait contract tests for DeploymentRecordStore.
//!
//! Every conforming implementation must pass these; they run against both
//! the in-memory fake and the file-backed store.

use assetship_state::fakes::MemoryRecordStore;
use assetship_state::{DeploymentRecordStore, FileRecordStore, ImageIdentity};

fn id(s: &str) -> ImageIdentity {
    ImageIdentity::try_from(s).expect("valid identity")
}

async fn contract_absent_then_present(store: &dyn DeploymentRecordStore) {
    assert!(store.read().await.unwrap().is_none());
    store.write(&id("sha256:1111")).await.unwrap();
    assert_eq!(store.read().await.unwrap(), Some(id("sha256:1111")));
}

async fn contract_last_write_wins(store: &dyn DeploymentRecordStore) {
    store.write(&id("sha256:1111")).await.unwrap();
    store.write(&id("sha256:2222")).await.unwrap();
    store.write(&id("sha256:3333")).await.unwrap();
    assert_eq!(store.read().await.unwrap(), Some(id("sha256:3333")));
}

async fn contract_read_is_side_effect_free(store: &dyn DeploymentRecordStore) {
    store.write(&id("sha256:4444")).await.unwrap();
    for _ in 0..3 {
        assert_eq!(store.read().await.unwrap(), Some(id("sha256:4444")));
    }
}

// ===========================================================================
// MemoryRecordStore
// ===========================================================================

#[tokio::test]
async fn memory_absent_then_present() {
    contract_absent_then_present(&MemoryRecordStore::new()).await;
}

#[tokio::test]
async fn memory_last_write_wins() {
    contract_last_write_wins(&MemoryRecordStore::new()).await;
}

#[tokio::test]
async fn memory_read_is_side_effect_free() {
    let store = MemoryRecordStore::new();
    contract_read_is_side_effect_free(&store).await;
    assert_eq!(store.write_count(), 1);
    assert_eq!(store.read_count(), 3);
}

#[tokio::test]
async fn memory_failed_write_keeps_previous_value() {
    let store = MemoryRecordStore::with_identity(id("sha256:old"));
    store.fail_writes();

    assert!(store.write(&id("sha256:new")).await.is_err());
    assert_eq!(store.read().await.unwrap(), Some(id("sha256:old")));
    assert_eq!(store.write_count(), 0);
}

// ===========================================================================
// FileRecordStore
// ===========================================================================

#[tokio::test]
async fn file_absent_then_present() {
    let dir = tempfile::tempdir().unwrap();
    contract_absent_then_present(&FileRecordStore::new(dir.path().join("digest"))).await;
}

#[tokio::test]
async fn file_last_write_wins() {
    let dir = tempfile::tempdir().unwrap();
    contract_last_write_wins(&FileRecordStore::new(dir.path().join("digest"))).await;
}

#[tokio::test]
async fn file_read_is_side_effect_free() {
    let dir = tempfile::tempdir().unwrap();
    contract_read_is_side_effect_free(&FileRecordStore::new(dir.path().join("digest"))).await;
}

#[tokio::test]
async fn file_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("last_digest.txt");

    FileRecordStore::new(&path)
        .write(&id("sha256:persisted"))
        .await
        .unwrap();

    let reopened = FileRecordStore::new(&path);
    assert_eq!(reopened.read().await.unwrap(), Some(id("sha256:persisted")));
}
