//! Assetship-State: deployment record persistence
//!
//! This crate owns the only piece of state that outlives a single pipeline
//! execution: the identity of the image that was last deployed.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: crash safety. The record is either the previous value or the new
//! value, never a partial write.
//!
//! ## Key Components
//!
//! - `ImageIdentity`: opaque, content-derived image digest
//! - `DeploymentRecordStore`: narrow read/write interface over the record
//! - `FileRecordStore`: single-value text file at a well-known path

mod error;
pub mod fakes;
pub mod file_record;
pub mod storage_traits;

pub use error::StorageError;
pub use file_record::FileRecordStore;
pub use storage_traits::{DeploymentRecordStore, ImageIdentity, StorageResult};
