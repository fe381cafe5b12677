//! Artifact archive extraction.

use std::io::{Cursor, Read};
use std::path::Path;

use assetship_core::{AssetPath, ServiceError, ServiceResult};
use tracing::debug;

/// Default ceiling for a single extracted file.
pub const DEFAULT_MAX_ENTRY_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Upper bound on buffer pre-allocation; the declared entry size is
/// untrusted.
const PREALLOC_LIMIT: u64 = 1024 * 1024;

/// Extract a zip archive held in memory under `dest`, preserving relative
/// paths. Entries that would land outside `dest`, that declare more than
/// `max_entry_bytes`, or that hold more data than they declare reject the
/// whole archive.
///
/// Returns the number of files written.
pub fn extract_zip(bytes: &[u8], dest: &Path, max_entry_bytes: u64) -> ServiceResult<usize> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ServiceError::Rejected(format!("artifact is not a valid zip archive: {e}")))?;

    let mut written = 0;
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| ServiceError::Rejected(format!("reading archive entry {index}: {e}")))?;

        let name = entry.name().to_string();
        let relative = entry
            .enclosed_name()
            .map(Path::to_path_buf)
            .ok_or_else(|| ServiceError::Rejected(format!("unsafe path in archive: {name}")))?;

        if entry.is_dir() {
            std::fs::create_dir_all(dest.join(&relative))?;
            continue;
        }

        let path = AssetPath::from_relative(&relative)
            .map_err(|e| ServiceError::Rejected(e.to_string()))?;
        let target = path.join_onto(dest);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let declared = entry.size();
        if declared > max_entry_bytes {
            return Err(ServiceError::Rejected(format!(
                "archive entry {name} declares {declared} bytes, limit is {max_entry_bytes}"
            )));
        }
        let mut content = Vec::with_capacity(declared.min(PREALLOC_LIMIT) as usize);
        (&mut entry)
            .take(declared.saturating_add(1))
            .read_to_end(&mut content)?;
        if content.len() as u64 > declared {
            return Err(ServiceError::Rejected(format!(
                "archive entry {name} holds more than its declared {declared} bytes"
            )));
        }
        std::fs::write(&target, content)?;
        written += 1;
    }

    debug!(files = written, dest = %dest.display(), "artifact archive extracted");
    Ok(written)
}
