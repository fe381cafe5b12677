//! MergeEngine: overlay an incoming asset tree on a baseline.
//!
//! Same relative path ⇒ incoming overwrites; new path ⇒ added; baseline-only
//! paths are kept unchanged. Paths that vanished upstream are never removed.

use std::collections::BTreeSet;
use std::path::Path;

use crate::domain::{AssetBundle, MergedTree, Result};
use crate::obs;
use crate::staging::StagingArea;

/// Merge `incoming` over `baseline`.
///
/// Pure and deterministic: both inputs are path-ordered maps, so the output
/// and the overwritten/added sets do not depend on insertion order.
pub fn merge(baseline: AssetBundle, incoming: AssetBundle) -> MergedTree {
    let mut files = baseline;
    let mut overwritten = BTreeSet::new();
    let mut added = BTreeSet::new();

    for (path, content) in incoming {
        if files.insert(path.clone(), content).is_some() {
            overwritten.insert(path);
        } else {
            added.insert(path);
        }
    }

    MergedTree {
        files,
        overwritten,
        added,
    }
}

pub struct MergeEngine;

impl MergeEngine {
    /// Merge, then clear the incoming staging directory: the merged tree is
    /// now the only copy of the incoming files.
    pub fn merge_staged(
        baseline: AssetBundle,
        incoming: AssetBundle,
        incoming_dir: &Path,
    ) -> Result<MergedTree> {
        let merged = merge(baseline, incoming);
        StagingArea::reset_dir(incoming_dir)?;
        obs::emit_merge_completed(
            merged.files.len(),
            merged.overwritten.len(),
            merged.added.len(),
            merged.retained(),
        );
        Ok(merged)
    }
}
