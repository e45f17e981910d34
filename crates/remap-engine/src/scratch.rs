//! Temporary stores used while re-chunking a single unit.
//!
//! A scratch store owns a uniquely named directory that is removed when the
//! guard is dropped, whether the unit succeeded, failed or panicked. A
//! process that dies mid-unit leaves its directory behind; [`sweep_stale`]
//! removes such leftovers at start-up.

use std::path::Path;

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::config::CompressionConfig;
use crate::error::{RemapError, Result};
use crate::store::{create_store, declare_array, ArrayHandle, ArraySpec};

/// Directory name prefix of scratch stores.
pub const SCRATCH_PREFIX: &str = "remap-scratch-";

/// A scratch store holding one intermediate array.
pub struct ScratchStore {
    // Dropped before `dir`, so the store is closed before removal.
    array: ArrayHandle,
    dir: TempDir,
}

impl ScratchStore {
    /// Create a scratch directory under `scratch_dir` and declare `spec` in it.
    pub fn create(
        scratch_dir: &Path,
        spec: &ArraySpec,
        compression: &CompressionConfig,
    ) -> Result<Self> {
        std::fs::create_dir_all(scratch_dir)?;
        let dir = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir_in(scratch_dir)
            .map_err(|e| {
                RemapError::StorageError(format!(
                    "cannot create scratch store in {}: {e}",
                    scratch_dir.display()
                ))
            })?;
        let store = create_store(dir.path())?;
        let array = declare_array(&store, spec, compression)?;
        debug!(path = %dir.path().display(), chunks = ?spec.chunks, "Created scratch store");
        Ok(Self { array, dir })
    }

    pub fn array(&self) -> &ArrayHandle {
        &self.array
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Remove scratch directories left behind by crashed processes.
///
/// Returns the number of directories removed. Must only be called while no
/// remap is running against `scratch_dir`.
pub fn sweep_stale(scratch_dir: &Path) -> Result<usize> {
    if !scratch_dir.is_dir() {
        return Ok(0);
    }
    let mut removed = 0;
    for entry in std::fs::read_dir(scratch_dir)? {
        let entry = entry?;
        let is_scratch = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(SCRATCH_PREFIX));
        if !is_scratch || !entry.path().is_dir() {
            continue;
        }
        match std::fs::remove_dir_all(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => warn!(path = %entry.path().display(), error = %e, "Failed to remove stale scratch store"),
        }
    }
    if removed > 0 {
        debug!(removed, dir = %scratch_dir.display(), "Removed stale scratch stores");
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    #[test]
    fn test_scratch_removed_on_drop() {
        let root = tempfile::tempdir().expect("Failed to create temp dir");
        let spec = ArraySpec::float32("tmp", vec![4, 64], vec![2, 32]);
        let scratch = ScratchStore::create(
            root.path(),
            &spec,
            &EngineConfig::default().scratch_compression,
        )
        .expect("Failed to create scratch store");

        let path = scratch.path().to_path_buf();
        assert!(path.is_dir());
        assert!(path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(SCRATCH_PREFIX)));
        drop(scratch);
        assert!(!path.exists());
    }

    #[test]
    fn test_scratch_stores_are_unique() {
        let root = tempfile::tempdir().expect("Failed to create temp dir");
        let spec = ArraySpec::float32("tmp", vec![8], vec![4]);
        let compression = EngineConfig::default().scratch_compression;
        let a = ScratchStore::create(root.path(), &spec, &compression).unwrap();
        let b = ScratchStore::create(root.path(), &spec, &compression).unwrap();
        assert_ne!(a.path(), b.path());
    }

    #[test]
    fn test_sweep_stale() {
        let root = tempfile::tempdir().expect("Failed to create temp dir");
        std::fs::create_dir(root.path().join(format!("{SCRATCH_PREFIX}dead"))).unwrap();
        std::fs::create_dir(root.path().join("keep-me")).unwrap();

        assert_eq!(sweep_stale(root.path()).unwrap(), 1);
        assert!(root.path().join("keep-me").is_dir());
        assert_eq!(sweep_stale(&root.path().join("missing")).unwrap(), 0);
    }
}
