//! Write-to-temp-then-rename, used when saving received artifacts.
//!
//! The temp file sits next to the target as `.<name>.part`, so a crash
//! mid-write never leaves a truncated file under the final name. Parent
//! directories are created if absent.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::error;

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    path.with_file_name(format!(".{name}.part"))
}

/// Atomically write `content` to `path`.
///
/// On rename failure the temp file is removed.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    let tmp_path = temp_path(path);

    std::fs::write(&tmp_path, content).map_err(|e| {
        error!(
            event = "atomic_write_failure",
            path = %tmp_path.display(),
            error = %e,
            "Failed to write temp file"
        );
        e
    })?;

    std::fs::rename(&tmp_path, path).map_err(|e| {
        error!(
            event = "atomic_rename_failure",
            from = %tmp_path.display(),
            to = %path.display(),
            error = %e,
            "Failed to rename temp file"
        );
        let _ = std::fs::remove_file(&tmp_path);
        e
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(name);
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_atomic_write_creates_parents() {
        let dir = scratch("roomdrop_test_atomic");
        let path = dir.join("nested").join("photo.jpg");

        atomic_write(&path, b"hello").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_atomic_write_overwrites_without_leftovers() {
        let dir = scratch("roomdrop_test_atomic2");
        let path = dir.join("notes.txt");

        atomic_write(&path, b"first").unwrap();
        atomic_write(&path, b"second").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        assert!(!dir.join(".notes.txt.part").exists());

        let entries = std::fs::read_dir(&dir).unwrap().count();
        assert_eq!(entries, 1);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
