//! Crash-safe document writes.
//!
//! Every file-backend write serializes the full new value to a temporary
//! sibling file and then renames it over the target path. `rename` within one
//! directory is atomic on the platforms we support, so a crash or power loss
//! mid-write leaves either the old complete file or the new complete file on
//! disk — never a half-written one.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::PersistenceError;

/// Temporary sibling path for `target`. Kept in the same directory so the
/// final rename never crosses a filesystem boundary.
pub(crate) fn temp_sibling(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    target.with_file_name(name)
}

/// Atomically replace `target` with `contents`.
///
/// On failure the previous file is left intact and the error is surfaced to
/// the caller; a stale `.tmp` sibling may remain and is overwritten by the
/// next write.
pub(crate) fn write_atomic(target: &Path, contents: &str) -> Result<(), PersistenceError> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = temp_sibling(target);
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp, target)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_creates_parent_and_file() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("nested").join("users.json");
        write_atomic(&target, "[]").unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "[]");
        assert!(!temp_sibling(&target).exists());
    }

    #[test]
    fn test_write_replaces_whole_file() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("settings.json");
        write_atomic(&target, "{\"maintenanceMode\":true}").unwrap();
        write_atomic(&target, "{}").unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "{}");
    }

    #[test]
    fn test_interrupted_write_leaves_original_intact() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("chat.json");
        write_atomic(&target, "[\"old\"]").unwrap();

        // Simulate a crash after the temp file is written but before rename.
        fs::write(temp_sibling(&target), "[\"half-writ").unwrap();

        assert_eq!(fs::read_to_string(&target).unwrap(), "[\"old\"]");

        // The next write overwrites the stale temp file and completes.
        write_atomic(&target, "[\"new\"]").unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "[\"new\"]");
        assert!(!temp_sibling(&target).exists());
    }
}
