//! Storage layer for turnloop - one directory per loop slug.
//!
//! Each record is a front-matter state file plus small sidecar files for lock
//! metadata and background job state. Writes go through a temp file and a
//! rename so readers never observe a half-written value.

pub mod frontmatter;
mod loops;

use std::fs;
use std::path::Path;

use crate::error::{Result, TurnloopError};
use crate::id::generate_nonce;

pub use loops::{LoopPaths, LoopStore, RecordHandle, RecordPatch};

/// Replace `path` with `contents` via a sibling temp file and rename
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let name = path
        .file_name()
        .ok_or_else(|| TurnloopError::Storage(format!("Not a file path: {}", path.display())))?
        .to_string_lossy();
    let tmp = path.with_file_name(format!(".{}.{}.tmp", name, generate_nonce()));

    fs::write(&tmp, contents)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_replaces_contents() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("lock_owner");

        write_atomic(&path, "first").unwrap();
        write_atomic(&path, "second").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
        let leftovers = fs::read_dir(temp.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_write_atomic_missing_parent_fails() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("gone").join("state.md");
        assert!(write_atomic(&path, "x").is_err());
        assert!(!temp.path().join("gone").exists());
    }
}
