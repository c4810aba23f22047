//! Utilities for file operations with automatic parent directory creation.

use std::fs;
use std::path::Path;

use walkdir::WalkDir;

use crate::error::{Error, IoContext, Result};

/// Write a file, creating parent directories as needed.
///
/// This is a convenience function that combines creating the parent directory
/// with writing the file content, eliminating the common pattern of:
/// ```ignore
/// if let Some(parent) = path.parent() {
///     fs::create_dir_all(parent)?;
/// }
/// fs::write(path, content)?;
/// ```
pub fn write_file_with_dirs<P: AsRef<Path>, C: AsRef<[u8]>>(path: P, content: C) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).at(parent)?;
    }
    fs::write(path, content).at(path)?;
    Ok(())
}

/// Copy a directory tree. Existing files in `dst` are overwritten.
///
/// Returns the number of files copied.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<u64> {
    fs::create_dir_all(dst).at(dst)?;

    let mut copied = 0;
    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(src).to_path_buf();
            Error::io(path, e.into())
        })?;
        let relative = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).at(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).at(parent)?;
            }
            fs::copy(entry.path(), &target).at(entry.path())?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Copy a file or a directory to `dst`.
pub fn copy_entry(src: &Path, dst: &Path) -> Result<u64> {
    if src.is_dir() {
        return copy_dir_recursive(src, dst);
    }
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).at(parent)?;
    }
    fs::copy(src, dst).at(src)?;
    Ok(1)
}

/// Size of a file in megabytes.
pub fn file_size_mb(path: &Path) -> Result<f64> {
    let len = fs::metadata(path).at(path)?.len();
    Ok(len as f64 / (1024.0 * 1024.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_file_with_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/c.txt");
        write_file_with_dirs(&path, "hello").unwrap();
        assert_eq!(fs::read_to_string(path).unwrap(), "hello");
    }

    #[test]
    fn test_copy_dir_recursive_preserves_structure() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("x64/sub")).unwrap();
        fs::create_dir_all(src.join("empty")).unwrap();
        fs::write(src.join("drv.inf"), "inf").unwrap();
        fs::write(src.join("x64/sub/drv.sys"), "sys").unwrap();

        let dst = dir.path().join("dst");
        let copied = copy_dir_recursive(&src, &dst).unwrap();

        assert_eq!(copied, 2);
        assert!(dst.join("empty").is_dir());
        assert_eq!(fs::read_to_string(dst.join("x64/sub/drv.sys")).unwrap(), "sys");
    }

    #[test]
    fn test_copy_entry_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("tool.exe");
        fs::write(&src, "bin").unwrap();

        let dst = dir.path().join("mount/Windows/System32/tool.exe");
        assert_eq!(copy_entry(&src, &dst).unwrap(), 1);
        assert!(dst.is_file());
    }
}
