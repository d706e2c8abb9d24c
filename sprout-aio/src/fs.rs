/*
File: sprout-aio/src/fs.rs
Purpose: Filesystem primitives built around build-aside-then-rename swaps.
*/
use std::fs::{self, Permissions};
use std::io::{self, Write};
#[cfg(unix)]
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sprout_common::error::{Result, SproutError};
use tempfile::NamedTempFile;
use tracing::{debug, error, warn};

/// Creates a directory and all its parent components if they are missing.
pub fn create_dir_all(path: &Path) -> Result<()> {
    debug!("Creating directory recursively: {}", path.display());
    fs::create_dir_all(path).map_err(|e| {
        error!("Failed create dir {}: {}", path.display(), e);
        SproutError::from(e)
    })
}

/// Removes whatever is at `path` (symlink, file or directory tree) without
/// following symlinks. A missing path is not an error.
pub fn remove_path(path: &Path) -> Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    debug!("Removing {}", path.display());
    let result = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            error!("Failed to remove {}: {}", path.display(), e);
            Err(e.into())
        }
    }
}

/// Removes `dir` only if it is an empty directory. Returns whether it was
/// removed; a missing or non-empty directory is left alone.
pub fn remove_dir_if_empty(dir: &Path) -> Result<bool> {
    let mut entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    if entries.next().is_some() {
        return Ok(false);
    }
    match fs::remove_dir(dir) {
        Ok(()) => {
            debug!("Removed empty directory {}", dir.display());
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Reads a symlink's target, `None` if `path` is missing or not a symlink.
pub fn read_link_opt(path: &Path) -> Option<PathBuf> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => fs::read_link(path).ok(),
        _ => None,
    }
}

/// Temp sibling name for `path`: `.<name>.tmp-<uuid>`.
fn temp_sibling(path: &Path) -> Result<PathBuf> {
    let parent = path.parent().ok_or_else(|| {
        SproutError::Generic(format!("Cannot get parent directory for {}", path.display()))
    })?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    Ok(parent.join(format!(".{}.tmp-{}", name, uuid::Uuid::new_v4().simple())))
}

/// Points `link` at `target`, replacing any existing symlink in a single
/// rename so the name never disappears. Returns the previous target.
///
/// Fails if `link` exists and is not a symlink.
#[cfg(unix)]
pub fn replace_symlink_atomic(target: &Path, link: &Path) -> Result<Option<PathBuf>> {
    if let Ok(meta) = fs::symlink_metadata(link) {
        if !meta.file_type().is_symlink() {
            return Err(SproutError::Generic(format!(
                "{} exists and is not a symlink",
                link.display()
            )));
        }
    }
    let previous = read_link_opt(link);
    let temp_link = temp_sibling(link)?;

    debug!(
        "Linking {} -> {} via {}",
        link.display(),
        target.display(),
        temp_link.display()
    );
    symlink(target, &temp_link)?;
    if let Err(e) = fs::rename(&temp_link, link) {
        error!(
            "Failed to move symlink {} over {}: {}",
            temp_link.display(),
            link.display(),
            e
        );
        let _ = fs::remove_file(&temp_link);
        return Err(e.into());
    }
    Ok(previous)
}

#[cfg(not(unix))]
pub fn replace_symlink_atomic(target: &Path, link: &Path) -> Result<Option<PathBuf>> {
    warn!(
        "Symlink creation not supported on this platform: {} -> {}",
        link.display(),
        target.display()
    );
    Err(SproutError::Generic(
        "Symlinks not supported on this platform".to_string(),
    ))
}

/// Restores `link` to `previous` (or removes it when there was none).
pub fn restore_symlink(link: &Path, previous: Option<&Path>) -> Result<()> {
    match previous {
        Some(target) => replace_symlink_atomic(target, link).map(|_| ()),
        None => remove_path(link),
    }
}

/// Renames a directory. Both paths must be on the same filesystem.
pub fn rename_dir(from: &Path, to: &Path) -> Result<()> {
    debug!("Moving {} -> {}", from.display(), to.display());
    if let Some(parent) = to.parent() {
        create_dir_all(parent)?;
    }
    fs::rename(from, to).map_err(|e| {
        error!("Failed to move {} to {}: {}", from.display(), to.display(), e);
        SproutError::from(e)
    })
}

/// Adds execute bits for everyone who can read the file.
#[cfg(unix)]
pub fn ensure_executable(path: &Path) -> Result<()> {
    let mode = fs::metadata(path)?.permissions().mode();
    let wanted = mode | ((mode & 0o444) >> 2);
    if wanted != mode {
        debug!("Setting permissions on {}: {:o}", path.display(), wanted);
        fs::set_permissions(path, Permissions::from_mode(wanted))?;
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn ensure_executable(path: &Path) -> Result<()> {
    warn!(
        "Setting permissions not supported on this platform: {}",
        path.display()
    );
    Ok(())
}

/// Atomically writes data to a file using a temporary file in the same
/// directory.
pub fn atomic_write_file(original_path: &Path, content: &[u8]) -> Result<()> {
    let dir = original_path.parent().ok_or_else(|| {
        SproutError::Generic(format!(
            "Cannot get parent directory for {}",
            original_path.display()
        ))
    })?;
    create_dir_all(dir)?;

    let mut temp_file = NamedTempFile::new_in(dir)?;
    let temp_path = temp_file.path().to_path_buf();
    debug!(
        "Atomically writing {} bytes to {} via temp file {}",
        content.len(),
        original_path.display(),
        temp_path.display()
    );

    temp_file.write_all(content)?;
    temp_file.flush()?;
    temp_file.as_file().sync_all()?;

    temp_file.persist(original_path).map_err(|e| {
        error!(
            "Failed to persist temporary file {} over {}: {}",
            temp_path.display(),
            original_path.display(),
            e.error
        );
        SproutError::Io(Arc::new(e.error))
    })?;

    #[cfg(unix)]
    if let Err(e) = fs::set_permissions(original_path, Permissions::from_mode(0o644)) {
        warn!(
            "Failed to set permissions on {}: {}",
            original_path.display(),
            e
        );
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn replaces_symlink_and_reports_previous() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        fs::write(&a, "a").unwrap();
        fs::write(&b, "b").unwrap();
        let link = tmp.path().join("link");

        assert_eq!(replace_symlink_atomic(&a, &link).unwrap(), None);
        assert_eq!(fs::read_to_string(&link).unwrap(), "a");
        assert_eq!(replace_symlink_atomic(&b, &link).unwrap(), Some(a.clone()));
        assert_eq!(fs::read_to_string(&link).unwrap(), "b");

        restore_symlink(&link, Some(&a)).unwrap();
        assert_eq!(fs::read_link(&link).unwrap(), a);
        restore_symlink(&link, None).unwrap();
        assert!(link.symlink_metadata().is_err());

        // no temp links left behind
        let leftovers: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn refuses_to_replace_regular_files() {
        let tmp = tempfile::tempdir().unwrap();
        let link = tmp.path().join("fpp");
        fs::write(&link, "not a link").unwrap();
        assert!(replace_symlink_atomic(Path::new("/bin/sh"), &link).is_err());
        assert_eq!(fs::read_to_string(&link).unwrap(), "not a link");
    }

    #[test]
    fn remove_path_handles_all_kinds() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("d");
        fs::create_dir_all(dir.join("nested")).unwrap();
        fs::write(dir.join("nested/f"), "x").unwrap();
        let link = tmp.path().join("l");
        symlink(&dir, &link).unwrap();

        remove_path(&link).unwrap();
        assert!(dir.join("nested/f").exists(), "symlink removal must not follow");
        remove_path(&dir).unwrap();
        assert!(!dir.exists());
        remove_path(&tmp.path().join("missing")).unwrap();
    }

    #[test]
    fn only_empty_dirs_are_removed() {
        let tmp = tempfile::tempdir().unwrap();
        let full = tmp.path().join("full");
        fs::create_dir_all(&full).unwrap();
        fs::write(full.join("f"), "x").unwrap();
        let empty = tmp.path().join("empty");
        fs::create_dir_all(&empty).unwrap();

        assert!(!remove_dir_if_empty(&full).unwrap());
        assert!(full.join("f").exists());
        assert!(remove_dir_if_empty(&empty).unwrap());
        assert!(!empty.exists());
        assert!(!remove_dir_if_empty(&tmp.path().join("missing")).unwrap());
    }

    #[test]
    fn executable_bits_follow_read_bits() {
        let tmp = tempfile::tempdir().unwrap();
        let f = tmp.path().join("fpp");
        fs::write(&f, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&f, Permissions::from_mode(0o644)).unwrap();
        ensure_executable(&f).unwrap();
        assert_eq!(fs::metadata(&f).unwrap().permissions().mode() & 0o777, 0o755);
    }
}
