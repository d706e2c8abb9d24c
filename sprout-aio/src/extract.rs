// sprout-aio/src/extract.rs
// Extracts in-memory archives into a staging directory.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Cursor, Read};
#[cfg(unix)]
use std::os::unix::fs as unix_fs;
use std::path::{Component, Path, PathBuf};

use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use sprout_common::error::{Result, SproutError};
use tar::{Archive, EntryType};
use tracing::{debug, error};
use xz2::read::XzDecoder;
use zip::ZipArchive;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    TarGz,
    TarBz2,
    TarXz,
    Tar,
    Zip,
}

/// Sniffs the archive format from magic bytes.
pub fn detect_format(bytes: &[u8]) -> Result<ArchiveFormat> {
    let kind = infer::get(bytes)
        .ok_or_else(|| SproutError::UnpackFailed("could not determine archive type".to_string()))?;
    match kind.extension() {
        "gz" => Ok(ArchiveFormat::TarGz),
        "bz2" => Ok(ArchiveFormat::TarBz2),
        "xz" => Ok(ArchiveFormat::TarXz),
        "tar" => Ok(ArchiveFormat::Tar),
        "zip" => Ok(ArchiveFormat::Zip),
        other => Err(SproutError::UnpackFailed(format!(
            "unsupported archive type '{other}' ({})",
            kind.mime_type()
        ))),
    }
}

fn tar_reader<'a>(bytes: &'a [u8], format: ArchiveFormat) -> Box<dyn Read + 'a> {
    match format {
        ArchiveFormat::TarGz => Box::new(GzDecoder::new(bytes)),
        ArchiveFormat::TarBz2 => Box::new(BzDecoder::new(bytes)),
        ArchiveFormat::TarXz => Box::new(XzDecoder::new(bytes)),
        ArchiveFormat::Tar | ArchiveFormat::Zip => Box::new(bytes),
    }
}

fn unpack_err(context: &str, e: impl std::fmt::Display) -> SproutError {
    SproutError::UnpackFailed(format!("{context}: {e}"))
}

/// Returns the single top-level directory shared by every entry, if there
/// is exactly one.
pub fn infer_archive_root_dir(bytes: &[u8], format: ArchiveFormat) -> Result<Option<PathBuf>> {
    let paths: Vec<PathBuf> = match format {
        ArchiveFormat::Zip => {
            let mut archive = ZipArchive::new(Cursor::new(bytes))
                .map_err(|e| unpack_err("failed to open ZIP", e))?;
            let mut paths = Vec::with_capacity(archive.len());
            for i in 0..archive.len() {
                let file = archive
                    .by_index_raw(i)
                    .map_err(|e| unpack_err("error reading ZIP entry", e))?;
                paths.push(PathBuf::from(file.name()));
            }
            paths
        }
        _ => {
            let mut archive = Archive::new(tar_reader(bytes, format));
            let mut paths = Vec::new();
            for entry in archive
                .entries()
                .map_err(|e| unpack_err("error reading TAR", e))?
            {
                let entry = entry.map_err(|e| unpack_err("error reading TAR entry", e))?;
                // pax global headers carry no path of their own
                if entry.header().entry_type() == EntryType::XGlobalHeader {
                    continue;
                }
                let path = entry
                    .path()
                    .map_err(|e| unpack_err("invalid path in TAR entry", e))?
                    .into_owned();
                paths.push(path);
            }
            paths
        }
    };
    Ok(single_root(&paths))
}

fn single_root(paths: &[PathBuf]) -> Option<PathBuf> {
    let mut roots = HashSet::new();
    let mut has_nested = false;
    for path in paths {
        let mut comps = path.components().filter(|c| !matches!(c, Component::CurDir));
        match comps.next() {
            None => continue,
            Some(Component::Normal(name)) => {
                roots.insert(PathBuf::from(name));
                if comps.next().is_some() {
                    has_nested = true;
                }
            }
            Some(_) => return None,
        }
        if roots.len() > 1 {
            return None;
        }
    }
    // A lone top-level file is not a root directory.
    if roots.len() == 1 && has_nested {
        roots.into_iter().next()
    } else {
        None
    }
}

/// Maps an archive path onto `target_dir`, dropping the first
/// `strip_components` components. `Ok(None)` means the entry was stripped
/// away entirely.
fn stage_path(target_dir: &Path, archive_path: &Path, strip_components: usize) -> Result<Option<PathBuf>> {
    let comps: Vec<Component<'_>> = archive_path
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();
    if comps.len() <= strip_components {
        return Ok(None);
    }
    let mut out = target_dir.to_path_buf();
    for comp in &comps[strip_components..] {
        match comp {
            Component::Normal(p) => out.push(p),
            other => {
                let msg = format!(
                    "disallowed component {:?} in archive path {}",
                    other,
                    archive_path.display()
                );
                error!("{}", msg);
                return Err(SproutError::UnpackFailed(msg));
            }
        }
    }
    Ok(Some(out))
}

/// Rejects symlink targets that are absolute or climb above `target_dir`
/// when resolved from the link's own directory.
fn check_symlink_target(target_dir: &Path, dest: &Path, link_target: &Path) -> Result<()> {
    let escape = || {
        let msg = format!(
            "symlink {} -> {} points outside the extracted tree",
            dest.display(),
            link_target.display()
        );
        error!("{}", msg);
        SproutError::UnpackFailed(msg)
    };
    let mut depth = dest
        .parent()
        .and_then(|p| p.strip_prefix(target_dir).ok())
        .ok_or_else(escape)?
        .components()
        .count();
    for comp in link_target.components() {
        match comp {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => depth = depth.checked_sub(1).ok_or_else(escape)?,
            Component::RootDir | Component::Prefix(_) => return Err(escape()),
        }
    }
    Ok(())
}

/// Prepares `dest` for writing: its nearest existing ancestor must resolve
/// inside `root` (already canonical), missing parents are created, and a
/// symlink already sitting at `dest` is removed rather than followed.
fn prepare_dest(root: &Path, dest: &Path) -> Result<()> {
    let mut existing = dest.parent();
    while let Some(dir) = existing {
        if dir.symlink_metadata().is_ok() {
            break;
        }
        existing = dir.parent();
    }
    let resolved = match existing {
        Some(dir) => dir
            .canonicalize()
            .map_err(|e| unpack_err(&format!("cannot resolve {}", dir.display()), e))?,
        None => PathBuf::new(),
    };
    if !resolved.starts_with(root) {
        let msg = format!(
            "{} would be written outside the extracted tree (via {})",
            dest.display(),
            resolved.display()
        );
        error!("{}", msg);
        return Err(SproutError::UnpackFailed(msg));
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    if dest
        .symlink_metadata()
        .is_ok_and(|m| m.file_type().is_symlink())
    {
        fs::remove_file(dest)?;
    }
    Ok(())
}

/// Extracts `bytes` into `target_dir`, stripping `strip_components` leading
/// path components from every entry.
pub fn extract_archive_bytes(
    bytes: &[u8],
    format: ArchiveFormat,
    target_dir: &Path,
    strip_components: usize,
) -> Result<()> {
    debug!(
        "Extracting {:?} archive ({} bytes) to '{}' (strip_components={})",
        format,
        bytes.len(),
        target_dir.display(),
        strip_components
    );
    fs::create_dir_all(target_dir)?;
    let root = target_dir.canonicalize()?;
    match format {
        ArchiveFormat::Zip => extract_zip(bytes, target_dir, &root, strip_components),
        _ => extract_tar(tar_reader(bytes, format), target_dir, &root, strip_components),
    }
}

struct DeferredHardLink {
    link_path: PathBuf,
    target_path: PathBuf,
}

fn extract_tar<R: Read>(
    reader: R,
    target_dir: &Path,
    root: &Path,
    strip_components: usize,
) -> Result<()> {
    let mut archive = Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);

    let mut deferred_hardlinks = Vec::new();
    let mut extracted = 0usize;

    for entry in archive
        .entries()
        .map_err(|e| unpack_err("error reading TAR", e))?
    {
        let mut entry = entry.map_err(|e| unpack_err("error reading TAR entry", e))?;
        let entry_type = entry.header().entry_type();
        if matches!(entry_type, EntryType::XGlobalHeader | EntryType::XHeader) {
            continue;
        }
        let archive_path = entry
            .path()
            .map_err(|e| unpack_err("invalid path in TAR entry", e))?
            .into_owned();
        let Some(dest) = stage_path(target_dir, &archive_path, strip_components)? else {
            debug!("Skipping entry due to strip_components: {:?}", archive_path);
            continue;
        };

        prepare_dest(root, &dest)?;

        if entry_type == EntryType::Link {
            let link_name = entry
                .link_name()
                .map_err(|e| unpack_err("invalid hardlink target", e))?
                .ok_or_else(|| {
                    SproutError::UnpackFailed(format!(
                        "hardlink entry '{}' has no target",
                        archive_path.display()
                    ))
                })?
                .into_owned();
            let target_path = stage_path(target_dir, &link_name, strip_components)?.ok_or_else(|| {
                SproutError::UnpackFailed(format!(
                    "hardlink target '{}' is outside the extracted tree",
                    link_name.display()
                ))
            })?;
            deferred_hardlinks.push(DeferredHardLink {
                link_path: dest,
                target_path,
            });
            continue;
        }

        if entry_type == EntryType::Symlink {
            let link_target = entry
                .link_name()
                .map_err(|e| unpack_err("invalid symlink target", e))?
                .ok_or_else(|| {
                    SproutError::UnpackFailed(format!(
                        "symlink entry '{}' has no target",
                        archive_path.display()
                    ))
                })?;
            check_symlink_target(target_dir, &dest, &link_target)?;
        }

        entry.unpack(&dest).map_err(|e| {
            unpack_err(
                &format!("failed to unpack {} to {}", archive_path.display(), dest.display()),
                e,
            )
        })?;
        extracted += 1;
    }

    for link in deferred_hardlinks {
        prepare_dest(root, &link.link_path)?;
        let source = link
            .target_path
            .canonicalize()
            .map_err(|e| unpack_err("hardlink target missing", e))?;
        if !source.starts_with(root) {
            return Err(SproutError::UnpackFailed(format!(
                "hardlink {} resolves outside the extracted tree",
                link.link_path.display()
            )));
        }
        if link.link_path.symlink_metadata().is_ok() {
            fs::remove_file(&link.link_path)?;
        }
        fs::hard_link(&source, &link.link_path).map_err(|e| {
            unpack_err(
                &format!(
                    "failed to create hardlink {} -> {}",
                    link.link_path.display(),
                    link.target_path.display()
                ),
                e,
            )
        })?;
        extracted += 1;
    }

    debug!("Finished TAR extraction ({} entries)", extracted);
    Ok(())
}

fn extract_zip(bytes: &[u8], target_dir: &Path, root: &Path, strip_components: usize) -> Result<()> {
    let mut archive =
        ZipArchive::new(Cursor::new(bytes)).map_err(|e| unpack_err("failed to open ZIP", e))?;

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| unpack_err("error reading ZIP entry", e))?;
        let archive_path = file.enclosed_name().ok_or_else(|| {
            SproutError::UnpackFailed(format!("unsafe ZIP entry name {}", file.name()))
        })?;
        let Some(dest) = stage_path(target_dir, &archive_path, strip_components)? else {
            continue;
        };

        prepare_dest(root, &dest)?;
        if file.is_dir() {
            fs::create_dir_all(&dest)?;
            continue;
        }

        if file.is_symlink() {
            let mut buf = Vec::new();
            file.read_to_end(&mut buf)?;
            let link_target = PathBuf::from(String::from_utf8_lossy(&buf).to_string());
            check_symlink_target(target_dir, &dest, &link_target)?;
            #[cfg(unix)]
            {
                if dest.symlink_metadata().is_ok() {
                    fs::remove_file(&dest)?;
                }
                unix_fs::symlink(&link_target, &dest)?;
            }
            #[cfg(not(unix))]
            tracing::warn!(
                "Cannot create symlink on non-unix system: {} -> {}",
                dest.display(),
                link_target.display()
            );
            continue;
        }

        let mut out = File::create(&dest)?;
        io::copy(&mut file, &mut out)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = file.unix_mode() {
                fs::set_permissions(&dest, fs::Permissions::from_mode(mode & 0o7777))?;
            }
        }
    }
    debug!("Finished ZIP extraction into {}", target_dir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::write::GzEncoder;
    use flate2::Compression;

    use super::*;

    fn tar_gz(entries: &[(&str, &[u8], u32)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (path, content, mode) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(*mode);
            header.set_cksum();
            builder.append_data(&mut header, path, *content).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn detects_gzip_and_zip() {
        let gz = tar_gz(&[("fpp/fpp", b"#!/bin/sh\n", 0o755)]);
        assert_eq!(detect_format(&gz).unwrap(), ArchiveFormat::TarGz);

        let mut zip_bytes = Vec::new();
        {
            let mut writer = zip::ZipWriter::new(Cursor::new(&mut zip_bytes));
            writer
                .start_file("fpp/fpp", zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(b"x").unwrap();
            writer.finish().unwrap();
        }
        assert_eq!(detect_format(&zip_bytes).unwrap(), ArchiveFormat::Zip);

        assert!(detect_format(b"plain text, not an archive").is_err());
    }

    #[test]
    fn strips_single_root_directory() {
        let gz = tar_gz(&[
            ("PathPicker-0.9.2/fpp", b"#!/bin/sh\necho fpp\n", 0o755),
            ("PathPicker-0.9.2/src/choose.py", b"print()\n", 0o644),
        ]);
        let root = infer_archive_root_dir(&gz, ArchiveFormat::TarGz).unwrap();
        assert_eq!(root, Some(PathBuf::from("PathPicker-0.9.2")));

        let tmp = tempfile::tempdir().unwrap();
        extract_archive_bytes(&gz, ArchiveFormat::TarGz, tmp.path(), 1).unwrap();
        assert!(tmp.path().join("fpp").is_file());
        assert!(tmp.path().join("src/choose.py").is_file());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(tmp.path().join("fpp")).unwrap().permissions().mode();
            assert_eq!(mode & 0o111, 0o111);
        }
    }

    #[test]
    fn no_root_for_flat_archives() {
        let gz = tar_gz(&[("fpp", b"a", 0o755), ("README", b"b", 0o644)]);
        assert_eq!(infer_archive_root_dir(&gz, ArchiveFormat::TarGz).unwrap(), None);

        let lone_file = tar_gz(&[("fpp", b"a", 0o755)]);
        assert_eq!(
            infer_archive_root_dir(&lone_file, ArchiveFormat::TarGz).unwrap(),
            None
        );
    }

    #[test]
    fn rejects_parent_components() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(stage_path(tmp.path(), Path::new("a/../../etc/passwd"), 0).is_err());
        assert!(stage_path(tmp.path(), Path::new("/etc/passwd"), 0).is_err());
        assert_eq!(stage_path(tmp.path(), Path::new("fpp/0.9.2"), 2).unwrap(), None);
        assert_eq!(
            stage_path(tmp.path(), Path::new("fpp/0.9.2/bin/fpp"), 2).unwrap(),
            Some(tmp.path().join("bin/fpp"))
        );
    }

    enum Item<'a> {
        File(&'a str, &'a [u8]),
        Symlink(&'a str, &'a str),
    }

    // Link names are copied raw so absolute and `..` targets survive.
    fn plain_tar(items: &[Item<'_>]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for item in items {
            let mut header = tar::Header::new_gnu();
            match item {
                Item::File(path, content) => {
                    header.set_size(content.len() as u64);
                    header.set_mode(0o644);
                    builder.append_data(&mut header, path, *content).unwrap();
                }
                Item::Symlink(path, target) => {
                    header.set_entry_type(EntryType::Symlink);
                    header.set_size(0);
                    header.set_mode(0o777);
                    header.as_old_mut().linkname[..target.len()].copy_from_slice(target.as_bytes());
                    builder.append_data(&mut header, path, io::empty()).unwrap();
                }
            }
        }
        builder.into_inner().unwrap()
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_parent_cannot_redirect_writes() {
        let tmp = tempfile::tempdir().unwrap();
        let outside = tmp.path().join("outside");
        fs::create_dir_all(&outside).unwrap();
        let staging = tmp.path().join("staging");

        let tar = plain_tar(&[
            Item::Symlink("pkg/evil", outside.to_str().unwrap()),
            Item::File("pkg/evil/pwned", b"x"),
        ]);
        let err = extract_archive_bytes(&tar, ArchiveFormat::Tar, &staging, 1).unwrap_err();
        assert_eq!(err.kind(), "UnpackFailed");
        assert!(!outside.join("pwned").exists());
    }

    #[cfg(unix)]
    #[test]
    fn relative_links_may_not_climb_out() {
        let tmp = tempfile::tempdir().unwrap();
        let staging = tmp.path().join("staging");
        let tar = plain_tar(&[Item::Symlink("pkg/bin/up", "../../elsewhere")]);
        assert!(extract_archive_bytes(&tar, ArchiveFormat::Tar, &staging, 1).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn chained_in_tree_links_are_resolved_before_writing() {
        let tmp = tempfile::tempdir().unwrap();
        let staging = tmp.path().join("staging");
        // Each link looks harmless alone; together `x` is the staging parent.
        let tar = plain_tar(&[
            Item::Symlink("pkg/here", "."),
            Item::Symlink("pkg/x", "here/.."),
            Item::File("pkg/x/pwned", b"x"),
        ]);
        assert!(extract_archive_bytes(&tar, ArchiveFormat::Tar, &staging, 1).is_err());
        assert!(!tmp.path().join("pwned").exists());
    }

    #[cfg(unix)]
    #[test]
    fn relative_links_inside_the_tree_are_kept() {
        let tmp = tempfile::tempdir().unwrap();
        let tar = plain_tar(&[
            Item::File("pkg/libexec/fpp", b"#!/bin/sh\n"),
            Item::Symlink("pkg/bin/fpp", "../libexec/fpp"),
        ]);
        extract_archive_bytes(&tar, ArchiveFormat::Tar, tmp.path(), 1).unwrap();
        assert_eq!(
            fs::read_link(tmp.path().join("bin/fpp")).unwrap(),
            PathBuf::from("../libexec/fpp")
        );
        assert_eq!(fs::read(tmp.path().join("bin/fpp")).unwrap(), b"#!/bin/sh\n");
    }

    #[cfg(unix)]
    #[test]
    fn zip_symlinks_get_the_same_checks() {
        let tmp = tempfile::tempdir().unwrap();
        let outside = tmp.path().join("outside");
        fs::create_dir_all(&outside).unwrap();
        let staging = tmp.path().join("staging");

        let mut zip_bytes = Vec::new();
        {
            let mut writer = zip::ZipWriter::new(Cursor::new(&mut zip_bytes));
            let options = zip::write::SimpleFileOptions::default();
            writer
                .add_symlink("pkg/evil", outside.to_str().unwrap(), options)
                .unwrap();
            writer.start_file("pkg/evil/pwned", options).unwrap();
            writer.write_all(b"x").unwrap();
            writer.finish().unwrap();
        }
        assert!(extract_archive_bytes(&zip_bytes, ArchiveFormat::Zip, &staging, 1).is_err());
        assert!(!outside.join("pwned").exists());
    }
}
