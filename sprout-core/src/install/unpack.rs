// sprout-core/src/install/unpack.rs
//! Turns verified archive bytes into a staged keg tree.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sprout_aio::extract::{detect_format, extract_archive_bytes, infer_archive_root_dir};
use sprout_aio::fs::create_dir_all;
use sprout_aio::json_io::write_json_sync;
use sprout_common::error::{Result, SproutError};
use sprout_common::model::artifact::{InstallReceipt, RECEIPT_FILENAME};
use sprout_common::model::manifest::{Artifact, ManifestRecord};
use tempfile::TempDir;
use tracing::debug;

/// Leading `<name>/<version>/` components of every bottle entry.
const BOTTLE_STRIP_COMPONENTS: usize = 2;

/// Populates an empty staging directory from archive bytes whose checksum
/// has already been verified. Runs on a blocking thread.
pub trait ArchiveUnpacker: Send + Sync + 'static {
    fn unpack(
        &self,
        bytes: &[u8],
        artifact: &Artifact,
        manifest: &ManifestRecord,
        staging: &Path,
    ) -> Result<()>;
}

/// Bottles become the keg root directly; source archives lose their single
/// top-level directory (if any) and land under the manifest's payload prefix.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultUnpacker;

impl ArchiveUnpacker for DefaultUnpacker {
    fn unpack(
        &self,
        bytes: &[u8],
        artifact: &Artifact,
        manifest: &ManifestRecord,
        staging: &Path,
    ) -> Result<()> {
        let format = detect_format(bytes)?;
        if artifact.is_bottle() {
            debug!("{}: unpacking {:?} bottle", manifest.id(), format);
            return extract_archive_bytes(bytes, format, staging, BOTTLE_STRIP_COMPONENTS);
        }

        let strip = match infer_archive_root_dir(bytes, format)? {
            Some(root) => {
                debug!("{}: stripping archive root {}", manifest.id(), root.display());
                1
            }
            None => 0,
        };
        let target = staging.join(manifest.payload_prefix());
        extract_archive_bytes(bytes, format, &target, strip)
    }
}

/// Unpacks into a fresh `.staging-*` directory under `formula_dir` and writes
/// the install receipt into it.
///
/// Everything happens on a blocking thread that owns the `TempDir`, so if the
/// caller stops waiting the directory is still removed once the thread is done.
pub(crate) async fn stage_payload(
    unpacker: Arc<dyn ArchiveUnpacker>,
    bytes: Vec<u8>,
    artifact: Artifact,
    manifest: ManifestRecord,
    receipt: InstallReceipt,
    formula_dir: PathBuf,
) -> Result<TempDir> {
    let task = tokio::task::spawn_blocking(move || -> Result<TempDir> {
        create_dir_all(&formula_dir)?;
        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&formula_dir)?;
        debug!("Staging {} in {}", manifest.id(), staging.path().display());

        unpacker
            .unpack(&bytes, &artifact, &manifest, staging.path())
            .map_err(as_unpack_failure)?;
        if is_empty_dir(staging.path())? {
            return Err(SproutError::UnpackFailed(format!(
                "archive for {} contained no files",
                manifest.id()
            )));
        }
        write_json_sync(&staging.path().join(RECEIPT_FILENAME), &receipt)?;
        Ok(staging)
    });

    task.await
        .map_err(|e| SproutError::UnpackFailed(format!("extraction task failed: {e}")))?
}

fn is_empty_dir(path: &Path) -> Result<bool> {
    Ok(std::fs::read_dir(path)?.next().is_none())
}

fn as_unpack_failure(e: SproutError) -> SproutError {
    match e {
        e @ SproutError::UnpackFailed(_) => e,
        other => SproutError::UnpackFailed(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use sprout_common::model::manifest::{ArtifactKind, StorageClass};

    use super::*;

    fn tar_gz(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        let mut builder = tar::Builder::new(enc);
        for (path, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            builder.append_data(&mut header, path, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    fn manifest() -> ManifestRecord {
        ManifestRecord::from_json(&format!(
            r#"{{ "name": "fpp", "version": "0.9.2",
                 "url": "https://example.com/fpp-0.9.2.tar.gz",
                 "sha256": "{}" }}"#,
            "0".repeat(64)
        ))
        .unwrap()
    }

    fn artifact(kind: ArtifactKind) -> Artifact {
        Artifact {
            kind,
            url: "https://example.com/a".to_string(),
            sha256: "0".repeat(64),
        }
    }

    #[test]
    fn source_archive_lands_under_prefix() {
        let tmp = tempfile::tempdir().unwrap();
        let bytes = tar_gz(&[
            ("PathPicker-0.9.2/fpp", b"#!/bin/sh\n"),
            ("PathPicker-0.9.2/src/choose.py", b"print()\n"),
        ]);
        DefaultUnpacker
            .unpack(&bytes, &artifact(ArtifactKind::Source), &manifest(), tmp.path())
            .unwrap();
        assert!(tmp.path().join("libexec/fpp").is_file());
        assert!(tmp.path().join("libexec/src/choose.py").is_file());
    }

    #[test]
    fn bottle_forms_keg_root() {
        let tmp = tempfile::tempdir().unwrap();
        let bytes = tar_gz(&[("fpp/0.9.2/libexec/fpp", b"#!/bin/sh\n")]);
        let kind = ArtifactKind::Bottle {
            platform: "sonoma".to_string(),
            cellar: StorageClass::Any,
        };
        DefaultUnpacker
            .unpack(&bytes, &artifact(kind), &manifest(), tmp.path())
            .unwrap();
        assert!(tmp.path().join("libexec/fpp").is_file());
        assert!(!tmp.path().join("fpp").exists());
    }

    fn receipt() -> InstallReceipt {
        InstallReceipt {
            name: "fpp".to_string(),
            version: "0.9.2".to_string(),
            artifact: ArtifactKind::Source,
            source_url: "https://example.com/a".to_string(),
            sha256: "0".repeat(64),
            platform: "sonoma".to_string(),
            installed_at: String::new(),
        }
    }

    #[tokio::test]
    async fn staged_payload_carries_receipt() {
        let tmp = tempfile::tempdir().unwrap();
        let bytes = tar_gz(&[("PathPicker-0.9.2/fpp", b"#!/bin/sh\n")]);
        let staging = stage_payload(
            Arc::new(DefaultUnpacker),
            bytes,
            artifact(ArtifactKind::Source),
            manifest(),
            receipt(),
            tmp.path().to_path_buf(),
        )
        .await
        .unwrap();

        assert!(staging
            .path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(".staging-"));
        let written: InstallReceipt =
            sprout_aio::json_io::read_json_sync(&staging.path().join(RECEIPT_FILENAME)).unwrap();
        assert_eq!(written, receipt());
        assert!(staging.path().join("libexec/fpp").is_file());
    }

    #[tokio::test]
    async fn failed_unpack_removes_staging() {
        let tmp = tempfile::tempdir().unwrap();
        let err = stage_payload(
            Arc::new(DefaultUnpacker),
            b"definitely not an archive".to_vec(),
            artifact(ArtifactKind::Source),
            manifest(),
            receipt(),
            tmp.path().to_path_buf(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "UnpackFailed");
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
    }
}
