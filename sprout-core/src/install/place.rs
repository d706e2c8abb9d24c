// sprout-core/src/install/place.rs
//! Swaps a staged tree in as `<cellar>/<name>/<version>`.
//!
//! The version path is always a symlink into `.payloads/`. A new payload is
//! renamed into place first, then a temp link pointing at it is renamed over
//! the version path, so readers see either the old tree or the new one.
use std::fs;
use std::path::{Path, PathBuf};

use sprout_aio::fs::{
    create_dir_all, remove_dir_if_empty, remove_path, rename_dir, replace_symlink_atomic,
    restore_symlink,
};
use sprout_common::config::Config;
use sprout_common::error::{Result, SproutError};
use sprout_common::model::manifest::ManifestRecord;
use tempfile::TempDir;
use tracing::{debug, warn};

const PAYLOADS_DIR_NAME: &str = ".payloads";
const STAGING_PREFIX: &str = ".staging-";

/// A placed payload that can still be rolled back.
#[derive(Debug)]
pub(crate) struct Placement {
    /// `<cellar>/<name>/<version>`, the stable install root.
    pub install_root: PathBuf,
    payload: PathBuf,
    formula_dir: PathBuf,
    /// What the version link pointed at before, as read from the link.
    previous_target: Option<PathBuf>,
    /// `.payloads/` did not exist before this placement.
    created_payloads_dir: bool,
}

pub(crate) fn place_payload(
    staging: TempDir,
    config: &Config,
    manifest: &ManifestRecord,
) -> Result<Placement> {
    let name = manifest.name();
    let version = manifest.version();
    let formula_dir = config.formula_cellar_dir(name);
    let payloads_dir = config.formula_payloads_dir(name);
    let install_root = config.formula_keg_path(name, version);
    let created_payloads_dir = payloads_dir.symlink_metadata().is_err();
    create_dir_all(&payloads_dir).map_err(placement_failed)?;

    let payload_name = format!("{}-{}", version, uuid::Uuid::new_v4().simple());
    let payload = payloads_dir.join(&payload_name);
    if let Err(e) = rename_dir(staging.path(), &payload) {
        discard_payloads_dir(&payloads_dir, created_payloads_dir);
        return Err(placement_failed(e));
    }
    // Nothing left for the TempDir to clean up.
    drop(staging);

    // A real directory at the version path predates payload links. Move it
    // into the payload store so it can be restored like any previous link.
    let mut legacy_dir = None;
    if install_root
        .symlink_metadata()
        .is_ok_and(|m| m.file_type().is_dir())
    {
        let aside = payloads_dir.join(format!(
            "{}-legacy-{}",
            version,
            uuid::Uuid::new_v4().simple()
        ));
        debug!(
            "Moving existing directory {} aside to {}",
            install_root.display(),
            aside.display()
        );
        if let Err(e) = rename_dir(&install_root, &aside) {
            let _ = remove_path(&payload);
            discard_payloads_dir(&payloads_dir, created_payloads_dir);
            return Err(placement_failed(e));
        }
        legacy_dir = Some(aside);
    }

    let link_target = Path::new(PAYLOADS_DIR_NAME).join(&payload_name);
    match replace_symlink_atomic(&link_target, &install_root) {
        Ok(previous) => {
            debug!(
                "{} now points at {}",
                install_root.display(),
                link_target.display()
            );
            Ok(Placement {
                install_root,
                payload,
                formula_dir,
                previous_target: legacy_dir.or(previous),
                created_payloads_dir,
            })
        }
        Err(e) => {
            let _ = remove_path(&payload);
            if let Some(aside) = legacy_dir {
                let _ = rename_dir(&aside, &install_root);
            }
            discard_payloads_dir(&payloads_dir, created_payloads_dir);
            Err(placement_failed(e))
        }
    }
}

impl Placement {
    /// Puts the previous version link back and deletes the new payload.
    pub(crate) fn rollback(self) {
        debug!("Rolling back placement of {}", self.install_root.display());
        if let Err(e) = restore_symlink(&self.install_root, self.previous_target.as_deref()) {
            warn!(
                "Failed to restore {} during rollback: {}",
                self.install_root.display(),
                e
            );
        }
        if let Err(e) = remove_path(&self.payload) {
            warn!(
                "Failed to remove payload {} during rollback: {}",
                self.payload.display(),
                e
            );
        }
        discard_payloads_dir(
            &self.formula_dir.join(PAYLOADS_DIR_NAME),
            self.created_payloads_dir,
        );
    }

    /// Makes the placement final. Keeps the new payload and the one it
    /// replaced; prunes older payloads and stale staging directories.
    pub(crate) fn commit(self) {
        let previous = self
            .previous_target
            .as_ref()
            .map(|p| self.formula_dir.join(p));
        let payloads_dir = self.formula_dir.join(PAYLOADS_DIR_NAME);

        for entry in read_dir_paths(&payloads_dir) {
            if entry == self.payload || Some(&entry) == previous.as_ref() {
                continue;
            }
            debug!("Pruning old payload {}", entry.display());
            if let Err(e) = remove_path(&entry) {
                warn!("Failed to prune {}: {}", entry.display(), e);
            }
        }

        for entry in read_dir_paths(&self.formula_dir) {
            let is_staging = entry
                .file_name()
                .is_some_and(|n| n.to_string_lossy().starts_with(STAGING_PREFIX));
            if is_staging {
                debug!("Removing stale staging directory {}", entry.display());
                if let Err(e) = remove_path(&entry) {
                    warn!("Failed to remove {}: {}", entry.display(), e);
                }
            }
        }
    }
}

/// Undoes the creation of `.payloads/` when nothing else landed in it.
fn discard_payloads_dir(payloads_dir: &Path, created: bool) {
    if !created {
        return;
    }
    if let Err(e) = remove_dir_if_empty(payloads_dir) {
        warn!("Failed to remove {}: {}", payloads_dir.display(), e);
    }
}

fn read_dir_paths(dir: &Path) -> Vec<PathBuf> {
    match fs::read_dir(dir) {
        Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
        Err(e) => {
            debug!("Cannot list {}: {}", dir.display(), e);
            Vec::new()
        }
    }
}

fn placement_failed(e: SproutError) -> SproutError {
    SproutError::PlacementFailed(e.to_string())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn manifest() -> ManifestRecord {
        ManifestRecord::from_json(&format!(
            r#"{{ "name": "fpp", "version": "0.9.2",
                 "url": "https://example.com/fpp-0.9.2.tar.gz",
                 "sha256": "{}" }}"#,
            "0".repeat(64)
        ))
        .unwrap()
    }

    fn staged(config: &Config, content: &str) -> TempDir {
        let formula_dir = config.formula_cellar_dir("fpp");
        fs::create_dir_all(&formula_dir).unwrap();
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&formula_dir)
            .unwrap();
        fs::create_dir_all(staging.path().join("libexec")).unwrap();
        fs::write(staging.path().join("libexec/fpp"), content).unwrap();
        staging
    }

    fn payload_count(config: &Config) -> usize {
        fs::read_dir(config.formula_payloads_dir("fpp")).unwrap().count()
    }

    #[test]
    fn replaces_version_link_and_prunes_on_commit() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::with_prefix(tmp.path());
        let manifest = manifest();

        for round in 0..3 {
            let placement = place_payload(staged(&config, &format!("v{round}")), &config, &manifest)
                .unwrap();
            placement.commit();
            let root = config.formula_keg_path("fpp", "0.9.2");
            assert_eq!(
                fs::read_to_string(root.join("libexec/fpp")).unwrap(),
                format!("v{round}")
            );
            assert!(payload_count(&config) <= 2);
        }
        let leftovers = fs::read_dir(config.formula_cellar_dir("fpp"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(STAGING_PREFIX))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn rollback_restores_previous_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::with_prefix(tmp.path());
        let manifest = manifest();
        let root = config.formula_keg_path("fpp", "0.9.2");

        place_payload(staged(&config, "old"), &config, &manifest)
            .unwrap()
            .commit();
        let before = fs::read_link(&root).unwrap();

        let placement = place_payload(staged(&config, "new"), &config, &manifest).unwrap();
        assert_eq!(fs::read_to_string(root.join("libexec/fpp")).unwrap(), "new");
        placement.rollback();

        assert_eq!(fs::read_link(&root).unwrap(), before);
        assert_eq!(fs::read_to_string(root.join("libexec/fpp")).unwrap(), "old");
        assert_eq!(payload_count(&config), 1);
    }

    #[test]
    fn first_install_rollback_removes_install_root() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::with_prefix(tmp.path());
        let placement = place_payload(staged(&config, "x"), &config, &manifest()).unwrap();
        placement.rollback();
        assert!(config
            .formula_keg_path("fpp", "0.9.2")
            .symlink_metadata()
            .is_err());
        assert!(!config.formula_payloads_dir("fpp").exists());
    }

    #[test]
    fn legacy_directory_is_moved_aside() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::with_prefix(tmp.path());
        let root = config.formula_keg_path("fpp", "0.9.2");
        fs::create_dir_all(root.join("libexec")).unwrap();
        fs::write(root.join("libexec/fpp"), "legacy").unwrap();

        let placement = place_payload(staged(&config, "new"), &config, &manifest()).unwrap();
        assert!(root.symlink_metadata().unwrap().file_type().is_symlink());
        placement.rollback();
        assert_eq!(fs::read_to_string(root.join("libexec/fpp")).unwrap(), "legacy");
    }
}
