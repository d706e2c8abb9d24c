// sprout-core/src/install/link.rs
use std::path::{Path, PathBuf};

use sprout_aio::fs::{create_dir_all, ensure_executable, replace_symlink_atomic};
use sprout_common::config::Config;
use sprout_common::error::{Result, SproutError};
use sprout_common::model::manifest::ManifestRecord;
use tracing::debug;

#[derive(Debug)]
pub(crate) struct BinLink {
    pub link: PathBuf,
    pub target: PathBuf,
}

/// Points `<bin>/<link_name>` at `<install_root>/<entry_point>`.
///
/// The target goes through the stable version path rather than the payload,
/// so reinstalling the same version leaves the link untouched in content.
pub(crate) fn link_entry_point(
    config: &Config,
    manifest: &ManifestRecord,
    install_root: &Path,
) -> Result<BinLink> {
    let target = install_root.join(manifest.entry_point());
    if !target.is_file() {
        return Err(SproutError::LinkFailed(format!(
            "entry point {} does not exist in {}",
            manifest.entry_point(),
            install_root.display()
        )));
    }
    ensure_executable(&target).map_err(link_failed)?;

    let bin_dir = config.bin_dir();
    create_dir_all(&bin_dir).map_err(link_failed)?;
    let link = bin_dir.join(manifest.link_name());

    // Last fallible step of an install: nothing after this needs undoing.
    let previous = replace_symlink_atomic(&target, &link).map_err(link_failed)?;
    match previous {
        Some(old) if old != target => debug!(
            "Linked {} -> {} (was {})",
            link.display(),
            target.display(),
            old.display()
        ),
        _ => debug!("Linked {} -> {}", link.display(), target.display()),
    }
    Ok(BinLink { link, target })
}

fn link_failed(e: SproutError) -> SproutError {
    SproutError::LinkFailed(e.to_string())
}

#[cfg(all(test, unix))]
mod tests {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

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

    #[test]
    fn links_and_marks_executable() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::with_prefix(tmp.path());
        let root = config.formula_keg_path("fpp", "0.9.2");
        fs::create_dir_all(root.join("libexec")).unwrap();
        fs::write(root.join("libexec/fpp"), "#!/bin/sh\n").unwrap();
        fs::set_permissions(root.join("libexec/fpp"), fs::Permissions::from_mode(0o644)).unwrap();

        let bin = link_entry_point(&config, &manifest(), &root).unwrap();
        assert_eq!(bin.link, config.bin_dir().join("fpp"));
        assert_eq!(fs::read_link(&bin.link).unwrap(), root.join("libexec/fpp"));
        let mode = fs::metadata(&bin.target).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }

    #[test]
    fn refuses_to_clobber_regular_files() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::with_prefix(tmp.path());
        let root = config.formula_keg_path("fpp", "0.9.2");
        fs::create_dir_all(root.join("libexec")).unwrap();
        fs::write(root.join("libexec/fpp"), "#!/bin/sh\n").unwrap();
        fs::create_dir_all(config.bin_dir()).unwrap();
        fs::write(config.bin_dir().join("fpp"), "someone else's").unwrap();

        let err = link_entry_point(&config, &manifest(), &root).unwrap_err();
        assert_eq!(err.kind(), "LinkFailed");
        assert_eq!(
            fs::read_to_string(config.bin_dir().join("fpp")).unwrap(),
            "someone else's"
        );
    }

    #[test]
    fn missing_entry_point_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::with_prefix(tmp.path());
        let root = config.formula_keg_path("fpp", "0.9.2");
        fs::create_dir_all(&root).unwrap();

        let err = link_entry_point(&config, &manifest(), &root).unwrap_err();
        assert_eq!(err.kind(), "LinkFailed");
        assert!(config.bin_dir().join("fpp").symlink_metadata().is_err());
    }
}
