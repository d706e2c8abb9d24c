// sprout-common/src/formulary.rs
//! Resolves package identifiers to manifest records on disk.
//!
//! Layout under the manifests directory:
//!
//! ```text
//! manifests/
//!   fpp/
//!     0.9.1.json
//!     0.9.2.json
//!   other.json
//! ```
//!
//! `fpp` resolves to the highest version present, `fpp@0.9.1` to that exact
//! record, and a path to a `.json` file is loaded as-is.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::debug;

use super::config::Config;
use super::error::{Result, SproutError};
use super::model::manifest::ManifestRecord;

pub struct Formulary {
    manifests_dir: PathBuf,
    parsed_cache: Mutex<HashMap<PathBuf, Arc<ManifestRecord>>>,
}

impl Formulary {
    pub fn new(config: &Config) -> Self {
        Self::with_dir(config.manifests_dir())
    }

    pub fn with_dir(manifests_dir: impl Into<PathBuf>) -> Self {
        Self {
            manifests_dir: manifests_dir.into(),
            parsed_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Loads the record named by `identifier` (`name`, `name@version` or a
    /// manifest file path).
    pub fn load(&self, identifier: &str) -> Result<Arc<ManifestRecord>> {
        let path = self.resolve_path(identifier)?;
        let record = self.load_path(&path)?;

        if let Some((name, _)) = identifier.split_once('@') {
            if record.name != name {
                return Err(SproutError::ValidationError(format!(
                    "manifest {} describes '{}', not '{}'",
                    path.display(),
                    record.name,
                    name
                )));
            }
        }
        Ok(record)
    }

    pub fn load_path(&self, path: &Path) -> Result<Arc<ManifestRecord>> {
        let mut cache = self
            .parsed_cache
            .lock()
            .map_err(|_| SproutError::Generic("manifest cache lock poisoned".to_string()))?;
        if let Some(record) = cache.get(path) {
            debug!("Loaded manifest {} from parsed cache.", path.display());
            return Ok(Arc::clone(record));
        }

        let raw = fs::read_to_string(path).map_err(|e| {
            SproutError::NotFound(format!("cannot read manifest {}: {e}", path.display()))
        })?;
        let record = ManifestRecord::from_json(&raw).map_err(|e| match e {
            SproutError::Json(inner) => {
                SproutError::ParseError("manifest", format!("{}: {inner}", path.display()))
            }
            other => other,
        })?;
        debug!("Parsed manifest {} from {}", record.id(), path.display());

        let record = Arc::new(record);
        cache.insert(path.to_path_buf(), Arc::clone(&record));
        Ok(record)
    }

    /// Versions with a manifest under `manifests/<name>/`, lowest first.
    pub fn list_versions(&self, name: &str) -> Result<Vec<String>> {
        let dir = self.manifests_dir.join(name);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut versions = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    versions.push(stem.to_string());
                }
            }
        }
        versions.sort_by(|a, b| compare_versions(a, b));
        Ok(versions)
    }

    fn resolve_path(&self, identifier: &str) -> Result<PathBuf> {
        if identifier.ends_with(".json") || identifier.contains('/') {
            let path = PathBuf::from(identifier);
            if path.is_file() {
                return Ok(path);
            }
            return Err(SproutError::NotFound(format!(
                "manifest file {} does not exist",
                path.display()
            )));
        }

        if let Some((name, version)) = identifier.split_once('@') {
            let path = self.manifests_dir.join(name).join(format!("{version}.json"));
            if path.is_file() {
                return Ok(path);
            }
            return Err(SproutError::NotFound(format!(
                "no manifest for {name} version {version} in {}",
                self.manifests_dir.display()
            )));
        }

        if let Some(latest) = self.list_versions(identifier)?.pop() {
            debug!("Resolved '{}' to version {}", identifier, latest);
            return Ok(self
                .manifests_dir
                .join(identifier)
                .join(format!("{latest}.json")));
        }

        let single = self.manifests_dir.join(format!("{identifier}.json"));
        if single.is_file() {
            return Ok(single);
        }
        Err(SproutError::NotFound(format!(
            "no manifest named '{identifier}' in {}",
            self.manifests_dir.display()
        )))
    }
}

/// Semver comparison when both sides parse (after padding `0.9` to `0.9.0`),
/// lexical otherwise.
fn compare_versions(a: &str, b: &str) -> Ordering {
    match (lenient_semver(a), lenient_semver(b)) {
        (Some(va), Some(vb)) => va.cmp(&vb),
        _ => a.cmp(b),
    }
}

fn lenient_semver(raw: &str) -> Option<semver::Version> {
    if let Ok(v) = semver::Version::parse(raw) {
        return Some(v);
    }
    let dots = raw.matches('.').count();
    let padded = match dots {
        0 => format!("{raw}.0.0"),
        1 => format!("{raw}.0"),
        _ => return None,
    };
    semver::Version::parse(&padded).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_manifest(dir: &Path, name: &str, version: &str) {
        let doc = format!(
            r#"{{ "name": "{name}", "version": "{version}",
                 "url": "https://example.com/{name}.{version}.tar.gz",
                 "sha256": "{}" }}"#,
            "ab".repeat(32)
        );
        let pkg_dir = dir.join(name);
        fs::create_dir_all(&pkg_dir).unwrap();
        fs::write(pkg_dir.join(format!("{version}.json")), doc).unwrap();
    }

    #[test]
    fn resolves_latest_and_exact_versions() {
        let tmp = tempfile::tempdir().unwrap();
        for v in ["0.7.2", "0.9.2", "0.10.0", "0.9"] {
            write_manifest(tmp.path(), "fpp", v);
        }
        let formulary = Formulary::with_dir(tmp.path());

        assert_eq!(
            formulary.list_versions("fpp").unwrap(),
            vec!["0.7.2", "0.9", "0.9.2", "0.10.0"]
        );
        assert_eq!(formulary.load("fpp").unwrap().version, "0.10.0");
        assert_eq!(formulary.load("fpp@0.9.2").unwrap().version, "0.9.2");
        assert!(matches!(
            formulary.load("fpp@1.0.0"),
            Err(SproutError::NotFound(_))
        ));
        assert!(matches!(formulary.load("nope"), Err(SproutError::NotFound(_))));
    }

    #[test]
    fn loads_explicit_paths_and_caches() {
        let tmp = tempfile::tempdir().unwrap();
        write_manifest(tmp.path(), "fpp", "0.9.2");
        let formulary = Formulary::with_dir(tmp.path().join("elsewhere"));
        let path = tmp.path().join("fpp").join("0.9.2.json");

        let first = formulary.load(path.to_str().unwrap()).unwrap();
        let second = formulary.load_path(&path).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn malformed_manifest_is_a_parse_error() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("broken.json"), "{ not json").unwrap();
        let formulary = Formulary::with_dir(tmp.path());
        assert!(matches!(
            formulary.load("broken"),
            Err(SproutError::ParseError("manifest", _))
        ));
    }

    #[test]
    fn bundled_fpp_manifest_is_valid() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../manifests");
        let formulary = Formulary::with_dir(dir);
        let record = formulary.load("fpp").unwrap();
        assert_eq!(record.id(), "fpp@0.9.2");
        assert_eq!(record.entry_point(), "libexec/fpp");

        let snow_leopard: crate::model::Platform = "snow_leopard".parse().unwrap();
        let sonoma: crate::model::Platform = "arm64_sonoma".parse().unwrap();
        assert_eq!(record.required_dependency(&snow_leopard), Some("python"));
        assert_eq!(record.required_dependency(&sonoma), None);
    }
}
