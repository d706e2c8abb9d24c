// sprout-common/src/keg.rs
use std::fs;
use std::path::PathBuf;

use tracing::{debug, warn};

use super::config::Config;
use super::error::Result;
use super::model::artifact::{InstallReceipt, RECEIPT_FILENAME};

/// An installed version directory under the cellar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledKeg {
    pub name: String,
    pub version_str: String,
    pub path: PathBuf,
}

impl InstalledKeg {
    pub fn receipt(&self) -> Option<InstallReceipt> {
        let raw = fs::read_to_string(self.path.join(RECEIPT_FILENAME)).ok()?;
        serde_json::from_str(&raw).ok()
    }
}

/// Queries installed packages in the cellar.
#[derive(Debug)]
pub struct KegRegistry {
    config: Config,
}

impl KegRegistry {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn cellar_path(&self) -> PathBuf {
        self.config.cellar_dir()
    }

    /// Installed versions of `name`, lexically sorted.
    pub fn installed_versions(&self, name: &str) -> Result<Vec<InstalledKeg>> {
        let formula_dir = self.config.formula_cellar_dir(name);
        if !formula_dir.is_dir() {
            debug!(
                "[KEG_REGISTRY:{}] {} not found, nothing installed",
                name,
                formula_dir.display()
            );
            return Ok(Vec::new());
        }

        let mut kegs = Vec::new();
        for entry in fs::read_dir(&formula_dir)? {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(
                        "[KEG_REGISTRY:{}] Error reading entry in {}: {}. Skipping.",
                        name,
                        formula_dir.display(),
                        e
                    );
                    continue;
                }
            };
            let file_name = entry.file_name().to_string_lossy().to_string();
            // Payload stores, staging dirs and temp links are dot-prefixed.
            if file_name.starts_with('.') {
                continue;
            }
            let path = entry.path();
            if path.is_dir() {
                kegs.push(InstalledKeg {
                    name: name.to_string(),
                    version_str: file_name,
                    path,
                });
            } else {
                debug!(
                    "[KEG_REGISTRY:{}] {} is not a keg directory",
                    name,
                    path.display()
                );
            }
        }
        kegs.sort_by(|a, b| a.version_str.cmp(&b.version_str));
        Ok(kegs)
    }

    pub fn get_installed_keg(&self, name: &str) -> Result<Option<InstalledKeg>> {
        Ok(self.installed_versions(name)?.pop())
    }

    pub fn list_installed_kegs(&self) -> Result<Vec<InstalledKeg>> {
        let cellar_dir = self.cellar_path();
        if !cellar_dir.is_dir() {
            debug!("[KEG_REGISTRY] Cellar directory not found. Returning empty list.");
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(&cellar_dir)? {
            let entry = entry?;
            if entry.path().is_dir() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();

        let mut kegs = Vec::new();
        for name in names {
            kegs.extend(self.installed_versions(&name)?);
        }
        debug!("[KEG_REGISTRY] Found {} installed keg versions.", kegs.len());
        Ok(kegs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_hidden_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::with_prefix(tmp.path());
        let pkg = config.formula_cellar_dir("fpp");
        fs::create_dir_all(pkg.join("0.9.2")).unwrap();
        fs::create_dir_all(pkg.join("0.9.1")).unwrap();
        fs::create_dir_all(pkg.join(".payloads").join("0.9.2-abc")).unwrap();
        fs::create_dir_all(pkg.join(".staging-xyz")).unwrap();

        let registry = KegRegistry::new(config);
        let versions: Vec<String> = registry
            .installed_versions("fpp")
            .unwrap()
            .into_iter()
            .map(|k| k.version_str)
            .collect();
        assert_eq!(versions, vec!["0.9.1", "0.9.2"]);
        assert_eq!(
            registry.get_installed_keg("fpp").unwrap().unwrap().version_str,
            "0.9.2"
        );
        assert!(registry.get_installed_keg("python").unwrap().is_none());
        assert_eq!(registry.list_installed_kegs().unwrap().len(), 2);
    }
}
