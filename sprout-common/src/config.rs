// sprout-common/src/config.rs
use std::env;
use std::path::PathBuf;

use directories::UserDirs;
use tracing::debug;

use super::error::{Result, SproutError};

// Used when SPROUT_PREFIX is not set or is empty.
const DEFAULT_SPROUT_PREFIX: &str = "/opt/sprout";
const DEFAULT_FETCH_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
pub struct Config {
    pub prefix: PathBuf,
    pub bin_dir: PathBuf,
    pub cellar_dir: PathBuf,
    pub manifests_dir: PathBuf,
    /// Permit `http://` and `file://` artifact URLs.
    pub allow_insecure_urls: bool,
    pub fetch_attempts: u32,
}

impl Config {
    pub fn load() -> Result<Self> {
        debug!("Loading sprout configuration");

        let prefix = match env_path("SPROUT_PREFIX") {
            Some(p) => p,
            None => {
                debug!(
                    "SPROUT_PREFIX not set or empty, falling back to default: {}",
                    DEFAULT_SPROUT_PREFIX
                );
                PathBuf::from(DEFAULT_SPROUT_PREFIX)
            }
        };
        let mut config = Self::with_prefix(prefix);

        if let Some(bin) = env_path("SPROUT_BIN_DIR") {
            config.bin_dir = bin;
        }
        if let Some(cellar) = env_path("SPROUT_CELLAR") {
            config.cellar_dir = cellar;
        }
        if let Some(manifests) = env_path("SPROUT_MANIFESTS") {
            config.manifests_dir = manifests;
        }
        config.allow_insecure_urls = env::var("SPROUT_ALLOW_INSECURE").is_ok_and(|v| v == "1");
        if let Ok(raw) = env::var("SPROUT_FETCH_ATTEMPTS") {
            config.fetch_attempts = raw
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    SproutError::Config(format!(
                        "SPROUT_FETCH_ATTEMPTS must be a positive integer, got '{raw}'"
                    ))
                })?;
        }

        debug!("Effective prefix: {}", config.prefix.display());
        debug!("Configuration loaded successfully.");
        Ok(config)
    }

    /// Standard layout rooted at `prefix`, ignoring the environment.
    pub fn with_prefix(prefix: impl Into<PathBuf>) -> Self {
        let prefix = prefix.into();
        Self {
            bin_dir: prefix.join("bin"),
            cellar_dir: prefix.join("Cellar"),
            manifests_dir: prefix.join("manifests"),
            prefix,
            allow_insecure_urls: false,
            fetch_attempts: DEFAULT_FETCH_ATTEMPTS,
        }
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.bin_dir.clone()
    }

    pub fn cellar_dir(&self) -> PathBuf {
        self.cellar_dir.clone()
    }

    pub fn manifests_dir(&self) -> PathBuf {
        self.manifests_dir.clone()
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.prefix.join("var").join("locks")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.prefix.join("var").join("log")
    }

    pub fn formula_cellar_dir(&self, name: &str) -> PathBuf {
        self.cellar_dir.join(name)
    }

    pub fn formula_keg_path(&self, name: &str, version: &str) -> PathBuf {
        self.formula_cellar_dir(name).join(version)
    }

    /// Directory holding the real payload trees the keg links point at.
    pub fn formula_payloads_dir(&self, name: &str) -> PathBuf {
        self.formula_cellar_dir(name).join(".payloads")
    }

    pub fn package_lock_path(&self, name: &str) -> PathBuf {
        self.locks_dir().join(format!("{name}.lock"))
    }
}

fn env_path(var: &str) -> Option<PathBuf> {
    let raw = env::var(var).ok().filter(|s| !s.is_empty())?;
    Some(expand_home(&raw))
}

fn expand_home(raw: &str) -> PathBuf {
    match raw.strip_prefix("~/") {
        Some(rest) => UserDirs::new()
            .map(|ud| ud.home_dir().join(rest))
            .unwrap_or_else(|| PathBuf::from(raw)),
        None => PathBuf::from(raw),
    }
}
