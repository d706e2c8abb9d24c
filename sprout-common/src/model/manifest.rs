// sprout-common/src/model/manifest.rs
//! Immutable description of one released version of a package.
//!
//! A manifest names the source archive and its SHA-256 digest, optionally a
//! set of precompiled bottles, an optional platform-conditional build
//! dependency, and how the payload is laid out once installed. Records are
//! loaded once and shared behind `Arc`; nothing in the installer mutates
//! them.

use std::fmt;
use std::path::{Component, Path};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::platform::{Platform, PlatformPredicate};
use crate::error::{Result, SproutError};

/// Length of a hex-encoded SHA-256 digest. The manifest format commits to
/// SHA-256 only.
pub const SHA256_HEX_LEN: usize = 64;

pub const DEFAULT_BOTTLE_ROOT_URL: &str = "https://ghcr.io/v2/homebrew/core";
const DEFAULT_PAYLOAD_PREFIX: &str = "libexec";
const DEFAULT_SMOKE_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageClass {
    /// Relocatable bottle, usable across platform minor versions.
    #[serde(alias = "any_skip_relocation")]
    Any,
    /// Only valid on the exact platform it was built for.
    Platform,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BottleFile {
    pub platform: String,
    pub sha256: String,
    #[serde(default = "default_storage_class")]
    pub cellar: StorageClass,
}

fn default_storage_class() -> StorageClass {
    StorageClass::Platform
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BottleSpec {
    #[serde(default)]
    pub root_url: Option<String>,
    #[serde(default)]
    pub files: Vec<BottleFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildDependency {
    pub name: String,
    pub when: PlatformPredicate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallLayout {
    /// Directory inside the install root that receives a source payload.
    #[serde(default)]
    pub prefix: Option<String>,
    /// Executable path relative to the install root.
    #[serde(default)]
    pub entry_point: Option<String>,
    /// Name of the symlink created in the shared bin directory.
    #[serde(default)]
    pub link_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmokeSpec {
    #[serde(default)]
    pub args: Option<Vec<String>>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRecord {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub desc: Option<String>,
    #[serde(default)]
    pub homepage: Option<String>,
    pub url: String,
    pub sha256: String,
    #[serde(default)]
    pub bottles: Option<BottleSpec>,
    #[serde(default)]
    pub build_dependency: Option<BuildDependency>,
    #[serde(default)]
    pub install: InstallLayout,
    #[serde(default)]
    pub test: SmokeSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArtifactKind {
    Source,
    Bottle {
        platform: String,
        cellar: StorageClass,
    },
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Source => f.write_str("source archive"),
            ArtifactKind::Bottle { platform, .. } => write!(f, "bottle ({platform})"),
        }
    }
}

/// The one artifact chosen for an install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub url: String,
    pub sha256: String,
}

impl Artifact {
    pub fn is_bottle(&self) -> bool {
        matches!(self.kind, ArtifactKind::Bottle { .. })
    }
}

impl ManifestRecord {
    /// Parses and validates a manifest document.
    pub fn from_json(content: &str) -> Result<Self> {
        let record: ManifestRecord = serde_json::from_str(content)?;
        record.validate()?;
        Ok(record)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// `name@version`, used in logs and lock names.
    pub fn id(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() || !is_single_path_segment(&self.name) {
            return Err(SproutError::ValidationError(format!(
                "invalid package name '{}'",
                self.name
            )));
        }
        if self.version.is_empty() || !is_single_path_segment(&self.version) {
            return Err(SproutError::ValidationError(format!(
                "invalid version '{}' for {}",
                self.version, self.name
            )));
        }
        validate_sha256(&self.sha256, &format!("source archive of {}", self.id()))?;
        if let Some(bottles) = &self.bottles {
            for file in &bottles.files {
                if file.platform.is_empty() {
                    return Err(SproutError::ValidationError(format!(
                        "bottle entry without platform in {}",
                        self.id()
                    )));
                }
                validate_sha256(
                    &file.sha256,
                    &format!("{} bottle of {}", file.platform, self.id()),
                )?;
            }
        }
        for (what, path) in [
            ("install.prefix", self.payload_prefix()),
            ("install.entry_point", self.entry_point()),
        ] {
            if !is_contained_relative_path(&path) {
                return Err(SproutError::ValidationError(format!(
                    "{what} '{path}' of {} must be a relative path inside the install root",
                    self.id()
                )));
            }
        }
        if !is_single_path_segment(&self.link_name()) {
            return Err(SproutError::ValidationError(format!(
                "install.link_name '{}' of {} must be a plain file name",
                self.link_name(),
                self.id()
            )));
        }
        Ok(())
    }

    /// Directory under the install root receiving source payloads.
    pub fn payload_prefix(&self) -> String {
        self.install
            .prefix
            .clone()
            .unwrap_or_else(|| DEFAULT_PAYLOAD_PREFIX.to_string())
    }

    /// Executable path relative to the install root.
    pub fn entry_point(&self) -> String {
        self.install
            .entry_point
            .clone()
            .unwrap_or_else(|| format!("{}/{}", self.payload_prefix(), self.name))
    }

    pub fn link_name(&self) -> String {
        self.install
            .link_name
            .clone()
            .unwrap_or_else(|| self.name.clone())
    }

    pub fn smoke_args(&self) -> Vec<String> {
        self.test
            .args
            .clone()
            .unwrap_or_else(|| vec!["--help".to_string()])
    }

    pub fn smoke_timeout_secs(&self) -> u64 {
        self.test.timeout_secs.unwrap_or(DEFAULT_SMOKE_TIMEOUT_SECS)
    }

    pub fn bottle_url(&self, platform_id: &str) -> String {
        let root = self
            .bottles
            .as_ref()
            .and_then(|b| b.root_url.as_deref())
            .unwrap_or(DEFAULT_BOTTLE_ROOT_URL)
            .trim_end_matches('/');
        format!(
            "{root}/{}-{}.{platform_id}.bottle.tar.gz",
            self.name, self.version
        )
    }

    /// Picks the bottle matching `platform` exactly, then the first `any`
    /// bottle, then the source archive.
    pub fn select_artifact(&self, platform: &Platform, force_source: bool) -> Result<Artifact> {
        let platform_id = platform.platform_id();
        if !force_source {
            if let Some(bottles) = self.bottles.as_ref().filter(|b| !b.files.is_empty()) {
                let matched = bottles
                    .files
                    .iter()
                    .find(|f| f.platform == platform_id)
                    .or_else(|| bottles.files.iter().find(|f| f.cellar == StorageClass::Any));
                if let Some(file) = matched {
                    debug!(
                        "{}: selected {} bottle for platform {}",
                        self.id(),
                        file.platform,
                        platform_id
                    );
                    return Ok(Artifact {
                        kind: ArtifactKind::Bottle {
                            platform: file.platform.clone(),
                            cellar: file.cellar,
                        },
                        url: self.bottle_url(&file.platform),
                        sha256: file.sha256.to_ascii_lowercase(),
                    });
                }
                debug!(
                    "{}: no bottle for platform {}, falling back to source",
                    self.id(),
                    platform_id
                );
            }
        }

        if self.url.trim().is_empty() {
            return Err(SproutError::NoArtifactAvailable {
                name: self.name.clone(),
                platform: platform_id,
            });
        }
        Ok(Artifact {
            kind: ArtifactKind::Source,
            url: self.url.clone(),
            sha256: self.sha256.to_ascii_lowercase(),
        })
    }

    /// Name of the build dependency if its predicate holds on `platform`.
    pub fn required_dependency(&self, platform: &Platform) -> Option<&str> {
        self.build_dependency
            .as_ref()
            .filter(|dep| dep.when.holds(platform))
            .map(|dep| dep.name.as_str())
    }
}

fn validate_sha256(digest: &str, what: &str) -> Result<()> {
    if digest.len() != SHA256_HEX_LEN || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(SproutError::ValidationError(format!(
            "checksum for {what} must be {SHA256_HEX_LEN} hex characters (SHA-256), got '{digest}'"
        )));
    }
    Ok(())
}

fn is_single_path_segment(s: &str) -> bool {
    !s.is_empty() && s != "." && s != ".." && !s.contains('/') && !s.contains('\\')
}

fn is_contained_relative_path(s: &str) -> bool {
    let path = Path::new(s);
    !s.is_empty() && path.components().all(|c| matches!(c, Component::Normal(_)))
}
