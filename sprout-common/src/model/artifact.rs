// sprout-common/src/model/artifact.rs
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::manifest::ArtifactKind;

pub const RECEIPT_FILENAME: &str = "INSTALL_RECEIPT.json";

/// A package version that made it through Linking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPackage {
    pub name: String,
    pub version: String,
    /// `<cellar>/<name>/<version>`.
    pub install_root: PathBuf,
    /// `<bin>/<link_name>`, pointing into `install_root`.
    pub executable_symlink: PathBuf,
    /// Where the symlink points.
    pub entry_point: PathBuf,
    pub artifact: ArtifactKind,
}

/// Written into every install root before it becomes visible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallReceipt {
    pub name: String,
    pub version: String,
    pub artifact: ArtifactKind,
    pub source_url: String,
    pub sha256: String,
    pub platform: String,
    pub installed_at: String,
}
