// sprout-common/src/model/mod.rs
pub mod artifact;
pub mod manifest;
pub mod platform;

// Re-export
pub use artifact::{InstallReceipt, InstalledPackage};
pub use manifest::{Artifact, ArtifactKind, ManifestRecord, StorageClass};
pub use platform::{Arch, OsFamily, OsVersion, Platform, PlatformPredicate};
