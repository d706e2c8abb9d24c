use std::sync::Arc;

use thiserror::Error;

use crate::pipeline::InstallStage;

#[derive(Error, Debug, Clone)]
pub enum SproutError {
    #[error("I/O Error: {0}")]
    Io(#[from] Arc<std::io::Error>),

    #[error("HTTP Request Error: {0}")]
    Http(#[from] Arc<reqwest::Error>),

    #[error("JSON Parsing Error: {0}")]
    Json(#[from] Arc<serde_json::Error>),

    #[error("Semantic Versioning Error: {0}")]
    SemVer(#[from] Arc<semver::Error>),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Resource Not Found: {0}")]
    NotFound(String),

    #[error("Validation Error: {0}")]
    ValidationError(String),

    #[error("Parsing Error in {0}: {1}")]
    ParseError(&'static str, String),

    #[error("Generic Error: {0}")]
    Generic(String),

    #[error("No artifact available for '{name}' on platform '{platform}'")]
    NoArtifactAvailable { name: String, platform: String },

    #[error("'{package}' requires '{dependency}' on this platform, but it is not installed")]
    MissingDependency { package: String, dependency: String },

    #[error("Failed to fetch '{url}': {cause}")]
    FetchFailed { url: String, cause: String },

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Unpack failed: {0}")]
    UnpackFailed(String),

    #[error("Placement failed: {0}")]
    PlacementFailed(String),

    #[error("Link failed: {0}")]
    LinkFailed(String),

    #[error("Smoke test of {executable} failed: {reason}")]
    SmokeTestFailed { executable: String, reason: String },

    #[error("{stage} stage failed: {cause}")]
    Install {
        stage: InstallStage,
        cause: Box<SproutError>,
    },
}

impl SproutError {
    /// Wraps an error with the install stage it occurred in. Already staged
    /// errors are returned unchanged.
    pub fn at_stage(self, stage: InstallStage) -> Self {
        match self {
            e @ SproutError::Install { .. } => e,
            cause => SproutError::Install {
                stage,
                cause: Box::new(cause),
            },
        }
    }

    /// The stage an install error was raised in, if any.
    pub fn stage(&self) -> Option<InstallStage> {
        match self {
            SproutError::Install { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// The innermost error, looking through stage wrappers.
    pub fn root_cause(&self) -> &SproutError {
        match self {
            SproutError::Install { cause, .. } => cause.root_cause(),
            other => other,
        }
    }

    /// Stable name of the error class, used in CLI error payloads.
    pub fn kind(&self) -> &'static str {
        match self.root_cause() {
            SproutError::Io(_) => "Io",
            SproutError::Http(_) => "Http",
            SproutError::Json(_) => "Json",
            SproutError::SemVer(_) => "SemVer",
            SproutError::Config(_) => "Config",
            SproutError::NotFound(_) => "NotFound",
            SproutError::ValidationError(_) => "ValidationError",
            SproutError::ParseError(..) => "ParseError",
            SproutError::Generic(_) => "Generic",
            SproutError::NoArtifactAvailable { .. } => "NoArtifactAvailable",
            SproutError::MissingDependency { .. } => "MissingDependency",
            SproutError::FetchFailed { .. } => "FetchFailed",
            SproutError::ChecksumMismatch { .. } => "ChecksumMismatch",
            SproutError::UnpackFailed(_) => "UnpackFailed",
            SproutError::PlacementFailed(_) => "PlacementFailed",
            SproutError::LinkFailed(_) => "LinkFailed",
            SproutError::SmokeTestFailed { .. } => "SmokeTestFailed",
            SproutError::Install { .. } => unreachable!("root_cause never returns a stage wrapper"),
        }
    }
}

impl From<std::io::Error> for SproutError {
    fn from(err: std::io::Error) -> Self {
        SproutError::Io(Arc::new(err))
    }
}

impl From<reqwest::Error> for SproutError {
    fn from(err: reqwest::Error) -> Self {
        SproutError::Http(Arc::new(err))
    }
}

impl From<serde_json::Error> for SproutError {
    fn from(err: serde_json::Error) -> Self {
        SproutError::Json(Arc::new(err))
    }
}

impl From<semver::Error> for SproutError {
    fn from(err: semver::Error) -> Self {
        SproutError::SemVer(Arc::new(err))
    }
}

pub type Result<T> = std::result::Result<T, SproutError>;
