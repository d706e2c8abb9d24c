// sprout-common/src/pipeline.rs
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Stages of a single install request, in the order they are entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstallStage {
    Selecting,
    Fetching,
    Verifying,
    Unpacking,
    Placing,
    Linking,
    TestingSmoke,
    Done,
}

impl InstallStage {
    pub const ALL: [InstallStage; 8] = [
        InstallStage::Selecting,
        InstallStage::Fetching,
        InstallStage::Verifying,
        InstallStage::Unpacking,
        InstallStage::Placing,
        InstallStage::Linking,
        InstallStage::TestingSmoke,
        InstallStage::Done,
    ];
}

impl fmt::Display for InstallStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstallStage::Selecting => "Selecting",
            InstallStage::Fetching => "Fetching",
            InstallStage::Verifying => "Verifying",
            InstallStage::Unpacking => "Unpacking",
            InstallStage::Placing => "Placing",
            InstallStage::Linking => "Linking",
            InstallStage::TestingSmoke => "TestingSmoke",
            InstallStage::Done => "Done",
        };
        f.write_str(name)
    }
}

/// Options that alter how a single install is carried out.
#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Ignore bottles and always use the source archive.
    pub force_source: bool,
    pub skip_smoke_test: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InstallEvent {
    StageEntered {
        target_id: String,
        stage: InstallStage,
    },
    FetchRetry {
        target_id: String,
        url: String,
        attempt: u32,
        error: String,
    },
    InstallFinished {
        target_id: String,
        install_root: PathBuf,
        degraded: bool,
    },
    InstallFailed {
        target_id: String,
        stage: InstallStage,
        error: String,
    },
}
