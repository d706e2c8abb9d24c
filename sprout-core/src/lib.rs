// sprout-core/src/lib.rs
pub mod install;

pub use install::{
    ArchiveUnpacker, DefaultUnpacker, DependencyProbe, InstallOutcome, Installer, SmokeStatus,
    SystemDependencyProbe,
};
