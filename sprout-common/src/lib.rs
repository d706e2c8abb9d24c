// sprout-common/src/lib.rs
pub mod config;
pub mod error;
pub mod formulary;
pub mod keg;
pub mod model;
pub mod pipeline;

// Re-export key types
pub use config::Config;
pub use error::{Result, SproutError};
pub use formulary::Formulary;
pub use model::{ManifestRecord, Platform};
