// sprout-aio/src/lib.rs
//! IO primitives for sprout (checksums, archives, filesystem swaps, locks, processes)

pub mod checksum;
pub mod extract;
pub mod fs;
pub mod json_io;
pub mod lock;
pub mod process;

pub use checksum::{sha256_hex, verify_bytes};
pub use extract::{detect_format, extract_archive_bytes, infer_archive_root_dir, ArchiveFormat};
pub use fs::*;
pub use json_io::{read_json_sync, write_json_sync};
pub use lock::PackageLock;
pub use process::{run_command_with_timeout, CommandOutcome};
