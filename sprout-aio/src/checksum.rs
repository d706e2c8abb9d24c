// sprout-aio/src/checksum.rs
use sha2::{Digest, Sha256};
use sprout_common::error::{Result, SproutError};
use tracing::debug;

/// Lower-case hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Verifies that `bytes` hash to `expected` (hex, any case). A mismatch is
/// always an error; callers must not continue with the content.
pub fn verify_bytes(bytes: &[u8], expected: &str) -> Result<()> {
    let actual = sha256_hex(bytes);
    let expected = expected.trim().to_ascii_lowercase();

    debug!("Calculated SHA256: {} ({} bytes)", actual, bytes.len());
    debug!("Expected SHA256:   {}", expected);

    if actual == expected {
        Ok(())
    } else {
        Err(SproutError::ChecksumMismatch { expected, actual })
    }
}
