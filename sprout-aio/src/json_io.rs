// sprout-aio/src/json_io.rs
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sprout_common::error::Result;
use tracing::debug;

/// Writes pretty-printed JSON through [`crate::fs::atomic_write_file`].
pub fn write_json_sync<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    debug!("Writing JSON to: {}", path.display());
    let json_bytes = serde_json::to_vec_pretty(data)?;
    crate::fs::atomic_write_file(path, &json_bytes)
}

pub fn read_json_sync<T: DeserializeOwned>(path: &Path) -> Result<T> {
    debug!("Reading JSON from: {}", path.display());
    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);
    Ok(serde_json::from_reader(reader)?)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn round_trips_through_nested_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("a/b/receipt.json");
        let mut data = BTreeMap::new();
        data.insert("name".to_string(), "fpp".to_string());

        write_json_sync(&path, &data).unwrap();
        let back: BTreeMap<String, String> = read_json_sync(&path).unwrap();
        assert_eq!(back, data);
    }
}
