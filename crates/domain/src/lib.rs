pub mod error;
pub mod types;

pub use error::{ConfigError, OptimizationError, ProviderError, ScoringError, StoreError};
pub use types::*;

/// Write `value` to `path` atomically: serialize to a temp file in the same
/// directory, flush, fsync, then rename over the target. Removes the temp
/// file on any failure so a crash never leaves a partially-written artifact
/// where the previous good version used to be.
pub fn write_json_atomic<T: serde::Serialize>(
    path: &std::path::Path,
    value: &T,
) -> Result<(), StoreError> {
    use std::io::Write;

    let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".tmp_json_")
        .tempfile_in(dir)?;

    let bytes = serde_json::to_vec_pretty(value)?;
    let write_result = tmp.write_all(&bytes).and_then(|_| tmp.as_file().sync_all());

    if let Err(source) = write_result {
        return Err(StoreError::AtomicWrite {
            path: path.display().to_string(),
            source,
        });
    }

    tmp.persist(path).map_err(|e| StoreError::AtomicWrite {
        path: path.display().to_string(),
        source: e.error,
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn atomic_write_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        let value = json!({"a": 1, "b": [1,2,3]});
        write_json_atomic(&path, &value).unwrap();
        let read_back: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(read_back, value);
    }

    #[test]
    fn atomic_write_overwrites_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        write_json_atomic(&path, &json!({"v": 1})).unwrap();
        write_json_atomic(&path, &json!({"v": 2})).unwrap();
        let read_back: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(read_back["v"], 2);
        // no leftover temp files
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".tmp_json_"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
