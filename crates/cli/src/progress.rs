//! Per-stage progress JSON, recursively merge-updated and flushed through
//! the atomic-write contract after every update — the Rust analogue of
//! `JsonWebLogHandler::recursive_update`.

use serde_json::Value;
use std::path::{Path, PathBuf};

pub struct ProgressWriter {
    path: PathBuf,
    value: Value,
}

impl ProgressWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), value: Value::Object(Default::default()) }
    }

    /// Seed from whatever is already on disk, so a failure-path update
    /// doesn't clobber fields written earlier in the same run.
    pub fn load_or_new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let value = std::fs::read_to_string(&path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_else(|| Value::Object(Default::default()));
        Self { path, value }
    }

    /// Recursively merge `patch` into the current progress document, then
    /// flush to disk atomically.
    pub fn update(&mut self, patch: Value) -> Result<(), domain::StoreError> {
        recursive_merge(&mut self.value, patch);
        domain::write_json_atomic(&self.path, &self.value)
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

fn recursive_merge(base: &mut Value, patch: Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, patch_value) in patch_map {
                recursive_merge(base_map.entry(key).or_insert(Value::Null), patch_value);
            }
        }
        (base_slot, patch_value) => {
            *base_slot = patch_value;
        }
    }
}

pub fn path_for_stage(progress_dir: &Path, stage: &str) -> PathBuf {
    progress_dir.join(format!("{stage}_progress.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn update_merges_nested_objects() {
        let dir = tempdir().unwrap();
        let mut writer = ProgressWriter::new(dir.path().join("download_progress.json"));
        writer.update(json!({"status": "Running", "ticker_download": {"current_ticker": "PETR4"}})).unwrap();
        writer.update(json!({"ticker_download": {"rows": 10}})).unwrap();

        let value = writer.value();
        assert_eq!(value["status"], "Running");
        assert_eq!(value["ticker_download"]["current_ticker"], "PETR4");
        assert_eq!(value["ticker_download"]["rows"], 10);
    }
}
