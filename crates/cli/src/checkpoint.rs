//! `data/run_checkpoint.json` read/write helpers for the `runner`
//! subcommand. Every write goes through the atomic-write path so a crash
//! mid-write never corrupts the previous good checkpoint.

use chrono::Utc;
use domain::{RunCheckpoint, StageStatus, StoreError};
use std::path::Path;

pub fn load(path: &Path) -> Option<RunCheckpoint> {
    let contents = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&contents).ok()
}

pub fn write(path: &Path, stage: &str, status: StageStatus, error: Option<String>, attempt_count: u32) -> Result<(), StoreError> {
    let checkpoint = RunCheckpoint {
        stage: stage.to_string(),
        status,
        timestamp: Utc::now().to_rfc3339(),
        error,
        attempt_count,
    };
    domain::write_json_atomic(path, &checkpoint)
}

/// `min(30 * attempt, 180)` seconds, per the runner's retry backoff rule.
pub fn retry_backoff_secs(attempt: u32) -> u64 {
    (30 * attempt as u64).min(180)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_caps_at_180() {
        assert_eq!(retry_backoff_secs(1), 30);
        assert_eq!(retry_backoff_secs(6), 180);
        assert_eq!(retry_backoff_secs(20), 180);
    }

    #[test]
    fn write_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_checkpoint.json");
        write(&path, "download", StageStatus::Completed, None, 1).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded.stage, "download");
        assert_eq!(loaded.status, StageStatus::Completed);
    }
}
