//! Consolidated ticker skip-list: which tickers (and which dates for a
//! ticker) the downloader should not bother requesting again.
//!
//! Single source of truth is a JSON file at a configurable path
//! (conventionally `findb/skipped_tickers.json`). On first load, if that
//! file is absent, legacy per-ticker skip files scattered in a directory
//! are scanned and coalesced into the consolidated form.

use domain::{write_json_atomic, SkipMap, StoreError};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

const SKIP_ALL: &str = "ALL";

/// In-memory, write-through cache over the consolidated skip file.
pub struct SkipStore {
    path: PathBuf,
    entries: SkipMap,
}

impl SkipStore {
    /// Load the consolidated skip file at `path`. If it doesn't exist yet,
    /// fall back to scanning `legacy_dir` for per-ticker skip files
    /// (`<TICKER>_skip.json`, each holding a bare JSON array of dates or
    /// `["ALL"]`) and coalesce them into a fresh in-memory store — the
    /// consolidated file is written out on the next `save`.
    pub fn load(path: impl Into<PathBuf>, legacy_dir: Option<&Path>) -> Result<Self, StoreError> {
        let path = path.into();
        if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let entries: SkipMap = serde_json::from_str(&raw)?;
            return Ok(Self { path, entries });
        }

        let mut entries = SkipMap::new();
        if let Some(dir) = legacy_dir {
            if dir.is_dir() {
                entries = scan_legacy_skip_files(dir)?;
                tracing::info!(
                    count = entries.len(),
                    "coalesced legacy per-ticker skip files into consolidated store"
                );
            }
        }
        Ok(Self { path, entries })
    }

    /// Dates (or `["ALL"]`) this ticker should be skipped for. Empty if the
    /// ticker has no skip entry.
    pub fn get(&self, ticker: &str) -> Vec<String> {
        self.entries.get(ticker).cloned().unwrap_or_default()
    }

    /// True if `ticker` is permanently skipped (delisted/invalid).
    pub fn is_skipped_all(&self, ticker: &str) -> bool {
        matches!(self.entries.get(ticker), Some(dates) if dates.len() == 1 && dates[0] == SKIP_ALL)
    }

    /// Permanently skip `ticker` (e.g. delisted, invalid metadata).
    pub fn mark_all(&mut self, ticker: &str) {
        self.entries.insert(ticker.to_string(), vec![SKIP_ALL.to_string()]);
    }

    /// Merge `dates` (ISO `YYYY-MM-DD` strings) into `ticker`'s skip entry,
    /// sorted and de-duplicated. No-op if the ticker is already `ALL`.
    pub fn add_dates(&mut self, ticker: &str, dates: impl IntoIterator<Item = String>) {
        if self.is_skipped_all(ticker) {
            return;
        }
        let entry = self.entries.entry(ticker.to_string()).or_default();
        let mut set: HashSet<String> = entry.drain(..).collect();
        set.extend(dates);
        let mut merged: Vec<String> = set.into_iter().collect();
        merged.sort();
        *entry = merged;
    }

    /// Persist the consolidated store atomically.
    pub fn save(&self) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        write_json_atomic(&self.path, &self.entries)
    }
}

fn scan_legacy_skip_files(dir: &Path) -> Result<SkipMap, StoreError> {
    let mut entries = SkipMap::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else { continue };
        let Some(ticker) = name.strip_suffix("_skip.json") else { continue };
        let raw = std::fs::read_to_string(entry.path())?;
        match serde_json::from_str::<Vec<String>>(&raw) {
            Ok(dates) => {
                entries.insert(ticker.to_string(), dates);
            }
            Err(err) => {
                tracing::warn!(file = %name, error = %err, "could not parse legacy skip file, ignoring");
            }
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn fresh_store_has_no_entries() {
        let dir = tempdir().unwrap();
        let store = SkipStore::load(dir.path().join("skipped_tickers.json"), None).unwrap();
        assert!(store.get("PETR4").is_empty());
    }

    #[test]
    fn mark_all_then_save_then_reload_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("skipped_tickers.json");
        let mut store = SkipStore::load(&path, None).unwrap();
        store.mark_all("XXXX4");
        store.save().unwrap();

        let reloaded = SkipStore::load(&path, None).unwrap();
        assert!(reloaded.is_skipped_all("XXXX4"));
    }

    #[test]
    fn add_dates_merges_sorted_unique() {
        let dir = tempdir().unwrap();
        let mut store = SkipStore::load(dir.path().join("skipped_tickers.json"), None).unwrap();
        store.add_dates("PETR4", vec!["2024-01-05".to_string(), "2024-01-03".to_string()]);
        store.add_dates("PETR4", vec!["2024-01-03".to_string(), "2024-01-04".to_string()]);
        assert_eq!(
            store.get("PETR4"),
            vec!["2024-01-03".to_string(), "2024-01-04".to_string(), "2024-01-05".to_string()]
        );
    }

    #[test]
    fn add_dates_is_noop_once_marked_all() {
        let dir = tempdir().unwrap();
        let mut store = SkipStore::load(dir.path().join("skipped_tickers.json"), None).unwrap();
        store.mark_all("YYYY4");
        store.add_dates("YYYY4", vec!["2024-01-03".to_string()]);
        assert!(store.is_skipped_all("YYYY4"));
    }

    #[test]
    fn legacy_files_are_coalesced_on_first_load() {
        let legacy_dir = tempdir().unwrap();
        std::fs::write(legacy_dir.path().join("ABCD4_skip.json"), r#"["2023-05-01"]"#).unwrap();
        std::fs::write(legacy_dir.path().join("EFGH4_skip.json"), r#"["ALL"]"#).unwrap();

        let consolidated_dir = tempdir().unwrap();
        let store = SkipStore::load(
            consolidated_dir.path().join("skipped_tickers.json"),
            Some(legacy_dir.path()),
        )
        .unwrap();

        assert_eq!(store.get("ABCD4"), vec!["2023-05-01".to_string()]);
        assert!(store.is_skipped_all("EFGH4"));
    }
}
