//! The consolidated price history store (`findb/StockDataDB.csv`):
//! one row per (ticker, date), merged and deduplicated on every update.

use domain::{MasterDbRow, StoreError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// In-memory view over the master price-history CSV, keyed by
/// `(ticker, date)` so merges are a single pass rather than an
/// append-then-sort-then-dedup over the whole file.
pub struct MasterDb {
    path: PathBuf,
    rows: BTreeMap<(String, chrono::NaiveDate), MasterDbRow>,
}

impl MasterDb {
    /// Load the master DB from `path`. A missing file is treated as an
    /// empty, freshly-created database.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let mut rows = BTreeMap::new();

        if path.exists() {
            let mut reader = csv::Reader::from_path(&path)?;
            for record in reader.deserialize::<MasterDbRow>() {
                match record {
                    Ok(row) => {
                        rows.insert((row.ticker.clone(), row.date), row);
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "skipping malformed master DB row");
                    }
                }
            }
            tracing::info!(count = rows.len(), "loaded existing master database");
        } else {
            tracing::info!("no existing master database found, starting fresh");
        }

        Ok(Self { path, rows })
    }

    /// Merge `new_rows` in, overwriting any existing `(ticker, date)` entry
    /// with the newer value (last-write-wins, matching
    /// `drop_duplicates(..., keep='last')`).
    pub fn merge(&mut self, new_rows: impl IntoIterator<Item = MasterDbRow>) {
        for row in new_rows {
            self.rows.insert((row.ticker.clone(), row.date), row);
        }
    }

    /// All rows for `ticker`, sorted by date ascending.
    pub fn rows_for(&self, ticker: &str) -> Vec<&MasterDbRow> {
        self.rows
            .range((ticker.to_string(), chrono::NaiveDate::MIN)..(ticker.to_string(), chrono::NaiveDate::MAX))
            .map(|(_, row)| row)
            .collect()
    }

    /// Every date for which `ticker` already has a row.
    pub fn existing_dates(&self, ticker: &str) -> Vec<chrono::NaiveDate> {
        self.rows_for(ticker).into_iter().map(|row| row.date).collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Persist the database: sorted by (ticker, date), written atomically.
    pub fn save(&self) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }

        let tmp_dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::Builder::new()
            .prefix(".tmp_csv_")
            .tempfile_in(tmp_dir)?;

        {
            let mut writer = csv::Writer::from_writer(tmp.as_file_mut());
            for row in self.rows.values() {
                writer.serialize(row)?;
            }
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;

        tmp.persist(&self.path)
            .map_err(|e| StoreError::AtomicWrite {
                path: self.path.display().to_string(),
                source: e.error,
            })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn bar(ticker: &str, date: &str, close: f64) -> MasterDbRow {
        MasterDbRow {
            ticker: ticker.to_string(),
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1000.0,
        }
    }

    #[test]
    fn fresh_db_is_empty() {
        let dir = tempdir().unwrap();
        let db = MasterDb::load(dir.path().join("StockDataDB.csv")).unwrap();
        assert!(db.is_empty());
    }

    #[test]
    fn merge_dedups_keeping_last() {
        let dir = tempdir().unwrap();
        let mut db = MasterDb::load(dir.path().join("StockDataDB.csv")).unwrap();
        db.merge(vec![bar("PETR4", "2024-01-02", 10.0)]);
        db.merge(vec![bar("PETR4", "2024-01-02", 11.0)]);
        assert_eq!(db.len(), 1);
        assert_eq!(db.rows_for("PETR4")[0].close, 11.0);
    }

    #[test]
    fn save_then_reload_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("StockDataDB.csv");
        let mut db = MasterDb::load(&path).unwrap();
        db.merge(vec![bar("PETR4", "2024-01-02", 10.0), bar("VALE3", "2024-01-02", 20.0)]);
        db.save().unwrap();

        let reloaded = MasterDb::load(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.rows_for("VALE3")[0].close, 20.0);
    }

    #[test]
    fn existing_dates_are_sorted_ascending() {
        let dir = tempdir().unwrap();
        let mut db = MasterDb::load(dir.path().join("StockDataDB.csv")).unwrap();
        db.merge(vec![bar("PETR4", "2024-01-05", 10.0), bar("PETR4", "2024-01-02", 9.0)]);
        let dates = db.existing_dates("PETR4");
        assert_eq!(
            dates,
            vec![
                NaiveDate::parse_from_str("2024-01-02", "%Y-%m-%d").unwrap(),
                NaiveDate::parse_from_str("2024-01-05", "%Y-%m-%d").unwrap(),
            ]
        );
    }
}
