use chrono::Utc;

/// Run ids are timestamp-derived, matching the originals' `run_YYYYMMDD_HHMMSS` convention.
pub fn new_run_id(prefix: &str) -> String {
    format!("{prefix}_{}", Utc::now().format("%Y%m%d_%H%M%S"))
}
