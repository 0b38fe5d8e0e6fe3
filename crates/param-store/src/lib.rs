//! Layered `key=value` parameter file loader.
//!
//! Reads an ordered list of files; later files override earlier ones.
//! Blank lines and `#` comments are skipped. Values are coerced to a
//! declared schema and path-like values are normalized against a repo
//! root, matching the layered config conventions the rest of the
//! pipeline expects.

use domain::ConfigError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The declared type of a parameter, used to coerce its raw string value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Bool,
    Int,
    Float,
    Str,
    /// Like `Str`, but the value is run through path normalization.
    Path,
}

/// A coerced parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl ParamValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParamValue::Int(i) => Some(*i),
            _ => None,
        }
    }
    pub fn as_float(&self) -> Option<f64> {
        match self {
            ParamValue::Float(f) => Some(*f),
            ParamValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// A merged, typed parameter set loaded from one or more files.
#[derive(Debug, Clone, Default)]
pub struct ParamStore {
    values: HashMap<String, ParamValue>,
}

impl ParamStore {
    /// Load and merge `filepaths` in order; later files override earlier keys.
    /// `schema` declares the expected type for known keys; unknown keys are
    /// kept as strings. Path-like values (per `looks_like_path`) are
    /// normalized relative to `repo_root`.
    pub fn load(
        filepaths: &[impl AsRef<Path>],
        schema: &HashMap<&str, ParamType>,
        repo_root: &Path,
    ) -> Result<Self, ConfigError> {
        let mut values: HashMap<String, ParamValue> = HashMap::new();

        for filepath in filepaths {
            let filepath = filepath.as_ref();
            let contents = std::fs::read_to_string(filepath).map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ConfigError::FileNotFound(filepath.display().to_string())
                } else {
                    ConfigError::Io(e)
                }
            })?;

            for (line_no, line) in contents.lines().enumerate() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                let Some((key, raw_value)) = line.split_once('=') else {
                    tracing::warn!(
                        "malformed line {} in '{}': '{}'. skipping",
                        line_no + 1,
                        filepath.display(),
                        line
                    );
                    continue;
                };
                let key = key.trim();
                let mut value_str = raw_value.trim().to_string();

                if (value_str.starts_with('"') && value_str.ends_with('"') && value_str.len() >= 2)
                    || (value_str.starts_with('\'') && value_str.ends_with('\'') && value_str.len() >= 2)
                {
                    value_str = value_str[1..value_str.len() - 1].to_string();
                }

                let target_type = schema.get(key).copied();
                let coerced = match target_type {
                    Some(ParamType::Bool) => coerce_bool(key, &value_str)?,
                    Some(ParamType::Int) => coerce_int(key, &value_str)?,
                    Some(ParamType::Float) => coerce_float(key, &value_str)?,
                    Some(ParamType::Str) => ParamValue::Str(expand_home(&value_str)),
                    Some(ParamType::Path) => {
                        ParamValue::Str(normalize_path(&expand_home(&value_str), repo_root))
                    }
                    None => {
                        tracing::debug!(
                            "unknown parameter key '{}' in '{}'. treating as string",
                            key,
                            filepath.display()
                        );
                        let expanded = expand_home(&value_str);
                        if looks_like_path(&expanded) {
                            ParamValue::Str(normalize_path(&expanded, repo_root))
                        } else {
                            ParamValue::Str(expanded)
                        }
                    }
                };

                values.insert(key.to_string(), coerced);
            }
        }

        Ok(Self { values })
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str, default: &str) -> String {
        self.values
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or(default)
            .to_string()
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.values.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
    }

    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        self.values.get(key).and_then(|v| v.as_int()).unwrap_or(default)
    }

    pub fn get_float(&self, key: &str, default: f64) -> f64 {
        self.values.get(key).and_then(|v| v.as_float()).unwrap_or(default)
    }

    pub fn require(&self, key: &str) -> Result<&ParamValue, ConfigError> {
        self.values
            .get(key)
            .ok_or_else(|| ConfigError::MissingKey(key.to_string()))
    }
}

fn coerce_bool(key: &str, value_str: &str) -> Result<ParamValue, ConfigError> {
    let lower = value_str.to_lowercase();
    if matches!(lower.as_str(), "true" | "yes" | "1") {
        Ok(ParamValue::Bool(true))
    } else if matches!(lower.as_str(), "false" | "no" | "0") {
        Ok(ParamValue::Bool(false))
    } else {
        Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value_str.to_string(),
            expected: "true/false (or yes/no, 1/0)",
        })
    }
}

fn coerce_int(key: &str, value_str: &str) -> Result<ParamValue, ConfigError> {
    value_str
        .parse::<i64>()
        .map(ParamValue::Int)
        .map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value_str.to_string(),
            expected: "integer",
        })
}

fn coerce_float(key: &str, value_str: &str) -> Result<ParamValue, ConfigError> {
    value_str
        .parse::<f64>()
        .map(ParamValue::Float)
        .map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value_str.to_string(),
            expected: "float",
        })
}

fn expand_home(value: &str) -> String {
    if let Some(rest) = value.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            let rest = rest.strip_prefix('/').unwrap_or(rest);
            return home.join(rest).display().to_string();
        }
    }
    value.to_string()
}

/// True if `value` looks like a filesystem path rather than a plain scalar:
/// starts with `~`, contains a path separator, or ends in a known data-file
/// extension.
pub fn looks_like_path(value: &str) -> bool {
    if value.starts_with('~') || value.contains('/') || value.contains('\\') {
        return true;
    }
    const EXTENSIONS: &[&str] = &[".txt", ".csv", ".json", ".db", ".log"];
    EXTENSIONS.iter().any(|ext| value.ends_with(ext))
}

/// Normalize a path-like candidate against `repo_root` using a fallback
/// chain: (1) use as-is if it already exists; (2) if it looks like someone
/// else's home directory (`/Users/other/...` or `/home/other/...`),
/// substitute the current home; (3) if its basename exists under
/// `repo_root/parameters/`, use that; (4) otherwise resolve it relative to
/// `repo_root`; (5) last resort, return the expanded absolute candidate.
pub fn normalize_path(candidate: &str, repo_root: &Path) -> String {
    let candidate_path = PathBuf::from(candidate);

    if candidate_path.exists() {
        return candidate_path.display().to_string();
    }

    if let Some(substituted) = substitute_foreign_home(candidate) {
        if Path::new(&substituted).exists() {
            return substituted;
        }
    }

    if let Some(basename) = candidate_path.file_name() {
        let under_parameters = repo_root.join("parameters").join(basename);
        if under_parameters.exists() {
            return under_parameters.display().to_string();
        }
    }

    let relative_to_root = repo_root.join(&candidate_path);
    if relative_to_root.exists() {
        return relative_to_root.display().to_string();
    }

    candidate_path.display().to_string()
}

/// Detect a `/Users/<other>/...` or `/home/<other>/...` prefix that doesn't
/// belong to the current user and rewrite it onto the current home
/// directory, preserving everything after the username segment.
fn substitute_foreign_home(candidate: &str) -> Option<String> {
    let home = dirs::home_dir()?;
    let home_str = home.display().to_string();

    for prefix in ["/Users/", "/home/"] {
        if let Some(rest) = candidate.strip_prefix(prefix) {
            let mut parts = rest.splitn(2, '/');
            let _other_user = parts.next()?;
            let tail = parts.next().unwrap_or("");
            let rewritten = format!("{home_str}/{tail}");
            if rewritten != candidate {
                return Some(rewritten);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn later_files_override_earlier() {
        let dir = tempfile::tempdir().unwrap();
        let f1 = write_file(dir.path(), "a.cfg", "risk_free_rate=0.10\nmin_stocks=3\n");
        let f2 = write_file(dir.path(), "b.cfg", "risk_free_rate=0.12\n");

        let mut schema = HashMap::new();
        schema.insert("risk_free_rate", ParamType::Float);
        schema.insert("min_stocks", ParamType::Int);

        let store = ParamStore::load(&[f1, f2], &schema, dir.path()).unwrap();
        assert_eq!(store.get_float("risk_free_rate", 0.0), 0.12);
        assert_eq!(store.get_int("min_stocks", 0), 3);
    }

    #[test]
    fn comments_and_blank_lines_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let f1 = write_file(dir.path(), "a.cfg", "# comment\n\nfoo=bar\n");
        let schema = HashMap::new();
        let store = ParamStore::load(&[f1], &schema, dir.path()).unwrap();
        assert_eq!(store.get_str("foo", ""), "bar");
    }

    #[test]
    fn bool_coercion_accepts_yes_no() {
        let dir = tempfile::tempdir().unwrap();
        let f1 = write_file(dir.path(), "a.cfg", "enabled=yes\ndisabled=no\n");
        let mut schema = HashMap::new();
        schema.insert("enabled", ParamType::Bool);
        schema.insert("disabled", ParamType::Bool);
        let store = ParamStore::load(&[f1], &schema, dir.path()).unwrap();
        assert_eq!(store.get_bool("enabled", false), true);
        assert_eq!(store.get_bool("disabled", true), false);
    }

    #[test]
    fn bool_coercion_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let f1 = write_file(dir.path(), "a.cfg", "enabled=maybe\n");
        let mut schema = HashMap::new();
        schema.insert("enabled", ParamType::Bool);
        let result = ParamStore::load(&[f1], &schema, dir.path());
        assert!(result.is_err());
    }

    #[test]
    fn quoted_values_are_unquoted() {
        let dir = tempfile::tempdir().unwrap();
        let f1 = write_file(dir.path(), "a.cfg", "name=\"hello world\"\n");
        let schema = HashMap::new();
        let store = ParamStore::load(&[f1], &schema, dir.path()).unwrap();
        assert_eq!(store.get_str("name", ""), "hello world");
    }

    #[test]
    fn looks_like_path_detects_extensions_and_separators() {
        assert!(looks_like_path("findb/master.csv"));
        assert!(looks_like_path("~/data.json"));
        assert!(!looks_like_path("moderado"));
        assert!(!looks_like_path("0.10"));
    }

    #[test]
    fn normalize_path_falls_back_to_repo_relative() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("findb")).unwrap();
        write_file(dir.path().join("findb").as_path(), "master.csv", "x");
        let resolved = normalize_path("findb/master.csv", dir.path());
        assert!(resolved.ends_with("findb/master.csv") || resolved.ends_with("findb\\master.csv"));
    }
}
