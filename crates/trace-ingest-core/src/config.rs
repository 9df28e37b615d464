use crate::error::{Error, Result};
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Utc};
use config::{Config, ConfigError, Environment, File as ConfigFile};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Component, Path, PathBuf};
use std::thread;

pub const DEFAULT_DATE_PATTERN: &str = "%Y-%m";
pub const DEFAULT_CATALOG_PATH: &str = "trace_ingest.db";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    #[serde(default)]
    pub incoming_dirs: Vec<PathBuf>,
    #[serde(default = "default_file_patterns")]
    pub file_patterns: Vec<String>,
    pub archive_root: PathBuf,
    #[serde(default = "default_date_pattern")]
    pub date_pattern: String,
    #[serde(default = "default_move_throttle")]
    pub move_throttle: usize,
    #[serde(default = "default_measure_throttle")]
    pub measure_throttle: usize,
    #[serde(default)]
    pub measure_deadline_secs: Option<u64>,
    #[serde(default = "default_catalog_path")]
    pub catalog_path: PathBuf,
}

fn default_file_patterns() -> Vec<String> {
    vec!["*.zip".to_string(), "*.etl".to_string()]
}

fn default_date_pattern() -> String {
    DEFAULT_DATE_PATTERN.to_string()
}

fn default_catalog_path() -> PathBuf {
    PathBuf::from(DEFAULT_CATALOG_PATH)
}

fn processing_units() -> usize {
    thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

fn default_move_throttle() -> usize {
    processing_units() * 6
}

fn default_measure_throttle() -> usize {
    processing_units() * 4
}

impl ProcessingConfig {
    /// Config with every default applied for the given archive root.
    pub fn new(archive_root: impl Into<PathBuf>) -> Self {
        Self {
            incoming_dirs: Vec::new(),
            file_patterns: default_file_patterns(),
            archive_root: archive_root.into(),
            date_pattern: default_date_pattern(),
            move_throttle: default_move_throttle(),
            measure_throttle: default_measure_throttle(),
            measure_deadline_secs: None,
            catalog_path: default_catalog_path(),
        }
    }

    pub fn with_incoming_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.incoming_dirs.push(dir.into());
        self
    }

    pub fn with_throttles(mut self, move_throttle: usize, measure_throttle: usize) -> Self {
        self.move_throttle = move_throttle;
        self.measure_throttle = measure_throttle;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.archive_root.as_os_str().is_empty() {
            return Err(ConfigError::Message("archive_root must be set".to_string()).into());
        }
        if self.move_throttle == 0 || self.measure_throttle == 0 {
            return Err(ConfigError::Message("throttles must be at least 1".to_string()).into());
        }
        for pattern in &self.file_patterns {
            Pattern::new(pattern).map_err(|e| Error::InvalidPattern {
                pattern: pattern.clone(),
                reason: e.to_string(),
            })?;
        }
        validate_date_pattern(&self.date_pattern)
    }
}

/// Load from an optional `Config.toml` and `TRACE_INGEST__*` env vars.
pub fn load_configuration() -> Result<ProcessingConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("Config").required(false))
        .add_source(
            Environment::with_prefix("TRACE_INGEST")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("incoming_dirs")
                .with_list_parse_key("file_patterns"),
        )
        .build()?;
    builder.try_deserialize::<ProcessingConfig>()
}

/// Reject strftime patterns chrono cannot render, and patterns whose
/// rendering would land outside the archive root.
pub fn validate_date_pattern(pattern: &str) -> Result<()> {
    let invalid = |reason: &str| Error::InvalidPattern {
        pattern: pattern.to_string(),
        reason: reason.to_string(),
    };
    if pattern.trim().is_empty() {
        return Err(invalid("date pattern is empty"));
    }
    if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
        return Err(invalid("unsupported strftime specifier"));
    }

    let mut rendered = String::new();
    write!(rendered, "{}", DateTime::<Utc>::default().format(pattern))
        .map_err(|_| invalid("pattern could not be rendered"))?;
    let escapes = Path::new(&rendered).components().any(|c| {
        matches!(
            c,
            Component::RootDir | Component::Prefix(_) | Component::ParentDir
        )
    });
    if escapes {
        return Err(invalid("date pattern must stay inside the archive"));
    }
    Ok(())
}

/// Remove directories that are subdirectories of other directories in the list.
pub fn non_overlapping_directories(dirs: &[PathBuf]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for dir in dirs {
        if result.iter().any(|kept| dir.starts_with(kept)) {
            continue;
        }
        result.retain(|kept| !kept.starts_with(dir));
        result.push(dir.clone());
    }

    result
}

/// True if `path` lies inside `root`.
pub fn is_within(path: &Path, root: &Path) -> bool {
    path.starts_with(root)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProcessingConfig::new("/archive");
        assert_eq!(config.file_patterns, vec!["*.zip", "*.etl"]);
        assert_eq!(config.date_pattern, "%Y-%m");
        assert_eq!(config.move_throttle, processing_units() * 6);
        assert_eq!(config.measure_throttle, processing_units() * 4);
        assert!(config.measure_deadline_secs.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_applies_defaults() {
        let config: ProcessingConfig = Config::builder()
            .set_override("archive_root", "/data/archive")
            .unwrap()
            .set_override("incoming_dirs", vec!["/data/in"])
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(config.archive_root, PathBuf::from("/data/archive"));
        assert_eq!(config.incoming_dirs, vec![PathBuf::from("/data/in")]);
        assert_eq!(config.catalog_path, PathBuf::from(DEFAULT_CATALOG_PATH));
        assert_eq!(config.file_patterns.len(), 2);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let zero = ProcessingConfig::new("/a").with_throttles(0, 4);
        assert!(zero.validate().is_err());

        let mut bad_glob = ProcessingConfig::new("/a");
        bad_glob.file_patterns = vec!["[*.zip".to_string()];
        assert!(matches!(bad_glob.validate(), Err(Error::InvalidPattern { .. })));

        let mut bad_date = ProcessingConfig::new("/a");
        bad_date.date_pattern = "%Y-%Q".to_string();
        assert!(matches!(bad_date.validate(), Err(Error::InvalidPattern { .. })));

        for escaping in ["/outside/%Y", "../%Y-%m", "%Y/../../%m"] {
            let mut config = ProcessingConfig::new("/a");
            config.date_pattern = escaping.to_string();
            assert!(
                matches!(config.validate(), Err(Error::InvalidPattern { .. })),
                "{} should be rejected",
                escaping
            );
        }

        let mut nested = ProcessingConfig::new("/a");
        nested.date_pattern = "%Y/%m".to_string();
        assert!(nested.validate().is_ok());

        let empty_root = ProcessingConfig::new("");
        assert!(matches!(empty_root.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_non_overlapping_no_overlap() {
        let dirs = vec![
            PathBuf::from("/home/user/photos"),
            PathBuf::from("/home/user/docs"),
            PathBuf::from("/var/data"),
        ];
        let result = non_overlapping_directories(&dirs);
        assert_eq!(result.len(), 3);
    }

    #[test]
    fn test_non_overlapping_with_subdirectory() {
        let dirs = vec![
            PathBuf::from("/home/user/docs"),
            PathBuf::from("/home/user"),
            PathBuf::from("/var/data"),
            PathBuf::from("/var/data/in"),
        ];
        let result = non_overlapping_directories(&dirs);
        assert_eq!(
            result,
            vec![PathBuf::from("/home/user"), PathBuf::from("/var/data")]
        );
    }
}
