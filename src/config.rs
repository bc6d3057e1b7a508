//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub table: TableConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Table file configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    /// Directory relative table names resolve against
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Extension appended to table names that have none
    #[serde(default = "default_table_extension")]
    pub extension: String,

    /// Keep `<table>.bak` when packing
    #[serde(default)]
    pub pack_backup: bool,
}

fn default_data_dir() -> String {
    ".".to_string()
}

fn default_table_extension() -> String {
    crate::storage::TABLE_EXTENSION.to_string()
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            extension: default_table_extension(),
            pack_backup: false,
        }
    }
}

/// Index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// B-tree branching factor
    #[serde(default = "default_order")]
    pub order: usize,

    /// Sidecar file extension
    #[serde(default = "default_index_extension")]
    pub extension: String,

    /// Fold character keys to upper case in new tags
    #[serde(default = "default_true")]
    pub case_insensitive: bool,

    /// Save the sidecar when the table is closed
    #[serde(default = "default_true")]
    pub autosave: bool,
}

fn default_order() -> usize {
    crate::index::DEFAULT_ORDER
}

fn default_index_extension() -> String {
    crate::index::INDEX_EXTENSION.to_string()
}

fn default_true() -> bool {
    true
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            order: default_order(),
            extension: default_index_extension(),
            case_insensitive: true,
            autosave: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,

    pub file: Option<String>,
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("xbase").join("config.toml")),
            Some(PathBuf::from("/etc/xbase/config.toml")),
            Some(PathBuf::from("./xbase.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        // Fall back to environment-only config
        tracing::debug!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Resolve a table name against `table.data_dir`, adding the extension
    pub fn table_path(&self, name: &str) -> PathBuf {
        let path = Path::new(name);
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.table.data_dir).join(path)
        };
        crate::storage::table_path(path, &self.table.extension)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.index.order < crate::index::MIN_ORDER {
            return Err(ConfigError::Invalid(format!(
                "index.order must be at least {}",
                crate::index::MIN_ORDER
            )));
        }
        if self.table.extension.is_empty() || self.index.extension.is_empty() {
            return Err(ConfigError::Invalid("file extensions must not be empty".into()));
        }
        if self.table.extension.eq_ignore_ascii_case(&self.index.extension) {
            return Err(ConfigError::Invalid(
                "table and index extensions must differ".into(),
            ));
        }
        Ok(())
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        // Table overrides
        if let Ok(data_dir) = std::env::var("XBASE_DATA_DIR") {
            self.table.data_dir = data_dir;
        }
        if let Ok(backup) = std::env::var("XBASE_PACK_BACKUP") {
            if let Some(b) = parse_bool(&backup) {
                self.table.pack_backup = b;
            }
        }

        // Index overrides
        if let Ok(order) = std::env::var("XBASE_INDEX_ORDER") {
            if let Ok(o) = order.parse::<usize>() {
                self.index.order = o.max(crate::index::MIN_ORDER);
            }
        }
        if let Ok(autosave) = std::env::var("XBASE_INDEX_AUTOSAVE") {
            if let Some(b) = parse_bool(&autosave) {
                self.index.autosave = b;
            }
        }

        // Logging overrides
        if let Ok(level) = std::env::var("XBASE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("XBASE_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# xbase Configuration
#
# Environment variables override these settings:
# - XBASE_DATA_DIR
# - XBASE_PACK_BACKUP
# - XBASE_INDEX_ORDER
# - XBASE_INDEX_AUTOSAVE
# - XBASE_LOG_LEVEL
# - XBASE_LOG_FORMAT

[table]
# Directory that relative table names resolve against
data_dir = "."

# Extension appended to table names without one
extension = "dbf"

# Keep the pre-pack file as <table>.bak
pack_backup = false

[index]
# B-tree branching factor (minimum 4)
order = 64

# Index sidecar extension (people.dbf -> people.inx)
extension = "inx"

# Fold character keys to upper case
case_insensitive = true

# Save indexes when the table is closed
autosave = true

[logging]
# Log level: trace, debug, info, warn, error
level = "warn"

# Log format: pretty (for development) or json (for production)
format = "pretty"

# Optional log file path
# file = "/var/log/xbase/xbase.log"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_generated_config_parses_to_defaults() {
        let config: Config = toml::from_str(&generate_default_config()).unwrap();
        let defaults = Config::default();

        assert_eq!(config.table.extension, defaults.table.extension);
        assert_eq!(config.index.order, defaults.index.order);
        assert_eq!(config.index.extension, defaults.index.extension);
        assert_eq!(config.logging.level, defaults.logging.level);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("xbase.toml");
        std::fs::write(&path, "[index]\norder = 8\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.index.order, 8);
        assert!(config.index.autosave);
        assert_eq!(config.table.extension, "dbf");
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.toml");

        std::fs::write(&path, "[index]\norder = 2\n").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Invalid(_))));

        std::fs::write(&path, "[table\n").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));

        assert!(matches!(
            Config::load(&dir.path().join("missing.toml")),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_table_path_resolution() {
        let mut config = Config::default();
        config.table.data_dir = "/data".to_string();
        assert_eq!(config.table_path("people"), PathBuf::from("/data/people.dbf"));
        assert_eq!(config.table_path("/tmp/x.dat"), PathBuf::from("/tmp/x.dat"));
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("Yes"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
