//! Bootstrap configuration loading
//!
//! Settings sources, highest priority first:
//! 1. Command-line arguments
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Built-in defaults (code constants, OS-dependent paths)
//!
//! The resolved configuration is a plain value handed to component
//! constructors; nothing here is global.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration file contents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Path to the SQLite database file
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub processing: ProcessingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error), overridden by RUST_LOG
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Processing pipeline tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Verbatim records fetched per chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Concurrent transformation workers
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Records handed to one worker at a time
    #[serde(default = "default_worker_slice_size")]
    pub worker_slice_size: usize,

    /// Grid size for rules that do not specify a precision
    #[serde(default = "default_precision_meters")]
    pub default_precision_meters: u32,

    /// Grid size applied when a taxon's rules cannot be read
    #[serde(default = "default_fail_safe_precision_meters")]
    pub fail_safe_precision_meters: u32,

    /// Upper bound for retrying writes on "database is locked"
    #[serde(default = "default_max_lock_wait_ms")]
    pub max_lock_wait_ms: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            worker_count: default_worker_count(),
            worker_slice_size: default_worker_slice_size(),
            default_precision_meters: default_precision_meters(),
            fail_safe_precision_meters: default_fail_safe_precision_meters(),
            max_lock_wait_ms: default_max_lock_wait_ms(),
        }
    }
}

impl ProcessingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Config("processing.chunk_size must be positive".to_string()));
        }
        if self.worker_count == 0 {
            return Err(Error::Config("processing.worker_count must be positive".to_string()));
        }
        if self.worker_slice_size == 0 {
            return Err(Error::Config(
                "processing.worker_slice_size must be positive".to_string(),
            ));
        }
        if self.default_precision_meters == 0 || self.fail_safe_precision_meters == 0 {
            return Err(Error::Config("diffusion precisions must be positive".to_string()));
        }
        Ok(())
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_chunk_size() -> usize {
    1_000_000
}

fn default_worker_count() -> usize {
    4
}

fn default_worker_slice_size() -> usize {
    10_000
}

fn default_precision_meters() -> u32 {
    1_000
}

fn default_fail_safe_precision_meters() -> u32 {
    25_000
}

fn default_max_lock_wait_ms() -> u64 {
    5_000
}

/// Environment variable naming the database file
pub const DATABASE_PATH_ENV: &str = "SOS_DATABASE_PATH";

/// Default configuration file location for the platform
///
/// `~/.config/sos/sos-processing.toml` on Linux, the platform config
/// directory elsewhere.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("sos").join("sos-processing.toml"))
}

/// Load a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
    config.processing.validate()?;
    Ok(config)
}

/// Load the explicit config file, or the platform default if present
///
/// An explicit path must exist; a missing default file yields built-in
/// defaults.
pub fn load_or_default(explicit: Option<&Path>) -> Result<TomlConfig> {
    if let Some(path) = explicit {
        return load_toml_config(path);
    }
    match default_config_path() {
        Some(path) if path.exists() => load_toml_config(&path),
        _ => Ok(TomlConfig::default()),
    }
}

/// Write a TOML config file atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("toml.tmp");
    std::fs::write(&temp_path, content)?;
    std::fs::rename(&temp_path, path)?;
    Ok(())
}

/// Resolve the database path by priority: CLI → ENV → TOML → OS default
pub fn resolve_database_path(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    toml_config: &TomlConfig,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &toml_config.database_path {
        return path.clone();
    }

    default_database_path()
}

/// OS-dependent default database location
fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("sos").join("sos.db"))
        .unwrap_or_else(|| PathBuf::from("./sos_data/sos.db"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ProcessingConfig::default();
        assert_eq!(config.chunk_size, 1_000_000);
        assert_eq!(config.worker_count, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_processing_table_uses_defaults() {
        let config: TomlConfig = toml::from_str(
            r#"
            database_path = "/var/lib/sos/sos.db"

            [processing]
            worker_count = 8
            "#,
        )
        .unwrap();

        assert_eq!(config.database_path, Some(PathBuf::from("/var/lib/sos/sos.db")));
        assert_eq!(config.processing.worker_count, 8);
        assert_eq!(config.processing.chunk_size, 1_000_000);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_zero_worker_count_rejected() {
        let config = ProcessingConfig {
            worker_count: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_cli_argument_wins() {
        let toml_config = TomlConfig {
            database_path: Some(PathBuf::from("/from/toml.db")),
            ..Default::default()
        };
        let resolved = resolve_database_path(
            Some(Path::new("/from/cli.db")),
            "SOS_TEST_UNSET_DATABASE_PATH_CLI",
            &toml_config,
        );
        assert_eq!(resolved, PathBuf::from("/from/cli.db"));
    }

    #[test]
    fn test_toml_used_when_cli_and_env_absent() {
        let toml_config = TomlConfig {
            database_path: Some(PathBuf::from("/from/toml.db")),
            ..Default::default()
        };
        let resolved =
            resolve_database_path(None, "SOS_TEST_UNSET_DATABASE_PATH_TOML", &toml_config);
        assert_eq!(resolved, PathBuf::from("/from/toml.db"));
    }
}
