//! YAML configuration for the sync feature.
//!
//! # Storage layout
//!
//! ```text
//! ~/.ranksync/
//!   config.yaml   (mode 0600, written with defaults on first run)
//!   ranks.db      (default SQLite database)
//!   daemon.sock   (daemon control socket)
//! ```
//!
//! # API pattern
//!
//! Every function has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Relation name used when the config does not name one.
pub const DEFAULT_TABLE: &str = "RanksTable";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_QUERY_TIMEOUT_MS: u64 = 5_000;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Root of `config.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    /// Log every issued query and event at debug level.
    #[serde(default)]
    pub debug: bool,
}

/// Backend connection settings handed to the record store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
}

fn default_table() -> String {
    DEFAULT_TABLE.to_string()
}

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

fn default_query_timeout_ms() -> u64 {
    DEFAULT_QUERY_TIMEOUT_MS
}

impl DatabaseConfig {
    /// SQLite database file under `<home>/.ranksync/`.
    pub fn default_at(home: &Path) -> Self {
        Self {
            url: format!("sqlite://{}", ranksync_root(home).join("ranks.db").display()),
            table: default_table(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            query_timeout_ms: DEFAULT_QUERY_TIMEOUT_MS,
        }
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

impl Config {
    pub fn default_at(home: &Path) -> Self {
        Self {
            database: DatabaseConfig::default_at(home),
            debug: false,
        }
    }

    /// Reject values the store cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let db = &self.database;
        if db.url.trim().is_empty() {
            return Err(ConfigError::Invalid("database.url is empty".to_string()));
        }
        if !is_sql_identifier(&db.table) {
            return Err(ConfigError::Invalid(format!(
                "database.table '{}' is not a plain identifier",
                db.table
            )));
        }
        if db.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "database.max_connections must be at least 1".to_string(),
            ));
        }
        if db.query_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "database.query_timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`: safe to splice into DDL/DML as a table name.
pub fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// `<home>/.ranksync/`: pure, no I/O.
pub fn ranksync_root(home: &Path) -> PathBuf {
    home.join(".ranksync")
}

/// `<home>/.ranksync/config.yaml`: pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    ranksync_root(home).join("config.yaml")
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// Load and validate `<home>/.ranksync/config.yaml`.
///
/// Returns `ConfigError::NotFound` if absent,
/// `ConfigError::Parse` (with path + line context) if malformed YAML.
pub fn load_at(home: &Path) -> Result<Config, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Err(ConfigError::NotFound { path });
    }
    let contents = std::fs::read_to_string(&path)?;
    let config: Config =
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })?;
    config.validate()?;
    Ok(config)
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<Config, ConfigError> {
    load_at(&home()?)
}

/// Load the config, writing the defaults first if no file exists yet.
pub fn load_or_init_at(home: &Path) -> Result<Config, ConfigError> {
    let path = config_path_at(home);
    if path.exists() {
        return load_at(home);
    }
    let config = Config::default_at(home);
    save_at(home, &config)?;
    Ok(config)
}

/// `load_or_init_at` convenience wrapper.
pub fn load_or_init() -> Result<Config, ConfigError> {
    load_or_init_at(&home()?)
}

/// Atomically save `config` to `<home>/.ranksync/config.yaml`.
///
/// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, config: &Config) -> Result<(), ConfigError> {
    let dir = ranksync_root(home);
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
        set_dir_permissions(&dir)?;
    }
    let path = config_path_at(home);
    let tmp_path = path.with_file_name("config.yaml.tmp");

    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&tmp_path, yaml)?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

/// Home directory used by the no-arg wrappers.
pub fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn sql_identifier_rules() {
        assert!(is_sql_identifier("RanksTable"));
        assert!(is_sql_identifier("_ranks_2"));
        assert!(!is_sql_identifier(""));
        assert!(!is_sql_identifier("2ranks"));
        assert!(!is_sql_identifier("ranks; DROP TABLE x"));
        assert!(!is_sql_identifier("ranks-table"));
    }

    #[test]
    fn default_config_is_valid() {
        let tmp = TempDir::new().unwrap();
        let config = Config::default_at(tmp.path());
        config.validate().expect("defaults validate");
        assert_eq!(config.database.table, DEFAULT_TABLE);
        assert!(config.database.url.starts_with("sqlite://"));
        assert!(config.database.url.ends_with("ranks.db"));
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default_at(tmp.path());
        config.database.query_timeout_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn query_timeout_converts_millis() {
        let tmp = TempDir::new().unwrap();
        let config = Config::default_at(tmp.path());
        assert_eq!(config.database.query_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn home_not_found_error_message() {
        assert!(ConfigError::HomeNotFound.to_string().contains("home directory"));
    }

    #[cfg(unix)]
    #[test]
    fn saved_config_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = TempDir::new().unwrap();
        save_at(tmp.path(), &Config::default_at(tmp.path())).unwrap();
        let mode = std::fs::metadata(config_path_at(tmp.path()))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
