use crate::account::{AccountConfig, DEFAULT_PROTOCOL};
use crate::paths::AppDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const CURRENT_CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_config_version")]
    pub config_version: u32,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_version: default_config_version(),
            logging: LoggingConfig::default(),
            bridge: BridgeConfig::default(),
            accounts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: LogLevel,
    #[serde(default = "default_max_log_files")]
    pub max_log_files: usize,
    #[serde(default = "default_stdout_enabled")]
    pub stdout: bool,
    #[serde(default)]
    pub file_name: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_log_files: default_max_log_files(),
            stdout: default_stdout_enabled(),
            file_name: None,
        }
    }
}

/// Timing knobs for the main-context side of the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// How often each session's dispatcher drains its queue.
    #[serde(default = "default_dispatch_interval_ms")]
    pub dispatch_interval_ms: u64,
    /// How long a stopped protocol thread may take to return before it is detached.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            dispatch_interval_ms: default_dispatch_interval_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl BridgeConfig {
    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("config validation failed: {0}")]
    Validation(ValidationError),
    #[error("failed to prepare configuration directories: {0}")]
    Directories(#[from] crate::paths::DirsError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unsupported config_version {found}, expected {expected}")]
    UnsupportedVersion { found: u32, expected: u32 },
    #[error("bridge.dispatch_interval_ms must be greater than zero")]
    ZeroDispatchInterval,
    #[error("account username must not be empty")]
    EmptyUsername,
    #[error("account '{username}' uses unsupported protocol '{protocol}'")]
    UnsupportedProtocol { username: String, protocol: String },
    #[error("account '{username}' is configured more than once")]
    DuplicateAccount { username: String },
}

impl Config {
    pub fn load_or_default(dirs: &AppDirs) -> Result<Self, ConfigError> {
        dirs.ensure_exists()?;
        let path = Self::config_path(dirs);
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let config: Config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        config.validate().map_err(ConfigError::Validation)?;
        Ok(config)
    }

    pub fn config_path(dirs: &AppDirs) -> PathBuf {
        dirs.config_dir().join("config.toml")
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.config_version != CURRENT_CONFIG_VERSION {
            return Err(ValidationError::UnsupportedVersion {
                found: self.config_version,
                expected: CURRENT_CONFIG_VERSION,
            });
        }
        if self.bridge.dispatch_interval_ms == 0 {
            return Err(ValidationError::ZeroDispatchInterval);
        }

        let mut seen = HashSet::new();
        for account in &self.accounts {
            validate_account(account)?;
            if !seen.insert(account.username.to_ascii_lowercase()) {
                return Err(ValidationError::DuplicateAccount {
                    username: account.username.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Checks a single account independently of the rest of the config.
pub fn validate_account(account: &AccountConfig) -> Result<(), ValidationError> {
    if account.username.trim().is_empty() {
        return Err(ValidationError::EmptyUsername);
    }
    if account.protocol != DEFAULT_PROTOCOL {
        return Err(ValidationError::UnsupportedProtocol {
            username: account.username.clone(),
            protocol: account.protocol.clone(),
        });
    }
    Ok(())
}

fn default_config_version() -> u32 {
    CURRENT_CONFIG_VERSION
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_max_log_files() -> usize {
    7
}

fn default_stdout_enabled() -> bool {
    true
}

fn default_dispatch_interval_ms() -> u64 {
    50
}

fn default_shutdown_timeout_ms() -> u64 {
    2000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.logging.max_log_files, 7);
        assert!(config.logging.stdout);
        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.bridge.dispatch_interval(), Duration::from_millis(50));
    }

    #[test]
    fn invalid_version_rejected() {
        let mut config = Config::default();
        config.config_version = CURRENT_CONFIG_VERSION + 1;
        let result = config.validate();
        assert!(matches!(
            result,
            Err(ValidationError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn zero_interval_rejected() {
        let mut config = Config::default();
        config.bridge.dispatch_interval_ms = 0;
        assert_eq!(
            config.validate(),
            Err(ValidationError::ZeroDispatchInterval)
        );
    }

    #[test]
    fn duplicate_accounts_rejected_case_insensitively() {
        let mut config = Config::default();
        config.accounts = vec![AccountConfig::new("Alice"), AccountConfig::new("alice")];
        assert!(matches!(
            config.validate(),
            Err(ValidationError::DuplicateAccount { .. })
        ));
    }

    #[test]
    fn blank_username_rejected() {
        assert_eq!(
            validate_account(&AccountConfig::new("  ")),
            Err(ValidationError::EmptyUsername)
        );
    }

    #[test]
    fn foreign_protocol_rejected() {
        let mut account = AccountConfig::new("alice");
        account.protocol = "telegram".into();
        assert_eq!(
            validate_account(&account),
            Err(ValidationError::UnsupportedProtocol {
                username: "alice".into(),
                protocol: "telegram".into(),
            })
        );
    }

    #[test]
    fn parses_bridge_and_accounts() {
        let config: Config = toml::from_str(
            r#"
            [bridge]
            dispatch_interval_ms = 20

            [[accounts]]
            username = "alice"
            session_dir = "/tmp/alice"
            "#,
        )
        .unwrap();
        assert_eq!(config.bridge.dispatch_interval_ms, 20);
        assert_eq!(config.bridge.shutdown_timeout_ms, 2000);
        assert_eq!(config.accounts.len(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn load_reads_config_file() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = AppDirs::from_root(tmp.path());
        dirs.ensure_exists().unwrap();
        fs::write(
            Config::config_path(&dirs),
            "[logging]\nlevel = \"debug\"\n",
        )
        .unwrap();

        let config = Config::load_or_default(&dirs).unwrap();
        assert_eq!(config.logging.level, LogLevel::Debug);
    }

    #[test]
    fn load_missing_file_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = AppDirs::from_root(tmp.path());
        let config = Config::load_or_default(&dirs).unwrap();
        assert!(config.accounts.is_empty());
    }
}
